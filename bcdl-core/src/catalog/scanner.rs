use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::browser::{BrowserError, BrowserResult, Locator, PageSession, PageSessionFactory};
use crate::config::{ScanSection, SelectorSection};

use super::classify::{classify, PurchaseSignals};
use super::{Album, AlbumStatus};

pub type ScanResult<T> = Result<T, ScanError>;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
    #[error("album grid did not appear within {0}s")]
    GridNotFound(u64),
    #[error("failed to decode album grid payload: {0}")]
    GridPayload(String),
    #[error("a scan is already running")]
    ScanInProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanOutcome {
    Completed,
    Cancelled,
}

#[derive(Debug, Serialize)]
pub struct ScanReport {
    pub albums: Vec<Album>,
    pub outcome: ScanOutcome,
}

/// Claim on the scanner's single scan slot. Dropping the handle
/// releases the slot, finished or not.
#[derive(Debug)]
pub struct ScanHandle {
    stop: Arc<AtomicBool>,
    slot: Arc<AtomicBool>,
}

impl ScanHandle {
    pub fn canceller(&self) -> ScanCanceller {
        ScanCanceller {
            stop: Arc::clone(&self.stop),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

impl Drop for ScanHandle {
    fn drop(&mut self) {
        self.slot.store(false, Ordering::Release);
    }
}

/// Requests cooperative cancellation of one scan. Cloneable so it can
/// be handed to a signal handler while the scan runs.
#[derive(Debug, Clone)]
pub struct ScanCanceller {
    stop: Arc<AtomicBool>,
}

impl ScanCanceller {
    pub fn cancel(&self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// Walks an artist's album grid and classifies every release by
/// visiting its page. One page session is reused for the whole scan.
pub struct CatalogScanner {
    scan: ScanSection,
    selectors: SelectorSection,
    sessions: Arc<dyn PageSessionFactory>,
    slot: Arc<AtomicBool>,
}

impl CatalogScanner {
    pub fn new(
        scan: ScanSection,
        selectors: SelectorSection,
        sessions: Arc<dyn PageSessionFactory>,
    ) -> Self {
        Self {
            scan,
            selectors,
            sessions,
            slot: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Claim the scan slot. Fails while a previous handle is alive.
    pub fn begin_scan(&self) -> ScanResult<ScanHandle> {
        if self
            .slot
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ScanError::ScanInProgress);
        }
        Ok(ScanHandle {
            stop: Arc::new(AtomicBool::new(false)),
            slot: Arc::clone(&self.slot),
        })
    }

    /// Run the scan claimed by `handle`. The callback fires once per
    /// classified album, in grid order. Cancellation is checked
    /// between albums and yields a partial report, not an error.
    pub async fn run<F>(
        &self,
        handle: &ScanHandle,
        catalog_url: &str,
        mut on_album: F,
    ) -> ScanResult<ScanReport>
    where
        F: FnMut(&Album),
    {
        let mut session = self.sessions.create().await?;
        let result = self
            .drive(session.as_mut(), handle, catalog_url, &mut on_album)
            .await;
        if let Err(err) = session.close().await {
            warn!(error = %err, "failed to close scan page");
        }
        result
    }

    async fn drive(
        &self,
        session: &mut dyn PageSession,
        handle: &ScanHandle,
        catalog_url: &str,
        on_album: &mut dyn FnMut(&Album),
    ) -> ScanResult<ScanReport> {
        info!(url = %catalog_url, "starting catalog scan");
        session.goto(catalog_url).await?;

        let grid = Locator::css(&self.selectors.music_grid);
        let grid_timeout = Duration::from_secs(self.scan.grid_timeout_seconds);
        if !session.wait_for(&grid, grid_timeout).await? {
            return Err(ScanError::GridNotFound(self.scan.grid_timeout_seconds));
        }

        let entries = self.extract_grid(session).await?;
        info!(count = entries.len(), "album grid extracted");

        let mut albums = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            if handle.is_cancelled() {
                info!(scanned = albums.len(), "scan cancelled");
                return Ok(ScanReport {
                    albums,
                    outcome: ScanOutcome::Cancelled,
                });
            }

            let album_url = resolve_album_url(catalog_url, &entry.url);
            debug!(
                index,
                total = entries.len(),
                title = %entry.title,
                url = %album_url,
                "classifying album"
            );
            let status = self.classify_album_page(session, &album_url).await;
            let album = Album {
                title: entry.title.clone(),
                artist: entry.artist.clone(),
                cover_url: entry.cover_url.clone(),
                url: album_url,
                status,
                price_text: entry.price.clone(),
            };
            on_album(&album);
            albums.push(album);
        }

        info!(count = albums.len(), "catalog scan complete");
        Ok(ScanReport {
            albums,
            outcome: ScanOutcome::Completed,
        })
    }

    async fn extract_grid(&self, session: &mut dyn PageSession) -> ScanResult<Vec<GridEntry>> {
        let value = session.eval(&grid_script(&self.selectors)).await?;
        serde_json::from_value(value).map_err(|err| ScanError::GridPayload(err.to_string()))
    }

    /// Classify one album page. Failures downgrade the album to
    /// unavailable instead of aborting the scan.
    async fn classify_album_page(
        &self,
        session: &mut dyn PageSession,
        album_url: &str,
    ) -> AlbumStatus {
        let mut attempt = 0;
        loop {
            match self.read_purchase_signals(session, album_url).await {
                Ok(signals) => return classify(&signals),
                Err(err) if attempt < self.scan.detail_nav_retries => {
                    attempt += 1;
                    debug!(url = %album_url, error = %err, attempt, "retrying album page");
                }
                Err(err) => {
                    warn!(url = %album_url, error = %err, "album page unreadable, marking unavailable");
                    return AlbumStatus::Unavailable;
                }
            }
        }
    }

    async fn read_purchase_signals(
        &self,
        session: &mut dyn PageSession,
        album_url: &str,
    ) -> BrowserResult<PurchaseSignals> {
        session.goto(album_url).await?;
        let value = session.eval(&signals_script(&self.selectors)).await?;
        serde_json::from_value(value)
            .map_err(|err| BrowserError::Script(format!("purchase signals payload: {err}")))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GridEntry {
    #[serde(default)]
    title: String,
    #[serde(default)]
    artist: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    cover_url: String,
    #[serde(default)]
    price: String,
}

fn resolve_album_url(catalog_url: &str, href: &str) -> String {
    match Url::parse(catalog_url).and_then(|base| base.join(href)) {
        Ok(joined) => joined.to_string(),
        Err(_) => href.to_string(),
    }
}

fn grid_script(selectors: &SelectorSection) -> String {
    format!(
        r#"(() => {{
    const items = document.querySelectorAll({item});
    return Array.from(items).map((item) => {{
        const title = item.querySelector({title});
        const artist = item.querySelector({artist});
        const link = item.querySelector('a');
        const cover = item.querySelector('img');
        const price = item.querySelector({price});
        let coverUrl = '';
        if (cover) {{
            coverUrl = cover.getAttribute({lazy}) || cover.getAttribute('src') || '';
        }}
        return {{
            title: title ? title.innerText.trim() : '',
            artist: artist ? artist.innerText.replace('by ', '').trim() : '',
            url: link ? (link.getAttribute('href') || '') : '',
            cover_url: coverUrl,
            price: price ? price.innerText.trim() : '',
        }};
    }});
}})()"#,
        item = crate::browser::js_string(&selectors.grid_item),
        title = crate::browser::js_string(&selectors.grid_item_title),
        artist = crate::browser::js_string(&selectors.grid_item_artist),
        price = crate::browser::js_string(&selectors.grid_item_price),
        lazy = crate::browser::js_string(&selectors.cover_lazy_attr),
    )
}

fn signals_script(selectors: &SelectorSection) -> String {
    format!(
        r#"(() => {{
    const header = document.querySelector({header});
    if (!header) return {{ header_text: null, buy_button_text: null }};
    const button = header.querySelector({button});
    return {{
        header_text: (header.innerText || '').toLowerCase(),
        buy_button_text: button ? (button.innerText || '').toLowerCase() : null,
    }};
}})()"#,
        header = crate::browser::js_string(&selectors.purchase_header),
        button = crate::browser::js_string(&selectors.purchase_button),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_album_links_join_against_catalog() {
        let resolved = resolve_album_url("https://artist.bandcamp.com/music", "/album/first");
        assert_eq!(resolved, "https://artist.bandcamp.com/album/first");
    }

    #[test]
    fn absolute_album_links_pass_through() {
        let resolved = resolve_album_url(
            "https://artist.bandcamp.com/music",
            "https://other.bandcamp.com/album/x",
        );
        assert_eq!(resolved, "https://other.bandcamp.com/album/x");
    }

    #[test]
    fn unparseable_base_keeps_href() {
        assert_eq!(resolve_album_url("not a url", "/album/x"), "/album/x");
    }

    #[test]
    fn grid_script_embeds_configured_selectors() {
        let script = grid_script(&SelectorSection::default());
        assert!(script.contains("\"li.music-grid-item\""));
        assert!(script.contains("\"data-original\""));
    }
}
