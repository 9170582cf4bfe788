use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::{ChromiumSection, SessionSection};

use super::driver::{js_string, Locator, PageSession, PageSessionFactory, PendingDownload};
use super::error::{BrowserError, BrowserResult};

const MARK_ATTR: &str = "data-bcdl-target";
const MARKED_SELECTOR: &str = "[data-bcdl-target]";
const CRDOWNLOAD_SUFFIX: &str = ".crdownload";
const POLL_INTERVAL: Duration = Duration::from_millis(250);
const COMPLETION_POLL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Default)]
pub struct LaunchOverrides {
    pub headless: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct BrowserLauncher {
    chromium: ChromiumSection,
    session: SessionSection,
}

impl BrowserLauncher {
    pub fn new(chromium: ChromiumSection, session: SessionSection) -> Self {
        Self { chromium, session }
    }

    pub async fn launch(&self) -> BrowserResult<BrowserHandle> {
        self.launch_with_overrides(LaunchOverrides::default()).await
    }

    pub async fn launch_with_overrides(
        &self,
        overrides: LaunchOverrides,
    ) -> BrowserResult<BrowserHandle> {
        let headless = overrides.headless.unwrap_or(self.chromium.headless);
        let chromium_config = self.build_chromium_config(headless)?;
        info!(headless, "launching chromium");

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "chromium handler reported error");
                }
            }
        });

        Ok(BrowserHandle {
            browser,
            handler_task: Some(handler_task),
            session: self.session.clone(),
        })
    }

    fn build_chromium_config(&self, headless: bool) -> BrowserResult<ChromiumConfig> {
        let mut builder = ChromiumConfig::builder();
        if let Some(path) = &self.chromium.executable_path {
            builder = builder.chrome_executable(path);
        }
        if !headless {
            builder = builder.with_head();
        }
        if !self.chromium.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(timeout) = self.chromium.request_timeout_seconds {
            builder = builder.request_timeout(Duration::from_secs(timeout));
        }

        let mut args = vec![format!("--user-agent={}", self.session.user_agent)];
        args.extend(self.chromium.extra_args.iter().cloned());
        builder = builder.args(args);

        builder.build().map_err(BrowserError::Configuration)
    }
}

/// A running Chromium instance plus the spawned CDP event pump.
#[derive(Debug)]
pub struct BrowserHandle {
    browser: Browser,
    handler_task: Option<JoinHandle<()>>,
    session: SessionSection,
}

impl BrowserHandle {
    /// Open a fresh tab with the configured user agent applied.
    pub async fn new_session(&self) -> BrowserResult<BrowserPageSession> {
        let params = CreateTargetParams::new("about:blank");
        let page = self.browser.new_page(params).await?;

        let mut params_builder =
            SetUserAgentOverrideParams::builder().user_agent(self.session.user_agent.clone());
        if let Some(accept) = &self.session.accept_language {
            params_builder = params_builder.accept_language(accept.clone());
        }
        let params = params_builder.build().map_err(BrowserError::Configuration)?;
        page.set_user_agent(params).await?;

        Ok(BrowserPageSession { page })
    }

    pub async fn shutdown(mut self) -> BrowserResult<()> {
        info!("shutting down chromium");
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "browser handler join error");
            }
        }
        Ok(())
    }
}

impl Drop for BrowserHandle {
    fn drop(&mut self) {
        if self.handler_task.is_some() {
            warn!("browser handle dropped without shutdown; chromium may keep running");
        }
    }
}

pub struct BrowserSessionFactory {
    handle: Arc<BrowserHandle>,
}

impl BrowserSessionFactory {
    pub fn new(handle: Arc<BrowserHandle>) -> Self {
        Self { handle }
    }
}

#[async_trait(?Send)]
impl PageSessionFactory for BrowserSessionFactory {
    async fn create(&self) -> BrowserResult<Box<dyn PageSession>> {
        let session = self.handle.new_session().await?;
        Ok(Box::new(session))
    }
}

pub struct BrowserPageSession {
    page: Page,
}

impl BrowserPageSession {
    async fn eval_value(&self, script: &str) -> BrowserResult<Value> {
        self.page
            .evaluate(script)
            .await?
            .into_value()
            .map_err(|err| BrowserError::Script(format!("failed to decode script payload: {err}")))
    }

    async fn eval_bool(&self, script: &str) -> BrowserResult<bool> {
        let value = self.eval_value(script).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// Resolve the locator in-page and tag the match with the marker
    /// attribute. Returns whether anything matched.
    async fn mark(&self, locator: &Locator, require_visible: bool) -> BrowserResult<bool> {
        self.eval_bool(&mark_script(locator, require_visible)).await
    }
}

#[async_trait(?Send)]
impl PageSession for BrowserPageSession {
    async fn goto(&mut self, url: &str) -> BrowserResult<()> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(BrowserError::Configuration)?;
        self.page
            .goto(params)
            .await
            .map_err(|err| BrowserError::Navigation {
                url: url.to_string(),
                reason: err.to_string(),
            })?;
        self.page
            .wait_for_navigation()
            .await
            .map_err(|err| BrowserError::Navigation {
                url: url.to_string(),
                reason: err.to_string(),
            })?;
        Ok(())
    }

    async fn settle(&mut self, bound: Duration) -> BrowserResult<()> {
        let deadline = Instant::now() + bound;
        loop {
            // Evaluation can fail while a navigation swaps the context;
            // treat that the same as not-ready.
            let ready = matches!(
                self.eval_bool("document.readyState === 'complete'").await,
                Ok(true)
            );
            if ready || Instant::now() >= deadline {
                break;
            }
            sleep(POLL_INTERVAL).await;
        }
        sleep(POLL_INTERVAL).await;
        Ok(())
    }

    async fn wait_for(&mut self, locator: &Locator, timeout: Duration) -> BrowserResult<bool> {
        let script = mark_script(locator, true);
        let deadline = Instant::now() + timeout;
        loop {
            if self.eval_bool(&script).await? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn exists(&mut self, locator: &Locator) -> BrowserResult<bool> {
        self.mark(locator, false).await
    }

    async fn click(&mut self, locator: &Locator) -> BrowserResult<()> {
        if !self.mark(locator, false).await? {
            return Err(BrowserError::MissingElement(locator.to_string()));
        }
        let element = self.page.find_element(MARKED_SELECTOR).await?;
        element.click().await?;
        Ok(())
    }

    async fn force_click(&mut self, locator: &Locator) -> BrowserResult<()> {
        if !self.mark(locator, false).await? {
            return Err(BrowserError::MissingElement(locator.to_string()));
        }
        let script = format!(
            r#"(() => {{
    const el = document.querySelector('{marked}');
    if (!el) return false;
    el.click();
    return true;
}})()"#,
            marked = MARKED_SELECTOR
        );
        if !self.eval_bool(&script).await? {
            return Err(BrowserError::MissingElement(locator.to_string()));
        }
        Ok(())
    }

    async fn fill(&mut self, locator: &Locator, value: &str) -> BrowserResult<()> {
        if !self.mark(locator, false).await? {
            return Err(BrowserError::MissingElement(locator.to_string()));
        }
        let script = format!(
            r#"(() => {{
    const el = document.querySelector('{marked}');
    if (!el) return false;
    el.focus();
    el.value = {value};
    el.dispatchEvent(new Event('input', {{ bubbles: true }}));
    el.dispatchEvent(new Event('change', {{ bubbles: true }}));
    return true;
}})()"#,
            marked = MARKED_SELECTOR,
            value = js_string(value)
        );
        if !self.eval_bool(&script).await? {
            return Err(BrowserError::MissingElement(locator.to_string()));
        }
        Ok(())
    }

    async fn eval(&mut self, script: &str) -> BrowserResult<Value> {
        self.eval_value(script).await
    }

    async fn current_url(&mut self) -> BrowserResult<String> {
        let value = self.eval_value("window.location.href").await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BrowserError::Script("location.href did not yield a string".into()))
    }

    async fn tag_name(&mut self, locator: &Locator) -> BrowserResult<Option<String>> {
        if !self.mark(locator, false).await? {
            return Ok(None);
        }
        let script = format!(
            "(() => {{ const el = document.querySelector('{marked}'); return el ? el.tagName : null; }})()",
            marked = MARKED_SELECTOR
        );
        let value = self.eval_value(&script).await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn select_option(&mut self, locator: &Locator, value: &str) -> BrowserResult<bool> {
        if !self.mark(locator, false).await? {
            return Err(BrowserError::MissingElement(locator.to_string()));
        }
        let script = format!(
            r#"(() => {{
    const el = document.querySelector('{marked}');
    if (!el || el.tagName !== 'SELECT') return false;
    const want = {value}.toLowerCase();
    const option = Array.from(el.options).find(
        (o) => o.value.toLowerCase() === want || (o.textContent || '').toLowerCase().includes(want)
    );
    if (!option) return false;
    el.value = option.value;
    el.dispatchEvent(new Event('change', {{ bubbles: true }}));
    return true;
}})()"#,
            marked = MARKED_SELECTOR,
            value = js_string(value)
        );
        self.eval_bool(&script).await
    }

    async fn begin_download(
        &mut self,
        trigger: &Locator,
        dir: &Path,
        timeout: Duration,
    ) -> BrowserResult<PendingDownload> {
        tokio::fs::create_dir_all(dir).await?;
        let baseline = list_entries(dir).await?;

        let params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(dir.to_string_lossy().to_string())
            .build()
            .map_err(BrowserError::Configuration)?;
        self.page.execute(params).await?;

        self.click(trigger).await?;

        let deadline = Instant::now() + timeout;
        loop {
            let entries = list_entries(dir).await?;
            if let Some(entry) = entries.iter().find(|name| !baseline.contains(*name)) {
                debug!(entry = %entry, "download started");
                let file_name = entry
                    .strip_suffix(CRDOWNLOAD_SUFFIX)
                    .unwrap_or(entry)
                    .to_string();
                return Ok(PendingDownload {
                    dir: dir.to_path_buf(),
                    file_name,
                    baseline,
                });
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Download(format!(
                    "no download started within {}s",
                    timeout.as_secs()
                )));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn finish_download(
        &mut self,
        pending: PendingDownload,
        timeout: Duration,
    ) -> BrowserResult<PathBuf> {
        let deadline = Instant::now() + timeout;
        let mut last_seen: Option<(String, u64)> = None;
        loop {
            let entries = list_entries(&pending.dir).await?;
            // The browser may rename the partial file on completion, so
            // accept any settled newcomer, preferring the name observed
            // at start.
            let candidate = entries
                .iter()
                .find(|name| **name == pending.file_name)
                .or_else(|| {
                    entries.iter().find(|name| {
                        !name.ends_with(CRDOWNLOAD_SUFFIX) && !pending.baseline.contains(*name)
                    })
                });
            if let Some(name) = candidate {
                let partial = pending.dir.join(format!("{name}{CRDOWNLOAD_SUFFIX}"));
                let path = pending.dir.join(name);
                if !partial.exists() {
                    if let Ok(metadata) = tokio::fs::metadata(&path).await {
                        let len = metadata.len();
                        match &last_seen {
                            Some((seen, size)) if seen == name && *size == len => {
                                info!(path = %path.display(), bytes = len, "download finished");
                                return Ok(path);
                            }
                            _ => last_seen = Some((name.clone(), len)),
                        }
                    }
                }
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout("download completion".into()));
            }
            sleep(COMPLETION_POLL).await;
        }
    }

    async fn close(&mut self) -> BrowserResult<()> {
        self.page.clone().close().await?;
        Ok(())
    }
}

async fn list_entries(dir: &Path) -> BrowserResult<HashSet<String>> {
    let mut entries = HashSet::new();
    let mut reader = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = reader.next_entry().await? {
        entries.insert(entry.file_name().to_string_lossy().to_string());
    }
    Ok(entries)
}

fn mark_script(locator: &Locator, require_visible: bool) -> String {
    let finder = match locator {
        Locator::Css(selector) => format!(
            r#"let nodes = Array.from(document.querySelectorAll({selector}));
    if (requireVisible) nodes = nodes.filter(visible);
    const hit = nodes[0] || null;"#,
            selector = js_string(selector)
        ),
        Locator::Text { scope, text } => format!(
            r#"const needle = {text}.toLowerCase();
    let nodes = Array.from(document.querySelectorAll({scope}))
        .filter((el) => (el.innerText || el.textContent || '').toLowerCase().includes(needle));
    if (requireVisible) nodes = nodes.filter(visible);
    const hit = nodes.find((el) => !nodes.some((other) => other !== el && el.contains(other))) || null;"#,
            text = js_string(text),
            scope = js_string(scope)
        ),
    };
    format!(
        r#"(() => {{
    const requireVisible = {require_visible};
    const visible = (el) => !!(el.offsetParent || el.getClientRects().length > 0);
    for (const el of document.querySelectorAll('{marked}')) el.removeAttribute('{attr}');
    {finder}
    if (!hit) return false;
    hit.setAttribute('{attr}', '1');
    return true;
}})()"#,
        marked = MARKED_SELECTOR,
        attr = MARK_ATTR,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn css_mark_script_embeds_selector() {
        let script = mark_script(&Locator::css("ol#music-grid"), false);
        assert!(script.contains("\"ol#music-grid\""));
        assert!(script.contains("data-bcdl-target"));
        assert!(script.contains("const requireVisible = false"));
    }

    #[test]
    fn text_mark_script_picks_deepest_match() {
        let script = mark_script(&Locator::text("button", "Accept all"), true);
        assert!(script.contains("\"Accept all\""));
        assert!(script.contains("el.contains(other)"));
        assert!(script.contains("const requireVisible = true"));
    }
}
