mod error;

pub use error::{DownloadError, DownloadResult};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::browser::{Locator, PageSession, PageSessionFactory};
use crate::config::{DownloadSection, MailSection, SelectorSection};
use crate::mail::{MailResult, TempMailAccount, TempMailClient};

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub dir: PathBuf,
    pub format: String,
}

/// Receives one human-readable line per flow step. Any `FnMut(&str)`
/// qualifies.
pub trait ProgressSink {
    fn report(&mut self, message: &str);
}

impl<F> ProgressSink for F
where
    F: FnMut(&str),
{
    fn report(&mut self, message: &str) {
        self(message)
    }
}

/// The mailbox side of email verification, separated so the flow can
/// be driven in tests without the real API.
#[async_trait]
pub trait VerificationMailbox: Send + Sync {
    async fn provision(&self) -> MailResult<TempMailAccount>;

    async fn poll_for_link(
        &self,
        account: &TempMailAccount,
        max_attempts: usize,
        interval: Duration,
    ) -> MailResult<String>;
}

#[async_trait]
impl VerificationMailbox for TempMailClient {
    async fn provision(&self) -> MailResult<TempMailAccount> {
        TempMailClient::provision(self).await
    }

    async fn poll_for_link(
        &self,
        account: &TempMailAccount,
        max_attempts: usize,
        interval: Duration,
    ) -> MailResult<String> {
        TempMailClient::poll_for_link(self, account, max_attempts, interval).await
    }
}

/// Where the checkout goes next. Every state transition is explicit;
/// a page that matches no known shape becomes a typed error instead
/// of a silent dead end.
enum Step {
    ConsentCheck,
    DirectLinkProbe,
    BuyButtonSearch,
    PriceGate,
    PostPriceBranch,
    EmailGate,
    DownloadPage,
    Done(PathBuf),
}

/// Drives one album from its page to a saved artifact: dismiss the
/// consent banner, try the direct free-download link, otherwise walk
/// the name-your-price checkout (zero price, throwaway email when
/// demanded), then pick a format and capture the file.
pub struct DownloadFlow {
    download: DownloadSection,
    mail: MailSection,
    selectors: SelectorSection,
    sessions: Arc<dyn PageSessionFactory>,
    mailbox: Arc<dyn VerificationMailbox>,
}

impl DownloadFlow {
    pub fn new(
        download: DownloadSection,
        mail: MailSection,
        selectors: SelectorSection,
        sessions: Arc<dyn PageSessionFactory>,
        mailbox: Arc<dyn VerificationMailbox>,
    ) -> Self {
        Self {
            download,
            mail,
            selectors,
            sessions,
            mailbox,
        }
    }

    pub async fn run(
        &self,
        request: &DownloadRequest,
        progress: &mut dyn ProgressSink,
    ) -> DownloadResult<PathBuf> {
        info!(url = %request.url, format = %request.format, "starting download flow");
        progress.report(&format!("Starting download for: {}", request.url));

        let mut session = self.sessions.create().await?;
        let result = self.drive(session.as_mut(), request, progress).await;
        if let Err(err) = session.close().await {
            warn!(error = %err, "failed to close download page");
        }

        match &result {
            Ok(path) => info!(path = %path.display(), "download flow finished"),
            Err(err) => warn!(url = %request.url, error = %err, "download flow failed"),
        }
        result
    }

    async fn drive(
        &self,
        session: &mut dyn PageSession,
        request: &DownloadRequest,
        progress: &mut dyn ProgressSink,
    ) -> DownloadResult<PathBuf> {
        session.goto(&request.url).await?;

        let mut step = Step::ConsentCheck;
        loop {
            step = match step {
                Step::ConsentCheck => self.consent_check(session, progress).await?,
                Step::DirectLinkProbe => self.direct_link_probe(session, progress).await?,
                Step::BuyButtonSearch => self.buy_button_search(session, progress).await?,
                Step::PriceGate => self.price_gate(session, progress).await?,
                Step::PostPriceBranch => self.post_price_branch(session, progress).await?,
                Step::EmailGate => self.email_gate(session, progress).await?,
                Step::DownloadPage => self.download_page(session, request, progress).await?,
                Step::Done(path) => return Ok(path),
            };
        }
    }

    /// Dismiss the cookie banner when one is up. A failed dismiss is
    /// logged and ignored; the flow can usually proceed underneath.
    /// The id check is a one-shot presence test, so the bounded wait
    /// runs at most once.
    async fn consent_check(
        &self,
        session: &mut dyn PageSession,
        progress: &mut dyn ProgressSink,
    ) -> DownloadResult<Step> {
        progress.report("Checking for cookie banner...");
        let bound = Duration::from_secs(self.download.consent_timeout_seconds);
        let by_id = Locator::css(&self.selectors.consent_button);
        let by_text = Locator::text(&self.selectors.confirm_scope, &self.selectors.consent_text);

        let button = if session.exists(&by_id).await? {
            by_id
        } else {
            by_text
        };

        if session.wait_for(&button, bound).await? {
            progress.report("Found cookie banner, accepting...");
            if let Err(err) = session.click(&button).await {
                warn!(error = %err, "cookie banner click failed, continuing");
            }
            tokio::time::sleep(Duration::from_millis(self.download.consent_pause_millis)).await;
        } else {
            debug!("no cookie banner present");
        }
        Ok(Step::DirectLinkProbe)
    }

    /// Some albums publish their free-download page straight in the
    /// embedded tralbum payload. Following it skips checkout entirely.
    async fn direct_link_probe(
        &self,
        session: &mut dyn PageSession,
        progress: &mut dyn ProgressSink,
    ) -> DownloadResult<Step> {
        progress.report("Checking for direct download link...");
        let value = session
            .eval(&tralbum_script(&self.selectors.tralbum_script))
            .await?;
        let free_page = value.as_str().map(str::to_string).filter(|s| !s.is_empty());

        match free_page {
            Some(link) => {
                progress.report("Found direct download link, skipping checkout...");
                info!(url = %link, "following direct free-download link");
                session.goto(&link).await?;
                Ok(Step::DownloadPage)
            }
            None => {
                progress.report("No direct link, going through the buy button...");
                Ok(Step::BuyButtonSearch)
            }
        }
    }

    async fn buy_button_search(
        &self,
        session: &mut dyn PageSession,
        progress: &mut dyn ProgressSink,
    ) -> DownloadResult<Step> {
        progress.report("Looking for the buy/download button...");
        let bound = Duration::from_secs(self.download.buy_button_timeout_seconds);

        let mut candidates = vec![Locator::css(&self.selectors.buy_button)];
        candidates.extend(
            self.selectors
                .buy_button_texts
                .iter()
                .map(|text| Locator::text("a, button, span", text)),
        );

        for candidate in &candidates {
            if session.wait_for(candidate, bound).await? {
                debug!(locator = %candidate, "buy button found");
                progress.report("Found buy/download button, clicking...");
                session.force_click(candidate).await?;
                return Ok(Step::PriceGate);
            }
        }

        progress.report("No download button found");
        Err(DownloadError::NoBuyButton)
    }

    /// Enter a zero price. Three ways out: the free-download link
    /// appears, the page asks for an email first, or the click landed
    /// straight on the download page (no price input at all).
    async fn price_gate(
        &self,
        session: &mut dyn PageSession,
        progress: &mut dyn ProgressSink,
    ) -> DownloadResult<Step> {
        progress.report("Waiting for the price input...");
        let price = Locator::css(&self.selectors.price_input);
        let price_bound = Duration::from_secs(self.download.price_input_timeout_seconds);
        if !session.wait_for(&price, price_bound).await? {
            debug!("no price input, assuming the download page came up directly");
            return Ok(Step::DownloadPage);
        }

        progress.report("Price input found, entering 0...");
        session.fill(&price, "0").await?;

        progress.report("Looking for the free download link...");
        let free_link = Locator::css(&self.selectors.free_download_link);
        let free_bound = Duration::from_secs(self.download.free_link_timeout_seconds);
        if session.wait_for(&free_link, free_bound).await? {
            progress.report("Found free download link, clicking...");
            session.force_click(&free_link).await?;
            progress.report("Waiting for the page to update...");
            session
                .settle(Duration::from_secs(self.download.settle_seconds))
                .await?;
            return Ok(Step::PostPriceBranch);
        }

        if session
            .exists(&Locator::css(&self.selectors.email_input))
            .await?
        {
            progress.report("Email address required before download...");
            return Ok(Step::EmailGate);
        }

        Err(DownloadError::FreeLinkNotFound)
    }

    /// Decide where the free-link click landed. The email check comes
    /// first: a page can sit on a download-ish URL and still demand an
    /// address before handing over the file.
    async fn post_price_branch(
        &self,
        session: &mut dyn PageSession,
        progress: &mut dyn ProgressSink,
    ) -> DownloadResult<Step> {
        let url = session.current_url().await?;
        progress.report(&format!("Current URL after click: {url}"));

        if session
            .exists(&Locator::css(&self.selectors.email_input))
            .await?
        {
            progress.report("Email form detected...");
            return Ok(Step::EmailGate);
        }
        if url.contains("download") {
            progress.report("Download page reached");
            return Ok(Step::DownloadPage);
        }
        Err(DownloadError::UnexpectedState { url })
    }

    async fn email_gate(
        &self,
        session: &mut dyn PageSession,
        progress: &mut dyn ProgressSink,
    ) -> DownloadResult<Step> {
        progress.report("Provisioning a disposable mailbox...");
        let account = self.mailbox.provision().await?;
        progress.report(&format!("Generated address: {}", account.address));

        session
            .fill(&Locator::css(&self.selectors.email_input), &account.address)
            .await?;

        let postal = Locator::css(&self.selectors.postal_input);
        let postal_bound = Duration::from_secs(self.download.postal_timeout_seconds);
        if session.wait_for(&postal, postal_bound).await? {
            progress.report("Filling postal code...");
            session.fill(&postal, &self.download.postal_code).await?;
        }

        let confirm = Locator::text(&self.selectors.confirm_scope, &self.selectors.confirm_text);
        let confirm_bound = Duration::from_secs(self.download.confirm_timeout_seconds);
        if !session.wait_for(&confirm, confirm_bound).await? {
            return Err(DownloadError::ConfirmControlNotFound);
        }
        progress.report("Submitting the email form...");
        session.force_click(&confirm).await?;

        progress.report("Waiting for the verification email...");
        let link = self
            .mailbox
            .poll_for_link(
                &account,
                self.mail.poll_max_attempts,
                Duration::from_secs(self.mail.poll_interval_seconds),
            )
            .await?;
        progress.report(&format!("Received download link: {link}"));

        session.goto(&link).await?;
        session
            .settle(Duration::from_secs(self.download.settle_seconds))
            .await?;
        Ok(Step::DownloadPage)
    }

    async fn download_page(
        &self,
        session: &mut dyn PageSession,
        request: &DownloadRequest,
        progress: &mut dyn ProgressSink,
    ) -> DownloadResult<Step> {
        progress.report("Waiting for the download page...");
        let selector = Locator::css(&self.selectors.format_selector);
        let format_bound = Duration::from_secs(self.download.format_timeout_seconds);
        if !session.wait_for(&selector, format_bound).await? {
            return Err(DownloadError::FormatSelectorTimeout(
                self.download.format_timeout_seconds,
            ));
        }

        self.choose_format(session, request, progress).await?;

        progress.report("Preparing download...");
        let trigger = Locator::text(
            &self.selectors.download_trigger_scope,
            &self.selectors.download_trigger_text,
        );
        let trigger_bound = Duration::from_secs(self.download.trigger_timeout_seconds);
        if !session.wait_for(&trigger, trigger_bound).await? {
            return Err(DownloadError::DownloadTriggerTimeout(
                self.download.trigger_timeout_seconds,
            ));
        }

        progress.report("Starting download...");
        let pending = session
            .begin_download(
                &trigger,
                &request.dir,
                Duration::from_secs(self.download.start_timeout_seconds),
            )
            .await
            .map_err(DownloadError::DownloadStart)?;

        progress.report("Saving file...");
        let path = session
            .finish_download(
                pending,
                Duration::from_secs(self.download.complete_timeout_seconds),
            )
            .await
            .map_err(DownloadError::Save)?;

        progress.report(&format!("Saved to: {}", path.display()));
        progress.report("Download complete!");
        Ok(Step::Done(path))
    }

    /// Pick the requested format, falling back to the configured
    /// default when the option is missing. Native `<select>` controls
    /// get a value change; custom dropdowns get opened and clicked.
    async fn choose_format(
        &self,
        session: &mut dyn PageSession,
        request: &DownloadRequest,
        progress: &mut dyn ProgressSink,
    ) -> DownloadResult<()> {
        let selector = Locator::css(&self.selectors.format_selector);
        let tag = session.tag_name(&selector).await?;

        if tag.as_deref() == Some("SELECT") {
            if !session.select_option(&selector, &request.format).await? {
                progress.report(&format!(
                    "Format {} unavailable, falling back to {}...",
                    request.format, self.download.fallback_format
                ));
                if !session
                    .select_option(&selector, &self.download.fallback_format)
                    .await?
                {
                    warn!(
                        fallback = %self.download.fallback_format,
                        "fallback format missing, keeping the preselected option"
                    );
                }
            }
        } else {
            session.click(&selector).await?;
            session
                .click(&Locator::text("li", &request.format))
                .await?;
        }

        progress.report(&format!("Selected format: {}", request.format));
        Ok(())
    }
}

fn tralbum_script(selector: &str) -> String {
    format!(
        r#"(() => {{
    const script = document.querySelector({selector});
    if (!script) return null;
    try {{
        const data = JSON.parse(script.getAttribute('data-tralbum') || '{{}}');
        return data.freeDownloadPage || null;
    }} catch (_) {{
        return null;
    }}
}})()"#,
        selector = crate::browser::js_string(selector),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_are_progress_sinks() {
        let mut lines = Vec::new();
        let mut sink = |message: &str| lines.push(message.to_string());
        {
            let sink: &mut dyn ProgressSink = &mut sink;
            sink.report("one");
            sink.report("two");
        }
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[test]
    fn tralbum_script_embeds_selector() {
        let script = tralbum_script("script[data-tralbum]");
        assert!(script.contains("\"script[data-tralbum]\""));
        assert!(script.contains("freeDownloadPage"));
    }
}
