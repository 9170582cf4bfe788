use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::error::BrowserResult;

/// How a page element is addressed: a plain CSS selector, or a
/// case-insensitive text match over every element a scope selector
/// yields. Text matches resolve to the deepest matching node, so
/// `Text { scope: "button", text: "OK" }` picks the button itself and
/// not an ancestor that merely contains it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Css(String),
    Text { scope: String, text: String },
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    pub fn text(scope: impl Into<String>, text: impl Into<String>) -> Self {
        Locator::Text {
            scope: scope.into(),
            text: text.into(),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(selector) => f.write_str(selector),
            Locator::Text { scope, text } => write!(f, "\"{text}\" within {scope}"),
        }
    }
}

/// A download that has started but may still be in flight.
#[derive(Debug)]
pub struct PendingDownload {
    pub dir: PathBuf,
    /// Name the transfer started under, partial suffix stripped.
    pub file_name: String,
    /// Entries already in the directory before the trigger click. The
    /// finished artifact is whichever settled file is not in here.
    pub baseline: HashSet<String>,
}

/// One browser tab, driven step by step. Implementations own the tab
/// and release it on `close`.
#[async_trait(?Send)]
pub trait PageSession {
    async fn goto(&mut self, url: &str) -> BrowserResult<()>;

    /// Wait until the document settles (ready state complete), bounded.
    /// Never fails on a slow page; the bound just expires.
    async fn settle(&mut self, bound: Duration) -> BrowserResult<()>;

    /// Poll until the locator resolves to a visible element. Returns
    /// `false` when the timeout expires without a match.
    async fn wait_for(&mut self, locator: &Locator, timeout: Duration) -> BrowserResult<bool>;

    /// One-shot presence probe, visibility not required.
    async fn exists(&mut self, locator: &Locator) -> BrowserResult<bool>;

    async fn click(&mut self, locator: &Locator) -> BrowserResult<()>;

    /// Dispatch a click from script, bypassing hit testing. Used where
    /// overlays or scroll position make a devtools click flaky.
    async fn force_click(&mut self, locator: &Locator) -> BrowserResult<()>;

    /// Set an input's value and fire input/change events.
    async fn fill(&mut self, locator: &Locator, value: &str) -> BrowserResult<()>;

    async fn eval(&mut self, script: &str) -> BrowserResult<Value>;

    async fn current_url(&mut self) -> BrowserResult<String>;

    /// Upper-case tag name of the matched element, `None` when absent.
    async fn tag_name(&mut self, locator: &Locator) -> BrowserResult<Option<String>>;

    /// Select a `<select>` option by value or visible text. Returns
    /// `false` when no option matches.
    async fn select_option(&mut self, locator: &Locator, value: &str) -> BrowserResult<bool>;

    /// Point the browser's download capture at `dir`, click the
    /// trigger, and wait until a new directory entry appears.
    async fn begin_download(
        &mut self,
        trigger: &Locator,
        dir: &Path,
        timeout: Duration,
    ) -> BrowserResult<PendingDownload>;

    /// Wait until the pending transfer finishes and return the final
    /// artifact path.
    async fn finish_download(
        &mut self,
        pending: PendingDownload,
        timeout: Duration,
    ) -> BrowserResult<PathBuf>;

    async fn close(&mut self) -> BrowserResult<()>;
}

#[async_trait(?Send)]
pub trait PageSessionFactory: Send + Sync {
    async fn create(&self) -> BrowserResult<Box<dyn PageSession>>;
}

/// Quote a string as a JS string literal for script interpolation.
pub(crate) fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locator_display() {
        assert_eq!(Locator::css("ol#music-grid").to_string(), "ol#music-grid");
        assert_eq!(
            Locator::text("button", "OK").to_string(),
            "\"OK\" within button"
        );
    }

    #[test]
    fn js_string_escapes_quotes() {
        assert_eq!(js_string("a\"b"), "\"a\\\"b\"");
        assert_eq!(js_string("plain"), "\"plain\"");
    }
}
