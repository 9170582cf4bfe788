use thiserror::Error;

use crate::browser::BrowserError;
use crate::mail::MailError;

pub type DownloadResult<T> = Result<T, DownloadError>;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
    #[error("no buy or download control found on the album page")]
    NoBuyButton,
    #[error("free download link did not appear after submitting a zero price")]
    FreeLinkNotFound,
    #[error("confirmation control missing on the email form")]
    ConfirmControlNotFound,
    #[error("checkout stalled on an unrecognized page: {url}")]
    UnexpectedState { url: String },
    #[error("email verification failed: {0}")]
    Mail(#[from] MailError),
    #[error("format selector did not appear within {0}s")]
    FormatSelectorTimeout(u64),
    #[error("download trigger did not appear within {0}s")]
    DownloadTriggerTimeout(u64),
    #[error("download failed to start: {0}")]
    DownloadStart(#[source] BrowserError),
    #[error("failed to save the artifact: {0}")]
    Save(#[source] BrowserError),
}
