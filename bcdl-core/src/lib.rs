pub mod browser;
pub mod catalog;
pub mod config;
pub mod download;
pub mod error;
pub mod mail;

pub use browser::{
    BrowserError, BrowserHandle, BrowserLauncher, BrowserPageSession, BrowserResult,
    BrowserSessionFactory, LaunchOverrides, Locator, PageSession, PageSessionFactory,
    PendingDownload,
};
pub use catalog::{
    classify, Album, AlbumStatus, CatalogScanner, PurchaseSignals, ScanCanceller, ScanError,
    ScanHandle, ScanOutcome, ScanReport, ScanResult,
};
pub use config::{
    load_config, BcdlConfig, ChromiumSection, DownloadSection, MailSection, ScanSection,
    SelectorSection, SessionSection,
};
pub use download::{
    DownloadError, DownloadFlow, DownloadRequest, DownloadResult, ProgressSink,
    VerificationMailbox,
};
pub use error::{ConfigError, Result};
pub use mail::{
    MailError, MailResult, MessageBody, MessageSummary, ProvisionStage, Sender, TempMailAccount,
    TempMailClient,
};
