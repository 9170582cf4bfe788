mod driver;
mod error;
mod session;

pub(crate) use driver::js_string;
pub use driver::{Locator, PageSession, PageSessionFactory, PendingDownload};
pub use error::{BrowserError, BrowserResult};
pub use session::{
    BrowserHandle, BrowserLauncher, BrowserPageSession, BrowserSessionFactory, LaunchOverrides,
};
