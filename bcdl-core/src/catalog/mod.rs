mod classify;
mod scanner;

pub use classify::{classify, PurchaseSignals};
pub use scanner::{
    CatalogScanner, ScanCanceller, ScanError, ScanHandle, ScanOutcome, ScanReport, ScanResult,
};

use std::fmt;

use serde::{Deserialize, Serialize};

/// How an album can be acquired, as shown on its own page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlbumStatus {
    Free,
    #[serde(rename = "nyp")]
    NameYourPrice,
    Paid,
    Unavailable,
}

impl fmt::Display for AlbumStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AlbumStatus::Free => "free",
            AlbumStatus::NameYourPrice => "nyp",
            AlbumStatus::Paid => "paid",
            AlbumStatus::Unavailable => "unavailable",
        };
        f.write_str(label)
    }
}

impl AlbumStatus {
    /// Whether the checkout flow can fetch this album without paying.
    pub fn is_downloadable(&self) -> bool {
        matches!(self, AlbumStatus::Free | AlbumStatus::NameYourPrice)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Album {
    pub title: String,
    pub artist: String,
    pub cover_url: String,
    pub url: String,
    pub status: AlbumStatus,
    pub price_text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_to_short_labels() {
        let encoded = serde_json::to_string(&AlbumStatus::NameYourPrice).expect("serialize");
        assert_eq!(encoded, "\"nyp\"");
        let decoded: AlbumStatus = serde_json::from_str("\"unavailable\"").expect("deserialize");
        assert_eq!(decoded, AlbumStatus::Unavailable);
    }

    #[test]
    fn downloadable_statuses() {
        assert!(AlbumStatus::Free.is_downloadable());
        assert!(AlbumStatus::NameYourPrice.is_downloadable());
        assert!(!AlbumStatus::Paid.is_downloadable());
        assert!(!AlbumStatus::Unavailable.is_downloadable());
    }
}
