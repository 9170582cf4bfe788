use serde::Deserialize;

use super::AlbumStatus;

/// Text snapshot of the purchase affordances on an album page. Both
/// fields arrive lowercased from the extraction script; `header_text`
/// is `None` when the page has no purchase section at all.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PurchaseSignals {
    pub header_text: Option<String>,
    pub buy_button_text: Option<String>,
}

/// Decide how an album can be acquired. The header wins over the
/// nested button, and "name your price" wins over "free download"
/// when a header carries both. A page without a purchase header is
/// unavailable, never paid.
pub fn classify(signals: &PurchaseSignals) -> AlbumStatus {
    let Some(header) = signals.header_text.as_deref() else {
        return AlbumStatus::Unavailable;
    };

    let header = header.to_lowercase();
    if header.contains("name your price") {
        return AlbumStatus::NameYourPrice;
    }
    if header.contains("free download") {
        return AlbumStatus::Free;
    }

    if let Some(button) = signals.buy_button_text.as_deref() {
        let button = button.to_lowercase();
        if button.contains("name your price") {
            return AlbumStatus::NameYourPrice;
        }
        if button.contains("free") {
            return AlbumStatus::Free;
        }
    }

    AlbumStatus::Paid
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals(header: Option<&str>, button: Option<&str>) -> PurchaseSignals {
        PurchaseSignals {
            header_text: header.map(str::to_string),
            buy_button_text: button.map(str::to_string),
        }
    }

    #[test]
    fn name_your_price_beats_free_in_header() {
        let status = classify(&signals(
            Some("name your price free download"),
            Some("Free Download"),
        ));
        assert_eq!(status, AlbumStatus::NameYourPrice);
    }

    #[test]
    fn free_download_header() {
        let status = classify(&signals(Some("Free Download"), None));
        assert_eq!(status, AlbumStatus::Free);
    }

    #[test]
    fn button_text_consulted_when_header_is_neutral() {
        assert_eq!(
            classify(&signals(Some("buy digital album"), Some("Name Your Price"))),
            AlbumStatus::NameYourPrice
        );
        assert_eq!(
            classify(&signals(Some("buy digital album"), Some("free"))),
            AlbumStatus::Free
        );
    }

    #[test]
    fn plain_purchase_page_is_paid() {
        let status = classify(&signals(Some("buy digital album $7 usd"), Some("buy now")));
        assert_eq!(status, AlbumStatus::Paid);
    }

    #[test]
    fn header_without_keywords_or_button_is_paid() {
        assert_eq!(classify(&signals(Some("digital album"), None)), AlbumStatus::Paid);
    }

    #[test]
    fn missing_header_is_unavailable_even_with_button() {
        assert_eq!(
            classify(&signals(None, Some("free download"))),
            AlbumStatus::Unavailable
        );
    }

    #[test]
    fn matching_ignores_case() {
        assert_eq!(
            classify(&signals(Some("NAME YOUR PRICE"), None)),
            AlbumStatus::NameYourPrice
        );
        assert_eq!(
            classify(&signals(Some("FREE DOWNLOAD"), None)),
            AlbumStatus::Free
        );
    }
}
