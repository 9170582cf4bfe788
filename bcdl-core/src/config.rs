use std::path::Path;

use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// Top-level configuration. Every section falls back to built-in
/// defaults, so a partial file (or no file at all) is usable.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BcdlConfig {
    pub chromium: ChromiumSection,
    pub session: SessionSection,
    pub selectors: SelectorSection,
    pub scan: ScanSection,
    pub mail: MailSection,
    pub download: DownloadSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChromiumSection {
    pub executable_path: Option<String>,
    pub headless: bool,
    pub sandbox: bool,
    pub extra_args: Vec<String>,
    pub request_timeout_seconds: Option<u64>,
}

impl Default for ChromiumSection {
    fn default() -> Self {
        Self {
            executable_path: None,
            headless: true,
            sandbox: false,
            extra_args: vec!["--disable-dev-shm-usage".into(), "--disable-gpu".into()],
            request_timeout_seconds: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub user_agent: String,
    pub accept_language: Option<String>,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                         AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .into(),
            accept_language: Some("en-US,en;q=0.9".into()),
        }
    }
}

/// CSS selectors and match texts for the storefront markup. Kept in
/// config so a markup change does not require a new binary.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SelectorSection {
    pub consent_button: String,
    pub consent_text: String,
    pub tralbum_script: String,
    pub buy_button: String,
    pub buy_button_texts: Vec<String>,
    pub price_input: String,
    pub free_download_link: String,
    pub email_input: String,
    pub postal_input: String,
    pub confirm_scope: String,
    pub confirm_text: String,
    pub format_selector: String,
    pub download_trigger_scope: String,
    pub download_trigger_text: String,
    pub music_grid: String,
    pub grid_item: String,
    pub grid_item_title: String,
    pub grid_item_artist: String,
    pub grid_item_price: String,
    pub cover_lazy_attr: String,
    pub purchase_header: String,
    pub purchase_button: String,
}

impl Default for SelectorSection {
    fn default() -> Self {
        Self {
            consent_button: "#onetrust-accept-btn-handler".into(),
            consent_text: "Accept all".into(),
            tralbum_script: "script[data-tralbum]".into(),
            buy_button: "h4.ft.compound-button .download-link".into(),
            buy_button_texts: vec!["Buy Digital Album".into(), "name your price".into()],
            price_input: "input#userPrice".into(),
            free_download_link: "a.download-panel-free-download-link".into(),
            email_input: "input#fan_email_address".into(),
            postal_input: "input[name='postcode'], input.postcode".into(),
            confirm_scope: "button".into(),
            confirm_text: "OK".into(),
            format_selector: "#format-type, .format-type, .formats".into(),
            download_trigger_scope: ".download-item-container a".into(),
            download_trigger_text: "Download".into(),
            music_grid: "ol#music-grid".into(),
            grid_item: "li.music-grid-item".into(),
            grid_item_title: ".title".into(),
            grid_item_artist: ".artist".into(),
            grid_item_price: ".price".into(),
            cover_lazy_attr: "data-original".into(),
            purchase_header: "h4.ft.compound-button".into(),
            purchase_button: "button.download-link".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanSection {
    pub grid_timeout_seconds: u64,
    /// Extra attempts for an album page that fails to load or read.
    /// 0 means a failing page is immediately marked unavailable.
    pub detail_nav_retries: u32,
}

impl Default for ScanSection {
    fn default() -> Self {
        Self {
            grid_timeout_seconds: 10,
            detail_nav_retries: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MailSection {
    pub base_url: String,
    pub request_timeout_seconds: u64,
    pub poll_max_attempts: usize,
    pub poll_interval_seconds: u64,
    pub link_host: String,
    pub link_path: String,
    pub sender_domain: String,
    pub sender_name_term: String,
    pub subject_term: String,
}

impl Default for MailSection {
    fn default() -> Self {
        Self {
            base_url: "https://api.mail.tm".into(),
            request_timeout_seconds: 30,
            poll_max_attempts: 24,
            poll_interval_seconds: 5,
            link_host: "bandcamp.com".into(),
            link_path: "/download".into(),
            sender_domain: "bandcamp.com".into(),
            sender_name_term: "bandcamp".into(),
            subject_term: "download".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadSection {
    pub consent_timeout_seconds: u64,
    pub consent_pause_millis: u64,
    pub buy_button_timeout_seconds: u64,
    pub price_input_timeout_seconds: u64,
    pub free_link_timeout_seconds: u64,
    pub postal_timeout_seconds: u64,
    pub confirm_timeout_seconds: u64,
    pub format_timeout_seconds: u64,
    pub trigger_timeout_seconds: u64,
    pub start_timeout_seconds: u64,
    pub complete_timeout_seconds: u64,
    pub settle_seconds: u64,
    pub postal_code: String,
    pub fallback_format: String,
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            consent_timeout_seconds: 5,
            consent_pause_millis: 1000,
            buy_button_timeout_seconds: 3,
            price_input_timeout_seconds: 5,
            free_link_timeout_seconds: 5,
            postal_timeout_seconds: 3,
            confirm_timeout_seconds: 5,
            format_timeout_seconds: 20,
            trigger_timeout_seconds: 60,
            start_timeout_seconds: 30,
            complete_timeout_seconds: 900,
            settle_seconds: 2,
            postal_code: "10001".into(),
            fallback_format: "mp3-320".into(),
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<BcdlConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    let config: BcdlConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })?;
    validate(&config).map_err(|reason| ConfigError::Invalid {
        path: path.to_path_buf(),
        reason,
    })?;
    Ok(config)
}

fn validate(config: &BcdlConfig) -> std::result::Result<(), String> {
    if config.mail.poll_max_attempts == 0 {
        return Err("mail.poll_max_attempts must be at least 1".into());
    }
    if config.download.fallback_format.is_empty() {
        return Err("download.fallback_format must not be empty".into());
    }
    Ok(())
}
