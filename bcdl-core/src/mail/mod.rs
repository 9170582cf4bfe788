mod error;

pub use error::{MailError, MailResult, ProvisionStage};

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::MailSection;

/// A freshly provisioned throwaway mailbox.
#[derive(Debug, Clone)]
pub struct TempMailAccount {
    pub address: String,
    pub password: String,
    pub token: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Sender {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageSummary {
    pub id: String,
    pub from: Sender,
    #[serde(default)]
    pub subject: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageBody {
    #[serde(default)]
    pub html: Vec<String>,
    #[serde(default)]
    pub text: String,
}

/// Hydra-style collection envelope the mail API wraps lists in.
#[derive(Debug, Deserialize)]
struct Collection<T> {
    #[serde(rename = "hydra:member", default)]
    members: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct DomainEntry {
    domain: String,
}

#[derive(Debug, Serialize)]
struct Credentials<'a> {
    address: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenEnvelope {
    token: String,
}

/// Client for a mail.tm style disposable-mailbox API: provision an
/// account, poll its inbox, and pull the verification link out of the
/// first relevant message.
pub struct TempMailClient {
    http: reqwest::Client,
    config: MailSection,
    link_pattern: Regex,
}

impl TempMailClient {
    pub fn new(config: MailSection) -> MailResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;
        let link_pattern = Regex::new(&format!(
            r#"https?://[^"'\s<>]*{host}{path}[^"'\s<>]*"#,
            host = regex::escape(&config.link_host),
            path = regex::escape(&config.link_path),
        ))?;
        Ok(Self {
            http,
            config,
            link_pattern,
        })
    }

    /// Create a new mailbox: pick a domain, register an address on it,
    /// exchange the credentials for a bearer token.
    pub async fn provision(&self) -> MailResult<TempMailAccount> {
        let domain = self
            .fetch_domain()
            .await
            .map_err(|err| provisioning(ProvisionStage::FetchDomains, err))?;

        let created_at = Utc::now();
        let address = format!("user{}@{}", created_at.timestamp_micros(), domain);
        let password = generate_password();

        self.create_account(&address, &password)
            .await
            .map_err(|err| provisioning(ProvisionStage::CreateAccount, err))?;
        let token = self
            .issue_token(&address, &password)
            .await
            .map_err(|err| provisioning(ProvisionStage::IssueToken, err))?;

        debug!(address = %address, "provisioned disposable mailbox");
        Ok(TempMailAccount {
            address,
            password,
            token,
            created_at,
        })
    }

    async fn fetch_domain(&self) -> MailResult<String> {
        let response = self
            .http
            .get(format!("{}/domains", self.config.base_url))
            .send()
            .await?;
        let response = check_status(response, StatusCode::OK).await?;
        let page: Collection<DomainEntry> = response.json().await?;
        page.members
            .into_iter()
            .next()
            .map(|entry| entry.domain)
            .ok_or(MailError::NoDomains)
    }

    async fn create_account(&self, address: &str, password: &str) -> MailResult<()> {
        let response = self
            .http
            .post(format!("{}/accounts", self.config.base_url))
            .json(&Credentials { address, password })
            .send()
            .await?;
        check_status(response, StatusCode::CREATED).await?;
        Ok(())
    }

    async fn issue_token(&self, address: &str, password: &str) -> MailResult<String> {
        let response = self
            .http
            .post(format!("{}/token", self.config.base_url))
            .json(&Credentials { address, password })
            .send()
            .await?;
        let response = check_status(response, StatusCode::OK).await?;
        let envelope: TokenEnvelope = response.json().await?;
        Ok(envelope.token)
    }

    pub async fn list_messages(
        &self,
        account: &TempMailAccount,
    ) -> MailResult<Vec<MessageSummary>> {
        let response = self
            .http
            .get(format!("{}/messages", self.config.base_url))
            .bearer_auth(&account.token)
            .send()
            .await?;
        let response = check_status(response, StatusCode::OK).await?;
        let page: Collection<MessageSummary> = response.json().await?;
        Ok(page.members)
    }

    pub async fn read_message(
        &self,
        account: &TempMailAccount,
        id: &str,
    ) -> MailResult<MessageBody> {
        let response = self
            .http
            .get(format!("{}/messages/{}", self.config.base_url, id))
            .bearer_auth(&account.token)
            .send()
            .await?;
        let response = check_status(response, StatusCode::OK).await?;
        Ok(response.json().await?)
    }

    /// Whether a message plausibly carries the verification link:
    /// sender address on the store's domain, sender name mentioning
    /// the store, or a download-ish subject.
    pub fn is_relevant(&self, message: &MessageSummary) -> bool {
        let address = message.from.address.to_lowercase();
        let name = message.from.name.to_lowercase();
        let subject = message.subject.to_lowercase();
        address.contains(&self.config.sender_domain.to_lowercase())
            || name.contains(&self.config.sender_name_term.to_lowercase())
            || subject.contains(&self.config.subject_term.to_lowercase())
    }

    /// First download URL in the body, trailing quote/bracket noise
    /// stripped. Mail bodies embed links inside attributes, so a match
    /// often drags a closing quote along.
    pub fn extract_download_link(&self, body: &str) -> MailResult<String> {
        self.link_pattern
            .find(body)
            .map(|hit| {
                hit.as_str()
                    .trim_end_matches(['"', '\'', '<', '>'])
                    .to_string()
            })
            .ok_or(MailError::NoLinkFound)
    }

    /// Poll the inbox until a relevant message yields a download link.
    /// Sleeps `interval` between attempts but not after the last one.
    pub async fn poll_for_link(
        &self,
        account: &TempMailAccount,
        max_attempts: usize,
        interval: Duration,
    ) -> MailResult<String> {
        for attempt in 1..=max_attempts {
            debug!(attempt, max_attempts, "polling inbox");
            match self.list_messages(account).await {
                Ok(messages) => {
                    for message in &messages {
                        if !self.is_relevant(message) {
                            continue;
                        }
                        debug!(
                            from = %message.from.address,
                            subject = %message.subject,
                            "relevant message found"
                        );
                        match self.link_from_message(account, &message.id).await {
                            Ok(link) => return Ok(link),
                            Err(err) => {
                                warn!(id = %message.id, error = %err, "no link in message, skipping");
                            }
                        }
                    }
                }
                Err(err) => warn!(error = %err, "inbox fetch failed"),
            }
            if attempt < max_attempts && !interval.is_zero() {
                tokio::time::sleep(interval).await;
            }
        }
        Err(MailError::PollTimeout {
            attempts: max_attempts,
        })
    }

    async fn link_from_message(&self, account: &TempMailAccount, id: &str) -> MailResult<String> {
        let body = self.read_message(account, id).await?;
        if let Some(html) = body.html.first() {
            if let Ok(link) = self.extract_download_link(html) {
                return Ok(link);
            }
        }
        self.extract_download_link(&body.text)
    }
}

fn provisioning(stage: ProvisionStage, source: MailError) -> MailError {
    MailError::Provisioning {
        stage,
        source: Box::new(source),
    }
}

async fn check_status(
    response: reqwest::Response,
    expected: StatusCode,
) -> MailResult<reqwest::Response> {
    if response.status() == expected {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(MailError::Api { status, body })
}

fn generate_password() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    format!("Bc{suffix}!")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> TempMailClient {
        TempMailClient::new(MailSection::default()).expect("client should build")
    }

    fn message(address: &str, name: &str, subject: &str) -> MessageSummary {
        MessageSummary {
            id: "m1".into(),
            from: Sender {
                address: address.into(),
                name: name.into(),
            },
            subject: subject.into(),
        }
    }

    #[test]
    fn link_extraction_stops_at_attribute_quote() {
        let body = r#"<a href="https://bandcamp.com/download?id=123&amp;sig=abc">get it</a>"#;
        let link = client().extract_download_link(body).expect("link");
        assert_eq!(link, "https://bandcamp.com/download?id=123&amp;sig=abc");
    }

    #[test]
    fn link_extraction_matches_subdomain_hosts() {
        let body = "fetch from https://p4.bcbits.bandcamp.com/download/album?x=1 today";
        let link = client().extract_download_link(body).expect("link");
        assert_eq!(link, "https://p4.bcbits.bandcamp.com/download/album?x=1");
    }

    #[test]
    fn missing_link_reports_no_link_found() {
        let err = client()
            .extract_download_link("nothing to see here")
            .expect_err("no link expected");
        assert!(matches!(err, MailError::NoLinkFound));
    }

    #[test]
    fn relevance_accepts_any_single_signal() {
        let c = client();
        assert!(c.is_relevant(&message("noreply@bandcamp.com", "", "hi")));
        assert!(c.is_relevant(&message("x@other.com", "Bandcamp", "hi")));
        assert!(c.is_relevant(&message("x@other.com", "", "Your download is ready")));
    }

    #[test]
    fn relevance_rejects_unrelated_mail() {
        let c = client();
        assert!(!c.is_relevant(&message("promo@shop.example", "Shop", "Weekly deals")));
    }

    #[test]
    fn generated_passwords_differ() {
        let a = generate_password();
        let b = generate_password();
        assert_ne!(a, b);
        assert!(a.starts_with("Bc") && a.ends_with('!'));
    }
}
