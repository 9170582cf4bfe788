use std::fmt;

use thiserror::Error;

pub type MailResult<T> = Result<T, MailError>;

/// Which provisioning call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStage {
    FetchDomains,
    CreateAccount,
    IssueToken,
}

impl fmt::Display for ProvisionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProvisionStage::FetchDomains => "domain discovery",
            ProvisionStage::CreateAccount => "account creation",
            ProvisionStage::IssueToken => "token exchange",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail api request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("mail api returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("no mailbox domains available")]
    NoDomains,
    #[error("mailbox provisioning failed during {stage}: {source}")]
    Provisioning {
        stage: ProvisionStage,
        #[source]
        source: Box<MailError>,
    },
    #[error("invalid download link pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("no download link found in message body")]
    NoLinkFound,
    #[error("no verification email arrived after {attempts} polling attempts")]
    PollTimeout { attempts: usize },
}
