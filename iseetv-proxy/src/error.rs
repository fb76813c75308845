pub use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    /// Upstream answered with a non-2xx status
    #[error("Upstream returned status {0}")]
    UpstreamStatus(StatusCode),

    #[error("Upstream request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid upstream URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to build HTTP client: {0}")]
    Build(String),
}

impl ProxyError {
    /// Status to forward to the client, when upstream gave one.
    #[must_use]
    pub fn upstream_status(&self) -> Option<StatusCode> {
        match self {
            Self::UpstreamStatus(status) => Some(*status),
            Self::Request(e) => e.status(),
            _ => None,
        }
    }
}

pub type ProxyResult<T> = Result<T, ProxyError>;
