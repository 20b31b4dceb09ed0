use thiserror::Error;

pub type BrowserResult<T> = Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("chromium launch failed: {0}")]
    Launch(String),
    #[error("cdp error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timeout waiting for {0}")]
    Timeout(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("session state error: {0}")]
    Session(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("telemetry error: {0}")]
    Telemetry(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl BrowserError {
    /// Failures worth another navigation attempt after a backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            BrowserError::Timeout(_) | BrowserError::RateLimited(_) => true,
            BrowserError::Cdp(err) => err.to_string().to_lowercase().contains("timeout"),
            _ => false,
        }
    }
}

impl From<tokio::task::JoinError> for BrowserError {
    fn from(err: tokio::task::JoinError) -> Self {
        BrowserError::Unexpected(err.to_string())
    }
}
