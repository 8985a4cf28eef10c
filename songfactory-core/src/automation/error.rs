use thiserror::Error;

pub type AutomationResult<T> = Result<T, AutomationError>;

#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("chromium launch failed: {0}")]
    Launch(String),
    #[error("cdp error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("network error: {0}")]
    Network(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("no selector for '{group}' matched the page")]
    ElementNotFound { group: String },
    #[error("timeout waiting for {0}")]
    Timeout(String),
    #[error("cancelled while {0}")]
    Cancelled(String),
    #[error("authentication error: {0}")]
    Auth(String),
    #[error("unexpected page state: {0}")]
    PageState(String),
    #[error("profile error: {0}")]
    Profile(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AutomationError {
    /// Whether repeating the failed operation could plausibly succeed.
    /// Configuration mistakes, auth failures, expired long waits and
    /// cancellations never become true by trying again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AutomationError::Cdp(_)
                | AutomationError::Io(_)
                | AutomationError::Http(_)
                | AutomationError::Network(_)
                | AutomationError::ElementNotFound { .. }
                | AutomationError::Unexpected(_)
        )
    }

    /// Whether this error invalidates the whole run, not just the current
    /// job. Without a session there is nothing left to process.
    pub fn aborts_run(&self) -> bool {
        matches!(
            self,
            AutomationError::Auth(_) | AutomationError::Cancelled(_)
        )
    }
}

impl From<tokio::task::JoinError> for AutomationError {
    fn from(err: tokio::task::JoinError) -> Self {
        AutomationError::Unexpected(err.to_string())
    }
}
