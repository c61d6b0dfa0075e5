use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),
}

/// Failure classes for the external issue fetch. Only `Timeout`, `Network`,
/// and server-side `Response` statuses qualify for the single retry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("sync configuration error: {0}")]
    Configuration(String),
    #[error("jira request timed out after {0}s")]
    Timeout(u64),
    #[error("network error during jira request: {0}")]
    Network(String),
    #[error("jira response error: http {status}: {message}")]
    Response { status: u16, message: String },
    #[error("jira rejected the credentials: http {0}")]
    Auth(u16),
}

impl SyncError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Network(_) => true,
            Self::Response { status, .. } => *status >= 500,
            Self::Configuration(_) | Self::Auth(_) => false,
        }
    }
}
