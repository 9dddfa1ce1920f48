//! Remote channel error types.

use thiserror::Error;

/// Result type for remote channel operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors that can occur talking to the remote store.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server rejected the request.
    #[error("remote returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Path is empty or contains forbidden characters.
    #[error("invalid remote path: {0}")]
    InvalidPath(String),

    /// Failed to parse a response or stream payload.
    #[error("failed to parse remote payload: {0}")]
    Parse(String),

    /// The child event stream failed or ended.
    #[error("remote stream closed: {0}")]
    StreamClosed(String),

    /// The server cancelled the listener (rules or auth revoked).
    #[error("remote listener cancelled: {0}")]
    Cancelled(String),
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
