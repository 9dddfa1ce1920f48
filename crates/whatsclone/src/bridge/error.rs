//! Bridge error types.

use thiserror::Error;

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors talking to the protocol bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The bridge process could not be started.
    #[error("failed to start bridge `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Filesystem or pipe error.
    #[error("bridge I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Command could not be encoded.
    #[error("failed to encode bridge command: {0}")]
    Encode(#[from] serde_json::Error),

    /// The bridge answered with an error.
    #[error("bridge rejected command: {0}")]
    Rejected(String),

    /// The bridge process went away.
    #[error("bridge channel closed")]
    ChannelClosed,

    /// No response within the request timeout.
    #[error("timed out waiting for bridge response")]
    Timeout,
}
