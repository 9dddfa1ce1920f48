//! Relay error types.

use thiserror::Error;

use crate::bridge::BridgeError;
use crate::remote::RemoteError;

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

/// Errors surfaced by relay operations.
#[derive(Debug, Error)]
pub enum RelayError {
    /// No open protocol session.
    #[error("WhatsApp não conectado")]
    NotConnected,

    /// The local store failed. Nothing was mirrored.
    #[error("local persistence failed: {0:#}")]
    LocalPersistence(#[from] anyhow::Error),

    /// The remote channel failed.
    #[error("remote sync failed: {0}")]
    RemoteSync(#[from] RemoteError),

    /// The protocol refused or failed to send.
    #[error("protocol send failed: {0}")]
    ProtocolSend(#[from] BridgeError),

    /// A command is missing required fields.
    #[error("invalid command: {0}")]
    InvalidCommand(String),
}
