//! Protocol bridge client.
//!
//! The WhatsApp protocol itself runs in a sidecar process that speaks
//! newline-delimited JSON on stdin/stdout. This module spawns it and exposes
//! the session as a send capability plus an ordered event stream.

mod error;
mod process;
mod traits;

pub use error::{BridgeError, BridgeResult};
pub use process::{ProcessConnector, ProcessConnectorConfig, ProcessSession};
pub use traits::{ProtocolConnection, ProtocolConnector, ProtocolSession};
