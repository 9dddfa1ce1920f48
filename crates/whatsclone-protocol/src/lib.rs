//! Wire types for the whatsclone protocol bridge.
//!
//! The relay never speaks the WhatsApp protocol itself. A bridge process wraps a
//! WhatsApp client library and exchanges newline-delimited JSON with the relay:
//!
//! ```text
//! Relay --[stdin: commands]--> Bridge --[WhatsApp protocol]--> WhatsApp
//! Relay <--[stdout: events]--- Bridge
//! ```
//!
//! Every line is one JSON object tagged by its `type` field. Commands carry an
//! `id` that the bridge echoes back in a `response` line; everything else the
//! bridge writes is an event.

pub mod commands;
pub mod events;
pub mod messages;

pub use commands::BridgeCommand;
pub use events::{BridgeEvent, BridgeLine, BridgeResponse, LOGGED_OUT_STATUS};
pub use messages::{MessageKey, MessageShape, WireMessage, phone_from_jid};

/// Environment variable the bridge reads its credential directory from.
pub const AUTH_DIR_ENV: &str = "WHATSCLONE_AUTH_DIR";
