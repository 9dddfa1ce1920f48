//! WhatsApp relay library.
//!
//! Provides the components of the relay process: local SQLite store, remote
//! sync channel, message relay, connection supervisor, protocol bridge client
//! and the HTTP status API.

pub mod api;
pub mod bridge;
pub mod db;
pub mod relay;
pub mod remote;
pub mod store;
pub mod supervisor;

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
