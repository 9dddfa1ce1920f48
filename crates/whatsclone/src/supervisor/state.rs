//! Connection state shared with the HTTP API.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;

/// Where the protocol session is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    /// Waiting for the pairing challenge to be scanned.
    Pairing { qr: String },
    Open {
        #[serde(skip_serializing_if = "Option::is_none")]
        user: Option<Value>,
    },
    Closing,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

/// Current state plus when it was entered (epoch milliseconds).
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    #[serde(flatten)]
    pub state: ConnectionState,
    pub since: i64,
}

/// Latest connection state, observable by any number of readers.
#[derive(Debug, Clone)]
pub struct StatusBoard {
    tx: Arc<watch::Sender<StatusSnapshot>>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(StatusSnapshot {
            state: ConnectionState::Disconnected,
            since: crate::now_millis(),
        });
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, state: ConnectionState) {
        self.tx.send_replace(StatusSnapshot {
            state,
            since: crate::now_millis(),
        });
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.tx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.tx.borrow().state.is_open()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_board_transitions() {
        let board = StatusBoard::new();
        assert!(!board.is_connected());

        board.set(ConnectionState::Pairing { qr: "2@abc".to_string() });
        assert!(!board.is_connected());

        board.set(ConnectionState::Open { user: None });
        assert!(board.is_connected());
        assert_eq!(board.snapshot().state, ConnectionState::Open { user: None });
    }

    #[test]
    fn test_snapshot_serialization() {
        let board = StatusBoard::new();
        board.set(ConnectionState::Pairing { qr: "x".to_string() });
        let json = serde_json::to_value(board.snapshot()).unwrap();
        assert_eq!(json["state"], "pairing");
        assert_eq!(json["qr"], "x");
        assert!(json["since"].is_i64());
    }
}
