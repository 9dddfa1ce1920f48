//! Local store data models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Message type recorded for plain text bodies.
pub const TEXT_MESSAGE: &str = "text";

/// Conversation summary, one per counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Full routing address of the counterpart.
    pub id: String,
    pub name: String,
    pub phone: String,
    pub avatar: Option<String>,
    pub last_message: String,
    /// Epoch milliseconds. Never decreases.
    pub last_message_time: i64,
    pub unread_count: i64,
}

/// A persisted message row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    /// Local sequence number.
    pub id: i64,
    pub conversation_id: String,
    pub message: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub is_from_me: bool,
    pub message_type: String,
    pub synced: bool,
    /// Push key the message was mirrored under, once known.
    pub remote_key: Option<String>,
}

impl StoredMessage {
    pub fn direction(&self) -> Direction {
        if self.is_from_me {
            Direction::Outbound
        } else {
            Direction::Inbound
        }
    }
}

/// Which side of the conversation produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn is_from_me(self) -> bool {
        matches!(self, Self::Outbound)
    }
}

/// A message about to be appended.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: String,
    /// Display name used if the conversation has to be created.
    pub name: String,
    pub phone: String,
    pub body: String,
    pub timestamp: i64,
    pub message_type: String,
}

impl NewMessage {
    /// A text message for `conversation_id`.
    pub fn text(
        conversation_id: impl Into<String>,
        name: impl Into<String>,
        phone: impl Into<String>,
        body: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            name: name.into(),
            phone: phone.into(),
            body: body.into(),
            timestamp,
            message_type: TEXT_MESSAGE.to_string(),
        }
    }
}

/// Result of persisting an outbound message.
#[derive(Debug, Clone)]
pub struct OutboundRecord {
    pub message: StoredMessage,
    /// Set when the conversation did not exist before this message.
    pub created_conversation: bool,
}
