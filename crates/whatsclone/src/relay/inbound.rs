//! Inbound message path.

use tracing::{debug, info, warn};
use whatsclone_protocol::{MessageShape, WireMessage, phone_from_jid};

use super::{Relay, RelayResult};
use crate::store::NewMessage;

/// What happened to an inbound protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Persisted locally; `remote_key` is set when the mirror write succeeded.
    Stored {
        message_id: i64,
        conversation_id: String,
        remote_key: Option<String>,
    },
    /// Dropped without side effects.
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Sent by the paired account itself.
    FromMe,
    /// A message kind the relay does not carry.
    Unsupported(String),
    /// No text body.
    Empty,
}

impl Relay {
    /// Persist an inbound message, then mirror it.
    ///
    /// The message row and the conversation summary are committed locally in
    /// one transaction before any remote write. Remote failures are logged
    /// and do not fail the call.
    pub async fn handle_inbound(&self, wire: &WireMessage) -> RelayResult<InboundOutcome> {
        if wire.key.from_me {
            debug!(jid = %wire.key.remote_jid, "Skipping self-sent message");
            return Ok(InboundOutcome::Ignored(IgnoreReason::FromMe));
        }

        let text = match wire.shape() {
            MessageShape::Conversation(text) | MessageShape::ExtendedText(text) => text,
            MessageShape::Unsupported(kind) => {
                debug!(jid = %wire.key.remote_jid, kind = %kind, "Skipping unsupported message");
                return Ok(InboundOutcome::Ignored(IgnoreReason::Unsupported(kind)));
            }
            MessageShape::Empty => {
                debug!(jid = %wire.key.remote_jid, "Skipping message without text");
                return Ok(InboundOutcome::Ignored(IgnoreReason::Empty));
            }
        };

        let conversation_id = wire.key.remote_jid.clone();
        let phone = phone_from_jid(&conversation_id).to_string();
        let name = wire
            .push_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| phone.clone());
        let timestamp = wire.timestamp_millis().unwrap_or_else(crate::now_millis);

        let _guard = self.locks.lock(&conversation_id).await;

        let (message, conversation) = self
            .store
            .record_inbound(&NewMessage::text(
                &conversation_id,
                name,
                phone,
                text,
                timestamp,
            ))
            .await?;

        info!(
            conversation_id = %conversation_id,
            message_id = message.id,
            unread = conversation.unread_count,
            "Stored inbound message"
        );

        let remote_key = self.mirror_new_message(&message).await;

        if let Err(e) = self.sync.mirror_conversation(&conversation).await {
            warn!(conversation_id = %conversation_id, "Failed to mirror conversation: {}", e);
        }

        Ok(InboundOutcome::Stored {
            message_id: message.id,
            conversation_id,
            remote_key,
        })
    }

    /// Handle a batch in delivery order. Local failures are logged and the
    /// rest of the batch still runs.
    pub async fn handle_inbound_batch(&self, messages: &[WireMessage]) -> Vec<InboundOutcome> {
        let mut outcomes = Vec::with_capacity(messages.len());
        for wire in messages {
            match self.handle_inbound(wire).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(jid = %wire.key.remote_jid, "Failed to handle inbound message: {}", e),
            }
        }
        outcomes
    }
}
