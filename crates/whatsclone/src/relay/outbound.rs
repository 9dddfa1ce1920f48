//! Outbound sends and read receipts.

use tracing::{info, warn};
use whatsclone_protocol::phone_from_jid;

use super::{Relay, RelayError, RelayResult};
use crate::store::{NewMessage, StoredMessage};

impl Relay {
    /// Send `text` to a conversation through the open session.
    ///
    /// Nothing is persisted unless the protocol accepted the message. The
    /// conversation is created if this is its first message; an existing
    /// conversation keeps its unread count.
    pub async fn send_message(&self, conversation_id: &str, text: &str) -> RelayResult<StoredMessage> {
        let session = self.session().await.ok_or(RelayError::NotConnected)?;

        session.send_text(conversation_id, text).await?;
        let timestamp = crate::now_millis();

        let _guard = self.locks.lock(conversation_id).await;

        let phone = phone_from_jid(conversation_id);
        let record = self
            .store
            .record_outbound(&NewMessage::text(conversation_id, phone, phone, text, timestamp))
            .await?;

        info!(
            conversation_id = %conversation_id,
            message_id = record.message.id,
            "Sent message"
        );

        self.mirror_new_message(&record.message).await;

        let conversation = self
            .store
            .update_last_message(conversation_id, text, timestamp)
            .await?;

        if let Some(conversation) = conversation {
            let mirrored = if record.created_conversation {
                self.sync.mirror_conversation(&conversation).await
            } else {
                self.sync
                    .update_last_message(
                        conversation_id,
                        &conversation.last_message,
                        conversation.last_message_time,
                    )
                    .await
            };
            if let Err(e) = mirrored {
                warn!(conversation_id = %conversation_id, "Failed to mirror conversation: {}", e);
            }
        }

        Ok(record.message)
    }

    /// Reset a conversation's unread count locally and remotely.
    ///
    /// Returns false when the conversation does not exist, in which case
    /// nothing is written remotely.
    pub async fn mark_as_read(&self, conversation_id: &str) -> RelayResult<bool> {
        let _guard = self.locks.lock(conversation_id).await;

        if !self.store.mark_read(conversation_id).await? {
            info!(conversation_id = %conversation_id, "Mark-read for unknown conversation");
            return Ok(false);
        }

        if let Err(e) = self.sync.reset_unread(conversation_id).await {
            warn!(conversation_id = %conversation_id, "Failed to mirror read state: {}", e);
        }
        Ok(true)
    }
}
