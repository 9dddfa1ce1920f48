//! Typed view of the remote tree used by the relay and supervisor.

use serde_json::{Value, json};
use std::sync::Arc;

use super::traits::{ChildSubscription, RemoteChannel};
use super::{RemoteResult, paths, server_timestamp};
use crate::store::{Conversation, StoredMessage};

/// Connection status record, overwritten on every transition.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub should_reconnect: Option<bool>,
    pub user: Option<Value>,
}

impl ConnectionStatus {
    pub fn open(user: Option<Value>) -> Self {
        Self {
            connected: true,
            should_reconnect: None,
            user,
        }
    }

    pub fn closed(should_reconnect: bool) -> Self {
        Self {
            connected: false,
            should_reconnect: Some(should_reconnect),
            user: None,
        }
    }

    fn to_payload(&self) -> Value {
        let mut payload = json!({
            "connected": self.connected,
            "timestamp": server_timestamp(),
        });
        if let Some(should_reconnect) = self.should_reconnect {
            payload["shouldReconnect"] = json!(should_reconnect);
        }
        if let Some(user) = &self.user {
            payload["user"] = user.clone();
        }
        payload
    }
}

/// Remote mirror of conversations, messages, connection state and commands.
#[derive(Clone)]
pub struct SyncChannel {
    remote: Arc<dyn RemoteChannel>,
}

impl std::fmt::Debug for SyncChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncChannel")
            .field("backend", &self.remote.name())
            .finish()
    }
}

impl SyncChannel {
    pub fn new(remote: Arc<dyn RemoteChannel>) -> Self {
        Self { remote }
    }

    pub fn remote(&self) -> &Arc<dyn RemoteChannel> {
        &self.remote
    }

    // ========== Conversations ==========

    /// Append a message under its conversation. Returns the new push key.
    pub async fn mirror_message(&self, msg: &StoredMessage) -> RemoteResult<String> {
        self.remote
            .push(
                &paths::conversation_messages(&msg.conversation_id),
                message_payload(msg),
            )
            .await
    }

    /// Overwrite a message at the key it was first mirrored under.
    pub async fn rewrite_message(&self, msg: &StoredMessage, key: &str) -> RemoteResult<()> {
        self.remote
            .set(
                &paths::conversation_message(&msg.conversation_id, key),
                message_payload(msg),
            )
            .await
    }

    /// Overwrite a conversation summary.
    pub async fn mirror_conversation(&self, conversation: &Conversation) -> RemoteResult<()> {
        self.remote
            .set(
                &paths::conversation_info(&conversation.id),
                conversation_payload(conversation),
            )
            .await
    }

    /// Merge a new last message into a summary, leaving the unread count alone.
    pub async fn update_last_message(
        &self,
        conversation_id: &str,
        message: &str,
        timestamp: i64,
    ) -> RemoteResult<()> {
        self.remote
            .update(
                &paths::conversation_info(conversation_id),
                json!({
                    "lastMessage": message,
                    "lastMessageTime": timestamp,
                    "syncedAt": server_timestamp(),
                }),
            )
            .await
    }

    pub async fn reset_unread(&self, conversation_id: &str) -> RemoteResult<()> {
        self.remote
            .update(
                &paths::conversation_info(conversation_id),
                json!({
                    "unreadCount": 0,
                    "syncedAt": server_timestamp(),
                }),
            )
            .await
    }

    // ========== Connection ==========

    pub async fn publish_status(&self, status: &ConnectionStatus) -> RemoteResult<()> {
        self.remote
            .set(paths::CONNECTION_STATUS, status.to_payload())
            .await
    }

    /// Publish a pairing challenge, replacing any previous one.
    pub async fn publish_qr(&self, qr: &str) -> RemoteResult<()> {
        self.remote
            .set(
                paths::CONNECTION_QR,
                json!({ "qr": qr, "timestamp": crate::now_millis() }),
            )
            .await
    }

    pub async fn clear_qr(&self) -> RemoteResult<()> {
        self.remote.remove(paths::CONNECTION_QR).await
    }

    // ========== Commands ==========

    /// Subscribe to commands arriving in `inbox`.
    pub async fn subscribe_commands(&self, inbox: &str) -> RemoteResult<ChildSubscription> {
        self.remote.subscribe_children(inbox).await
    }

    /// Take ownership of a command before acting on it.
    pub async fn claim_command(&self, inbox: &str, key: &str) -> RemoteResult<()> {
        self.remote
            .update(
                &paths::child(inbox, key),
                json!({
                    "status": "processing",
                    "claimedAt": server_timestamp(),
                }),
            )
            .await
    }

    pub async fn mark_command_processed(&self, inbox: &str, key: &str) -> RemoteResult<()> {
        self.remote
            .update(
                &paths::child(inbox, key),
                json!({
                    "status": "processed",
                    "processedAt": server_timestamp(),
                }),
            )
            .await
    }

    pub async fn mark_command_failed(&self, inbox: &str, key: &str, error: &str) -> RemoteResult<()> {
        self.remote
            .update(
                &paths::child(inbox, key),
                json!({
                    "status": "error",
                    "error": error,
                    "processedAt": server_timestamp(),
                }),
            )
            .await
    }

    pub async fn remove_command(&self, inbox: &str, key: &str) -> RemoteResult<()> {
        self.remote.remove(&paths::child(inbox, key)).await
    }
}

fn message_payload(msg: &StoredMessage) -> Value {
    json!({
        "id": format!("msg_{}", msg.id),
        "message": msg.message,
        "timestamp": msg.timestamp,
        "isFromMe": msg.is_from_me,
        "messageType": msg.message_type,
        "syncedAt": server_timestamp(),
    })
}

fn conversation_payload(conversation: &Conversation) -> Value {
    let mut payload = json!({
        "id": conversation.id,
        "name": conversation.name,
        "phone": conversation.phone,
        "lastMessage": conversation.last_message,
        "lastMessageTime": conversation.last_message_time,
        "unreadCount": conversation.unread_count,
        "syncedAt": server_timestamp(),
    });
    if let Some(avatar) = &conversation.avatar {
        payload["avatar"] = json!(avatar);
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryChannel;

    fn channel() -> (MemoryChannel, SyncChannel) {
        let memory = MemoryChannel::new();
        let sync = SyncChannel::new(Arc::new(memory.clone()));
        (memory, sync)
    }

    fn conversation() -> Conversation {
        Conversation {
            id: "5511999@s.whatsapp.net".to_string(),
            name: "Ana".to_string(),
            phone: "5511999".to_string(),
            avatar: None,
            last_message: "oi".to_string(),
            last_message_time: 1000,
            unread_count: 2,
        }
    }

    #[tokio::test]
    async fn test_conversation_payload() {
        let (memory, sync) = channel();
        sync.mirror_conversation(&conversation()).await.unwrap();

        let info = memory
            .get("conversations/5511999@s,whatsapp,net/info")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(info["id"], "5511999@s.whatsapp.net");
        assert_eq!(info["unreadCount"], 2);
        assert_eq!(info["lastMessageTime"], 1000);
        assert!(info["syncedAt"].is_i64());
        assert!(info.get("avatar").is_none());
    }

    #[tokio::test]
    async fn test_update_last_message_keeps_unread() {
        let (memory, sync) = channel();
        sync.mirror_conversation(&conversation()).await.unwrap();
        sync.update_last_message("5511999@s.whatsapp.net", "tchau", 2000)
            .await
            .unwrap();

        let info = memory
            .get("conversations/5511999@s,whatsapp,net/info")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(info["lastMessage"], "tchau");
        assert_eq!(info["unreadCount"], 2);
        assert_eq!(info["name"], "Ana");
    }

    #[tokio::test]
    async fn test_reset_unread_stamps_sync_time() {
        let (memory, sync) = channel();
        sync.mirror_conversation(&conversation()).await.unwrap();
        sync.reset_unread("5511999@s.whatsapp.net").await.unwrap();

        let info = memory
            .get("conversations/5511999@s,whatsapp,net/info")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(info["unreadCount"], 0);
        assert!(info["syncedAt"].is_i64());
        assert_eq!(info["lastMessage"], "oi");
    }

    #[tokio::test]
    async fn test_claim_command() {
        let (memory, sync) = channel();
        let key = memory
            .push(paths::SEND_COMMANDS, json!({"conversationId": "a@proto", "message": "oi"}))
            .await
            .unwrap();
        sync.claim_command(paths::SEND_COMMANDS, &key).await.unwrap();

        let command = memory
            .get(&paths::child(paths::SEND_COMMANDS, &key))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(command["status"], "processing");
        assert_eq!(command["message"], "oi");
    }

    #[tokio::test]
    async fn test_status_and_qr() {
        let (memory, sync) = channel();
        sync.publish_qr("data:image/svg+xml;base64,AAAA").await.unwrap();
        sync.publish_status(&ConnectionStatus::closed(true)).await.unwrap();

        let status = memory.get(paths::CONNECTION_STATUS).await.unwrap().unwrap();
        assert_eq!(status["connected"], false);
        assert_eq!(status["shouldReconnect"], true);

        sync.publish_status(&ConnectionStatus::open(None)).await.unwrap();
        let status = memory.get(paths::CONNECTION_STATUS).await.unwrap().unwrap();
        assert_eq!(status["connected"], true);
        assert!(status.get("shouldReconnect").is_none());

        sync.clear_qr().await.unwrap();
        assert!(memory.get(paths::CONNECTION_QR).await.unwrap().is_none());
    }
}
