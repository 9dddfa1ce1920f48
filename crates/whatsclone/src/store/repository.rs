//! Repository for conversation and message persistence.

use anyhow::{Context, Result};

use super::models::{Conversation, NewMessage, OutboundRecord, StoredMessage};
use crate::db::Database;

const CONVERSATION_COLUMNS: &str =
    "id, name, phone, avatar, last_message, last_message_time, unread_count";

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, message, timestamp, is_from_me, message_type, synced, remote_key";

/// Local store backed by SQLite.
#[derive(Debug, Clone)]
pub struct LocalStore {
    db: Database,
}

impl LocalStore {
    /// Create a new store over an open database.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // ========== Write Operations ==========

    /// Append an inbound message and bump its conversation summary.
    ///
    /// The message row and the conversation upsert commit together. The
    /// conversation is created on its first message; afterwards only the
    /// summary fields change and `unread_count` grows by one.
    pub async fn record_inbound(&self, msg: &NewMessage) -> Result<(StoredMessage, Conversation)> {
        let mut tx = self.db.pool().begin().await.context("starting transaction")?;

        sqlx::query(
            r#"
            INSERT INTO conversations (id, name, phone, last_message, last_message_time, unread_count)
            VALUES (?, ?, ?, ?, ?, 1)
            ON CONFLICT(id) DO UPDATE SET
                last_message = CASE
                    WHEN excluded.last_message_time >= conversations.last_message_time
                    THEN excluded.last_message
                    ELSE conversations.last_message
                END,
                last_message_time = MAX(conversations.last_message_time, excluded.last_message_time),
                unread_count = conversations.unread_count + 1
            "#,
        )
        .bind(&msg.conversation_id)
        .bind(&msg.name)
        .bind(&msg.phone)
        .bind(&msg.body)
        .bind(msg.timestamp)
        .execute(&mut *tx)
        .await
        .context("upserting conversation")?;

        let id = insert_message(&mut tx, msg, false).await?;

        let message = sqlx::query_as::<_, StoredMessage>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?"
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .context("fetching inserted message")?;

        let conversation = sqlx::query_as::<_, Conversation>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?"
        ))
        .bind(&msg.conversation_id)
        .fetch_one(&mut *tx)
        .await
        .context("fetching conversation")?;

        tx.commit().await.context("committing inbound message")?;

        Ok((message, conversation))
    }

    /// Append an outbound message, creating its conversation if needed.
    ///
    /// An existing conversation is left untouched; callers follow up with
    /// [`LocalStore::update_last_message`].
    pub async fn record_outbound(&self, msg: &NewMessage) -> Result<OutboundRecord> {
        let mut tx = self.db.pool().begin().await.context("starting transaction")?;

        let existing: Option<String> =
            sqlx::query_scalar("SELECT id FROM conversations WHERE id = ?")
                .bind(&msg.conversation_id)
                .fetch_optional(&mut *tx)
                .await
                .context("checking conversation")?;

        let created_conversation = existing.is_none();
        if created_conversation {
            sqlx::query(
                r#"
                INSERT INTO conversations (id, name, phone, last_message, last_message_time, unread_count)
                VALUES (?, ?, ?, ?, ?, 0)
                "#,
            )
            .bind(&msg.conversation_id)
            .bind(&msg.name)
            .bind(&msg.phone)
            .bind(&msg.body)
            .bind(msg.timestamp)
            .execute(&mut *tx)
            .await
            .context("creating conversation")?;
        }

        let id = insert_message(&mut tx, msg, true).await?;

        let message = sqlx::query_as::<_, StoredMessage>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?"
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .context("fetching inserted message")?;

        tx.commit().await.context("committing outbound message")?;

        Ok(OutboundRecord {
            message,
            created_conversation,
        })
    }

    /// Overwrite a conversation's last message summary.
    ///
    /// A summary older than the stored one is ignored so `last_message_time`
    /// never goes backwards. Returns the conversation as stored afterwards, or
    /// `None` if it does not exist.
    pub async fn update_last_message(
        &self,
        conversation_id: &str,
        message: &str,
        timestamp: i64,
    ) -> Result<Option<Conversation>> {
        sqlx::query(
            r#"
            UPDATE conversations
            SET last_message = ?, last_message_time = ?
            WHERE id = ? AND last_message_time <= ?
            "#,
        )
        .bind(message)
        .bind(timestamp)
        .bind(conversation_id)
        .bind(timestamp)
        .execute(self.db.pool())
        .await
        .context("updating last message")?;

        self.get_conversation(conversation_id).await
    }

    /// Reset a conversation's unread counter. Returns false if it does not exist.
    pub async fn mark_read(&self, conversation_id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE conversations SET unread_count = 0 WHERE id = ?")
            .bind(conversation_id)
            .execute(self.db.pool())
            .await
            .context("marking conversation read")?;

        Ok(result.rows_affected() > 0)
    }

    /// Record the remote key a message was mirrored under.
    pub async fn set_remote_key(&self, message_id: i64, remote_key: &str) -> Result<()> {
        sqlx::query("UPDATE messages SET remote_key = ?, synced = TRUE WHERE id = ?")
            .bind(remote_key)
            .bind(message_id)
            .execute(self.db.pool())
            .await
            .context("recording remote key")?;
        Ok(())
    }

    // ========== Read Operations ==========

    /// Get a conversation by ID.
    pub async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        sqlx::query_as::<_, Conversation>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?"
        ))
        .bind(conversation_id)
        .fetch_optional(self.db.pool())
        .await
        .context("fetching conversation")
    }

    /// List conversations, most recently active first.
    pub async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        sqlx::query_as::<_, Conversation>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations ORDER BY last_message_time DESC, id ASC"
        ))
        .fetch_all(self.db.pool())
        .await
        .context("listing conversations")
    }

    /// List a conversation's messages, oldest first.
    pub async fn list_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        sqlx::query_as::<_, StoredMessage>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages
            WHERE conversation_id = ?
            ORDER BY timestamp ASC, id ASC
            "#
        ))
        .bind(conversation_id)
        .fetch_all(self.db.pool())
        .await
        .context("listing messages")
    }

    /// Get a message by its local ID.
    pub async fn get_message(&self, message_id: i64) -> Result<Option<StoredMessage>> {
        sqlx::query_as::<_, StoredMessage>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?"
        ))
        .bind(message_id)
        .fetch_optional(self.db.pool())
        .await
        .context("fetching message")
    }

    /// Count all stored messages.
    pub async fn count_messages(&self) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM messages")
            .fetch_one(self.db.pool())
            .await
            .context("counting messages")
    }
}

async fn insert_message(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    msg: &NewMessage,
    is_from_me: bool,
) -> Result<i64> {
    sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO messages (conversation_id, message, timestamp, is_from_me, message_type)
        VALUES (?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(&msg.conversation_id)
    .bind(&msg.body)
    .bind(msg.timestamp)
    .bind(is_from_me)
    .bind(&msg.message_type)
    .fetch_one(&mut **tx)
    .await
    .context("inserting message")
}
