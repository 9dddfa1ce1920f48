//! SQLite database holding the relay's local conversation history.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Schema for the local store.
const SCHEMA: &str = r#"
-- One row per counterpart, created with its first message
CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    phone TEXT NOT NULL,
    avatar TEXT,
    last_message TEXT NOT NULL DEFAULT '',
    last_message_time INTEGER NOT NULL DEFAULT 0,
    unread_count INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_conversations_last_message_time
    ON conversations(last_message_time);

-- Append-only message log
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id TEXT NOT NULL REFERENCES conversations(id),
    message TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    is_from_me BOOLEAN NOT NULL,
    message_type TEXT NOT NULL DEFAULT 'text',
    synced BOOLEAN NOT NULL DEFAULT FALSE,
    remote_key TEXT
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation
    ON messages(conversation_id, timestamp);
"#;

/// Database connection pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open the database at `path`, creating it and its parent directory if needed.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory: {}", parent.display()))?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .context("parsing database URL")?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("connecting to database: {}", path.display()))?;

        let db = Self { pool };
        db.initialize_schema().await?;

        Ok(db)
    }

    /// Create an in-memory database (for testing).
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("parsing in-memory database URL")?
            .foreign_keys(true);

        // A single connection: every new in-memory connection is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("connecting to in-memory database")?;

        let db = Self { pool };
        db.initialize_schema().await?;

        Ok(db)
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .context("initializing database schema")?;
        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Check if the database is healthy.
    pub async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_and_reopen() {
        let temp = TempDir::new().unwrap();
        let db_path = temp.path().join("nested").join("whatsapp_local.db");

        let db = Database::new(&db_path).await.unwrap();
        assert!(db.is_healthy().await);
        assert!(db_path.exists());
        db.close().await;

        // Schema creation is idempotent
        let db = Database::new(&db_path).await.unwrap();
        assert!(db.is_healthy().await);
    }

    #[tokio::test]
    async fn test_in_memory() {
        let db = Database::in_memory().await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversations")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
