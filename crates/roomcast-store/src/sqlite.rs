//! SQLite-backed message store.

use crate::{MessageStore, StoreError, StoredMessage};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::{debug, info};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS rooms (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    room_name TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    room_id INTEGER NOT NULL REFERENCES rooms(id),
    sender TEXT NOT NULL,
    body TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
";

/// Message store backed by a SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` and apply the
    /// schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        let store = Self::with_pool(pool);
        store.migrate().await?;
        info!(url = %url, "Opened sqlite message store");
        Ok(store)
    }

    /// Wrap an existing pool without touching the schema.
    #[must_use]
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Apply the schema. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if a schema statement fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn ensure_room(&self, name: &str) -> Result<(), StoreError> {
        let result = sqlx::query("INSERT OR IGNORE INTO rooms (room_name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() > 0 {
            debug!(room = %name, "Created room");
        }
        Ok(())
    }

    async fn room_exists(&self, name: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM rooms WHERE room_name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn message_exists(&self, body: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM messages WHERE body = ? LIMIT 1")
            .bind(body)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn persist(&self, room: &str, sender: &str, body: &str) -> Result<bool, StoreError> {
        let room_id: Option<(i64,)> = sqlx::query_as("SELECT id FROM rooms WHERE room_name = ?")
            .bind(room)
            .fetch_optional(&self.pool)
            .await?;
        let Some((room_id,)) = room_id else {
            return Err(StoreError::UnknownRoom(room.to_string()));
        };

        // Check-then-insert, not atomic: two concurrent identical bodies
        // can both pass the existence check.
        if self.message_exists(body).await? {
            debug!(room = %room, "Duplicate message body, skipping insert");
            return Ok(false);
        }

        sqlx::query("INSERT INTO messages (room_id, sender, body) VALUES (?, ?, ?)")
            .bind(room_id)
            .bind(sender)
            .bind(body)
            .execute(&self.pool)
            .await?;

        Ok(true)
    }

    async fn list_messages(&self, room: &str) -> Result<Vec<StoredMessage>, StoreError> {
        if !self.room_exists(room).await? {
            return Err(StoreError::UnknownRoom(room.to_string()));
        }

        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT m.sender, m.body FROM messages m \
             JOIN rooms r ON r.id = m.room_id \
             WHERE r.room_name = ? ORDER BY m.id",
        )
        .bind(room)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(sender, message)| StoredMessage { sender, message })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteStore::with_pool(pool);
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_ensure_room_is_idempotent() {
        let store = memory_store().await;

        store.ensure_room("lobby").await.unwrap();
        store.ensure_room("lobby").await.unwrap();

        assert!(store.room_exists("lobby").await.unwrap());
        assert!(!store.room_exists("den").await.unwrap());
    }

    #[tokio::test]
    async fn test_persist_and_list() {
        let store = memory_store().await;
        store.ensure_room("lobby").await.unwrap();

        assert!(store.persist("lobby", "Alice", "hi").await.unwrap());
        assert!(store.persist("lobby", "Bob", "hello").await.unwrap());

        let messages = store.list_messages("lobby").await.unwrap();
        assert_eq!(
            messages,
            vec![
                StoredMessage {
                    sender: "Alice".into(),
                    message: "hi".into()
                },
                StoredMessage {
                    sender: "Bob".into(),
                    message: "hello".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_duplicate_body_is_not_inserted() {
        let store = memory_store().await;
        store.ensure_room("lobby").await.unwrap();

        assert!(store.persist("lobby", "Alice", "hi").await.unwrap());
        assert!(!store.persist("lobby", "Bob", "hi").await.unwrap());

        assert_eq!(store.list_messages("lobby").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dedup_is_global_across_rooms() {
        let store = memory_store().await;
        store.ensure_room("lobby").await.unwrap();
        store.ensure_room("den").await.unwrap();

        assert!(store.persist("lobby", "Alice", "hi").await.unwrap());
        assert!(!store.persist("den", "Bob", "hi").await.unwrap());

        assert!(store.list_messages("den").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persist_to_unknown_room_fails() {
        let store = memory_store().await;

        let err = store.persist("ghost", "Alice", "hi").await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownRoom(room) if room == "ghost"));
    }

    #[tokio::test]
    async fn test_list_unknown_room_fails() {
        let store = memory_store().await;

        let err = store.list_messages("ghost").await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownRoom(_)));
    }
}
