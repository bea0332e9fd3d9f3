//! In-memory message store.
//!
//! Honors the same contract as the SQLite store, including the global
//! content-based dedup. Used by tests and by ephemeral deployments that do
//! not care about durability.

use crate::{MessageStore, StoreError, StoredMessage};
use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct Inner {
    rooms: HashSet<String>,
    messages: Vec<(String, StoredMessage)>,
}

/// Message store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn ensure_room(&self, name: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.rooms.insert(name.to_string());
        Ok(())
    }

    async fn room_exists(&self, name: &str) -> Result<bool, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.rooms.contains(name))
    }

    async fn message_exists(&self, body: &str) -> Result<bool, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.messages.iter().any(|(_, m)| m.message == body))
    }

    async fn persist(&self, room: &str, sender: &str, body: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.rooms.contains(room) {
            return Err(StoreError::UnknownRoom(room.to_string()));
        }
        if inner.messages.iter().any(|(_, m)| m.message == body) {
            return Ok(false);
        }
        inner.messages.push((
            room.to_string(),
            StoredMessage {
                sender: sender.to_string(),
                message: body.to_string(),
            },
        ));
        Ok(true)
    }

    async fn list_messages(&self, room: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let inner = self.inner.lock().await;
        if !inner.rooms.contains(room) {
            return Err(StoreError::UnknownRoom(room.to_string()));
        }
        Ok(inner
            .messages
            .iter()
            .filter(|(r, _)| r == room)
            .map(|(_, m)| m.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_contract_matches_sqlite_store() {
        let store = MemoryStore::new();

        store.ensure_room("lobby").await.unwrap();
        store.ensure_room("lobby").await.unwrap();
        assert!(store.room_exists("lobby").await.unwrap());

        assert!(store.persist("lobby", "Alice", "hi").await.unwrap());
        assert!(!store.persist("lobby", "Bob", "hi").await.unwrap());
        assert!(store.message_exists("hi").await.unwrap());

        let messages = store.list_messages("lobby").await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender, "Alice");

        assert!(matches!(
            store.persist("ghost", "Alice", "yo").await,
            Err(StoreError::UnknownRoom(_))
        ));
    }
}
