//! # roomcast-store
//!
//! Durable record of rooms and messages.
//!
//! The [`MessageStore`] trait is the seam between the chat core and
//! persistence: sessions and the CRUD endpoints only ever talk to the
//! trait. Two implementations are provided:
//!
//! - [`SqliteStore`] - the production store, backed by sqlx/SQLite
//! - [`MemoryStore`] - same contract in memory, for tests and
//!   ephemeral runs

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The referenced room does not exist in the store.
    #[error("Unknown room: {0}")]
    UnknownRoom(String),

    /// The backing storage failed.
    #[error("Store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
}

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Display name of the sender.
    pub sender: String,
    /// Message body text.
    pub message: String,
}

/// Durable room and message storage.
///
/// Message persistence is deduplicated by body text, globally across
/// rooms: `persist` inserts only if `message_exists(body)` is false at
/// call time. The check and the insert are deliberately not atomic;
/// duplicate suppression is a nicety, not a correctness guarantee.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Create the room if it does not exist. Idempotent: an existing room
    /// is a no-op success.
    async fn ensure_room(&self, name: &str) -> Result<(), StoreError>;

    /// Check whether a room exists.
    async fn room_exists(&self, name: &str) -> Result<bool, StoreError>;

    /// Check whether any message with this exact body text exists, in any
    /// room.
    async fn message_exists(&self, body: &str) -> Result<bool, StoreError>;

    /// Insert a message unless one with the same body already exists.
    ///
    /// Returns `true` if a row was written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownRoom`] if the room has not been
    /// created.
    async fn persist(&self, room: &str, sender: &str, body: &str) -> Result<bool, StoreError>;

    /// Fetch a room's messages in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownRoom`] if the room has not been
    /// created.
    async fn list_messages(&self, room: &str) -> Result<Vec<StoredMessage>, StoreError>;
}
