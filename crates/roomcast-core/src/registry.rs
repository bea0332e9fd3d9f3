//! Room presence tracking.
//!
//! The registry maps each room name to the set of display names currently
//! present. Entries are created on first join and removed eagerly when the
//! last member leaves, so a room appears in the registry if and only if it
//! has at least one member.
//!
//! All reads return snapshots; no caller ever holds a live reference into a
//! member set.

use dashmap::DashMap;
use std::collections::HashSet;
use tracing::debug;

/// Process-wide registry of room membership.
///
/// Membership is keyed by display name, matching what presence counts and
/// member lists expose to clients: two simultaneous connections sharing a
/// display name collapse to one entry. Per-connection bookkeeping lives in
/// the bus subscriber table, not here.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: DashMap<String, HashSet<String>>,
}

impl RoomRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `user` to `room`, creating the room entry if absent.
    ///
    /// Idempotent per (room, user) pair.
    pub fn join(&self, room: &str, user: &str) {
        let mut members = self.rooms.entry(room.to_string()).or_default();
        if members.insert(user.to_string()) {
            debug!(room = %room, user = %user, count = members.len(), "Member joined");
        }
    }

    /// Remove `user` from `room`.
    ///
    /// Deletes the room entry when the set becomes empty. No-op if the user
    /// was never a member.
    pub fn leave(&self, room: &str, user: &str) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            if members.remove(user) {
                debug!(room = %room, user = %user, count = members.len(), "Member left");
            }
        }
        // Atomic check-and-remove: a join racing in between the removal
        // above and this call keeps the entry alive.
        if self
            .rooms
            .remove_if(room, |_, members| members.is_empty())
            .is_some()
        {
            debug!(room = %room, "Removed empty room entry");
        }
    }

    /// Number of members currently in `room`; 0 for an unknown room.
    #[must_use]
    pub fn count(&self, room: &str) -> usize {
        self.rooms.get(room).map(|m| m.len()).unwrap_or(0)
    }

    /// Snapshot of the members currently in `room`, sorted for stable
    /// presentation; empty for an unknown room.
    #[must_use]
    pub fn members(&self, room: &str) -> Vec<String> {
        let mut members: Vec<String> = self
            .rooms
            .get(room)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    /// Check if a room currently has any members.
    #[must_use]
    pub fn contains(&self, room: &str) -> bool {
        self.rooms.contains_key(room)
    }

    /// Number of rooms with at least one member.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
