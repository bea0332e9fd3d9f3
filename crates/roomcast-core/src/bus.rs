//! Per-room publish/subscribe fan-out.
//!
//! Each room maps to a broadcast channel plus the set of subscribed
//! connection IDs. Publishing delivers to every current subscriber,
//! including the publisher, in publish order per room. A slow or departed
//! subscriber never fails the publisher.

use crate::connection::ConnectionId;
use crate::event::Envelope;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Default per-room broadcast capacity.
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Bus configuration.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Broadcast capacity of each room channel.
    pub channel_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// A single room's fan-out state.
struct RoomChannel {
    sender: broadcast::Sender<Arc<Envelope>>,
    subscribers: HashSet<ConnectionId>,
}

impl RoomChannel {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            subscribers: HashSet::new(),
        }
    }
}

/// The group broadcast bus.
///
/// Room channels are created on first subscribe and removed eagerly when
/// the last subscriber leaves. This is the seam where a multi-process
/// fan-out layer would plug in.
pub struct Bus {
    rooms: DashMap<String, RoomChannel>,
    config: BusConfig,
}

impl Bus {
    /// Create a bus with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    /// Create a bus with custom configuration.
    #[must_use]
    pub fn with_config(config: BusConfig) -> Self {
        Self {
            rooms: DashMap::new(),
            config,
        }
    }

    /// Subscribe a connection to a room channel.
    ///
    /// Returns a receiver for events published to the room. Idempotent:
    /// re-subscribing never errors, it hands back a fresh receiver and
    /// leaves the subscriber set unchanged.
    pub fn subscribe(
        &self,
        room: &str,
        connection_id: &ConnectionId,
    ) -> broadcast::Receiver<Arc<Envelope>> {
        let mut entry = self
            .rooms
            .entry(room.to_string())
            .or_insert_with(|| {
                debug!(room = %room, "Creating room channel");
                RoomChannel::new(self.config.channel_capacity)
            });

        entry.subscribers.insert(connection_id.clone());
        debug!(
            room = %room,
            connection = %connection_id,
            subscribers = entry.subscribers.len(),
            "Subscribed"
        );

        entry.sender.subscribe()
    }

    /// Unsubscribe a connection from a room channel.
    ///
    /// No-op if the connection was never subscribed. Removes the channel
    /// when the last subscriber leaves.
    pub fn unsubscribe(&self, room: &str, connection_id: &ConnectionId) {
        if let Some(mut entry) = self.rooms.get_mut(room) {
            if entry.subscribers.remove(connection_id) {
                debug!(
                    room = %room,
                    connection = %connection_id,
                    subscribers = entry.subscribers.len(),
                    "Unsubscribed"
                );
            }
        }
        // Atomic check-and-remove: dropping the channel while a racing
        // subscribe holds a fresh receiver would close that receiver.
        if self
            .rooms
            .remove_if(room, |_, entry| entry.subscribers.is_empty())
            .is_some()
        {
            debug!(room = %room, "Removed empty room channel");
        }
    }

    /// Publish an event to every current subscriber of a room.
    ///
    /// Returns the number of receivers the event was handed to. Delivery
    /// to each subscriber is independent: a closed receiver is simply
    /// dropped and never surfaces as a publish error.
    pub fn publish(&self, room: &str, envelope: Envelope) -> usize {
        if let Some(entry) = self.rooms.get(room) {
            let count = entry.sender.send(Arc::new(envelope)).unwrap_or_default();
            trace!(room = %room, recipients = count, "Published event");
            count
        } else {
            trace!(room = %room, "Publish to room with no subscribers");
            0
        }
    }

    /// Check if a room channel exists.
    #[must_use]
    pub fn room_exists(&self, room: &str) -> bool {
        self.rooms.contains_key(room)
    }

    /// Number of connections subscribed to a room.
    #[must_use]
    pub fn subscriber_count(&self, room: &str) -> usize {
        self.rooms
            .get(room)
            .map(|e| e.subscribers.len())
            .unwrap_or(0)
    }

    /// Number of live room channels.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}
