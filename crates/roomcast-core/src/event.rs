//! Room events flowing between sessions.
//!
//! Every broadcast on the bus is an [`Envelope`] carrying the publishing
//! connection's identity and one of the [`RoomEvent`] variants. Sessions
//! match exhaustively on the variant, so adding an event is a compile-time
//! change across every handler.

use crate::connection::ConnectionId;

/// An event published to a room channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    /// A user joined the room.
    Joined {
        /// Display name of the user who joined.
        user: String,
    },
    /// A user left the room.
    Left {
        /// Display name of the user who left.
        user: String,
    },
    /// A chat message sent to the room.
    Message {
        /// Room the message claims to belong to, used for persistence lookup.
        room_name: String,
        /// Display name of the sender.
        sender: String,
        /// Message body text.
        body: String,
    },
}

/// A room event together with its publishing connection.
///
/// The origin lets a session distinguish its own join/leave ripple from a
/// peer's: the joining session is acknowledged directly at connect time and
/// must not double-handle its own broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Connection that published the event.
    pub origin: ConnectionId,
    /// The event itself.
    pub event: RoomEvent,
}

impl Envelope {
    /// Create a new envelope.
    #[must_use]
    pub fn new(origin: ConnectionId, event: RoomEvent) -> Self {
        Self { origin, event }
    }

    /// Check whether this envelope was published by the given connection.
    #[must_use]
    pub fn is_from(&self, connection_id: &ConnectionId) -> bool {
        &self.origin == connection_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_origin() {
        let me = ConnectionId::new("conn-1");
        let peer = ConnectionId::new("conn-2");

        let envelope = Envelope::new(
            me.clone(),
            RoomEvent::Joined {
                user: "Alice".into(),
            },
        );

        assert!(envelope.is_from(&me));
        assert!(!envelope.is_from(&peer));
    }
}
