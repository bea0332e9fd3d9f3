//! Frame types for the roomcast chat protocol.
//!
//! Everything on the wire is a JSON object. Clients send [`Inbound`]
//! frames; the server replies with [`Outbound`] frames. The two presence
//! notifications carry a `"type"` tag; the chat frame is recognized by its
//! `"message"` envelope and carries no tag, matching the shapes clients
//! already speak.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame was not valid JSON or did not match the expected shape.
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// An inbound chat frame (client → server).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inbound {
    /// Room the message is addressed to.
    pub room_name: String,
    /// Display name of the sender.
    pub sender: String,
    /// Message body text.
    pub message: String,
}

impl Inbound {
    /// Decode an inbound frame from a JSON text payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] if the payload is not a JSON
    /// object of the expected shape.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Body of an outbound chat frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatBody {
    /// Display name of the sender.
    pub sender: String,
    /// Message body text.
    pub message: String,
}

/// A presence notification (server → client).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PresenceUpdate {
    /// A user joined the room.
    UserJoined {
        /// The user who joined.
        user: String,
        /// Member count after the join.
        user_count: usize,
        /// Member list after the join.
        active_users: Vec<String>,
        /// Human-readable notification text.
        message: String,
    },
    /// A user left the room.
    UserLeft {
        /// The user who left.
        user: String,
        /// Member count after the departure.
        user_count: usize,
        /// Member list after the departure.
        active_users: Vec<String>,
        /// Human-readable notification text.
        message: String,
    },
}

/// An outbound frame (server → client).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outbound {
    /// Presence change notification.
    Presence(PresenceUpdate),
    /// Chat message fan-out. The room is implicit to the connection.
    Chat {
        /// The relayed message.
        message: ChatBody,
    },
}

impl Outbound {
    /// Create a `user_joined` notification.
    #[must_use]
    pub fn user_joined(user: impl Into<String>, user_count: usize, active_users: Vec<String>) -> Self {
        let user = user.into();
        let message = format!("{user} joined the room");
        Outbound::Presence(PresenceUpdate::UserJoined {
            user,
            user_count,
            active_users,
            message,
        })
    }

    /// Create a `user_left` notification.
    #[must_use]
    pub fn user_left(user: impl Into<String>, user_count: usize, active_users: Vec<String>) -> Self {
        let user = user.into();
        let message = format!("{user} left the room");
        Outbound::Presence(PresenceUpdate::UserLeft {
            user,
            user_count,
            active_users,
            message,
        })
    }

    /// Create a chat relay frame.
    #[must_use]
    pub fn chat(sender: impl Into<String>, message: impl Into<String>) -> Self {
        Outbound::Chat {
            message: ChatBody {
                sender: sender.into(),
                message: message.into(),
            },
        }
    }

    /// Encode the frame as a JSON text payload.
    #[must_use]
    pub fn encode(&self) -> String {
        // Outbound frames are plain string/number structs; serialization
        // cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}
