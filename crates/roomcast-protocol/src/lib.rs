//! # roomcast-protocol
//!
//! Wire frame definitions for the roomcast chat protocol.
//!
//! The protocol is JSON text frames over a bidirectional channel. Clients
//! send one inbound shape; the server answers with presence notifications
//! and chat messages.
//!
//! ## Example
//!
//! ```rust
//! use roomcast_protocol::{Inbound, Outbound};
//!
//! let inbound = Inbound::decode(r#"{"room_name":"lobby","sender":"Alice","message":"hi"}"#).unwrap();
//! assert_eq!(inbound.sender, "Alice");
//!
//! let frame = Outbound::chat("Alice", "hi");
//! assert_eq!(frame.encode(), r#"{"message":{"sender":"Alice","message":"hi"}}"#);
//! ```

pub mod frames;

pub use frames::{ChatBody, Inbound, Outbound, PresenceUpdate, ProtocolError};
