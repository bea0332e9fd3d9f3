//! # roomcast-core
//!
//! Room presence and broadcast primitives for the roomcast chat service.
//!
//! This crate provides the pieces with real shared state:
//!
//! - **RoomRegistry** - who is currently in which room
//! - **Bus** - per-room publish/subscribe fan-out
//! - **RoomEvent** - the events flowing between sessions
//! - **ConnectionId** - process-unique connection identifiers
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────┐
//! │   Session   │────▶│     Bus     │────▶│  RoomChannel │
//! └─────────────┘     └─────────────┘     └──────────────┘
//!        │
//!        ▼
//! ┌──────────────┐
//! │ RoomRegistry │
//! └──────────────┘
//! ```

pub mod bus;
pub mod connection;
pub mod event;
pub mod registry;

pub use bus::{Bus, BusConfig};
pub use connection::ConnectionId;
pub use event::{Envelope, RoomEvent};
pub use registry::RoomRegistry;
