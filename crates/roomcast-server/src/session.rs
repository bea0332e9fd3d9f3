//! The per-connection chat session state machine.
//!
//! A session owns one client's membership in one room. It is deliberately
//! transport-free: the WebSocket glue in `handlers` feeds it raw inbound
//! payloads and bus envelopes, and sends whatever frames it returns. That
//! keeps the whole join/broadcast/disconnect protocol testable without a
//! socket.
//!
//! Lifecycle: `Connecting → Joined → Disconnected` (terminal).
//!
//! The joining session is acknowledged directly from `connect()`, computed
//! after its own registry write; its own `Joined` broadcast is then ignored
//! in `handle_event`. Relying on the self-broadcast instead would read the
//! registry before the presence write lands and double-count.

use roomcast_core::{Bus, ConnectionId, Envelope, RoomEvent, RoomRegistry};
use roomcast_protocol::{Inbound, Outbound, ProtocolError};
use roomcast_store::MessageStore;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Inbound payload did not parse; fatal for this connection.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Operation is not valid in the session's current state.
    #[error("Invalid session state: expected {expected}, was {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport accepted, room not yet joined.
    Connecting,
    /// Member of the room, relaying events.
    Joined,
    /// Terminal; presence and subscription released.
    Disconnected,
}

impl SessionState {
    fn name(self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Joined => "joined",
            SessionState::Disconnected => "disconnected",
        }
    }
}

/// One client's connection to one room.
pub struct Session {
    id: ConnectionId,
    room: String,
    user: String,
    state: SessionState,
    registry: Arc<RoomRegistry>,
    bus: Arc<Bus>,
    store: Arc<dyn MessageStore>,
}

impl Session {
    /// Create a session in the `Connecting` state.
    pub fn new(
        registry: Arc<RoomRegistry>,
        bus: Arc<Bus>,
        store: Arc<dyn MessageStore>,
        room: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            id: ConnectionId::generate(),
            room: room.into(),
            user: user.into(),
            state: SessionState::Connecting,
            registry,
            bus,
            store,
        }
    }

    /// The session's connection ID.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// The room this session belongs to.
    #[must_use]
    pub fn room(&self) -> &str {
        &self.room
    }

    /// The session's display name.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Join the room: `Connecting → Joined`.
    ///
    /// Subscribes to the room channel, registers presence, and announces
    /// the join to peers. Returns the bus receiver plus the `user_joined`
    /// acknowledgment the caller must send to its own client; the
    /// acknowledgment carries the membership as seen right after this
    /// session's registry write.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidState`] unless the session is
    /// `Connecting`.
    pub fn connect(
        &mut self,
    ) -> Result<(broadcast::Receiver<Arc<Envelope>>, Outbound), SessionError> {
        if self.state != SessionState::Connecting {
            return Err(SessionError::InvalidState {
                expected: "connecting",
                actual: self.state.name(),
            });
        }

        let receiver = self.bus.subscribe(&self.room, &self.id);
        self.registry.join(&self.room, &self.user);

        let count = self.registry.count(&self.room);
        let members = self.registry.members(&self.room);
        let ack = Outbound::user_joined(self.user.clone(), count, members);

        self.bus.publish(
            &self.room,
            Envelope::new(
                self.id.clone(),
                RoomEvent::Joined {
                    user: self.user.clone(),
                },
            ),
        );

        self.state = SessionState::Joined;
        debug!(connection = %self.id, room = %self.room, user = %self.user, "Session joined");

        Ok((receiver, ack))
    }

    /// Handle a raw inbound payload from the client.
    ///
    /// Parses the payload and publishes a message event on the session's
    /// room. Persistence and echo happen uniformly in [`Self::handle_event`]
    /// so the sender and every peer receive an identically shaped frame.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Protocol`] for a malformed payload; the
    /// caller must treat this as fatal and close the connection without
    /// broadcasting anything.
    pub fn receive(&self, raw: &str) -> Result<(), SessionError> {
        if self.state != SessionState::Joined {
            return Err(SessionError::InvalidState {
                expected: "joined",
                actual: self.state.name(),
            });
        }

        let inbound = Inbound::decode(raw)?;
        self.bus.publish(
            &self.room,
            Envelope::new(
                self.id.clone(),
                RoomEvent::Message {
                    room_name: inbound.room_name,
                    sender: inbound.sender,
                    body: inbound.message,
                },
            ),
        );
        Ok(())
    }

    /// React to an envelope delivered from the room channel.
    ///
    /// Returns the frame to forward to this session's client, if any.
    /// Persistence failures are logged and never suppress the outbound
    /// frame; events already in flight are delivered best-effort.
    pub async fn handle_event(&self, envelope: &Envelope) -> Option<Outbound> {
        match &envelope.event {
            RoomEvent::Joined { user } => {
                // The joiner was acknowledged directly at connect time.
                if envelope.is_from(&self.id) {
                    return None;
                }
                let count = self.registry.count(&self.room);
                let members = self.registry.members(&self.room);
                Some(Outbound::user_joined(user.clone(), count, members))
            }
            RoomEvent::Left { user } => {
                if envelope.is_from(&self.id) {
                    return None;
                }
                let count = self.registry.count(&self.room);
                let members = self.registry.members(&self.room);
                Some(Outbound::user_left(user.clone(), count, members))
            }
            RoomEvent::Message {
                room_name,
                sender,
                body,
            } => {
                match self.store.persist(room_name, sender, body).await {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(connection = %self.id, room = %room_name, "Duplicate message body not persisted");
                    }
                    Err(e) => {
                        crate::metrics::record_store_error();
                        warn!(connection = %self.id, room = %room_name, error = %e, "Message persistence failed");
                    }
                }
                Some(Outbound::chat(sender.clone(), body.clone()))
            }
        }
    }

    /// Leave the room: `Joined → Disconnected`.
    ///
    /// Deregisters presence, announces the departure, then unsubscribes
    /// from the room channel, in that order. Idempotent: calling it on a
    /// session that never joined or already disconnected is a no-op.
    pub fn disconnect(&mut self) {
        if self.state != SessionState::Joined {
            return;
        }

        self.registry.leave(&self.room, &self.user);
        self.bus.publish(
            &self.room,
            Envelope::new(
                self.id.clone(),
                RoomEvent::Left {
                    user: self.user.clone(),
                },
            ),
        );
        self.bus.unsubscribe(&self.room, &self.id);

        self.state = SessionState::Disconnected;
        debug!(connection = %self.id, room = %self.room, user = %self.user, "Session disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomcast_store::MemoryStore;

    struct Harness {
        registry: Arc<RoomRegistry>,
        bus: Arc<Bus>,
        store: Arc<MemoryStore>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                registry: Arc::new(RoomRegistry::new()),
                bus: Arc::new(Bus::new()),
                store: Arc::new(MemoryStore::new()),
            }
        }

        fn session(&self, room: &str, user: &str) -> Session {
            Session::new(
                self.registry.clone(),
                self.bus.clone(),
                self.store.clone(),
                room,
                user,
            )
        }
    }

    fn user_joined_parts(frame: &Outbound) -> (String, usize, Vec<String>) {
        match frame {
            Outbound::Presence(roomcast_protocol::PresenceUpdate::UserJoined {
                user,
                user_count,
                active_users,
                ..
            }) => (user.clone(), *user_count, active_users.clone()),
            other => panic!("expected user_joined frame, got {other:?}"),
        }
    }

    fn user_left_parts(frame: &Outbound) -> (String, usize, Vec<String>) {
        match frame {
            Outbound::Presence(roomcast_protocol::PresenceUpdate::UserLeft {
                user,
                user_count,
                active_users,
                ..
            }) => (user.clone(), *user_count, active_users.clone()),
            other => panic!("expected user_left frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_first_join_is_acknowledged_directly() {
        let h = Harness::new();
        let mut alice = h.session("lobby", "Alice");

        let (mut rx, ack) = alice.connect().unwrap();
        assert_eq!(alice.state(), SessionState::Joined);

        let (user, count, members) = user_joined_parts(&ack);
        assert_eq!(user, "Alice");
        assert_eq!(count, 1);
        assert_eq!(members, vec!["Alice"]);

        // The session's own join broadcast produces no second frame.
        let own_join = rx.try_recv().unwrap();
        assert_eq!(alice.handle_event(&own_join).await, None);
    }

    #[tokio::test]
    async fn test_second_join_ripples_to_peers() {
        let h = Harness::new();
        let mut alice = h.session("lobby", "Alice");
        let mut bob = h.session("lobby", "Bob");

        let (mut rx_alice, _) = alice.connect().unwrap();
        rx_alice.try_recv().unwrap(); // drain Alice's own join

        let (_rx_bob, ack_bob) = bob.connect().unwrap();
        let (user, count, members) = user_joined_parts(&ack_bob);
        assert_eq!(user, "Bob");
        assert_eq!(count, 2);
        assert_eq!(members, vec!["Alice", "Bob"]);

        // Alice sees Bob's join with the updated membership.
        let envelope = rx_alice.try_recv().unwrap();
        let frame = alice.handle_event(&envelope).await.unwrap();
        let (user, count, members) = user_joined_parts(&frame);
        assert_eq!(user, "Bob");
        assert_eq!(count, 2);
        assert_eq!(members, vec!["Alice", "Bob"]);
    }

    #[tokio::test]
    async fn test_message_fans_out_to_sender_and_peer_and_persists_once() {
        let h = Harness::new();
        h.store.ensure_room("lobby").await.unwrap();

        let mut alice = h.session("lobby", "Alice");
        let mut bob = h.session("lobby", "Bob");
        let (mut rx_alice, _) = alice.connect().unwrap();
        let (mut rx_bob, _) = bob.connect().unwrap();
        rx_alice.try_recv().unwrap(); // Alice's own join
        rx_alice.try_recv().unwrap(); // Bob's join
        rx_bob.try_recv().unwrap(); // Bob's own join

        alice
            .receive(r#"{"room_name":"lobby","sender":"Alice","message":"hi"}"#)
            .unwrap();

        let expected = Outbound::chat("Alice", "hi");
        let to_alice = alice.handle_event(&rx_alice.try_recv().unwrap()).await;
        let to_bob = bob.handle_event(&rx_bob.try_recv().unwrap()).await;
        assert_eq!(to_alice, Some(expected.clone()));
        assert_eq!(to_bob, Some(expected));

        // Both handlers ran persist; the content dedup kept a single row.
        let stored = h.store.list_messages("lobby").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].sender, "Alice");
        assert_eq!(stored[0].message, "hi");
    }

    #[tokio::test]
    async fn test_duplicate_send_still_broadcasts() {
        let h = Harness::new();
        h.store.ensure_room("lobby").await.unwrap();

        let mut alice = h.session("lobby", "Alice");
        let (mut rx, _) = alice.connect().unwrap();
        rx.try_recv().unwrap();

        let raw = r#"{"room_name":"lobby","sender":"Alice","message":"hi"}"#;
        alice.receive(raw).unwrap();
        alice.receive(raw).unwrap();

        // Two outbound frames, one stored row.
        for _ in 0..2 {
            let frame = alice.handle_event(&rx.try_recv().unwrap()).await;
            assert_eq!(frame, Some(Outbound::chat("Alice", "hi")));
        }
        assert_eq!(h.store.list_messages("lobby").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_room_persistence_failure_does_not_block_delivery() {
        let h = Harness::new();
        // Room never created in the store.
        let mut alice = h.session("lobby", "Alice");
        let (mut rx, _) = alice.connect().unwrap();
        rx.try_recv().unwrap();

        alice
            .receive(r#"{"room_name":"lobby","sender":"Alice","message":"hi"}"#)
            .unwrap();

        let frame = alice.handle_event(&rx.try_recv().unwrap()).await;
        assert_eq!(frame, Some(Outbound::chat("Alice", "hi")));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_fatal_and_silent() {
        let h = Harness::new();
        let mut alice = h.session("lobby", "Alice");
        let mut bob = h.session("lobby", "Bob");
        let (_rx_alice, _) = alice.connect().unwrap();
        let (mut rx_bob, _) = bob.connect().unwrap();
        rx_bob.try_recv().unwrap();

        assert!(matches!(
            alice.receive("definitely not json"),
            Err(SessionError::Protocol(_))
        ));

        // Nothing was broadcast to peers.
        assert!(rx_bob.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_ripples_and_clears_presence() {
        let h = Harness::new();
        let mut alice = h.session("lobby", "Alice");
        let mut bob = h.session("lobby", "Bob");
        let (_rx_alice, _) = alice.connect().unwrap();
        let (mut rx_bob, _) = bob.connect().unwrap();
        rx_bob.try_recv().unwrap(); // Bob's own join

        alice.disconnect();
        assert_eq!(alice.state(), SessionState::Disconnected);

        let envelope = rx_bob.try_recv().unwrap();
        let frame = bob.handle_event(&envelope).await.unwrap();
        let (user, count, members) = user_left_parts(&frame);
        assert_eq!(user, "Alice");
        assert_eq!(count, 1);
        assert_eq!(members, vec!["Bob"]);

        assert!(!h.registry.members("lobby").contains(&"Alice".to_string()));
        assert_eq!(h.bus.subscriber_count("lobby"), 1);
    }

    #[tokio::test]
    async fn test_last_disconnect_empties_registry_and_bus() {
        let h = Harness::new();
        let mut alice = h.session("lobby", "Alice");
        let (_rx, _) = alice.connect().unwrap();

        alice.disconnect();

        assert!(!h.registry.contains("lobby"));
        assert!(!h.bus.room_exists("lobby"));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let h = Harness::new();
        let mut alice = h.session("lobby", "Alice");

        // Never joined: no-op.
        alice.disconnect();
        assert_eq!(alice.state(), SessionState::Connecting);

        let (_rx, _) = alice.connect().unwrap();
        alice.disconnect();
        alice.disconnect();
        assert_eq!(alice.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_twice_is_rejected() {
        let h = Harness::new();
        let mut alice = h.session("lobby", "Alice");

        let (_rx, _) = alice.connect().unwrap();
        assert!(matches!(
            alice.connect(),
            Err(SessionError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_receive_before_join_is_rejected() {
        let h = Harness::new();
        let alice = h.session("lobby", "Alice");

        assert!(matches!(
            alice.receive(r#"{"room_name":"lobby","sender":"Alice","message":"hi"}"#),
            Err(SessionError::InvalidState { .. })
        ));
    }
}
