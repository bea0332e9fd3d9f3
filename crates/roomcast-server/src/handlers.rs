//! HTTP and WebSocket glue for the roomcast server.
//!
//! The live chat endpoint upgrades to a WebSocket and runs one
//! [`Session`] per connection. The remaining routes are the plain CRUD
//! collaborators: room creation and message history.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::session::{Session, SessionError};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use roomcast_core::{Bus, BusConfig, RoomRegistry};
use roomcast_store::{MessageStore, SqliteStore, StoreError};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Display name used when the client does not supply one.
const ANONYMOUS_USER: &str = "Anonymous";

/// Shared server state.
pub struct AppState {
    /// Room presence.
    pub registry: Arc<RoomRegistry>,
    /// Broadcast bus.
    pub bus: Arc<Bus>,
    /// Message store.
    pub store: Arc<dyn MessageStore>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state around a message store.
    #[must_use]
    pub fn new(config: Config, store: Arc<dyn MessageStore>) -> Self {
        let bus_config = BusConfig {
            channel_capacity: config.limits.channel_capacity,
        };

        Self {
            registry: Arc::new(RoomRegistry::new()),
            bus: Arc::new(Bus::with_config(bus_config)),
            store,
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or the listener fails
/// to bind.
pub async fn run_server(config: Config) -> Result<()> {
    let store = SqliteStore::connect(&config.database.url).await?;
    let state = Arc::new(AppState::new(config.clone(), Arc::new(store)));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = router(state);

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("roomcast server listening on {}", addr);
    info!(
        "Live chat endpoint: ws://{}{}/<room_name>/<user>",
        addr, config.live_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the route table.
pub fn router(state: Arc<AppState>) -> Router {
    let live = state.config.live_path.clone();
    Router::new()
        .route(&format!("{live}/:room_name/:user"), get(ws_handler))
        .route(&format!("{live}/:room_name"), get(ws_handler_anonymous))
        .route("/rooms", post(create_room))
        .route("/rooms/:room_name/messages", get(room_messages))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[derive(Debug, Deserialize)]
struct CreateRoom {
    room_name: String,
}

/// Create a room. Idempotent: creating an existing room succeeds.
async fn create_room(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateRoom>,
) -> impl IntoResponse {
    match state.store.ensure_room(&body.room_name).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "room_name": body.room_name })),
        ),
        Err(e) => store_error_response(e),
    }
}

/// Fetch a room's message history for initial page display.
async fn room_messages(
    State(state): State<Arc<AppState>>,
    Path(room_name): Path<String>,
) -> impl IntoResponse {
    match state.store.list_messages(&room_name).await {
        Ok(messages) => (StatusCode::OK, Json(serde_json::json!(messages))),
        Err(e) => store_error_response(e),
    }
}

fn store_error_response(e: StoreError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &e {
        StoreError::UnknownRoom(_) => StatusCode::NOT_FOUND,
        StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(serde_json::json!({ "error": e.to_string() })))
}

/// WebSocket upgrade handler with an explicit user identity.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path((room_name, user)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state, room_name, user))
}

/// WebSocket upgrade handler defaulting the identity.
async fn ws_handler_anonymous(
    ws: WebSocketUpgrade,
    Path(room_name): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        handle_websocket(socket, state, room_name, ANONYMOUS_USER.to_string())
    })
}

/// Drive one chat connection to completion.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, room: String, user: String) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let mut session = Session::new(
        state.registry.clone(),
        state.bus.clone(),
        state.store.clone(),
        room,
        user,
    );

    debug!(connection = %session.id(), room = %session.room(), user = %session.user(), "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    // Join the room; the ack goes straight to this client, the broadcast
    // to everyone else.
    let (mut events, ack) = match session.connect() {
        Ok(pair) => pair,
        Err(e) => {
            error!(connection = %session.id(), error = %e, "Join failed");
            return;
        }
    };
    metrics::record_join();
    metrics::set_active_rooms(state.registry.room_count());

    if send_frame(&mut sender, &ack.encode()).await.is_err() {
        warn!(connection = %session.id(), "Failed to send join acknowledgment");
        session.disconnect();
        metrics::set_active_rooms(state.registry.room_count());
        return;
    }

    loop {
        tokio::select! {
            biased;

            // Events from the room channel
            event = events.recv() => {
                match event {
                    Ok(envelope) => {
                        if let Some(frame) = session.handle_event(&envelope).await {
                            if send_frame(&mut sender, &frame.encode()).await.is_err() {
                                // Broken transport: treat as disconnected.
                                break;
                            }
                            metrics::record_message("outbound");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(connection = %session.id(), skipped, "Dropped events on slow connection");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            // Frames from the client
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if text.len() > state.config.limits.max_message_size {
                            warn!(connection = %session.id(), size = text.len(), "Inbound frame too large");
                            break;
                        }
                        match session.receive(&text) {
                            Ok(()) => metrics::record_message("inbound"),
                            Err(SessionError::Protocol(e)) => {
                                warn!(connection = %session.id(), error = %e, "Malformed inbound frame, closing");
                                break;
                            }
                            Err(e) => {
                                error!(connection = %session.id(), error = %e, "Receive failed");
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        warn!(connection = %session.id(), "Binary frame on text protocol, closing");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %session.id(), "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %session.id(), error = %e, "WebSocket error");
                        break;
                    }
                    None => {
                        debug!(connection = %session.id(), "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Presence out, departure broadcast, channel unsubscribe.
    session.disconnect();
    metrics::set_active_rooms(state.registry.room_count());

    debug!(connection = %session.id(), "WebSocket disconnected");
}

/// Send a text frame, recording send latency.
async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    payload: &str,
) -> Result<(), axum::Error> {
    let start = Instant::now();
    let result = sender.send(Message::Text(payload.to_string())).await;
    metrics::record_send_latency(start.elapsed().as_secs_f64());
    result
}
