//! InkRelay WebSocket Relay Server
//!
//! Hosts rooms, each owning one authoritative operation log. Clients join a
//! room over `/ws`, submit append/undo/redo requests, and receive the room's
//! authoritative broadcasts. See [`inkrelay_core::protocol`] for the wire
//! format.

pub mod config;
pub mod connection;
pub mod registry;
pub mod room;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use config::ServerConfig;
pub use registry::RoomRegistry;
pub use room::{Envelope, JoinTicket, PALETTE, PeerId, Room, RoomError, RoomHandle};

/// Shared application state
#[derive(Debug, Default)]
pub struct AppState {
    pub registry: RoomRegistry,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            registry: RoomRegistry::new(config),
        }
    }
}

/// HTTP routes: an index page, a health check and the WebSocket endpoint.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index() -> &'static str {
    "InkRelay Server - Connect via WebSocket at /ws"
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_socket(socket, state))
}
