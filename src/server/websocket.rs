//! WebSocket transport
//!
//! Upgrades HTTP requests, registers each socket with the connection registry
//! and relays every inbound frame to the other open sockets.

use crate::server::broadcast::Broadcaster;
use crate::server::connections::{ClientConnection, ConnectionRegistry, Frame};

use axum::{
    extract::{
        rejection::QueryRejection,
        ws::{close_code, CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

/// Shared state for WebSocket handlers
#[derive(Clone)]
pub struct WsState {
    pub registry: ConnectionRegistry,
    pub broadcaster: Broadcaster,
}

impl WsState {
    pub fn new(registry: ConnectionRegistry) -> Self {
        let broadcaster = Broadcaster::new(registry.clone());
        Self { registry, broadcaster }
    }
}

/// Query parameters accepted on the upgrade request
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Bearer identity token. Accepted but not verified.
    pub token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RelayStats {
    pub active_connections: usize,
    pub total_connections: u64,
}

/// How a socket ended, as reported by the close path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

impl CloseInfo {
    fn from_frame(frame: Option<CloseFrame>) -> Self {
        match frame {
            Some(frame) => Self {
                code: frame.code,
                reason: frame.reason.as_str().to_string(),
            },
            None => Self::no_status(),
        }
    }

    fn no_status() -> Self {
        Self {
            code: close_code::STATUS,
            reason: String::new(),
        }
    }

    fn abnormal() -> Self {
        Self {
            code: close_code::ABNORMAL,
            reason: String::new(),
        }
    }
}

/// Create the HTTP router
pub fn create_router(state: WsState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn stats_handler(State(state): State<WsState>) -> Json<RelayStats> {
    Json(RelayStats {
        active_connections: state.registry.active_count(),
        total_connections: state.registry.total_connections(),
    })
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    params: Result<Query<ConnectParams>, QueryRejection>,
    State(state): State<WsState>,
) -> impl IntoResponse {
    // The token is informational only; an unparsable query never blocks the upgrade
    let params = match params {
        Ok(Query(params)) => params,
        Err(rejection) => {
            debug!(error = %rejection, "Ignoring unparsable upgrade query");
            ConnectParams::default()
        }
    };
    let has_token = params.token.as_deref().is_some_and(|t| !t.is_empty());
    ws.on_upgrade(move |socket| handle_socket(socket, state, has_token))
}

async fn handle_socket(socket: WebSocket, state: WsState, has_token: bool) {
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
    let conn = on_connect(&state, tx, has_token);

    // Forward queued frames to the socket
    let writer_conn = conn.clone();
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = sender.send(frame.into_message()).await {
                debug!(conn_id = writer_conn.id, error = %e, "Write failed");
                writer_conn.mark_closing();
                break;
            }
        }
    });

    let close = loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => on_message(&state, &conn, Frame::Text(text)),
            Some(Ok(Message::Binary(data))) => on_message(&state, &conn, Frame::Binary(data)),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                // Handled automatically by axum
            }
            Some(Ok(Message::Close(frame))) => break CloseInfo::from_frame(frame),
            Some(Err(e)) => {
                on_error(&conn, &e);
                break CloseInfo::abnormal();
            }
            None => break CloseInfo::no_status(),
        }
    };

    on_close(&state, &conn, &close);
    send_task.abort();
}

fn on_connect(
    state: &WsState,
    tx: mpsc::UnboundedSender<Frame>,
    has_token: bool,
) -> Arc<ClientConnection> {
    let conn = state.registry.register(tx);
    info!(
        conn_id = conn.id,
        active = state.registry.active_count(),
        has_token,
        "New WebSocket connection established"
    );
    conn
}

fn on_message(state: &WsState, conn: &ClientConnection, frame: Frame) {
    info!(
        conn_id = conn.id,
        bytes = frame.len(),
        kind = frame.kind(),
        "Received message"
    );
    state.broadcaster.broadcast(conn.id, &frame);
}

fn on_close(state: &WsState, conn: &ClientConnection, close: &CloseInfo) {
    // Removal happens before anything else so no later broadcast can target it
    if state.registry.remove(conn.id).is_none() {
        return;
    }
    info!(
        conn_id = conn.id,
        code = close.code,
        reason = %close.reason,
        active = state.registry.active_count(),
        "WebSocket closed"
    );
}

fn on_error(conn: &ClientConnection, error: &axum::Error) {
    warn!(conn_id = conn.id, error = %error, "WebSocket error");
}
