//! Connection state management

use axum::extract::ws::{Message, Utf8Bytes};
use axum::body::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Process-local connection identifier. Never reused while the process lives.
pub type ConnectionId = u64;

/// A relayed payload together with its text/binary tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(Utf8Bytes),
    Binary(Bytes),
}

impl Frame {
    pub fn text(text: impl Into<Utf8Bytes>) -> Self {
        Frame::Text(text.into())
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Frame::Binary(data.into())
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Frame::Binary(_))
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.as_str().len(),
            Frame::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> &'static str {
        if self.is_binary() {
            "binary"
        } else {
            "text"
        }
    }

    pub fn into_message(self) -> Message {
        match self {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(data) => Message::Binary(data),
        }
    }
}

/// Liveness of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// A connected client
pub struct ClientConnection {
    /// Unique connection ID
    pub id: ConnectionId,
    state: RwLock<ConnectionState>,
    /// Queue drained by the connection's writer task
    tx: mpsc::UnboundedSender<Frame>,
}

impl ClientConnection {
    pub fn new(id: ConnectionId, tx: mpsc::UnboundedSender<Frame>) -> Self {
        Self {
            id,
            state: RwLock::new(ConnectionState::Connecting),
            tx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub(crate) fn mark_open(&self) {
        *self.state.write() = ConnectionState::Open;
    }

    /// Stop routing to this connection ahead of its close event.
    pub fn mark_closing(&self) {
        let mut state = self.state.write();
        if *state == ConnectionState::Open {
            *state = ConnectionState::Closing;
        }
    }

    fn mark_closed(&self) {
        *self.state.write() = ConnectionState::Closed;
    }

    /// Queue a frame for this client. Fails only once the writer task is gone.
    pub fn send(&self, frame: Frame) -> Result<(), mpsc::error::SendError<Frame>> {
        self.tx.send(frame)
    }
}

/// The set of open connections, plus the id counter and live count
#[derive(Clone)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<ConnectionId, Arc<ClientConnection>>>,
    next_id: Arc<AtomicU64>,
    active: Arc<AtomicUsize>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Allocate an id for a freshly upgraded socket and add it as open
    pub fn register(&self, tx: mpsc::UnboundedSender<Frame>) -> Arc<ClientConnection> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let conn = Arc::new(ClientConnection::new(id, tx));
        conn.mark_open();

        self.connections.insert(id, conn.clone());
        self.active.fetch_add(1, Ordering::SeqCst);

        conn
    }

    /// Remove a connection. Removing an unknown or already removed id is a no-op.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<ClientConnection>> {
        let (_, conn) = self.connections.remove(&id)?;
        conn.mark_closed();
        self.active.fetch_sub(1, Ordering::SeqCst);
        Some(conn)
    }

    /// Snapshot of open connections other than `exclude`
    pub fn open_peers(&self, exclude: ConnectionId) -> Vec<Arc<ClientConnection>> {
        self.connections
            .iter()
            .filter(|entry| *entry.key() != exclude && entry.value().is_open())
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Number of connections currently registered
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Number of ids handed out since startup
    pub fn total_connections(&self) -> u64 {
        self.next_id.load(Ordering::Relaxed) - 1
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
