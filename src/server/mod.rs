//! Relay server implementation
//!
//! Handles WebSocket connections, the connection registry, and exclude-self fan-out.

mod broadcast;
mod connections;
mod relay;
pub mod websocket;

pub use broadcast::Broadcaster;
pub use connections::{ClientConnection, ConnectionId, ConnectionRegistry, ConnectionState, Frame};
pub use relay::{BoundRelay, RelayServer, RelayServerConfig, DEFAULT_PORT};
pub use websocket::{create_router, RelayStats, WsState};
