//! chat-relay - WebSocket broadcast relay for real-time chat
//!
//! Every message a client sends is forwarded, byte for byte and with its
//! text/binary tag, to every other connected client.

pub mod error;
pub mod server;

pub use error::RelayError;
pub use server::{ConnectionRegistry, RelayServer, RelayServerConfig};
