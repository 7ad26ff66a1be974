//! Exclude-self message fan-out

use crate::server::connections::{ConnectionId, ConnectionRegistry, Frame};
use tracing::debug;

/// Forwards frames from one connection to every other open connection
#[derive(Clone)]
pub struct Broadcaster {
    registry: ConnectionRegistry,
}

impl Broadcaster {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// Relay `frame` to all open connections except `from`.
    ///
    /// Returns how many peers accepted the frame. Peers that closed after the
    /// snapshot was taken are skipped silently.
    pub fn broadcast(&self, from: ConnectionId, frame: &Frame) -> usize {
        let peers = self.registry.open_peers(from);
        let mut delivered = 0;

        for peer in peers {
            if !peer.is_open() {
                continue;
            }

            match peer.send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    // Expected when a peer disconnects mid-broadcast
                    debug!(
                        conn_id = peer.id,
                        from = from,
                        "Skipping peer whose writer is gone"
                    );
                }
            }
        }

        debug!(from = from, delivered, kind = frame.kind(), "Broadcast complete");
        delivered
    }
}
