//! Relay server lifecycle

use crate::error::{RelayError, Result};
use crate::server::connections::ConnectionRegistry;
use crate::server::websocket::{create_router, WsState};

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::TcpListener;
use tracing::info;

pub const DEFAULT_PORT: u16 = 8080;

/// Relay server configuration
#[derive(Debug, Clone)]
pub struct RelayServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,
}

impl RelayServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self { bind_addr }
    }
}

impl Default for RelayServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT))
    }
}

/// The relay server
pub struct RelayServer {
    config: RelayServerConfig,
    registry: ConnectionRegistry,
}

impl RelayServer {
    pub fn new(config: RelayServerConfig) -> Self {
        Self {
            config,
            registry: ConnectionRegistry::new(),
        }
    }

    /// Bind the listening socket. Failing here is the only fatal error.
    pub async fn bind(self) -> Result<BoundRelay> {
        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|source| RelayError::Bind {
                addr: self.config.bind_addr,
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| RelayError::Bind {
            addr: self.config.bind_addr,
            source,
        })?;

        info!(addr = %local_addr, port = local_addr.port(), "Relay server listening");

        Ok(BoundRelay {
            listener,
            local_addr,
            registry: self.registry,
        })
    }
}

/// A relay server whose socket is bound but not yet serving
pub struct BoundRelay {
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: ConnectionRegistry,
}

impl BoundRelay {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> ConnectionRegistry {
        self.registry.clone()
    }

    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Serve until `signal` resolves
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = create_router(WsState::new(self.registry));

        axum::serve(self.listener, app)
            .with_graceful_shutdown(signal)
            .await
            .map_err(RelayError::Serve)?;

        info!("Relay server stopped");
        Ok(())
    }
}
