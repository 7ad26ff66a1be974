//! chat-relay - WebSocket broadcast relay daemon

use anyhow::{Context, Result};
use chat_relay::server::{RelayServer, RelayServerConfig, DEFAULT_PORT};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "chat-relay")]
#[command(about = "WebSocket broadcast relay for real-time chat")]
#[command(version)]
struct Args {
    /// Interface to bind to
    #[arg(long, default_value = "0.0.0.0", env = "RELAY_HOST")]
    host: IpAddr,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "PORT")]
    port: u16,

    /// Log level
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RelayServerConfig::new(SocketAddr::new(args.host, args.port));
    let bound = RelayServer::new(config)
        .bind()
        .await
        .context("Relay server failed to start")?;

    info!(port = bound.local_addr().port(), "Relay server started");

    bound
        .serve_with_shutdown(shutdown_signal())
        .await
        .context("Relay server terminated")?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown requested, closing relay");
}
