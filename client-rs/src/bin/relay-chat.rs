//! relay-chat - terminal chat over the relay

use anyhow::{Context, Result};
use chat_relay_client::{ChatClient, ClientConfig, SendOutcome, SessionState};
use clap::Parser;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "relay-chat")]
#[command(about = "Chat through a chat-relay server from the terminal")]
#[command(version)]
struct Args {
    /// Relay WebSocket URL
    #[arg(long, env = "RELAY_URL", default_value = "ws://localhost:8080")]
    url: String,

    /// Endpoint issuing bearer tokens
    #[arg(long, env = "RELAY_TOKEN_ENDPOINT")]
    token_endpoint: Option<String>,

    /// Consecutive failures before giving up
    #[arg(long, default_value_t = 5)]
    max_reconnect_attempts: u32,

    /// Fixed delay between reconnect attempts, in milliseconds
    #[arg(long, default_value_t = 3000)]
    reconnect_interval_ms: u64,

    /// Log level
    #[arg(long, env = "RUST_LOG", default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = ClientConfig::new(args.url).reconnect(
        Duration::from_millis(args.reconnect_interval_ms),
        args.max_reconnect_attempts,
    );
    if let Some(endpoint) = args.token_endpoint {
        config = config.token_endpoint(endpoint);
    }

    let client = ChatClient::new(config);
    let mut inbox = client.message_receiver();
    let mut state = client.state_receiver();

    client.connect().context("Failed to start session")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("Failed to read stdin")? {
                    Some(line) => match client.submit(&line) {
                        outcome if outcome.is_sent() => {}
                        SendOutcome::Throttled => eprintln!("(slow down)"),
                        SendOutcome::NotConnected => eprintln!("(not connected, message dropped)"),
                        _ => {}
                    },
                    None => break,
                }
            }

            msg = inbox.recv() => {
                match msg {
                    Ok(msg) if !msg.is_sent => println!("> {}", msg.text),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "Display fell behind"),
                    Err(RecvError::Closed) => break,
                }
            }

            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                match current {
                    SessionState::Connected => eprintln!("(connected)"),
                    SessionState::ReconnectWait => eprintln!("(connection lost, retrying)"),
                    SessionState::Failed => {
                        eprintln!("(could not reconnect, giving up)");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    client.disconnect().await;
    Ok(())
}
