//! chat-relay client
//!
//! A reconnecting WebSocket session for the chat relay: resolves an optional
//! bearer token before each attempt, keeps a local message log, and retries
//! at a fixed interval up to a bounded number of consecutive failures.
//!
//! # Example
//!
//! ```no_run
//! use chat_relay_client::{ChatClient, ClientConfig, SessionState};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("ws://localhost:8080")
//!         .token_endpoint("http://localhost:3000/api/auth-token");
//!     let client = ChatClient::new(config);
//!
//!     client.connect()?;
//!     client
//!         .state_receiver()
//!         .wait_for(|s| *s == SessionState::Connected)
//!         .await?;
//!
//!     client.submit("hello");
//!
//!     let mut inbox = client.message_receiver();
//!     while let Ok(msg) = inbox.recv().await {
//!         println!("{}", msg.text);
//!     }
//!
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod error;
mod messages;
mod reconnect;
mod throttle;
mod token;

pub use client::ChatClient;
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use messages::{ChatMessage, SendOutcome};
pub use reconnect::{CloseDecision, ReconnectState, SessionState, AUTH_REJECTION_CODES};
pub use throttle::Throttle;
pub use token::{connection_url, ConnectAttempt, HttpTokenProvider, TokenProvider};
