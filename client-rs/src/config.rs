//! Configuration for the relay client

use std::time::Duration;

/// Configuration for connecting to a relay server
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL (e.g., "ws://localhost:8080")
    pub url: String,

    /// Endpoint issuing bearer tokens. When unset, connections carry no token.
    pub token_endpoint: Option<String>,

    /// Consecutive failed connections after which the session gives up
    pub max_reconnect_attempts: u32,

    /// Fixed delay between reconnection attempts
    pub reconnect_interval: Duration,

    /// Window of the leading-edge throttle in front of `submit`
    pub send_throttle: Duration,
}

impl ClientConfig {
    /// Create a new configuration with the given URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token_endpoint: None,
            max_reconnect_attempts: 5,
            reconnect_interval: Duration::from_secs(3),
            send_throttle: Duration::from_millis(300),
        }
    }

    /// Fetch a token from `endpoint` before every connection attempt
    pub fn token_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.token_endpoint = Some(endpoint.into());
        self
    }

    /// Set the fixed reconnect interval and attempt bound
    pub fn reconnect(mut self, interval: Duration, max_attempts: u32) -> Self {
        self.reconnect_interval = interval;
        self.max_reconnect_attempts = max_attempts;
        self
    }

    /// Set the send throttle window
    pub fn send_throttle(mut self, window: Duration) -> Self {
        self.send_throttle = window;
        self
    }
}
