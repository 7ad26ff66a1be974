//! Message log entries and send results

use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message;

/// One entry in the local message log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Local id, present on sent entries only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub text: String,
    /// `true` for messages this session sent, `false` for relayed ones
    pub is_sent: bool,
}

impl ChatMessage {
    pub fn sent(id: u64, text: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            text: text.into(),
            is_sent: true,
        }
    }

    pub fn received(text: impl Into<String>) -> Self {
        Self {
            id: None,
            text: text.into(),
            is_sent: false,
        }
    }

    /// Log entry for an inbound data frame; control frames yield `None`
    pub fn from_frame(msg: &Message) -> Option<Self> {
        match msg {
            Message::Text(text) => Some(Self::received(text.as_str())),
            Message::Binary(data) => Some(Self::received(String::from_utf8_lossy(data))),
            _ => None,
        }
    }
}

/// Result of a send request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the transport and logged locally
    Sent,
    /// Input was empty after trimming
    Empty,
    /// No open connection
    NotConnected,
    /// Dropped by the send throttle
    Throttled,
}

impl SendOutcome {
    pub fn is_sent(self) -> bool {
        self == SendOutcome::Sent
    }
}
