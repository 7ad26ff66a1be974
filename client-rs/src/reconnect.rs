//! Session state and the bounded fixed-interval reconnect policy

use std::time::Duration;

/// Close codes that signal the server rejected our credentials
pub const AUTH_REJECTION_CODES: [u16; 5] = [1008, 4001, 4003, 4401, 4403];

/// Close code used when an attempt fails before any socket is open
pub const ATTEMPT_FAILED: u16 = 1006;

/// State of a client session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session running
    Idle,
    /// Resolving a token or opening the socket
    Connecting,
    /// Connected and ready to send
    Connected,
    /// Waiting out the reconnect interval
    ReconnectWait,
    /// Retries exhausted; a new session is required
    Failed,
}

impl SessionState {
    /// Whether a session task is running in this state
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Connected | SessionState::ReconnectWait
        )
    }
}

/// What to do after a close
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDecision {
    /// Wait `delay`, then make attempt number `attempt`
    Retry { attempt: u32, delay: Duration },
    /// Stop for good
    GiveUp,
}

/// Counter and flags driving reconnection
#[derive(Debug, Clone)]
pub struct ReconnectState {
    interval: Duration,
    max_attempts: u32,
    attempts: u32,
    token_rejected: bool,
}

impl ReconnectState {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
            attempts: 0,
            token_rejected: false,
        }
    }

    /// Consecutive closes since the last successful connection
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether the most recent close was an authentication rejection
    pub fn token_rejected(&self) -> bool {
        self.token_rejected
    }

    pub fn on_connected(&mut self) {
        self.attempts = 0;
        self.token_rejected = false;
    }

    /// Record a close (or a failed attempt) and decide whether to retry
    pub fn on_close(&mut self, code: u16) -> CloseDecision {
        self.token_rejected = AUTH_REJECTION_CODES.contains(&code);
        self.attempts = self.attempts.saturating_add(1);

        if self.attempts >= self.max_attempts {
            CloseDecision::GiveUp
        } else {
            CloseDecision::Retry {
                attempt: self.attempts,
                delay: self.interval,
            }
        }
    }
}
