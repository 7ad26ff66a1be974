//! Relay client session

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::messages::{ChatMessage, SendOutcome};
use crate::reconnect::{CloseDecision, ReconnectState, SessionState, ATTEMPT_FAILED};
use crate::throttle::Throttle;
use crate::token::{connection_url, ConnectAttempt, HttpTokenProvider, TokenProvider};

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code reported when the socket ends without a close frame
const NO_STATUS: u16 = 1005;

/// A running session task and the token that stops it
struct Session {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Internal client state
struct ClientInner {
    config: ClientConfig,
    token_provider: Option<Arc<dyn TokenProvider>>,
    state: watch::Sender<SessionState>,
    state_rx: watch::Receiver<SessionState>,
    reconnect: Mutex<ReconnectState>,

    // Message log, plus a feed of new entries
    log: Mutex<Vec<ChatMessage>>,
    log_tx: broadcast::Sender<ChatMessage>,

    // Writer half of the current connection
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,

    throttle: Mutex<Throttle>,
    session: Mutex<Option<Session>>,
    // Parent of every session token; cancelled when the last handle drops
    shutdown: CancellationToken,
    next_message_id: AtomicU64,
}

/// Reconnecting chat client
///
/// Keeps one logical connection to the relay, records sent and received
/// messages in a local log, and retries at a fixed interval up to a bounded
/// number of consecutive failures. Cheaply cloneable; dropping the last
/// clone stops the session.
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<ClientInner>,
    _shutdown: Arc<DropGuard>,
}

impl ChatClient {
    /// Create a client. A configured token endpoint becomes the pre-connect hook.
    pub fn new(config: ClientConfig) -> Self {
        let provider = config
            .token_endpoint
            .clone()
            .map(|endpoint| Arc::new(HttpTokenProvider::new(endpoint)) as Arc<dyn TokenProvider>);
        Self::build(config, provider)
    }

    /// Create a client with a custom pre-connect hook
    pub fn with_token_provider(config: ClientConfig, provider: Arc<dyn TokenProvider>) -> Self {
        Self::build(config, Some(provider))
    }

    fn build(config: ClientConfig, token_provider: Option<Arc<dyn TokenProvider>>) -> Self {
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (log_tx, _) = broadcast::channel(256);
        let shutdown = CancellationToken::new();

        let inner = Arc::new(ClientInner {
            reconnect: Mutex::new(ReconnectState::new(
                config.reconnect_interval,
                config.max_reconnect_attempts,
            )),
            throttle: Mutex::new(Throttle::new(config.send_throttle)),
            config,
            token_provider,
            state: state_tx,
            state_rx,
            log: Mutex::new(Vec::new()),
            log_tx,
            outbound: Mutex::new(None),
            session: Mutex::new(None),
            shutdown: shutdown.clone(),
            next_message_id: AtomicU64::new(1),
        });

        Self {
            inner,
            _shutdown: Arc::new(shutdown.drop_guard()),
        }
    }

    /// Get the current session state
    pub fn connection_state(&self) -> SessionState {
        *self.inner.state_rx.borrow()
    }

    /// Get a receiver for session state changes
    pub fn state_receiver(&self) -> watch::Receiver<SessionState> {
        self.inner.state_rx.clone()
    }

    /// Consecutive failed attempts since the last successful connection
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.reconnect.lock().attempts()
    }

    /// Snapshot of the message log
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.inner.log.lock().clone()
    }

    /// Subscribe to entries appended to the log from now on
    pub fn message_receiver(&self) -> broadcast::Receiver<ChatMessage> {
        self.inner.log_tx.subscribe()
    }

    /// Start the session
    ///
    /// Returns immediately; watch [`ChatClient::state_receiver`] for progress.
    /// Also restarts a session that ended in [`SessionState::Failed`].
    pub fn connect(&self) -> Result<()> {
        let mut session = self.inner.session.lock();

        let current = self.connection_state();
        if current.is_active() {
            return Err(ClientError::AlreadyActive);
        }

        *self.inner.reconnect.lock() = ReconnectState::new(
            self.inner.config.reconnect_interval,
            self.inner.config.max_reconnect_attempts,
        );
        self.inner.set_state(SessionState::Connecting);

        let cancel = self.inner.shutdown.child_token();
        let task = tokio::spawn(run_session(self.inner.clone(), cancel.clone()));
        *session = Some(Session { cancel, task });

        Ok(())
    }

    /// Tear the session down, cancelling any pending reconnect
    pub async fn disconnect(&self) {
        let session = self.inner.session.lock().take();
        if let Some(session) = session {
            session.cancel.cancel();
            if let Err(e) = session.task.await {
                if e.is_panic() {
                    error!("Session task panicked: {}", e);
                }
            }
        }

        *self.inner.outbound.lock() = None;
        self.inner.set_state(SessionState::Idle);
    }

    /// Send `text` if connected and non-blank, logging it as sent
    pub fn send(&self, text: &str) -> SendOutcome {
        if text.trim().is_empty() {
            warn!("Message is empty, nothing to send");
            return SendOutcome::Empty;
        }

        let state = self.connection_state();
        if state != SessionState::Connected {
            warn!(state = ?state, "WebSocket is not open, cannot send message");
            return SendOutcome::NotConnected;
        }

        let tx = self.inner.outbound.lock().clone();
        let Some(tx) = tx else {
            warn!("WebSocket is not open, cannot send message");
            return SendOutcome::NotConnected;
        };

        if tx.send(Message::text(text.to_string())).is_err() {
            warn!("Connection writer is gone, message dropped");
            return SendOutcome::NotConnected;
        }

        // Logged before any delivery confirmation; none exists in the protocol
        let id = self.inner.next_message_id.fetch_add(1, Ordering::Relaxed);
        self.inner.push_log(ChatMessage::sent(id, text));

        SendOutcome::Sent
    }

    /// UI entry point: `send` behind a leading-edge throttle
    pub fn submit(&self, text: &str) -> SendOutcome {
        if !self.inner.throttle.lock().try_acquire() {
            debug!("Send throttled");
            return SendOutcome::Throttled;
        }
        self.send(text)
    }
}

impl ClientInner {
    fn set_state(&self, state: SessionState) {
        debug!(state = ?state, "Session state changed");
        let _ = self.state.send(state);
    }

    fn push_log(&self, entry: ChatMessage) {
        self.log.lock().push(entry.clone());
        // No subscribers is fine
        let _ = self.log_tx.send(entry);
    }

    fn next_attempt(&self) -> ConnectAttempt {
        let reconnect = self.reconnect.lock();
        ConnectAttempt {
            attempt: reconnect.attempts(),
            token_rejected: reconnect.token_rejected(),
        }
    }

    /// One connection attempt, start to close.
    ///
    /// Returns the close code, or `None` when the session was cancelled.
    async fn run_attempt(&self, cancel: &CancellationToken) -> Option<u16> {
        let token = match &self.token_provider {
            Some(provider) => {
                let attempt = self.next_attempt();
                let resolved = tokio::select! {
                    _ = cancel.cancelled() => return None,
                    resolved = provider.resolve(attempt) => resolved,
                };
                match resolved {
                    Ok(token) => Some(token),
                    Err(e) => {
                        warn!(error = %e, "Token resolution failed, skipping connection attempt");
                        return Some(ATTEMPT_FAILED);
                    }
                }
            }
            None => None,
        };

        let url = match connection_url(&self.config.url, token.as_deref()) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Cannot build connection URL");
                return Some(ATTEMPT_FAILED);
            }
        };

        debug!(url = %self.config.url, has_token = token.is_some(), "Connecting");
        let connected = tokio::select! {
            _ = cancel.cancelled() => return None,
            connected = connect_async(url.as_str()) => connected,
        };

        match connected {
            Ok((ws, _response)) => self.drive(ws, cancel).await,
            Err(e) => {
                warn!(error = %e, "Connection failed");
                Some(handshake_close_code(&e))
            }
        }
    }

    /// Pump an open socket until it closes or the session is cancelled
    async fn drive(&self, ws: WsStream, cancel: &CancellationToken) -> Option<u16> {
        let (mut sink, mut stream) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        *self.outbound.lock() = Some(tx);
        self.reconnect.lock().on_connected();
        self.set_state(SessionState::Connected);
        info!(url = %self.config.url, "Connection established");

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Err(e) = sink.close().await {
                        debug!(error = %e, "Close handshake failed");
                    }
                    break None;
                }

                Some(msg) = rx.recv() => {
                    if let Err(e) = sink.send(msg).await {
                        warn!(error = %e, "Send failed");
                        break Some(ATTEMPT_FAILED);
                    }
                }

                incoming = stream.next() => {
                    match incoming {
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (u16::from(f.code), f.reason.as_str().to_string()))
                                .unwrap_or((NO_STATUS, String::new()));
                            info!(code, reason = %reason, "WebSocket closed");
                            break Some(code);
                        }
                        Some(Ok(msg)) => {
                            if let Some(entry) = ChatMessage::from_frame(&msg) {
                                debug!(bytes = entry.text.len(), "Message received");
                                self.push_log(entry);
                            }
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket error");
                            break Some(ATTEMPT_FAILED);
                        }
                        None => {
                            info!("WebSocket closed without close frame");
                            break Some(NO_STATUS);
                        }
                    }
                }
            }
        };

        *self.outbound.lock() = None;
        result
    }
}

/// Map a failed handshake to a close code; HTTP 401/403 count as auth rejections
fn handshake_close_code(error: &tungstenite::Error) -> u16 {
    match error {
        tungstenite::Error::Http(response) => match response.status().as_u16() {
            401 => 4401,
            403 => 4403,
            _ => ATTEMPT_FAILED,
        },
        _ => ATTEMPT_FAILED,
    }
}

/// Session task: connect, wait out closes, retry until connected or exhausted
async fn run_session(inner: Arc<ClientInner>, cancel: CancellationToken) {
    loop {
        inner.set_state(SessionState::Connecting);

        let Some(code) = inner.run_attempt(&cancel).await else {
            debug!("Session cancelled");
            return;
        };

        let decision = inner.reconnect.lock().on_close(code);
        match decision {
            CloseDecision::Retry { attempt, delay } => {
                if inner.reconnect.lock().token_rejected() {
                    info!(code, "Token rejected, next attempt re-resolves it");
                }
                inner.set_state(SessionState::ReconnectWait);
                info!(attempt, delay = ?delay, "Reconnecting after fixed interval");

                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Reconnect timer cancelled");
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            CloseDecision::GiveUp => {
                let attempts = inner.reconnect.lock().attempts();
                error!(attempts, "Max reconnect attempts reached, giving up");
                *inner.outbound.lock() = None;
                inner.set_state(SessionState::Failed);
                return;
            }
        }
    }
}
