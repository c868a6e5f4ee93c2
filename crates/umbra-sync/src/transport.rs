//! # WebSocket Transport
//!
//! Shadow transport facade: a WebSocket client with automatic reconnection
//! and backoff, exposed to the rest of the engine as publish/subscribe
//! primitives plus two inbound streams (correlated events and connection
//! statuses).
//!
//! ## Connection Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    WebSocket Connection Statuses                        │
//! │                                                                         │
//! │  ┌────────────┐    connect()    ┌────────────┐                         │
//! │  │Disconnected│ ──────────────► │ Connecting │                         │
//! │  └────────────┘                 └─────┬──────┘                         │
//! │        ▲                              │                                 │
//! │        │                    success   │   failure                       │
//! │        │                        ┌─────┴──────────┐                     │
//! │        │                        ▼                ▼                      │
//! │        │              ┌────────────┐  ┌───────────────────┐            │
//! │        │              │ Connected  │  │ ConnectionRefused │            │
//! │        │              └─────┬──────┘  │ ConnectionError   │            │
//! │        │                    │         │ ProtocolError     │            │
//! │        │              disconnect/err  └─────────┬─────────┘            │
//! │        │                    │                   │ backoff timer        │
//! │        └────────────────────┴───────────────────┘                      │
//! │                                                                         │
//! │  BACKOFF STRATEGY (Exponential)                                        │
//! │  ──────────────────────────────                                        │
//! │  Attempt 1: 500ms                                                       │
//! │  Attempt 2: 1s                                                          │
//! │  Attempt 3: 2s                                                          │
//! │  ...                                                                    │
//! │  Max: 60s                                                               │
//! │                                                                         │
//! │  Every transition is pushed onto the status stream (at-least-once);    │
//! │  the client orchestrator re-registers all shadows on Connected.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use umbra_core::AttributeMap;

use crate::error::{ShadowError, ShadowResult};
use crate::protocol::{CorrelationToken, ShadowEvent, ShadowMessage};

// =============================================================================
// Connection Status
// =============================================================================

/// Connection status for the shadow transport.
///
/// These are the transitions delivered to the status stream; consumers get
/// every transition at least once but must tolerate duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Not connected.
    Disconnected,
    /// Attempting to connect.
    Connecting,
    /// Connected and ready.
    Connected,
    /// The endpoint actively refused the connection.
    ConnectionRefused,
    /// The connection failed or was lost for a network-level reason.
    ConnectionError,
    /// The endpoint violated the WebSocket or shadow protocol.
    ProtocolError,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::ConnectionRefused => write!(f, "connection-refused"),
            ConnectionStatus::ConnectionError => write!(f, "connection-error"),
            ConnectionStatus::ProtocolError => write!(f, "protocol-error"),
        }
    }
}

// =============================================================================
// Transport Configuration
// =============================================================================

/// Configuration for the WebSocket transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// WebSocket URL to connect to.
    pub url: String,

    /// Client identifier, used as the correlation-token prefix.
    pub client_id: String,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// Initial backoff duration.
    pub initial_backoff: Duration,

    /// Maximum backoff duration.
    pub max_backoff: Duration,

    /// Maximum reconnection attempts (0 = infinite).
    pub max_retries: u32,

    /// Ping interval for keepalive.
    pub ping_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            url: String::new(),
            client_id: "umbra".to_string(),
            connect_timeout: Duration::from_secs(10),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
            max_retries: 0, // Infinite
            ping_interval: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Transport Handle
// =============================================================================

/// Handle for interacting with the transport from other components.
///
/// Publishing a shadow operation allocates and returns a monotonic
/// correlation token; the eventual response, if any, arrives on the event
/// stream after the publish returns. No ordering beyond that is guaranteed.
#[derive(Clone)]
pub struct TransportHandle {
    /// Sender for outgoing messages.
    outgoing_tx: mpsc::Sender<ShadowMessage>,

    /// Current connection status.
    status: Arc<RwLock<ConnectionStatus>>,

    /// Shutdown signal.
    shutdown_tx: mpsc::Sender<()>,

    /// Correlation-token prefix (client ID).
    client_id: Arc<String>,

    /// Monotonic correlation-token sequence.
    token_seq: Arc<AtomicU64>,
}

impl TransportHandle {
    /// Allocates the next correlation token: `"{client_id}-{seq}"`.
    ///
    /// The sequence is monotonic for the lifetime of this transport, so a
    /// stale response can never collide with a newer operation's token.
    pub fn next_token(&self) -> CorrelationToken {
        let seq = self.token_seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{}", self.client_id, seq)
    }

    /// Publishes a shadow update with a pre-allocated token.
    ///
    /// Returns the token on success so call sites that do not need to
    /// pre-record a pending operation can treat this as
    /// `publish(...) -> token`.
    pub async fn publish_update(
        &self,
        thing_name: &str,
        fragment: AttributeMap,
        token: &str,
    ) -> ShadowResult<CorrelationToken> {
        self.send(ShadowMessage::update(thing_name, token, fragment))
            .await?;
        Ok(token.to_string())
    }

    /// Publishes a shadow get with a pre-allocated token.
    pub async fn publish_get(
        &self,
        thing_name: &str,
        token: &str,
    ) -> ShadowResult<CorrelationToken> {
        self.send(ShadowMessage::get(thing_name, token)).await?;
        Ok(token.to_string())
    }

    /// Registers interest in a named shadow on the wire.
    pub async fn subscribe(&self, thing_name: &str) -> ShadowResult<()> {
        self.send(ShadowMessage::subscribe(thing_name)).await
    }

    /// Drops interest in a named shadow on the wire.
    pub async fn unsubscribe(&self, thing_name: &str) -> ShadowResult<()> {
        self.send(ShadowMessage::unsubscribe(thing_name)).await
    }

    /// Sends a raw message through the transport.
    pub async fn send(&self, message: ShadowMessage) -> ShadowResult<()> {
        self.outgoing_tx
            .send(message)
            .await
            .map_err(|_| ShadowError::ChannelError("Failed to send message".into()))
    }

    /// Returns the current connection status.
    pub async fn status(&self) -> ConnectionStatus {
        *self.status.read().await
    }

    /// Returns true if currently connected.
    pub async fn is_connected(&self) -> bool {
        *self.status.read().await == ConnectionStatus::Connected
    }

    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> ShadowResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| ShadowError::ChannelError("Failed to send shutdown signal".into()))
    }
}

// =============================================================================
// Detached Peer (for tests and custom transports)
// =============================================================================

/// The far side of a detached transport: what the WebSocket task would
/// normally be.
///
/// Tests and embedders drive the engine by reading published messages from
/// `outgoing` and injecting outcomes/statuses through `events`/`statuses`.
pub struct DetachedPeer {
    /// Messages the engine published.
    pub outgoing: mpsc::Receiver<ShadowMessage>,

    /// Inject correlated shadow events.
    pub events: mpsc::Sender<ShadowEvent>,

    /// Inject connection-status transitions.
    pub statuses: mpsc::Sender<ConnectionStatus>,
}

// =============================================================================
// WebSocket Transport
// =============================================================================

/// Why a connection loop returned without an error.
enum LoopEnd {
    /// The endpoint closed the connection; reconnect with backoff.
    Closed,
    /// Shutdown was requested; stop the transport.
    Shutdown,
}

/// WebSocket transport with automatic reconnection.
///
/// ## Usage
/// ```rust,ignore
/// let config = TransportConfig {
///     url: "wss://shadows.example.com/things".into(),
///     client_id: "register-1".into(),
///     ..Default::default()
/// };
///
/// let (handle, mut event_rx, mut status_rx) = Transport::spawn(config);
///
/// // Publish operations
/// let token = handle.next_token();
/// handle.publish_get("TemperatureControl", &token).await?;
///
/// // Receive correlated outcomes
/// while let Some(event) = event_rx.recv().await {
///     println!("{} on {}", event.outcome, event.thing_name);
/// }
/// ```
pub struct Transport {
    config: TransportConfig,
    status: Arc<RwLock<ConnectionStatus>>,
    outgoing_rx: mpsc::Receiver<ShadowMessage>,
    event_tx: mpsc::Sender<ShadowEvent>,
    status_tx: mpsc::Sender<ConnectionStatus>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl Transport {
    /// Creates a new transport and spawns its background task.
    ///
    /// Returns a handle for publishing plus receivers for correlated events
    /// and connection-status transitions.
    pub fn spawn(
        config: TransportConfig,
    ) -> (
        TransportHandle,
        mpsc::Receiver<ShadowEvent>,
        mpsc::Receiver<ConnectionStatus>,
    ) {
        let (handle, outgoing_rx, event_tx, event_rx, status_tx, status_rx, shutdown_rx) =
            Self::channels(&config);

        let transport = Transport {
            config,
            status: handle.status.clone(),
            outgoing_rx,
            event_tx,
            status_tx,
            shutdown_rx,
        };

        // Spawn background task
        tokio::spawn(transport.run());

        (handle, event_rx, status_rx)
    }

    /// Creates a handle wired to bare channels, with no WebSocket task.
    ///
    /// Used by tests and by embedders that bring their own transport: the
    /// returned [`DetachedPeer`] plays the role of the far endpoint.
    pub fn detached(
        client_id: &str,
    ) -> (
        TransportHandle,
        DetachedPeer,
        mpsc::Receiver<ShadowEvent>,
        mpsc::Receiver<ConnectionStatus>,
    ) {
        let config = TransportConfig {
            client_id: client_id.to_string(),
            ..Default::default()
        };
        let (handle, outgoing_rx, event_tx, event_rx, status_tx, status_rx, _shutdown_rx) =
            Self::channels(&config);

        let peer = DetachedPeer {
            outgoing: outgoing_rx,
            events: event_tx,
            statuses: status_tx,
        };

        (handle, peer, event_rx, status_rx)
    }

    /// Channel plumbing shared by `spawn` and `detached`.
    #[allow(clippy::type_complexity)]
    fn channels(
        config: &TransportConfig,
    ) -> (
        TransportHandle,
        mpsc::Receiver<ShadowMessage>,
        mpsc::Sender<ShadowEvent>,
        mpsc::Receiver<ShadowEvent>,
        mpsc::Sender<ConnectionStatus>,
        mpsc::Receiver<ConnectionStatus>,
        mpsc::Receiver<()>,
    ) {
        let (outgoing_tx, outgoing_rx) = mpsc::channel::<ShadowMessage>(100);
        let (event_tx, event_rx) = mpsc::channel::<ShadowEvent>(100);
        let (status_tx, status_rx) = mpsc::channel::<ConnectionStatus>(16);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let status = Arc::new(RwLock::new(ConnectionStatus::Disconnected));

        let handle = TransportHandle {
            outgoing_tx,
            status,
            shutdown_tx,
            client_id: Arc::new(config.client_id.clone()),
            token_seq: Arc::new(AtomicU64::new(0)),
        };

        (
            handle,
            outgoing_rx,
            event_tx,
            event_rx,
            status_tx,
            status_rx,
            shutdown_rx,
        )
    }

    /// Records a status transition and pushes it onto the status stream.
    ///
    /// Delivery is at-least-once: the send waits for channel capacity, so a
    /// lagging consumer delays the transport instead of losing a transition
    /// (the client's reconnect ritual keys off `Connected`). A dropped
    /// receiver must not stall the transport.
    async fn set_status(&self, status: ConnectionStatus) {
        *self.status.write().await = status;
        let _ = self.status_tx.send(status).await;
    }

    /// Main transport loop.
    async fn run(mut self) {
        info!(url = %self.config.url, client_id = %self.config.client_id, "Transport starting");

        let mut backoff = self.create_backoff();
        let mut retry_count = 0u32;

        loop {
            // Check for shutdown
            if self.shutdown_rx.try_recv().is_ok() {
                info!("Transport received shutdown signal");
                break;
            }

            // Try to connect
            self.set_status(ConnectionStatus::Connecting).await;

            match self.connect_with_timeout().await {
                Ok(ws_stream) => {
                    info!("WebSocket connected");
                    self.set_status(ConnectionStatus::Connected).await;

                    // Reset backoff on successful connection
                    backoff.reset();
                    retry_count = 0;

                    // Run the connection loop
                    match self.connection_loop(ws_stream).await {
                        Ok(LoopEnd::Shutdown) => {
                            break;
                        }
                        Ok(LoopEnd::Closed) => {
                            self.set_status(ConnectionStatus::Disconnected).await;
                        }
                        Err(e) => {
                            warn!(?e, "Connection loop ended");
                            self.set_status(Self::classify(&e)).await;
                        }
                    }
                }
                Err(e) => {
                    error!(?e, "Failed to connect");
                    self.set_status(Self::classify(&e)).await;
                }
            }

            // Check retry limit
            if self.config.max_retries > 0 {
                retry_count += 1;
                if retry_count >= self.config.max_retries {
                    error!(
                        max_retries = self.config.max_retries,
                        "Max reconnection attempts reached"
                    );
                    break;
                }
            }

            // Wait for backoff duration
            if let Some(duration) = backoff.next_backoff() {
                debug!(?duration, attempt = retry_count, "Waiting before reconnect");

                tokio::select! {
                    _ = tokio::time::sleep(duration) => {}
                    _ = self.shutdown_rx.recv() => {
                        info!("Shutdown during backoff");
                        break;
                    }
                }
            } else {
                // Backoff exhausted (cannot happen with no elapsed-time limit)
                error!("Backoff exhausted");
                break;
            }
        }

        self.set_status(ConnectionStatus::Disconnected).await;
        info!("Transport stopped");
    }

    /// Maps a transport error onto the status it should surface as.
    fn classify(err: &ShadowError) -> ConnectionStatus {
        match err {
            ShadowError::ConnectionRefused(_) => ConnectionStatus::ConnectionRefused,
            ShadowError::WebSocketError(_)
            | ShadowError::InvalidMessage(_)
            | ShadowError::DeserializationFailed(_) => ConnectionStatus::ProtocolError,
            _ => ConnectionStatus::ConnectionError,
        }
    }

    /// Connects with timeout.
    async fn connect_with_timeout(
        &self,
    ) -> ShadowResult<WebSocketStream<MaybeTlsStream<TcpStream>>> {
        let connect_future = connect_async(self.config.url.as_str());

        match timeout(self.config.connect_timeout, connect_future).await {
            Ok(Ok((ws_stream, response))) => {
                debug!(status = ?response.status(), "WebSocket handshake complete");
                Ok(ws_stream)
            }
            Ok(Err(e)) => Err(ShadowError::from(e)),
            Err(_) => Err(ShadowError::Timeout(self.config.connect_timeout.as_secs())),
        }
    }

    /// Main connection loop - handles sending and receiving.
    async fn connection_loop(
        &mut self,
        ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    ) -> ShadowResult<LoopEnd> {
        let (write, mut read) = ws_stream.split();
        let write = Arc::new(Mutex::new(write));

        let mut ping_interval = tokio::time::interval(self.config.ping_interval);
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                // Handle outgoing messages
                Some(msg) = self.outgoing_rx.recv() => {
                    let json = msg.to_json()?;
                    debug!(msg_type = %msg.type_name(), "Sending message");
                    let mut writer = write.lock().await;
                    writer.send(WsMessage::Text(json.into())).await?;
                }

                // Handle incoming messages
                Some(result) = read.next() => {
                    match result {
                        Ok(WsMessage::Text(text)) => {
                            match ShadowMessage::from_json(&text) {
                                Ok(msg) => self.dispatch_inbound(msg, &write).await?,
                                Err(e) => {
                                    // Malformed frame: log and drop, never
                                    // tear down the connection over it.
                                    warn!(?e, "Failed to parse message");
                                }
                            }
                        }
                        Ok(WsMessage::Ping(data)) => {
                            let mut writer = write.lock().await;
                            writer.send(WsMessage::Pong(data)).await?;
                        }
                        Ok(WsMessage::Pong(_)) => {
                            debug!("Received pong");
                        }
                        Ok(WsMessage::Close(frame)) => {
                            info!(?frame, "Received close frame");
                            return Ok(LoopEnd::Closed);
                        }
                        Ok(WsMessage::Binary(_)) => {
                            warn!("Received unexpected binary message");
                        }
                        Ok(WsMessage::Frame(_)) => {
                            // Raw frame, ignore
                        }
                        Err(e) => {
                            error!(?e, "WebSocket error");
                            return Err(ShadowError::from(e));
                        }
                    }
                }

                // Send periodic pings
                _ = ping_interval.tick() => {
                    let mut writer = write.lock().await;
                    writer.send(WsMessage::Ping(vec![].into())).await?;
                    debug!("Sent ping");
                }

                // Check for shutdown
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, closing connection");
                    let mut writer = write.lock().await;
                    let _ = writer.send(WsMessage::Close(None)).await;
                    return Ok(LoopEnd::Shutdown);
                }
            }
        }
    }

    /// Routes a parsed inbound message.
    async fn dispatch_inbound(
        &self,
        msg: ShadowMessage,
        write: &Arc<Mutex<futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>>>,
    ) -> ShadowResult<()> {
        debug!(msg_type = %msg.type_name(), "Received message");

        match msg {
            ShadowMessage::Ping { timestamp } => {
                let pong = ShadowMessage::pong(&timestamp).to_json()?;
                let mut writer = write.lock().await;
                writer.send(WsMessage::Text(pong.into())).await?;
            }
            ShadowMessage::Pong { .. } => {
                debug!("Received protocol pong");
            }
            ShadowMessage::Error { code, message } => {
                warn!(code = %code, message = %message, "Received error from endpoint");
            }
            outcome => {
                if let Some(event) = outcome.into_event() {
                    if self.event_tx.send(event).await.is_err() {
                        warn!("Event receiver dropped");
                        return Err(ShadowError::ChannelError("Receiver dropped".into()));
                    }
                } else {
                    debug!("Unhandled message type");
                }
            }
        }

        Ok(())
    }

    /// Creates the exponential backoff configuration.
    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.config.initial_backoff,
            max_interval: self.config.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None, // No limit on total time
            ..Default::default()
        }
    }
}
