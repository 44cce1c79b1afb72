//! Relay client with automatic reconnection.
//!
//! [`RelayClient::start`] spawns a background transport loop that owns the
//! connection and returns a handle plus a bounded event receiver. Requests
//! are queued to the loop over an unbounded channel and resolved through a
//! `oneshot` once the matching ack arrives. When the connection drops the
//! loop waits [`ClientConfig::reconnect_delay`] and dials again; room
//! membership is not restored here (see [`ChatSession`](crate::ChatSession)).

use crate::error::{ClientError, Result};
use roomcast_protocol::{Ack, ChatMessage, Frame, RoomId, Version, PROTOCOL_VERSION};
use roomcast_transport::{Connection, Connector};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, trace, warn};

/// Default relay url.
pub const DEFAULT_URL: &str = "ws://127.0.0.1:3000/ws";

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay websocket url.
    pub url: String,
    /// Pause between a dropped connection and the next attempt.
    pub reconnect_delay: Duration,
    /// How long a request (and the connect handshake) may wait.
    pub request_timeout: Duration,
    /// Capacity of the event channel. Clamped to at least 1.
    pub event_channel_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            reconnect_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
            event_channel_capacity: 256,
        }
    }
}

impl ClientConfig {
    /// Defaults, with the url taken from `ROOMCAST_URL` when set.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("ROOMCAST_URL") {
            config.url = url;
        }
        config
    }

    /// Set the reconnect delay.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the event channel capacity.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }
}

/// Connectivity changes and pushed messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A connection is up.
    Connected {
        /// Relay-assigned connection id.
        connection_id: String,
    },
    /// The connection dropped; a new attempt follows.
    Disconnected,
    /// A connection attempt failed.
    ConnectError {
        /// Why it failed.
        reason: String,
    },
    /// A `message:new` push.
    Message(ChatMessage),
}

enum Command {
    Request {
        frame: Frame,
        reply: oneshot::Sender<Result<Ack>>,
    },
    Shutdown,
}

#[derive(Default)]
struct ClientState {
    connected: AtomicBool,
    connection_id: Mutex<Option<String>>,
}

/// Handle to the background transport loop.
pub struct RelayClient {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state: Arc<ClientState>,
    next_id: AtomicU64,
    request_timeout: Duration,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl RelayClient {
    /// Start the transport loop and return a handle plus event receiver.
    ///
    /// The loop dials immediately and keeps reconnecting until
    /// [`shutdown`](Self::shutdown) is called or the handle is dropped.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start<C>(connector: C, config: ClientConfig) -> (Self, mpsc::Receiver<ClientEvent>)
    where
        C: Connector + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity.max(1));
        let state = Arc::new(ClientState::default());

        let task = tokio::spawn(transport_loop(
            connector,
            config.clone(),
            cmd_rx,
            event_tx,
            Arc::clone(&state),
        ));

        let client = Self {
            cmd_tx,
            state,
            next_id: AtomicU64::new(1),
            request_timeout: config.request_timeout,
            task: Some(task),
        };

        (client, event_rx)
    }

    /// Join a room.
    ///
    /// # Errors
    ///
    /// Fails if there is no connection or no ack arrives in time. A failed
    /// ack is returned as `Ok(Ack::Err(..))`.
    pub async fn join(&self, room: &RoomId) -> Result<Ack> {
        let id = self.request_id();
        self.request(Frame::join(id, room.as_str())).await
    }

    /// Leave a room.
    ///
    /// # Errors
    ///
    /// Same as [`join`](Self::join).
    pub async fn leave(&self, room: &RoomId) -> Result<Ack> {
        let id = self.request_id();
        self.request(Frame::leave(id, room.as_str())).await
    }

    /// Send text to a room.
    ///
    /// # Errors
    ///
    /// Same as [`join`](Self::join).
    pub async fn send(&self, room: &RoomId, text: &str, from_name: Option<&str>) -> Result<Ack> {
        let id = self.request_id();
        let frame = Frame::send(id, room.as_str(), text, from_name.map(str::to_string));
        self.request(frame).await
    }

    /// Whether a connection is currently up.
    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Acquire)
    }

    /// The relay-assigned id of the current connection.
    pub async fn connection_id(&self) -> Option<String> {
        self.state.connection_id.lock().await.clone()
    }

    /// Stop the transport loop, closing the connection.
    pub async fn shutdown(&mut self) {
        debug!("Client shutdown requested");
        let _ = self.cmd_tx.send(Command::Shutdown);

        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(self.request_timeout, &mut task).await.is_err() {
                warn!("Transport loop did not exit in time; aborting");
                task.abort();
            }
        }
        self.state.connected.store(false, Ordering::Release);
    }

    fn request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn request(&self, frame: Frame) -> Result<Ack> {
        let (reply, response) = oneshot::channel();
        self.cmd_tx
            .send(Command::Request { frame, reply })
            .map_err(|_| ClientError::Shutdown)?;

        match tokio::time::timeout(self.request_timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::Disconnected),
            Err(_) => Err(ClientError::Timeout),
        }
    }
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("connected", &self.is_connected())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

enum Exit {
    Dropped,
    Shutdown,
}

async fn transport_loop<C: Connector>(
    connector: C,
    config: ClientConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::Sender<ClientEvent>,
    state: Arc<ClientState>,
) {
    debug!(relay = %connector.target(), "Transport loop started");

    loop {
        let attempt = open(&connector, config.request_timeout);
        let Some(opened) = refuse_while(attempt, &mut cmd_rx).await else {
            break;
        };

        match opened {
            Ok((conn, connection_id)) => {
                info!(connection = %connection_id, "Connected to relay");
                state.connected.store(true, Ordering::Release);
                *state.connection_id.lock().await = Some(connection_id.clone());
                emit(&event_tx, ClientEvent::Connected { connection_id }).await;

                let exit = run_connection(conn, &mut cmd_rx, &event_tx).await;

                state.connected.store(false, Ordering::Release);
                *state.connection_id.lock().await = None;
                emit(&event_tx, ClientEvent::Disconnected).await;

                if let Exit::Shutdown = exit {
                    break;
                }
            }
            Err(reason) => {
                warn!(%reason, "Connect failed");
                emit(&event_tx, ClientEvent::ConnectError { reason }).await;
            }
        }

        let pause = tokio::time::sleep(config.reconnect_delay);
        if refuse_while(pause, &mut cmd_rx).await.is_none() {
            break;
        }
    }

    debug!("Transport loop exited");
}

/// Dial and wait for the relay's `connected` greeting.
async fn open<C: Connector>(
    connector: &C,
    handshake_timeout: Duration,
) -> std::result::Result<(Box<dyn Connection>, String), String> {
    let mut conn = connector.connect().await.map_err(|e| e.to_string())?;

    let greeting = tokio::time::timeout(handshake_timeout, conn.recv())
        .await
        .map_err(|_| "handshake timed out".to_string())?
        .map_err(|e| e.to_string())?;

    match greeting {
        Some(Frame::Connected {
            connection_id,
            version,
            ..
        }) => {
            if !PROTOCOL_VERSION.is_compatible_with(&Version::from_major(version)) {
                let _ = conn.close().await;
                return Err(format!(
                    "incompatible protocol version {} (client speaks {})",
                    version, PROTOCOL_VERSION.major
                ));
            }
            Ok((conn, connection_id))
        }
        Some(other) => Err(format!("unexpected {} frame during handshake", other.frame_type())),
        None => Err("connection closed during handshake".to_string()),
    }
}

/// Drive `work` to completion while answering requests with `NotConnected`.
///
/// Returns `None` if shutdown was requested first.
async fn refuse_while<F: std::future::Future>(
    work: F,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
) -> Option<F::Output> {
    tokio::pin!(work);
    loop {
        tokio::select! {
            output = &mut work => return Some(output),
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Request { reply, .. }) => {
                    let _ = reply.send(Err(ClientError::NotConnected));
                }
                Some(Command::Shutdown) | None => return None,
            },
        }
    }
}

enum Step {
    Command(Option<Command>),
    Incoming(std::result::Result<Option<Frame>, roomcast_transport::TransportError>),
}

async fn run_connection(
    mut conn: Box<dyn Connection>,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    event_tx: &mpsc::Sender<ClientEvent>,
) -> Exit {
    let mut pending: HashMap<u64, oneshot::Sender<Result<Ack>>> = HashMap::new();

    let exit = loop {
        let step = tokio::select! {
            cmd = cmd_rx.recv() => Step::Command(cmd),
            incoming = conn.recv() => Step::Incoming(incoming),
        };

        match step {
            Step::Command(Some(Command::Request { frame, reply })) => {
                let id = frame.request_id();
                match conn.send(frame).await {
                    Ok(()) => {
                        if let Some(id) = id {
                            pending.insert(id, reply);
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Send failed");
                        let _ = reply.send(Err(e.into()));
                        break Exit::Dropped;
                    }
                }
            }

            Step::Command(Some(Command::Shutdown)) | Step::Command(None) => {
                let _ = conn.close().await;
                break Exit::Shutdown;
            }

            Step::Incoming(Ok(Some(frame))) => match frame {
                Frame::Ack { id, ack } => match pending.remove(&id) {
                    Some(reply) => {
                        let _ = reply.send(Ok(ack));
                    }
                    None => warn!(id, "Ack for unknown request"),
                },
                Frame::MessageNew { message } => {
                    emit_message(event_tx, message);
                }
                Frame::Ping { timestamp } => {
                    if conn.send(Frame::pong(timestamp)).await.is_err() {
                        break Exit::Dropped;
                    }
                }
                Frame::Pong { .. } => trace!("Pong"),
                other => {
                    warn!(frame_type = %other.frame_type(), "Unexpected frame type");
                }
            },

            Step::Incoming(Ok(None)) => {
                debug!("Connection closed by relay");
                break Exit::Dropped;
            }

            Step::Incoming(Err(e)) if e.is_recoverable() => {
                warn!(error = %e, "Dropping malformed frame");
            }

            Step::Incoming(Err(e)) => {
                warn!(error = %e, "Connection failed");
                break Exit::Dropped;
            }
        }
    };

    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(ClientError::Disconnected));
    }
    exit
}

/// Lifecycle events must not be lost, so they wait for room.
async fn emit(event_tx: &mpsc::Sender<ClientEvent>, event: ClientEvent) {
    if event_tx.send(event).await.is_err() {
        debug!("Event channel closed, receiver dropped");
    }
}

fn emit_message(event_tx: &mpsc::Sender<ClientEvent>, message: ChatMessage) {
    match event_tx.try_send(ClientEvent::Message(message)) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("Event channel full, dropping message");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("Event channel closed, receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomcast_transport::memory::{self, MemoryListener};
    use roomcast_transport::Transport;

    fn config() -> ClientConfig {
        ClientConfig::default()
            .with_reconnect_delay(Duration::from_millis(50))
            .with_request_timeout(Duration::from_secs(2))
    }

    fn room(id: &str) -> RoomId {
        RoomId::parse(id).unwrap()
    }

    async fn accept(listener: &MemoryListener, id: &str, version: u8) -> Box<dyn Connection> {
        let mut conn = listener.accept().await.unwrap();
        conn.send(Frame::connected(id, version, 30_000)).await.unwrap();
        conn
    }

    #[tokio::test]
    async fn test_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.url, DEFAULT_URL);
        assert_eq!(config.reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.event_channel_capacity, 256);
    }

    #[tokio::test]
    async fn test_request_resolves_with_matching_ack() {
        let (listener, connector) = memory::listener();
        let (client, mut events) = RelayClient::start(connector, config());

        let mut server = accept(&listener, "conn_1", PROTOCOL_VERSION.major).await;
        assert_eq!(
            events.recv().await,
            Some(ClientEvent::Connected {
                connection_id: "conn_1".to_string()
            })
        );
        assert!(client.is_connected());
        assert_eq!(client.connection_id().await.as_deref(), Some("conn_1"));

        let relay = tokio::spawn(async move {
            let frame = server.recv().await.unwrap().unwrap();
            let id = frame.request_id().unwrap();
            assert_eq!(frame, Frame::join(id, "general"));
            server.send(Frame::ack(id, Ack::error("nope"))).await.unwrap();
            server
        });

        assert_eq!(client.join(&room("general")).await.unwrap(), Ack::error("nope"));
        relay.await.unwrap();
    }

    #[tokio::test]
    async fn test_messages_and_pings() {
        let (listener, connector) = memory::listener();
        let (_client, mut events) = RelayClient::start(connector, config());

        let mut server = accept(&listener, "conn_1", PROTOCOL_VERSION.major).await;
        events.recv().await.unwrap();

        server.send(Frame::ping_with_timestamp(9)).await.unwrap();
        assert_eq!(server.recv().await.unwrap(), Some(Frame::pong(Some(9))));

        let message = ChatMessage {
            id: "m1".to_string(),
            conversation_id: "general".to_string(),
            from: "conn_2".to_string(),
            from_name: None,
            text: "hi".to_string(),
            ts: 1,
        };
        server.send(Frame::message_new(message.clone())).await.unwrap();
        assert_eq!(events.recv().await, Some(ClientEvent::Message(message)));
    }

    #[tokio::test]
    async fn test_pending_requests_fail_on_disconnect_and_client_reconnects() {
        let (listener, connector) = memory::listener();
        let (client, mut events) = RelayClient::start(connector, config());

        let server = accept(&listener, "conn_1", PROTOCOL_VERSION.major).await;
        events.recv().await.unwrap();

        let dropper = tokio::spawn(async move {
            let mut server = server;
            // Swallow the request, then hang up.
            server.recv().await.unwrap();
            drop(server);
        });

        assert!(matches!(
            client.join(&room("general")).await,
            Err(ClientError::Disconnected)
        ));
        dropper.await.unwrap();
        assert_eq!(events.recv().await, Some(ClientEvent::Disconnected));
        assert!(!client.is_connected());

        let _server = accept(&listener, "conn_2", PROTOCOL_VERSION.major).await;
        assert_eq!(
            events.recv().await,
            Some(ClientEvent::Connected {
                connection_id: "conn_2".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_requests_refused_while_disconnected() {
        let (listener, connector) = memory::listener();
        drop(listener);
        let (client, mut events) = RelayClient::start(connector, config());

        assert!(matches!(
            events.recv().await,
            Some(ClientEvent::ConnectError { .. })
        ));
        assert!(matches!(
            client.send(&room("general"), "hi", None).await,
            Err(ClientError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_incompatible_version_is_a_connect_error() {
        let (listener, connector) = memory::listener();
        let (_client, mut events) = RelayClient::start(connector, config());

        let _server = accept(&listener, "conn_1", PROTOCOL_VERSION.major + 1).await;
        match events.recv().await {
            Some(ClientEvent::ConnectError { reason }) => {
                assert!(reason.contains("incompatible protocol version"));
            }
            other => panic!("expected connect error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let (listener, connector) = memory::listener();
        let (mut client, mut events) = RelayClient::start(connector, config());

        let mut server = accept(&listener, "conn_1", PROTOCOL_VERSION.major).await;
        events.recv().await.unwrap();

        client.shutdown().await;
        assert_eq!(events.recv().await, Some(ClientEvent::Disconnected));
        assert_eq!(events.recv().await, None);
        assert_eq!(server.recv().await.unwrap(), None);
        assert!(matches!(
            client.join(&room("general")).await,
            Err(ClientError::Shutdown)
        ));
    }
}
