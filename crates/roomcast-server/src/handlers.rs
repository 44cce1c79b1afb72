//! Connection handlers for the roomcast relay.
//!
//! This module wires the HTTP routes and drives each accepted connection:
//! one task per connection selects over its delivery inbox, inbound frames
//! and a heartbeat ticker.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use roomcast_core::message::now_millis;
use roomcast_core::{Delivery, Relay, RelayConfig, Session};
use roomcast_protocol::{Ack, Frame, PROTOCOL_VERSION};
use roomcast_transport::{AxumConnection, Connection, TransportError};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Shared server state.
pub struct AppState {
    /// The relay shared by every connection.
    pub relay: Arc<Relay>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let relay_config = RelayConfig {
            prune_empty_rooms: config.relay.prune_empty_rooms,
        };

        Self {
            relay: Arc::new(Relay::with_config(relay_config)),
            config,
        }
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            warn!("Failed to start metrics server: {:#}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    run_with_listener(listener, Arc::new(AppState::new(config))).await
}

/// Serve on an already bound listener.
///
/// # Errors
///
/// Returns an error if the server stops with an I/O error.
pub async fn run_with_listener(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let addr = listener.local_addr()?;
    info!("roomcast relay listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, state.config.transport.websocket_path
    );

    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "ok": true }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let max_message_size = state.config.limits.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| {
            let conn = AxumConnection::new(socket, Some(addr), max_message_size);
            serve_connection(Box::new(conn), state)
        })
}

enum Step {
    Deliver(Delivery),
    Inbound(Result<Option<Frame>, TransportError>),
    Heartbeat,
}

/// Drive one connection until it closes.
///
/// Registers the connection, announces it with a `connected` frame, then
/// answers requests, forwards room messages and keeps the heartbeat. On
/// exit the connection is removed from every room.
pub async fn serve_connection(mut conn: Box<dyn Connection>, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let (mut session, mut inbox) = Session::open(state.relay.clone());
    let connection_id = session.id().clone();

    debug!(
        connection = %connection_id,
        remote = conn.remote_addr().as_deref().unwrap_or("unknown"),
        "Connection opened"
    );

    let heartbeat = &state.config.heartbeat;
    let connected = Frame::connected(
        connection_id.as_str(),
        PROTOCOL_VERSION.major,
        u32::try_from(heartbeat.interval_ms).unwrap_or(u32::MAX),
    );
    if let Err(e) = conn.send(connected).await {
        warn!(connection = %connection_id, error = %e, "Failed to send connected frame");
        session.close();
        return;
    }

    let interval = Duration::from_millis(heartbeat.interval_ms.max(1));
    let timeout = Duration::from_millis(heartbeat.timeout_ms);
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_seen = Instant::now();

    loop {
        let step = tokio::select! {
            biased;

            Some(delivery) = inbox.recv() => Step::Deliver(delivery),
            received = conn.recv() => Step::Inbound(received),
            _ = ticker.tick() => Step::Heartbeat,
        };

        match step {
            Step::Deliver(delivery) => {
                metrics::record_message("outbound");
                if let Err(e) = conn.send(Frame::message_new((*delivery).clone())).await {
                    debug!(connection = %connection_id, error = %e, "Delivery failed");
                    break;
                }
            }

            Step::Inbound(Ok(Some(frame))) => {
                last_seen = Instant::now();
                metrics::record_message("inbound");
                if matches!(frame, Frame::Join { .. }) {
                    metrics::record_join();
                }

                let start = Instant::now();
                let reply = session.handle_frame(frame);
                metrics::record_latency(start.elapsed().as_secs_f64());
                metrics::set_active_rooms(state.relay.stats().room_count);

                if let Some(reply) = reply {
                    if let Frame::Ack {
                        ack: Ack::Err(reason),
                        ..
                    } = &reply
                    {
                        metrics::record_ack_failure(reason);
                    }
                    if let Err(e) = conn.send(reply).await {
                        debug!(connection = %connection_id, error = %e, "Reply failed");
                        break;
                    }
                }
            }

            Step::Inbound(Ok(None)) => {
                debug!(connection = %connection_id, "Closed by peer");
                break;
            }

            Step::Inbound(Err(e)) if e.is_recoverable() => {
                last_seen = Instant::now();
                warn!(connection = %connection_id, error = %e, "Dropping malformed frame");
                metrics::record_error("protocol");
            }

            Step::Inbound(Err(e)) => {
                debug!(connection = %connection_id, error = %e, "Transport error");
                metrics::record_error("transport");
                break;
            }

            Step::Heartbeat => {
                if last_seen.elapsed() >= timeout {
                    info!(connection = %connection_id, "Heartbeat timeout");
                    break;
                }
                if conn.send(Frame::ping_with_timestamp(now_millis())).await.is_err() {
                    break;
                }
            }
        }
    }

    let rooms = session.close();
    let _ = conn.close().await;
    metrics::set_active_rooms(state.relay.stats().room_count);

    debug!(connection = %connection_id, rooms = rooms.len(), "Connection closed");
}
