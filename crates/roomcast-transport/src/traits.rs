//! Transport abstraction traits for roomcast.
//!
//! These traits define the interface that all transport implementations must
//! provide, so the relay loop and the client never depend on a concrete
//! socket type.

use async_trait::async_trait;
use roomcast_protocol::Frame;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Could not establish a connection.
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] roomcast_protocol::ProtocolError),
}

impl TransportError {
    /// Whether the connection can keep going after this error.
    ///
    /// A malformed frame only loses that frame; everything else ends the
    /// connection.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransportError::Protocol(_))
    }
}

/// A transport that can accept connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Accept a new connection.
    ///
    /// This method waits until a new connection is available or an error
    /// occurs.
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError>;

    /// Get the transport name (e.g., "websocket", "memory").
    fn name(&self) -> &'static str;

    /// Check if the transport is healthy.
    fn is_healthy(&self) -> bool {
        true
    }
}

/// Client side of a transport: opens new connections to a relay.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new connection.
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError>;

    /// Human-readable description of the target, for logs.
    fn target(&self) -> String;
}

/// An active connection over a transport.
///
/// Connections handle the bidirectional flow of frames between the relay
/// and a single client. `recv` must be cancel-safe so it can sit in a
/// `select!` next to other work.
#[async_trait]
pub trait Connection: Send {
    /// Receive the next frame from the connection.
    ///
    /// Returns `None` if the connection is closed cleanly.
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError>;

    /// Send a frame to the connection.
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_errors_are_recoverable() {
        let err: TransportError = roomcast_protocol::codec::decode_text("{}")
            .unwrap_err()
            .into();
        assert!(err.is_recoverable());
        assert!(!TransportError::ConnectionClosed.is_recoverable());
    }
}
