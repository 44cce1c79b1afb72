//! Client error types.

use roomcast_transport::TransportError;
use thiserror::Error;

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No relay connection is currently established.
    #[error("not connected")]
    NotConnected,

    /// The connection dropped before the request was acknowledged.
    #[error("disconnected before acknowledgment")]
    Disconnected,

    /// No acknowledgment arrived in time.
    #[error("request timed out")]
    Timeout,

    /// Room id missing or blank.
    #[error("conversationId missing")]
    InvalidRoom,

    /// The relay answered with a failed acknowledgment.
    #[error("rejected: {0}")]
    Rejected(String),

    /// Soft-login display name too short.
    #[error("display name must be at least {0} characters")]
    NameTooShort(usize),

    /// The client has been shut down.
    #[error("client shut down")]
    Shutdown,

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
