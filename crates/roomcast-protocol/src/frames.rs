//! Frame types for the roomcast protocol.
//!
//! Frames are the fundamental unit of communication between clients and the
//! relay. The same frame serializes to MessagePack for binary transports and
//! to JSON for text transports.

use serde::{Deserialize, Deserializer, Serialize};

use crate::envelope::{Ack, ChatMessage};

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Join,
    Leave,
    Send,
    Ack,
    MessageNew,
    Ping,
    Pong,
    Connected,
}

impl FrameType {
    /// The `type` tag used on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FrameType::Join => "conversation:join",
            FrameType::Leave => "conversation:leave",
            FrameType::Send => "message:send",
            FrameType::Ack => "ack",
            FrameType::MessageNew => "message:new",
            FrameType::Ping => "ping",
            FrameType::Pong => "pong",
            FrameType::Connected => "connected",
        }
    }

    /// Whether the frame is a request that must be acknowledged.
    #[must_use]
    pub fn is_request(self) -> bool {
        matches!(self, FrameType::Join | FrameType::Leave | FrameType::Send)
    }
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol frame.
///
/// Requests (`conversation:join`, `conversation:leave`, `message:send`) carry
/// a client-chosen `id` which the relay echoes in exactly one `ack` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Join a room.
    #[serde(rename = "conversation:join")]
    Join {
        /// Request ID for acknowledgment.
        id: u64,
        /// Room to join.
        #[serde(rename = "conversationId", default, deserialize_with = "null_as_empty")]
        conversation_id: String,
    },

    /// Leave a room.
    #[serde(rename = "conversation:leave")]
    Leave {
        /// Request ID for acknowledgment.
        id: u64,
        /// Room to leave.
        #[serde(rename = "conversationId", default, deserialize_with = "null_as_empty")]
        conversation_id: String,
    },

    /// Send a text message to a room.
    #[serde(rename = "message:send")]
    Send {
        /// Request ID for acknowledgment.
        id: u64,
        /// Target room.
        #[serde(rename = "conversationId", default, deserialize_with = "null_as_empty")]
        conversation_id: String,
        /// Message text.
        #[serde(default, deserialize_with = "null_as_empty")]
        text: String,
        /// Optional display name of the sender.
        #[serde(
            rename = "fromName",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        from_name: Option<String>,
    },

    /// Acknowledgment of a request.
    #[serde(rename = "ack")]
    Ack {
        /// ID of the acknowledged request.
        id: u64,
        /// Outcome of the request.
        ack: Ack,
    },

    /// A message pushed to every member of a room.
    #[serde(rename = "message:new")]
    MessageNew {
        /// The delivered message.
        message: ChatMessage,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        /// Optional timestamp.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        /// Echoed timestamp from ping.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// First frame sent by the relay on a new connection.
    #[serde(rename = "connected")]
    Connected {
        /// Identifier the relay assigned to this connection.
        #[serde(rename = "connectionId")]
        connection_id: String,
        /// Protocol major version spoken by the relay.
        version: u8,
        /// Heartbeat interval in milliseconds.
        heartbeat: u32,
    },
}

/// Missing or `null` request fields decode as empty, so the request is
/// still answered with a validation ack.
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Join { .. } => FrameType::Join,
            Frame::Leave { .. } => FrameType::Leave,
            Frame::Send { .. } => FrameType::Send,
            Frame::Ack { .. } => FrameType::Ack,
            Frame::MessageNew { .. } => FrameType::MessageNew,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
            Frame::Connected { .. } => FrameType::Connected,
        }
    }

    /// The request ID, for frames that carry one.
    #[must_use]
    pub fn request_id(&self) -> Option<u64> {
        match self {
            Frame::Join { id, .. }
            | Frame::Leave { id, .. }
            | Frame::Send { id, .. }
            | Frame::Ack { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// Create a new Join frame.
    #[must_use]
    pub fn join(id: u64, conversation_id: impl Into<String>) -> Self {
        Frame::Join {
            id,
            conversation_id: conversation_id.into(),
        }
    }

    /// Create a new Leave frame.
    #[must_use]
    pub fn leave(id: u64, conversation_id: impl Into<String>) -> Self {
        Frame::Leave {
            id,
            conversation_id: conversation_id.into(),
        }
    }

    /// Create a new Send frame.
    #[must_use]
    pub fn send(
        id: u64,
        conversation_id: impl Into<String>,
        text: impl Into<String>,
        from_name: Option<String>,
    ) -> Self {
        Frame::Send {
            id,
            conversation_id: conversation_id.into(),
            text: text.into(),
            from_name,
        }
    }

    /// Create a new Ack frame.
    #[must_use]
    pub fn ack(id: u64, ack: Ack) -> Self {
        Frame::Ack { id, ack }
    }

    /// Create a new MessageNew frame.
    #[must_use]
    pub fn message_new(message: ChatMessage) -> Self {
        Frame::MessageNew { message }
    }

    /// Create a new Ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping { timestamp: None }
    }

    /// Create a new Ping frame with timestamp.
    #[must_use]
    pub fn ping_with_timestamp(timestamp: u64) -> Self {
        Frame::Ping {
            timestamp: Some(timestamp),
        }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }

    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, version: u8, heartbeat: u32) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            version,
            heartbeat,
        }
    }
}
