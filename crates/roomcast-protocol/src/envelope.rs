//! Message envelope and acknowledgment types.
//!
//! These are the payloads shared by the relay and its clients: the chat
//! message pushed to every room member, and the acknowledgment returned
//! for each join/leave/send request.

use serde::{Deserialize, Serialize};

/// A chat message as delivered to room members.
///
/// Every field except `from_name` is assigned by the relay. The envelope is
/// never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Relay-generated message identifier.
    pub id: String,
    /// Room the message was sent to.
    pub conversation_id: String,
    /// Connection identifier of the sender.
    pub from: String,
    /// Advisory display name supplied by the sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_name: Option<String>,
    /// Message text, trimmed and non-empty.
    pub text: String,
    /// Relay creation time in milliseconds since the Unix epoch.
    pub ts: u64,
}

/// Result of a single join, leave, or send request.
///
/// Serialized as `{"ok": true}` or `{"ok": false, "error": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "AckRepr", try_from = "AckRepr")]
pub enum Ack {
    /// The request succeeded.
    Ok,
    /// The request failed with a reason.
    Err(String),
}

impl Ack {
    /// Create a failed acknowledgment.
    #[must_use]
    pub fn error(reason: impl Into<String>) -> Self {
        Ack::Err(reason.into())
    }

    /// Whether the request succeeded.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Ack::Ok)
    }

    /// The failure reason, if any.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Ack::Ok => None,
            Ack::Err(reason) => Some(reason),
        }
    }
}

impl<E: std::fmt::Display> From<Result<(), E>> for Ack {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Ack::Ok,
            Err(e) => Ack::Err(e.to_string()),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct AckRepr {
    ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<Ack> for AckRepr {
    fn from(ack: Ack) -> Self {
        match ack {
            Ack::Ok => AckRepr {
                ok: true,
                error: None,
            },
            Ack::Err(reason) => AckRepr {
                ok: false,
                error: Some(reason),
            },
        }
    }
}

impl TryFrom<AckRepr> for Ack {
    type Error = &'static str;

    fn try_from(repr: AckRepr) -> Result<Self, Self::Error> {
        match (repr.ok, repr.error) {
            (true, _) => Ok(Ack::Ok),
            (false, Some(reason)) => Ok(Ack::Err(reason)),
            (false, None) => Err("failed ack without error reason"),
        }
    }
}
