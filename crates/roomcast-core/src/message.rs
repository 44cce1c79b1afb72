//! Construction of relay-side chat messages.
//!
//! Message ids, sender ids, and timestamps are always assigned here, never
//! taken from the client payload.

use crate::registry::ConnectionId;
use roomcast_protocol::{ChatMessage, RoomId};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// A message as handed to each recipient's inbox.
///
/// One allocation is shared by every member of the room.
pub type Delivery = Arc<ChatMessage>;

/// Generate a unique message ID.
#[must_use]
pub fn generate_message_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current relay time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Build the envelope for a validated send request.
///
/// `text` must already be trimmed and non-empty. A display name that is
/// blank after trimming is dropped.
#[must_use]
pub fn compose(
    sender: &ConnectionId,
    room: &RoomId,
    text: &str,
    from_name: Option<&str>,
) -> ChatMessage {
    let from_name = from_name
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string);

    ChatMessage {
        id: generate_message_id(),
        conversation_id: room.to_string(),
        from: sender.to_string(),
        from_name,
        text: text.to_string(),
        ts: now_millis(),
    }
}
