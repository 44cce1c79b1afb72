//! Per-connection request handling.
//!
//! A [`Session`] is created when a transport connection is accepted and
//! answers every join/leave/send request with exactly one [`Ack`]. Failures,
//! including panics inside a request, are reported through that ack and never
//! tear the connection down. Dropping the session unregisters the
//! connection.

use crate::message::compose;
use crate::registry::{ConnectionId, Inbox};
use crate::relay::{Relay, RelayError};
use roomcast_protocol::{Ack, Frame, RoomId};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// Lifecycle of a connection's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Registered and accepting requests.
    Connected,
    /// Unregistered; terminal.
    Disconnected,
}

/// Request handler for one connection.
pub struct Session {
    id: ConnectionId,
    relay: Arc<Relay>,
    state: SessionState,
}

impl Session {
    /// Register a new connection with the relay.
    ///
    /// Returns the session and the inbox on which room messages for this
    /// connection are delivered.
    pub fn open(relay: Arc<Relay>) -> (Self, Inbox) {
        let (id, inbox) = relay.register();
        debug!(connection = %id, "Session opened");
        (
            Self {
                id,
                relay,
                state: SessionState::Connected,
            },
            inbox,
        )
    }

    /// The connection's id.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Join a room.
    pub fn request_join(&self, conversation_id: &str) -> Ack {
        self.guarded("join", || {
            let room = parse_room(conversation_id)?;
            self.relay.join(&self.id, &room)
        })
    }

    /// Leave a room.
    pub fn request_leave(&self, conversation_id: &str) -> Ack {
        self.guarded("leave", || {
            let room = parse_room(conversation_id)?;
            self.relay.leave(&self.id, &room)
        })
    }

    /// Send a message to every member of a room.
    ///
    /// The acknowledgment goes to the caller only; the message itself
    /// reaches every member, the sender included, through their inboxes.
    pub fn request_send(&self, conversation_id: &str, text: &str, from_name: Option<&str>) -> Ack {
        self.guarded("send", || {
            let room = parse_room(conversation_id)?;
            let text = text.trim();
            if text.is_empty() {
                return Err(RelayError::EmptyMessage);
            }

            let message = compose(&self.id, &room, text, from_name);
            let recipients = self.relay.broadcast(&room, message);
            debug!(connection = %self.id, room = %room, recipients, "Message sent");
            Ok(())
        })
    }

    /// Handle one inbound frame, returning the reply to send back, if any.
    pub fn handle_frame(&mut self, frame: Frame) -> Option<Frame> {
        match frame {
            Frame::Join {
                id,
                conversation_id,
            } => Some(Frame::ack(id, self.request_join(&conversation_id))),

            Frame::Leave {
                id,
                conversation_id,
            } => Some(Frame::ack(id, self.request_leave(&conversation_id))),

            Frame::Send {
                id,
                conversation_id,
                text,
                from_name,
            } => Some(Frame::ack(
                id,
                self.request_send(&conversation_id, &text, from_name.as_deref()),
            )),

            Frame::Ping { timestamp } => Some(Frame::pong(timestamp)),

            Frame::Pong { .. } => {
                trace!(connection = %self.id, "Pong");
                None
            }

            other => {
                warn!(connection = %self.id, frame_type = %other.frame_type(), "Unexpected frame type");
                None
            }
        }
    }

    /// Move to `Disconnected` and remove the connection from every room.
    ///
    /// Returns the rooms the connection was removed from. Calling this more
    /// than once is harmless.
    pub fn close(&mut self) -> Vec<RoomId> {
        if self.state == SessionState::Disconnected {
            return Vec::new();
        }
        self.state = SessionState::Disconnected;

        let rooms = self.relay.unregister(&self.id);
        debug!(connection = %self.id, rooms = rooms.len(), "Session closed");
        rooms
    }

    fn guarded<F>(&self, op: &'static str, request: F) -> Ack
    where
        F: FnOnce() -> Result<(), RelayError>,
    {
        if self.state == SessionState::Disconnected {
            return Ack::error(RelayError::ConnectionClosed.to_string());
        }

        match panic::catch_unwind(AssertUnwindSafe(request)) {
            Ok(Ok(())) => Ack::Ok,
            Ok(Err(e)) => {
                debug!(connection = %self.id, op, error = %e, "Request rejected");
                Ack::error(e.to_string())
            }
            Err(payload) => {
                let reason = panic_reason(payload.as_ref());
                error!(connection = %self.id, op, reason = %reason, "Request handler panicked");
                Ack::Err(reason)
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

fn parse_room(raw: &str) -> Result<RoomId, RelayError> {
    RoomId::parse(raw).ok_or(RelayError::MissingConversationId)
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(reason) = payload.downcast_ref::<&str>() {
        (*reason).to_string()
    } else if let Some(reason) = payload.downcast_ref::<String>() {
        reason.clone()
    } else {
        RelayError::Internal("request handler panicked".to_string()).to_string()
    }
}
