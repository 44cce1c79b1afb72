//! Client-side room policy.
//!
//! [`SessionController`] is a plain state machine: it performs no I/O and
//! answers each input with the [`Directive`]s the caller must carry out
//! against the relay. It keeps at most one joined room, remembers it across
//! reconnects and filters incoming messages to that room.

use crate::error::{ClientError, Result};
use roomcast_protocol::{Ack, ChatMessage, RoomId};
use tracing::debug;

/// A relay request the controller wants issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Leave a room.
    Leave(RoomId),
    /// Join a room.
    Join(RoomId),
}

/// Room selection and message buffer for one user.
#[derive(Debug)]
pub struct SessionController {
    selected: RoomId,
    joined: Option<RoomId>,
    confirmed: bool,
    connected: bool,
    connection_id: Option<String>,
    messages: Vec<ChatMessage>,
    last_error: Option<String>,
}

impl SessionController {
    /// Create a controller with the default room selected and nothing
    /// joined.
    #[must_use]
    pub fn new() -> Self {
        Self {
            selected: RoomId::default(),
            joined: None,
            confirmed: false,
            connected: false,
            connection_id: None,
            messages: Vec::new(),
            last_error: None,
        }
    }

    /// Switch to a room.
    ///
    /// While connected this yields a leave for the previously joined room
    /// (if different) followed by a join for the new one. While disconnected
    /// the room is only recorded; the join goes out on the next connect.
    /// Either way the message buffer is cleared.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidRoom`] for a blank room id.
    pub fn select_room(&mut self, raw: &str) -> Result<Vec<Directive>> {
        let room = RoomId::parse(raw).ok_or(ClientError::InvalidRoom)?;

        let mut directives = Vec::new();
        if self.connected {
            if let Some(previous) = self.joined.as_ref().filter(|prev| **prev != room) {
                directives.push(Directive::Leave(previous.clone()));
            }
            directives.push(Directive::Join(room.clone()));
        }

        debug!(room = %room, connected = self.connected, "Selecting room");
        self.selected = room.clone();
        self.joined = Some(room);
        self.confirmed = false;
        self.messages.clear();

        Ok(directives)
    }

    /// A connection was established.
    ///
    /// The relay has no memory of earlier connections, so a previously
    /// joined room is joined again.
    pub fn on_connected(&mut self, connection_id: impl Into<String>) -> Vec<Directive> {
        self.connected = true;
        self.confirmed = false;
        self.connection_id = Some(connection_id.into());
        self.last_error = None;

        self.joined
            .iter()
            .cloned()
            .map(Directive::Join)
            .collect()
    }

    /// The connection dropped. The joined room is kept but no longer
    /// confirmed.
    pub fn on_disconnected(&mut self) {
        self.connected = false;
        self.confirmed = false;
        self.connection_id = None;
    }

    /// A connection attempt failed.
    pub fn on_connect_error(&mut self, reason: impl Into<String>) {
        self.on_disconnected();
        self.last_error = Some(reason.into());
    }

    /// Record the acknowledgment of a join.
    pub fn on_join_ack(&mut self, room: &RoomId, ack: &Ack) {
        match ack.error_message() {
            None if self.joined.as_ref() == Some(room) => self.confirmed = true,
            None => {}
            Some(reason) => self.last_error = Some(reason.to_string()),
        }
    }

    /// Record any other acknowledgment; only failures matter.
    pub fn on_ack(&mut self, ack: &Ack) {
        if let Some(reason) = ack.error_message() {
            self.last_error = Some(reason.to_string());
        }
    }

    /// Record a request that never got an acknowledgment.
    pub fn on_request_error(&mut self, error: &ClientError) {
        self.last_error = Some(error.to_string());
    }

    /// Offer an incoming message.
    ///
    /// Returns `true` if it belongs to the joined room (or no room is
    /// joined) and was buffered.
    pub fn on_message(&mut self, message: ChatMessage) -> bool {
        if let Some(joined) = &self.joined {
            if message.conversation_id != joined.as_str() {
                return false;
            }
        }
        self.messages.push(message);
        true
    }

    /// Prepare outgoing text: trimmed, and only when a room is joined.
    #[must_use]
    pub fn outgoing(&self, text: &str) -> Option<(RoomId, String)> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        self.joined.clone().map(|room| (room, text.to_string()))
    }

    /// Whether a message was sent by this connection.
    #[must_use]
    pub fn is_mine(&self, message: &ChatMessage) -> bool {
        self.connection_id.as_deref() == Some(message.from.as_str())
    }

    /// Connected, and the relay has acknowledged the join.
    #[must_use]
    pub fn is_active_member(&self) -> bool {
        self.connected && self.confirmed && self.joined.is_some()
    }

    /// Forget the joined room and buffered messages.
    ///
    /// Returns a leave for the joined room while connected.
    pub fn logout(&mut self) -> Vec<Directive> {
        let directives = match (self.connected, self.joined.take()) {
            (true, Some(room)) => vec![Directive::Leave(room)],
            _ => Vec::new(),
        };
        self.confirmed = false;
        self.messages.clear();
        directives
    }

    /// Drop buffered messages.
    pub fn clear_messages(&mut self) {
        self.messages.clear();
    }

    /// The room shown as active: the joined one, else the selected one.
    #[must_use]
    pub fn active_room(&self) -> &RoomId {
        self.joined.as_ref().unwrap_or(&self.selected)
    }

    /// The last room picked by the user.
    #[must_use]
    pub fn selected(&self) -> &RoomId {
        &self.selected
    }

    /// The room the user is (or wants to be) a member of.
    #[must_use]
    pub fn joined(&self) -> Option<&RoomId> {
        self.joined.as_ref()
    }

    /// Whether a relay connection is up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// The relay-assigned id of the current connection.
    #[must_use]
    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    /// Buffered messages of the joined room, oldest first.
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// The most recent failure reason.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomcast_protocol::DEFAULT_ROOM;

    fn room(id: &str) -> RoomId {
        RoomId::parse(id).unwrap()
    }

    fn message(room: &str, from: &str, text: &str) -> ChatMessage {
        ChatMessage {
            id: format!("m-{text}"),
            conversation_id: room.to_string(),
            from: from.to_string(),
            from_name: None,
            text: text.to_string(),
            ts: 0,
        }
    }

    fn connected() -> SessionController {
        let mut controller = SessionController::new();
        assert!(controller.on_connected("conn_a").is_empty());
        controller
    }

    #[test]
    fn test_defaults() {
        let controller = SessionController::new();
        assert_eq!(controller.selected().as_str(), DEFAULT_ROOM);
        assert_eq!(controller.active_room().as_str(), DEFAULT_ROOM);
        assert!(controller.joined().is_none());
        assert!(!controller.is_connected());
    }

    #[test]
    fn test_first_selection_only_joins() {
        let mut controller = connected();
        assert_eq!(
            controller.select_room("general").unwrap(),
            vec![Directive::Join(room("general"))]
        );
        assert_eq!(controller.joined(), Some(&room("general")));
    }

    #[test]
    fn test_switching_leaves_previous_room_first() {
        let mut controller = connected();
        controller.select_room("general").unwrap();
        controller.on_message(message("general", "conn_b", "old"));

        assert_eq!(
            controller.select_room(" random ").unwrap(),
            vec![
                Directive::Leave(room("general")),
                Directive::Join(room("random")),
            ]
        );
        assert!(controller.messages().is_empty());
        assert_eq!(controller.joined(), Some(&room("random")));
    }

    #[test]
    fn test_reselecting_same_room_rejoins_without_leave() {
        let mut controller = connected();
        controller.select_room("general").unwrap();
        assert_eq!(
            controller.select_room("general").unwrap(),
            vec![Directive::Join(room("general"))]
        );
    }

    #[test]
    fn test_blank_room_rejected() {
        let mut controller = connected();
        controller.select_room("general").unwrap();
        assert!(matches!(
            controller.select_room("   "),
            Err(ClientError::InvalidRoom)
        ));
        assert_eq!(controller.joined(), Some(&room("general")));
    }

    #[test]
    fn test_rejoin_after_reconnect() {
        let mut controller = connected();
        controller.select_room("general").unwrap();
        controller.on_join_ack(&room("general"), &Ack::Ok);
        assert!(controller.is_active_member());

        controller.on_disconnected();
        assert!(!controller.is_active_member());
        assert_eq!(controller.joined(), Some(&room("general")));
        assert!(controller.connection_id().is_none());

        assert_eq!(
            controller.on_connected("conn_b"),
            vec![Directive::Join(room("general"))]
        );
        assert!(!controller.is_active_member());
        controller.on_join_ack(&room("general"), &Ack::Ok);
        assert!(controller.is_active_member());
        assert_eq!(controller.connection_id(), Some("conn_b"));
    }

    #[test]
    fn test_selection_while_disconnected_is_deferred() {
        let mut controller = SessionController::new();
        assert!(controller.select_room("music").unwrap().is_empty());
        assert_eq!(
            controller.on_connected("conn_a"),
            vec![Directive::Join(room("music"))]
        );
    }

    #[test]
    fn test_stale_join_ack_does_not_confirm() {
        let mut controller = connected();
        controller.select_room("general").unwrap();
        controller.select_room("random").unwrap();

        controller.on_join_ack(&room("general"), &Ack::Ok);
        assert!(!controller.is_active_member());
    }

    #[test]
    fn test_failures_are_retained() {
        let mut controller = connected();
        controller.on_ack(&Ack::error("empty message"));
        assert_eq!(controller.last_error(), Some("empty message"));

        controller.on_connect_error("connection refused");
        assert_eq!(controller.last_error(), Some("connection refused"));
        assert!(!controller.is_connected());

        controller.on_connected("conn_b");
        assert!(controller.last_error().is_none());
    }

    #[test]
    fn test_message_filter() {
        let mut controller = connected();
        assert!(controller.on_message(message("anything", "conn_b", "before join")));

        controller.select_room("general").unwrap();
        assert!(controller.on_message(message("general", "conn_b", "in room")));
        assert!(!controller.on_message(message("random", "conn_b", "elsewhere")));

        assert_eq!(controller.messages().len(), 1);
        assert_eq!(controller.messages()[0].text, "in room");
    }

    #[test]
    fn test_outgoing_text() {
        let mut controller = connected();
        assert!(controller.outgoing("hello").is_none());

        controller.select_room("general").unwrap();
        assert!(controller.outgoing("   ").is_none());
        assert_eq!(
            controller.outgoing("  hello \n"),
            Some((room("general"), "hello".to_string()))
        );
    }

    #[test]
    fn test_is_mine() {
        let controller = connected();
        assert!(controller.is_mine(&message("general", "conn_a", "me")));
        assert!(!controller.is_mine(&message("general", "conn_b", "you")));
    }

    #[test]
    fn test_logout() {
        let mut controller = connected();
        controller.select_room("general").unwrap();
        controller.on_message(message("general", "conn_b", "hi"));

        assert_eq!(controller.logout(), vec![Directive::Leave(room("general"))]);
        assert!(controller.joined().is_none());
        assert!(controller.messages().is_empty());
        assert!(controller.logout().is_empty());

        // Nothing to replay after a reconnect.
        controller.on_disconnected();
        assert!(controller.on_connected("conn_c").is_empty());
    }
}
