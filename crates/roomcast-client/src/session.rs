//! Async chat session: the room policy of [`SessionController`] carried out
//! against a live [`RelayClient`].

use crate::client::{ClientEvent, RelayClient};
use crate::controller::{Directive, SessionController};
use crate::error::{ClientError, Result};
use roomcast_protocol::{Ack, ChatMessage, RoomId};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// What a [`ChatSession`] reports back to the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    /// Connected; `rejoined` is the room joined again automatically.
    Connected {
        /// Relay-assigned connection id.
        connection_id: String,
        /// Room restored after a reconnect.
        rejoined: Option<RoomId>,
    },
    /// The connection dropped.
    Disconnected,
    /// A connection attempt failed.
    ConnectError {
        /// Why it failed.
        reason: String,
    },
    /// A message for the joined room.
    Message(ChatMessage),
}

/// One user's chat session.
pub struct ChatSession {
    client: RelayClient,
    events: mpsc::Receiver<ClientEvent>,
    controller: SessionController,
    display_name: Option<String>,
}

impl ChatSession {
    /// Wrap a started client and its event receiver.
    #[must_use]
    pub fn new(client: RelayClient, events: mpsc::Receiver<ClientEvent>) -> Self {
        Self {
            client,
            events,
            controller: SessionController::new(),
            display_name: None,
        }
    }

    /// Name attached to outgoing messages.
    pub fn set_display_name(&mut self, name: Option<String>) {
        self.display_name = name;
    }

    /// Switch rooms, leaving the previous one.
    ///
    /// A failed leave is recorded and does not stop the join. While
    /// disconnected the room is remembered and joined on the next connect.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidRoom`] for a blank id, or
    /// [`ClientError::Rejected`] if the relay refuses the join.
    pub async fn select_room(&mut self, raw: &str) -> Result<()> {
        let directives = self.controller.select_room(raw)?;
        self.execute(directives).await
    }

    /// Send text to the joined room.
    ///
    /// Returns `Ok(None)` when nothing was sent: blank text or no room
    /// joined.
    ///
    /// # Errors
    ///
    /// Fails if the relay is unreachable or the request times out.
    pub async fn send(&mut self, text: &str) -> Result<Option<Ack>> {
        let Some((room, text)) = self.controller.outgoing(text) else {
            return Ok(None);
        };

        match self
            .client
            .send(&room, &text, self.display_name.as_deref())
            .await
        {
            Ok(ack) => {
                self.controller.on_ack(&ack);
                Ok(Some(ack))
            }
            Err(e) => {
                self.controller.on_request_error(&e);
                Err(e)
            }
        }
    }

    /// Forget the joined room, leaving it on the relay.
    ///
    /// # Errors
    ///
    /// Same as [`select_room`](Self::select_room).
    pub async fn logout(&mut self) -> Result<()> {
        self.display_name = None;
        let directives = self.controller.logout();
        self.execute(directives).await
    }

    /// Receive the next raw client event.
    ///
    /// Cancel-safe; pass the event to [`apply`](Self::apply).
    pub async fn recv_event(&mut self) -> Option<ClientEvent> {
        self.events.recv().await
    }

    /// Fold a client event into the session.
    ///
    /// Returns `None` for messages filtered out as belonging to another
    /// room. A reconnect re-issues the join for the remembered room before
    /// returning.
    pub async fn apply(&mut self, event: ClientEvent) -> Option<SessionUpdate> {
        match event {
            ClientEvent::Connected { connection_id } => {
                let directives = self.controller.on_connected(connection_id.clone());
                let rejoined = directives.iter().find_map(|d| match d {
                    Directive::Join(room) => Some(room.clone()),
                    Directive::Leave(_) => None,
                });
                if let Err(e) = self.execute(directives).await {
                    warn!(error = %e, "Rejoin failed");
                }
                if let Some(room) = &rejoined {
                    info!(room = %room, "Rejoined after reconnect");
                }
                Some(SessionUpdate::Connected {
                    connection_id,
                    rejoined,
                })
            }
            ClientEvent::Disconnected => {
                self.controller.on_disconnected();
                Some(SessionUpdate::Disconnected)
            }
            ClientEvent::ConnectError { reason } => {
                self.controller.on_connect_error(reason.clone());
                Some(SessionUpdate::ConnectError { reason })
            }
            ClientEvent::Message(message) => self
                .controller
                .on_message(message.clone())
                .then_some(SessionUpdate::Message(message)),
        }
    }

    /// Wait for the next update worth showing.
    ///
    /// Returns `None` once the client has shut down. Not cancel-safe: a
    /// reconnect may be cut short between the event and its rejoin.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        loop {
            let event = self.recv_event().await?;
            if let Some(update) = self.apply(event).await {
                return Some(update);
            }
        }
    }

    /// The room policy state.
    #[must_use]
    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    /// Drop buffered messages.
    pub fn clear_messages(&mut self) {
        self.controller.clear_messages();
    }

    /// The underlying relay client.
    #[must_use]
    pub fn client(&self) -> &RelayClient {
        &self.client
    }

    /// Stop the client.
    pub async fn shutdown(&mut self) {
        self.client.shutdown().await;
    }

    async fn execute(&mut self, directives: Vec<Directive>) -> Result<()> {
        for directive in directives {
            match directive {
                Directive::Leave(room) => match self.client.leave(&room).await {
                    Ok(ack) => self.controller.on_ack(&ack),
                    Err(e) => {
                        debug!(room = %room, error = %e, "Leave failed");
                        self.controller.on_request_error(&e);
                    }
                },
                Directive::Join(room) => match self.client.join(&room).await {
                    Ok(ack) => {
                        self.controller.on_join_ack(&room, &ack);
                        if let Some(reason) = ack.error_message() {
                            return Err(ClientError::Rejected(reason.to_string()));
                        }
                    }
                    // Replayed by the next `Connected`.
                    Err(ClientError::NotConnected | ClientError::Disconnected) => {
                        debug!(room = %room, "Join deferred until reconnect");
                    }
                    Err(e) => {
                        self.controller.on_request_error(&e);
                        return Err(e);
                    }
                },
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientConfig;
    use roomcast_protocol::{Frame, PROTOCOL_VERSION};
    use roomcast_transport::memory;
    use roomcast_transport::{Connection, Transport};
    use std::time::Duration;

    fn config() -> ClientConfig {
        ClientConfig::default()
            .with_reconnect_delay(Duration::from_millis(20))
            .with_request_timeout(Duration::from_secs(2))
    }

    /// Answer every request with `ack` until the client hangs up.
    async fn ack_everything(mut conn: Box<dyn Connection>, ack: Ack) -> Vec<Frame> {
        let mut seen = Vec::new();
        while let Ok(Some(frame)) = conn.recv().await {
            if let Some(id) = frame.request_id() {
                conn.send(Frame::ack(id, ack.clone())).await.unwrap();
            }
            seen.push(frame);
        }
        seen
    }

    #[tokio::test]
    async fn test_rejected_join_is_reported() {
        let (listener, connector) = memory::listener();
        let (client, events) = RelayClient::start(connector, config());
        let mut session = ChatSession::new(client, events);

        let mut server = listener.accept().await.unwrap();
        server
            .send(Frame::connected("conn_1", PROTOCOL_VERSION.major, 30_000))
            .await
            .unwrap();
        assert!(matches!(
            session.next_update().await,
            Some(SessionUpdate::Connected { rejoined: None, .. })
        ));

        let relay = tokio::spawn(ack_everything(server, Ack::error("busy")));
        assert!(matches!(
            session.select_room("general").await,
            Err(ClientError::Rejected(reason)) if reason == "busy"
        ));
        assert_eq!(session.controller().last_error(), Some("busy"));
        assert!(!session.controller().is_active_member());

        session.shutdown().await;
        relay.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_without_room_sends_nothing() {
        let (listener, connector) = memory::listener();
        let (client, events) = RelayClient::start(connector, config());
        let mut session = ChatSession::new(client, events);

        let mut server = listener.accept().await.unwrap();
        server
            .send(Frame::connected("conn_1", PROTOCOL_VERSION.major, 30_000))
            .await
            .unwrap();
        session.next_update().await;

        let relay = tokio::spawn(ack_everything(server, Ack::Ok));
        assert_eq!(session.send("hello").await.unwrap(), None);
        session.select_room("general").await.unwrap();
        assert_eq!(session.send("   ").await.unwrap(), None);
        assert_eq!(session.send(" hello ").await.unwrap(), Some(Ack::Ok));

        session.shutdown().await;
        let seen = relay.await.unwrap();
        assert_eq!(seen.len(), 2);
        assert!(matches!(&seen[1], Frame::Send { text, .. } if text == "hello"));
    }

    #[tokio::test]
    async fn test_select_room_while_disconnected_is_deferred() {
        let (listener, connector) = memory::listener();
        drop(listener);
        let (client, events) = RelayClient::start(connector, config());
        let mut session = ChatSession::new(client, events);

        session.select_room("music").await.unwrap();
        assert_eq!(session.controller().joined().map(RoomId::as_str), Some("music"));
        assert!(!session.controller().is_active_member());
    }
}
