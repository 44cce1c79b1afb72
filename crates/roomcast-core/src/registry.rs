//! Connection registry.
//!
//! Tracks every live connection, its delivery outbox, and the rooms it has
//! joined. Entries exist from transport accept until disconnect.

use crate::message::{now_millis, Delivery};
use crate::relay::RelayError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use roomcast_protocol::RoomId;
use std::collections::HashSet;
use std::fmt;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Sending half of a connection's delivery channel.
pub type Outbox = mpsc::UnboundedSender<Delivery>;

/// Receiving half of a connection's delivery channel.
pub type Inbox = mpsc::UnboundedReceiver<Delivery>;

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a connection ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("conn_{}", Uuid::new_v4().simple()))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

struct ConnectionEntry {
    outbox: Outbox,
    rooms: HashSet<RoomId>,
    connected_at: u64,
}

/// Registry of live connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly accepted connection.
    ///
    /// Returns the assigned ID and the inbox on which room broadcasts for
    /// this connection arrive.
    pub fn register(&self) -> (ConnectionId, Inbox) {
        let (outbox, inbox) = mpsc::unbounded_channel();

        loop {
            let id = ConnectionId::generate();
            match self.connections.entry(id.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    slot.insert(ConnectionEntry {
                        outbox,
                        rooms: HashSet::new(),
                        connected_at: now_millis(),
                    });
                    debug!(connection = %id, "Connection registered");
                    return (id, inbox);
                }
            }
        }
    }

    /// Remove a connection, returning the rooms it had joined.
    ///
    /// Returns `None` if the connection was not registered.
    pub(crate) fn remove(&self, id: &ConnectionId) -> Option<HashSet<RoomId>> {
        self.connections.remove(id).map(|(_, entry)| entry.rooms)
    }

    /// Record that a connection joined a room.
    ///
    /// Returns the connection's outbox and whether the room was newly added.
    pub(crate) fn add_room(
        &self,
        id: &ConnectionId,
        room: &RoomId,
    ) -> Result<(Outbox, bool), RelayError> {
        let mut entry = self
            .connections
            .get_mut(id)
            .ok_or_else(|| RelayError::UnknownConnection(id.clone()))?;
        let added = entry.rooms.insert(room.clone());
        Ok((entry.outbox.clone(), added))
    }

    /// Record that a connection left a room.
    ///
    /// Returns `true` if the room was in the connection's set.
    pub(crate) fn remove_room(&self, id: &ConnectionId, room: &RoomId) -> bool {
        self.connections
            .get_mut(id)
            .map(|mut entry| entry.rooms.remove(room))
            .unwrap_or(false)
    }

    /// Get the rooms a connection currently belongs to.
    #[must_use]
    pub fn rooms_of(&self, id: &ConnectionId) -> HashSet<RoomId> {
        self.connections
            .get(id)
            .map(|entry| entry.rooms.clone())
            .unwrap_or_default()
    }

    /// Check whether a connection is registered.
    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// When a connection was registered, in milliseconds since the epoch.
    #[must_use]
    pub fn connected_at(&self, id: &ConnectionId) -> Option<u64> {
        self.connections.get(id).map(|entry| entry.connected_at)
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if no connections are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
