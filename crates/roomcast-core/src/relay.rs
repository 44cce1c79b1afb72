//! The relay service object.
//!
//! A [`Relay`] owns the connection registry and the room directory and keeps
//! the two views of membership consistent. It is constructed once per
//! process and shared with every connection handler through an `Arc`.

use crate::directory::RoomDirectory;
use crate::registry::{ConnectionId, ConnectionRegistry, Inbox};
use roomcast_protocol::{ChatMessage, RoomId};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Relay errors.
///
/// The `Display` text of each variant is exactly what clients see in a
/// failed acknowledgment.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Room id missing or blank.
    #[error("conversationId missing")]
    MissingConversationId,

    /// Message text missing or blank.
    #[error("empty message")]
    EmptyMessage,

    /// The connection is not (or no longer) registered.
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// The connection has already been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Internal error.
    #[error("{0}")]
    Internal(String),
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Whether to drop a room's entry when its last member leaves.
    pub prune_empty_rooms: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            prune_empty_rooms: true,
        }
    }
}

/// Connection registry and room directory behind one handle.
pub struct Relay {
    registry: ConnectionRegistry,
    directory: RoomDirectory,
}

impl Relay {
    /// Create a new relay with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RelayConfig::default())
    }

    /// Create a new relay with custom configuration.
    #[must_use]
    pub fn with_config(config: RelayConfig) -> Self {
        info!("Creating relay with config: {:?}", config);
        Self {
            registry: ConnectionRegistry::new(),
            directory: RoomDirectory::new(config.prune_empty_rooms),
        }
    }

    /// Register a newly accepted connection.
    pub fn register(&self) -> (ConnectionId, Inbox) {
        self.registry.register()
    }

    /// Remove a connection and its membership in every room.
    ///
    /// The connection is taken out of each room's member set before its
    /// registry entry is discarded. Returns the rooms it was removed from;
    /// unregistering an unknown connection is a no-op.
    pub fn unregister(&self, connection_id: &ConnectionId) -> Vec<RoomId> {
        let rooms = self.registry.rooms_of(connection_id);
        for room in &rooms {
            self.directory.remove_member(room, connection_id);
        }

        let Some(remaining) = self.registry.remove(connection_id) else {
            return Vec::new();
        };

        // Anything recorded after the snapshot was taken.
        let mut left: Vec<RoomId> = rooms.into_iter().collect();
        for room in remaining {
            if !left.contains(&room) {
                self.directory.remove_member(&room, connection_id);
                left.push(room);
            }
        }

        debug!(connection = %connection_id, rooms = left.len(), "Connection unregistered");
        left
    }

    /// Add a connection to a room. Joining a room twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not registered.
    pub fn join(&self, connection_id: &ConnectionId, room: &RoomId) -> Result<(), RelayError> {
        let (outbox, added) = self.registry.add_room(connection_id, room)?;
        self.directory.add_member(room, connection_id.clone(), outbox);

        debug!(
            room = %room,
            connection = %connection_id,
            new = added,
            members = self.directory.member_count(room.as_str()),
            "Joined"
        );
        Ok(())
    }

    /// Remove a connection from a room. Leaving a room that was never
    /// joined is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not registered.
    pub fn leave(&self, connection_id: &ConnectionId, room: &RoomId) -> Result<(), RelayError> {
        if !self.registry.contains(connection_id) {
            return Err(RelayError::UnknownConnection(connection_id.clone()));
        }

        self.directory.remove_member(room, connection_id);
        let was_member = self.registry.remove_room(connection_id, room);

        debug!(
            room = %room,
            connection = %connection_id,
            was_member,
            members = self.directory.member_count(room.as_str()),
            "Left"
        );
        Ok(())
    }

    /// Fan a message out to every member of a room.
    ///
    /// Returns the number of members the message was handed to.
    pub fn broadcast(&self, room: &RoomId, message: ChatMessage) -> usize {
        self.directory.broadcast(room, Arc::new(message))
    }

    /// Get the rooms a connection belongs to.
    #[must_use]
    pub fn rooms_of(&self, connection_id: &ConnectionId) -> HashSet<RoomId> {
        self.registry.rooms_of(connection_id)
    }

    /// Get the members of a room.
    #[must_use]
    pub fn members(&self, room: &str) -> Vec<ConnectionId> {
        self.directory.members(room)
    }

    /// Get the member count of a room.
    #[must_use]
    pub fn member_count(&self, room: &str) -> usize {
        self.directory.member_count(room)
    }

    /// Check if a connection is registered.
    #[must_use]
    pub fn is_registered(&self, connection_id: &ConnectionId) -> bool {
        self.registry.contains(connection_id)
    }

    /// Get relay statistics.
    #[must_use]
    pub fn stats(&self) -> RelayStats {
        RelayStats {
            connection_count: self.registry.len(),
            room_count: self.directory.active_room_count(),
            total_memberships: self.directory.total_memberships(),
        }
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}

/// Relay statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayStats {
    /// Number of registered connections.
    pub connection_count: usize,
    /// Number of rooms with at least one member.
    pub room_count: usize,
    /// Total number of memberships.
    pub total_memberships: usize,
}
