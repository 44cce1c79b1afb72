//! Room directory.
//!
//! Maps room ids to their members and fans messages out. Each room lives in
//! its own dashmap shard entry, so a broadcast holds that room's read guard
//! for the whole enumeration and a concurrent removal either completes
//! before it or waits for it.

use crate::message::Delivery;
use crate::registry::{ConnectionId, Outbox};
use crate::room::Room;
use dashmap::DashMap;
use roomcast_protocol::RoomId;
use tracing::{debug, trace};

/// Directory of active rooms.
pub struct RoomDirectory {
    rooms: DashMap<RoomId, Room>,
    prune_empty_rooms: bool,
}

impl RoomDirectory {
    /// Create an empty directory.
    ///
    /// With `prune_empty_rooms`, a room's entry is dropped as soon as its
    /// last member leaves.
    #[must_use]
    pub fn new(prune_empty_rooms: bool) -> Self {
        Self {
            rooms: DashMap::new(),
            prune_empty_rooms,
        }
    }

    /// Add a connection to a room, creating the room if needed.
    ///
    /// Returns `true` if the connection was not already a member.
    pub fn add_member(&self, room: &RoomId, connection_id: ConnectionId, outbox: Outbox) -> bool {
        let mut entry = self.rooms.entry(room.clone()).or_insert_with(|| {
            debug!(room = %room, "Creating room");
            Room::new(room.clone())
        });
        entry.add(connection_id, outbox)
    }

    /// Remove a connection from a room.
    ///
    /// Returns `true` if the connection was a member.
    pub fn remove_member(&self, room: &RoomId, connection_id: &ConnectionId) -> bool {
        let removed = self
            .rooms
            .get_mut(room)
            .map(|mut entry| entry.remove(connection_id))
            .unwrap_or(false);

        if removed
            && self.prune_empty_rooms
            && self.rooms.remove_if(room, |_, r| r.is_empty()).is_some()
        {
            debug!(room = %room, "Deleted empty room");
        }

        removed
    }

    /// Deliver a message to every member of a room.
    ///
    /// Returns the number of members the message was handed to; a room with
    /// no members is a silent no-op.
    pub fn broadcast(&self, room: &RoomId, message: Delivery) -> usize {
        match self.rooms.get(room) {
            Some(entry) => entry.broadcast(&message),
            None => {
                trace!(room = %room, "Broadcast to room without members");
                0
            }
        }
    }

    /// Check if a room currently has an entry.
    #[must_use]
    pub fn room_exists(&self, room: &str) -> bool {
        self.rooms.contains_key(room)
    }

    /// Check if a connection is a member of a room.
    #[must_use]
    pub fn is_member(&self, room: &str, connection_id: &ConnectionId) -> bool {
        self.rooms
            .get(room)
            .map(|entry| entry.is_member(connection_id))
            .unwrap_or(false)
    }

    /// Get the member count of a room.
    #[must_use]
    pub fn member_count(&self, room: &str) -> usize {
        self.rooms
            .get(room)
            .map(|entry| entry.member_count())
            .unwrap_or(0)
    }

    /// Get the members of a room.
    #[must_use]
    pub fn members(&self, room: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|entry| entry.members())
            .unwrap_or_default()
    }

    /// Get the ids of all rooms that have an entry.
    #[must_use]
    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of rooms with at least one member.
    #[must_use]
    pub fn active_room_count(&self) -> usize {
        self.rooms.iter().filter(|e| !e.is_empty()).count()
    }

    /// Total number of memberships across all rooms.
    #[must_use]
    pub fn total_memberships(&self) -> usize {
        self.rooms.iter().map(|e| e.member_count()).sum()
    }
}

impl Default for RoomDirectory {
    fn default() -> Self {
        Self::new(true)
    }
}
