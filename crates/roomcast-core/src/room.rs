//! A single conversation room.
//!
//! Rooms are implicit: one exists while it has members. Each member is
//! stored with its outbox so fan-out never has to consult the registry.

use crate::message::Delivery;
use crate::registry::{ConnectionId, Outbox};
use roomcast_protocol::RoomId;
use std::collections::HashMap;
use tracing::{debug, trace};

/// Members of one room.
#[derive(Debug)]
pub struct Room {
    id: RoomId,
    members: HashMap<ConnectionId, Outbox>,
}

impl Room {
    /// Create an empty room.
    #[must_use]
    pub fn new(id: RoomId) -> Self {
        Self {
            id,
            members: HashMap::new(),
        }
    }

    /// Get the room id.
    #[must_use]
    pub fn id(&self) -> &RoomId {
        &self.id
    }

    /// Get the number of members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Check if a connection is a member.
    #[must_use]
    pub fn is_member(&self, connection_id: &ConnectionId) -> bool {
        self.members.contains_key(connection_id)
    }

    /// Add a member.
    ///
    /// Returns `true` if the connection was not already a member.
    pub fn add(&mut self, connection_id: ConnectionId, outbox: Outbox) -> bool {
        match self.members.entry(connection_id) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                debug!(room = %self.id, connection = %slot.key(), "Member added");
                slot.insert(outbox);
                true
            }
        }
    }

    /// Remove a member.
    ///
    /// Returns `true` if the connection was a member.
    pub fn remove(&mut self, connection_id: &ConnectionId) -> bool {
        let removed = self.members.remove(connection_id).is_some();
        if removed {
            debug!(room = %self.id, connection = %connection_id, "Member removed");
        }
        removed
    }

    /// Deliver a message to every member.
    ///
    /// Members whose inbox has already been dropped are skipped. Returns the
    /// number of members the message was handed to.
    pub fn broadcast(&self, message: &Delivery) -> usize {
        let delivered = self
            .members
            .iter()
            .filter(|(connection_id, outbox)| {
                let sent = outbox.send(message.clone()).is_ok();
                if !sent {
                    trace!(room = %self.id, connection = %connection_id, "Skipping closed inbox");
                }
                sent
            })
            .count();
        trace!(room = %self.id, delivered, "Broadcast message");
        delivered
    }

    /// Get all member IDs.
    #[must_use]
    pub fn members(&self) -> Vec<ConnectionId> {
        self.members.keys().cloned().collect()
    }

    /// Check if the room has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
