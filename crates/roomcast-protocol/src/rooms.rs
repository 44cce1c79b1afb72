//! Room identifiers and the curated room list.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Rooms offered to users by default.
///
/// The relay accepts any non-empty room id; this list only exists so that
/// clients agree on what to show.
pub const CHAT_ROOMS: [&str; 10] = [
    "global",
    "general",
    "random",
    "support",
    "announcements",
    "feedback",
    "team",
    "dev",
    "music",
    "gaming",
];

/// Room a client lands in before choosing one.
pub const DEFAULT_ROOM: &str = "global";

/// Check whether a room id belongs to the curated list.
#[must_use]
pub fn is_curated(room: &str) -> bool {
    CHAT_ROOMS.contains(&room)
}

/// A trimmed, non-empty room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Normalize a client-supplied room id.
    ///
    /// Returns `None` if nothing is left after trimming whitespace.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RoomId {
    /// The [`DEFAULT_ROOM`].
    fn default() -> Self {
        Self(DEFAULT_ROOM.to_string())
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RoomId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for RoomId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for RoomId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for RoomId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl From<RoomId> for String {
    fn from(room: RoomId) -> String {
        room.0
    }
}
