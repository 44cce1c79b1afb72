//! # roomcast-protocol
//!
//! Wire protocol definitions for the roomcast chat relay.
//!
//! This crate is the contract shared by the relay and its clients: the chat
//! message envelope, acknowledgments, protocol frames, codecs, and
//! versioning.
//!
//! ## Frame Types
//!
//! - `conversation:join` / `conversation:leave` - Room membership
//! - `message:send` - Send text to a room
//! - `message:new` - Messages pushed to room members
//! - `ack` - One acknowledgment per request
//!
//! ## Example
//!
//! ```rust
//! use roomcast_protocol::{codec, Frame};
//!
//! let frame = Frame::send(1, "general", "Hello, world!", None);
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod envelope;
pub mod frames;
pub mod rooms;
pub mod version;

pub use codec::{decode, encode, Encoding, ProtocolError};
pub use envelope::{Ack, ChatMessage};
pub use frames::{Frame, FrameType};
pub use rooms::{RoomId, CHAT_ROOMS, DEFAULT_ROOM};
pub use version::{Version, PROTOCOL_VERSION};
