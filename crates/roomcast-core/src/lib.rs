//! # roomcast-core
//!
//! Connection registry, room directory, and request handling for the
//! roomcast chat relay.
//!
//! This crate provides the stateful part of the relay:
//!
//! - **Registry** - Live connections and the rooms each has joined
//! - **Directory** - Rooms and their members, with fan-out broadcast
//! - **Relay** - The shared service object keeping both consistent
//! - **Session** - Per-connection request handling and acknowledgments
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Session    │────▶│   Relay     │────▶│  Directory  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐
//!                     │  Registry   │
//!                     └─────────────┘
//! ```

pub mod directory;
pub mod message;
pub mod registry;
pub mod relay;
pub mod room;
pub mod session;

pub use directory::RoomDirectory;
pub use message::Delivery;
pub use registry::{ConnectionId, ConnectionRegistry, Inbox, Outbox};
pub use relay::{Relay, RelayConfig, RelayError, RelayStats};
pub use room::Room;
pub use session::{Session, SessionState};
