//! # roomcast-transport
//!
//! Transport abstraction layer for the roomcast chat relay.
//!
//! - **WebSocket** - axum on the relay side, tokio-tungstenite for clients
//! - **Memory** - channel-backed connections inside one process
//!
//! ## Transport Abstraction
//!
//! All connections implement the `Connection` trait, so the relay loop and
//! the client session are transport-agnostic.
//!
//! ```rust,ignore
//! use roomcast_transport::Connection;
//!
//! async fn handle_connection(mut conn: Box<dyn Connection>) {
//!     while let Ok(Some(frame)) = conn.recv().await {
//!         // Process frame
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{Connection, Connector, Transport, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{AxumConnection, WebSocketConnector};
