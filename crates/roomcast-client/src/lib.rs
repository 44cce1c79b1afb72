//! # roomcast-client
//!
//! Client side of the roomcast chat relay.
//!
//! - [`RelayClient`] owns the connection in a background task, correlates
//!   acknowledgments with requests and reconnects after a fixed delay.
//! - [`SessionController`] holds the one-room policy without doing I/O.
//! - [`ChatSession`] combines the two and rejoins the remembered room after
//!   every reconnect.
//! - [`SoftLogin`] keeps a display name on disk.
//!
//! ```rust,ignore
//! use roomcast_client::{ChatSession, ClientConfig, RelayClient};
//! use roomcast_transport::WebSocketConnector;
//!
//! let config = ClientConfig::from_env();
//! let (client, events) = RelayClient::start(WebSocketConnector::new(&config.url), config);
//! let mut session = ChatSession::new(client, events);
//! session.select_room("general").await?;
//! session.send("hello").await?;
//! ```

pub mod client;
pub mod controller;
pub mod error;
pub mod login;
pub mod session;

pub use client::{ClientConfig, ClientEvent, RelayClient};
pub use controller::{Directive, SessionController};
pub use error::{ClientError, Result};
pub use login::{SoftLogin, SoftUser};
pub use session::{ChatSession, SessionUpdate};
