//! # roomcast-server
//!
//! The roomcast relay: configuration, HTTP and websocket routing, and the
//! per-connection driver that connects transports to the shared
//! [`Relay`](roomcast_core::Relay).

pub mod config;
pub mod handlers;
pub mod metrics;

pub use config::Config;
pub use handlers::{app, run_server, run_with_listener, serve_connection, AppState};
