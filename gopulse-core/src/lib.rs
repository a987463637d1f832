//! Realtime connectivity core for the studygolang community site.
//!
//! Keeps the signed-in user's unread notification count and the site-wide
//! online counters fresh through a push channel ([`ConnectionSession`]), with
//! a periodic heartbeat poll ([`HeartbeatPoller`]) as the fallback path, and
//! ties the channel's lifetime to authentication through [`AuthGate`].

pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod models;
pub mod state;
pub mod utils;
pub mod websocket;

pub use auth::{AuthGate, Decision};
pub use client::PulseClient;
pub use config::Config;
pub use error::{Error, Result};
pub use heartbeat::HeartbeatPoller;
pub use state::{AppState, PresenceCounter, SessionCounter};
pub use websocket::connection::{ConnectionSession, ConnectionState};
