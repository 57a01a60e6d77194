//! Avatar signaling client.
//!
//! Drives the session-token → WebSocket → offer/answer handshake with the
//! remote avatar service:
//!
//! - [`session`]: the transport-free state machine.
//! - [`api`] / [`client`]: HTTPS token exchange and WebSocket connect.
//! - [`messages`], [`sdp`], [`audio`]: wire formats.
//! - [`processor`]: the async task that executes a session against a live
//!   transport.
//! - [`manager`]: owns at most one running session and relays its events.

pub mod api;
pub mod audio;
pub mod client;
pub mod config;
pub mod events;
pub mod manager;
pub mod messages;
pub mod processor;
pub mod sdp;
pub mod session;

pub use config::AvatarConfig;
pub use events::{SessionId, SessionUpdate, SignalingEvent};
pub use manager::SignalingManager;
pub use session::{SessionState, SignalingError, SignalingSession};
