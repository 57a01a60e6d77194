//! Slynk UI event bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`UiEvent`]: the timestamped envelope every subscriber receives.

pub mod bus;

pub use bus::{EventBus, UiEvent, UiEventKind};
