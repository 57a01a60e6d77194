//! Core types and pure state machines for the Slynk engagement pipeline.
//!
//! Nothing in this crate performs I/O or spawns tasks. Clocks are passed
//! in as [`std::time::Instant`] values so every state machine here can be
//! driven deterministically from tests.

pub mod anchor;
pub mod catalog;
pub mod error;
pub mod geometry;
pub mod gesture;
pub mod types;

pub use anchor::{AnchorKind, AnchorRef, PhysicalSize, TrackerEvent};
pub use error::CoreError;
pub use geometry::{CameraPose, ScreenPoint, Vec3};
