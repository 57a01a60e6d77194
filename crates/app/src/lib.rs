//! Host for the engagement runtime.
//!
//! Loads configuration from the environment, reads a replay script of
//! tracker and pointer events, and drives the runtime against simulated
//! device backends.

pub mod config;
pub mod replay;
pub mod script;
