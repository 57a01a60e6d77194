//! Events a running session reports back to its owner.

use std::fmt;

use crate::session::{SessionState, SignalingError};

/// Identity of one session run, unique within a [`SignalingManager`](crate::SignalingManager).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "avatar-{}", self.0)
    }
}

/// Lifecycle notifications from a session.
///
/// `Opened` is reported at most once. `Failed` and `Closed` are terminal:
/// exactly one of them ends every session that was started.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    StateChanged(SessionState),
    Opened,
    Failed(SignalingError),
    Closed,
}

impl SignalingEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SignalingEvent::Failed(_) | SignalingEvent::Closed)
    }
}

/// A [`SignalingEvent`] tagged with the session that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionUpdate {
    pub session_id: SessionId,
    pub event: SignalingEvent,
}
