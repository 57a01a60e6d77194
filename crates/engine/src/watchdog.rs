//! Anchor visibility watchdog.
//!
//! While a playback session is active the runtime polls the watchdog every
//! [`WATCHDOG_INTERVAL`]. A visible anchor refreshes the session's
//! last-visible time; once the anchor has been out of view for longer than
//! the grace period the session must be torn down.

use std::time::{Duration, Instant};

pub const WATCHDOG_INTERVAL: Duration = Duration::from_millis(500);

/// How long an anchor may stay out of view before playback stops.
pub const OUT_OF_FRAME_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WatchdogVerdict {
    Visible,
    /// Out of view, still within the grace period.
    Hidden { elapsed: Duration },
    /// Out of view for longer than the grace period.
    Expired { elapsed: Duration },
}

#[derive(Debug, Clone, Copy)]
pub struct VisibilityWatchdog {
    grace: Duration,
}

impl Default for VisibilityWatchdog {
    fn default() -> Self {
        Self::new(OUT_OF_FRAME_GRACE)
    }
}

impl VisibilityWatchdog {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Evaluate one poll. A visible anchor refreshes `last_visible`.
    pub fn check(&self, last_visible: &mut Instant, visible: bool, now: Instant) -> WatchdogVerdict {
        if visible {
            *last_visible = now;
            return WatchdogVerdict::Visible;
        }
        let elapsed = now.saturating_duration_since(*last_visible);
        if elapsed > self.grace {
            WatchdogVerdict::Expired { elapsed }
        } else {
            WatchdogVerdict::Hidden { elapsed }
        }
    }
}
