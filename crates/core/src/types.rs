use serde::{Deserialize, Serialize};

/// Tracked anchors are identified by the tracking session's UUIDs.
pub type AnchorId = uuid::Uuid;

/// UI-facing timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Monotonic counter used to tag asynchronous work so late results can be
/// recognised and dropped.
pub type Generation = u64;

/// Haptic feedback intensity reported to the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackStyle {
    Light,
    Medium,
    Heavy,
}

/// Which clip of a playback session is on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStage {
    Idle,
    Stage1,
    Stage2,
}

/// Why a playback session was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackEndReason {
    /// Stage 2 reached its end of media.
    Completed,
    /// The anchor stayed out of view past the grace period.
    OutOfFrame,
    /// Stopped on request.
    Cancelled,
    /// The tracking session was lost.
    TrackingLost,
}
