//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the publish/subscribe hub for [`UiEvent`]s. The runtime
//! publishes; UI collaborators (renderers, haptics, loggers) subscribe and
//! render whatever state is reported. Shared as `Arc<EventBus>`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use slynk_core::catalog::ClipPair;
use slynk_core::types::{AnchorId, FeedbackStyle, PlaybackEndReason, PlaybackStage, Timestamp};
use slynk_core::ScreenPoint;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// UiEvent
// ---------------------------------------------------------------------------

/// What happened, from the UI's point of view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEventKind {
    /// Show the selection box with a label at `at`.
    BoundingBoxShown { at: ScreenPoint, label: String },

    /// Replace the selection box label.
    BoundingBoxRelabeled { label: String },

    /// Remove the selection box and progress indicator.
    BoundingBoxHidden { confirmed: bool },

    /// Hold progress in `0.0..=1.0`.
    HoldProgress { fraction: f64 },

    Haptic { style: FeedbackStyle },

    /// Transient, self-clearing status text.
    Notice { message: String },

    EngagementConfirmed {
        label: String,
        anchor_id: Option<AnchorId>,
        clips: ClipPair,
    },

    PlaybackStageChanged {
        anchor_id: AnchorId,
        stage: PlaybackStage,
        clip: String,
    },

    PlaybackEnded {
        anchor_id: AnchorId,
        reason: PlaybackEndReason,
    },

    /// The tracking session's anchor set was cleared and reconfigured.
    TrackingReset,

    /// The avatar session moved to a new connection state.
    AvatarState { state: String },
}

/// A timestamped [`UiEventKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiEvent {
    #[serde(flatten)]
    pub kind: UiEventKind,

    /// When the event was created (UTC).
    pub timestamp: Timestamp,
}

impl UiEvent {
    pub fn new(kind: UiEventKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
        }
    }
}

impl From<UiEventKind> for UiEvent {
    fn from(kind: UiEventKind) -> Self {
        Self::new(kind)
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`UiEvent`].
///
/// # Usage
///
/// ```rust
/// use slynk_events::bus::{EventBus, UiEventKind};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(UiEventKind::TrackingReset);
/// ```
pub struct EventBus {
    sender: broadcast::Sender<UiEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: impl Into<UiEvent>) {
        let event = event.into();
        tracing::trace!(event = ?event.kind, "UI event");
        // A SendError only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
