//! Engagement orchestration: recognition, playback and the runtime that
//! ties them to the tracker, the classifier, the media layer and the
//! avatar session.
//!
//! - [`tracker`] keeps the in-process mirror of tracked anchors.
//! - [`classifier`] combines raw vision signals into one label.
//! - [`recognition`] turns a press-and-hold into a confirmed engagement.
//! - [`playback`] sequences the two clips bound to one anchor.
//! - [`watchdog`] tears playback down when its anchor leaves view.
//! - [`runtime`] owns all of the above on one task.
//! - [`sim`] provides device-free backends for replay and tests.

pub mod classifier;
pub mod media;
pub mod playback;
pub mod recognition;
pub mod runtime;
pub mod sim;
pub mod tracker;
pub mod watchdog;

pub use classifier::{Classifier, VisionBackend, VisionClassifier};
pub use media::{MediaBackend, MediaHandle, OverlayHandle};
pub use playback::PlaybackSequencer;
pub use recognition::RecognitionOrchestrator;
pub use runtime::{EngagementRuntime, RuntimeEvent, RuntimeHandle, RuntimeParts};
pub use tracker::{FrameTracker, TrackingBackend};
pub use watchdog::VisibilityWatchdog;
