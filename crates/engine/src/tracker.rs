//! In-process mirror of the tracking session.
//!
//! The device tracking session publishes [`TrackerEvent`]s; the runtime
//! applies them to a [`FrameTracker`] in order, so every other component
//! reads one consistent view of the anchor set and the camera pose.

use std::sync::Arc;

use slynk_core::types::AnchorId;
use slynk_core::{AnchorRef, CameraPose, ScreenPoint, TrackerEvent, Vec3};

/// A captured camera image handed to the classifier.
pub type FrameImage = Arc<image::DynamicImage>;

/// World-space distance (metres) between a hit-test result and a marker
/// for the press to select that marker.
pub const HIT_TEST_RADIUS_M: f32 = 0.3;

/// Screen distance (points) between a press and a marker's projected
/// centre for the press to select that marker.
pub const PROJECTION_RADIUS_PX: f64 = 200.0;

/// Device tracking session operations the orchestrator needs.
pub trait TrackingBackend: Send + Sync {
    /// Project a world point into screen space for the current frame.
    fn project(&self, point: Vec3) -> Option<ScreenPoint>;

    /// World position of the first surface under `at`, if any.
    fn hit_test(&self, at: ScreenPoint) -> Option<Vec3>;

    /// The current camera image, if a frame is available.
    fn capture_frame(&self) -> Option<FrameImage>;

    /// Remove every anchor from the tracking session.
    fn reset_anchors(&self);

    /// Re-run the session with its marker catalog.
    fn reconfigure(&self);
}

/// Last-known anchors and camera pose.
#[derive(Debug, Default)]
pub struct FrameTracker {
    /// Kept in insertion order so marker lookup is deterministic.
    anchors: Vec<AnchorRef>,
    camera: Option<CameraPose>,
}

impl FrameTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one tracker event. `SessionLost` clears everything.
    pub fn apply(&mut self, event: TrackerEvent) {
        match event {
            TrackerEvent::AnchorAdded { anchor } | TrackerEvent::AnchorUpdated { anchor } => {
                self.upsert(anchor)
            }
            TrackerEvent::AnchorRemoved { id } => {
                self.anchors.retain(|a| a.id != id);
                tracing::debug!(anchor_id = %id, "Anchor removed");
            }
            TrackerEvent::FrameUpdated { camera } => self.camera = Some(camera),
            TrackerEvent::SessionLost => {
                tracing::warn!("Tracking session lost");
                self.anchors.clear();
                self.camera = None;
            }
        }
    }

    /// Insert or replace an anchor by id.
    pub fn upsert(&mut self, anchor: AnchorRef) {
        match self.anchors.iter_mut().find(|a| a.id == anchor.id) {
            Some(existing) => *existing = anchor,
            None => {
                tracing::debug!(anchor_id = %anchor.id, name = ?anchor.name, "Anchor added");
                self.anchors.push(anchor);
            }
        }
    }

    /// Drop all anchors but keep the camera pose.
    pub fn clear_anchors(&mut self) {
        self.anchors.clear();
    }

    pub fn anchor(&self, id: AnchorId) -> Option<&AnchorRef> {
        self.anchors.iter().find(|a| a.id == id)
    }

    pub fn anchors(&self) -> &[AnchorRef] {
        &self.anchors
    }

    pub fn camera(&self) -> Option<&CameraPose> {
        self.camera.as_ref()
    }

    /// Whether at least one frame has been seen since the last loss.
    pub fn has_frame(&self) -> bool {
        self.camera.is_some()
    }

    /// Find the tracked marker the user pressed on.
    ///
    /// A hit-test result within [`HIT_TEST_RADIUS_M`] of a marker wins;
    /// otherwise the first marker whose projection lies within
    /// [`PROJECTION_RADIUS_PX`] of the press is taken.
    pub fn find_marker_at(
        &self,
        at: ScreenPoint,
        backend: &dyn TrackingBackend,
    ) -> Option<&AnchorRef> {
        let mut markers = self.anchors.iter().filter(|a| a.is_marker() && a.tracked);

        if let Some(hit) = backend.hit_test(at) {
            if let Some(anchor) = markers
                .clone()
                .find(|a| a.position.distance_to(hit) < HIT_TEST_RADIUS_M)
            {
                return Some(anchor);
            }
        }

        markers.find(|a| {
            backend
                .project(a.position)
                .is_some_and(|p| p.distance_to(at) < PROJECTION_RADIUS_PX)
        })
    }

    /// Whether `id` is currently visible.
    ///
    /// Markers rely on the session's `tracked` flag; freeform anchors are
    /// visible when they lie in front of the camera. Unknown anchors and a
    /// missing camera pose count as not visible.
    pub fn is_anchor_visible(&self, id: AnchorId) -> bool {
        let Some(anchor) = self.anchor(id) else {
            return false;
        };
        if anchor.is_marker() {
            return anchor.tracked;
        }
        self.camera
            .is_some_and(|camera| camera.is_in_front(anchor.position))
    }
}
