//! Tracked anchors and the per-frame events the tracker publishes.

use serde::{Deserialize, Serialize};

use crate::geometry::{CameraPose, Vec3};
use crate::types::AnchorId;

/// Physical size of an anchor's plane in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicalSize {
    pub width: f32,
    pub height: f32,
}

impl PhysicalSize {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// How an anchor came to exist, which decides how its visibility is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorKind {
    /// A reference image recognised by the tracking session.
    Marker,
    /// A world-space anchor placed at a hit-test result.
    Freeform,
}

/// A tracked anchor as last reported by the tracking session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorRef {
    pub id: AnchorId,
    /// Reference-image name for markers. Freeform anchors have none.
    pub name: Option<String>,
    pub kind: AnchorKind,
    pub physical_size: PhysicalSize,
    /// World-space position from the last update.
    pub position: Vec3,
    /// Refreshed every frame by the tracking session.
    pub tracked: bool,
}

impl AnchorRef {
    /// A tracked marker anchor.
    pub fn marker(
        id: AnchorId,
        name: impl Into<String>,
        physical_size: PhysicalSize,
        position: Vec3,
    ) -> Self {
        Self {
            id,
            name: Some(name.into()),
            kind: AnchorKind::Marker,
            physical_size,
            position,
            tracked: true,
        }
    }

    /// A freeform anchor placed in world space.
    pub fn freeform(id: AnchorId, physical_size: PhysicalSize, position: Vec3) -> Self {
        Self {
            id,
            name: None,
            kind: AnchorKind::Freeform,
            physical_size,
            position,
            tracked: true,
        }
    }

    pub fn is_marker(&self) -> bool {
        self.kind == AnchorKind::Marker
    }
}

/// Events published by the frame tracker, consumed in order by the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrackerEvent {
    AnchorAdded { anchor: AnchorRef },
    AnchorUpdated { anchor: AnchorRef },
    AnchorRemoved { id: AnchorId },
    FrameUpdated { camera: CameraPose },
    /// The tracking session was lost and cannot recover on its own.
    SessionLost,
}
