//! Minimal screen-space and world-space math used by the tracker boundary.

use std::ops::Sub;

use serde::{Deserialize, Serialize};

/// A point in screen coordinates (points, origin top-left).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

impl ScreenPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    pub fn distance_to(&self, other: ScreenPoint) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// A world-space vector in metres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn dot(&self, other: Vec3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn length(&self) -> f32 {
        self.dot(*self).sqrt()
    }

    /// Unit vector in the same direction, or `None` for the zero vector.
    pub fn normalized(&self) -> Option<Vec3> {
        let len = self.length();
        if len <= f32::EPSILON {
            return None;
        }
        Some(Vec3::new(self.x / len, self.y / len, self.z / len))
    }

    pub fn distance_to(&self, other: Vec3) -> f32 {
        (*self - other).length()
    }
}

impl Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

/// Camera pose for the current frame.
///
/// `forward` is the direction the camera looks along (the negated third
/// column of the camera transform).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraPose {
    pub position: Vec3,
    pub forward: Vec3,
}

impl CameraPose {
    /// Whether `point` lies in the half-space in front of the camera.
    ///
    /// Returns `false` when the point coincides with the camera or the
    /// forward vector is degenerate.
    pub fn is_in_front(&self, point: Vec3) -> bool {
        let (Some(direction), Some(forward)) =
            ((point - self.position).normalized(), self.forward.normalized())
        else {
            return false;
        };
        direction.dot(forward) > 0.0
    }
}
