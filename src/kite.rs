//! Kite state: identity, pose, and static shape geometry.
//!
//! A kite is an independently posed 2-D rigid body. The engine owns all
//! kites; the network layer refers to them only through [`KiteId`].

use glam::Vec2;

/// Unique identifier for a kite, stable for the connection/script lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KiteId(pub u32);

impl std::fmt::Display for KiteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One of the kite's two wingtip pivot points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tip {
    Left,
    Right,
}

/// Static shape parameters. These affect geometry (wingtip positions)
/// but never interpolate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KiteShape {
    /// Wingspan of the kite.
    pub width: f32,

    /// Nose-to-trailing-edge size.
    pub height: f32,

    /// Extra span added beyond the sail on each side.
    pub spread: f32,

    /// Span eaten where the sail folds over the frame.
    pub overlap: f32,

    /// Uniform scale applied to all of the above.
    pub scale: f32,
}

impl Default for KiteShape {
    fn default() -> Self {
        Self {
            width: 100.0,
            height: 60.0,
            spread: 0.0,
            overlap: 0.0,
            scale: 1.0,
        }
    }
}

impl KiteShape {
    /// Distance from the kite center to either wingtip along the local x-axis.
    pub fn half_span(&self) -> f32 {
        (self.width * 0.5 + self.spread - self.overlap) * self.scale
    }
}

/// A position + angle pair. Angle is in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose {
    pub center: Vec2,
    pub angle: f32,
}

impl Pose {
    pub fn new(center: Vec2, angle: f32) -> Self {
        Self { center, angle }
    }
}

/// An independently posed rigid body animated by the engine.
#[derive(Debug, Clone)]
pub struct Kite {
    /// Stable identity.
    pub id: KiteId,

    /// Current position.
    pub center: Vec2,

    /// Current rotation in degrees.
    pub angle: f32,

    /// Interpolation start position for the currently-executing action.
    pub old_center: Vec2,

    /// Interpolation start angle for the currently-executing action.
    pub old_angle: f32,

    /// Static geometry parameters.
    pub shape: KiteShape,

    /// Packed RGBA color.
    pub color: u32,

    /// Texture slot used by the drawing collaborator.
    pub texture_id: u32,

    /// Whether the sail is drawn mirrored.
    pub is_reversed: bool,

    /// Whether the kite participates in snapshots.
    pub is_active: bool,
}

impl Kite {
    /// Create a kite at the origin with default shape.
    pub fn new(id: KiteId) -> Self {
        Self {
            id,
            center: Vec2::ZERO,
            angle: 0.0,
            old_center: Vec2::ZERO,
            old_angle: 0.0,
            shape: KiteShape::default(),
            color: 0xff_ff_ff_ff,
            texture_id: 0,
            is_reversed: false,
            is_active: true,
        }
    }

    /// Current pose.
    pub fn pose(&self) -> Pose {
        Pose::new(self.center, self.angle)
    }

    /// Overwrite the current pose.
    pub fn set_pose(&mut self, pose: Pose) {
        self.center = pose.center;
        self.angle = pose.angle;
    }

    /// Latch the current pose as the interpolation start point.
    pub fn mark_start(&mut self) {
        self.old_center = self.center;
        self.old_angle = self.angle;
    }

    /// The latched interpolation start pose.
    pub fn start_pose(&self) -> Pose {
        Pose::new(self.old_center, self.old_angle)
    }

    /// Wingtip pivot for a given pose, computed from the shape parameters.
    ///
    /// Tips sit on the kite's local x-axis at `±half_span`, rotated into
    /// world space by the pose angle about the pose center.
    pub fn tip(&self, tip: Tip, pose: Pose) -> Vec2 {
        let local_x = match tip {
            Tip::Left => -self.shape.half_span(),
            Tip::Right => self.shape.half_span(),
        };
        let rad = pose.angle.to_radians();
        let (sin, cos) = rad.sin_cos();
        pose.center + Vec2::new(local_x * cos, local_x * sin)
    }
}

/// Rotate `point` about `pivot` by `degrees`.
pub fn rotate_about(point: Vec2, pivot: Vec2, degrees: f32) -> Vec2 {
    let rad = degrees.to_radians();
    let (sin, cos) = rad.sin_cos();
    let rel = point - pivot;
    pivot + Vec2::new(rel.x * cos - rel.y * sin, rel.x * sin + rel.y * cos)
}
