//! Parent/child poses for movable boards, and the drag math that moves them.
//!
//! A board is a networked parent transform with the visible canvas as its
//! child. Whoever last dragged the board may have left a non-zero child
//! offset behind; before a new holder starts moving it, the offset is folded
//! back into the parent ([`ParentedPose::recenter`]) so the board does not
//! jump.

use std::f32::consts::PI;

use glam::{Mat4, Quat, Vec3};

pub const DEFAULT_MIN_SCALE: f32 = 0.5;
pub const DEFAULT_MAX_SCALE: f32 = 3.0;
/// Maximum elevation of a dragged board above or below the viewer, degrees.
pub const DEFAULT_PITCH_CLAMP_DEG: f32 = 50.0;

/// Pointer travel below which a resize drag is ignored.
const MIN_RESIZE_DISTANCE: f32 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Pose {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::IDENTITY
        }
    }

    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// A parent pose in world space and a child pose relative to it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ParentedPose {
    pub parent: Pose,
    pub local: Pose,
}

impl ParentedPose {
    pub fn new(parent: Pose, local: Pose) -> Self {
        Self { parent, local }
    }

    /// Child transform in world space.
    pub fn world(&self) -> Mat4 {
        self.parent.to_matrix() * self.local.to_matrix()
    }

    pub fn child_world_position(&self) -> Vec3 {
        self.parent.to_matrix().transform_point3(self.local.position)
    }

    /// Move the parent onto the child and zero the child's local offset.
    ///
    /// The child's world transform is unchanged. Returns false when the
    /// offset was already zero.
    pub fn recenter(&mut self) -> bool {
        if self.local.position == Vec3::ZERO {
            return false;
        }
        self.parent.position = self.child_world_position();
        self.local.position = Vec3::ZERO;
        true
    }

    /// Turn the board around its own vertical axis.
    pub fn flip(&mut self) {
        self.parent.rotation = (self.parent.rotation * Quat::from_rotation_y(PI)).normalize();
    }
}

/// Axis-aligned room volume boards are kept inside.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoomBounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl RoomBounds {
    /// Bounds from two opposite corners in any order.
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    pub fn clamp(&self, point: Vec3) -> Vec3 {
        point.clamp(self.min, self.max)
    }
}

fn round_to_3(value: f32) -> f32 {
    (value * 1000.0).round() / 1000.0
}

// ============================================================================
// Drags
// ============================================================================

/// Corner-handle resize: scale follows the ratio of pointer distances from
/// the board origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizeDrag {
    start_pointer: Vec3,
    start_scale: f32,
}

impl ResizeDrag {
    pub fn begin(pointer: Vec3, start_scale: f32) -> Self {
        Self {
            start_pointer: pointer,
            start_scale,
        }
    }

    /// Uniform scale for the current pointer, clamped to `[min, max]` and
    /// rounded to 3 decimals. `None` if the drag started on the origin.
    pub fn scale_at(&self, origin: Vec3, pointer: Vec3, min: f32, max: f32) -> Option<f32> {
        let start = origin.distance(self.start_pointer);
        if start <= MIN_RESIZE_DISTANCE {
            return None;
        }
        let factor = origin.distance(pointer) / start;
        Some(round_to_3((self.start_scale * factor).clamp(min, max)))
    }
}

/// Side-handle move: the board orbits the viewer at a fixed radius, following
/// the pointer direction, and always faces the viewer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveDrag {
    orbit_radius: f32,
    /// Offset from the grab point to the board origin, in viewer space.
    grab_offset: Vec3,
}

impl MoveDrag {
    pub fn begin(viewer: &Pose, pointer: Vec3, board: Vec3) -> Self {
        let orbit_radius = board.distance(viewer.position);
        let grab_dir = (pointer - viewer.position).normalize_or_zero();
        let grab_point = viewer.position + grab_dir * orbit_radius;
        let grab_offset = viewer.rotation.inverse() * (board - grab_point);
        Self {
            orbit_radius,
            grab_offset,
        }
    }

    /// Board pose for the current pointer, kept within `pitch_clamp_deg` of
    /// the viewer's horizon and inside `bounds`.
    pub fn pose_at(
        &self,
        viewer: &Pose,
        pointer: Vec3,
        pitch_clamp_deg: f32,
        bounds: Option<&RoomBounds>,
    ) -> (Vec3, Quat) {
        let dir = (pointer - viewer.position).normalize_or_zero();
        let grab_point = viewer.position + dir * self.orbit_radius;
        let target = grab_point + viewer.rotation * self.grab_offset;

        let offset = clamp_pitch(target - viewer.position, viewer, pitch_clamp_deg);
        let mut position = viewer.position + offset;
        if let Some(bounds) = bounds {
            position = bounds.clamp(position);
        }

        (position, face_away_from(viewer.position, position))
    }
}

fn clamp_pitch(offset: Vec3, viewer: &Pose, clamp_deg: f32) -> Vec3 {
    let mut horizontal = Vec3::new(offset.x, 0.0, offset.z);
    if horizontal.length_squared() < 1e-12 {
        let forward = viewer.rotation * Vec3::Z;
        horizontal = Vec3::new(forward.x, 0.0, forward.z);
    }
    let horizontal = horizontal.normalize_or_zero();
    let length = offset.length();

    let pitch = offset.y.atan2(Vec3::new(offset.x, 0.0, offset.z).length());
    let limit = clamp_deg.to_radians();
    if pitch.abs() <= limit {
        return offset;
    }

    let pitch = pitch.clamp(-limit, limit);
    horizontal * (length * pitch.cos()) + Vec3::Y * (length * pitch.sin())
}

/// Yaw-only rotation whose forward axis points from `viewer` to `board`.
fn face_away_from(viewer: Vec3, board: Vec3) -> Quat {
    let dir = Vec3::new(board.x - viewer.x, 0.0, board.z - viewer.z);
    if dir.length_squared() <= 1e-6 {
        return Quat::IDENTITY;
    }
    Quat::from_rotation_y(dir.x.atan2(dir.z))
}

// ============================================================================
// Tests
// ============================================================================
