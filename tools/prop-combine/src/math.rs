//! Placement math
//!
//! World space is right-handed with Z up. Angles are stored in degrees as
//! (pitch, yaw, roll) and turned into a rotation as `Rz(yaw) * Ry(pitch) * Rx(roll)`.

use glam::{Mat3, Vec3};

/// Default number of quantization steps per world unit for group offsets
pub const POSITION_QUANTUM: f32 = 100.0;

/// Default yaw snapping step for canonical group orientation (degrees)
pub const YAW_SNAP_DEGREES: f32 = 15.0;

/// Euler angles in degrees
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Angles {
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
}

impl Angles {
    pub const ZERO: Self = Self {
        pitch: 0.0,
        yaw: 0.0,
        roll: 0.0,
    };

    pub const fn new(pitch: f32, yaw: f32, roll: f32) -> Self {
        Self { pitch, yaw, roll }
    }

    /// Pure yaw rotation
    pub const fn yaw(yaw: f32) -> Self {
        Self::new(0.0, yaw, 0.0)
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.pitch, self.yaw, self.roll]
    }

    pub fn from_array(a: [f32; 3]) -> Self {
        Self::new(a[0], a[1], a[2])
    }
}

/// Rotation matrix for a set of angles
pub fn angle_matrix(angles: Angles) -> Mat3 {
    Mat3::from_rotation_z(angles.yaw.to_radians())
        * Mat3::from_rotation_y(angles.pitch.to_radians())
        * Mat3::from_rotation_x(angles.roll.to_radians())
}

/// Quantize a value to `divisions` steps per unit.
///
/// Returns the integer step count alongside the quantized value. The step
/// count is what gets hashed, so it must be derived from the same rounding.
pub fn quantize(value: f32, divisions: f32) -> (i32, f32) {
    let steps = (value * divisions).round() as i32;
    (steps, steps as f32 / divisions)
}

/// Quantize each component of a vector
pub fn quantize_vec3(v: Vec3, divisions: f32) -> ([i32; 3], Vec3) {
    let (x_steps, x) = quantize(v.x, divisions);
    let (y_steps, y) = quantize(v.y, divisions);
    let (z_steps, z) = quantize(v.z, divisions);
    ([x_steps, y_steps, z_steps], Vec3::new(x, y, z))
}

/// Round a yaw to the nearest multiple of `step` degrees
pub fn snap_yaw(yaw: f32, step: f32) -> f32 {
    (yaw / step).round() * step
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub mins: Vec3,
    pub maxs: Vec3,
}

impl Aabb {
    pub fn new(mins: Vec3, maxs: Vec3) -> Self {
        Self {
            mins: mins.min(maxs),
            maxs: mins.max(maxs),
        }
    }

    /// Smallest box containing every point, `None` when empty
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let (mins, maxs) = iter.fold((first, first), |(lo, hi), p| (lo.min(p), hi.max(p)));
        Some(Self { mins, maxs })
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            mins: self.mins.min(other.mins),
            maxs: self.maxs.max(other.maxs),
        }
    }

    /// Overlap test, touching faces count as overlapping
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.mins.cmple(other.maxs).all() && other.mins.cmple(self.maxs).all()
    }

    /// Scale the box about a fixed point
    pub fn scaled_about(&self, origin: Vec3, scale: f32) -> Aabb {
        Aabb::new(
            origin + (self.mins - origin) * scale,
            origin + (self.maxs - origin) * scale,
        )
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (lo, hi) = (self.mins, self.maxs);
        [
            Vec3::new(lo.x, lo.y, lo.z),
            Vec3::new(hi.x, lo.y, lo.z),
            Vec3::new(lo.x, hi.y, lo.z),
            Vec3::new(hi.x, hi.y, lo.z),
            Vec3::new(lo.x, lo.y, hi.z),
            Vec3::new(hi.x, lo.y, hi.z),
            Vec3::new(lo.x, hi.y, hi.z),
            Vec3::new(hi.x, hi.y, hi.z),
        ]
    }

    /// World-space bounds of this local box placed at `origin` with `angles`
    pub fn transformed(&self, angles: Angles, origin: Vec3) -> Aabb {
        let rot = angle_matrix(angles);
        let corners = self.corners().map(|c| rot * c + origin);
        // eight corners, never empty
        Aabb::from_points(corners).unwrap_or(*self)
    }
}
