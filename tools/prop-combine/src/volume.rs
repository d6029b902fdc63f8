//! Combine volumes
//!
//! A volume is a set of convex brushes. Instances are tested against it with
//! the bounding box of their placed collision hull. Two convex brushes
//! intersect exactly when some face of their combined plane set keeps a
//! non-degenerate winding after being clipped by every other plane.

use glam::{DVec3, Vec3};

use crate::math::Aabb;

/// Points closer than this to a plane count as on it
const ON_EPSILON: f64 = 0.01;
/// Windings smaller than this are treated as degenerate
const AREA_EPSILON: f64 = 1e-3;
/// Half extent of the initial winding laid on each plane
const WORLD_EXTENT: f64 = 131_072.0;

/// Half-space boundary; points with `normal · p <= dist` are inside
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub dist: f32,
}

impl Plane {
    /// Plane `normal · p = dist`, rescaled so the normal has unit length
    pub fn new(normal: Vec3, dist: f32) -> Self {
        let length = normal.length();
        if length > 0.0 {
            Self {
                normal: normal / length,
                dist: dist / length,
            }
        } else {
            Self { normal, dist }
        }
    }

    fn distance(&self, p: DVec3) -> f64 {
        self.normal.as_dvec3().dot(p) - self.dist as f64
    }
}

type Winding = Vec<DVec3>;

/// Large quad lying on `plane`
fn base_winding(plane: &Plane) -> Winding {
    let normal = plane.normal.as_dvec3().normalize_or_zero();
    let abs = normal.abs();
    let up = if abs.z >= abs.x && abs.z >= abs.y {
        DVec3::X
    } else {
        DVec3::Z
    };
    let up = (up - normal * up.dot(normal)).normalize() * WORLD_EXTENT;
    let right = up.cross(normal);
    let origin = normal * plane.dist as f64;

    vec![
        origin - right + up,
        origin + right + up,
        origin + right - up,
        origin - right - up,
    ]
}

/// Keep the part of `winding` behind `plane`
fn clip_winding(winding: &Winding, plane: &Plane) -> Option<Winding> {
    #[derive(Clone, Copy, PartialEq)]
    enum Side {
        Front,
        Back,
        On,
    }

    let dists: Vec<f64> = winding.iter().map(|&p| plane.distance(p)).collect();
    let sides: Vec<Side> = dists
        .iter()
        .map(|&d| {
            if d > ON_EPSILON {
                Side::Front
            } else if d < -ON_EPSILON {
                Side::Back
            } else {
                Side::On
            }
        })
        .collect();

    if sides.iter().all(|&s| s != Side::Front) {
        return Some(winding.clone());
    }
    if sides.iter().all(|&s| s != Side::Back) {
        return None;
    }

    let mut out = Vec::with_capacity(winding.len() + 4);
    for i in 0..winding.len() {
        let j = (i + 1) % winding.len();
        let (p1, s1, d1) = (winding[i], sides[i], dists[i]);

        if s1 == Side::On {
            out.push(p1);
            continue;
        }
        if s1 == Side::Back {
            out.push(p1);
        }
        if sides[j] == Side::On || sides[j] == s1 {
            continue;
        }

        let p2 = winding[j];
        let t = d1 / (d1 - dists[j]);
        out.push(p1 + (p2 - p1) * t);
    }

    (out.len() >= 3).then_some(out)
}

fn winding_area(winding: &Winding) -> f64 {
    let mut total = DVec3::ZERO;
    for i in 1..winding.len().saturating_sub(1) {
        total += (winding[i] - winding[0]).cross(winding[i + 1] - winding[0]);
    }
    total.length() * 0.5
}

/// Surviving face windings of the convex region bounded by `planes`
fn face_windings(planes: &[Plane]) -> Vec<Winding> {
    let mut faces = Vec::new();
    for (i, plane) in planes.iter().enumerate() {
        let mut winding = Some(base_winding(plane));
        for (j, other) in planes.iter().enumerate() {
            if i == j {
                continue;
            }
            winding = winding.and_then(|w| clip_winding(&w, other));
            if winding.is_none() {
                break;
            }
        }
        if let Some(w) = winding.filter(|w| winding_area(w) > AREA_EPSILON) {
            faces.push(w);
        }
    }
    faces
}

/// Convex region bounded by planes
#[derive(Debug, Clone, PartialEq)]
pub struct Brush {
    pub planes: Vec<Plane>,
    pub bounds: Aabb,
}

impl Brush {
    /// Axis-aligned box brush
    pub fn from_bounds(mins: Vec3, maxs: Vec3) -> Self {
        let bounds = Aabb::new(mins, maxs);
        let planes = vec![
            Plane::new(Vec3::X, bounds.maxs.x),
            Plane::new(-Vec3::X, -bounds.mins.x),
            Plane::new(Vec3::Y, bounds.maxs.y),
            Plane::new(-Vec3::Y, -bounds.mins.y),
            Plane::new(Vec3::Z, bounds.maxs.z),
            Plane::new(-Vec3::Z, -bounds.mins.z),
        ];
        Self { planes, bounds }
    }

    /// Brush from explicit planes, `None` when they enclose nothing
    pub fn from_planes(planes: Vec<Plane>) -> Option<Self> {
        let points = face_windings(&planes)
            .into_iter()
            .flatten()
            .map(|p| p.as_vec3());
        let bounds = Aabb::from_points(points)?;
        Some(Self { planes, bounds })
    }

    /// Whether the two convex regions share volume (touching counts)
    pub fn intersects(&self, other: &Brush) -> bool {
        if !self.bounds.overlaps(&other.bounds) {
            return false;
        }
        let planes: Vec<Plane> = self
            .planes
            .iter()
            .chain(other.planes.iter())
            .copied()
            .collect();
        !face_windings(&planes).is_empty()
    }
}

/// Spatial region whose contained instances may be merged
#[derive(Debug, Clone, PartialEq)]
pub struct CombineVolume {
    pub name: Option<String>,
    pub brushes: Vec<Brush>,
}

impl CombineVolume {
    pub fn new(brushes: Vec<Brush>) -> Self {
        Self {
            name: None,
            brushes,
        }
    }

    /// Whether a world-space box touches any brush of the volume
    pub fn intersects_box(&self, bounds: &Aabb) -> bool {
        let test = Brush::from_bounds(bounds.mins, bounds.maxs);
        self.brushes.iter().any(|brush| test.intersects(brush))
    }
}
