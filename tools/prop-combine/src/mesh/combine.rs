//! Mesh combining
//!
//! Appends a transformed copy of one mesh source onto another. Source
//! geometry is authored with a different forward axis than placements use,
//! so every vertex first gets a fixed 90 degree yaw before the instance
//! scale, rotation and translation.

use glam::Vec3;

use super::{Face, MeshSource};
use crate::math::{angle_matrix, Angles};

/// Correction from authored mesh axes to placement axes
pub const AXIS_CORRECTION: Angles = Angles::yaw(90.0);

/// Append `source` into `dest`, transformed.
///
/// Positions are corrected, scaled, rotated by `angles`, then translated.
/// Normals are corrected and rotated only. Face indices are rebased onto the
/// vertices appended to `dest` and material slots are remapped by name. An
/// empty `source` leaves `dest` untouched.
pub fn combine(
    dest: &mut MeshSource,
    source: &MeshSource,
    translation: Vec3,
    angles: Angles,
    scale: f32,
) {
    if source.is_empty() {
        return;
    }

    let correction = angle_matrix(AXIS_CORRECTION);
    let rotation = angle_matrix(angles);

    let base = dest.vertex_count() as u32;
    let added = source.vertex_count();

    dest.positions.reserve_exact(added);
    dest.normals.reserve_exact(added);
    dest.texcoords.reserve_exact(added);
    dest.faces.reserve_exact(source.face_count());

    for ((&p, &n), &uv) in source
        .positions
        .iter()
        .zip(&source.normals)
        .zip(&source.texcoords)
    {
        let corrected = correction * p * scale;
        dest.positions.push(rotation * corrected + translation);
        dest.normals.push(rotation * (correction * n));
        dest.texcoords.push(uv);
    }

    let remap: Vec<u32> = source
        .materials
        .iter()
        .map(|name| dest.material_index(name))
        .collect();

    dest.faces.extend(source.faces.iter().map(|face| Face {
        verts: face.verts.map(|v| v + base),
        material: remap.get(face.material as usize).copied().unwrap_or(0),
    }));
}
