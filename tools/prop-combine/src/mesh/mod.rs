//! Triangle-mesh sources (.smd) and their combination

mod combine;
mod smd;
mod store;

pub use combine::{combine, AXIS_CORRECTION};
pub use smd::{load_smd, parse_smd, write_idle_sequence, write_static_smd};
pub use store::{GeometryStore, LoadedGeometry};

use glam::{Vec2, Vec3};

/// One triangle: three indices into the vertex arrays plus a material slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Face {
    pub verts: [u32; 3],
    /// Index into [`MeshSource::materials`]
    pub material: u32,
}

/// Static triangle mesh stored as index-aligned parallel arrays
///
/// Every face index is below `positions.len()`. Meshes only grow by append.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshSource {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    /// UVs with V already flipped into bottom-up convention
    pub texcoords: Vec<Vec2>,
    pub faces: Vec<Face>,
    pub materials: Vec<String>,
}

impl MeshSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Slot for a material name, appending it if unseen
    pub fn material_index(&mut self, name: &str) -> u32 {
        match self.materials.iter().position(|m| m == name) {
            Some(i) => i as u32,
            None => {
                self.materials.push(name.to_string());
                (self.materials.len() - 1) as u32
            }
        }
    }

    pub fn material_name(&self, face: &Face) -> &str {
        self.materials
            .get(face.material as usize)
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Check the parallel-array and face-index invariants
    pub fn is_consistent(&self) -> bool {
        let n = self.positions.len();
        self.normals.len() == n
            && self.texcoords.len() == n
            && self.faces.iter().all(|f| {
                f.verts.iter().all(|&v| (v as usize) < n)
                    && (f.material as usize) < self.materials.len()
            })
    }
}
