//! Per-build cache of loaded mesh sources

use std::path::{Path, PathBuf};

use hashbrown::HashMap;

use super::{load_smd, MeshSource};
use crate::descriptor::ModelDescriptor;
use crate::error::CombineError;
use crate::paths::model_key;

/// Reference and optional collision mesh of one model
#[derive(Debug, Clone)]
pub struct LoadedGeometry {
    pub reference: MeshSource,
    pub collision: Option<MeshSource>,
}

/// Loaded geometry keyed by model path
///
/// Each model is read from disk at most once per build.
#[derive(Debug)]
pub struct GeometryStore {
    content_root: PathBuf,
    loaded: HashMap<String, LoadedGeometry>,
}

impl GeometryStore {
    pub fn new(content_root: impl Into<PathBuf>) -> Self {
        Self {
            content_root: content_root.into(),
            loaded: HashMap::new(),
        }
    }

    fn resolve(&self, rel: &str) -> PathBuf {
        let path = Path::new(rel);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.content_root.join(path)
        }
    }

    /// Geometry for `model`, loading it through `descriptor` on first use
    pub fn get_or_load(
        &mut self,
        model: &str,
        descriptor: &ModelDescriptor,
    ) -> Result<&LoadedGeometry, CombineError> {
        let key = model_key(model);
        if !self.loaded.contains_key(&key) {
            let reference = load_smd(&self.resolve(&descriptor.reference))?;
            let collision = descriptor
                .collision
                .as_deref()
                .map(|rel| load_smd(&self.resolve(rel)))
                .transpose()?;
            tracing::debug!(
                "Loaded geometry for {}: {} verts, {} faces",
                model,
                reference.vertex_count(),
                reference.face_count()
            );
            self.loaded.insert(key.clone(), LoadedGeometry { reference, collision });
        }

        self.loaded
            .get(&key)
            .ok_or_else(|| CombineError::geometry(&descriptor.reference, "geometry table lost entry"))
    }

    pub fn len(&self) -> usize {
        self.loaded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::test_meshes::triangle;
    use crate::mesh::write_static_smd;

    fn descriptor(reference: &str, collision: Option<&str>) -> ModelDescriptor {
        ModelDescriptor {
            path: "models/props/a.mdl".into(),
            reference: reference.into(),
            collision: collision.map(Into::into),
            reference_scale: 1.0,
            collision_scale: 1.0,
        }
    }

    #[test]
    fn test_loads_once_per_model() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("modelsrc")).unwrap();
        let smd = dir.path().join("modelsrc/a.smd");
        write_static_smd(&smd, &triangle("wood")).unwrap();

        let mut store = GeometryStore::new(dir.path());
        let d = descriptor("modelsrc/a.smd", None);
        assert_eq!(store.get_or_load("models/props/a.mdl", &d).unwrap().reference.face_count(), 1);

        // second lookup is served from memory even though the file is gone
        std::fs::remove_file(&smd).unwrap();
        let again = store.get_or_load("Models\\Props\\A.mdl", &d).unwrap();
        assert!(again.collision.is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_missing_collision_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        write_static_smd(&dir.path().join("a.smd"), &triangle("wood")).unwrap();

        let mut store = GeometryStore::new(dir.path());
        let d = descriptor("a.smd", Some("a_phys.smd"));
        let err = store.get_or_load("models/props/a.mdl", &d).unwrap_err();
        assert!(matches!(err, CombineError::GeometryLoadFailure { .. }));
        assert!(store.is_empty());
    }
}
