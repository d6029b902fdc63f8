//! Narrow interfaces to the collaborators of the combine pass
//!
//! The compiled-model reader, the collision library, the process boundary and
//! the level's static-object lump all sit behind traits so the pass can be
//! driven by real tools or by recording fakes.

use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use glam::Vec3;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::error::CombineError;
use crate::instance::PlacedInstance;
use crate::math::{Aabb, Angles};
use crate::paths::{fix_slashes, model_key};

/// Render-relevant attributes of a compiled model
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelAttributes {
    pub contents: i32,
    pub surface_prop: String,
    /// Model header flags
    pub flags: i32,
    /// Material search paths, in declaration order
    pub cd_materials: Vec<String>,
    /// Material names, in declaration order
    pub textures: Vec<String>,
}

/// Access to compiled models and their collision hulls
pub trait ModelLibrary {
    fn attributes(&self, model: &str) -> Result<ModelAttributes, CombineError>;

    /// World bounds of the model's collision hull at unit scale, `None`
    /// when the model has no hull
    fn collision_bounds(&self, model: &str, origin: Vec3, angles: Angles) -> Option<Aabb>;
}

/// Process boundary for the external decompiler and compiler
pub trait ToolRunner {
    /// Run `program` to completion and return its exit code.
    ///
    /// A process killed without an exit code reports -1.
    fn run(&self, program: &Path, args: &[OsString], cwd: &Path) -> io::Result<i32>;
}

/// Level output receiving every registered static prop
pub trait StaticPropSink {
    fn add(&mut self, build: StaticPropBuild);
}

/// One entry of the static-object lump
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticPropBuild {
    pub model: String,
    pub origin: [f32; 3],
    pub angles: [f32; 3],
    pub solid: i32,
    pub skin: i32,
    pub flags: u32,
    pub fade_min_dist: f32,
    pub fade_max_dist: f32,
    pub forced_fade_scale: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lighting_origin: Option<String>,
    pub min_dx_level: u16,
    pub max_dx_level: u16,
    pub lightmap_resolution: [i32; 2],
}

impl StaticPropBuild {
    /// Entry for `instance` as placed, using `model` in place of its own
    pub fn from_instance(instance: &PlacedInstance, model: &str) -> Self {
        Self {
            model: model.to_string(),
            origin: instance.origin.to_array(),
            angles: instance.angles.to_array(),
            solid: instance.solid,
            skin: instance.skin,
            flags: instance.flags,
            fade_min_dist: instance.fade_min_dist,
            fade_max_dist: instance.fade_max_dist,
            forced_fade_scale: instance.forced_fade_scale,
            lighting_origin: instance.lighting_origin.clone(),
            min_dx_level: instance.min_dx_level,
            max_dx_level: instance.max_dx_level,
            lightmap_resolution: instance.lightmap_resolution,
        }
    }

    /// Move the entry to a new placement, keeping its attributes
    pub fn placed_at(mut self, origin: Vec3, angles: Angles) -> Self {
        self.origin = origin.to_array();
        self.angles = angles.to_array();
        self
    }
}

/// In-memory static-object lump
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticPropLump {
    #[serde(default)]
    pub props: Vec<StaticPropBuild>,
}

impl StaticPropLump {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    /// Distinct model paths referenced by the lump, in first-use order
    pub fn model_dictionary(&self) -> Vec<&str> {
        let mut seen = hashbrown::HashSet::new();
        self.props
            .iter()
            .map(|p| p.model.as_str())
            .filter(|m| seen.insert(*m))
            .collect()
    }
}

impl StaticPropSink for StaticPropLump {
    fn add(&mut self, build: StaticPropBuild) {
        self.props.push(build);
    }
}

/// Runs tools as child processes, inheriting stdout/stderr
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl ToolRunner for ProcessRunner {
    fn run(&self, program: &Path, args: &[OsString], cwd: &Path) -> io::Result<i32> {
        tracing::debug!("Running {} {:?} in {}", program.display(), args, cwd.display());
        // status() so tool output stays visible in the build log
        let status = Command::new(program).args(args).current_dir(cwd).status()?;
        Ok(status.code().unwrap_or(-1))
    }
}

/// Local collision hull bounds
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct HullBounds {
    pub mins: [f32; 3],
    pub maxs: [f32; 3],
}

/// One `[[models]]` table of a model catalog
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    pub path: String,
    #[serde(default)]
    pub contents: i32,
    #[serde(default)]
    pub surface_prop: String,
    #[serde(default)]
    pub flags: i32,
    #[serde(default)]
    pub cd_materials: Vec<String>,
    #[serde(default)]
    pub textures: Vec<String>,
    /// Models without a hull are never clustered
    #[serde(default)]
    pub hull: Option<HullBounds>,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    models: Vec<CatalogEntry>,
}

/// Model library backed by a `models.toml` catalog
#[derive(Debug, Default)]
pub struct CatalogModelLibrary {
    models: HashMap<String, CatalogEntry>,
}

impl CatalogModelLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a catalog from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model catalog: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("In {}", path.display()))
    }

    /// Parse catalog text
    pub fn parse(content: &str) -> Result<Self> {
        let file: CatalogFile = toml::from_str(content).context("Failed to parse model catalog")?;
        let mut library = Self::new();
        for entry in file.models {
            library.insert(entry);
        }
        Ok(library)
    }

    pub fn insert(&mut self, entry: CatalogEntry) {
        self.models.insert(model_key(&entry.path), entry);
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl ModelLibrary for CatalogModelLibrary {
    fn attributes(&self, model: &str) -> Result<ModelAttributes, CombineError> {
        let entry = self
            .models
            .get(&model_key(model))
            .ok_or_else(|| CombineError::ModelUnavailable {
                model: model.to_string(),
                reason: "not in model catalog".to_string(),
            })?;

        Ok(ModelAttributes {
            contents: entry.contents,
            surface_prop: entry.surface_prop.clone(),
            flags: entry.flags,
            cd_materials: entry.cd_materials.iter().map(|p| fix_slashes(p)).collect(),
            textures: entry.textures.clone(),
        })
    }

    fn collision_bounds(&self, model: &str, origin: Vec3, angles: Angles) -> Option<Aabb> {
        let hull = self.models.get(&model_key(model))?.hull?;
        let local = Aabb::new(Vec3::from_array(hull.mins), Vec3::from_array(hull.maxs));
        Some(local.transformed(angles, origin))
    }
}
