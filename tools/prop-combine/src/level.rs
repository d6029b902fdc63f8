//! Level input and output
//!
//! A level is a TOML list of `[[entities]]`, each a set of string key/values
//! with optional brushes. Static props become [`PlacedInstance`]s, combine
//! volume entities become [`CombineVolume`]s and everything else is passed
//! through to the output untouched.

use std::path::Path;

use anyhow::{Context, Result};
use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::instance::{is_static_prop_classname, KeyValues, PlacedInstance};
use crate::library::{StaticPropBuild, StaticPropLump};
use crate::volume::{Brush, CombineVolume, Plane};

/// Classname of brush entities that mark combine volumes
pub const COMBINE_VOLUME_CLASSNAME: &str = "comp_propcombine_volume";

/// Plane of an explicitly authored brush
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaneDef {
    pub normal: [f32; 3],
    pub dist: f32,
}

/// Brush geometry as authored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BrushDef {
    Box { mins: [f32; 3], maxs: [f32; 3] },
    Planes { planes: Vec<PlaneDef> },
}

impl BrushDef {
    /// Convex brush, `None` when the planes enclose nothing
    pub fn to_brush(&self) -> Option<Brush> {
        match self {
            BrushDef::Box { mins, maxs } => {
                Some(Brush::from_bounds(Vec3::from_array(*mins), Vec3::from_array(*maxs)))
            }
            BrushDef::Planes { planes } => Brush::from_planes(
                planes
                    .iter()
                    .map(|p| Plane::new(Vec3::from_array(p.normal), p.dist))
                    .collect(),
            ),
        }
    }
}

/// One level entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub brushes: Vec<BrushDef>,
    #[serde(flatten)]
    pub keyvalues: KeyValues,
}

impl Entity {
    pub fn classname(&self) -> &str {
        self.keyvalues
            .get("classname")
            .map(String::as_str)
            .unwrap_or_default()
    }

    fn is_static_prop(&self) -> bool {
        is_static_prop_classname(self.classname())
    }

    fn is_combine_volume(&self) -> bool {
        self.classname().eq_ignore_ascii_case(COMBINE_VOLUME_CLASSNAME)
    }
}

/// Parsed level file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LevelFile {
    #[serde(default)]
    pub entities: Vec<Entity>,
}

impl LevelFile {
    /// Load a level from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read level: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("In {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse level file")
    }

    /// Every static prop placement, in entity order
    pub fn instances(&self) -> Vec<PlacedInstance> {
        self.entities
            .iter()
            .filter(|e| e.is_static_prop())
            .filter_map(|e| {
                let instance = PlacedInstance::from_keyvalues(&e.keyvalues);
                if instance.is_none() {
                    tracing::warn!("Static prop without a model, skipping");
                }
                instance
            })
            .collect()
    }

    /// Every combine volume with at least one usable brush
    pub fn volumes(&self) -> Vec<CombineVolume> {
        self.entities
            .iter()
            .filter(|e| e.is_combine_volume())
            .filter_map(|e| {
                let name = e.keyvalues.get("targetname").cloned();
                let brushes: Vec<Brush> = e
                    .brushes
                    .iter()
                    .filter_map(|b| {
                        let brush = b.to_brush();
                        if brush.is_none() {
                            tracing::warn!(
                                "Combine volume {} has an empty brush",
                                name.as_deref().unwrap_or("<unnamed>")
                            );
                        }
                        brush
                    })
                    .collect();
                if brushes.is_empty() {
                    return None;
                }
                Some(CombineVolume {
                    name,
                    brushes,
                })
            })
            .collect()
    }

    /// Entities that survive into the output: neither props nor volumes
    pub fn passthrough_entities(&self) -> Vec<Entity> {
        self.entities
            .iter()
            .filter(|e| !e.is_static_prop() && !e.is_combine_volume())
            .cloned()
            .collect()
    }
}

/// Compiled level: the static-object lump plus the remaining entities
#[derive(Debug, Clone, Default, Serialize)]
pub struct LevelOutput {
    /// Distinct models referenced by the lump
    pub model_dictionary: Vec<String>,
    pub static_props: Vec<StaticPropBuild>,
    pub entities: Vec<Entity>,
}

impl LevelOutput {
    pub fn new(lump: &StaticPropLump, entities: Vec<Entity>) -> Self {
        Self {
            model_dictionary: lump
                .model_dictionary()
                .into_iter()
                .map(str::to_string)
                .collect(),
            static_props: lump.props.clone(),
            entities,
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize level output")
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let text = self.to_toml()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
    }
}
