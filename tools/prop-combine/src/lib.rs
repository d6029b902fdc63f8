//! prop-combine library
//!
//! Merges static props placed inside combine volumes into single compiled
//! models, rebuilds scaled props, and caches every compiled output so
//! unchanged inputs are never recompiled.

pub mod cache;
pub mod cluster;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod instance;
pub mod level;
pub mod library;
pub mod math;
pub mod mesh;
pub mod orchestrator;
pub mod paths;
pub mod pipeline;
pub mod signature;
pub mod volume;

pub use cache::BuildCache;
pub use config::CombineConfig;
pub use descriptor::{DescriptorTable, ModelDescriptor};
pub use error::CombineError;
pub use instance::PlacedInstance;
pub use level::{LevelFile, LevelOutput};
pub use library::{
    CatalogModelLibrary, ModelAttributes, ModelLibrary, ProcessRunner, StaticPropBuild,
    StaticPropLump, StaticPropSink, ToolRunner,
};
pub use math::Angles;
pub use mesh::MeshSource;
pub use pipeline::{combine_static_props, BuildContext, CombineReport};
pub use volume::{Brush, CombineVolume, Plane};
