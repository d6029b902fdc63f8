//! propcombine.toml configuration

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::math::{POSITION_QUANTUM, YAW_SNAP_DEGREES};

/// Settings for one combine run
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CombineConfig {
    /// Game content directory all other paths are relative to
    pub content_root: PathBuf,
    /// Directory searched for model build scripts
    pub model_source_dir: PathBuf,
    pub cache_file: PathBuf,
    /// Where decompiled model sources are kept between builds
    pub decompile_cache_dir: PathBuf,
    pub decompiler: PathBuf,
    pub compiler: PathBuf,
    /// Output models land in `models/maps/<map_name>/`.
    /// Defaults to the level file stem.
    pub map_name: Option<String>,
    pub yaw_snap_degrees: f32,
    /// Quantization steps per world unit for member offsets
    pub position_quantum: f32,
}

impl Default for CombineConfig {
    fn default() -> Self {
        Self {
            content_root: PathBuf::from("."),
            model_source_dir: PathBuf::from("modelsrc"),
            cache_file: PathBuf::from("modelsrc/vbspaddon_mdls.cache"),
            decompile_cache_dir: PathBuf::from("decomp_cache"),
            decompiler: PathBuf::from("crowbar"),
            compiler: PathBuf::from("studiomdl"),
            map_name: None,
            yaw_snap_degrees: YAW_SNAP_DEGREES,
            position_quantum: POSITION_QUANTUM,
        }
    }
}

impl CombineConfig {
    /// Load config from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse config from string
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse propcombine.toml")?;
        if config.yaw_snap_degrees <= 0.0 {
            anyhow::bail!("yaw_snap_degrees must be positive");
        }
        if config.position_quantum <= 0.0 {
            anyhow::bail!("position_quantum must be positive");
        }
        Ok(config)
    }

    /// Config file next to the level, or defaults when there is none
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Map name for output paths, falling back to the level file stem
    pub fn map_name_for(&self, level: &Path) -> String {
        self.map_name.clone().unwrap_or_else(|| {
            level
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "map".to_string())
        })
    }

    /// Resolve bare tool names through `PATH`
    pub fn resolve_tools(&mut self) {
        self.decompiler = resolve_tool(&self.decompiler);
        self.compiler = resolve_tool(&self.compiler);
    }

    /// Anchor the content root and relative tool paths to the working
    /// directory. The tools run from scratch directories, so nothing they are
    /// handed may be relative.
    pub fn make_absolute(&mut self) -> Result<()> {
        self.content_root = absolute(&self.content_root)?;
        for tool in [&mut self.decompiler, &mut self.compiler] {
            if !is_bare(tool) {
                *tool = absolute(tool)?;
            }
        }
        Ok(())
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("Failed to resolve {}", path.display()))
}

/// A lone file name, looked up on `PATH` when run
fn is_bare(tool: &Path) -> bool {
    let mut components = tool.components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// A bare executable name is looked up on `PATH`; anything with a directory
/// component is used verbatim
fn resolve_tool(tool: &Path) -> PathBuf {
    if !is_bare(tool) {
        return tool.to_path_buf();
    }
    match which::which(tool) {
        Ok(found) => {
            tracing::debug!("Resolved {} to {}", tool.display(), found.display());
            found
        }
        Err(e) => {
            tracing::warn!("Could not find {} on PATH: {}", tool.display(), e);
            tool.to_path_buf()
        }
    }
}
