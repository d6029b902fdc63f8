//! prop-combine - static prop combiner for level builds
//!
//! Merges props inside combine volumes into compiled models and writes the
//! level's static-object lump.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use prop_combine::signature::bucket_by_signature;
use prop_combine::{
    combine_static_props, BuildCache, BuildContext, CatalogModelLibrary, CombineConfig,
    DescriptorTable, LevelFile, LevelOutput, ProcessRunner, StaticPropLump,
};

#[derive(Parser)]
#[command(name = "prop-combine")]
#[command(about = "Static prop combiner")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Combine the static props of a level and write its static-object lump
    Build {
        /// Level file
        level: PathBuf,

        /// Path to propcombine.toml
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Game content directory (overrides config)
        #[arg(long)]
        content_root: Option<PathBuf>,

        /// Model catalog (default: <content root>/models.toml)
        #[arg(long)]
        models: Option<PathBuf>,

        /// Output file (default: <level>.props.toml)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Report instances, volumes and signature buckets without building
    Check {
        /// Level file
        level: PathBuf,

        /// Path to propcombine.toml
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Model catalog (default: <content root>/models.toml)
        #[arg(long)]
        models: Option<PathBuf>,
    },

    /// List every parsed model build script
    Descriptors {
        /// Path to propcombine.toml
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Game content directory (overrides config)
        #[arg(long)]
        content_root: Option<PathBuf>,
    },

    /// Revalidate and compact the build cache
    Cache {
        /// Path to propcombine.toml
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Game content directory (overrides config)
        #[arg(long)]
        content_root: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let verbose = matches!(cli.command, Commands::Build { verbose: true, .. });
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    match cli.command {
        Commands::Build {
            level,
            config,
            content_root,
            models,
            output,
            verbose: _,
        } => {
            let config = load_config(config.as_deref(), content_root)?;
            build(&level, config, models, output)?;
            tracing::info!("Build complete!");
        }

        Commands::Check {
            level,
            config,
            models,
        } => {
            let config = load_config(config.as_deref(), None)?;
            check(&level, &config, models)?;
        }

        Commands::Descriptors {
            config,
            content_root,
        } => {
            let config = load_config(config.as_deref(), content_root)?;
            let table = DescriptorTable::search(&config.content_root, &config.model_source_dir);
            let mut descriptors: Vec<_> = table.iter().collect();
            descriptors.sort_by(|a, b| a.path.cmp(&b.path));
            for d in descriptors {
                tracing::info!(
                    "{} <- {}{}",
                    d.path,
                    d.reference,
                    d.collision
                        .as_deref()
                        .map(|c| format!(" (collision {})", c))
                        .unwrap_or_default()
                );
            }
            tracing::info!("{} build scripts", table.len());
        }

        Commands::Cache {
            config,
            content_root,
        } => {
            let config = load_config(config.as_deref(), content_root)?;
            let cache = BuildCache::open(&config.content_root, &config.cache_file)
                .context("Failed to open build cache")?;
            tracing::info!(
                "{}: {} entries kept, {} dropped",
                cache.path().display(),
                cache.len(),
                cache.dropped()
            );
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>, content_root: Option<PathBuf>) -> Result<CombineConfig> {
    let path = path.or_else(|| Some(Path::new("propcombine.toml")).filter(|p| p.is_file()));
    let mut config = CombineConfig::load_or_default(path)?;
    if let Some(root) = content_root {
        config.content_root = root;
    }
    Ok(config)
}

fn load_models(config: &CombineConfig, models: Option<PathBuf>) -> Result<CatalogModelLibrary> {
    let path = models.unwrap_or_else(|| config.content_root.join("models.toml"));
    CatalogModelLibrary::load(&path)
}

fn build(
    level_path: &Path,
    mut config: CombineConfig,
    models: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<()> {
    config.resolve_tools();
    let level = LevelFile::load(level_path)?;
    let library = load_models(&config, models)?;
    let map_name = config.map_name_for(level_path);

    let instances = level.instances();
    let volumes = level.volumes();
    tracing::info!(
        "Combining {} static props with {} combine volumes for {}",
        instances.len(),
        volumes.len(),
        map_name
    );

    let mut ctx = BuildContext::new(config, map_name, library, ProcessRunner, StaticPropLump::new())?;
    let report = combine_static_props(&mut ctx, &instances, &volumes)?;

    let output = output.unwrap_or_else(|| level_path.with_extension("props.toml"));
    LevelOutput::new(&ctx.sink, level.passthrough_entities()).write(&output)?;
    tracing::info!(
        "Wrote {} static props ({} tool runs) to {}",
        report.lump_entries(),
        report.tool_runs,
        output.display()
    );
    Ok(())
}

fn check(level_path: &Path, config: &CombineConfig, models: Option<PathBuf>) -> Result<()> {
    let level = LevelFile::load(level_path)?;
    let library = load_models(config, models)?;
    let instances = level.instances();
    let volumes = level.volumes();

    tracing::info!("{} static props, {} combine volumes", instances.len(), volumes.len());

    let bucketing = bucket_by_signature(&instances, &library);
    for (index, error) in &bucketing.unavailable {
        tracing::warn!("{} at {}: {}", instances[*index].model, instances[*index].origin, error);
    }

    for bucket in &bucketing.buckets {
        tracing::info!("Signature {:08x}: {} props", bucket.signature, bucket.members.len());
        for &index in &bucket.members {
            let instance = &instances[index];
            tracing::info!("  {} at {}", instance.model, instance.origin);
        }
    }
    Ok(())
}
