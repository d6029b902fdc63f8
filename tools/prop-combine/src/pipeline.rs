//! The combine pass
//!
//! Instances are bucketed by signature, clustered per combine volume and then
//! either merged into a new model, rebuilt at their own scale, or registered
//! as placed. Only a model compiler failure stops the pass; every other
//! problem leaves the affected instance registered unmerged.

use std::cell::Cell;
use std::ffi::OsString;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use glam::Vec3;

use crate::cache::{merge_key, rescale_key, BuildCache};
use crate::cluster::{cluster_volume, GroupTransform};
use crate::config::CombineConfig;
use crate::descriptor::{DescriptorTable, ModelDescriptor};
use crate::error::CombineError;
use crate::instance::PlacedInstance;
use crate::library::{
    CatalogModelLibrary, ModelLibrary, ProcessRunner, StaticPropBuild, StaticPropLump,
    StaticPropSink, ToolRunner,
};
use crate::math::Angles;
use crate::mesh::{combine, GeometryStore, MeshSource};
use crate::orchestrator::{CombinedModel, Compiler, Decompiler};
use crate::signature::{bucket_by_signature, BuildAttributes, SignatureBucket};
use crate::volume::CombineVolume;

/// Everything one build run owns
///
/// Dropping the context closes the cache file.
pub struct BuildContext<L = CatalogModelLibrary, T = ProcessRunner, S = StaticPropLump> {
    pub config: CombineConfig,
    pub map_name: String,
    pub descriptors: DescriptorTable,
    pub geometry: GeometryStore,
    pub cache: BuildCache,
    pub library: L,
    pub tools: T,
    pub sink: S,
}

impl<L: ModelLibrary, T: ToolRunner, S: StaticPropSink> BuildContext<L, T, S> {
    /// Open the cache and index every build script under the model source dir
    ///
    /// The content root and tool paths are made absolute first.
    pub fn new(
        mut config: CombineConfig,
        map_name: impl Into<String>,
        library: L,
        tools: T,
        sink: S,
    ) -> Result<Self> {
        config.make_absolute()?;
        let root = config.content_root.clone();
        let cache = BuildCache::open(&root, &config.cache_file)
            .with_context(|| format!("Failed to open build cache under {}", root.display()))?;
        let descriptors = DescriptorTable::search(&root, &config.model_source_dir);
        tracing::info!("Found {} static prop build scripts", descriptors.len());

        Ok(Self {
            geometry: GeometryStore::new(&root),
            config,
            map_name: map_name.into(),
            descriptors,
            cache,
            library,
            tools,
            sink,
        })
    }
}

/// What a combine pass did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CombineReport {
    /// Instances registered as placed
    pub registered: usize,
    /// Instances registered with a model rebuilt at their scale
    pub rescaled: usize,
    /// Combined models registered
    pub merged_groups: usize,
    /// Instances folded into combined models
    pub merged_instances: usize,
    /// Outputs reused from the build cache
    pub cache_hits: usize,
    /// External tool invocations
    pub tool_runs: usize,
    /// Instances that fell back to unmerged registration
    pub degraded: usize,
}

impl CombineReport {
    /// Entries added to the static-object lump
    pub fn lump_entries(&self) -> usize {
        self.registered + self.rescaled + self.merged_groups
    }
}

/// Tool runner that counts invocations
struct Counted<'a, T: ?Sized> {
    inner: &'a T,
    runs: &'a Cell<usize>,
}

impl<T: ToolRunner + ?Sized> ToolRunner for Counted<'_, T> {
    fn run(&self, program: &Path, args: &[OsString], cwd: &Path) -> io::Result<i32> {
        self.runs.set(self.runs.get() + 1);
        self.inner.run(program, args, cwd)
    }
}

/// Run the combine pass over every placed instance
pub fn combine_static_props<L, T, S>(
    ctx: &mut BuildContext<L, T, S>,
    instances: &[PlacedInstance],
    volumes: &[CombineVolume],
) -> Result<CombineReport>
where
    L: ModelLibrary,
    T: ToolRunner,
    S: StaticPropSink,
{
    let mut pass = Pass {
        ctx,
        instances,
        claimed: vec![false; instances.len()],
        tool_runs: Cell::new(0),
        report: CombineReport::default(),
    };
    pass.run(volumes)?;

    let mut report = pass.report;
    report.tool_runs = pass.tool_runs.get();
    tracing::info!(
        "Static props: {} placed, {} rescaled, {} combined into {} models ({} cache hits, {} degraded)",
        report.registered,
        report.rescaled,
        report.merged_instances,
        report.merged_groups,
        report.cache_hits,
        report.degraded
    );
    Ok(report)
}

struct Pass<'c, 'i, L, T, S> {
    ctx: &'c mut BuildContext<L, T, S>,
    instances: &'i [PlacedInstance],
    claimed: Vec<bool>,
    tool_runs: Cell<usize>,
    report: CombineReport,
}

impl<L: ModelLibrary, T: ToolRunner, S: StaticPropSink> Pass<'_, '_, L, T, S> {
    fn run(&mut self, volumes: &[CombineVolume]) -> Result<()> {
        if volumes.is_empty() {
            for index in 0..self.instances.len() {
                self.claimed[index] = true;
                self.register_single(index)?;
            }
            return Ok(());
        }

        let buckets = self.bucket_instances();

        for volume in volumes {
            for bucket in &buckets {
                let cluster = cluster_volume(
                    volume,
                    &bucket.members,
                    self.instances,
                    &mut self.claimed,
                    &self.ctx.library,
                );
                for index in cluster.unhulled {
                    tracing::warn!(
                        "{} has no collision model, not combining it",
                        self.instances[index].model
                    );
                    self.register_single(index)?;
                }
                self.materialize_group(cluster.members, &bucket.attributes)?;
            }
        }

        for index in 0..self.instances.len() {
            if !self.claimed[index] {
                self.claimed[index] = true;
                self.register_single(index)?;
            }
        }
        Ok(())
    }

    /// Signature buckets in first-seen order.
    ///
    /// Instances whose model attributes are unavailable are registered here.
    fn bucket_instances(&mut self) -> Vec<SignatureBucket> {
        let instances = self.instances;
        let bucketing = bucket_by_signature(instances, &self.ctx.library);

        for (index, error) in bucketing.unavailable {
            tracing::warn!("Not combining {}: {}", instances[index].model, error);
            self.claimed[index] = true;
            self.report.degraded += 1;
            self.register_direct(index);
        }

        for (n, bucket) in bucketing.buckets.iter().enumerate() {
            tracing::debug!("Signature bucket {} ({:08x}):", n, bucket.signature);
            for &index in &bucket.members {
                let instance = &instances[index];
                tracing::debug!("  {} at {} (instance {})", instance.model, instance.origin, index);
            }
        }

        bucketing.buckets
    }

    /// Register an instance as placed, with its own model
    fn register_direct(&mut self, index: usize) {
        let instance = &self.instances[index];
        self.ctx
            .sink
            .add(StaticPropBuild::from_instance(instance, &instance.model));
        self.report.registered += 1;
    }

    /// Register one instance, rebuilding its model when it is scaled
    fn register_single(&mut self, index: usize) -> Result<()> {
        let instances = self.instances;
        let instance = &instances[index];
        if !instance.needs_rescale() {
            self.register_direct(index);
            return Ok(());
        }

        let key = rescale_key(instance);
        if let Some(model) = self.ctx.cache.lookup(key) {
            let build = StaticPropBuild::from_instance(instance, model);
            self.ctx.sink.add(build);
            self.report.rescaled += 1;
            self.report.cache_hits += 1;
            return Ok(());
        }

        match self.rebuild_scaled(index, key) {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => {
                Err(e).with_context(|| format!("Failed to rescale {}", instance.model))
            }
            Err(e) => {
                tracing::warn!("Not scaling {}: {}", instance.model, e);
                self.report.degraded += 1;
                self.register_direct(index);
                Ok(())
            }
        }
    }

    fn rebuild_scaled(&mut self, index: usize, key: u32) -> Result<(), CombineError> {
        let instances = self.instances;
        let instance = &instances[index];
        let attributes = BuildAttributes::from(&self.ctx.library.attributes(&instance.model)?);
        let descriptor = self.descriptor_for(&instance.model)?;

        let mut reference = MeshSource::new();
        let mut collision = MeshSource::new();
        {
            let geometry = self.ctx.geometry.get_or_load(&instance.model, &descriptor)?;
            // cancels the axis correction so the model keeps its own frame
            let frame = Angles::yaw(-90.0);
            combine(
                &mut reference,
                &geometry.reference,
                Vec3::ZERO,
                frame,
                descriptor.reference_scale * instance.scale,
            );
            if let Some(source) = &geometry.collision {
                combine(
                    &mut collision,
                    source,
                    Vec3::ZERO,
                    frame,
                    descriptor.collision_scale * instance.scale,
                );
            }
        }

        let output = self.compile(&reference, &collision, &attributes, key)?;
        self.ctx
            .sink
            .add(StaticPropBuild::from_instance(instance, &output));
        self.report.rescaled += 1;
        self.record(key, [instance.model.as_str()], &output);
        Ok(())
    }

    fn materialize_group(&mut self, members: Vec<usize>, attributes: &BuildAttributes) -> Result<()> {
        let instances = self.instances;
        match members.len() {
            0 => return Ok(()),
            1 => return self.register_single(members[0]),
            _ => {}
        }

        if self.register_cached_group(&members) {
            return Ok(());
        }

        // resolve every member before touching the compiler
        let mut survivors = Vec::with_capacity(members.len());
        let mut descriptors = Vec::with_capacity(members.len());
        for index in members {
            let model = &instances[index].model;
            match self.prepare_member(index) {
                Ok(descriptor) => {
                    survivors.push(index);
                    descriptors.push(descriptor);
                }
                Err(e) => {
                    tracing::warn!("Unable to combine {}: {}; placing it on its own", model, e);
                    self.report.degraded += 1;
                    self.register_direct(index);
                }
            }
        }

        match survivors.len() {
            0 => return Ok(()),
            1 => return self.register_single(survivors[0]),
            _ => {}
        }
        if self.register_cached_group(&survivors) {
            return Ok(());
        }

        let Some(transform) = self.group_transform(&survivors) else {
            return Ok(());
        };
        let key = merge_key(self.instances, &transform);

        let (reference, collision) = match self.combine_members(&transform, &descriptors) {
            Ok(meshes) => meshes,
            Err(e) => return self.degrade_group(&survivors, e),
        };

        let output = match self.compile(&reference, &collision, attributes, key) {
            Ok(output) => output,
            Err(e) if e.is_fatal() => {
                let first = &instances[survivors[0]];
                return Err(e).with_context(|| {
                    format!(
                        "Failed to combine {} props near {} (first: {})",
                        survivors.len(),
                        transform.origin,
                        first.model
                    )
                });
            }
            Err(e) => return self.degrade_group(&survivors, e),
        };

        self.register_group(&transform, &output);
        let models: Vec<&str> = survivors
            .iter()
            .map(|&i| instances[i].model.as_str())
            .collect();
        self.record(key, models, &output);
        Ok(())
    }

    /// Merge every member's meshes into the group's frame
    fn combine_members(
        &mut self,
        transform: &GroupTransform,
        descriptors: &[ModelDescriptor],
    ) -> Result<(MeshSource, MeshSource), CombineError> {
        let instances = self.instances;
        let mut reference = MeshSource::new();
        let mut collision = MeshSource::new();

        for (member, descriptor) in transform.members.iter().zip(descriptors) {
            let instance = &instances[member.index];
            let geometry = self.ctx.geometry.get_or_load(&instance.model, descriptor)?;
            combine(
                &mut reference,
                &geometry.reference,
                member.offset,
                member.angles,
                descriptor.reference_scale * instance.scale,
            );
            if let Some(source) = &geometry.collision {
                combine(
                    &mut collision,
                    source,
                    member.offset,
                    member.angles,
                    descriptor.collision_scale * instance.scale,
                );
            }
        }

        Ok((reference, collision))
    }

    fn group_transform(&self, members: &[usize]) -> Option<GroupTransform> {
        GroupTransform::compute(
            self.instances,
            members,
            self.ctx.config.yaw_snap_degrees,
            self.ctx.config.position_quantum,
        )
    }

    /// Register a group from the cache, returning whether it was there
    fn register_cached_group(&mut self, members: &[usize]) -> bool {
        let Some(transform) = self.group_transform(members) else {
            return false;
        };
        let key = merge_key(self.instances, &transform);
        let Some(model) = self.ctx.cache.lookup(key).map(str::to_string) else {
            return false;
        };
        tracing::debug!("Reusing {} for {} props", model, members.len());
        self.report.cache_hits += 1;
        self.register_group(&transform, &model);
        true
    }

    /// Register a combined model at the group's canonical placement,
    /// carrying the first member's attributes
    fn register_group(&mut self, transform: &GroupTransform, model: &str) {
        let Some(first) = transform.members.first() else {
            return;
        };
        let build = StaticPropBuild::from_instance(&self.instances[first.index], model)
            .placed_at(transform.origin, transform.placement_angles());
        self.ctx.sink.add(build);
        self.report.merged_groups += 1;
        self.report.merged_instances += transform.len();
    }

    fn degrade_group(&mut self, members: &[usize], error: CombineError) -> Result<()> {
        tracing::warn!("Unable to combine {} props: {}", members.len(), error);
        for &index in members {
            self.report.degraded += 1;
            self.register_direct(index);
        }
        Ok(())
    }

    /// Descriptor and loaded geometry for a group member
    fn prepare_member(&mut self, index: usize) -> Result<ModelDescriptor, CombineError> {
        let instances = self.instances;
        let instance = &instances[index];
        let descriptor = self.descriptor_for(&instance.model)?;
        self.ctx.geometry.get_or_load(&instance.model, &descriptor)?;
        Ok(descriptor)
    }

    /// Build script for `model`, decompiling the shipped model when no
    /// source exists
    fn descriptor_for(&mut self, model: &str) -> Result<ModelDescriptor, CombineError> {
        if let Some(descriptor) = self.ctx.descriptors.get(model) {
            return Ok(descriptor.clone());
        }

        let config = &self.ctx.config;
        let decompiler = Decompiler {
            program: &config.decompiler,
            content_root: &config.content_root,
            cache_dir: &config.decompile_cache_dir,
        };
        let runner = Counted {
            inner: &self.ctx.tools,
            runs: &self.tool_runs,
        };
        let descriptor = decompiler.decompile(&runner, model)?;
        self.ctx.descriptors.insert(descriptor.clone());
        Ok(descriptor)
    }

    fn compile(
        &self,
        reference: &MeshSource,
        collision: &MeshSource,
        attributes: &BuildAttributes,
        key: u32,
    ) -> Result<String, CombineError> {
        let config = &self.ctx.config;
        let compiler = Compiler {
            program: &config.compiler,
            content_root: &config.content_root,
            map_name: &self.ctx.map_name,
        };
        let runner = Counted {
            inner: &self.ctx.tools,
            runs: &self.tool_runs,
        };
        compiler.materialize(
            &runner,
            CombinedModel {
                reference,
                collision,
                attributes,
                key,
            },
        )
    }

    /// Persist a build result; a cache write failure only costs a rebuild
    fn record<'m>(&mut self, key: u32, models: impl IntoIterator<Item = &'m str>, output: &str) {
        if let Err(e) = self.ctx.cache.insert(key, models, output) {
            tracing::warn!("Failed to record {} in the build cache: {}", output, e);
        }
    }
}
