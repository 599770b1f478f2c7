//! Device Caches
//!
//! The four device-wide caches and their owner, [`DeviceCaches`].
//!
//! | Cache | Key | Version | Depends on |
//! |-------|-----|---------|------------|
//! | render pass | pass id | pass version | |
//! | shader variant | `(shader id, defines)` | shader version | |
//! | pipeline | `(pipeline id, variant key, pass key, subpass)` | hash of pipeline, pass and variant builds | pass, variant |
//! | framebuffer | `(size, pass key, attachment identities)` | hash of size and pass build | pass |
//!
//! Keys never include versions: a mutated description rebuilds its entry in
//! place, and every dependent rebuilds on its next lookup because its own
//! version folds in the dependency's build.

pub mod entry;
pub mod framebuffer;
pub mod key;
pub mod pipeline;
pub mod render_pass;
pub mod shader;

use std::time::Duration;

use glam::UVec2;
use smallvec::{SmallVec, smallvec};

pub use entry::{CacheStats, Cached, CachedRef, Lookup, ResourceCache, VersionedEntry};
pub use framebuffer::{CachedFramebuffer, FramebufferSource};
pub use key::{BlendComponentKey, BlendStateKey, CacheKey, DepthBiasKey, DepthStateKey, fx_hash_key};
pub use pipeline::{CachedPipeline, PipelineSource};
pub use render_pass::CachedRenderPass;
pub use shader::{ShaderVariant, ShaderVariantSource, render_stage, uniform_struct_name};

use crate::backend::GpuDevice;
use crate::description::{PipelineDescription, RenderPassDescription, RenderTarget, ShaderDefines, ShaderDescription};
use crate::errors::{CacheError, ResourceKind, Result};
use crate::settings::CacheSettings;

/// Counters of every device cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceCacheStats {
    pub render_passes: CacheStats,
    pub shaders: CacheStats,
    pub pipelines: CacheStats,
    pub framebuffers: CacheStats,
}

impl DeviceCacheStats {
    #[must_use]
    pub fn total(&self) -> CacheStats {
        let mut total = self.render_passes;
        total += self.shaders;
        total += self.pipelines;
        total += self.framebuffers;
        total
    }
}

/// Owner of the device-wide caches.
pub struct DeviceCaches<D: GpuDevice> {
    pub(crate) render_passes: ResourceCache<CachedRenderPass<D>>,
    pub(crate) shaders: ResourceCache<ShaderVariant<D>>,
    pub(crate) pipelines: ResourceCache<CachedPipeline<D>>,
    pub(crate) framebuffers: ResourceCache<CachedFramebuffer<D>>,
    max_inline_bytes: u32,
}

impl<D: GpuDevice> DeviceCaches<D> {
    #[must_use]
    pub fn new(device: &D, settings: &CacheSettings) -> Self {
        Self {
            render_passes: ResourceCache::new(),
            shaders: ResourceCache::new(),
            pipelines: ResourceCache::new(),
            framebuffers: ResourceCache::new(),
            max_inline_bytes: settings.max_inline_bytes.min(device.limits().max_inline_bytes),
        }
    }

    /// Inline draw-data limit applied to shader variants.
    #[must_use]
    pub fn max_inline_bytes(&self) -> u32 {
        self.max_inline_bytes
    }

    // ─── Lookups ──────────────────────────────────────────────────────────────

    pub fn get_or_create_render_pass(
        &mut self,
        device: &D,
        desc: &RenderPassDescription,
        now: Duration,
    ) -> Result<CachedRef> {
        let lookup = Lookup {
            key: CacheKey::of(&desc.id),
            label: &desc.label,
            source_id: desc.id,
            version: desc.version(),
            watches: smallvec![desc.watch()],
            depends_on: smallvec![],
        };
        self.render_passes.get_or_create(device, lookup, &desc, now)
    }

    pub fn get_or_create_shader(
        &mut self,
        device: &D,
        shader: &ShaderDescription,
        defines: &ShaderDefines,
        now: Duration,
    ) -> Result<CachedRef> {
        let lookup = Lookup {
            key: CacheKey::of(&(shader.id, defines)),
            label: &shader.label,
            source_id: shader.id,
            version: shader.version(),
            watches: smallvec![shader.watch()],
            depends_on: smallvec![],
        };
        let source = ShaderVariantSource {
            shader,
            defines,
            max_inline_bytes: self.max_inline_bytes,
        };
        self.shaders.get_or_create(device, lookup, &source, now)
    }

    /// Resolves the render pass and the shader variant selected by
    /// `pipeline.defines`, then the pipeline itself.
    pub fn get_or_create_pipeline(
        &mut self,
        device: &D,
        pipeline: &PipelineDescription,
        pass: &RenderPassDescription,
        shader: &ShaderDescription,
        now: Duration,
    ) -> Result<CachedRef> {
        let rp_ref = self.get_or_create_render_pass(device, pass, now)?;
        let shader_ref = self.get_or_create_shader(device, shader, &pipeline.defines, now)?;

        let Some((rp_entry, render_pass)) = self.render_passes.get(rp_ref.key).and_then(|e| Some((e, e.resource()?)))
        else {
            return Err(CacheError::UnknownEntry {
                kind: ResourceKind::RenderPass,
                key: rp_ref.key,
            });
        };
        let Some((shader_entry, variant)) = self.shaders.get(shader_ref.key).and_then(|e| Some((e, e.resource()?)))
        else {
            return Err(CacheError::UnknownEntry {
                kind: ResourceKind::ShaderVariant,
                key: shader_ref.key,
            });
        };

        let version = fx_hash_key(&(
            pipeline.version(),
            rp_ref.version,
            rp_entry.build_id(),
            shader_ref.version,
            shader_entry.build_id(),
        ));
        let lookup = Lookup {
            key: CacheKey::of(&(pipeline.id, shader_ref.key, rp_ref.key, pipeline.subpass)),
            label: &pipeline.label,
            source_id: pipeline.id,
            version,
            watches: smallvec![pipeline.watch(), pass.watch(), shader.watch()],
            depends_on: smallvec![rp_ref.key, shader_ref.key],
        };
        let source = PipelineSource {
            pipeline,
            pass,
            render_pass,
            render_pass_key: rp_ref.key,
            shader: variant,
            shader_key: shader_ref.key,
        };
        self.pipelines.get_or_create(device, lookup, &source, now)
    }

    /// `targets` are the attachment images in render-pass order.
    pub fn get_or_create_framebuffer(
        &mut self,
        device: &D,
        render_pass: CachedRef,
        targets: &[RenderTarget<D>],
        size: UVec2,
        now: Duration,
    ) -> Result<CachedRef> {
        self.render_passes.touch(render_pass.key, now);
        let Some((rp_entry, native_pass)) = self
            .render_passes
            .get(render_pass.key)
            .and_then(|e| Some((e, e.resource()?)))
        else {
            return Err(CacheError::UnknownEntry {
                kind: ResourceKind::RenderPass,
                key: render_pass.key,
            });
        };

        let identities: SmallVec<[u64; 5]> = targets.iter().map(|t| t.identity).collect();
        let lookup = Lookup {
            key: CacheKey::of(&(size, render_pass.key, identities.as_slice())),
            label: rp_entry.label(),
            source_id: rp_entry.source_id(),
            version: fx_hash_key(&(size, rp_entry.build_id())),
            watches: smallvec![],
            depends_on: smallvec![render_pass.key],
        };
        let source = FramebufferSource {
            render_pass: native_pass,
            render_pass_key: render_pass.key,
            targets,
            size,
        };
        self.framebuffers.get_or_create(device, lookup, &source, now)
    }

    // ─── Accessors ────────────────────────────────────────────────────────────

    #[must_use]
    pub fn render_pass(&self, key: CacheKey) -> Option<&CachedRenderPass<D>> {
        self.render_passes.resource(key)
    }

    #[must_use]
    pub fn shader_variant(&self, key: CacheKey) -> Option<&ShaderVariant<D>> {
        self.shaders.resource(key)
    }

    #[must_use]
    pub fn pipeline(&self, key: CacheKey) -> Option<&CachedPipeline<D>> {
        self.pipelines.resource(key)
    }

    #[must_use]
    pub fn framebuffer(&self, key: CacheKey) -> Option<&CachedFramebuffer<D>> {
        self.framebuffers.resource(key)
    }

    #[must_use]
    pub fn render_pass_entry(&self, key: CacheKey) -> Option<&VersionedEntry<CachedRenderPass<D>>> {
        self.render_passes.get(key)
    }

    #[must_use]
    pub fn shader_entry(&self, key: CacheKey) -> Option<&VersionedEntry<ShaderVariant<D>>> {
        self.shaders.get(key)
    }

    #[must_use]
    pub fn pipeline_entry(&self, key: CacheKey) -> Option<&VersionedEntry<CachedPipeline<D>>> {
        self.pipelines.get(key)
    }

    #[must_use]
    pub fn framebuffer_entry(&self, key: CacheKey) -> Option<&VersionedEntry<CachedFramebuffer<D>>> {
        self.framebuffers.get(key)
    }

    /// Entry counts as `(render passes, shaders, pipelines, framebuffers)`.
    #[must_use]
    pub fn len(&self) -> (usize, usize, usize, usize) {
        (
            self.render_passes.len(),
            self.shaders.len(),
            self.pipelines.len(),
            self.framebuffers.len(),
        )
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.render_passes.is_empty() && self.shaders.is_empty() && self.pipelines.is_empty() && self.framebuffers.is_empty()
    }

    // ─── Invalidation ─────────────────────────────────────────────────────────

    /// Marks every variant of shader `id` and every pipeline built from one
    /// purge-eligible. Returns the number of entries marked.
    pub fn invalidate_shader(&mut self, id: u64) -> usize {
        let shaders = self.shaders.invalidate_where(|e| e.source_id() == id);
        let pipelines = self
            .pipelines
            .invalidate_where(|e| e.depends_on().iter().any(|k| shaders.contains(k)));
        if !shaders.is_empty() {
            log::debug!(
                "Invalidated {} shader variant(s) and {} pipeline(s) of shader {id:#x}",
                shaders.len(),
                pipelines.len()
            );
        }
        shaders.len() + pipelines.len()
    }

    /// Marks render pass `id` and its pipelines and framebuffers purge-eligible.
    pub fn invalidate_render_pass(&mut self, id: u64) -> usize {
        let passes = self.render_passes.invalidate_where(|e| e.source_id() == id);
        let pipelines = self
            .pipelines
            .invalidate_where(|e| e.depends_on().iter().any(|k| passes.contains(k)));
        let framebuffers = self
            .framebuffers
            .invalidate_where(|e| e.depends_on().iter().any(|k| passes.contains(k)));
        if !passes.is_empty() {
            log::debug!(
                "Invalidated render pass {id:#x}: {} pipeline(s), {} framebuffer(s)",
                pipelines.len(),
                framebuffers.len()
            );
        }
        passes.len() + pipelines.len() + framebuffers.len()
    }

    /// Destroys every cached object after waiting for the device to go idle.
    pub fn clear(&mut self, device: &D) {
        if self.is_empty() {
            return;
        }
        device.wait_idle();
        self.pipelines.clear(device);
        self.framebuffers.clear(device);
        self.shaders.clear(device);
        self.render_passes.clear(device);
        log::info!("Device caches cleared");
    }

    #[must_use]
    pub fn stats(&self) -> DeviceCacheStats {
        DeviceCacheStats {
            render_passes: self.render_passes.stats(),
            shaders: self.shaders.stats(),
            pipelines: self.pipelines.stats(),
            framebuffers: self.framebuffers.stats(),
        }
    }
}
