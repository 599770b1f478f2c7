//! Cache Context
//!
//! [`CacheContext`] owns the device and every cache tier. It is passed
//! explicitly to whatever records frames; there is no process-wide cache.
//!
//! # Frame protocol
//!
//! ```text
//! reset_for_next_frame ─▶ get_or_create_* / prepare_*_uniforms ─▶ finish_frame ─▶ tick
//! ```
//!
//! - [`reset_for_next_frame`](CacheContext::reset_for_next_frame) opens a
//!   frame: transient uniform data is dropped and descriptor pools recycled.
//! - [`finish_frame`](CacheContext::finish_frame) closes it once the frame's
//!   commands are submitted.
//! - [`tick`](CacheContext::tick) runs the staleness reaper when its period
//!   has elapsed. Purges never run while a frame is open.
//!
//! Every method has an `_at` variant taking an explicit timestamp, which is
//! how tests drive the staleness logic deterministically.

use std::time::Duration;

use glam::UVec2;

use crate::backend::GpuDevice;
use crate::cache::{CacheKey, CachedRef, DeviceCacheStats, DeviceCaches, ShaderVariant, fx_hash_key};
use crate::description::{PipelineDescription, RenderPassDescription, RenderTarget, ShaderDefines, ShaderDescription};
use crate::errors::{CacheError, ResourceKind, Result};
use crate::frame::{FrameResourceCache, RenderContextKey};
use crate::reaper::{PurgeReport, StalenessReaper};
use crate::settings::CacheSettings;
use crate::uniforms::{
    DefaultTextures, PreparedUniforms, ShaderBinding, UniformDataCache, UniformScope, UniformValueSet,
};
use crate::utils::time::Timer;

pub struct CacheContext<D: GpuDevice> {
    device: D,
    settings: CacheSettings,
    caches: DeviceCaches<D>,
    frames: FrameResourceCache<D>,
    defaults: DefaultTextures<D>,
    reaper: StalenessReaper,
    timer: Timer,
    now: Duration,
    frame_open: bool,
    frame_index: u64,
}

impl<D: GpuDevice> CacheContext<D> {
    #[must_use]
    pub fn new(device: D, settings: CacheSettings) -> Self {
        let caches = DeviceCaches::new(&device, &settings);
        let frames = FrameResourceCache::new(&settings);
        let reaper = StalenessReaper::new(&settings);
        log::info!(
            "Cache context created: staleness {:?}, purge period {:?}, inline limit {} bytes",
            settings.staleness_threshold,
            settings.purge_period,
            caches.max_inline_bytes()
        );
        Self {
            device,
            settings,
            caches,
            frames,
            defaults: DefaultTextures::new(),
            reaper,
            timer: Timer::new(),
            now: Duration::ZERO,
            frame_open: false,
            frame_index: 0,
        }
    }

    #[must_use]
    pub fn device(&self) -> &D {
        &self.device
    }

    #[must_use]
    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Timestamp stamped on every use in the current frame.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.now
    }

    #[must_use]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    #[must_use]
    pub fn is_frame_open(&self) -> bool {
        self.frame_open
    }

    #[must_use]
    pub fn caches(&self) -> &DeviceCaches<D> {
        &self.caches
    }

    #[must_use]
    pub fn frames(&self) -> &FrameResourceCache<D> {
        &self.frames
    }

    // ─── Render Contexts ──────────────────────────────────────────────────────

    pub fn create_render_context(&mut self) -> RenderContextKey {
        self.frames.create_context(&self.device)
    }

    pub fn remove_render_context(&mut self, key: RenderContextKey) -> bool {
        self.frames.remove_context(&self.device, key)
    }

    pub fn render_context(&self, key: RenderContextKey) -> Result<&UniformDataCache<D>> {
        self.frames.context(key)
    }

    // ─── Device Caches ────────────────────────────────────────────────────────

    pub fn get_or_create_render_pass(&mut self, desc: &RenderPassDescription) -> Result<CachedRef> {
        self.caches.get_or_create_render_pass(&self.device, desc, self.now)
    }

    pub fn get_or_create_shader(&mut self, shader: &ShaderDescription, defines: &ShaderDefines) -> Result<CachedRef> {
        self.caches.get_or_create_shader(&self.device, shader, defines, self.now)
    }

    pub fn get_or_create_pipeline(
        &mut self,
        pipeline: &PipelineDescription,
        pass: &RenderPassDescription,
        shader: &ShaderDescription,
    ) -> Result<CachedRef> {
        self.caches
            .get_or_create_pipeline(&self.device, pipeline, pass, shader, self.now)
    }

    pub fn get_or_create_framebuffer(
        &mut self,
        render_pass: CachedRef,
        targets: &[RenderTarget<D>],
        size: UVec2,
    ) -> Result<CachedRef> {
        self.caches
            .get_or_create_framebuffer(&self.device, render_pass, targets, size, self.now)
    }

    /// Marks every variant of shader `id` and its pipelines purge-eligible.
    pub fn invalidate_shader(&mut self, id: u64) -> usize {
        self.caches.invalidate_shader(id)
    }

    /// Marks render pass `id` and its dependents purge-eligible.
    pub fn invalidate_render_pass(&mut self, id: u64) -> usize {
        self.caches.invalidate_render_pass(id)
    }

    /// Drops every device-level cached object. Refused while a frame is open.
    pub fn clear(&mut self) -> Result<()> {
        if self.frame_open {
            return Err(CacheError::FrameInProgress);
        }
        self.caches.clear(&self.device);
        Ok(())
    }

    #[must_use]
    pub fn stats(&self) -> DeviceCacheStats {
        self.caches.stats()
    }

    // ─── Uniforms ─────────────────────────────────────────────────────────────

    /// Per-frame data of render context `context`, bound at set 0.
    pub fn prepare_global_uniforms(
        &mut self,
        context: RenderContextKey,
        shader: CachedRef,
        id: u64,
        values: &UniformValueSet<D>,
    ) -> Result<PreparedUniforms<D>> {
        self.prepare_uniforms(UniformScope::Global, context, shader, id, values)
    }

    /// Per-material data, bound at set 1.
    pub fn prepare_instance_uniforms(
        &mut self,
        context: RenderContextKey,
        shader: CachedRef,
        id: u64,
        values: &UniformValueSet<D>,
    ) -> Result<PreparedUniforms<D>> {
        self.prepare_uniforms(UniformScope::Instance, context, shader, id, values)
    }

    /// Per-draw data: inline bytes, or a set at index 2 when the draw layout
    /// has textures.
    pub fn prepare_draw_uniforms(
        &mut self,
        context: RenderContextKey,
        shader: CachedRef,
        id: u64,
        values: &UniformValueSet<D>,
    ) -> Result<PreparedUniforms<D>> {
        self.prepare_uniforms(UniformScope::Draw, context, shader, id, values)
    }

    fn prepare_uniforms(
        &mut self,
        scope: UniformScope,
        context: RenderContextKey,
        shader: CachedRef,
        id: u64,
        values: &UniformValueSet<D>,
    ) -> Result<PreparedUniforms<D>> {
        self.caches.shaders.touch(shader.key, self.now);
        let (variant, stamp) = shader_variant(&self.caches, shader.key)?;
        let binding = ShaderBinding {
            layout: variant.layout(scope),
            set_layout: variant.set_layout(scope),
            stamp,
        };
        let cache = self.frames.context_mut(context)?;
        cache.prepare(&self.device, &mut self.defaults, &binding, id, values, self.now)
    }

    // ─── Frame Lifecycle ──────────────────────────────────────────────────────

    /// Opens a frame at the timer's current time.
    pub fn reset_for_next_frame(&mut self) {
        let now = self.timer.tick();
        self.reset_for_next_frame_at(now);
    }

    /// Opens a frame at `now`. Resets every render context: draw-scope
    /// entries are dropped and every descriptor pool is recycled.
    pub fn reset_for_next_frame_at(&mut self, now: Duration) {
        if self.frame_open {
            log::debug!("Frame {} was never finished", self.frame_index);
        }
        self.now = self.now.max(now);
        self.frames.reset_for_next_frame(&self.device);
        self.frame_open = true;
        self.frame_index += 1;
    }

    /// Closes the current frame. Purges are allowed again.
    pub fn finish_frame(&mut self) {
        self.frame_open = false;
    }

    /// Sweeps every tier now, regardless of the reaper period.
    pub fn purge_stale_resources(&mut self) -> Result<PurgeReport> {
        let now = self.timer.peek();
        self.purge_stale_resources_at(now)
    }

    pub fn purge_stale_resources_at(&mut self, now: Duration) -> Result<PurgeReport> {
        if self.frame_open {
            log::warn!("Purge refused: frame {} is still open", self.frame_index);
            return Err(CacheError::FrameInProgress);
        }
        self.now = self.now.max(now);
        Ok(self
            .reaper
            .sweep(&self.device, &mut self.caches, &mut self.frames, self.now))
    }

    /// Scheduler entry point: sweeps when the reaper period has elapsed.
    pub fn tick(&mut self) -> Option<PurgeReport> {
        let now = self.timer.peek();
        self.tick_at(now)
    }

    /// Returns `None` when no sweep was due, or when one was due but a frame
    /// is open (the sweep is deferred to the next tick).
    pub fn tick_at(&mut self, now: Duration) -> Option<PurgeReport> {
        if !self.reaper.is_due(now) {
            return None;
        }
        if self.frame_open {
            log::warn!("Scheduled purge deferred: frame {} is still open", self.frame_index);
            return None;
        }
        self.purge_stale_resources_at(now).ok()
    }
}

/// The built variant behind `key` and the stamp identifying its layouts.
fn shader_variant<D: GpuDevice>(caches: &DeviceCaches<D>, key: CacheKey) -> Result<(&ShaderVariant<D>, u64)> {
    caches
        .shader_entry(key)
        .and_then(|entry| Some((entry.resource()?, fx_hash_key(&(key, entry.build_id())))))
        .ok_or(CacheError::UnknownEntry {
            kind: ResourceKind::ShaderVariant,
            key,
        })
}

impl<D: GpuDevice> Drop for CacheContext<D> {
    fn drop(&mut self) {
        if self.caches.is_empty() && self.frames.is_empty() {
            return;
        }
        self.device.wait_idle();
        self.frames.destroy(&self.device);
        self.caches.clear(&self.device);
    }
}
