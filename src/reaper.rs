//! Staleness Reaper
//!
//! Periodic sweep that destroys cached objects nobody has used for longer
//! than the staleness threshold.
//!
//! # Sweep order
//!
//! ```text
//! pipelines ──▶ framebuffers ──▶ shader variants ──▶ render passes ──▶ uniform entries / pools
//! ```
//!
//! Dependents are examined first. A surviving pipeline re-marks its render
//! pass and shader variant as used at its own last-use time, and a surviving
//! framebuffer does the same for its render pass, so a dependency becomes
//! purge-eligible only once no live dependent needs it. Dependents of a
//! removed dependency are removed with it.
//!
//! Nothing is destroyed unless something is stale; when something is, one
//! `wait_idle` precedes the first removal.

use std::time::Duration;

use rustc_hash::FxHashSet;

use crate::backend::GpuDevice;
use crate::cache::{CacheKey, Cached, DeviceCaches, ResourceCache};
use crate::frame::FrameResourceCache;
use crate::settings::CacheSettings;

/// Per-tier removal counts of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub pipelines: usize,
    pub framebuffers: usize,
    pub shaders: usize,
    pub render_passes: usize,
    pub uniform_entries: usize,
    pub descriptor_pools: usize,
    /// Whether the sweep established a device-idle point.
    pub waited_idle: bool,
}

impl PurgeReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.pipelines
            + self.framebuffers
            + self.shaders
            + self.render_passes
            + self.uniform_entries
            + self.descriptor_pools
    }
}

/// Fixed-period scheduler for staleness sweeps.
#[derive(Debug, Clone)]
pub struct StalenessReaper {
    period: Duration,
    threshold: Duration,
    last_sweep: Duration,
}

impl StalenessReaper {
    #[must_use]
    pub fn new(settings: &CacheSettings) -> Self {
        Self {
            period: settings.purge_period,
            threshold: settings.staleness_threshold,
            last_sweep: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    #[must_use]
    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Whether a full period has elapsed since the last sweep.
    #[must_use]
    pub fn is_due(&self, now: Duration) -> bool {
        now.saturating_sub(self.last_sweep) >= self.period
    }

    /// Sweeps every tier at `now`.
    ///
    /// Must not interleave with rendering: the caller guarantees no frame is
    /// being recorded.
    pub fn sweep<D: GpuDevice>(
        &mut self,
        device: &D,
        caches: &mut DeviceCaches<D>,
        frames: &mut FrameResourceCache<D>,
        now: Duration,
    ) -> PurgeReport {
        self.last_sweep = now;
        let threshold = self.threshold;

        // ── Pipelines ──
        let mut stale_pipelines: FxHashSet<CacheKey> = caches.pipelines.collect_stale(now, threshold).into_iter().collect();
        let pipeline_deps: Vec<_> = caches
            .pipelines
            .iter()
            .filter(|e| !stale_pipelines.contains(&e.key()))
            .filter_map(|e| e.resource().map(|p| (p.render_pass, p.shader, e.last_used())))
            .collect();
        for (render_pass, shader, used) in pipeline_deps {
            caches.render_passes.touch(render_pass, used);
            caches.shaders.touch(shader, used);
        }

        // ── Framebuffers ──
        let mut stale_framebuffers: FxHashSet<CacheKey> =
            caches.framebuffers.collect_stale(now, threshold).into_iter().collect();
        let framebuffer_deps: Vec<_> = caches
            .framebuffers
            .iter()
            .filter(|e| !stale_framebuffers.contains(&e.key()))
            .filter_map(|e| e.resource().map(|f| (f.render_pass, e.last_used())))
            .collect();
        for (render_pass, used) in framebuffer_deps {
            caches.render_passes.touch(render_pass, used);
        }

        // ── Shader variants and render passes ──
        let stale_shaders: FxHashSet<CacheKey> = caches.shaders.collect_stale(now, threshold).into_iter().collect();
        let stale_passes: FxHashSet<CacheKey> = caches.render_passes.collect_stale(now, threshold).into_iter().collect();

        // Dependents of anything removed go with it.
        stale_pipelines.extend(
            caches
                .pipelines
                .iter()
                .filter(|e| e.depends_on().iter().any(|k| stale_passes.contains(k) || stale_shaders.contains(k)))
                .map(|e| e.key()),
        );
        stale_framebuffers.extend(
            caches
                .framebuffers
                .iter()
                .filter(|e| e.depends_on().iter().any(|k| stale_passes.contains(k)))
                .map(|e| e.key()),
        );

        let device_stale =
            !(stale_pipelines.is_empty() && stale_framebuffers.is_empty() && stale_shaders.is_empty() && stale_passes.is_empty());
        if !device_stale && !frames.has_stale(now, threshold) {
            return PurgeReport::default();
        }

        device.wait_idle();
        let mut report = PurgeReport {
            waited_idle: true,
            ..Default::default()
        };

        report.pipelines = remove_all(&mut caches.pipelines, device, &stale_pipelines);
        report.framebuffers = remove_all(&mut caches.framebuffers, device, &stale_framebuffers);
        report.shaders = remove_all(&mut caches.shaders, device, &stale_shaders);
        report.render_passes = remove_all(&mut caches.render_passes, device, &stale_passes);
        (report.uniform_entries, report.descriptor_pools) = frames.purge(device, now, threshold);

        if report.total() > 0 {
            log::info!(
                "Purged {} pipelines, {} framebuffers, {} shaders, {} render passes, {} uniform entries, {} descriptor pools",
                report.pipelines,
                report.framebuffers,
                report.shaders,
                report.render_passes,
                report.uniform_entries,
                report.descriptor_pools
            );
        }
        report
    }
}

fn remove_all<D: GpuDevice, R: Cached<D>>(cache: &mut ResourceCache<R>, device: &D, keys: &FxHashSet<CacheKey>) -> usize {
    keys.iter().map(|&key| usize::from(cache.remove(device, key))).sum()
}
