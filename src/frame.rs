//! Per-frame caches.
//!
//! A render context is one independent consumer of uniforms (a window, an
//! offscreen view, a shadow pass...). Each owns a [`UniformDataCache`] with
//! its own buffers and descriptor pools; [`FrameResourceCache`] holds them
//! all and fans frame resets and purges out to every context.

use std::time::Duration;

use slotmap::{Key, SlotMap, new_key_type};

use crate::backend::GpuDevice;
use crate::cache::CacheKey;
use crate::errors::{CacheError, ResourceKind, Result};
use crate::settings::CacheSettings;
use crate::uniforms::UniformDataCache;

new_key_type! {
    pub struct RenderContextKey;
}

pub struct FrameResourceCache<D: GpuDevice> {
    contexts: SlotMap<RenderContextKey, UniformDataCache<D>>,
    settings: CacheSettings,
}

impl<D: GpuDevice> FrameResourceCache<D> {
    #[must_use]
    pub fn new(settings: &CacheSettings) -> Self {
        Self {
            contexts: SlotMap::with_key(),
            settings: settings.clone(),
        }
    }

    pub fn create_context(&mut self, device: &D) -> RenderContextKey {
        let key = self.contexts.insert(UniformDataCache::new(device, &self.settings));
        log::debug!("Render context {key:?} created");
        key
    }

    /// Destroys a context and everything it allocated. Waits for the device
    /// to go idle first.
    pub fn remove_context(&mut self, device: &D, key: RenderContextKey) -> bool {
        let Some(mut context) = self.contexts.remove(key) else {
            log::warn!("Attempted to remove unknown render context {key:?}");
            return false;
        };
        device.wait_idle();
        context.destroy(device);
        true
    }

    pub fn context(&self, key: RenderContextKey) -> Result<&UniformDataCache<D>> {
        self.contexts.get(key).ok_or_else(|| unknown(key))
    }

    pub fn context_mut(&mut self, key: RenderContextKey) -> Result<&mut UniformDataCache<D>> {
        self.contexts.get_mut(key).ok_or_else(|| unknown(key))
    }

    /// Frame boundary for every context.
    pub fn reset_for_next_frame(&mut self, device: &D) {
        for context in self.contexts.values_mut() {
            context.reset_for_next_frame(device);
        }
    }

    #[must_use]
    pub fn has_stale(&self, now: Duration, threshold: Duration) -> bool {
        self.contexts.values().any(|c| c.has_stale(now, threshold))
    }

    /// Purges every context. Returns `(uniform entries, descriptor pools)` removed.
    pub fn purge(&mut self, device: &D, now: Duration, threshold: Duration) -> (usize, usize) {
        self.contexts
            .values_mut()
            .map(|c| c.purge_stale(device, now, threshold))
            .fold((0, 0), |acc, (entries, pools)| (acc.0 + entries, acc.1 + pools))
    }

    pub fn iter(&self) -> impl Iterator<Item = (RenderContextKey, &UniformDataCache<D>)> {
        self.contexts.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Destroys every context. Requires a device-idle point.
    pub fn destroy(&mut self, device: &D) {
        for (_, mut context) in self.contexts.drain() {
            context.destroy(device);
        }
    }
}

fn unknown(key: RenderContextKey) -> CacheError {
    CacheError::UnknownEntry {
        kind: ResourceKind::RenderContext,
        key: CacheKey(key.data().as_ffi()),
    }
}
