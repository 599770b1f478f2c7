//! Uniform Data Cache
//!
//! Per-render-context owner of uniform buffer regions and binding sets.
//!
//! # Entry lifecycle
//!
//! ```text
//! Uninitialized ──prepare──▶ Allocated ──set written──▶ Bound
//!                                ▲                        │
//!                                └──── frame reset ───────┘  (preserved entries)
//! ```
//!
//! - Global and instance entries are *preserved*: their buffer region and
//!   serialized bytes survive frame resets. Only their binding sets are lost
//!   when the descriptor pools are reset, and they are rewritten on next use
//!   without re-serializing.
//! - Draw entries are transient: they are dropped at every frame reset and
//!   their regions are wiped in one step by the transient allocator.
//!
//! Entries are keyed by `(scope, id, layout)`: one id prepared against two
//! different layouts owns two regions, so a set returned earlier in the frame
//! never sees its bytes overwritten. Shaders sharing a layout share the
//! region and get one binding set each.
//!
//! Bytes are re-serialized only when the value set's version differs from
//! the entry's `data_version` (or the entry is new). Texture references are
//! resolved before anything is mutated, so a failed call leaves the entry as
//! it was.

use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::defaults::DefaultTextures;
use super::layout::{UniformLayout, UniformScope};
use super::packer::pack_uniforms;
use super::values::UniformValueSet;
use crate::allocator::{BufferBlock, BufferSubAllocator, DescriptorPoolPool};
use crate::backend::{BindingWrite, GpuDevice};
use crate::cache::key::fx_hash_key;
use crate::errors::{CacheError, Result};
use crate::settings::CacheSettings;

/// Observable state of one uniform entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformEntryState {
    /// Created but never serialized.
    Uninitialized,
    /// Data serialized (and uploaded, if buffered); no binding set.
    Allocated,
    /// Binding set written and current.
    Bound,
}

/// Result of a prepare call.
pub struct PreparedUniforms<D: GpuDevice> {
    /// Set to bind at the scope's set index. `None` for inline or empty layouts.
    pub binding_set: Option<D::BindingSet>,
    /// Bytes to push as the draw's inline range.
    pub inline_data: Option<Vec<u8>>,
}

/// The shader-side inputs of a prepare call.
pub struct ShaderBinding<'a, D: GpuDevice> {
    pub layout: &'a UniformLayout,
    pub set_layout: &'a D::SetLayout,
    /// Identifies the native set layout. Changes whenever it is rebuilt.
    pub stamp: u64,
}

/// Counters of one uniform cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UniformStats {
    pub serializations: u64,
    pub set_writes: u64,
    /// Buffer regions handed to entries.
    pub allocations: u64,
}

/// Entry key: scope, caller id and structural hash of the layout.
type EntryKey = (UniformScope, u64, u64);

/// A set written against one native set layout.
struct BoundSet<D: GpuDevice> {
    stamp: u64,
    set: D::BindingSet,
    /// Identities behind the set, in binding order.
    refs: SmallVec<[u64; 4]>,
}

struct UniformDataEntry<D: GpuDevice> {
    /// Sized by the layout in the entry key, so it is never resized.
    region: Option<BufferBlock>,
    bound_sets: SmallVec<[BoundSet<D>; 1]>,
    data_version: Option<u64>,
    preserve: bool,
    bytes: Vec<u8>,
    serialize_count: u64,
    last_used: Duration,
}

impl<D: GpuDevice> UniformDataEntry<D> {
    fn new(scope: UniformScope, now: Duration) -> Self {
        Self {
            region: None,
            bound_sets: SmallVec::new(),
            data_version: None,
            preserve: scope != UniformScope::Draw,
            bytes: Vec::new(),
            serialize_count: 0,
            last_used: now,
        }
    }

    fn state(&self) -> UniformEntryState {
        if !self.bound_sets.is_empty() {
            UniformEntryState::Bound
        } else if self.data_version.is_some() {
            UniformEntryState::Allocated
        } else {
            UniformEntryState::Uninitialized
        }
    }
}

/// Resolved resources for one binding-set write.
enum Resolved<D: GpuDevice> {
    Texture { view: D::TextureView, sampler: D::Sampler },
    Buffer(Arc<D::Buffer>),
}

/// Uniform regions and binding sets of one render context.
pub struct UniformDataCache<D: GpuDevice> {
    entries: FxHashMap<EntryKey, UniformDataEntry<D>>,
    /// Regions of preserved (global/instance) entries.
    persistent: BufferSubAllocator<D>,
    /// Regions of draw entries, wiped every frame.
    transient: BufferSubAllocator<D>,
    pools: DescriptorPoolPool<D>,
    scratch: Vec<u8>,
    stats: UniformStats,
}

impl<D: GpuDevice> UniformDataCache<D> {
    #[must_use]
    pub fn new(device: &D, settings: &CacheSettings) -> Self {
        let alignment = u64::from(device.limits().min_uniform_buffer_offset_alignment);
        Self {
            entries: FxHashMap::default(),
            persistent: BufferSubAllocator::new("Persistent Uniforms", settings.uniform_buffer_capacity, alignment),
            transient: BufferSubAllocator::new("Transient Uniforms", settings.uniform_buffer_capacity, alignment),
            pools: DescriptorPoolPool::new(settings.descriptor_pool),
            scratch: Vec::new(),
            stats: UniformStats::default(),
        }
    }

    /// Brings the entry for `id` under the shader's layout up to date with
    /// `values` and returns what to bind.
    pub fn prepare(
        &mut self,
        device: &D,
        defaults: &mut DefaultTextures<D>,
        shader: &ShaderBinding<'_, D>,
        id: u64,
        values: &UniformValueSet<D>,
        now: Duration,
    ) -> Result<PreparedUniforms<D>> {
        let layout = shader.layout;
        let scope = layout.scope();

        // Resolve references before touching the entry.
        let (resources, refs) = Self::resolve_bindings(device, defaults, layout, values)?;

        let Self {
            entries,
            persistent,
            transient,
            pools,
            scratch,
            stats,
        } = self;
        let allocator = if scope == UniformScope::Draw { transient } else { persistent };

        let entry = entries
            .entry((scope, id, fx_hash_key(layout)))
            .or_insert_with(|| UniformDataEntry::new(scope, now));
        entry.last_used = now;

        // ── Data ──
        let mut region_changed = false;
        if !layout.data().is_empty() {
            let reserialize = entry.data_version != Some(values.version());
            if reserialize {
                pack_uniforms(layout, |name| values.value(name), scratch)?;
            }

            if layout.needs_data_buffer() && entry.region.is_none() {
                match allocator.allocate(device, layout.data_size()) {
                    Ok(block) => {
                        entry.region = Some(block);
                        region_changed = true;
                        stats.allocations += 1;
                    }
                    Err(e) => {
                        entry.bound_sets.clear();
                        entry.data_version = None;
                        return Err(e);
                    }
                }
            }

            if reserialize {
                std::mem::swap(&mut entry.bytes, scratch);
                entry.data_version = Some(values.version());
                entry.serialize_count += 1;
                stats.serializations += 1;
            }

            if (reserialize || region_changed)
                && let Some(block) = &entry.region
            {
                allocator.write(device, block, &entry.bytes);
            }
        } else if entry.data_version.is_none() {
            entry.data_version = Some(values.version());
        }

        // ── Binding set ──
        if !layout.needs_binding_set() {
            entry.bound_sets.clear();
            return Ok(PreparedUniforms {
                binding_set: None,
                inline_data: layout.is_inline().then(|| entry.bytes.clone()).filter(|b| !b.is_empty()),
            });
        }

        let current = entry
            .bound_sets
            .iter()
            .position(|bound| bound.stamp == shader.stamp);
        if let Some(index) = current
            && entry.bound_sets[index].refs == refs
        {
            return Ok(PreparedUniforms {
                binding_set: Some(entry.bound_sets[index].set.clone()),
                inline_data: None,
            });
        }

        let set = {
            let mut writes: SmallVec<[BindingWrite<'_, D>; 8]> = SmallVec::new();
            if let Some(block) = entry.region.as_ref().filter(|_| layout.needs_data_buffer())
                && let Some(buffer) = allocator.buffer(block)
            {
                writes.push(BindingWrite::UniformBuffer {
                    buffer,
                    offset: block.offset,
                    size: layout.data_size(),
                });
            }
            for resource in &resources {
                writes.push(match resource {
                    Resolved::Texture { view, sampler } => BindingWrite::TextureSampler { view, sampler },
                    Resolved::Buffer(buffer) => BindingWrite::StorageBuffer { buffer },
                });
            }
            pools.allocate_set(device, shader.set_layout, &writes, now)?
        };
        let bound = BoundSet {
            stamp: shader.stamp,
            set: set.clone(),
            refs,
        };
        match current {
            Some(index) => entry.bound_sets[index] = bound,
            None => entry.bound_sets.push(bound),
        }
        stats.set_writes += 1;

        Ok(PreparedUniforms {
            binding_set: Some(set),
            inline_data: None,
        })
    }

    /// Resolves texture and buffer uniforms to live resources.
    ///
    /// Unset or expired textures fall back to their default; a required one
    /// without a default fails with [`CacheError::MissingBinding`].
    fn resolve_bindings(
        device: &D,
        defaults: &mut DefaultTextures<D>,
        layout: &UniformLayout,
        values: &UniformValueSet<D>,
    ) -> Result<(SmallVec<[Resolved<D>; 4]>, SmallVec<[u64; 4]>)> {
        let mut resources = SmallVec::new();
        let mut refs = SmallVec::new();

        for uniform in layout.textures() {
            if let Some(texture) = values.texture(&uniform.name) {
                let sampler = match &texture.sampler {
                    Some(sampler) => sampler.clone(),
                    None => defaults.sampler(device)?,
                };
                refs.push(texture.identity);
                resources.push(Resolved::Texture {
                    view: texture.view.clone(),
                    sampler,
                });
                continue;
            }

            let Some(fallback) = uniform.fallback else {
                log::error!("Texture uniform '{}' has no live texture and no default", uniform.name);
                return Err(CacheError::MissingBinding {
                    name: uniform.name.clone(),
                });
            };
            if values.has_texture_ref(&uniform.name) {
                log::warn!(
                    "Texture for uniform '{}' was dropped, using {:?} default",
                    uniform.name,
                    fallback
                );
            }
            refs.push(fallback.identity());
            resources.push(Resolved::Texture {
                view: defaults.texture(device, fallback)?,
                sampler: defaults.sampler(device)?,
            });
        }

        for uniform in layout.buffers() {
            let Some(buffer) = values.buffer(&uniform.name) else {
                log::error!("Buffer uniform '{}' has no live buffer", uniform.name);
                return Err(CacheError::MissingBinding {
                    name: uniform.name.clone(),
                });
            };
            refs.push(Arc::as_ptr(&buffer) as usize as u64);
            resources.push(Resolved::Buffer(buffer));
        }

        Ok((resources, refs))
    }

    /// Frame boundary: drops non-preserved entries, wipes transient regions
    /// and recycles every binding set. Preserved entries keep their regions
    /// and bytes.
    pub fn reset_for_next_frame(&mut self, device: &D) {
        self.entries.retain(|_, entry| entry.preserve);
        for entry in self.entries.values_mut() {
            entry.bound_sets.clear();
        }
        self.transient.free_all();
        self.pools.reset_all(device);
    }

    /// Whether [`purge_stale`](Self::purge_stale) would remove anything.
    #[must_use]
    pub fn has_stale(&self, now: Duration, threshold: Duration) -> bool {
        self.entries
            .values()
            .any(|e| now.saturating_sub(e.last_used) > threshold)
            || self.pools.has_stale(now, threshold)
    }

    /// Removes entries and pools unused for longer than `threshold`.
    ///
    /// Returns `(entries, pools)` removed. Requires a device-idle point.
    pub fn purge_stale(&mut self, device: &D, now: Duration, threshold: Duration) -> (usize, usize) {
        let stale: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, e)| now.saturating_sub(e.last_used) > threshold)
            .map(|(key, _)| *key)
            .collect();

        for key in &stale {
            if let Some(mut entry) = self.entries.remove(key)
                && let Some(block) = entry.region.take()
            {
                if key.0 == UniformScope::Draw {
                    self.transient.free(block);
                } else {
                    self.persistent.free(block);
                }
            }
        }

        let pools = self.pools.purge_stale(device, now, threshold);
        if pools > 0 {
            // Surviving sets may come from a destroyed pool.
            for entry in self.entries.values_mut() {
                entry.bound_sets.clear();
            }
        }
        (stale.len(), pools)
    }

    fn entries_of(&self, scope: UniformScope, id: u64) -> impl Iterator<Item = &UniformDataEntry<D>> {
        self.entries
            .iter()
            .filter(move |((s, i, _), _)| *s == scope && *i == id)
            .map(|(_, entry)| entry)
    }

    /// State of the most recently used entry for `id`, across layouts.
    #[must_use]
    pub fn entry_state(&self, scope: UniformScope, id: u64) -> Option<UniformEntryState> {
        self.entries_of(scope, id)
            .max_by_key(|e| e.last_used)
            .map(UniformDataEntry::state)
    }

    /// How many times bytes were serialized for `id`, summed over layouts.
    #[must_use]
    pub fn serialize_count(&self, scope: UniformScope, id: u64) -> u64 {
        self.entries_of(scope, id).map(|e| e.serialize_count).sum()
    }

    /// Number of layouts `id` currently holds an entry for.
    #[must_use]
    pub fn layout_count(&self, scope: UniformScope, id: u64) -> usize {
        self.entries_of(scope, id).count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn pool_count(&self) -> usize {
        self.pools.pool_count()
    }

    #[must_use]
    pub fn buffer_count(&self) -> usize {
        self.persistent.buffer_count() + self.transient.buffer_count()
    }

    #[must_use]
    pub fn stats(&self) -> UniformStats {
        self.stats
    }

    /// Releases every native object. Requires a device-idle point.
    pub fn destroy(&mut self, device: &D) {
        self.entries.clear();
        self.persistent.destroy(device);
        self.transient.destroy(device);
        self.pools.destroy(device);
    }
}
