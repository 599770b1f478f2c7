//! Growable pool of fixed-capacity descriptor pools.
//!
//! Binding sets are drawn from the most recent pool until it reports
//! [`SetAllocError::OutOfPoolMemory`]; the allocator then advances to the
//! next pool, appending a new one when every pool is exhausted. A set that
//! could not fit even an empty pool is refused up front and leaves the
//! pools untouched. Pools are
//! never resized and never destroyed mid-frame. [`DescriptorPoolPool::reset_all`]
//! recycles every set at the frame boundary, and
//! [`DescriptorPoolPool::purge_stale`] destroys pools that have not served an
//! allocation for longer than the staleness threshold.

use std::time::Duration;

use crate::backend::{BindingCounts, BindingWrite, GpuDevice, SetAllocError};
use crate::errors::{CacheError, ResourceKind, Result};
use crate::settings::DescriptorPoolSizes;

// ─── Pool Budget ─────────────────────────────────────────────────────────────

/// Capacity accountant for one pool.
///
/// Backends without native descriptor pools use it to reproduce their
/// exhaustion behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolBudget {
    sizes: DescriptorPoolSizes,
    sets: u32,
    used: BindingCounts,
}

impl PoolBudget {
    #[must_use]
    pub fn new(sizes: DescriptorPoolSizes) -> Self {
        Self {
            sizes,
            sets: 0,
            used: BindingCounts::default(),
        }
    }

    /// Reserves room for one set with the given descriptor counts.
    ///
    /// Returns `false` (and reserves nothing) if any limit would be exceeded.
    pub fn try_reserve(&mut self, counts: BindingCounts) -> bool {
        let fits = self.sets < self.sizes.max_sets
            && self.used.uniform_buffers + counts.uniform_buffers <= self.sizes.uniform_buffers
            && self.used.sampled_textures + counts.sampled_textures <= self.sizes.sampled_textures
            && self.used.storage_buffers + counts.storage_buffers <= self.sizes.storage_buffers;
        if fits {
            self.sets += 1;
            self.used.uniform_buffers += counts.uniform_buffers;
            self.used.sampled_textures += counts.sampled_textures;
            self.used.storage_buffers += counts.storage_buffers;
        }
        fits
    }

    pub fn reset(&mut self) {
        self.sets = 0;
        self.used = BindingCounts::default();
    }

    #[must_use]
    pub fn allocated_sets(&self) -> u32 {
        self.sets
    }
}

// ─── Pool of Pools ───────────────────────────────────────────────────────────

struct PoolSlot<P> {
    pool: P,
    last_allocate: Duration,
}

/// Growable set of native descriptor pools owned by one render context.
pub struct DescriptorPoolPool<D: GpuDevice> {
    sizes: DescriptorPoolSizes,
    pools: Vec<PoolSlot<D::DescriptorPool>>,
    /// Index of the pool tried first.
    current: usize,
}

impl<D: GpuDevice> DescriptorPoolPool<D> {
    #[must_use]
    pub fn new(sizes: DescriptorPoolSizes) -> Self {
        Self {
            sizes,
            pools: Vec::new(),
            current: 0,
        }
    }

    /// Allocates one binding set, growing the pool list if every pool is full.
    pub fn allocate_set(
        &mut self,
        device: &D,
        layout: &D::SetLayout,
        writes: &[BindingWrite<'_, D>],
        now: Duration,
    ) -> Result<D::BindingSet> {
        if !PoolBudget::new(self.sizes).try_reserve(BindingCounts::of_writes(writes)) {
            log::warn!("Binding set with {} writes exceeds the capacity of one descriptor pool", writes.len());
            return Err(self.exhausted(writes));
        }

        let start = self.current;
        while self.current < self.pools.len() {
            let slot = &mut self.pools[self.current];
            match device.allocate_set(&mut slot.pool, layout, writes) {
                Ok(set) => {
                    slot.last_allocate = now;
                    return Ok(set);
                }
                Err(SetAllocError::OutOfPoolMemory) => self.current += 1,
                Err(SetAllocError::Backend(e)) => {
                    return Err(CacheError::build(ResourceKind::BindingSet, "binding set", e));
                }
            }
        }

        let mut pool = device
            .create_descriptor_pool(&self.sizes)
            .map_err(|e| CacheError::build(ResourceKind::DescriptorPool, "descriptor pool", e))?;
        log::info!("Descriptor pool #{} created", self.pools.len());

        match device.allocate_set(&mut pool, layout, writes) {
            Ok(set) => {
                self.pools.push(PoolSlot {
                    pool,
                    last_allocate: now,
                });
                self.current = self.pools.len() - 1;
                Ok(set)
            }
            Err(SetAllocError::OutOfPoolMemory) => {
                device.destroy_descriptor_pool(pool);
                self.current = start;
                Err(self.exhausted(writes))
            }
            Err(SetAllocError::Backend(e)) => {
                device.destroy_descriptor_pool(pool);
                self.current = start;
                Err(CacheError::build(ResourceKind::BindingSet, "binding set", e))
            }
        }
    }

    fn exhausted(&self, writes: &[BindingWrite<'_, D>]) -> CacheError {
        CacheError::AllocationExhaustion {
            resource: "descriptor pool",
            requested: writes.len() as u64,
            capacity: u64::from(self.sizes.max_sets),
        }
    }

    /// Recycles every set in every pool. Sets handed out earlier become invalid.
    pub fn reset_all(&mut self, device: &D) {
        for slot in &mut self.pools {
            device.reset_pool(&mut slot.pool);
        }
        self.current = 0;
    }

    /// Destroys pools idle for longer than `threshold`.
    ///
    /// The caller must have established a device-idle point and must not hold
    /// sets from the current frame.
    pub fn purge_stale(&mut self, device: &D, now: Duration, threshold: Duration) -> usize {
        let before = self.pools.len();
        let (keep, stale): (Vec<_>, Vec<_>) = self
            .pools
            .drain(..)
            .partition(|slot| now.saturating_sub(slot.last_allocate) <= threshold);
        self.pools = keep;
        for slot in stale {
            device.destroy_descriptor_pool(slot.pool);
        }
        self.current = 0;
        before - self.pools.len()
    }

    /// Whether any pool would be removed by [`purge_stale`](Self::purge_stale).
    #[must_use]
    pub fn has_stale(&self, now: Duration, threshold: Duration) -> bool {
        self.pools
            .iter()
            .any(|slot| now.saturating_sub(slot.last_allocate) > threshold)
    }

    #[must_use]
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    pub fn destroy(&mut self, device: &D) {
        for slot in self.pools.drain(..) {
            device.destroy_descriptor_pool(slot.pool);
        }
        self.current = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_refuses_past_set_limit() {
        let mut budget = PoolBudget::new(DescriptorPoolSizes {
            max_sets: 2,
            ..Default::default()
        });
        let counts = BindingCounts {
            uniform_buffers: 1,
            ..Default::default()
        };
        assert!(budget.try_reserve(counts));
        assert!(budget.try_reserve(counts));
        assert!(!budget.try_reserve(counts));
        budget.reset();
        assert!(budget.try_reserve(counts));
    }

    #[test]
    fn budget_counts_descriptor_types_separately() {
        let mut budget = PoolBudget::new(DescriptorPoolSizes {
            max_sets: 8,
            uniform_buffers: 8,
            sampled_textures: 1,
            storage_buffers: 0,
        });
        let texture = BindingCounts {
            sampled_textures: 1,
            ..Default::default()
        };
        assert!(budget.try_reserve(texture));
        assert!(!budget.try_reserve(texture));
        assert_eq!(budget.allocated_sets(), 1);
    }
}
