//! Cache Settings
//!
//! Configuration for the caching layer. Every field has a production default;
//! applications typically only tune the staleness threshold and pool sizes.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use tessera::CacheSettings;
//!
//! // Defaults: purge every 5 s, evict after 4 s of disuse
//! let settings = CacheSettings::default();
//!
//! // Aggressive eviction for memory-constrained targets
//! let settings = CacheSettings {
//!     staleness_threshold: Duration::from_secs(1),
//!     purge_period: Duration::from_secs(2),
//!     ..Default::default()
//! };
//! ```
//!
//! Settings implement `serde` so they can be loaded from an application's
//! own configuration file.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Fixed capacity of a single native descriptor pool.
///
/// A [`DescriptorPoolPool`](crate::allocator::DescriptorPoolPool) never
/// resizes a pool; when one is exhausted it appends another with the same
/// sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorPoolSizes {
    /// Maximum number of binding sets drawn from one pool.
    pub max_sets: u32,
    /// Uniform-buffer bindings available across all sets of one pool.
    pub uniform_buffers: u32,
    /// Combined texture-sampler bindings available across all sets of one pool.
    pub sampled_textures: u32,
    /// Storage-buffer bindings available across all sets of one pool.
    pub storage_buffers: u32,
}

impl Default for DescriptorPoolSizes {
    fn default() -> Self {
        Self {
            max_sets: 256,
            uniform_buffers: 256,
            sampled_textures: 512,
            storage_buffers: 64,
        }
    }
}

/// Top-level configuration for a [`CacheContext`](crate::CacheContext).
///
/// | Field | Default | Effect |
/// |-------|---------|--------|
/// | `staleness_threshold` | 4 s | Disuse after which entries become purge-eligible |
/// | `purge_period` | 5 s | Interval between scheduled reaper sweeps |
/// | `uniform_buffer_capacity` | 64 KiB | Size of each backing uniform buffer |
/// | `descriptor_pool` | see [`DescriptorPoolSizes`] | Capacity of each native pool |
/// | `max_inline_bytes` | 128 | Upper bound for inline draw-scope data |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Duration of disuse after which a cached object becomes purge-eligible.
    pub staleness_threshold: Duration,
    /// Fixed period of the staleness reaper, independent of frame rate.
    pub purge_period: Duration,
    /// Capacity in bytes of every backing buffer handed to a sub-allocator.
    pub uniform_buffer_capacity: u64,
    /// Sizes of every native descriptor pool.
    pub descriptor_pool: DescriptorPoolSizes,
    /// Largest draw-scope data block that is pushed inline instead of bound.
    ///
    /// Clamped to the device's own inline-data limit.
    pub max_inline_bytes: u32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            staleness_threshold: Duration::from_secs(4),
            purge_period: Duration::from_secs(5),
            uniform_buffer_capacity: 64 * 1024,
            descriptor_pool: DescriptorPoolSizes::default(),
            max_inline_bytes: 128,
        }
    }
}
