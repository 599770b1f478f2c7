//! Cache keys and hashable state mirrors.
//!
//! `wgpu` state types (`BlendState`, `DepthBiasState`, …) do not implement
//! `Hash` / `Eq`. The *mirror* types here keep only the fields relevant for
//! pipeline identity and derive the correct trait impls.
//!
//! [`CacheKey`] is the 64-bit identity of every cached object. It is built
//! from stable structural identifiers only (description ids, subpass index,
//! attachment identities), never from versions, so an entry keeps its key
//! across rebuilds.

use std::fmt;
use std::hash::{Hash, Hasher};

// ─── Cache Key ────────────────────────────────────────────────────────────────

/// 64-bit structural hash. Equal keys are interchangeable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(pub u64);

impl CacheKey {
    /// Hashes any `Hash`-able value with `FxHasher`.
    #[inline]
    #[must_use]
    pub fn of<K: Hash + ?Sized>(key: &K) -> Self {
        Self(fx_hash_key(key))
    }

    #[inline]
    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Compute a `u64` hash of any `Hash`-able value using `FxHasher`.
#[inline]
pub fn fx_hash_key<K: Hash + ?Sized>(key: &K) -> u64 {
    let mut hasher = rustc_hash::FxHasher::default();
    key.hash(&mut hasher);
    hasher.finish()
}

// ─── Hashable Mirror Types ────────────────────────────────────────────────────

/// Hashable mirror of `wgpu::BlendComponent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendComponentKey {
    pub src_factor: wgpu::BlendFactor,
    pub dst_factor: wgpu::BlendFactor,
    pub operation: wgpu::BlendOperation,
}

impl From<wgpu::BlendComponent> for BlendComponentKey {
    fn from(b: wgpu::BlendComponent) -> Self {
        Self {
            src_factor: b.src_factor,
            dst_factor: b.dst_factor,
            operation: b.operation,
        }
    }
}

impl From<BlendComponentKey> for wgpu::BlendComponent {
    fn from(k: BlendComponentKey) -> Self {
        Self {
            src_factor: k.src_factor,
            dst_factor: k.dst_factor,
            operation: k.operation,
        }
    }
}

/// Hashable mirror of `wgpu::BlendState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendStateKey {
    pub color: BlendComponentKey,
    pub alpha: BlendComponentKey,
}

impl BlendStateKey {
    /// Non-premultiplied alpha blending.
    pub const ALPHA_BLENDING: Self = Self {
        color: BlendComponentKey {
            src_factor: wgpu::BlendFactor::SrcAlpha,
            dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
            operation: wgpu::BlendOperation::Add,
        },
        alpha: BlendComponentKey {
            src_factor: wgpu::BlendFactor::One,
            dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
            operation: wgpu::BlendOperation::Add,
        },
    };
}

impl From<wgpu::BlendState> for BlendStateKey {
    fn from(b: wgpu::BlendState) -> Self {
        Self {
            color: b.color.into(),
            alpha: b.alpha.into(),
        }
    }
}

impl From<BlendStateKey> for wgpu::BlendState {
    fn from(k: BlendStateKey) -> Self {
        Self {
            color: k.color.into(),
            alpha: k.alpha.into(),
        }
    }
}

/// Hashable mirror of `wgpu::DepthBiasState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DepthBiasKey {
    pub constant: i32,
    pub slope_scale_bits: u32,
    pub clamp_bits: u32,
}

impl From<wgpu::DepthBiasState> for DepthBiasKey {
    fn from(b: wgpu::DepthBiasState) -> Self {
        Self {
            constant: b.constant,
            slope_scale_bits: b.slope_scale.to_bits(),
            clamp_bits: b.clamp.to_bits(),
        }
    }
}

impl From<DepthBiasKey> for wgpu::DepthBiasState {
    fn from(k: DepthBiasKey) -> Self {
        Self {
            constant: k.constant,
            slope_scale: f32::from_bits(k.slope_scale_bits),
            clamp: f32::from_bits(k.clamp_bits),
        }
    }
}

/// Depth test state of a pipeline. The depth format comes from the render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStateKey {
    pub write: bool,
    pub compare: wgpu::CompareFunction,
    pub bias: DepthBiasKey,
}

impl Default for DepthStateKey {
    fn default() -> Self {
        Self {
            write: true,
            compare: wgpu::CompareFunction::Less,
            bias: DepthBiasKey::default(),
        }
    }
}

impl DepthStateKey {
    /// Expands into full `wgpu` state for a pass with the given depth format.
    #[must_use]
    pub fn to_wgpu(self, format: wgpu::TextureFormat) -> wgpu::DepthStencilState {
        wgpu::DepthStencilState {
            format,
            depth_write_enabled: Some(self.write),
            depth_compare: Some(self.compare),
            stencil: wgpu::StencilState::default(),
            bias: self.bias.into(),
        }
    }
}
