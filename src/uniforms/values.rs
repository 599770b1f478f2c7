//! Uniform value sets supplied by the authoring layer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};
use rustc_hash::FxHashMap;

use super::layout::UniformType;
use crate::backend::GpuDevice;
use crate::description::ChangeTracker;

/// A typed data uniform value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    UInt(u32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat3(Mat3),
    Mat4(Mat4),
}

impl UniformValue {
    #[must_use]
    pub fn ty(&self) -> UniformType {
        match self {
            Self::Float(_) => UniformType::Float,
            Self::Int(_) => UniformType::Int,
            Self::UInt(_) => UniformType::UInt,
            Self::Vec2(_) => UniformType::Vec2,
            Self::Vec3(_) => UniformType::Vec3,
            Self::Vec4(_) => UniformType::Vec4,
            Self::Mat3(_) => UniformType::Mat3,
            Self::Mat4(_) => UniformType::Mat4,
        }
    }
}

macro_rules! impl_from_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for UniformValue {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

impl_from_value! {
    f32 => Float,
    i32 => Int,
    u32 => UInt,
    Vec2 => Vec2,
    Vec3 => Vec3,
    Vec4 => Vec4,
    Mat3 => Mat3,
    Mat4 => Mat4,
}

/// A texture view with an optional sampler, owned by the application.
///
/// Value sets hold textures weakly; dropping the last `Arc` invalidates every
/// binding that referenced it.
pub struct GpuTexture<D: GpuDevice> {
    pub identity: u64,
    pub view: D::TextureView,
    /// `None` uses the shared default sampler.
    pub sampler: Option<D::Sampler>,
}

impl<D: GpuDevice> GpuTexture<D> {
    #[must_use]
    pub fn new(identity: u64, view: D::TextureView) -> Self {
        Self {
            identity,
            view,
            sampler: None,
        }
    }

    #[must_use]
    pub fn with_sampler(mut self, sampler: D::Sampler) -> Self {
        self.sampler = Some(sampler);
        self
    }
}

/// Named values for one uniform scope, versioned as a whole.
pub struct UniformValueSet<D: GpuDevice> {
    tracker: ChangeTracker,
    values: FxHashMap<String, UniformValue>,
    textures: FxHashMap<String, Weak<GpuTexture<D>>>,
    buffers: FxHashMap<String, Weak<D::Buffer>>,
}

impl<D: GpuDevice> Default for UniformValueSet<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: GpuDevice> UniformValueSet<D> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tracker: ChangeTracker::new(),
            values: FxHashMap::default(),
            textures: FxHashMap::default(),
            buffers: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.tracker.version()
    }

    pub fn set(&mut self, name: &str, value: impl Into<UniformValue>) {
        self.values.insert(name.to_string(), value.into());
        self.tracker.changed();
    }

    pub fn set_texture(&mut self, name: &str, texture: &Arc<GpuTexture<D>>) {
        self.textures.insert(name.to_string(), Arc::downgrade(texture));
        self.tracker.changed();
    }

    pub fn clear_texture(&mut self, name: &str) {
        if self.textures.remove(name).is_some() {
            self.tracker.changed();
        }
    }

    /// Binds an auxiliary buffer (global scope only).
    pub fn set_buffer(&mut self, name: &str, buffer: &Arc<D::Buffer>) {
        self.buffers.insert(name.to_string(), Arc::downgrade(buffer));
        self.tracker.changed();
    }

    #[must_use]
    pub fn value(&self, name: &str) -> Option<&UniformValue> {
        self.values.get(name)
    }

    /// The live texture bound to `name`, if any.
    #[must_use]
    pub fn texture(&self, name: &str) -> Option<Arc<GpuTexture<D>>> {
        self.textures.get(name).and_then(Weak::upgrade)
    }

    /// Whether a texture was bound to `name` at some point, live or not.
    #[must_use]
    pub fn has_texture_ref(&self, name: &str) -> bool {
        self.textures.contains_key(name)
    }

    #[must_use]
    pub fn buffer(&self, name: &str) -> Option<Arc<D::Buffer>> {
        self.buffers.get(name).and_then(Weak::upgrade)
    }
}

static NEXT_TEXTURE_IDENTITY: AtomicU64 = AtomicU64::new(1);

/// Allocates a process-unique texture identity.
///
/// Identities near `u64::MAX` are reserved for the built-in default textures.
#[must_use]
pub fn next_texture_identity() -> u64 {
    NEXT_TEXTURE_IDENTITY.fetch_add(1, Ordering::Relaxed)
}
