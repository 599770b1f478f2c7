#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

//! Versioned GPU resource caches for wgpu renderers.
//!
//! | Tier | Owner | Lifetime |
//! |------|-------|----------|
//! | Render passes, shader variants, pipelines, framebuffers | [`DeviceCaches`] | until stale or invalidated |
//! | Uniform regions and binding sets | [`UniformDataCache`] (one per render context) | per frame or preserved |
//! | Sweeps | [`StalenessReaper`] | fixed period |
//!
//! Everything is reached through a [`CacheContext`].

pub mod allocator;
pub mod backend;
pub mod cache;
pub mod context;
pub mod description;
pub mod errors;
pub mod frame;
pub mod reaper;
pub mod settings;
pub mod uniforms;
pub mod utils;

pub use backend::{DeviceLimits, GpuDevice, HeadlessDevice, WgpuDevice};
pub use cache::{CacheKey, CacheStats, CachedRef, DeviceCacheStats, DeviceCaches};
pub use context::CacheContext;
pub use description::{
    AttachmentDescription, ColorSpace, LoadAction, PipelineDescription, PipelineState, RenderPassDescription,
    RenderTarget, ShaderDefines, ShaderDescription, ShaderStageSource, SubpassDescription, VertexLayout,
};
pub use errors::{CacheError, ResourceKind, Result};
pub use frame::{FrameResourceCache, RenderContextKey};
pub use reaper::{PurgeReport, StalenessReaper};
pub use settings::{CacheSettings, DescriptorPoolSizes};
pub use uniforms::{
    DefaultTexture, GpuTexture, PreparedUniforms, UniformDataCache, UniformLayout, UniformScope, UniformType,
    UniformValue, UniformValueSet,
};
