//! Native Device Abstraction
//!
//! Every native object the caches own is created and destroyed through the
//! [`GpuDevice`] trait. The caches are generic over it, so the same cache
//! logic drives real hardware and the CPU-only test backend.
//!
//! | Backend | Purpose |
//! |---------|---------|
//! | [`WgpuDevice`] | Production backend over `wgpu::Device` + `wgpu::Queue` |
//! | [`HeadlessDevice`] | Recording backend with counters and failure injection |
//!
//! `wgpu` has no native render-pass, framebuffer or descriptor-pool objects.
//! [`WgpuDevice`] models them as attachment-format signatures, validated view
//! lists and budget accountants respectively, so the cache tiers above stay
//! the same regardless of how a backend realises them.
//!
//! # Binding numbering
//!
//! A set layout is a list of [`SetLayoutEntry`] values in a fixed order:
//! the optional uniform data buffer first, then one entry per texture
//! uniform, then (global scope only) one entry per auxiliary buffer.
//! Backends assign native binding slots in that order. A texture-sampler
//! entry occupies two consecutive slots on `wgpu` (texture, then sampler).

pub mod headless;
pub mod wgpu_backend;

pub use headless::HeadlessDevice;
pub use wgpu_backend::WgpuDevice;

use smallvec::SmallVec;
use thiserror::Error;

use crate::description::{PipelineState, RenderPassDescription, VertexLayout};
use crate::settings::DescriptorPoolSizes;

/// Error reported by a backend when the native API refuses an operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct BackendError(pub String);

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Failure of a single binding-set allocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SetAllocError {
    /// The pool has no room left. The pool-of-pools advances to the next pool.
    #[error("descriptor pool out of memory")]
    OutOfPoolMemory,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Device limits the caches depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Required alignment of uniform-buffer binding offsets.
    pub min_uniform_buffer_offset_alignment: u32,
    /// Largest uniform-buffer range a single binding may cover.
    pub max_uniform_buffer_binding_size: u64,
    /// Largest inline data range a pipeline may declare (0 if unsupported).
    pub max_inline_bytes: u32,
    pub max_texture_dimension_2d: u32,
    pub max_buffer_size: u64,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            min_uniform_buffer_offset_alignment: 256,
            max_uniform_buffer_binding_size: 64 * 1024,
            max_inline_bytes: 128,
            max_texture_dimension_2d: 8192,
            max_buffer_size: 256 * 1024 * 1024,
        }
    }
}

// ─── Binding Layouts ─────────────────────────────────────────────────────────

/// Resource type of one set-layout entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    UniformBuffer,
    /// A sampled texture paired with its sampler.
    TextureSampler {
        dimension: wgpu::TextureViewDimension,
    },
    StorageBuffer {
        read_only: bool,
    },
}

/// One entry of a binding-set layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SetLayoutEntry {
    pub kind: BindingKind,
    pub stages: wgpu::ShaderStages,
}

/// Per-type descriptor counts of a layout, used for pool accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BindingCounts {
    pub uniform_buffers: u32,
    pub sampled_textures: u32,
    pub storage_buffers: u32,
}

impl BindingCounts {
    #[must_use]
    pub fn of(entries: &[SetLayoutEntry]) -> Self {
        let mut counts = Self::default();
        for entry in entries {
            match entry.kind {
                BindingKind::UniformBuffer => counts.uniform_buffers += 1,
                BindingKind::TextureSampler { .. } => counts.sampled_textures += 1,
                BindingKind::StorageBuffer { .. } => counts.storage_buffers += 1,
            }
        }
        counts
    }

    /// Counts of the slots a set of writes fills.
    #[must_use]
    pub fn of_writes<D: GpuDevice>(writes: &[BindingWrite<'_, D>]) -> Self {
        let mut counts = Self::default();
        for write in writes {
            match write {
                BindingWrite::UniformBuffer { .. } => counts.uniform_buffers += 1,
                BindingWrite::TextureSampler { .. } => counts.sampled_textures += 1,
                BindingWrite::StorageBuffer { .. } => counts.storage_buffers += 1,
            }
        }
        counts
    }
}

/// A resource written into one binding slot, in layout order.
pub enum BindingWrite<'a, D: GpuDevice> {
    UniformBuffer {
        buffer: &'a D::Buffer,
        offset: u64,
        size: u64,
    },
    TextureSampler {
        view: &'a D::TextureView,
        sampler: &'a D::Sampler,
    },
    StorageBuffer {
        buffer: &'a D::Buffer,
    },
}

impl<D: GpuDevice> BindingWrite<'_, D> {
    /// Whether this write fits a layout entry.
    #[must_use]
    pub fn matches(&self, entry: &SetLayoutEntry) -> bool {
        matches!(
            (self, entry.kind),
            (Self::UniformBuffer { .. }, BindingKind::UniformBuffer)
                | (Self::TextureSampler { .. }, BindingKind::TextureSampler { .. })
                | (Self::StorageBuffer { .. }, BindingKind::StorageBuffer { .. })
        )
    }
}

// ─── Build Inputs ────────────────────────────────────────────────────────────

/// Everything a backend needs to build one graphics pipeline.
pub struct PipelineBuildInfo<'a, D: GpuDevice> {
    pub label: &'a str,
    pub render_pass: &'a D::RenderPass,
    pub subpass: u32,
    pub color_formats: SmallVec<[wgpu::TextureFormat; 4]>,
    pub depth_format: Option<wgpu::TextureFormat>,
    pub sample_count: u32,
    pub vertex_module: &'a D::ShaderModule,
    pub vertex_entry: &'a str,
    pub fragment: Option<(&'a D::ShaderModule, &'a str)>,
    /// Global, instance and draw layouts. Empty layouts still occupy their index.
    pub set_layouts: [&'a D::SetLayout; 3],
    /// Size of the inline draw-data range, 0 if unused.
    pub inline_size: u32,
    pub state: &'a PipelineState,
    pub vertex_layout: &'a VertexLayout,
}

/// Initial contents of a small 2D texture.
#[derive(Debug, Clone, Copy)]
pub struct TextureInit<'a> {
    pub label: &'a str,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    /// Tightly packed rows.
    pub data: &'a [u8],
}

// ─── Device Trait ────────────────────────────────────────────────────────────

/// Native graphics device as seen by the caches.
///
/// All methods take `&self`; the caches are driven from a single thread and
/// backends are free to use interior mutability.
///
/// # Destruction
///
/// The `destroy_*` hooks are called without an idle point when an entry is
/// rebuilt in place. A backend must defer the native release of an object
/// until commands already submitted against it have completed. `wgpu`
/// handles do this on drop, which is what the default implementations rely
/// on. Purges and [`clear`](crate::DeviceCaches::clear) call
/// [`wait_idle`](Self::wait_idle) first.
pub trait GpuDevice: Sized + 'static {
    type Buffer: Clone;
    type TextureView: Clone;
    type Sampler: Clone;
    type RenderPass;
    type ShaderModule;
    type SetLayout;
    type Pipeline;
    type Framebuffer;
    type DescriptorPool;
    type BindingSet: Clone;

    fn limits(&self) -> DeviceLimits;

    fn create_render_pass(&self, desc: &RenderPassDescription) -> Result<Self::RenderPass, BackendError>;

    fn create_shader_module(
        &self,
        label: &str,
        stage: wgpu::ShaderStages,
        source: &str,
    ) -> Result<Self::ShaderModule, BackendError>;

    fn create_set_layout(&self, label: &str, entries: &[SetLayoutEntry]) -> Result<Self::SetLayout, BackendError>;

    fn create_pipeline(&self, info: &PipelineBuildInfo<'_, Self>) -> Result<Self::Pipeline, BackendError>;

    /// `attachments` are in render-pass order: colors, then depth.
    fn create_framebuffer(
        &self,
        label: &str,
        render_pass: &Self::RenderPass,
        attachments: &[Self::TextureView],
        size: glam::UVec2,
    ) -> Result<Self::Framebuffer, BackendError>;

    /// Creates a uniform buffer of exactly `size` bytes.
    fn create_buffer(&self, label: &str, size: u64) -> Result<Self::Buffer, BackendError>;

    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]);

    fn create_texture(&self, init: &TextureInit<'_>) -> Result<Self::TextureView, BackendError>;

    /// Linear-filtered, repeating sampler.
    fn create_sampler(&self, label: &str) -> Result<Self::Sampler, BackendError>;

    fn create_descriptor_pool(&self, sizes: &DescriptorPoolSizes) -> Result<Self::DescriptorPool, BackendError>;

    fn allocate_set(
        &self,
        pool: &mut Self::DescriptorPool,
        layout: &Self::SetLayout,
        writes: &[BindingWrite<'_, Self>],
    ) -> Result<Self::BindingSet, SetAllocError>;

    /// Recycles every set drawn from `pool`.
    fn reset_pool(&self, pool: &mut Self::DescriptorPool);

    /// Blocks until all submitted work has completed.
    fn wait_idle(&self);

    /// Releases a render pass. Must be deferred past in-flight work, see
    /// [Destruction](GpuDevice#destruction).
    fn destroy_render_pass(&self, render_pass: Self::RenderPass) {
        drop(render_pass);
    }

    fn destroy_shader_module(&self, module: Self::ShaderModule) {
        drop(module);
    }

    fn destroy_set_layout(&self, layout: Self::SetLayout) {
        drop(layout);
    }

    fn destroy_pipeline(&self, pipeline: Self::Pipeline) {
        drop(pipeline);
    }

    fn destroy_framebuffer(&self, framebuffer: Self::Framebuffer) {
        drop(framebuffer);
    }

    fn destroy_buffer(&self, buffer: Self::Buffer) {
        drop(buffer);
    }

    fn destroy_descriptor_pool(&self, pool: Self::DescriptorPool) {
        drop(pool);
    }
}
