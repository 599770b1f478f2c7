//! Headless Backend
//!
//! A CPU-only [`GpuDevice`] that records what the caches ask of it. Handles
//! are small id-carrying structs; buffers keep their bytes so callers can
//! inspect what was uploaded.
//!
//! Besides counters, the device supports failure injection
//! ([`HeadlessDevice::fail_next`]) and configurable limits, which lets the
//! cache logic be exercised without a GPU.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use glam::UVec2;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::{
    BackendError, BindingCounts, BindingWrite, DeviceLimits, GpuDevice, PipelineBuildInfo,
    SetAllocError, SetLayoutEntry, TextureInit,
};
use crate::allocator::PoolBudget;
use crate::description::{RenderPassDescription, RenderTarget};
use crate::errors::ResourceKind;
use crate::settings::DescriptorPoolSizes;

// ─── Handles ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HeadlessBuffer {
    pub id: u64,
    pub size: u64,
    data: Rc<RefCell<Vec<u8>>>,
}

impl HeadlessBuffer {
    /// Copy of the buffer's current contents.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.data.borrow().clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessView {
    pub id: u64,
    pub format: wgpu::TextureFormat,
    pub size: UVec2,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessSampler {
    pub id: u64,
}

#[derive(Debug)]
pub struct HeadlessRenderPass {
    pub id: u64,
    pub formats: SmallVec<[wgpu::TextureFormat; 5]>,
}

#[derive(Debug)]
pub struct HeadlessShaderModule {
    pub id: u64,
    pub stage: wgpu::ShaderStages,
}

#[derive(Debug)]
pub struct HeadlessSetLayout {
    pub id: u64,
    pub entries: Vec<SetLayoutEntry>,
}

#[derive(Debug)]
pub struct HeadlessPipeline {
    pub id: u64,
    pub label: String,
    pub inline_size: u32,
}

#[derive(Debug)]
pub struct HeadlessFramebuffer {
    pub id: u64,
    pub attachments: Vec<u64>,
    pub size: UVec2,
}

#[derive(Debug)]
pub struct HeadlessPool {
    pub id: u64,
    budget: PoolBudget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessBindingSet {
    pub id: u64,
    pub pool: u64,
    pub layout: u64,
    /// Ids of the resources written, in binding order.
    pub resources: Vec<u64>,
    /// Byte offset of each write; 0 for textures and whole-buffer bindings.
    pub offsets: Vec<u64>,
}

// ─── Device ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Counters {
    created: FxHashMap<ResourceKind, u64>,
    destroyed: FxHashMap<ResourceKind, u64>,
    buffer_writes: u64,
    bytes_written: u64,
    pool_resets: u64,
    wait_idle_calls: u64,
}

/// Recording backend without a GPU.
#[derive(Debug)]
pub struct HeadlessDevice {
    limits: DeviceLimits,
    next_id: Cell<u64>,
    counters: RefCell<Counters>,
    failures: RefCell<Vec<ResourceKind>>,
    buffers: RefCell<FxHashMap<u64, Weak<RefCell<Vec<u8>>>>>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(DeviceLimits::default())
    }

    #[must_use]
    pub fn with_limits(limits: DeviceLimits) -> Self {
        Self {
            limits,
            next_id: Cell::new(1),
            counters: RefCell::new(Counters::default()),
            failures: RefCell::new(Vec::new()),
            buffers: RefCell::new(FxHashMap::default()),
        }
    }

    /// Makes the next creation of `kind` fail with a backend error.
    pub fn fail_next(&self, kind: ResourceKind) {
        self.failures.borrow_mut().push(kind);
    }

    /// Number of objects of `kind` created so far.
    #[must_use]
    pub fn created(&self, kind: ResourceKind) -> u64 {
        self.counters.borrow().created.get(&kind).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn destroyed(&self, kind: ResourceKind) -> u64 {
        self.counters.borrow().destroyed.get(&kind).copied().unwrap_or(0)
    }

    /// Created minus destroyed.
    #[must_use]
    pub fn live(&self, kind: ResourceKind) -> u64 {
        self.created(kind) - self.destroyed(kind)
    }

    #[must_use]
    pub fn buffer_writes(&self) -> u64 {
        self.counters.borrow().buffer_writes
    }

    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.counters.borrow().bytes_written
    }

    #[must_use]
    pub fn pool_resets(&self) -> u64 {
        self.counters.borrow().pool_resets
    }

    #[must_use]
    pub fn wait_idle_calls(&self) -> u64 {
        self.counters.borrow().wait_idle_calls
    }

    /// Current contents of buffer `id`, if it is still alive.
    #[must_use]
    pub fn buffer_contents(&self, id: u64) -> Option<Vec<u8>> {
        let data = self.buffers.borrow().get(&id)?.upgrade()?;
        let bytes = data.borrow().clone();
        Some(bytes)
    }

    /// Creates a view standing in for an application-owned image.
    #[must_use]
    pub fn create_view(&self, format: wgpu::TextureFormat, size: UVec2) -> HeadlessView {
        HeadlessView {
            id: self.next_id(),
            format,
            size,
        }
    }

    /// Convenience: a render target over a fresh view, identified by the view id.
    #[must_use]
    pub fn create_target(&self, format: wgpu::TextureFormat, size: UVec2) -> RenderTarget<Self> {
        let view = self.create_view(format, size);
        RenderTarget::new(view.id, format, size, view)
    }

    fn next_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn begin_create(&self, kind: ResourceKind) -> Result<u64, BackendError> {
        let mut failures = self.failures.borrow_mut();
        if let Some(index) = failures.iter().position(|&k| k == kind) {
            failures.remove(index);
            return Err(BackendError::new(format!("injected {kind} failure")));
        }
        *self.counters.borrow_mut().created.entry(kind).or_default() += 1;
        Ok(self.next_id())
    }

    fn record_destroy(&self, kind: ResourceKind) {
        *self.counters.borrow_mut().destroyed.entry(kind).or_default() += 1;
    }
}

impl GpuDevice for HeadlessDevice {
    type Buffer = HeadlessBuffer;
    type TextureView = HeadlessView;
    type Sampler = HeadlessSampler;
    type RenderPass = HeadlessRenderPass;
    type ShaderModule = HeadlessShaderModule;
    type SetLayout = HeadlessSetLayout;
    type Pipeline = HeadlessPipeline;
    type Framebuffer = HeadlessFramebuffer;
    type DescriptorPool = HeadlessPool;
    type BindingSet = HeadlessBindingSet;

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_render_pass(&self, desc: &RenderPassDescription) -> Result<Self::RenderPass, BackendError> {
        let id = self.begin_create(ResourceKind::RenderPass)?;
        Ok(HeadlessRenderPass {
            id,
            formats: desc.attachment_formats().collect(),
        })
    }

    fn create_shader_module(
        &self,
        label: &str,
        stage: wgpu::ShaderStages,
        source: &str,
    ) -> Result<Self::ShaderModule, BackendError> {
        if source.trim().is_empty() {
            return Err(BackendError::new(format!("'{label}': empty shader source")));
        }
        let id = self.begin_create(ResourceKind::ShaderModule)?;
        Ok(HeadlessShaderModule { id, stage })
    }

    fn create_set_layout(&self, _label: &str, entries: &[SetLayoutEntry]) -> Result<Self::SetLayout, BackendError> {
        let id = self.begin_create(ResourceKind::SetLayout)?;
        Ok(HeadlessSetLayout {
            id,
            entries: entries.to_vec(),
        })
    }

    fn create_pipeline(&self, info: &PipelineBuildInfo<'_, Self>) -> Result<Self::Pipeline, BackendError> {
        if info.inline_size > self.limits.max_inline_bytes {
            return Err(BackendError::new(format!(
                "inline range of {} bytes exceeds device limit {}",
                info.inline_size, self.limits.max_inline_bytes
            )));
        }
        let id = self.begin_create(ResourceKind::Pipeline)?;
        Ok(HeadlessPipeline {
            id,
            label: info.label.to_string(),
            inline_size: info.inline_size,
        })
    }

    fn create_framebuffer(
        &self,
        _label: &str,
        render_pass: &Self::RenderPass,
        attachments: &[Self::TextureView],
        size: UVec2,
    ) -> Result<Self::Framebuffer, BackendError> {
        if attachments.len() != render_pass.formats.len() {
            return Err(BackendError::new("attachment count does not match render pass"));
        }
        let id = self.begin_create(ResourceKind::Framebuffer)?;
        Ok(HeadlessFramebuffer {
            id,
            attachments: attachments.iter().map(|v| v.id).collect(),
            size,
        })
    }

    fn create_buffer(&self, _label: &str, size: u64) -> Result<Self::Buffer, BackendError> {
        if size > self.limits.max_buffer_size {
            return Err(BackendError::new(format!("buffer of {size} bytes exceeds device limit")));
        }
        let id = self.begin_create(ResourceKind::Buffer)?;
        let data = Rc::new(RefCell::new(vec![0; size as usize]));
        self.buffers.borrow_mut().insert(id, Rc::downgrade(&data));
        Ok(HeadlessBuffer { id, size, data })
    }

    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]) {
        let start = offset as usize;
        let mut bytes = buffer.data.borrow_mut();
        let end = (start + data.len()).min(bytes.len());
        if start < end {
            bytes[start..end].copy_from_slice(&data[..end - start]);
        }

        let mut counters = self.counters.borrow_mut();
        counters.buffer_writes += 1;
        counters.bytes_written += data.len() as u64;
    }

    fn create_texture(&self, init: &TextureInit<'_>) -> Result<Self::TextureView, BackendError> {
        let max = self.limits.max_texture_dimension_2d;
        if init.width > max || init.height > max {
            return Err(BackendError::new(format!("texture '{}' exceeds {max}px", init.label)));
        }
        let id = self.begin_create(ResourceKind::Texture)?;
        Ok(HeadlessView {
            id,
            format: init.format,
            size: UVec2::new(init.width, init.height),
        })
    }

    fn create_sampler(&self, _label: &str) -> Result<Self::Sampler, BackendError> {
        let id = self.begin_create(ResourceKind::Sampler)?;
        Ok(HeadlessSampler { id })
    }

    fn create_descriptor_pool(&self, sizes: &DescriptorPoolSizes) -> Result<Self::DescriptorPool, BackendError> {
        let id = self.begin_create(ResourceKind::DescriptorPool)?;
        Ok(HeadlessPool {
            id,
            budget: PoolBudget::new(*sizes),
        })
    }

    fn allocate_set(
        &self,
        pool: &mut Self::DescriptorPool,
        layout: &Self::SetLayout,
        writes: &[BindingWrite<'_, Self>],
    ) -> Result<Self::BindingSet, SetAllocError> {
        if writes.len() != layout.entries.len()
            || !writes.iter().zip(&layout.entries).all(|(w, e)| w.matches(e))
        {
            return Err(BackendError::new("binding writes do not match set layout").into());
        }
        if !pool.budget.try_reserve(BindingCounts::of(&layout.entries)) {
            return Err(SetAllocError::OutOfPoolMemory);
        }
        let id = self.begin_create(ResourceKind::BindingSet)?;

        let (resources, offsets): (Vec<u64>, Vec<u64>) = writes
            .iter()
            .map(|w| match w {
                BindingWrite::UniformBuffer { buffer, offset, .. } => (buffer.id, *offset),
                BindingWrite::StorageBuffer { buffer } => (buffer.id, 0),
                BindingWrite::TextureSampler { view, .. } => (view.id, 0),
            })
            .unzip();

        Ok(HeadlessBindingSet {
            id,
            pool: pool.id,
            layout: layout.id,
            resources,
            offsets,
        })
    }

    fn reset_pool(&self, pool: &mut Self::DescriptorPool) {
        pool.budget.reset();
        self.counters.borrow_mut().pool_resets += 1;
    }

    fn wait_idle(&self) {
        self.counters.borrow_mut().wait_idle_calls += 1;
    }

    fn destroy_render_pass(&self, _render_pass: Self::RenderPass) {
        self.record_destroy(ResourceKind::RenderPass);
    }

    fn destroy_shader_module(&self, _module: Self::ShaderModule) {
        self.record_destroy(ResourceKind::ShaderModule);
    }

    fn destroy_set_layout(&self, _layout: Self::SetLayout) {
        self.record_destroy(ResourceKind::SetLayout);
    }

    fn destroy_pipeline(&self, _pipeline: Self::Pipeline) {
        self.record_destroy(ResourceKind::Pipeline);
    }

    fn destroy_framebuffer(&self, _framebuffer: Self::Framebuffer) {
        self.record_destroy(ResourceKind::Framebuffer);
    }

    fn destroy_buffer(&self, buffer: Self::Buffer) {
        self.buffers.borrow_mut().remove(&buffer.id);
        self.record_destroy(ResourceKind::Buffer);
    }

    fn destroy_descriptor_pool(&self, _pool: Self::DescriptorPool) {
        self.record_destroy(ResourceKind::DescriptorPool);
    }
}
