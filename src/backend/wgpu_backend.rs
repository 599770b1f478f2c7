//! `wgpu` Backend
//!
//! | Cache concept | `wgpu` realisation |
//! |---------------|--------------------|
//! | Render pass | Attachment-format signature checked against pipelines and framebuffers |
//! | Binding-set layout | `wgpu::BindGroupLayout` plus its descriptor counts |
//! | Descriptor pool | [`PoolBudget`] accountant over bind-group creation |
//! | Binding set | `wgpu::BindGroup` |
//! | Framebuffer | Ordered `wgpu::TextureView`s |
//! | Inline draw data | Pipeline immediates (`immediate_size`) |
//!
//! `wgpu` reports most validation failures asynchronously through the
//! device's error handler rather than from the creating call. This backend
//! checks what it can up front and returns [`BackendError`] for those
//! cases.

use std::num::NonZeroU64;

use glam::UVec2;
use smallvec::SmallVec;

use super::{
    BackendError, BindingCounts, BindingKind, BindingWrite, DeviceLimits, GpuDevice,
    PipelineBuildInfo, SetAllocError, SetLayoutEntry, TextureInit,
};
use crate::allocator::PoolBudget;
use crate::cache::key::DepthStateKey;
use crate::description::RenderPassDescription;
use crate::settings::DescriptorPoolSizes;

/// Attachment signature of a render pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WgpuRenderPass {
    pub color_formats: SmallVec<[wgpu::TextureFormat; 4]>,
    pub depth_format: Option<wgpu::TextureFormat>,
    pub sample_count: u32,
}

#[derive(Debug)]
pub struct WgpuSetLayout {
    pub layout: wgpu::BindGroupLayout,
    pub entries: Vec<SetLayoutEntry>,
    pub counts: BindingCounts,
}

#[derive(Debug)]
pub struct WgpuFramebuffer {
    pub views: Vec<wgpu::TextureView>,
    pub size: UVec2,
}

/// Production backend.
#[derive(Debug, Clone)]
pub struct WgpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl WgpuDevice {
    #[must_use]
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self { device, queue }
    }
}

impl GpuDevice for WgpuDevice {
    type Buffer = wgpu::Buffer;
    type TextureView = wgpu::TextureView;
    type Sampler = wgpu::Sampler;
    type RenderPass = WgpuRenderPass;
    type ShaderModule = wgpu::ShaderModule;
    type SetLayout = WgpuSetLayout;
    type Pipeline = wgpu::RenderPipeline;
    type Framebuffer = WgpuFramebuffer;
    type DescriptorPool = PoolBudget;
    type BindingSet = wgpu::BindGroup;

    fn limits(&self) -> DeviceLimits {
        let limits = self.device.limits();
        DeviceLimits {
            min_uniform_buffer_offset_alignment: limits.min_uniform_buffer_offset_alignment,
            max_uniform_buffer_binding_size: u64::from(limits.max_uniform_buffer_binding_size),
            max_inline_bytes: limits.max_immediate_size,
            max_texture_dimension_2d: limits.max_texture_dimension_2d,
            max_buffer_size: limits.max_buffer_size,
        }
    }

    fn create_render_pass(&self, desc: &RenderPassDescription) -> Result<Self::RenderPass, BackendError> {
        if desc.color_attachments.is_empty() && desc.depth_attachment.is_none() {
            return Err(BackendError::new(format!("render pass '{}' has no attachments", desc.label)));
        }
        Ok(WgpuRenderPass {
            color_formats: desc.color_attachments.iter().map(|a| a.format).collect(),
            depth_format: desc.depth_attachment.map(|a| a.format),
            sample_count: desc.sample_count,
        })
    }

    fn create_shader_module(
        &self,
        label: &str,
        _stage: wgpu::ShaderStages,
        source: &str,
    ) -> Result<Self::ShaderModule, BackendError> {
        if source.trim().is_empty() {
            return Err(BackendError::new(format!("'{label}': empty shader source")));
        }
        Ok(self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        }))
    }

    fn create_set_layout(&self, label: &str, entries: &[SetLayoutEntry]) -> Result<Self::SetLayout, BackendError> {
        let mut native = Vec::with_capacity(entries.len() * 2);
        let mut binding = 0;
        for entry in entries {
            match entry.kind {
                BindingKind::UniformBuffer => {
                    native.push(wgpu::BindGroupLayoutEntry {
                        binding,
                        visibility: entry.stages,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    });
                    binding += 1;
                }
                BindingKind::TextureSampler { dimension } => {
                    native.push(wgpu::BindGroupLayoutEntry {
                        binding,
                        visibility: entry.stages,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: dimension,
                            multisampled: false,
                        },
                        count: None,
                    });
                    native.push(wgpu::BindGroupLayoutEntry {
                        binding: binding + 1,
                        visibility: entry.stages,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    });
                    binding += 2;
                }
                BindingKind::StorageBuffer { read_only } => {
                    native.push(wgpu::BindGroupLayoutEntry {
                        binding,
                        visibility: entry.stages,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage { read_only },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    });
                    binding += 1;
                }
            }
        }

        let layout = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &native,
        });

        Ok(WgpuSetLayout {
            layout,
            entries: entries.to_vec(),
            counts: BindingCounts::of(entries),
        })
    }

    fn create_pipeline(&self, info: &PipelineBuildInfo<'_, Self>) -> Result<Self::Pipeline, BackendError> {
        let limits = self.limits();
        if info.inline_size > limits.max_inline_bytes {
            return Err(BackendError::new(format!(
                "inline range of {} bytes exceeds device limit {}",
                info.inline_size, limits.max_inline_bytes
            )));
        }

        let [global, instance, draw] = info.set_layouts;
        let layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(info.label),
            bind_group_layouts: &[Some(&global.layout), Some(&instance.layout), Some(&draw.layout)],
            immediate_size: info.inline_size,
        });

        let state = info.state;
        let blend: Option<wgpu::BlendState> = state.blend.map(Into::into);
        let write_mask = wgpu::ColorWrites::from_bits_truncate(state.write_mask);
        let color_targets: SmallVec<[Option<wgpu::ColorTargetState>; 4]> = info
            .color_formats
            .iter()
            .map(|&format| {
                Some(wgpu::ColorTargetState {
                    format,
                    blend,
                    write_mask,
                })
            })
            .collect();

        // A pass with depth needs depth state even when the pipeline ignores it.
        let depth_stencil = info.depth_format.map(|format| {
            state
                .depth
                .unwrap_or(DepthStateKey {
                    write: false,
                    compare: wgpu::CompareFunction::Always,
                    ..Default::default()
                })
                .to_wgpu(format)
        });

        let vertex_buffers: Vec<_> = info.vertex_layout.buffers.iter().map(|b| b.as_wgpu()).collect();

        Ok(self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(info.label),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: info.vertex_module,
                entry_point: Some(info.vertex_entry),
                buffers: &vertex_buffers,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: info.fragment.map(|(module, entry)| wgpu::FragmentState {
                module,
                entry_point: Some(entry),
                targets: &color_targets,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: state.topology,
                front_face: state.front_face,
                cull_mode: state.cull_mode,
                ..Default::default()
            },
            depth_stencil,
            multisample: wgpu::MultisampleState {
                count: info.sample_count,
                mask: !0,
                alpha_to_coverage_enabled: state.alpha_to_coverage,
            },
            multiview_mask: None,
            cache: None,
        }))
    }

    fn create_framebuffer(
        &self,
        label: &str,
        render_pass: &Self::RenderPass,
        attachments: &[Self::TextureView],
        size: UVec2,
    ) -> Result<Self::Framebuffer, BackendError> {
        let expected = render_pass.color_formats.len() + usize::from(render_pass.depth_format.is_some());
        if attachments.len() != expected {
            return Err(BackendError::new(format!(
                "framebuffer '{label}': {} attachments for a pass with {expected}",
                attachments.len()
            )));
        }
        Ok(WgpuFramebuffer {
            views: attachments.to_vec(),
            size,
        })
    }

    fn create_buffer(&self, label: &str, size: u64) -> Result<Self::Buffer, BackendError> {
        if size > self.device.limits().max_buffer_size {
            return Err(BackendError::new(format!("buffer '{label}' of {size} bytes exceeds device limit")));
        }
        Ok(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }))
    }

    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]) {
        self.queue.write_buffer(buffer, offset, data);
    }

    fn create_texture(&self, init: &TextureInit<'_>) -> Result<Self::TextureView, BackendError> {
        let max = self.device.limits().max_texture_dimension_2d;
        if init.width > max || init.height > max {
            return Err(BackendError::new(format!("texture '{}' exceeds {max}px", init.label)));
        }

        let size = wgpu::Extent3d {
            width: init.width,
            height: init.height,
            depth_or_array_layers: 1,
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(init.label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: init.format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        let texel_size = init.format.block_copy_size(None).unwrap_or(4);
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            init.data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(init.width * texel_size),
                rows_per_image: Some(init.height),
            },
            size,
        );

        Ok(texture.create_view(&wgpu::TextureViewDescriptor::default()))
    }

    fn create_sampler(&self, label: &str) -> Result<Self::Sampler, BackendError> {
        Ok(self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(label),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        }))
    }

    fn create_descriptor_pool(&self, sizes: &DescriptorPoolSizes) -> Result<Self::DescriptorPool, BackendError> {
        Ok(PoolBudget::new(*sizes))
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
        if !pool.try_reserve(layout.counts) {
            return Err(SetAllocError::OutOfPoolMemory);
        }

        let mut entries = Vec::with_capacity(writes.len() * 2);
        let mut binding = 0;
        for write in writes {
            match write {
                BindingWrite::UniformBuffer { buffer, offset, size } => {
                    entries.push(wgpu::BindGroupEntry {
                        binding,
                        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer,
                            offset: *offset,
                            size: NonZeroU64::new(*size),
                        }),
                    });
                    binding += 1;
                }
                BindingWrite::TextureSampler { view, sampler } => {
                    entries.push(wgpu::BindGroupEntry {
                        binding,
                        resource: wgpu::BindingResource::TextureView(view),
                    });
                    entries.push(wgpu::BindGroupEntry {
                        binding: binding + 1,
                        resource: wgpu::BindingResource::Sampler(sampler),
                    });
                    binding += 2;
                }
                BindingWrite::StorageBuffer { buffer } => {
                    entries.push(wgpu::BindGroupEntry {
                        binding,
                        resource: buffer.as_entire_binding(),
                    });
                    binding += 1;
                }
            }
        }

        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &layout.layout,
            entries: &entries,
        }))
    }

    fn reset_pool(&self, pool: &mut Self::DescriptorPool) {
        pool.reset();
    }

    fn wait_idle(&self) {
        if let Err(e) = self.device.poll(wgpu::PollType::wait_indefinitely()) {
            log::warn!("Device poll failed while waiting for idle: {e}");
        }
    }

    fn destroy_buffer(&self, buffer: Self::Buffer) {
        buffer.destroy();
    }
}
