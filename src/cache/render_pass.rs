//! Render pass cache.

use smallvec::SmallVec;

use super::entry::Cached;
use crate::backend::GpuDevice;
use crate::description::RenderPassDescription;
use crate::errors::{CacheError, ResourceKind, Result};

/// A built render pass and the attachment signature framebuffers are checked against.
pub struct CachedRenderPass<D: GpuDevice> {
    pub native: D::RenderPass,
    /// Formats in framebuffer order: colors, then depth.
    pub attachment_formats: SmallVec<[wgpu::TextureFormat; 5]>,
    pub sample_count: u32,
}

impl<D: GpuDevice> Cached<D> for CachedRenderPass<D> {
    type Source<'a> = &'a RenderPassDescription;

    const KIND: ResourceKind = ResourceKind::RenderPass;

    fn validate(_device: &D, desc: &Self::Source<'_>) -> Result<()> {
        if desc.subpasses.is_empty() {
            return Err(CacheError::incompatible(format!("render pass '{}' has no subpasses", desc.label)));
        }
        if !matches!(desc.sample_count, 1 | 2 | 4 | 8 | 16) {
            return Err(CacheError::incompatible(format!(
                "render pass '{}': unsupported sample count {}",
                desc.label, desc.sample_count
            )));
        }

        let color_count = desc.color_attachments.len() as u32;
        for (index, subpass) in desc.subpasses.iter().enumerate() {
            if let Some(&bad) = subpass.color.iter().chain(&subpass.inputs).find(|&&i| i >= color_count) {
                return Err(CacheError::incompatible(format!(
                    "render pass '{}' subpass {index} references attachment {bad} of {color_count}",
                    desc.label
                )));
            }
            if subpass.inputs.iter().any(|i| subpass.color.contains(i)) {
                return Err(CacheError::incompatible(format!(
                    "render pass '{}' subpass {index} reads and writes the same attachment",
                    desc.label
                )));
            }
            if subpass.uses_depth && desc.depth_attachment.is_none() {
                return Err(CacheError::incompatible(format!(
                    "render pass '{}' subpass {index} uses depth but the pass has no depth attachment",
                    desc.label
                )));
            }
        }
        Ok(())
    }

    fn build(device: &D, label: &str, desc: &Self::Source<'_>) -> Result<Self> {
        let native = device
            .create_render_pass(desc)
            .map_err(|e| CacheError::build(ResourceKind::RenderPass, label, e))?;
        Ok(Self {
            native,
            attachment_formats: desc.attachment_formats().collect(),
            sample_count: desc.sample_count,
        })
    }

    fn destroy(self, device: &D) {
        device.destroy_render_pass(self.native);
    }
}
