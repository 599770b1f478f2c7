//! Framebuffer cache.
//!
//! Keyed by `(size, render pass key, ordered attachment identities)`. A
//! framebuffer has no partial update: a size change destroys and recreates
//! it under the same key.

use glam::UVec2;
use smallvec::SmallVec;

use super::entry::Cached;
use super::key::CacheKey;
use super::render_pass::CachedRenderPass;
use crate::backend::GpuDevice;
use crate::description::{ColorSpace, RenderTarget};
use crate::errors::{CacheError, ResourceKind, Result};

pub struct FramebufferSource<'a, D: GpuDevice> {
    pub render_pass: &'a CachedRenderPass<D>,
    pub render_pass_key: CacheKey,
    /// One image per render-pass attachment: colors, then depth.
    pub targets: &'a [RenderTarget<D>],
    pub size: UVec2,
}

pub struct CachedFramebuffer<D: GpuDevice> {
    pub native: D::Framebuffer,
    pub render_pass: CacheKey,
    pub size: UVec2,
    pub attachments: SmallVec<[u64; 5]>,
}

impl<D: GpuDevice> Cached<D> for CachedFramebuffer<D> {
    type Source<'a> = FramebufferSource<'a, D>;

    const KIND: ResourceKind = ResourceKind::Framebuffer;

    fn validate(_device: &D, source: &Self::Source<'_>) -> Result<()> {
        let expected = &source.render_pass.attachment_formats;
        if source.targets.len() != expected.len() {
            return Err(CacheError::incompatible(format!(
                "framebuffer has {} attachments, render pass expects {}",
                source.targets.len(),
                expected.len()
            )));
        }
        if source.size.x == 0 || source.size.y == 0 {
            return Err(CacheError::incompatible(format!("framebuffer size {} is empty", source.size)));
        }
        for (index, (target, &format)) in source.targets.iter().zip(expected).enumerate() {
            if target.format != format {
                return Err(CacheError::incompatible(format!(
                    "attachment {index} is {:?}, render pass expects {format:?}",
                    target.format
                )));
            }
            if !format.is_depth_stencil_format() && target.color_space != ColorSpace::of_format(format) {
                return Err(CacheError::incompatible(format!(
                    "attachment {index} holds {:?} content, render pass stores {format:?}",
                    target.color_space
                )));
            }
            if target.size != source.size {
                return Err(CacheError::incompatible(format!(
                    "attachment {index} is {}, framebuffer is {}",
                    target.size, source.size
                )));
            }
        }
        Ok(())
    }

    fn build(device: &D, label: &str, source: &Self::Source<'_>) -> Result<Self> {
        let views: SmallVec<[D::TextureView; 5]> = source.targets.iter().map(|t| t.view.clone()).collect();
        let native = device
            .create_framebuffer(label, &source.render_pass.native, &views, source.size)
            .map_err(|e| CacheError::build(ResourceKind::Framebuffer, label, e))?;
        Ok(Self {
            native,
            render_pass: source.render_pass_key,
            size: source.size,
            attachments: source.targets.iter().map(|t| t.identity).collect(),
        })
    }

    fn destroy(self, device: &D) {
        device.destroy_framebuffer(self.native);
    }
}
