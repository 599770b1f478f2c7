//! Render-target images handed to the framebuffer cache.

use glam::UVec2;

use crate::backend::GpuDevice;

/// Color space a target's contents are encoded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorSpace {
    #[default]
    Srgb,
    Linear,
}

impl ColorSpace {
    /// The color space implied by a texture format.
    #[must_use]
    pub fn of_format(format: wgpu::TextureFormat) -> Self {
        if format.is_srgb() {
            Self::Srgb
        } else {
            Self::Linear
        }
    }
}

/// One attachment image: a view plus the identity the framebuffer cache keys on.
pub struct RenderTarget<D: GpuDevice> {
    /// Stable identity of the underlying image. Two targets with the same
    /// identity are treated as the same image.
    pub identity: u64,
    pub format: wgpu::TextureFormat,
    pub color_space: ColorSpace,
    pub size: UVec2,
    pub view: D::TextureView,
}

impl<D: GpuDevice> Clone for RenderTarget<D> {
    fn clone(&self) -> Self {
        Self {
            identity: self.identity,
            format: self.format,
            color_space: self.color_space,
            size: self.size,
            view: self.view.clone(),
        }
    }
}

impl<D: GpuDevice> std::fmt::Debug for RenderTarget<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTarget")
            .field("identity", &self.identity)
            .field("format", &self.format)
            .field("color_space", &self.color_space)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl<D: GpuDevice> RenderTarget<D> {
    #[must_use]
    pub fn new(identity: u64, format: wgpu::TextureFormat, size: UVec2, view: D::TextureView) -> Self {
        Self {
            identity,
            format,
            color_space: ColorSpace::of_format(format),
            size,
            view,
        }
    }

    /// Overrides the color space. Depth formats have no color space and are left alone.
    #[must_use]
    pub fn with_color_space(mut self, color_space: ColorSpace) -> Self {
        if !self.format.is_depth_stencil_format() && ColorSpace::of_format(self.format) != color_space {
            log::warn!(
                "Render target {:#x}: {:?} content stored in {:?} format",
                self.identity,
                color_space,
                self.format
            );
        }
        self.color_space = color_space;
        self
    }
}
