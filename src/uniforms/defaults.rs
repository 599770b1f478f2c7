//! Built-in fallback textures and the shared default sampler.
//!
//! Created lazily on first use and shared by every render context of a
//! device.

use super::layout::DefaultTexture;
use crate::backend::{GpuDevice, TextureInit};
use crate::errors::{CacheError, ResourceKind, Result};

const CHECKER_SIZE: u32 = 8;

impl DefaultTexture {
    /// Reserved identity, distinct from any application texture identity
    /// handed out by [`next_texture_identity`](crate::uniforms::next_texture_identity).
    #[must_use]
    pub fn identity(self) -> u64 {
        match self {
            Self::White => u64::MAX,
            Self::FlatNormal => u64::MAX - 1,
            Self::Checkerboard => u64::MAX - 2,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::White => "Default White",
            Self::FlatNormal => "Default Flat Normal",
            Self::Checkerboard => "Default Checkerboard",
        }
    }

    fn pixels(self) -> (u32, Vec<u8>) {
        match self {
            Self::White => (1, vec![255, 255, 255, 255]),
            Self::FlatNormal => (1, vec![128, 128, 255, 255]),
            Self::Checkerboard => {
                let data = (0..CHECKER_SIZE * CHECKER_SIZE)
                    .flat_map(|i| {
                        let (x, y) = (i % CHECKER_SIZE, i / CHECKER_SIZE);
                        if (x + y) % 2 == 0 {
                            [255, 0, 255, 255]
                        } else {
                            [0, 0, 0, 255]
                        }
                    })
                    .collect();
                (CHECKER_SIZE, data)
            }
        }
    }
}

/// Lazily created default textures.
pub struct DefaultTextures<D: GpuDevice> {
    white: Option<D::TextureView>,
    flat_normal: Option<D::TextureView>,
    checkerboard: Option<D::TextureView>,
    sampler: Option<D::Sampler>,
}

impl<D: GpuDevice> Default for DefaultTextures<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: GpuDevice> DefaultTextures<D> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            white: None,
            flat_normal: None,
            checkerboard: None,
            sampler: None,
        }
    }

    pub fn texture(&mut self, device: &D, which: DefaultTexture) -> Result<D::TextureView> {
        let slot = match which {
            DefaultTexture::White => &mut self.white,
            DefaultTexture::FlatNormal => &mut self.flat_normal,
            DefaultTexture::Checkerboard => &mut self.checkerboard,
        };
        if let Some(view) = slot {
            return Ok(view.clone());
        }

        let (size, data) = which.pixels();
        let view = device
            .create_texture(&TextureInit {
                label: which.label(),
                width: size,
                height: size,
                format: wgpu::TextureFormat::Rgba8Unorm,
                data: &data,
            })
            .map_err(|e| CacheError::build(ResourceKind::Texture, which.label(), e))?;
        log::debug!("Created {}", which.label());
        Ok(slot.insert(view).clone())
    }

    pub fn sampler(&mut self, device: &D) -> Result<D::Sampler> {
        if let Some(sampler) = &self.sampler {
            return Ok(sampler.clone());
        }
        let sampler = device
            .create_sampler("Default Sampler")
            .map_err(|e| CacheError::build(ResourceKind::Sampler, "Default Sampler", e))?;
        Ok(self.sampler.insert(sampler).clone())
    }
}
