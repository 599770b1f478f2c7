//! Uniform layouts, value sets and the per-context uniform data cache.

pub mod cache;
pub mod defaults;
pub mod layout;
pub mod packer;
pub mod values;

pub use cache::{PreparedUniforms, ShaderBinding, UniformDataCache, UniformEntryState, UniformStats};
pub use defaults::DefaultTextures;
pub use layout::{
    BufferUniform, DataUniform, DefaultTexture, ScopeFields, TextureUniform, UniformLayout, UniformScope,
    UniformType,
};
pub use packer::pack_uniforms;
pub use values::{GpuTexture, UniformValue, UniformValueSet, next_texture_identity};
