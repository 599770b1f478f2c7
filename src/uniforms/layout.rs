//! Uniform Layouts
//!
//! A [`UniformLayout`] lists the uniforms a shader reads at one scope:
//!
//! | Scope | Lifetime | May carry |
//! |-------|----------|-----------|
//! | `Global` | per frame | data, textures, auxiliary buffers |
//! | `Instance` | per material | data, textures |
//! | `Draw` | per draw call | data, textures |
//!
//! Data uniforms are packed into one block following WGSL uniform
//! address-space rules (see [`UniformType::align`]). Binding-set entries are
//! emitted in a fixed order: the data block (if any), then one entry per
//! texture uniform, then one entry per auxiliary buffer.
//!
//! A draw-scope layout without texture uniforms is *inline*: its data block
//! is pushed as a direct byte range and no binding set is ever allocated.


use smallvec::SmallVec;

use crate::backend::{BindingKind, SetLayoutEntry};

/// Which per-scope cache a uniform block belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UniformScope {
    Global,
    Instance,
    Draw,
}

impl UniformScope {
    /// All scopes in binding-set order.
    pub const ALL: [Self; 3] = [Self::Global, Self::Instance, Self::Draw];

    /// Binding-set index used by pipelines for this scope.
    #[must_use]
    pub fn set_index(self) -> u32 {
        match self {
            Self::Global => 0,
            Self::Instance => 1,
            Self::Draw => 2,
        }
    }
}

/// Scalar, vector and matrix types a data uniform may have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformType {
    Float,
    Int,
    UInt,
    Vec2,
    Vec3,
    Vec4,
    Mat3,
    Mat4,
}

impl UniformType {
    /// Alignment in the uniform address space.
    #[must_use]
    pub const fn align(self) -> u64 {
        match self {
            Self::Float | Self::Int | Self::UInt => 4,
            Self::Vec2 => 8,
            Self::Vec3 | Self::Vec4 | Self::Mat3 | Self::Mat4 => 16,
        }
    }

    /// Size in bytes. `mat3x3<f32>` stores three 16-byte columns.
    #[must_use]
    pub const fn size(self) -> u64 {
        match self {
            Self::Float | Self::Int | Self::UInt => 4,
            Self::Vec2 => 8,
            Self::Vec3 => 12,
            Self::Vec4 => 16,
            Self::Mat3 => 48,
            Self::Mat4 => 64,
        }
    }

    #[must_use]
    pub const fn wgsl_name(self) -> &'static str {
        match self {
            Self::Float => "f32",
            Self::Int => "i32",
            Self::UInt => "u32",
            Self::Vec2 => "vec2<f32>",
            Self::Vec3 => "vec3<f32>",
            Self::Vec4 => "vec4<f32>",
            Self::Mat3 => "mat3x3<f32>",
            Self::Mat4 => "mat4x4<f32>",
        }
    }
}

/// Built-in textures substituted for unset texture uniforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefaultTexture {
    /// 1×1 opaque white.
    White,
    /// 1×1 tangent-space normal pointing straight out.
    FlatNormal,
    /// 8×8 magenta/black checkerboard.
    Checkerboard,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataUniform {
    pub name: String,
    pub ty: UniformType,
    pub stages: wgpu::ShaderStages,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureUniform {
    pub name: String,
    pub dimension: wgpu::TextureViewDimension,
    pub stages: wgpu::ShaderStages,
    /// Substitute when no live texture is supplied. `None` makes the uniform required.
    pub fallback: Option<DefaultTexture>,
}

/// Auxiliary named buffer, global scope only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferUniform {
    pub name: String,
    pub stages: wgpu::ShaderStages,
    pub read_only: bool,
}

/// Scope tag; only the global scope carries auxiliary buffers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeFields {
    Global { buffers: Vec<BufferUniform> },
    Instance,
    Draw,
}

/// Uniform layout of one scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UniformLayout {
    fields: ScopeFields,
    data: Vec<DataUniform>,
    textures: Vec<TextureUniform>,
}

impl UniformLayout {
    /// An empty layout for `scope`.
    #[must_use]
    pub fn new(scope: UniformScope) -> Self {
        let fields = match scope {
            UniformScope::Global => ScopeFields::Global { buffers: Vec::new() },
            UniformScope::Instance => ScopeFields::Instance,
            UniformScope::Draw => ScopeFields::Draw,
        };
        Self {
            fields,
            data: Vec::new(),
            textures: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_data(mut self, name: &str, ty: UniformType, stages: wgpu::ShaderStages) -> Self {
        self.data.push(DataUniform {
            name: name.to_string(),
            ty,
            stages,
        });
        self
    }

    #[must_use]
    pub fn with_texture(mut self, name: &str, stages: wgpu::ShaderStages, fallback: Option<DefaultTexture>) -> Self {
        self.textures.push(TextureUniform {
            name: name.to_string(),
            dimension: wgpu::TextureViewDimension::D2,
            stages,
            fallback,
        });
        self
    }

    /// Adds an auxiliary buffer. Ignored (with a warning) outside the global scope.
    #[must_use]
    pub fn with_buffer(mut self, name: &str, stages: wgpu::ShaderStages, read_only: bool) -> Self {
        match &mut self.fields {
            ScopeFields::Global { buffers } => buffers.push(BufferUniform {
                name: name.to_string(),
                stages,
                read_only,
            }),
            _ => log::warn!("Buffer uniform '{name}' ignored: only the global scope carries buffers"),
        }
        self
    }

    #[must_use]
    pub fn scope(&self) -> UniformScope {
        match self.fields {
            ScopeFields::Global { .. } => UniformScope::Global,
            ScopeFields::Instance => UniformScope::Instance,
            ScopeFields::Draw => UniformScope::Draw,
        }
    }

    #[must_use]
    pub fn data(&self) -> &[DataUniform] {
        &self.data
    }

    #[must_use]
    pub fn textures(&self) -> &[TextureUniform] {
        &self.textures
    }

    #[must_use]
    pub fn buffers(&self) -> &[BufferUniform] {
        match &self.fields {
            ScopeFields::Global { buffers } => buffers,
            _ => &[],
        }
    }

    /// Byte offset of every data uniform, in declaration order.
    #[must_use]
    pub fn offsets(&self) -> SmallVec<[u64; 8]> {
        let mut cursor: u64 = 0;
        self.data
            .iter()
            .map(|field| {
                let offset = cursor.next_multiple_of(field.ty.align());
                cursor = offset + field.ty.size();
                offset
            })
            .collect()
    }

    /// Size of the packed data block, rounded up to the 16-byte struct alignment.
    #[must_use]
    pub fn data_size(&self) -> u64 {
        let end = self
            .data
            .iter()
            .zip(self.offsets())
            .map(|(field, offset)| offset + field.ty.size())
            .max()
            .unwrap_or(0);
        end.next_multiple_of(16)
    }

    /// Draw-scope data without textures is pushed inline.
    #[must_use]
    pub fn is_inline(&self) -> bool {
        self.scope() == UniformScope::Draw && self.textures.is_empty()
    }

    /// Whether the data block lives in a sub-allocated uniform buffer.
    #[must_use]
    pub fn needs_data_buffer(&self) -> bool {
        !self.data.is_empty() && !self.is_inline()
    }

    /// Whether this scope is bound through a binding set at all.
    #[must_use]
    pub fn needs_binding_set(&self) -> bool {
        self.needs_data_buffer() || !self.textures.is_empty() || !self.buffers().is_empty()
    }

    /// Bytes pushed inline per draw, 0 unless [`is_inline`](Self::is_inline).
    #[must_use]
    pub fn inline_size(&self) -> u64 {
        if self.is_inline() { self.data_size() } else { 0 }
    }

    /// Stages that read the data block.
    #[must_use]
    pub fn data_stages(&self) -> wgpu::ShaderStages {
        self.data
            .iter()
            .fold(wgpu::ShaderStages::empty(), |acc, field| acc | field.stages)
    }

    /// Set-layout entries in binding order.
    #[must_use]
    pub fn set_layout_entries(&self) -> SmallVec<[SetLayoutEntry; 8]> {
        let mut entries = SmallVec::new();
        if self.needs_data_buffer() {
            entries.push(SetLayoutEntry {
                kind: BindingKind::UniformBuffer,
                stages: self.data_stages(),
            });
        }
        for texture in &self.textures {
            entries.push(SetLayoutEntry {
                kind: BindingKind::TextureSampler {
                    dimension: texture.dimension,
                },
                stages: texture.stages,
            });
        }
        for buffer in self.buffers() {
            entries.push(SetLayoutEntry {
                kind: BindingKind::StorageBuffer {
                    read_only: buffer.read_only,
                },
                stages: buffer.stages,
            });
        }
        entries
    }

    /// WGSL struct declaration matching the packed data block.
    #[must_use]
    pub fn wgsl_struct(&self, struct_name: &str) -> String {
        if self.data.is_empty() {
            return String::new();
        }
        let mut out = format!("struct {struct_name} {{\n");
        for field in &self.data {
            out.push_str(&format!("    {}: {},\n", field.name, field.ty.wgsl_name()));
        }
        out.push_str("};\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VF: wgpu::ShaderStages = wgpu::ShaderStages::VERTEX_FRAGMENT;

    #[test]
    fn vec3_followed_by_float_shares_a_slot() {
        let layout = UniformLayout::new(UniformScope::Instance)
            .with_data("color", UniformType::Vec3, VF)
            .with_data("opacity", UniformType::Float, VF)
            .with_data("transform", UniformType::Mat4, VF);
        assert_eq!(layout.offsets().as_slice(), &[0, 12, 16]);
        assert_eq!(layout.data_size(), 80);
    }

    #[test]
    fn struct_size_rounds_to_sixteen() {
        let layout = UniformLayout::new(UniformScope::Global)
            .with_data("time", UniformType::Float, VF)
            .with_data("resolution", UniformType::Vec2, VF);
        assert_eq!(layout.offsets().as_slice(), &[0, 8]);
        assert_eq!(layout.data_size(), 16);
    }

    #[test]
    fn draw_scope_without_textures_is_inline() {
        let inline = UniformLayout::new(UniformScope::Draw).with_data("model", UniformType::Mat4, VF);
        assert!(inline.is_inline());
        assert!(!inline.needs_binding_set());
        assert_eq!(inline.inline_size(), 64);

        let bound = inline.clone().with_texture("albedo", VF, Some(DefaultTexture::White));
        assert!(!bound.is_inline());
        assert_eq!(bound.set_layout_entries().len(), 2);
    }

    #[test]
    fn binding_order_is_data_textures_buffers() {
        let layout = UniformLayout::new(UniformScope::Global)
            .with_buffer("lights", wgpu::ShaderStages::FRAGMENT, true)
            .with_texture("shadow", wgpu::ShaderStages::FRAGMENT, None)
            .with_data("view_proj", UniformType::Mat4, wgpu::ShaderStages::VERTEX);
        let kinds: Vec<_> = layout.set_layout_entries().iter().map(|e| e.kind).collect();
        assert!(matches!(
            kinds.as_slice(),
            [
                BindingKind::UniformBuffer,
                BindingKind::TextureSampler { .. },
                BindingKind::StorageBuffer { read_only: true }
            ]
        ));
    }

    #[test]
    fn wgsl_struct_lists_fields_in_declaration_order() {
        let layout = UniformLayout::new(UniformScope::Global)
            .with_data("view_proj", UniformType::Mat4, VF)
            .with_data("time", UniformType::Float, VF);
        assert_eq!(
            layout.wgsl_struct("Globals"),
            "struct Globals {\n    view_proj: mat4x4<f32>,\n    time: f32,\n};\n"
        );
        assert!(UniformLayout::new(UniformScope::Draw).wgsl_struct("Draw").is_empty());
    }

    #[test]
    fn buffers_are_rejected_outside_global_scope() {
        let layout = UniformLayout::new(UniformScope::Instance).with_buffer("lights", VF, true);
        assert!(layout.buffers().is_empty());
    }
}
