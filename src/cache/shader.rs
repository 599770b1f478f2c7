//! Shader Variant Cache
//!
//! A *variant* is one [`ShaderDescription`] rendered with one
//! [`ShaderDefines`] set. Stage sources are minijinja templates over WGSL:
//!
//! | Syntax | Meaning |
//! |--------|---------|
//! | `{$ if LIGHTING $} … {$ endif $}` | block tags |
//! | `{{ MAX_LIGHTS }}` | define substitution |
//! | `$$ if SKINNED` | line statement |
//! | `{{ global_struct }}` / `{{ instance_struct }}` / `{{ draw_struct }}` | generated uniform structs |
//!
//! Besides the two modules, a variant owns the three binding-set layouts
//! derived from the description's uniform layouts, so pipelines and the
//! uniform caches always agree on binding order.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use minijinja::{Environment, syntax::SyntaxConfig};
use serde::Serialize;
use smallvec::SmallVec;
use xxhash_rust::xxh3::xxh3_128;

use super::entry::Cached;
use crate::backend::GpuDevice;
use crate::description::{ShaderDefines, ShaderDescription};
use crate::errors::{CacheError, ResourceKind, Result};
use crate::uniforms::{UniformLayout, UniformScope};

static SHADER_ENV: OnceLock<Environment<'static>> = OnceLock::new();

fn template_env() -> &'static Environment<'static> {
    SHADER_ENV.get_or_init(|| {
        let mut env = Environment::new();

        match SyntaxConfig::builder()
            .block_delimiters("{$", "$}")
            .variable_delimiters("{{", "}}")
            .line_statement_prefix("$$")
            .build()
        {
            Ok(syntax) => env.set_syntax(syntax),
            Err(e) => log::error!("Failed to configure shader template syntax: {e}"),
        }

        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_undefined_behavior(minijinja::UndefinedBehavior::SemiStrict);
        env
    })
}

#[derive(Serialize)]
struct TemplateContext<'a> {
    #[serde(flatten)]
    defines: BTreeMap<&'a str, &'a str>,
    global_struct: String,
    instance_struct: String,
    draw_struct: String,
}

/// WGSL struct name generated for a scope's data block.
#[must_use]
pub fn uniform_struct_name(scope: UniformScope) -> &'static str {
    match scope {
        UniformScope::Global => "GlobalUniforms",
        UniformScope::Instance => "InstanceUniforms",
        UniformScope::Draw => "DrawUniforms",
    }
}

/// Renders one stage template with `defines`.
pub fn render_stage(shader: &ShaderDescription, defines: &ShaderDefines, source: &str) -> Result<String> {
    let ctx = TemplateContext {
        defines: defines.to_context(),
        global_struct: shader
            .uniform_layout(UniformScope::Global)
            .wgsl_struct(uniform_struct_name(UniformScope::Global)),
        instance_struct: shader
            .uniform_layout(UniformScope::Instance)
            .wgsl_struct(uniform_struct_name(UniformScope::Instance)),
        draw_struct: shader
            .uniform_layout(UniformScope::Draw)
            .wgsl_struct(uniform_struct_name(UniformScope::Draw)),
    };

    template_env()
        .render_str(source, ctx)
        .map_err(|e| CacheError::build(ResourceKind::ShaderVariant, &shader.label, format!("template error: {e}")))
}

/// Build inputs of a shader variant.
pub struct ShaderVariantSource<'a> {
    pub shader: &'a ShaderDescription,
    pub defines: &'a ShaderDefines,
    /// Effective inline-range limit (settings and device, whichever is lower).
    pub max_inline_bytes: u32,
}

/// Compiled modules and binding-set layouts of one variant.
pub struct ShaderVariant<D: GpuDevice> {
    pub vertex: D::ShaderModule,
    pub fragment: Option<D::ShaderModule>,
    pub vertex_entry: String,
    pub fragment_entry: Option<String>,
    /// Indexed by [`UniformScope::set_index`].
    pub set_layouts: [D::SetLayout; 3],
    pub layouts: [UniformLayout; 3],
    pub input_attachment_formats: SmallVec<[wgpu::TextureFormat; 2]>,
    pub color_outputs: u32,
    pub inline_size: u32,
    /// xxh3-128 of the rendered sources.
    pub source_hash: u128,
}

impl<D: GpuDevice> ShaderVariant<D> {
    #[must_use]
    pub fn layout(&self, scope: UniformScope) -> &UniformLayout {
        &self.layouts[scope.set_index() as usize]
    }

    #[must_use]
    pub fn set_layout(&self, scope: UniformScope) -> &D::SetLayout {
        &self.set_layouts[scope.set_index() as usize]
    }
}

impl<D: GpuDevice> Cached<D> for ShaderVariant<D> {
    type Source<'a> = ShaderVariantSource<'a>;

    const KIND: ResourceKind = ResourceKind::ShaderVariant;

    fn validate(_device: &D, source: &Self::Source<'_>) -> Result<()> {
        let shader = source.shader;
        let inline = shader.uniform_layout(UniformScope::Draw).inline_size();
        if inline > u64::from(source.max_inline_bytes) {
            return Err(CacheError::incompatible(format!(
                "shader '{}': {inline} bytes of inline draw data exceed the {}-byte limit",
                shader.label, source.max_inline_bytes
            )));
        }
        if shader.fragment.is_none() && (shader.color_outputs > 0 || !shader.input_attachment_formats.is_empty()) {
            return Err(CacheError::incompatible(format!(
                "shader '{}' writes colors or reads input attachments without a fragment stage",
                shader.label
            )));
        }
        for scope in UniformScope::ALL {
            let layout = shader.uniform_layout(scope);
            if layout.scope() != scope {
                return Err(CacheError::incompatible(format!(
                    "shader '{}': {scope:?} slot holds a {:?} layout",
                    shader.label,
                    layout.scope()
                )));
            }
        }
        Ok(())
    }

    fn build(device: &D, label: &str, source: &Self::Source<'_>) -> Result<Self> {
        let shader = source.shader;

        let vertex_src = render_stage(shader, source.defines, &shader.vertex.source)?;
        let fragment_src = shader
            .fragment
            .as_ref()
            .map(|stage| render_stage(shader, source.defines, &stage.source))
            .transpose()?;

        let mut hashed = vertex_src.clone();
        if let Some(fragment) = &fragment_src {
            hashed.push('\0');
            hashed.push_str(fragment);
        }
        let source_hash = xxh3_128(hashed.as_bytes());

        let set_layouts = create_set_layouts(device, label, shader)?;

        let vertex = match device.create_shader_module(label, wgpu::ShaderStages::VERTEX, &vertex_src) {
            Ok(module) => module,
            Err(e) => {
                destroy_set_layouts(device, set_layouts);
                return Err(CacheError::build(ResourceKind::ShaderModule, label, e));
            }
        };

        let fragment = match fragment_src {
            Some(src) => match device.create_shader_module(label, wgpu::ShaderStages::FRAGMENT, &src) {
                Ok(module) => Some(module),
                Err(e) => {
                    device.destroy_shader_module(vertex);
                    destroy_set_layouts(device, set_layouts);
                    return Err(CacheError::build(ResourceKind::ShaderModule, label, e));
                }
            },
            None => None,
        };

        log::debug!("Compiled shader variant '{label}' ({source_hash:032x})");

        Ok(Self {
            vertex,
            fragment,
            vertex_entry: shader.vertex.entry_point.clone(),
            fragment_entry: shader.fragment.as_ref().map(|stage| stage.entry_point.clone()),
            set_layouts,
            layouts: UniformScope::ALL.map(|scope| shader.uniform_layout(scope).clone()),
            input_attachment_formats: shader.input_attachment_formats.clone(),
            color_outputs: shader.color_outputs,
            inline_size: shader.uniform_layout(UniformScope::Draw).inline_size() as u32,
            source_hash,
        })
    }

    fn destroy(self, device: &D) {
        device.destroy_shader_module(self.vertex);
        if let Some(fragment) = self.fragment {
            device.destroy_shader_module(fragment);
        }
        destroy_set_layouts(device, self.set_layouts);
    }
}

fn create_set_layouts<D: GpuDevice>(
    device: &D,
    label: &str,
    shader: &ShaderDescription,
) -> Result<[D::SetLayout; 3]> {
    let mut created: SmallVec<[D::SetLayout; 3]> = SmallVec::new();
    for scope in UniformScope::ALL {
        let entries = shader.uniform_layout(scope).set_layout_entries();
        match device.create_set_layout(&format!("{label} {scope:?}"), &entries) {
            Ok(layout) => created.push(layout),
            Err(e) => {
                for layout in created {
                    device.destroy_set_layout(layout);
                }
                return Err(CacheError::build(ResourceKind::SetLayout, label, e));
            }
        }
    }
    created
        .into_inner()
        .map_err(|_| CacheError::build(ResourceKind::SetLayout, label, "incomplete set layouts"))
}

fn destroy_set_layouts<D: GpuDevice>(device: &D, layouts: [D::SetLayout; 3]) {
    for layout in layouts {
        device.destroy_set_layout(layout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::ShaderStageSource;
    use crate::uniforms::UniformType;

    fn shader(vertex: &str) -> ShaderDescription {
        ShaderDescription::new("test", ShaderStageSource::new(vertex, "vs_main"), None).with_uniforms(
            UniformLayout::new(UniformScope::Global).with_data(
                "view_proj",
                UniformType::Mat4,
                wgpu::ShaderStages::VERTEX,
            ),
        )
    }

    #[test]
    fn defines_select_template_branches() {
        let desc = shader("{$ if SKINNED $}skinned{$ else $}static{$ endif $}");
        let on = render_stage(&desc, &ShaderDefines::new().with("SKINNED", "1"), &desc.vertex.source).unwrap();
        let off = render_stage(&desc, &ShaderDefines::new(), &desc.vertex.source).unwrap();
        assert_eq!(on, "skinned");
        assert_eq!(off, "static");
    }

    #[test]
    fn generated_structs_are_available() {
        let desc = shader("{{ global_struct }}");
        let out = render_stage(&desc, &ShaderDefines::new(), &desc.vertex.source).unwrap();
        assert!(out.contains("struct GlobalUniforms"));
        assert!(out.contains("view_proj: mat4x4<f32>"));
    }

    #[test]
    fn malformed_template_is_a_build_failure() {
        let desc = shader("{$ if $}");
        let err = render_stage(&desc, &ShaderDefines::new(), &desc.vertex.source).unwrap_err();
        assert!(matches!(err, CacheError::BuildFailure { .. }));
    }
}
