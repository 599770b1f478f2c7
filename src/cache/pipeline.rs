//! Pipeline cache.
//!
//! A pipeline composes a built render pass, a shader variant and the
//! variant's three binding-set layouts. Its version is the hash of the
//! pipeline description's version and both dependency versions, so a change
//! to either dependency rebuilds it on the next lookup under the same key.

use super::entry::Cached;
use super::key::CacheKey;
use super::render_pass::CachedRenderPass;
use super::shader::ShaderVariant;
use crate::backend::{GpuDevice, PipelineBuildInfo};
use crate::description::{PipelineDescription, RenderPassDescription};
use crate::errors::{CacheError, ResourceKind, Result};

/// Build inputs of a pipeline, with both dependencies already resolved.
pub struct PipelineSource<'a, D: GpuDevice> {
    pub pipeline: &'a PipelineDescription,
    pub pass: &'a RenderPassDescription,
    pub render_pass: &'a CachedRenderPass<D>,
    pub render_pass_key: CacheKey,
    pub shader: &'a ShaderVariant<D>,
    pub shader_key: CacheKey,
}

pub struct CachedPipeline<D: GpuDevice> {
    pub native: D::Pipeline,
    pub render_pass: CacheKey,
    pub shader: CacheKey,
    pub subpass: u32,
    /// Bytes of inline draw data the pipeline accepts.
    pub inline_size: u32,
}

impl<D: GpuDevice> Cached<D> for CachedPipeline<D> {
    type Source<'a> = PipelineSource<'a, D>;

    const KIND: ResourceKind = ResourceKind::Pipeline;

    fn validate(_device: &D, source: &Self::Source<'_>) -> Result<()> {
        let label = &source.pipeline.label;
        let index = source.pipeline.subpass;
        let Some(subpass) = source.pass.subpasses.get(index as usize) else {
            return Err(CacheError::incompatible(format!(
                "pipeline '{label}' targets subpass {index} of '{}', which has {}",
                source.pass.label,
                source.pass.subpasses.len()
            )));
        };

        let colors = source.pass.subpass_color_formats(index);
        if colors.len() as u32 != source.shader.color_outputs {
            return Err(CacheError::incompatible(format!(
                "pipeline '{label}': shader writes {} color outputs, subpass {index} has {} attachments",
                source.shader.color_outputs,
                colors.len()
            )));
        }

        let inputs = source.pass.subpass_input_formats(index);
        if inputs.as_slice() != source.shader.input_attachment_formats.as_slice() {
            return Err(CacheError::incompatible(format!(
                "pipeline '{label}': shader input attachments {:?} do not match subpass inputs {inputs:?}",
                source.shader.input_attachment_formats
            )));
        }

        if source.pipeline.state.depth.is_some() && !subpass.uses_depth {
            return Err(CacheError::incompatible(format!(
                "pipeline '{label}' has depth state but subpass {index} does not use depth"
            )));
        }

        if source.pipeline.state.alpha_to_coverage && source.pass.sample_count == 1 {
            return Err(CacheError::incompatible(format!(
                "pipeline '{label}': alpha-to-coverage requires a multisampled pass"
            )));
        }

        Ok(())
    }

    fn build(device: &D, label: &str, source: &Self::Source<'_>) -> Result<Self> {
        let pass = source.pass;
        let index = source.pipeline.subpass;
        let shader = source.shader;
        let uses_depth = pass.subpasses.get(index as usize).is_some_and(|s| s.uses_depth);

        let info = PipelineBuildInfo {
            label,
            render_pass: &source.render_pass.native,
            subpass: index,
            color_formats: pass.subpass_color_formats(index),
            depth_format: pass.depth_attachment.filter(|_| uses_depth).map(|a| a.format),
            sample_count: pass.sample_count,
            vertex_module: &shader.vertex,
            vertex_entry: &shader.vertex_entry,
            fragment: shader.fragment.as_ref().zip(shader.fragment_entry.as_deref()),
            set_layouts: shader.set_layouts.each_ref(),
            inline_size: shader.inline_size,
            state: &source.pipeline.state,
            vertex_layout: &source.pipeline.vertex_layout,
        };

        let native = device
            .create_pipeline(&info)
            .map_err(|e| CacheError::build(ResourceKind::Pipeline, label, e))?;

        Ok(Self {
            native,
            render_pass: source.render_pass_key,
            shader: source.shader_key,
            subpass: index,
            inline_size: shader.inline_size,
        })
    }

    fn destroy(self, device: &D) {
        device.destroy_pipeline(self.native);
    }
}
