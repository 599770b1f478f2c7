//! Pipeline descriptions: fixed-function state, vertex layout and the
//! subpass/variant a pipeline targets.

use super::defines::ShaderDefines;
use super::tracking::{ChangeTracker, Liveness, LivenessWatch};
use crate::cache::key::{BlendStateKey, DepthStateKey, fx_hash_key};

/// One vertex buffer slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexBufferLayout {
    pub array_stride: u64,
    pub step_mode: wgpu::VertexStepMode,
    pub attributes: Vec<wgpu::VertexAttribute>,
}

impl VertexBufferLayout {
    #[must_use]
    pub fn as_wgpu(&self) -> wgpu::VertexBufferLayout<'_> {
        wgpu::VertexBufferLayout {
            array_stride: self.array_stride,
            step_mode: self.step_mode,
            attributes: &self.attributes,
        }
    }
}

/// Vertex input layout consumed by a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct VertexLayout {
    pub buffers: Vec<VertexBufferLayout>,
}

impl VertexLayout {
    /// Tightly packed, per-vertex attributes in one buffer, locations in order.
    #[must_use]
    pub fn interleaved(formats: &[wgpu::VertexFormat]) -> Self {
        let mut offset = 0;
        let attributes = formats
            .iter()
            .enumerate()
            .map(|(location, &format)| {
                let attribute = wgpu::VertexAttribute {
                    format,
                    offset,
                    shader_location: location as u32,
                };
                offset += format.size();
                attribute
            })
            .collect();

        Self {
            buffers: vec![VertexBufferLayout {
                array_stride: offset,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes,
            }],
        }
    }
}

/// Blend, depth and rasterizer state of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineState {
    pub topology: wgpu::PrimitiveTopology,
    pub front_face: wgpu::FrontFace,
    pub cull_mode: Option<wgpu::Face>,
    /// Applied to every color target of the subpass.
    pub blend: Option<BlendStateKey>,
    /// `None` disables depth testing; required to be `None` for passes without depth.
    pub depth: Option<DepthStateKey>,
    pub alpha_to_coverage: bool,
    /// `wgpu::ColorWrites` bits.
    pub write_mask: u32,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            topology: wgpu::PrimitiveTopology::TriangleList,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: Some(wgpu::Face::Back),
            blend: None,
            depth: None,
            alpha_to_coverage: false,
            write_mask: wgpu::ColorWrites::ALL.bits(),
        }
    }
}

/// Declarative pipeline: which subpass it targets, which shader variant it
/// runs, and its fixed-function state.
#[derive(Debug, Clone)]
pub struct PipelineDescription {
    /// Structural hash of subpass, defines, state and vertex layout, taken
    /// when the description is built. Kept across [`mark_changed`](Self::mark_changed).
    pub id: u64,
    pub label: String,
    pub subpass: u32,
    pub defines: ShaderDefines,
    pub state: PipelineState,
    pub vertex_layout: VertexLayout,
    tracker: ChangeTracker,
    liveness: Liveness,
}

impl PipelineDescription {
    #[must_use]
    pub fn new(label: &str, state: PipelineState, vertex_layout: VertexLayout) -> Self {
        let mut desc = Self {
            id: 0,
            label: label.to_string(),
            subpass: 0,
            defines: ShaderDefines::new(),
            state,
            vertex_layout,
            tracker: ChangeTracker::new(),
            liveness: Liveness::new(),
        };
        desc.id = desc.content_id();
        desc
    }

    #[must_use]
    pub fn with_subpass(mut self, subpass: u32) -> Self {
        self.subpass = subpass;
        self.id = self.content_id();
        self
    }

    #[must_use]
    pub fn with_defines(mut self, defines: ShaderDefines) -> Self {
        self.defines = defines;
        self.id = self.content_id();
        self
    }

    /// Hash of everything that shapes the native pipeline. The label is not part of it.
    #[must_use]
    pub fn content_id(&self) -> u64 {
        fx_hash_key(&(self.subpass, &self.defines, &self.state, &self.vertex_layout))
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.tracker.version()
    }

    /// Call after mutating any public field. The id is kept, so the cached
    /// pipeline is rebuilt under its existing key.
    pub fn mark_changed(&mut self) {
        self.tracker.changed();
    }

    #[must_use]
    pub fn watch(&self) -> LivenessWatch {
        self.liveness.watch()
    }
}
