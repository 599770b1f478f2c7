//! Shader descriptions.
//!
//! A shader description bundles the stage sources (minijinja templates over
//! WGSL), the formats it reads as input attachments, the number of color
//! outputs, and the three uniform layouts. Variants are selected at lookup
//! time by a [`ShaderDefines`](super::ShaderDefines) set.

use smallvec::SmallVec;

use super::tracking::{ChangeTracker, Liveness, LivenessWatch};
use crate::cache::key::fx_hash_key;
use crate::uniforms::{UniformLayout, UniformScope};

/// Source and entry point of one shader stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderStageSource {
    /// WGSL template. Rendered with the variant's defines before compilation.
    pub source: String,
    pub entry_point: String,
}

impl ShaderStageSource {
    #[must_use]
    pub fn new(source: impl Into<String>, entry_point: &str) -> Self {
        Self {
            source: source.into(),
            entry_point: entry_point.to_string(),
        }
    }
}

/// Declarative shader program.
#[derive(Debug, Clone)]
pub struct ShaderDescription {
    /// Structural hash of sources, attachment inputs, outputs and uniform
    /// layouts, taken when the description is built.
    pub id: u64,
    pub label: String,
    pub vertex: ShaderStageSource,
    pub fragment: Option<ShaderStageSource>,
    /// Formats read through input attachments, in binding order.
    pub input_attachment_formats: SmallVec<[wgpu::TextureFormat; 2]>,
    /// Number of color targets written by the fragment stage.
    pub color_outputs: u32,
    global: UniformLayout,
    instance: UniformLayout,
    draw: UniformLayout,
    tracker: ChangeTracker,
    liveness: Liveness,
}

impl ShaderDescription {
    #[must_use]
    pub fn new(label: &str, vertex: ShaderStageSource, fragment: Option<ShaderStageSource>) -> Self {
        let color_outputs = u32::from(fragment.is_some());
        let mut desc = Self {
            id: 0,
            label: label.to_string(),
            vertex,
            fragment,
            input_attachment_formats: SmallVec::new(),
            color_outputs,
            global: UniformLayout::new(UniformScope::Global),
            instance: UniformLayout::new(UniformScope::Instance),
            draw: UniformLayout::new(UniformScope::Draw),
            tracker: ChangeTracker::new(),
            liveness: Liveness::new(),
        };
        desc.id = desc.content_id();
        desc
    }

    /// Builder form of [`set_uniform_layout`](Self::set_uniform_layout).
    #[must_use]
    pub fn with_uniforms(mut self, layout: UniformLayout) -> Self {
        self.set_uniform_layout(layout);
        self.id = self.content_id();
        self
    }

    /// Builder form of setting [`input_attachment_formats`](Self::input_attachment_formats).
    #[must_use]
    pub fn with_input_attachments(mut self, formats: &[wgpu::TextureFormat]) -> Self {
        self.input_attachment_formats = formats.iter().copied().collect();
        self.id = self.content_id();
        self
    }

    /// Hash of everything that shapes the compiled variants. The label is not part of it.
    #[must_use]
    pub fn content_id(&self) -> u64 {
        fx_hash_key(&(
            &self.vertex,
            &self.fragment,
            &self.input_attachment_formats,
            self.color_outputs,
            &self.global,
            &self.instance,
            &self.draw,
        ))
    }

    /// Installs `layout` in the slot matching its scope and bumps the version.
    /// The id is kept.
    pub fn set_uniform_layout(&mut self, layout: UniformLayout) {
        match layout.scope() {
            UniformScope::Global => self.global = layout,
            UniformScope::Instance => self.instance = layout,
            UniformScope::Draw => self.draw = layout,
        }
        self.tracker.changed();
    }

    #[must_use]
    pub fn uniform_layout(&self, scope: UniformScope) -> &UniformLayout {
        match scope {
            UniformScope::Global => &self.global,
            UniformScope::Instance => &self.instance,
            UniformScope::Draw => &self.draw,
        }
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.tracker.version()
    }

    /// Call after mutating any public field. The id is kept, so cached
    /// variants are rebuilt under their existing keys.
    pub fn mark_changed(&mut self) {
        self.tracker.changed();
    }

    #[must_use]
    pub fn watch(&self) -> LivenessWatch {
        self.liveness.watch()
    }
}
