//! Render pass descriptions.
//!
//! A render pass lists its attachments once and describes each subpass as a
//! set of indices into that list. Pipelines target one subpass; framebuffers
//! supply one image per attachment in declaration order.

use smallvec::SmallVec;

use super::tracking::{ChangeTracker, Liveness, LivenessWatch};
use crate::cache::key::fx_hash_key;

/// What happens to an attachment's contents when the pass begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadAction {
    #[default]
    Clear,
    Load,
    DontCare,
}

/// One attachment slot of a render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentDescription {
    pub format: wgpu::TextureFormat,
    pub load: LoadAction,
    pub store: bool,
}

impl AttachmentDescription {
    #[must_use]
    pub fn new(format: wgpu::TextureFormat) -> Self {
        Self {
            format,
            load: LoadAction::Clear,
            store: true,
        }
    }
}

/// A subpass: which color attachments it writes and which it reads as inputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SubpassDescription {
    /// Indices into [`RenderPassDescription::color_attachments`] written by this subpass.
    pub color: SmallVec<[u32; 4]>,
    /// Indices into [`RenderPassDescription::color_attachments`] read as input attachments.
    pub inputs: SmallVec<[u32; 4]>,
    /// Whether this subpass uses the depth attachment.
    pub uses_depth: bool,
}

/// Declarative render pass.
#[derive(Debug, Clone)]
pub struct RenderPassDescription {
    /// Structural hash of attachments, subpasses and sample count, taken when
    /// the description is built. Kept across [`mark_changed`](Self::mark_changed).
    pub id: u64,
    pub label: String,
    pub color_attachments: SmallVec<[AttachmentDescription; 4]>,
    pub depth_attachment: Option<AttachmentDescription>,
    pub sample_count: u32,
    pub subpasses: SmallVec<[SubpassDescription; 2]>,
    tracker: ChangeTracker,
    liveness: Liveness,
}

impl RenderPassDescription {
    /// A single-subpass pass writing every color attachment.
    #[must_use]
    pub fn new(
        label: &str,
        color_formats: &[wgpu::TextureFormat],
        depth_format: Option<wgpu::TextureFormat>,
    ) -> Self {
        let color_attachments: SmallVec<[AttachmentDescription; 4]> = color_formats
            .iter()
            .copied()
            .map(AttachmentDescription::new)
            .collect();
        let subpass = SubpassDescription {
            color: (0..color_attachments.len() as u32).collect(),
            inputs: SmallVec::new(),
            uses_depth: depth_format.is_some(),
        };

        let mut desc = Self {
            id: 0,
            label: label.to_string(),
            color_attachments,
            depth_attachment: depth_format.map(AttachmentDescription::new),
            sample_count: 1,
            subpasses: smallvec::smallvec![subpass],
            tracker: ChangeTracker::new(),
            liveness: Liveness::new(),
        };
        desc.id = desc.content_id();
        desc
    }

    /// Replaces the subpass list.
    #[must_use]
    pub fn with_subpasses(mut self, subpasses: impl IntoIterator<Item = SubpassDescription>) -> Self {
        self.subpasses = subpasses.into_iter().collect();
        self.id = self.content_id();
        self
    }

    #[must_use]
    pub fn with_sample_count(mut self, sample_count: u32) -> Self {
        self.sample_count = sample_count;
        self.id = self.content_id();
        self
    }

    /// Hash of the attachment and subpass structure. The label is not part of it.
    #[must_use]
    pub fn content_id(&self) -> u64 {
        fx_hash_key(&(
            &self.color_attachments,
            &self.depth_attachment,
            self.sample_count,
            &self.subpasses,
        ))
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.tracker.version()
    }

    /// Call after mutating any public field. The id is kept, so the cached
    /// pass is rebuilt under its existing key.
    pub fn mark_changed(&mut self) {
        self.tracker.changed();
    }

    #[must_use]
    pub fn watch(&self) -> LivenessWatch {
        self.liveness.watch()
    }

    /// Number of images a framebuffer for this pass must provide.
    #[must_use]
    pub fn attachment_count(&self) -> usize {
        self.color_attachments.len() + usize::from(self.depth_attachment.is_some())
    }

    /// Formats in framebuffer order: colors first, then depth.
    pub fn attachment_formats(&self) -> impl Iterator<Item = wgpu::TextureFormat> + '_ {
        self.color_attachments
            .iter()
            .chain(self.depth_attachment.iter())
            .map(|a| a.format)
    }

    /// Color formats written by `subpass`, in subpass order.
    #[must_use]
    pub fn subpass_color_formats(&self, subpass: u32) -> SmallVec<[wgpu::TextureFormat; 4]> {
        self.subpasses
            .get(subpass as usize)
            .map(|s| {
                s.color
                    .iter()
                    .filter_map(|&i| self.color_attachments.get(i as usize))
                    .map(|a| a.format)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Formats read as input attachments by `subpass`.
    #[must_use]
    pub fn subpass_input_formats(&self, subpass: u32) -> SmallVec<[wgpu::TextureFormat; 4]> {
        self.subpasses
            .get(subpass as usize)
            .map(|s| {
                s.inputs
                    .iter()
                    .filter_map(|&i| self.color_attachments.get(i as usize))
                    .map(|a| a.format)
                    .collect()
            })
            .unwrap_or_default()
    }
}
