//! Declarative descriptions consumed by the caches.
//!
//! The authoring layer owns these values; caches only ever keep an id, a
//! version and a [`LivenessWatch`] for each of them.

pub mod defines;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod target;
pub mod tracking;

pub use defines::ShaderDefines;
pub use pipeline::{PipelineDescription, PipelineState, VertexBufferLayout, VertexLayout};
pub use render_pass::{AttachmentDescription, LoadAction, RenderPassDescription, SubpassDescription};
pub use shader::{ShaderDescription, ShaderStageSource};
pub use target::{ColorSpace, RenderTarget};
pub use tracking::{ChangeTracker, Liveness, LivenessWatch};
