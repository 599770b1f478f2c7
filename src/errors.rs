//! Error Types
//!
//! This module defines the error types returned by every cache operation.
//!
//! # Overview
//!
//! [`CacheError`] covers the four failure families of the caching layer:
//! - **Build failures**: the native API refused to create an object
//! - **Incompatible descriptions**: dependent descriptions cannot be reconciled
//! - **Allocation exhaustion**: a single request exceeds a fixed capacity
//! - **Missing bindings**: a uniform references a texture or buffer that is gone
//!
//! Every failure is local to the call that produced it. A failed call never
//! corrupts other cache entries, and nothing here is fatal to the process:
//! the caller decides whether to skip a draw, skip a frame, or give up.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tessera::errors::{CacheError, Result};
//!
//! fn draw(ctx: &mut CacheContext<WgpuDevice>) -> Result<()> {
//!     let pipeline = ctx.get_or_create_pipeline(&pipeline, &pass, &shader)?;
//!     Ok(())
//! }
//! ```

use std::fmt;

use thiserror::Error;

use crate::cache::CacheKey;

/// The kind of native object an operation was working on.
///
/// Carried by [`CacheError::BuildFailure`] and [`CacheError::UnknownEntry`]
/// so that log lines and error messages name the tier that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    RenderPass,
    ShaderModule,
    ShaderVariant,
    SetLayout,
    Pipeline,
    Framebuffer,
    Buffer,
    Texture,
    Sampler,
    DescriptorPool,
    BindingSet,
    RenderContext,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RenderPass => "render pass",
            Self::ShaderModule => "shader module",
            Self::ShaderVariant => "shader variant",
            Self::SetLayout => "binding-set layout",
            Self::Pipeline => "pipeline",
            Self::Framebuffer => "framebuffer",
            Self::Buffer => "buffer",
            Self::Texture => "texture",
            Self::Sampler => "sampler",
            Self::DescriptorPool => "descriptor pool",
            Self::BindingSet => "binding set",
            Self::RenderContext => "render context",
        };
        f.write_str(name)
    }
}

/// The main error type of the caching layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    // ========================================================================
    // Native Object Errors
    // ========================================================================
    /// The native API refused to create an object.
    ///
    /// The entry that attempted the build is left unusable and is
    /// immediately eligible for eviction.
    #[error("Failed to build {kind} '{label}': {reason}")]
    BuildFailure {
        /// Which tier failed
        kind: ResourceKind,
        /// Debug label of the entry
        label: String,
        /// Backend-provided reason
        reason: String,
    },

    /// A handle refers to an entry that no longer exists (evicted or never built).
    #[error("No cached {kind} for key {key}")]
    UnknownEntry {
        /// Which tier was queried
        kind: ResourceKind,
        /// The key that missed
        key: CacheKey,
    },

    // ========================================================================
    // Description Errors
    // ========================================================================
    /// Two dependent descriptions cannot be reconciled
    /// (e.g. a shader's input attachments do not match the render pass).
    #[error("Incompatible description: {0}")]
    IncompatibleDescription(String),

    // ========================================================================
    // Allocation Errors
    // ========================================================================
    /// A single request exceeds the fixed capacity of one buffer or pool.
    #[error("{resource} request of {requested} exceeds fixed capacity of {capacity}")]
    AllocationExhaustion {
        /// What was being allocated
        resource: &'static str,
        /// Size of the rejected request
        requested: u64,
        /// Fixed capacity of a single buffer or pool
        capacity: u64,
    },

    // ========================================================================
    // Binding Errors
    // ========================================================================
    /// A required texture or buffer uniform has no live value and no default.
    #[error("Missing binding for uniform '{name}'")]
    MissingBinding {
        /// Uniform name from the layout
        name: String,
    },

    // ========================================================================
    // Frame Lifecycle Errors
    // ========================================================================
    /// A destructive operation was requested while a frame is still being recorded.
    #[error("Destructive purge requested while a frame is in progress")]
    FrameInProgress,
}

impl CacheError {
    pub(crate) fn build(kind: ResourceKind, label: &str, reason: impl fmt::Display) -> Self {
        Self::BuildFailure {
            kind,
            label: label.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn incompatible(message: impl Into<String>) -> Self {
        Self::IncompatibleDescription(message.into())
    }
}

/// Alias for `Result<T, CacheError>`.
pub type Result<T> = std::result::Result<T, CacheError>;
