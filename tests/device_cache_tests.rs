//! Device Cache Tests
//!
//! Tests for:
//! - Render pass / shader variant / pipeline lookups: hit, miss, rebuild-in-place
//! - Structural sharing of identical descriptions, independent of labels
//! - Description-level incompatibilities and native build failures
//! - Framebuffer keys and size-driven rebuilds
//! - Explicit invalidation, liveness expiry and clear

use std::time::Duration;

use glam::UVec2;
use wgpu::{ShaderStages, TextureFormat, VertexFormat};

use tessera::cache::DepthStateKey;
use tessera::{
    CacheContext, CacheError, CacheSettings, ColorSpace, HeadlessDevice, PipelineDescription, PipelineState,
    RenderPassDescription, ResourceKind, ShaderDefines, ShaderDescription, ShaderStageSource,
    SubpassDescription, UniformLayout, UniformScope, UniformType, VertexLayout,
};

const COLOR: TextureFormat = TextureFormat::Rgba8UnormSrgb;
const DEPTH: TextureFormat = TextureFormat::Depth32Float;

const VS: &str = "{{ global_struct }}
@vertex
fn vs_main() -> @builtin(position) vec4<f32> { return vec4<f32>(0.0); }";

const FS: &str = "{$ if UNLIT $}
// unlit
{$ endif $}
@fragment
fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }";

fn context() -> CacheContext<HeadlessDevice> {
    let _ = env_logger::builder().is_test(true).try_init();
    CacheContext::new(HeadlessDevice::new(), CacheSettings::default())
}

fn forward_pass() -> RenderPassDescription {
    RenderPassDescription::new("forward", &[COLOR], Some(DEPTH))
}

fn lit_shader() -> ShaderDescription {
    ShaderDescription::new(
        "lit",
        ShaderStageSource::new(VS, "vs_main"),
        Some(ShaderStageSource::new(FS, "fs_main")),
    )
    .with_uniforms(UniformLayout::new(UniformScope::Global).with_data(
        "view_proj",
        UniformType::Mat4,
        ShaderStages::VERTEX,
    ))
    .with_uniforms(UniformLayout::new(UniformScope::Draw).with_data(
        "model",
        UniformType::Mat4,
        ShaderStages::VERTEX,
    ))
}

fn opaque_pipeline() -> PipelineDescription {
    PipelineDescription::new(
        "opaque",
        PipelineState {
            depth: Some(DepthStateKey::default()),
            ..Default::default()
        },
        VertexLayout::interleaved(&[VertexFormat::Float32x3, VertexFormat::Float32x2]),
    )
}

// ============================================================================
// Lookup Tests
// ============================================================================

#[test]
fn repeated_lookup_returns_same_handle_and_builds_once() {
    let mut ctx = context();
    let (pass, shader, pipeline) = (forward_pass(), lit_shader(), opaque_pipeline());

    let first = ctx.get_or_create_pipeline(&pipeline, &pass, &shader).unwrap();
    let second = ctx.get_or_create_pipeline(&pipeline, &pass, &shader).unwrap();

    assert_eq!(first, second);
    assert_eq!(ctx.device().created(ResourceKind::Pipeline), 1);
    assert_eq!(ctx.device().created(ResourceKind::RenderPass), 1);
    assert_eq!(ctx.device().created(ResourceKind::ShaderModule), 2);

    let stats = ctx.stats().pipelines;
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.rebuilds, 0);
}

#[test]
fn mutated_pipeline_rebuilds_under_same_key() {
    let mut ctx = context();
    let (pass, shader, mut pipeline) = (forward_pass(), lit_shader(), opaque_pipeline());

    let v1 = ctx.get_or_create_pipeline(&pipeline, &pass, &shader).unwrap();
    pipeline.state.cull_mode = None;
    pipeline.mark_changed();
    let v2 = ctx.get_or_create_pipeline(&pipeline, &pass, &shader).unwrap();

    assert_eq!(v1.key, v2.key);
    assert_ne!(v1.version, v2.version);
    assert_eq!(ctx.device().created(ResourceKind::Pipeline), 2);
    assert_eq!(ctx.device().destroyed(ResourceKind::Pipeline), 1);
    assert_eq!(ctx.stats().pipelines.rebuilds, 1);
    // In-place rebuilds rely on the backend deferring the release.
    assert_eq!(ctx.device().wait_idle_calls(), 0);
}

#[test]
fn shader_change_rebuilds_dependent_pipeline() {
    let mut ctx = context();
    let (pass, mut shader, pipeline) = (forward_pass(), lit_shader(), opaque_pipeline());

    let before = ctx.get_or_create_pipeline(&pipeline, &pass, &shader).unwrap();
    shader.set_uniform_layout(UniformLayout::new(UniformScope::Instance).with_data(
        "base_color",
        UniformType::Vec4,
        ShaderStages::FRAGMENT,
    ));
    let after = ctx.get_or_create_pipeline(&pipeline, &pass, &shader).unwrap();

    assert_eq!(before.key, after.key);
    assert_ne!(before.version, after.version);
    assert_eq!(ctx.device().created(ResourceKind::ShaderModule), 4);
    assert_eq!(ctx.device().destroyed(ResourceKind::ShaderModule), 2);
    assert_eq!(ctx.device().live(ResourceKind::SetLayout), 3);
    assert_eq!(ctx.device().created(ResourceKind::Pipeline), 2);
}

#[test]
fn render_pass_change_rebuilds_dependent_pipeline() {
    let mut ctx = context();
    let (mut pass, shader, pipeline) = (forward_pass(), lit_shader(), opaque_pipeline());

    let before = ctx.get_or_create_pipeline(&pipeline, &pass, &shader).unwrap();
    pass.sample_count = 4;
    pass.mark_changed();
    let after = ctx.get_or_create_pipeline(&pipeline, &pass, &shader).unwrap();

    assert_eq!(before.key, after.key);
    assert_eq!(ctx.device().created(ResourceKind::RenderPass), 2);
    assert_eq!(ctx.device().created(ResourceKind::Pipeline), 2);
    assert_eq!(ctx.device().live(ResourceKind::Pipeline), 1);
}

#[test]
fn structurally_identical_descriptions_share_one_entry() {
    let mut ctx = context();
    let pass = forward_pass();
    let shader = lit_shader();

    let a = ctx.get_or_create_pipeline(&opaque_pipeline(), &pass, &shader).unwrap();
    let b = ctx.get_or_create_pipeline(&opaque_pipeline(), &forward_pass(), &lit_shader()).unwrap();

    assert_eq!(a.key, b.key);
    assert_eq!(ctx.caches().len(), (1, 1, 1, 0));
    assert_eq!(ctx.device().created(ResourceKind::Pipeline), 1);
}

fn mesh_pipeline(cull_mode: Option<wgpu::Face>, formats: &[VertexFormat]) -> PipelineDescription {
    PipelineDescription::new(
        "mesh",
        PipelineState {
            cull_mode,
            depth: Some(DepthStateKey::default()),
            ..Default::default()
        },
        VertexLayout::interleaved(formats),
    )
}

#[test]
fn same_label_with_different_content_gets_distinct_entries() {
    let mut ctx = context();
    let (pass, shader) = (forward_pass(), lit_shader());

    let culled = mesh_pipeline(Some(wgpu::Face::Back), &[VertexFormat::Float32x3]);
    let double_sided = mesh_pipeline(None, &[VertexFormat::Float32x2]);
    let a = ctx.get_or_create_pipeline(&culled, &pass, &shader).unwrap();
    let b = ctx.get_or_create_pipeline(&double_sided, &pass, &shader).unwrap();
    assert_ne!(a.key, b.key);
    assert_eq!(ctx.device().created(ResourceKind::Pipeline), 2);

    let grey_fs = ShaderStageSource::new(
        "@fragment
fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(0.5); }",
        "fs_main",
    );
    let grey = ShaderDescription::new("lit", shader.vertex.clone(), Some(grey_fs))
        .with_uniforms(shader.uniform_layout(UniformScope::Global).clone())
        .with_uniforms(shader.uniform_layout(UniformScope::Draw).clone());
    let lit = ctx.get_or_create_shader(&shader, &ShaderDefines::new()).unwrap();
    let other = ctx.get_or_create_shader(&grey, &ShaderDefines::new()).unwrap();
    assert_ne!(lit.key, other.key);

    let srgb = RenderPassDescription::new("main", &[COLOR], None);
    let hdr = RenderPassDescription::new("main", &[TextureFormat::Rgba16Float], None);
    let srgb_ref = ctx.get_or_create_render_pass(&srgb).unwrap();
    let hdr_ref = ctx.get_or_create_render_pass(&hdr).unwrap();
    assert_ne!(srgb_ref.key, hdr_ref.key);
    assert_eq!(
        ctx.caches().render_pass(hdr_ref.key).unwrap().attachment_formats.as_slice(),
        &[TextureFormat::Rgba16Float]
    );
}

#[test]
fn same_content_under_different_labels_shares_one_entry() {
    let mut ctx = context();
    let shader = lit_shader();
    let forward = forward_pass();
    let main = RenderPassDescription::new("main", &[COLOR], Some(DEPTH));
    let opaque = opaque_pipeline();
    let mut renamed = opaque_pipeline();
    renamed.label = "opaque-copy".to_string();
    let solid = PipelineDescription::new("solid", opaque.state.clone(), opaque.vertex_layout.clone());

    let a = ctx.get_or_create_pipeline(&opaque, &forward, &shader).unwrap();
    let b = ctx.get_or_create_pipeline(&solid, &main, &shader).unwrap();
    let c = ctx.get_or_create_pipeline(&renamed, &main, &shader).unwrap();

    assert_eq!(a.key, b.key);
    assert_eq!(b.key, c.key);
    assert_eq!(ctx.caches().len(), (1, 1, 1, 0));
    assert_eq!(ctx.device().created(ResourceKind::Pipeline), 1);
    assert_eq!(ctx.device().created(ResourceKind::RenderPass), 1);
}

#[test]
fn defines_select_distinct_variants() {
    let mut ctx = context();
    let (pass, shader) = (forward_pass(), lit_shader());
    let lit = opaque_pipeline();
    let unlit = opaque_pipeline().with_defines(ShaderDefines::new().with("UNLIT", "1"));

    let a = ctx.get_or_create_pipeline(&lit, &pass, &shader).unwrap();
    let b = ctx.get_or_create_pipeline(&unlit, &pass, &shader).unwrap();

    assert_ne!(a.key, b.key);
    let (passes, shaders, pipelines, _) = ctx.caches().len();
    assert_eq!((passes, shaders, pipelines), (1, 2, 2));

    let lit_variant = ctx.caches().pipeline(a.key).unwrap().shader;
    let unlit_variant = ctx.caches().pipeline(b.key).unwrap().shader;
    assert_ne!(
        ctx.caches().shader_variant(lit_variant).unwrap().source_hash,
        ctx.caches().shader_variant(unlit_variant).unwrap().source_hash
    );
}

// ============================================================================
// Incompatibility Tests
// ============================================================================

#[test]
fn missing_subpass_is_incompatible_and_inserts_nothing() {
    let mut ctx = context();
    let pipeline = opaque_pipeline().with_subpass(1);

    let result = ctx.get_or_create_pipeline(&pipeline, &forward_pass(), &lit_shader());

    assert!(matches!(result, Err(CacheError::IncompatibleDescription(_))));
    let (_, _, pipelines, _) = ctx.caches().len();
    assert_eq!(pipelines, 0);
    assert_eq!(ctx.device().created(ResourceKind::Pipeline), 0);
}

#[test]
fn color_output_count_must_match_subpass() {
    let mut ctx = context();
    let gbuffer = RenderPassDescription::new("gbuffer", &[COLOR, TextureFormat::Rgba16Float], Some(DEPTH));

    let result = ctx.get_or_create_pipeline(&opaque_pipeline(), &gbuffer, &lit_shader());

    assert!(matches!(result, Err(CacheError::IncompatibleDescription(_))));
}

#[test]
fn depth_state_requires_depth_attachment() {
    let mut ctx = context();
    let no_depth = RenderPassDescription::new("overlay", &[COLOR], None);

    let result = ctx.get_or_create_pipeline(&opaque_pipeline(), &no_depth, &lit_shader());
    assert!(matches!(result, Err(CacheError::IncompatibleDescription(_))));

    let flat = PipelineDescription::new("flat", PipelineState::default(), VertexLayout::default());
    assert!(ctx.get_or_create_pipeline(&flat, &no_depth, &lit_shader()).is_ok());
}

#[test]
fn input_attachments_must_match_subpass_inputs() {
    let mut ctx = context();
    let pass = RenderPassDescription::new("deferred", &[COLOR, TextureFormat::Rgba16Float], None).with_subpasses([
        SubpassDescription {
            color: [1].into_iter().collect(),
            ..Default::default()
        },
        SubpassDescription {
            color: [0].into_iter().collect(),
            inputs: [1].into_iter().collect(),
            uses_depth: false,
        },
    ]);
    let mut resolve = lit_shader();
    resolve.input_attachment_formats.push(TextureFormat::Rgba16Float);
    resolve.mark_changed();

    let pipeline = PipelineDescription::new("resolve", PipelineState::default(), VertexLayout::default());
    assert!(matches!(
        ctx.get_or_create_pipeline(&pipeline, &pass, &resolve),
        Err(CacheError::IncompatibleDescription(_))
    ));
    assert!(ctx.get_or_create_pipeline(&pipeline.with_subpass(1), &pass, &resolve).is_ok());
}

#[test]
fn invalid_subpass_reference_rejects_render_pass() {
    let mut ctx = context();
    let pass = RenderPassDescription::new("broken", &[COLOR], None).with_subpasses([SubpassDescription {
        color: [3].into_iter().collect(),
        ..Default::default()
    }]);

    assert!(matches!(
        ctx.get_or_create_render_pass(&pass),
        Err(CacheError::IncompatibleDescription(_))
    ));
    assert!(ctx.caches().is_empty());
}

#[test]
fn oversized_inline_draw_data_is_incompatible() {
    let settings = CacheSettings {
        max_inline_bytes: 256,
        ..Default::default()
    };
    // The device limit (128) wins over the larger setting.
    let mut ctx = CacheContext::new(HeadlessDevice::new(), settings);
    let shader = lit_shader().with_uniforms(
        UniformLayout::new(UniformScope::Draw)
            .with_data("model", UniformType::Mat4, ShaderStages::VERTEX)
            .with_data("normal", UniformType::Mat4, ShaderStages::VERTEX)
            .with_data("prev_model", UniformType::Mat4, ShaderStages::VERTEX),
    );

    let result = ctx.get_or_create_shader(&shader, &ShaderDefines::new());

    assert!(matches!(result, Err(CacheError::IncompatibleDescription(_))));
    assert_eq!(ctx.caches().max_inline_bytes(), 128);
}

// ============================================================================
// Build Failure Tests
// ============================================================================

#[test]
fn failed_build_is_local_and_retried_only_on_new_version() {
    let mut ctx = context();
    let (pass, shader, mut pipeline) = (forward_pass(), lit_shader(), opaque_pipeline());

    ctx.device().fail_next(ResourceKind::Pipeline);
    let failed = ctx.get_or_create_pipeline(&pipeline, &pass, &shader);
    assert!(matches!(
        failed,
        Err(CacheError::BuildFailure {
            kind: ResourceKind::Pipeline,
            ..
        })
    ));

    // Dependencies are unaffected.
    let rp = ctx.get_or_create_render_pass(&pass).unwrap();
    assert!(ctx.caches().render_pass(rp.key).is_some());

    // Same version: not retried.
    assert!(ctx.get_or_create_pipeline(&pipeline, &pass, &shader).is_err());
    assert_eq!(ctx.device().created(ResourceKind::Pipeline), 0);

    pipeline.mark_changed();
    let rebuilt = ctx.get_or_create_pipeline(&pipeline, &pass, &shader).unwrap();
    assert!(ctx.caches().pipeline(rebuilt.key).is_some());
    assert_eq!(ctx.stats().pipelines.failures, 1);
}

#[test]
fn failed_entry_is_purge_eligible() {
    let mut ctx = context();
    let (pass, shader, pipeline) = (forward_pass(), lit_shader(), opaque_pipeline());

    ctx.device().fail_next(ResourceKind::Pipeline);
    assert!(ctx.get_or_create_pipeline(&pipeline, &pass, &shader).is_err());

    let report = ctx.purge_stale_resources_at(Duration::from_millis(10)).unwrap();
    assert_eq!(report.pipelines, 1);
    assert_eq!(report.render_passes, 0);
    assert_eq!(report.shaders, 0);
}

#[test]
fn shader_module_failure_releases_set_layouts() {
    let mut ctx = context();

    ctx.device().fail_next(ResourceKind::ShaderModule);
    let result = ctx.get_or_create_shader(&lit_shader(), &ShaderDefines::new());

    assert!(matches!(result, Err(CacheError::BuildFailure { .. })));
    assert_eq!(ctx.device().created(ResourceKind::SetLayout), 3);
    assert_eq!(ctx.device().live(ResourceKind::SetLayout), 0);
}

#[test]
fn template_error_creates_no_native_objects() {
    let mut ctx = context();
    let shader = ShaderDescription::new("broken", ShaderStageSource::new("{$ if $}", "vs_main"), None);

    let result = ctx.get_or_create_shader(&shader, &ShaderDefines::new());

    assert!(matches!(result, Err(CacheError::BuildFailure { .. })));
    assert_eq!(ctx.device().created(ResourceKind::SetLayout), 0);
    assert_eq!(ctx.device().created(ResourceKind::ShaderModule), 0);
}

// ============================================================================
// Framebuffer Tests
// ============================================================================

#[test]
fn framebuffer_is_keyed_by_attachment_identities() {
    let mut ctx = context();
    let size = UVec2::new(800, 600);
    let color = ctx.device().create_target(COLOR, size);
    let depth = ctx.device().create_target(DEPTH, size);
    let other_color = ctx.device().create_target(COLOR, size);

    let rp = ctx.get_or_create_render_pass(&forward_pass()).unwrap();
    let a = ctx
        .get_or_create_framebuffer(rp, &[color.clone(), depth.clone()], size)
        .unwrap();
    let again = ctx
        .get_or_create_framebuffer(rp, &[color.clone(), depth.clone()], size)
        .unwrap();
    let b = ctx.get_or_create_framebuffer(rp, &[other_color, depth], size).unwrap();

    assert_eq!(a, again);
    assert_ne!(a.key, b.key);
    assert_eq!(ctx.device().created(ResourceKind::Framebuffer), 2);
    assert_eq!(ctx.caches().framebuffer(a.key).unwrap().attachments[0], color.identity);
}

#[test]
fn framebuffer_validates_attachments_against_render_pass() {
    let mut ctx = context();
    let size = UVec2::new(64, 64);
    let color = ctx.device().create_target(COLOR, size);
    let wrong_format = ctx.device().create_target(TextureFormat::Rgba16Float, size);
    let depth = ctx.device().create_target(DEPTH, size);
    let small_depth = ctx.device().create_target(DEPTH, UVec2::new(32, 32));
    let rp = ctx.get_or_create_render_pass(&forward_pass()).unwrap();

    for targets in [
        vec![color.clone()],
        vec![wrong_format, depth.clone()],
        vec![color.clone(), small_depth],
        vec![color.clone().with_color_space(ColorSpace::Linear), depth.clone()],
    ] {
        let result = ctx.get_or_create_framebuffer(rp, &targets, size);
        assert!(matches!(result, Err(CacheError::IncompatibleDescription(_))));
    }
    assert_eq!(ctx.device().created(ResourceKind::Framebuffer), 0);
    assert!(ctx.get_or_create_framebuffer(rp, &[color, depth], size).is_ok());
}

#[test]
fn framebuffer_rebuilds_when_render_pass_rebuilds() {
    let mut ctx = context();
    let size = UVec2::new(128, 128);
    let targets = [ctx.device().create_target(COLOR, size), ctx.device().create_target(DEPTH, size)];
    let mut pass = forward_pass();

    let rp = ctx.get_or_create_render_pass(&pass).unwrap();
    let before = ctx.get_or_create_framebuffer(rp, &targets, size).unwrap();

    pass.color_attachments[0].store = false;
    pass.mark_changed();
    let rp = ctx.get_or_create_render_pass(&pass).unwrap();
    let after = ctx.get_or_create_framebuffer(rp, &targets, size).unwrap();

    assert_eq!(before.key, after.key);
    assert_eq!(ctx.device().created(ResourceKind::Framebuffer), 2);
    assert_eq!(ctx.device().live(ResourceKind::Framebuffer), 1);
}

// ============================================================================
// Invalidation Tests
// ============================================================================

#[test]
fn invalidating_a_shader_cascades_to_pipelines() {
    let mut ctx = context();
    let (pass, shader, pipeline) = (forward_pass(), lit_shader(), opaque_pipeline());
    let handle = ctx.get_or_create_pipeline(&pipeline, &pass, &shader).unwrap();

    assert_eq!(ctx.invalidate_shader(shader.id), 2);
    assert!(ctx.caches().pipeline_entry(handle.key).unwrap().is_invalidated());

    // Removed on the next sweep even though recently used.
    let report = ctx.purge_stale_resources_at(Duration::from_millis(1)).unwrap();
    assert_eq!(report.shaders, 1);
    assert_eq!(report.pipelines, 1);
    assert_eq!(report.render_passes, 0);
}

#[test]
fn invalidated_entry_rebuilds_on_next_lookup() {
    let mut ctx = context();
    let (pass, shader, pipeline) = (forward_pass(), lit_shader(), opaque_pipeline());
    let before = ctx.get_or_create_pipeline(&pipeline, &pass, &shader).unwrap();

    ctx.invalidate_render_pass(pass.id);
    let after = ctx.get_or_create_pipeline(&pipeline, &pass, &shader).unwrap();

    assert_eq!(before.key, after.key);
    assert_eq!(ctx.device().created(ResourceKind::RenderPass), 2);
    assert_eq!(ctx.device().created(ResourceKind::Pipeline), 2);
    assert!(!ctx.caches().pipeline_entry(after.key).unwrap().is_invalidated());
}

#[test]
fn invalidating_a_render_pass_cascades_to_framebuffers() {
    let mut ctx = context();
    let size = UVec2::new(16, 16);
    let targets = [ctx.device().create_target(COLOR, size), ctx.device().create_target(DEPTH, size)];
    let pass = forward_pass();
    let rp = ctx.get_or_create_render_pass(&pass).unwrap();
    ctx.get_or_create_framebuffer(rp, &targets, size).unwrap();
    ctx.get_or_create_pipeline(&opaque_pipeline(), &pass, &lit_shader()).unwrap();

    assert_eq!(ctx.invalidate_render_pass(pass.id), 3);

    let report = ctx.purge_stale_resources_at(Duration::from_millis(1)).unwrap();
    assert_eq!(report.render_passes, 1);
    assert_eq!(report.framebuffers, 1);
    assert_eq!(report.pipelines, 1);
    assert_eq!(report.shaders, 0);
}

#[test]
fn dropped_description_makes_dependents_purge_eligible() {
    let mut ctx = context();
    let (pass, shader) = (forward_pass(), lit_shader());
    let pipeline = opaque_pipeline();
    ctx.get_or_create_pipeline(&pipeline, &pass, &shader).unwrap();

    drop(pipeline);
    let report = ctx.purge_stale_resources_at(Duration::from_millis(1)).unwrap();

    assert_eq!(report.pipelines, 1);
    assert_eq!(report.render_passes, 0);
    assert_eq!(report.shaders, 0);
    assert_eq!(ctx.device().live(ResourceKind::Pipeline), 0);
}

#[test]
fn clear_destroys_everything_after_idle() {
    let mut ctx = context();
    ctx.get_or_create_pipeline(&opaque_pipeline(), &forward_pass(), &lit_shader())
        .unwrap();

    ctx.reset_for_next_frame_at(Duration::ZERO);
    assert!(matches!(ctx.clear(), Err(CacheError::FrameInProgress)));
    ctx.finish_frame();

    ctx.clear().unwrap();
    assert!(ctx.caches().is_empty());
    assert_eq!(ctx.device().wait_idle_calls(), 1);
    for kind in [
        ResourceKind::Pipeline,
        ResourceKind::RenderPass,
        ResourceKind::ShaderModule,
        ResourceKind::SetLayout,
    ] {
        assert_eq!(ctx.device().live(kind), 0, "{kind} still alive");
    }
    assert_eq!(ctx.stats().total().evictions, 3);
}
