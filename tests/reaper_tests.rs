//! Staleness Reaper Tests
//!
//! Tests for:
//! - Threshold semantics: touched entries survive, idle ones are purged
//! - Dependency ordering between pipelines, shaders and render passes
//! - A single device-idle point per sweep, none when nothing is stale
//! - Uniform entries and descriptor pools
//! - The fixed-period scheduler and frame-in-progress refusal

use std::time::Duration;

use glam::Mat4;
use wgpu::{ShaderStages, TextureFormat, VertexFormat};

use tessera::{
    CacheContext, CacheError, CacheSettings, HeadlessDevice, PipelineDescription, PipelineState, PurgeReport,
    RenderPassDescription, ResourceKind, ShaderDefines, ShaderDescription, ShaderStageSource, StalenessReaper,
    UniformLayout, UniformScope, UniformType, UniformValueSet, VertexLayout,
};

const VS: &str = "{{ global_struct }}
@vertex
fn vs_main() -> @builtin(position) vec4<f32> { return vec4<f32>(0.0); }";
const FS: &str = "@fragment
fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }";

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn context() -> CacheContext<HeadlessDevice> {
    let _ = env_logger::builder().is_test(true).try_init();
    CacheContext::new(HeadlessDevice::new(), CacheSettings::default())
}

fn pass() -> RenderPassDescription {
    RenderPassDescription::new("hud", &[TextureFormat::Bgra8UnormSrgb], None)
}

fn shader() -> ShaderDescription {
    ShaderDescription::new(
        "hud",
        ShaderStageSource::new(VS, "vs_main"),
        Some(ShaderStageSource::new(FS, "fs_main")),
    )
    .with_uniforms(UniformLayout::new(UniformScope::Global).with_data(
        "projection",
        UniformType::Mat4,
        ShaderStages::VERTEX,
    ))
}

fn pipeline(label: &str) -> PipelineDescription {
    pipeline_with(label, &[VertexFormat::Float32x2])
}

fn pipeline_with(label: &str, formats: &[VertexFormat]) -> PipelineDescription {
    PipelineDescription::new(label, PipelineState::default(), VertexLayout::interleaved(formats))
}

/// Runs one frame at `now` that looks up `pipelines`.
fn frame(
    ctx: &mut CacheContext<HeadlessDevice>,
    now: Duration,
    pipelines: &[&PipelineDescription],
    pass: &RenderPassDescription,
    shader: &ShaderDescription,
) {
    ctx.reset_for_next_frame_at(now);
    for pipeline in pipelines {
        ctx.get_or_create_pipeline(pipeline, pass, shader).unwrap();
    }
    ctx.finish_frame();
}

// ============================================================================
// Threshold Tests
// ============================================================================

#[test]
fn recently_used_entries_survive() {
    let mut ctx = context();
    let (pass, shader, sprite) = (pass(), shader(), pipeline("sprite"));
    frame(&mut ctx, secs(0), &[&sprite], &pass, &shader);
    frame(&mut ctx, secs(3), &[&sprite], &pass, &shader);

    let report = ctx.purge_stale_resources_at(secs(6)).unwrap();

    assert_eq!(report, PurgeReport::default());
    assert_eq!(ctx.device().wait_idle_calls(), 0);
    assert_eq!(ctx.caches().len(), (1, 1, 1, 0));
}

#[test]
fn threshold_is_exclusive() {
    let mut ctx = context();
    let (pass, shader, sprite) = (pass(), shader(), pipeline("sprite"));
    frame(&mut ctx, secs(0), &[&sprite], &pass, &shader);

    assert_eq!(ctx.purge_stale_resources_at(secs(4)).unwrap().total(), 0);
    assert_eq!(ctx.purge_stale_resources_at(secs(4) + Duration::from_millis(1)).unwrap().pipelines, 1);
}

#[test]
fn idle_entries_are_purged_after_one_idle_wait() {
    let mut ctx = context();
    let (pass, shader, sprite) = (pass(), shader(), pipeline("sprite"));
    frame(&mut ctx, secs(0), &[&sprite], &pass, &shader);

    let report = ctx.purge_stale_resources_at(secs(5)).unwrap();

    assert_eq!((report.pipelines, report.shaders, report.render_passes), (1, 1, 1));
    assert!(report.waited_idle);
    assert_eq!(ctx.device().wait_idle_calls(), 1);
    assert!(ctx.caches().is_empty());
    for kind in [
        ResourceKind::Pipeline,
        ResourceKind::ShaderModule,
        ResourceKind::SetLayout,
        ResourceKind::RenderPass,
    ] {
        assert_eq!(ctx.device().live(kind), 0, "{kind} still alive");
    }
}

#[test]
fn live_pipeline_keeps_its_dependencies() {
    let mut ctx = context();
    let (pass, shader) = (pass(), shader());
    let old = pipeline_with("old", &[VertexFormat::Float32x3, VertexFormat::Float32x2]);
    let current = pipeline("current");
    frame(&mut ctx, secs(0), &[&old, &current], &pass, &shader);
    frame(&mut ctx, secs(3), &[&current], &pass, &shader);

    let report = ctx.purge_stale_resources_at(secs(6)).unwrap();

    assert_eq!(report.pipelines, 1);
    assert_eq!(report.shaders, 0);
    assert_eq!(report.render_passes, 0);
    assert_eq!(ctx.caches().len(), (1, 1, 1, 0));
}

#[test]
fn entries_return_after_purge_as_fresh_builds() {
    let mut ctx = context();
    let (pass, shader, sprite) = (pass(), shader(), pipeline("sprite"));
    frame(&mut ctx, secs(0), &[&sprite], &pass, &shader);
    ctx.purge_stale_resources_at(secs(10)).unwrap();

    frame(&mut ctx, secs(11), &[&sprite], &pass, &shader);

    assert_eq!(ctx.device().created(ResourceKind::Pipeline), 2);
    assert_eq!(ctx.device().live(ResourceKind::Pipeline), 1);
}

// ============================================================================
// Uniform Tier Tests
// ============================================================================

#[test]
fn idle_uniform_entries_and_pools_are_purged() {
    let mut ctx = context();
    let shader = shader();
    let variant = ctx.get_or_create_shader(&shader, &ShaderDefines::new()).unwrap();
    let render = ctx.create_render_context();
    let mut values = UniformValueSet::new();
    values.set("projection", Mat4::IDENTITY);

    ctx.reset_for_next_frame_at(secs(0));
    ctx.prepare_global_uniforms(render, variant, 1, &values).unwrap();
    ctx.finish_frame();

    // The variant stays in use, the uniform entry does not.
    ctx.reset_for_next_frame_at(secs(5));
    ctx.get_or_create_shader(&shader, &ShaderDefines::new()).unwrap();
    ctx.finish_frame();

    let report = ctx.purge_stale_resources_at(secs(5)).unwrap();

    assert_eq!(report.uniform_entries, 1);
    assert_eq!(report.descriptor_pools, 1);
    assert_eq!(report.shaders, 0);
    assert!(report.waited_idle);
    assert!(ctx.render_context(render).unwrap().is_empty());
    assert_eq!(ctx.device().live(ResourceKind::DescriptorPool), 0);
}

#[test]
fn purged_pool_does_not_leave_dangling_sets() {
    let mut ctx = context();
    let shader = shader();
    let variant = ctx.get_or_create_shader(&shader, &ShaderDefines::new()).unwrap();
    let render = ctx.create_render_context();
    let mut values = UniformValueSet::new();
    values.set("projection", Mat4::IDENTITY);

    ctx.reset_for_next_frame_at(secs(0));
    let before = ctx.prepare_global_uniforms(render, variant, 1, &values).unwrap();
    ctx.finish_frame();
    ctx.purge_stale_resources_at(secs(10)).unwrap();

    ctx.reset_for_next_frame_at(secs(11));
    let variant = ctx.get_or_create_shader(&shader, &ShaderDefines::new()).unwrap();
    let after = ctx.prepare_global_uniforms(render, variant, 1, &values).unwrap();

    assert_ne!(before.binding_set.unwrap().pool, after.binding_set.unwrap().pool);
}

// ============================================================================
// Scheduling Tests
// ============================================================================

#[test]
fn purge_is_refused_while_a_frame_is_open() {
    let mut ctx = context();
    let (pass, shader, sprite) = (pass(), shader(), pipeline("sprite"));
    frame(&mut ctx, secs(0), &[&sprite], &pass, &shader);

    ctx.reset_for_next_frame_at(secs(10));
    let result = ctx.purge_stale_resources_at(secs(10));

    assert!(matches!(result, Err(CacheError::FrameInProgress)));
    assert_eq!(ctx.device().wait_idle_calls(), 0);
    assert_eq!(ctx.caches().len(), (1, 1, 1, 0));
}

#[test]
fn tick_sweeps_on_fixed_period() {
    let mut ctx = context();
    let (pass, shader, sprite) = (pass(), shader(), pipeline("sprite"));
    frame(&mut ctx, secs(0), &[&sprite], &pass, &shader);

    assert!(ctx.tick_at(secs(4)).is_none());
    let report = ctx.tick_at(secs(5)).expect("period elapsed");
    assert_eq!(report.pipelines, 1);
    assert!(ctx.tick_at(secs(7)).is_none());
}

#[test]
fn due_tick_is_deferred_until_frame_finishes() {
    let mut ctx = context();
    let (pass, shader, sprite) = (pass(), shader(), pipeline("sprite"));
    frame(&mut ctx, secs(0), &[&sprite], &pass, &shader);

    ctx.reset_for_next_frame_at(secs(10));
    assert!(ctx.tick_at(secs(10)).is_none());
    ctx.finish_frame();

    let report = ctx.tick_at(secs(10)).expect("deferred sweep runs once the frame is closed");
    assert_eq!(report.pipelines, 1);
}

#[test]
fn reaper_reads_period_and_threshold_from_settings() {
    let settings = CacheSettings {
        staleness_threshold: secs(1),
        purge_period: secs(2),
        ..Default::default()
    };
    let reaper = StalenessReaper::new(&settings);

    assert_eq!(reaper.threshold(), secs(1));
    assert_eq!(reaper.period(), secs(2));
    assert!(!reaper.is_due(Duration::from_millis(1999)));
    assert!(reaper.is_due(secs(2)));
}
