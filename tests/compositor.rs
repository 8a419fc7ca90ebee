//! Transmissive compositor against a recording renderer
//!
//! Checks the capture sequence, what each capture draw sees and the state
//! every mesh is left in, including after failed captures.

mod common;

use common::RecordingRenderer;
use ripple_glass::config::SceneConfig;
use ripple_glass::render::compositor::{
    CompositorReport, PassPhase, RenderError, TransmissiveCompositor,
};
use ripple_glass::render::frame::FrameContext;
use ripple_glass::render::scene::{
    ActiveMaterial, Background, CaptureSlot, CullSide, RenderTarget, ToneMapping,
};
use ripple_glass::render::setup::{build_frame_context, SceneHandles};

fn setup(backside: bool) -> (FrameContext, SceneHandles, RecordingRenderer) {
    let mut config = SceneConfig::default();
    config.transmission.backside = backside;
    let (context, handles) = build_frame_context(&config, 4.0 / 3.0);
    let renderer = RecordingRenderer::new(Some(handles.glass));
    (context, handles, renderer)
}

fn composite(context: &mut FrameContext, renderer: &mut RecordingRenderer) -> CompositorReport {
    let mut compositor = TransmissiveCompositor::new();
    let FrameContext {
        scene,
        camera,
        transmissive,
        ..
    } = context;
    compositor.render_transmissive(renderer, scene, camera, transmissive)
}

fn assert_steady(context: &FrameContext, handles: &SceneHandles, renderer: &RecordingRenderer) {
    let glass = context.scene.transmissive(handles.glass).unwrap();
    let state = glass.state();
    assert_eq!(state.active, ActiveMaterial::Transmission);
    assert_eq!(state.source, CaptureSlot::Main);
    assert_eq!(state.side, glass.side);
    assert_eq!(state.thickness, glass.settings.thickness);
    assert_eq!(renderer.tone_mapping, ToneMapping::AcesFilmic);
    assert_eq!(renderer.target, RenderTarget::Screen);
}

#[test]
fn test_single_capture_without_backside() {
    let (mut context, handles, mut renderer) = setup(false);
    let report = composite(&mut context, &mut renderer);

    assert!(report.is_clean());
    assert_eq!(report.completed, vec![handles.glass]);
    assert_eq!(report.captures, 1);
    assert_eq!(renderer.draws.len(), 1);

    let draw = &renderer.draws[0];
    assert_eq!(draw.target, RenderTarget::Capture(CaptureSlot::Main));
    assert!(draw.glass_discarded);
    assert_eq!(draw.glass.unwrap().active, ActiveMaterial::Discard);

    assert_steady(&context, &handles, &renderer);
}

#[test]
fn test_backside_captures_back_then_main() {
    let (mut context, handles, mut renderer) = setup(true);
    let settings = context.scene.transmissive(handles.glass).unwrap().settings;
    let report = composite(&mut context, &mut renderer);

    assert!(report.is_clean());
    assert_eq!(report.captures, 2);
    let targets: Vec<_> = renderer.draws.iter().map(|d| d.target).collect();
    assert_eq!(
        targets,
        vec![
            RenderTarget::Capture(CaptureSlot::Back),
            RenderTarget::Capture(CaptureSlot::Main)
        ]
    );

    // The back capture hides the glass; the main capture sees it refracting `back`.
    assert!(renderer.draws[0].glass_discarded);
    let main = renderer.draws[1].glass.unwrap();
    assert!(!renderer.draws[1].glass_discarded);
    assert_eq!(main.active, ActiveMaterial::Transmission);
    assert_eq!(main.source, CaptureSlot::Back);
    assert_eq!(main.side, CullSide::Back);
    assert_eq!(main.thickness, settings.backside_thickness);

    assert_steady(&context, &handles, &renderer);
}

#[test]
fn test_captures_are_not_tone_mapped() {
    let (mut context, _, mut renderer) = setup(true);
    composite(&mut context, &mut renderer);

    assert!(renderer.draws.iter().all(|d| d.tone_mapping == ToneMapping::None));
    assert_eq!(renderer.tone_mapping, ToneMapping::AcesFilmic);
}

#[test]
fn test_custom_background_only_during_captures() {
    let (mut context, handles, mut renderer) = setup(false);
    let original = context.scene.background;
    let custom = Background::Color([0.0, 1.0, 0.0]);
    context
        .scene
        .transmissive_mut(handles.glass)
        .unwrap()
        .settings
        .custom_background = Some(custom);

    composite(&mut context, &mut renderer);

    assert_eq!(renderer.draws[0].background, custom);
    assert_eq!(context.scene.background, original);
}

#[test]
fn test_failed_back_capture_restores_state() {
    let (mut context, handles, mut renderer) = setup(true);
    renderer.fail_draws = vec![0];
    let report = composite(&mut context, &mut renderer);

    assert_eq!(report.failures.len(), 1);
    let failure = &report.failures[0];
    assert_eq!(failure.mesh, "glass");
    assert_eq!(failure.phase, PassPhase::BackCapture);
    assert_eq!(
        failure.source,
        RenderError::TargetUnavailable(RenderTarget::Capture(CaptureSlot::Back))
    );
    assert_eq!(report.captures, 0);
    assert!(report.completed.is_empty());
    // The main capture is not attempted after a failed back capture.
    assert_eq!(renderer.draws.len(), 1);

    assert_steady(&context, &handles, &renderer);
}

#[test]
fn test_failed_main_capture_restores_state() {
    let (mut context, handles, mut renderer) = setup(true);
    renderer.fail_draws = vec![1];
    let report = composite(&mut context, &mut renderer);

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].phase, PassPhase::MainCapture);
    assert_eq!(report.captures, 1);

    assert_steady(&context, &handles, &renderer);
}

#[test]
fn test_hidden_mesh_is_skipped() {
    let (mut context, handles, mut renderer) = setup(true);
    context.scene.set_visible(handles.glass, false);
    let report = composite(&mut context, &mut renderer);

    assert_eq!(report.skipped, vec![handles.glass]);
    assert!(renderer.draws.is_empty());
    let state = context.scene.transmissive(handles.glass).unwrap().state();
    assert!(!state.enabled);
    assert_eq!(state.active, ActiveMaterial::Transmission);
}

#[test]
fn test_non_transmissive_mesh_is_skipped() {
    let (mut context, handles, mut renderer) = setup(false);
    context.transmissive = vec![handles.water, handles.glass];
    let report = composite(&mut context, &mut renderer);

    assert_eq!(report.skipped, vec![handles.water]);
    assert_eq!(report.completed, vec![handles.glass]);
    assert_eq!(renderer.draws.len(), 1);
}

#[test]
fn test_repeated_frames_stay_steady() {
    let (mut context, handles, mut renderer) = setup(true);
    let mut compositor = TransmissiveCompositor::new();
    for _ in 0..3 {
        let FrameContext {
            scene,
            camera,
            transmissive,
            ..
        } = &mut context;
        let report = compositor.render_transmissive(&mut renderer, scene, camera, transmissive);
        assert_eq!(report.captures, 2);
        assert_steady(&context, &handles, &renderer);
    }
    assert_eq!(compositor.frames(), 3);
    assert_eq!(renderer.draws.len(), 6);
}
