//! Frame ordering on the CPU backend
//!
//! Drives `FrameDriver` with the CPU heightfield and a recording renderer to
//! check when the heightmap is published, when resizes land and how the
//! pointer and smoothing requests are consumed.

mod common;

use common::{Call, RecordingRenderer};
use glam::Vec3;
use ripple_glass::compute::CpuBackend;
use ripple_glass::config::{SceneConfig, SeedModeConfig};
use ripple_glass::physics::heightfield::HeightfieldSimulation;
use ripple_glass::render::frame::{FrameDriver, FrameError};
use ripple_glass::render::scene::{CaptureSlot, RenderTarget};
use ripple_glass::render::SceneRenderer;
use ripple_glass::render::setup::build_frame_context;

const DT: f32 = 1.0 / 60.0;

fn small_config() -> SceneConfig {
    let mut config = SceneConfig::default();
    config.simulation.width = 32;
    config.simulation.height = 32;
    config
}

fn driver(config: &SceneConfig) -> (FrameDriver<CpuBackend>, RecordingRenderer) {
    let extent = config.grid_extent();
    let seed = config.seed_mode().texels(extent, config.simulation.bounds);
    let simulation =
        HeightfieldSimulation::new(CpuBackend::new(), extent, config.simulation_params(), &seed)
            .expect("cpu simulation");
    let (context, handles) = build_frame_context(config, 4.0 / 3.0);
    (
        FrameDriver::new(simulation, context),
        RecordingRenderer::new(Some(handles.glass)),
    )
}

#[test]
fn test_frame_call_order() {
    let (mut driver, mut renderer) = driver(&small_config());
    driver.frame(&mut renderer, DT).unwrap();

    let main = RenderTarget::Capture(CaptureSlot::Main);
    assert_eq!(
        renderer.calls,
        vec![
            Call::Publish,
            Call::SetTarget(main),
            Call::Draw(main),
            Call::SetTarget(RenderTarget::Screen),
            Call::SetTarget(RenderTarget::Screen),
            Call::Draw(RenderTarget::Screen),
        ]
    );
}

#[test]
fn test_heightmap_published_from_same_step() {
    let (mut driver, mut renderer) = driver(&small_config());
    let before = driver.simulation().texels();

    driver.frame(&mut renderer, DT).unwrap();

    assert_eq!(renderer.published.len(), 1);
    assert_eq!(renderer.published[0], driver.simulation().texels());
    assert_ne!(renderer.published[0], before);
    assert_eq!(driver.simulation().steps(), 1);
}

#[test]
fn test_resize_is_deferred_and_latest_wins() {
    let (mut driver, mut renderer) = driver(&small_config());
    driver.on_resize(800, 600);
    driver.on_resize(1024, 768);
    assert!(renderer.calls.is_empty());

    let report = driver.frame(&mut renderer, DT).unwrap();
    assert_eq!(report.resized, Some((1024, 768)));
    assert_eq!(renderer.calls[0], Call::Resize(1024, 768));
    assert_eq!(
        renderer.calls.iter().filter(|c| matches!(c, Call::Resize(..))).count(),
        1
    );
    assert!((driver.context().camera.aspect - 1024.0 / 768.0).abs() < 1e-6);

    let report = driver.frame(&mut renderer, DT).unwrap();
    assert_eq!(report.resized, None);
}

#[test]
fn test_zero_size_resize_is_ignored() {
    let (mut driver, mut renderer) = driver(&small_config());
    let aspect = driver.context().camera.aspect;
    driver.on_resize(0, 600);

    let report = driver.frame(&mut renderer, DT).unwrap();
    assert_eq!(report.resized, None);
    assert!(!renderer.calls.iter().any(|c| matches!(c, Call::Resize(..))));
    assert_eq!(driver.context().camera.aspect, aspect);
}

#[test]
fn test_resize_during_frame_waits_for_next_frame() {
    let (mut driver, mut renderer) = driver(&small_config());
    let initial = renderer.capture_extent(CaptureSlot::Main);
    renderer.resize_during_draw = Some((driver.resize_queue(), 1000, 800));

    let report = driver.frame(&mut renderer, DT).unwrap();
    assert_eq!(report.resized, None);
    assert!(renderer.draws.iter().all(|d| d.capture_extent == initial));
    assert_eq!(renderer.capture_extent(CaptureSlot::Main), initial);
    assert!(driver.resize_queue().is_pending());

    renderer.draws.clear();
    let report = driver.frame(&mut renderer, DT).unwrap();
    assert_eq!(report.resized, Some((1000, 800)));
    assert!(renderer.draws.iter().all(|d| d.capture_extent == (500, 400)));
}

#[test]
fn test_smoothing_runs_once() {
    let (mut driver, mut renderer) = driver(&small_config());
    driver.schedule_smoothing(2);

    assert!(driver.frame(&mut renderer, DT).unwrap().smoothed);
    assert!(!driver.frame(&mut renderer, DT).unwrap().smoothed);
}

#[test]
fn test_pointer_hit_is_consumed() {
    let mut config = small_config();
    config.simulation.seed_mode = SeedModeConfig::Flat;
    config.simulation.mouse_size = 1.0;
    let (mut driver, mut renderer) = driver(&config);

    driver.on_pointer_move(0.0, 0.0);
    let report = driver.frame(&mut renderer, DT).unwrap();
    assert!(!report.perturbation.is_none());
    assert!(driver
        .simulation()
        .texels()
        .iter()
        .any(|t| t[0].abs() > 0.0));

    let report = driver.frame(&mut renderer, DT).unwrap();
    assert!(report.perturbation.is_none());
}

#[test]
fn test_pointer_miss_yields_sentinel() {
    let (mut driver, mut renderer) = driver(&small_config());
    driver.context_mut().camera.target = Vec3::new(100.0, 0.5, 0.0);

    driver.on_pointer_move(0.0, 0.0);
    let report = driver.frame(&mut renderer, DT).unwrap();
    assert!(report.perturbation.is_none());
}

#[test]
fn test_time_advances_with_frames() {
    let (mut driver, mut renderer) = driver(&small_config());
    driver.frame(&mut renderer, 0.5).unwrap();
    driver.frame(&mut renderer, 0.5).unwrap();

    assert_eq!(driver.frames(), 2);
    assert!((driver.context().scene.time - 1.0).abs() < 1e-6);
}

#[test]
fn test_failed_final_draw_aborts_frame() {
    let (mut driver, mut renderer) = driver(&small_config());
    renderer.fail_draws = vec![1];

    let result = driver.frame(&mut renderer, DT);
    assert!(matches!(result, Err(FrameError::Render(_))));
    assert_eq!(driver.frames(), 0);
}

#[test]
fn test_failed_capture_does_not_abort_frame() {
    let (mut driver, mut renderer) = driver(&small_config());
    renderer.fail_draws = vec![0];

    let report = driver.frame(&mut renderer, DT).unwrap();
    assert_eq!(report.compositor.failures.len(), 1);
    assert_eq!(renderer.draws.last().map(|d| d.target), Some(RenderTarget::Screen));
}
