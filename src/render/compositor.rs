//! Multi-pass transmission compositing
//!
//! Each transmissive mesh refracts a capture of the scene behind it. Per mesh
//! and per frame the compositor walks `Steady → [BackCapture] → MainCapture →
//! Steady`:
//! - Begin: snapshot the global render state, swap the mesh to the depth-only
//!   stand-in and install its capture background
//! - BackCapture (backside mode only): render the scene into `back`, then bind
//!   the glass to `back` with back faces and the backside thickness
//! - MainCapture: render the scene into `main`, then bind the glass to `main`
//!   with its configured faces and thickness
//! - End: restore the snapshot
//!
//! The restore lives in `CapturePass::drop`, so an early return on a failed
//! capture still leaves the renderer and the mesh in their steady state.

use crate::render::camera::Camera;
use crate::render::scene::{
    ActiveMaterial, Background, CaptureSlot, CullSide, MeshId, RenderTarget, Scene, ToneMapping,
};

/// Failure of a single draw.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RenderError {
    #[error("render target {0:?} is not available")]
    TargetUnavailable(RenderTarget),

    #[error("surface error: {0}")]
    Surface(String),

    #[error("device lost: {0}")]
    DeviceLost(String),
}

/// A capture draw that failed mid-pass.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("capture of '{mesh}' failed during {phase:?}: {source}")]
pub struct CaptureError {
    pub mesh: String,
    pub phase: PassPhase,
    pub source: RenderError,
}

/// The drawing seam the compositor and the frame driver consume.
pub trait SceneRenderer {
    /// Texture type the water surface is displaced by
    type Heightmap: ?Sized;

    fn tone_mapping(&self) -> ToneMapping;
    fn set_tone_mapping(&mut self, mode: ToneMapping);

    fn render_target(&self) -> RenderTarget;
    fn set_render_target(&mut self, target: RenderTarget);

    /// Draw the whole scene from `camera` into the bound target.
    fn draw(&mut self, scene: &Scene, camera: &Camera) -> Result<(), RenderError>;

    /// Bind `heightmap` for the next surface draw.
    fn publish_heightmap(&mut self, heightmap: &Self::Heightmap);

    /// Declared size of a capture buffer.
    fn capture_extent(&self, slot: CaptureSlot) -> (u32, u32);

    /// Reallocate size-dependent targets. Only called at frame boundaries.
    fn resize(&mut self, width: u32, height: u32);
}

/// Where a mesh is in its per-frame capture sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassPhase {
    #[default]
    Steady,
    Begin,
    BackCapture,
    MainCapture,
    End,
}

/// Global render state taken before a pass and restored after it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub tone_mapping: ToneMapping,
    pub background: Background,
    pub side: CullSide,
    pub target: RenderTarget,
}

/// Outcome of one `render_transmissive` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompositorReport {
    /// Meshes that ran a full capture sequence
    pub completed: Vec<MeshId>,
    /// Meshes skipped because they were hidden or not transmissive
    pub skipped: Vec<MeshId>,
    /// Capture failures; the affected meshes show last frame's `main`
    pub failures: Vec<CaptureError>,
    /// Successful capture draws
    pub captures: usize,
}

impl CompositorReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Drives the capture sequence for a list of transmissive meshes.
#[derive(Debug, Default)]
pub struct TransmissiveCompositor {
    frames: u64,
}

impl TransmissiveCompositor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames composited so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Run the capture sequence for every mesh in `meshes`, in order.
    ///
    /// A failed capture is logged and reported; the remaining meshes still
    /// run. On return every managed mesh samples `main` with its configured
    /// culling side.
    pub fn render_transmissive<R: SceneRenderer + ?Sized>(
        &mut self,
        renderer: &mut R,
        scene: &mut Scene,
        camera: &Camera,
        meshes: &[MeshId],
    ) -> CompositorReport {
        let mut report = CompositorReport::default();

        for &id in meshes {
            let enabled = scene.mesh(id).is_some_and(|m| m.visible);
            let Some(material) = scene.transmissive_mut(id) else {
                report.skipped.push(id);
                continue;
            };
            material.state_mut().enabled = enabled;
            if !enabled {
                report.skipped.push(id);
                continue;
            }

            match capture_mesh(renderer, scene, camera, id, &mut report.captures) {
                Ok(()) => report.completed.push(id),
                Err(err) => {
                    log::warn!("{err}; using last frame's capture");
                    report.failures.push(err);
                }
            }
        }

        self.frames += 1;
        report
    }
}

fn capture_mesh<R: SceneRenderer + ?Sized>(
    renderer: &mut R,
    scene: &mut Scene,
    camera: &Camera,
    id: MeshId,
    captures: &mut usize,
) -> Result<(), CaptureError> {
    let mut pass = CapturePass::begin(renderer, scene, id);

    if pass.backside {
        pass.capture(camera, CaptureSlot::Back)?;
        *captures += 1;
    }
    pass.capture(camera, CaptureSlot::Main)?;
    *captures += 1;

    Ok(())
}

/// Scoped capture sequence for one mesh; `Drop` restores the snapshot.
struct CapturePass<'a, R: SceneRenderer + ?Sized> {
    renderer: &'a mut R,
    scene: &'a mut Scene,
    mesh: MeshId,
    snapshot: Snapshot,
    phase: PassPhase,
    backside: bool,
}

impl<'a, R: SceneRenderer + ?Sized> CapturePass<'a, R> {
    fn begin(renderer: &'a mut R, scene: &'a mut Scene, mesh: MeshId) -> Self {
        let (side, settings) = scene
            .transmissive(mesh)
            .map(|m| (m.state().side, m.settings))
            .unwrap_or_default();

        let snapshot = Snapshot {
            tone_mapping: renderer.tone_mapping(),
            background: scene.background,
            side,
            target: renderer.render_target(),
        };

        if let Some(material) = scene.transmissive_mut(mesh) {
            material.state_mut().active = ActiveMaterial::Discard;
        }
        if let Some(background) = settings.custom_background {
            scene.background = background;
        }
        // Captures stay linear; the final frame applies tone mapping once.
        renderer.set_tone_mapping(ToneMapping::None);

        log::trace!("mesh {:?}: {:?} -> {:?}", mesh, PassPhase::Steady, PassPhase::Begin);

        Self {
            renderer,
            scene,
            mesh,
            snapshot,
            phase: PassPhase::Begin,
            backside: settings.backside,
        }
    }

    fn enter(&mut self, phase: PassPhase) {
        log::trace!("mesh {:?}: {:?} -> {:?}", self.mesh, self.phase, phase);
        self.phase = phase;
    }

    /// Render the scene into `slot`, then rebind the glass to it.
    fn capture(&mut self, camera: &Camera, slot: CaptureSlot) -> Result<(), CaptureError> {
        self.enter(match slot {
            CaptureSlot::Back => PassPhase::BackCapture,
            CaptureSlot::Main => PassPhase::MainCapture,
        });

        self.renderer.set_render_target(RenderTarget::Capture(slot));
        self.renderer.draw(self.scene, camera).map_err(|source| CaptureError {
            mesh: self.mesh_name(),
            phase: self.phase,
            source,
        })?;

        let side = self.snapshot.side;
        if let Some(material) = self.scene.transmissive_mut(self.mesh) {
            let settings = material.settings;
            let state = material.state_mut();
            state.active = ActiveMaterial::Transmission;
            state.source = slot;
            match slot {
                CaptureSlot::Back => {
                    state.thickness = settings.backside_thickness;
                    state.side = CullSide::Back;
                }
                CaptureSlot::Main => {
                    state.thickness = settings.thickness;
                    state.side = side;
                }
            }
        }
        Ok(())
    }

    fn mesh_name(&self) -> String {
        self.scene
            .mesh(self.mesh)
            .map(|m| m.name.clone())
            .unwrap_or_else(|| format!("{:?}", self.mesh))
    }
}

impl<R: SceneRenderer + ?Sized> Drop for CapturePass<'_, R> {
    fn drop(&mut self) {
        self.enter(PassPhase::End);

        self.scene.background = self.snapshot.background;
        self.renderer.set_tone_mapping(self.snapshot.tone_mapping);
        self.renderer.set_render_target(self.snapshot.target);

        // A pass that stopped early falls back to the previous `main` contents.
        let side = self.snapshot.side;
        if let Some(material) = self.scene.transmissive_mut(self.mesh) {
            let settings = material.settings;
            let state = material.state_mut();
            state.active = ActiveMaterial::Transmission;
            state.source = CaptureSlot::Main;
            state.thickness = settings.thickness;
            state.side = side;
        }

        self.enter(PassPhase::Steady);
    }
}

/// Capture size for a viewport: `viewport × scale`, at least one texel.
pub fn capture_size(width: u32, height: u32, scale: f32) -> (u32, u32) {
    let scaled = |v: u32| ((v as f32 * scale).round() as u32).max(1);
    (scaled(width), scaled(height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_size_scales_and_clamps() {
        assert_eq!(capture_size(1280, 720, 0.5), (640, 360));
        assert_eq!(capture_size(1, 1, 0.25), (1, 1));
        assert_eq!(capture_size(800, 600, 1.0), (800, 600));
    }

    #[test]
    fn test_capture_error_message() {
        let err = CaptureError {
            mesh: "glass".into(),
            phase: PassPhase::BackCapture,
            source: RenderError::DeviceLost("gone".into()),
        };
        let message = err.to_string();
        assert!(message.contains("glass"));
        assert!(message.contains("BackCapture"));
        assert!(message.contains("gone"));
    }

    #[test]
    fn test_report_clean() {
        let mut report = CompositorReport::default();
        assert!(report.is_clean());
        report.failures.push(CaptureError {
            mesh: "glass".into(),
            phase: PassPhase::MainCapture,
            source: RenderError::TargetUnavailable(RenderTarget::Capture(CaptureSlot::Main)),
        });
        assert!(!report.is_clean());
    }
}
