//! Recording scene renderer shared by the CPU-side integration tests.

#![allow(dead_code)]

use ripple_glass::compute::{CpuTexture, Texel};
use ripple_glass::render::camera::Camera;
use ripple_glass::render::compositor::{RenderError, SceneRenderer};
use ripple_glass::render::frame::ResizeQueue;
use ripple_glass::render::scene::{
    Background, CaptureSlot, MeshId, RenderTarget, Scene, ToneMapping, TransmissiveMeshState,
};

/// Everything a draw could observe.
#[derive(Debug, Clone)]
pub struct DrawRecord {
    pub target: RenderTarget,
    pub tone_mapping: ToneMapping,
    pub background: Background,
    pub capture_extent: (u32, u32),
    /// State of the watched transmissive mesh at draw time
    pub glass: Option<TransmissiveMeshState>,
    /// Whether the watched mesh would be drawn depth-only
    pub glass_discarded: bool,
}

/// Calls in the order the renderer received them.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Resize(u32, u32),
    Publish,
    SetTarget(RenderTarget),
    Draw(RenderTarget),
}

/// Renderer that records draws instead of rasterizing them.
pub struct RecordingRenderer {
    pub tone_mapping: ToneMapping,
    pub target: RenderTarget,
    pub capture_size: (u32, u32),
    pub watch: Option<MeshId>,
    pub calls: Vec<Call>,
    pub draws: Vec<DrawRecord>,
    /// Texels of every published heightmap
    pub published: Vec<Vec<Texel>>,
    /// Draw indices that fail with `TargetUnavailable`
    pub fail_draws: Vec<usize>,
    /// Resize posted from inside the first draw, if set
    pub resize_during_draw: Option<(ResizeQueue, u32, u32)>,
}

impl RecordingRenderer {
    pub fn new(watch: Option<MeshId>) -> Self {
        Self {
            tone_mapping: ToneMapping::AcesFilmic,
            target: RenderTarget::Screen,
            capture_size: (320, 240),
            watch,
            calls: Vec::new(),
            draws: Vec::new(),
            published: Vec::new(),
            fail_draws: Vec::new(),
            resize_during_draw: None,
        }
    }

    pub fn capture_draws(&self) -> Vec<&DrawRecord> {
        self.draws
            .iter()
            .filter(|d| matches!(d.target, RenderTarget::Capture(_)))
            .collect()
    }
}

impl SceneRenderer for RecordingRenderer {
    type Heightmap = CpuTexture;

    fn tone_mapping(&self) -> ToneMapping {
        self.tone_mapping
    }

    fn set_tone_mapping(&mut self, mode: ToneMapping) {
        self.tone_mapping = mode;
    }

    fn render_target(&self) -> RenderTarget {
        self.target
    }

    fn set_render_target(&mut self, target: RenderTarget) {
        self.calls.push(Call::SetTarget(target));
        self.target = target;
    }

    fn draw(&mut self, scene: &Scene, _camera: &Camera) -> Result<(), RenderError> {
        let index = self.draws.len();
        self.calls.push(Call::Draw(self.target));

        if let Some((queue, width, height)) = self.resize_during_draw.take() {
            queue.post(width, height);
        }

        let glass = self
            .watch
            .and_then(|id| scene.transmissive(id))
            .map(|m| *m.state());
        self.draws.push(DrawRecord {
            target: self.target,
            tone_mapping: self.tone_mapping,
            background: scene.background,
            capture_extent: self.capture_extent(CaptureSlot::Main),
            glass,
            glass_discarded: glass.is_some_and(|s| s.draws_as_discard(self.target)),
        });

        if self.fail_draws.contains(&index) {
            return Err(RenderError::TargetUnavailable(self.target));
        }
        Ok(())
    }

    fn publish_heightmap(&mut self, heightmap: &CpuTexture) {
        self.calls.push(Call::Publish);
        self.published.push(heightmap.to_vec());
    }

    fn capture_extent(&self, _slot: CaptureSlot) -> (u32, u32) {
        self.capture_size
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.calls.push(Call::Resize(width, height));
        self.capture_size = ((width / 2).max(1), (height / 2).max(1));
    }
}
