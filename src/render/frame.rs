//! Per-tick orchestration
//!
//! `FrameDriver::frame` runs one tick in a fixed order:
//! 1. apply the latest deferred resize
//! 2. resolve the pointer into a perturbation point
//! 3. advance the simulation (and smooth, if scheduled)
//! 4. publish the new heightmap to the renderer
//! 5. run the transmissive compositor
//! 6. draw the final frame
//!
//! Publishing before any draw keeps the displayed surface in step with the
//! simulation.

use std::cell::Cell;
use std::rc::Rc;

use glam::Vec2;

use crate::compute::GridError;
use crate::physics::heightfield::{HeightfieldKernels, HeightfieldSimulation, PerturbationPoint};
use crate::render::camera::Camera;
use crate::render::compositor::{CompositorReport, RenderError, SceneRenderer, TransmissiveCompositor};
use crate::render::pointer::{PointerResolver, SurfacePick};
use crate::render::scene::{MeshId, RenderTarget, Scene};

/// Errors that abort a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("simulation step failed: {0}")]
    Simulation(#[from] GridError),

    #[error("final draw failed: {0}")]
    Render(#[from] RenderError),
}

/// Pending viewport size, shared with event handlers.
///
/// Posting replaces any earlier request; the driver takes it at the next
/// frame boundary.
#[derive(Debug, Clone, Default)]
pub struct ResizeQueue {
    pending: Rc<Cell<Option<(u32, u32)>>>,
}

impl ResizeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, width: u32, height: u32) {
        self.pending.set(Some((width, height)));
    }

    pub fn take(&self) -> Option<(u32, u32)> {
        self.pending.take()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.get().is_some()
    }
}

/// Scene state shared by every stage of a frame.
#[derive(Debug, Clone)]
pub struct FrameContext {
    pub scene: Scene,
    pub camera: Camera,
    /// Pick geometry for the water surface
    pub surface: SurfacePick,
    /// Meshes handled by the compositor, in pass order
    pub transmissive: Vec<MeshId>,
}

/// Summary of one `frame` call.
#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    pub perturbation: PerturbationPoint,
    pub smoothed: bool,
    pub resized: Option<(u32, u32)>,
    pub compositor: CompositorReport,
}

/// Owns the simulation and scene and runs them in frame order.
pub struct FrameDriver<B: HeightfieldKernels> {
    simulation: HeightfieldSimulation<B>,
    context: FrameContext,
    pointer: PointerResolver,
    compositor: TransmissiveCompositor,
    resize_queue: ResizeQueue,
    smoothing: Option<u32>,
    elapsed: f32,
    frames: u64,
}

impl<B: HeightfieldKernels> FrameDriver<B> {
    pub fn new(simulation: HeightfieldSimulation<B>, context: FrameContext) -> Self {
        Self {
            simulation,
            context,
            pointer: PointerResolver::new(),
            compositor: TransmissiveCompositor::new(),
            resize_queue: ResizeQueue::new(),
            smoothing: None,
            elapsed: 0.0,
            frames: 0,
        }
    }

    pub fn context(&self) -> &FrameContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut FrameContext {
        &mut self.context
    }

    pub fn simulation(&self) -> &HeightfieldSimulation<B> {
        &self.simulation
    }

    pub fn simulation_mut(&mut self) -> &mut HeightfieldSimulation<B> {
        &mut self.simulation
    }

    /// Handle for posting resizes from outside the frame loop.
    pub fn resize_queue(&self) -> ResizeQueue {
        self.resize_queue.clone()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    /// Record a pointer position in normalized device coordinates.
    pub fn on_pointer_move(&mut self, x: f32, y: f32) {
        self.pointer.on_pointer_move(Vec2::new(x, y));
    }

    pub fn on_pointer_leave(&mut self) {
        self.pointer.on_pointer_leave();
    }

    /// Queue a viewport resize for the next frame boundary.
    pub fn on_resize(&self, width: u32, height: u32) {
        self.resize_queue.post(width, height);
    }

    /// Smooth the heightmap after the next simulation step.
    pub fn schedule_smoothing(&mut self, passes: u32) {
        self.smoothing = Some(passes);
    }

    /// Resolve the pointer and step the simulation once.
    ///
    /// Returns the perturbation point used and whether smoothing ran.
    pub fn advance_simulation(&mut self, dt: f32) -> Result<(PerturbationPoint, bool), GridError> {
        let point = self.pointer.resolve(&self.context.camera, &self.context.surface);
        self.simulation.advance(point)?;

        let smoothed = match self.smoothing.take() {
            Some(passes) => {
                self.simulation.smooth(passes)?;
                log::info!("Smoothed water surface ({} passes)", passes);
                true
            }
            None => false,
        };

        self.elapsed += dt.max(0.0);
        self.context.scene.time = self.elapsed;
        Ok((point, smoothed))
    }

    /// Most recent heightmap.
    pub fn heightmap_texture(&self) -> &B::Texture {
        self.simulation.heightmap_texture()
    }

    /// Run the compositor over the context's transmissive meshes.
    pub fn render_transmissive<R>(&mut self, renderer: &mut R) -> CompositorReport
    where
        R: SceneRenderer + ?Sized,
    {
        let FrameContext {
            scene,
            camera,
            transmissive,
            ..
        } = &mut self.context;
        self.compositor.render_transmissive(renderer, scene, camera, transmissive)
    }

    /// Apply the pending resize, if any.
    fn apply_resize<R>(&mut self, renderer: &mut R) -> Option<(u32, u32)>
    where
        R: SceneRenderer + ?Sized,
    {
        let (width, height) = self.resize_queue.take()?;
        if width == 0 || height == 0 {
            return None;
        }
        renderer.resize(width, height);
        self.context.camera.set_aspect(width as f32 / height as f32);
        log::info!("Resized to {}x{}", width, height);
        Some((width, height))
    }

    /// One full tick.
    pub fn frame<R>(&mut self, renderer: &mut R, dt: f32) -> Result<FrameReport, FrameError>
    where
        R: SceneRenderer<Heightmap = B::Texture> + ?Sized,
    {
        let resized = self.apply_resize(renderer);

        let (perturbation, smoothed) = self.advance_simulation(dt)?;
        renderer.publish_heightmap(self.simulation.heightmap_texture());

        let compositor = self.render_transmissive(renderer);

        renderer.set_render_target(RenderTarget::Screen);
        renderer.draw(&self.context.scene, &self.context.camera)?;

        self.frames += 1;
        Ok(FrameReport {
            perturbation,
            smoothed,
            resized,
            compositor,
        })
    }
}
