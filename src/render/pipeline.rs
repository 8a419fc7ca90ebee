//! Windowed render pipeline
//!
//! Ties the surface, the GPU heightfield and the scene renderer together:
//! - input handlers feed the frame driver (pointer, resize, orbit, zoom)
//! - `render` runs one tick and blits the HDR frame onto the swapchain
//! - key actions toggle the glass back face and the background, and smooth or reseed the water

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::compute::gpu::GpuBackend;
use crate::config::SceneConfig;
use crate::export::{export_frame, ExportError};
use crate::render::compositor::RenderError;
use crate::render::context::{GpuContext, InitError};
use crate::render::frame::{FrameDriver, FrameError};
use crate::render::gpu_heightfield::create_gpu_heightfield;
use crate::render::headless::{create_output, read_rgba8, OUTPUT_FORMAT};
use crate::render::pointer::cursor_to_ndc;
use crate::render::renderer::WgpuSceneRenderer;
use crate::render::setup::{apply_transmission, build_frame_context, SceneHandles};

/// Errors from one windowed frame.
#[derive(Debug, thiserror::Error)]
pub enum PresentError {
    #[error("surface: {0}")]
    Surface(#[from] wgpu::SurfaceError),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Errors from saving a screenshot.
#[derive(Debug, thiserror::Error)]
pub enum ScreenshotError {
    #[error("failed to create screenshot directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("readback failed: {0}")]
    Readback(#[from] RenderError),

    #[error(transparent)]
    Export(#[from] ExportError),
}

/// Pipeline owning the window surface and everything drawn into it.
pub struct RenderPipeline {
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,
    context: GpuContext,
    driver: FrameDriver<GpuBackend>,
    renderer: WgpuSceneRenderer,
    handles: SceneHandles,
    config: SceneConfig,
    // Pointer state
    cursor: Option<(f64, f64)>,
    perturbing: bool,
    orbiting: bool,
    // FPS tracking
    frame_times: Vec<f32>,
    fps: f32,
    // Export state
    pub screenshot_requested: bool,
    pub screenshot_counter: u32,
}

impl RenderPipeline {
    /// Create the pipeline for `window`.
    ///
    /// # Arguments
    /// * `window` - Target window
    /// * `config` - Scene configuration
    pub async fn new(
        window: Arc<winit::window::Window>,
        config: SceneConfig,
    ) -> Result<Self, InitError> {
        let size = window.inner_size();
        let width = size.width.max(1);
        let height = size.height.max(1);

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance.create_surface(window)?;
        let context = GpuContext::new(&instance, Some(&surface)).await?;

        // Configure surface
        let surface_caps = surface.get_capabilities(&context.adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or(InitError::UnsupportedSurface)?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width,
            height,
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&context.device, &surface_config);

        // put id:'sim_seed', label:'Seed heightmap', input:'final_config.internal', output:'heightmap_texture.gpu'
        let extent = config.grid_extent();
        let seed = config.seed_mode().texels(extent, config.simulation.bounds);
        let simulation = create_gpu_heightfield(&context, extent, config.simulation_params(), &seed)?;

        let (frame_context, handles) = build_frame_context(&config, width as f32 / height as f32);
        let driver = FrameDriver::new(simulation, frame_context);
        let renderer = WgpuSceneRenderer::new(
            context.clone(),
            width,
            height,
            config.transmission.capture_scale,
            config.render.tone_mapping,
        );

        Ok(Self {
            surface,
            surface_config,
            context,
            driver,
            renderer,
            handles,
            config,
            cursor: None,
            perturbing: false,
            orbiting: false,
            frame_times: Vec::with_capacity(60),
            fps: 0.0,
            screenshot_requested: false,
            screenshot_counter: 0,
        })
    }

    /// Handle window resize
    ///
    /// The swapchain is reconfigured immediately; renderer targets and the
    /// camera aspect follow at the next frame boundary.
    pub fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.surface_config.width = new_size.width;
            self.surface_config.height = new_size.height;
            self.surface.configure(&self.context.device, &self.surface_config);
            self.driver.on_resize(new_size.width, new_size.height);
        }
    }

    /// Reconfigure the swapchain at its current size, e.g. after `SurfaceError::Lost`.
    pub fn reconfigure(&mut self) {
        self.surface.configure(&self.context.device, &self.surface_config);
    }

    /// Track the cursor; perturbs the water or orbits the camera while a button is held.
    pub fn cursor_moved(&mut self, x: f64, y: f64) {
        if self.orbiting
            && let Some((last_x, last_y)) = self.cursor
        {
            let camera = &mut self.driver.context_mut().camera;
            camera.orbit((x - last_x) as f32, (y - last_y) as f32);
        }
        self.cursor = Some((x, y));

        if self.perturbing {
            let ndc = cursor_to_ndc(x, y, self.surface_config.width, self.surface_config.height);
            self.driver.on_pointer_move(ndc.x, ndc.y);
        }
    }

    pub fn cursor_left(&mut self) {
        self.cursor = None;
        self.driver.on_pointer_leave();
    }

    /// Start or stop perturbing the water under the cursor.
    pub fn set_perturbing(&mut self, pressed: bool) {
        self.perturbing = pressed;
        if pressed && let Some((x, y)) = self.cursor {
            let ndc = cursor_to_ndc(x, y, self.surface_config.width, self.surface_config.height);
            self.driver.on_pointer_move(ndc.x, ndc.y);
        }
    }

    pub fn set_orbiting(&mut self, pressed: bool) {
        self.orbiting = pressed;
    }

    pub fn zoom(&mut self, scroll: f32) {
        self.driver.context_mut().camera.zoom(scroll);
    }

    /// Smooth the water after the next step.
    pub fn smooth_water(&mut self) {
        self.driver.schedule_smoothing(self.config.simulation.smoothing_passes);
    }

    /// Replace the water with a fresh seed.
    pub fn reseed(&mut self) {
        self.config.simulation.seed = self.config.simulation.seed.wrapping_add(1);
        let extent = self.driver.simulation().extent();
        let texels = self.config.seed_mode().texels(extent, self.config.simulation.bounds);
        match self.driver.simulation_mut().reseed(&texels) {
            Ok(()) => log::info!("Reseeded water (seed {})", self.config.simulation.seed),
            Err(e) => log::warn!("Reseed failed: {}", e),
        }
    }

    /// Toggle the glass back-face capture.
    pub fn toggle_backside(&mut self) {
        self.config.transmission.backside = !self.config.transmission.backside;
        apply_transmission(self.driver.context_mut(), &self.handles, &self.config);
        log::info!("Backside capture {}", if self.config.transmission.backside { "on" } else { "off" });
    }

    /// Toggle between a transparent and a solid scene background.
    pub fn toggle_background(&mut self) {
        self.config.render.transparent_background = !self.config.render.transparent_background;
        self.driver.context_mut().scene.background = self.config.background();
    }

    /// Request a screenshot on the next frame
    pub fn request_screenshot(&mut self) {
        self.screenshot_requested = true;
    }

    /// Update FPS tracking
    fn track_fps(&mut self, dt: f32) {
        self.frame_times.push(dt);
        if self.frame_times.len() > 60 {
            self.frame_times.remove(0);
        }
        let avg_dt: f32 = self.frame_times.iter().sum::<f32>() / self.frame_times.len() as f32;
        if avg_dt > 0.0 {
            self.fps = 1.0 / avg_dt;
        }
    }

    // put id:'frame_tick', label:'Run one frame', input:'loop_iteration.internal', output:'surface_frame.gpu'
    /// Run one tick and present it.
    pub fn render(&mut self, dt: f32) -> Result<(), PresentError> {
        self.track_fps(dt);
        let report = self.driver.frame(&mut self.renderer, dt)?;
        if !report.compositor.is_clean() {
            log::debug!("{} transmissive capture(s) failed", report.compositor.failures.len());
        }

        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        self.renderer.present(&view, self.surface_config.format);

        if self.screenshot_requested {
            self.screenshot_requested = false;
            let path = PathBuf::from(format!("screenshots/frame_{:05}.png", self.screenshot_counter));
            match self.capture_frame(&path) {
                Ok(()) => self.screenshot_counter += 1,
                Err(e) => log::warn!("Screenshot failed: {}", e),
            }
        }

        output.present();
        Ok(())
    }

    /// Capture the current frame to a PNG file
    pub fn capture_frame(&mut self, path: &Path) -> Result<(), ScreenshotError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let (width, height) = self.size();
        let (texture, view) = create_output(&self.context.device, width, height);
        self.renderer.present(&view, OUTPUT_FORMAT);
        let pixels = read_rgba8(&self.context, &texture)?;
        export_frame(path, width, height, &pixels)?;
        Ok(())
    }

    /// Get window size
    pub fn size(&self) -> (u32, u32) {
        (self.surface_config.width, self.surface_config.height)
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    pub fn driver(&self) -> &FrameDriver<GpuBackend> {
        &self.driver
    }
}
