//! Headless rendering pipeline for automated testing
//!
//! Runs the full frame (simulation, captures, final draw) into an offscreen
//! texture without a window, so integration tests can inspect the pixels.

use crate::compute::gpu::GpuBackend;
use crate::config::SceneConfig;
use crate::render::compositor::{RenderError, SceneRenderer};
use crate::render::context::{GpuContext, InitError};
use crate::render::frame::{FrameDriver, FrameError, FrameReport};
use crate::render::gpu_heightfield::create_gpu_heightfield;
use crate::render::pointer::cursor_to_ndc;
use crate::render::renderer::WgpuSceneRenderer;
use crate::render::scene::ToneMapping;
use crate::render::setup::{apply_transmission, build_frame_context, SceneHandles};

/// Format of the offscreen output texture.
pub const OUTPUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

/// Headless render pipeline for testing without a window
///
/// Owns the same simulation, scene and renderer as the windowed app; each
/// `step` runs one tick and presents it into an RGBA8 texture.
pub struct HeadlessRenderPipeline {
    context: GpuContext,
    driver: FrameDriver<GpuBackend>,
    renderer: WgpuSceneRenderer,
    handles: SceneHandles,
    config: SceneConfig,
    output: wgpu::Texture,
    output_view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl HeadlessRenderPipeline {
    /// Create a new headless render pipeline
    ///
    /// # Arguments
    /// * `config` - Scene configuration
    /// * `width` - Render target width in pixels
    /// * `height` - Render target height in pixels
    pub async fn new(config: SceneConfig, width: u32, height: u32) -> Result<Self, InitError> {
        let context = GpuContext::headless().await?;
        Self::with_context(context, config, width, height)
    }

    /// Build on an existing device.
    pub fn with_context(
        context: GpuContext,
        config: SceneConfig,
        width: u32,
        height: u32,
    ) -> Result<Self, InitError> {
        let width = width.max(1);
        let height = height.max(1);

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
        let (output, output_view) = create_output(&context.device, width, height);

        log::info!("Headless pipeline {}x{} ready", width, height);
        Ok(Self {
            context,
            driver,
            renderer,
            handles,
            config,
            output,
            output_view,
            width,
            height,
        })
    }

    /// Run one tick and present it into the output texture.
    pub fn step(&mut self, dt: f32) -> Result<FrameReport, FrameError> {
        let report = self.driver.frame(&mut self.renderer, dt)?;
        self.renderer.present(&self.output_view, OUTPUT_FORMAT);
        Ok(report)
    }

    /// Run `frames` ticks of `dt` seconds each.
    pub fn run(&mut self, frames: u32, dt: f32) -> Result<Vec<FrameReport>, FrameError> {
        (0..frames).map(|_| self.step(dt)).collect()
    }

    /// Read the output texture back as tightly packed RGBA8 rows.
    pub fn render_to_buffer(&mut self) -> Result<Vec<u8>, RenderError> {
        read_rgba8(&self.context, &self.output)
    }

    /// Get render dimensions
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Queue a resize; output and renderer targets follow at the next step.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.width = width;
        self.height = height;
        let (output, output_view) = create_output(&self.context.device, width, height);
        self.output = output;
        self.output_view = output_view;
        self.driver.on_resize(width, height);
    }

    /// Move the pointer to a pixel position.
    pub fn pointer_at(&mut self, x: f64, y: f64) {
        let ndc = cursor_to_ndc(x, y, self.width, self.height);
        self.driver.on_pointer_move(ndc.x, ndc.y);
    }

    pub fn pointer_leave(&mut self) {
        self.driver.on_pointer_leave();
    }

    /// Toggle the glass back-face capture.
    pub fn set_backside(&mut self, backside: bool) {
        self.config.transmission.backside = backside;
        apply_transmission(self.driver.context_mut(), &self.handles, &self.config);
    }

    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    pub fn handles(&self) -> &SceneHandles {
        &self.handles
    }

    pub fn driver(&self) -> &FrameDriver<GpuBackend> {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut FrameDriver<GpuBackend> {
        &mut self.driver
    }

    pub fn renderer(&self) -> &WgpuSceneRenderer {
        &self.renderer
    }

    /// Current tone mapping of the final draw.
    pub fn tone_mapping(&self) -> ToneMapping {
        self.renderer.tone_mapping()
    }
}

/// Create an RGBA8 texture the blit can render into and copy from.
pub fn create_output(device: &wgpu::Device, width: u32, height: u32) -> (wgpu::Texture, wgpu::TextureView) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Headless Output Texture"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: OUTPUT_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}

/// Copy a 4-byte-per-texel texture into tightly packed rows.
///
/// # Arguments
/// * `context` - Device and queue owning `texture`
/// * `texture` - Source texture; must allow `COPY_SRC`
pub fn read_rgba8(context: &GpuContext, texture: &wgpu::Texture) -> Result<Vec<u8>, RenderError> {
    let device = &context.device;
    let (width, height) = (texture.width(), texture.height());
    let bytes_per_pixel = 4u32;
    let unpadded_bytes_per_row = width * bytes_per_pixel;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;
    let buffer_size = (padded_bytes_per_row * height) as u64;

    let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback Staging Buffer"),
        size: buffer_size,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Readback Copy Encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &staging_buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    context.queue.submit(std::iter::once(encoder.finish()));

    let buffer_slice = staging_buffer.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::Maintain::Wait);

    match rx.recv() {
        Ok(Ok(())) => {}
        Ok(Err(err)) => return Err(RenderError::DeviceLost(err.to_string())),
        Err(err) => return Err(RenderError::DeviceLost(err.to_string())),
    }

    // Strip the row padding
    let data = buffer_slice.get_mapped_range();
    let mut pixels = Vec::with_capacity((width * height * bytes_per_pixel) as usize);
    for row in 0..height {
        let start = (row * padded_bytes_per_row) as usize;
        let end = start + unpadded_bytes_per_row as usize;
        pixels.extend_from_slice(&data[start..end]);
    }
    drop(data);
    staging_buffer.unmap();

    Ok(pixels)
}
