//! Ripple Glass
//!
//! Interactive water surface seen through a refractive glass sphere.

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

use ripple_glass::config::SceneConfig;
use ripple_glass::render::{PresentError, RenderPipeline};

/// Interactive heightfield water behind transmissive glass
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Override grid resolution, e.g. 256x256
    #[arg(long, value_parser = parse_grid)]
    grid: Option<(u32, u32)>,

    /// Override wave damping (0..1)
    #[arg(long)]
    viscosity: Option<f32>,

    /// Capture the glass back faces as well
    #[arg(long)]
    backside: bool,

    /// Start with a flat water surface
    #[arg(long)]
    flat: bool,
}

fn parse_grid(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{value}'"))?;
    let w = w.trim().parse::<u32>().map_err(|e| e.to_string())?;
    let h = h.trim().parse::<u32>().map_err(|e| e.to_string())?;
    Ok((w, h))
}

/// Application state
struct App {
    window: Option<Arc<Window>>,
    pipeline: Option<RenderPipeline>,
    config: SceneConfig,
    last_frame: Instant,
}

impl App {
    fn new(config: SceneConfig) -> Self {
        Self {
            window: None,
            pipeline: None,
            config,
            last_frame: Instant::now(),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = Window::default_attributes()
            .with_title("Ripple Glass")
            .with_inner_size(LogicalSize::new(1280, 720));

        let window = match event_loop.create_window(window_attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };
        self.window = Some(window.clone());
        window.request_redraw();

        match pollster::block_on(RenderPipeline::new(window, self.config.clone())) {
            Ok(pipeline) => self.pipeline = Some(pipeline),
            Err(e) => {
                log::error!("Failed to initialise GPU: {}", e);
                event_loop.exit();
                return;
            }
        }
        self.last_frame = Instant::now();

        log::info!("Window created, rendering started");
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(pipeline) = self.pipeline.as_mut() else {
            if matches!(event, WindowEvent::CloseRequested) {
                event_loop.exit();
            }
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, exiting");
                event_loop.exit();
            }
            WindowEvent::Resized(new_size) => {
                pipeline.resize(new_size);
            }
            WindowEvent::MouseInput { state, button, .. } => {
                let pressed = state == ElementState::Pressed;
                match button {
                    MouseButton::Left => pipeline.set_perturbing(pressed),
                    MouseButton::Right => pipeline.set_orbiting(pressed),
                    _ => {}
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                pipeline.cursor_moved(position.x, position.y);
            }
            WindowEvent::CursorLeft { .. } => {
                pipeline.cursor_left();
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let scroll = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(pos) => pos.y as f32 * 0.1,
                };
                pipeline.zoom(scroll);
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state == ElementState::Pressed && !event.repeat {
                    use winit::keyboard::{Key, NamedKey};
                    match event.logical_key.as_ref() {
                        Key::Named(NamedKey::Escape) => event_loop.exit(),
                        Key::Named(NamedKey::F12) => pipeline.request_screenshot(),
                        Key::Character("b") => pipeline.toggle_backside(),
                        Key::Character("m") => pipeline.smooth_water(),
                        Key::Character("r") => pipeline.reseed(),
                        Key::Character("t") => pipeline.toggle_background(),
                        _ => {}
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                let dt = now.duration_since(self.last_frame).as_secs_f32();
                self.last_frame = now;

                match pipeline.render(dt) {
                    Ok(()) => {}
                    Err(PresentError::Surface(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)) => {
                        pipeline.reconfigure();
                    }
                    Err(PresentError::Surface(wgpu::SurfaceError::OutOfMemory)) => {
                        log::error!("Out of memory!");
                        event_loop.exit();
                    }
                    Err(e) => log::warn!("Render error: {}", e),
                }

                if let Some(ref window) = self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }
}

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // put id:'cli_parse_args', label:'Parse CLI arguments', output:'cli_args.internal'
    let args = Args::parse();

    // put id:'cfg_load', label:'Load config JSON', input:'cli_args.internal', output:'config.json'
    let mut config = if let Some(ref path) = args.config {
        match SceneConfig::from_file(path) {
            Ok(cfg) => {
                log::info!("Loaded config from {}", path);
                cfg
            }
            Err(e) => {
                log::warn!("Failed to load config: {}, using defaults", e);
                SceneConfig::default()
            }
        }
    } else {
        SceneConfig::default()
    };

    // put id:'cfg_merge_cli', label:'Merge CLI overrides', input:'config.json', output:'final_config.internal'
    if let Some((width, height)) = args.grid {
        config.simulation.width = width;
        config.simulation.height = height;
    }
    if let Some(viscosity) = args.viscosity {
        config.simulation.viscosity = viscosity;
    }
    if args.backside {
        config.transmission.backside = true;
    }
    if args.flat {
        config.simulation.seed_mode = ripple_glass::config::SeedModeConfig::Flat;
    }
    if let Err(e) = config.validate() {
        log::error!("Invalid configuration: {}", e);
        std::process::exit(2);
    }

    log::info!(
        "Starting simulation: {}x{} grid, viscosity {}, backside {}",
        config.simulation.width,
        config.simulation.height,
        config.simulation.viscosity,
        config.transmission.backside
    );

    // put id:'cli_event_loop', label:'Run event loop', input:'final_config.internal', output:'loop_iteration.internal'
    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(e) => {
            log::error!("Failed to create event loop: {}", e);
            std::process::exit(1);
        }
    };
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    if let Err(e) = event_loop.run_app(&mut app) {
        log::error!("Event loop failed: {}", e);
    }
}
