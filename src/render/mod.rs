//! GPU rendering modules
//!
//! Contains wgpu-based rendering infrastructure:
//! - Context: Adapter, device and queue shared with the simulation
//! - Scene: Meshes, materials and transmissive state
//! - Compositor: Capture passes for transmissive meshes
//! - Renderer: wgpu implementation of the scene renderer
//! - Frame: Per-tick ordering of simulation and draws
//! - Pipeline: Windowed surface and input handling
//! - Headless: Headless rendering for automated testing

pub mod camera;
pub mod compositor;
pub mod context;
pub mod frame;
pub mod gpu_heightfield;
pub mod headless;
pub mod pipeline;
pub mod pointer;
pub mod renderer;
pub mod scene;
pub mod setup;

pub use camera::Camera;
pub use compositor::{SceneRenderer, TransmissiveCompositor};
pub use context::{GpuContext, InitError};
pub use frame::FrameDriver;
pub use headless::HeadlessRenderPipeline;
pub use pipeline::{PresentError, RenderPipeline};
pub use renderer::WgpuSceneRenderer;
