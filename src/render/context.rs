//! Shared GPU handles.

use std::sync::Arc;

use crate::compute::GridError;

/// Errors raised while bringing up the GPU side of the application.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("no compatible GPU adapter found")]
    NoAdapter,
    #[error("failed to create device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
    #[error("failed to create surface: {0}")]
    Surface(#[from] wgpu::CreateSurfaceError),
    #[error("surface reports no supported formats for this adapter")]
    UnsupportedSurface,
    #[error("heightfield grid: {0}")]
    Grid(#[from] GridError),
}

/// Adapter, device and queue shared by the simulation and the renderer.
#[derive(Clone)]
pub struct GpuContext {
    pub adapter: Arc<wgpu::Adapter>,
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
}

impl GpuContext {
    /// Request an adapter and device, optionally compatible with `surface`.
    pub async fn new(
        instance: &wgpu::Instance,
        surface: Option<&wgpu::Surface<'_>>,
    ) -> Result<Self, InitError> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: surface,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(InitError::NoAdapter)?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    label: Some("Ripple Glass Device"),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await?;

        let info = adapter.get_info();
        log::info!("Using adapter '{}' ({:?})", info.name, info.backend);

        Ok(Self {
            adapter: Arc::new(adapter),
            device: Arc::new(device),
            queue: Arc::new(queue),
        })
    }

    /// Create a context without any surface, for offscreen rendering.
    pub async fn headless() -> Result<Self, InitError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        Self::new(&instance, None).await
    }
}
