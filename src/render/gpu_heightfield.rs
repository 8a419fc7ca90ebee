//! GPU wave simulation.
//!
//! Runs `HeightfieldSimulation` on the wgpu grid backend. The WGSL kernels
//! mirror the CPU reference kernels texel for texel; the grid storage format
//! falls back from `Rgba32Float` to `Rgba16Float` when the adapter cannot
//! store or compile at full precision.

use crate::compute::gpu::{GpuBackend, GridPrecision, WgslKernel};
use crate::compute::{GridError, GridExtent, Texel};
use crate::physics::heightfield::{HeightfieldKernels, HeightfieldSimulation, SimulationParams};
use crate::render::context::GpuContext;

const WAVE_SHADER: &str = include_str!("shaders/heightfield.wgsl");
const SMOOTH_SHADER: &str = include_str!("shaders/smooth.wgsl");

impl HeightfieldKernels for GpuBackend {
    fn wave_kernel() -> Self::Kernel {
        WgslKernel::new(WAVE_SHADER, "wave_step")
    }

    fn smoothing_kernel() -> Self::Kernel {
        WgslKernel::new(SMOOTH_SHADER, "smooth_heights")
    }
}

/// Heightfield simulation running on the GPU.
pub type GpuHeightfield = HeightfieldSimulation<GpuBackend>;

/// Build a GPU heightfield, stepping down in precision until one compiles.
///
/// # Arguments
/// * `context` - Device and queue to run on
/// * `extent` - Grid resolution
/// * `params` - Initial simulation parameters
/// * `initial` - Seed texels
pub fn create_gpu_heightfield(
    context: &GpuContext,
    extent: GridExtent,
    params: SimulationParams,
    initial: &[Texel],
) -> Result<GpuHeightfield, GridError> {
    let mut precision = GridPrecision::Full;
    loop {
        let backend = GpuBackend::new(context.clone(), precision);
        match HeightfieldSimulation::new(backend, extent, params, initial) {
            Ok(simulation) => {
                log::info!(
                    "Heightfield {}x{} running at {:?}",
                    extent.width,
                    extent.height,
                    precision.format()
                );
                return Ok(simulation);
            }
            Err(err) if is_precision_error(&err) => match precision.reduced() {
                Some(reduced) => {
                    log::warn!("{err}; retrying with {:?}", reduced.format());
                    precision = reduced;
                }
                None => return Err(err),
            },
            Err(err) => return Err(err),
        }
    }
}

/// Errors a lower storage precision might avoid.
fn is_precision_error(err: &GridError) -> bool {
    matches!(
        err,
        GridError::UnsupportedFormat { .. } | GridError::KernelCompilation { .. }
    )
}

impl HeightfieldSimulation<GpuBackend> {
    /// Read the current heightmap back to the CPU.
    pub fn read_heightmap(&mut self) -> Result<Vec<Texel>, GridError> {
        let heightmap = self.heightmap_id();
        let (backend, texture) = self.grid_mut().backend_and_current(heightmap);
        backend.read_texels(texture)
    }
}
