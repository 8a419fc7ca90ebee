//! Heightfield wave simulation
//!
//! The water surface is a W×H grid of texels packing two time layers:
//! - channel 0: height at t
//! - channel 1: height at t−1
//! - channels 2 and 3: reserved, kept at zero
//!
//! Each step applies a damped leapfrog wave update over the 4-neighbourhood
//! (clamp-to-edge) and adds a raised-cosine bump around the pointer:
//!
//! ```text
//! new = viscosity · (2·mean(N, S, E, W) − prev) + bump
//! bump = (cos(clamp(|p − pointer| · π / mouse_size, 0, π)) + 1) · wave_height
//! ```
//!
//! The same update runs on the CPU reference backend (this module) and on the
//! GPU (`render::gpu_heightfield`).

use std::f32::consts::PI;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use crate::compute::{
    ComputeGrid, CpuBackend, FilterId, GridBackend, GridError, GridExtent, TexelContext, TexelKernel,
    Texel, VariableId,
};

/// Name of the heightmap variable inside the grid.
pub const HEIGHTMAP_VARIABLE: &str = "heightmap";

/// Default number of passes for `smooth`.
pub const DEFAULT_SMOOTHING_PASSES: u32 = 10;

/// Surface-plane point where the pointer pushes the water this step.
///
/// Validity is encoded by magnitude: points at or beyond
/// `SENTINEL_THRESHOLD` on either axis mean "no perturbation".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerturbationPoint {
    pub x: f32,
    pub y: f32,
}

impl PerturbationPoint {
    /// The "no perturbation" sentinel, outside every surface.
    pub const NONE: Self = Self {
        x: 10_000.0,
        y: 10_000.0,
    };

    const SENTINEL_THRESHOLD: f32 = 5_000.0;

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn is_none(&self) -> bool {
        self.x.abs() >= Self::SENTINEL_THRESHOLD || self.y.abs() >= Self::SENTINEL_THRESHOLD
    }

    pub fn to_array(self) -> [f32; 2] {
        [self.x, self.y]
    }
}

impl Default for PerturbationPoint {
    fn default() -> Self {
        Self::NONE
    }
}

/// Tunable simulation parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationParams {
    /// Radius of the pointer bump in world units
    pub mouse_size: f32,
    /// Damping factor in [0, 1); 1 conserves energy
    pub viscosity: f32,
    /// Height multiplier of the pointer bump
    pub wave_height: f32,
    /// World extent (x, y) covered by the grid
    pub bounds: [f32; 2],
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            mouse_size: 0.2,
            viscosity: 0.98,
            wave_height: 0.04,
            bounds: [8.0, 8.0],
        }
    }
}

/// Uniform block of the wave kernel.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct WaveUniform {
    pub mouse_pos: [f32; 2],
    pub bounds: [f32; 2],
    pub mouse_size: f32,
    pub viscosity: f32,
    pub wave_height: f32,
    pub _padding: f32,
}

impl WaveUniform {
    pub fn new(params: &SimulationParams, point: PerturbationPoint) -> Self {
        Self {
            mouse_pos: point.to_array(),
            bounds: params.bounds,
            mouse_size: params.mouse_size,
            viscosity: params.viscosity,
            wave_height: params.wave_height,
            _padding: 0.0,
        }
    }
}

/// Uniform block of the smoothing filter.
///
/// The filter computes `(w·C + N + S + E + W) / (w + 4)`; the default weight
/// of 1 is the plain 5-point mean.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SmoothUniform {
    pub center_weight: f32,
    pub _padding: [f32; 3],
}

impl Default for SmoothUniform {
    fn default() -> Self {
        Self {
            center_weight: 1.0,
            _padding: [0.0; 3],
        }
    }
}

/// Surface-plane position of a texel centre given its normalized coordinate.
pub fn texel_position(uv: [f32; 2], bounds: [f32; 2]) -> [f32; 2] {
    [(uv[0] - 0.5) * bounds[0], (uv[1] - 0.5) * bounds[1]]
}

/// Raised-cosine pointer contribution at `position`.
///
/// The phase is clamped to π before the cosine, so the bump is exactly zero
/// once the pointer is `mouse_size` or more away.
pub fn mouse_bump(position: [f32; 2], point: PerturbationPoint, mouse_size: f32, wave_height: f32) -> f32 {
    let dx = position[0] - point.x;
    let dy = position[1] - point.y;
    let phase = ((dx * dx + dy * dy).sqrt() * PI / mouse_size).clamp(0.0, PI);
    if phase >= PI {
        return 0.0;
    }
    (phase.cos() + 1.0) * wave_height
}

/// CPU wave kernel.
pub struct WaveKernel;

impl TexelKernel for WaveKernel {
    fn texel(&self, ctx: &TexelContext<'_>) -> Texel {
        let uniform: WaveUniform = ctx.params();
        let centre = ctx.sample(0, 0, 0);
        let north = ctx.sample(0, 0, 1)[0];
        let south = ctx.sample(0, 0, -1)[0];
        let east = ctx.sample(0, 1, 0)[0];
        let west = ctx.sample(0, -1, 0)[0];

        let mean = (north + south + east + west) * 0.25;
        let mut height = uniform.viscosity * (2.0 * mean - centre[1]);

        let point = PerturbationPoint::new(uniform.mouse_pos[0], uniform.mouse_pos[1]);
        height += mouse_bump(
            texel_position(ctx.uv(), uniform.bounds),
            point,
            uniform.mouse_size,
            uniform.wave_height,
        );

        [height, centre[0], 0.0, 0.0]
    }
}

/// CPU smoothing filter.
pub struct SmoothKernel;

impl TexelKernel for SmoothKernel {
    fn texel(&self, ctx: &TexelContext<'_>) -> Texel {
        let uniform: SmoothUniform = ctx.params();
        let weight = uniform.center_weight;
        let c = ctx.sample(0, 0, 0);
        let n = ctx.sample(0, 0, 1);
        let s = ctx.sample(0, 0, -1);
        let e = ctx.sample(0, 1, 0);
        let w = ctx.sample(0, -1, 0);

        let norm = 1.0 / (weight + 4.0);
        let blur = |i: usize| (c[i] * weight + n[i] + s[i] + e[i] + w[i]) * norm;
        [blur(0), blur(1), c[2], c[3]]
    }
}

/// Backends that can run the heightfield kernels.
pub trait HeightfieldKernels: GridBackend {
    fn wave_kernel() -> Self::Kernel;
    fn smoothing_kernel() -> Self::Kernel;
}

impl HeightfieldKernels for CpuBackend {
    fn wave_kernel() -> Self::Kernel {
        Arc::new(WaveKernel)
    }

    fn smoothing_kernel() -> Self::Kernel {
        Arc::new(SmoothKernel)
    }
}

/// Wave simulation over a compute grid.
// put id:'sim_heightfield', label:'Heightfield wave step', input:'perturbation_point.internal', output:'heightmap_texture.gpu'
pub struct HeightfieldSimulation<B: HeightfieldKernels> {
    grid: ComputeGrid<B>,
    heightmap: VariableId,
    smoothing: FilterId,
    params: SimulationParams,
    steps: u64,
}

impl<B: HeightfieldKernels> HeightfieldSimulation<B> {
    /// Build the grid, register the wave variable and smoothing filter, and
    /// compile both.
    ///
    /// # Arguments
    /// * `backend` - Grid backend to run on
    /// * `extent` - Grid resolution
    /// * `params` - Initial simulation parameters
    /// * `initial` - Seed texels (see `physics::seeding`)
    pub fn new(
        backend: B,
        extent: GridExtent,
        params: SimulationParams,
        initial: &[Texel],
    ) -> Result<Self, GridError> {
        let mut grid = ComputeGrid::new(backend, extent);
        let heightmap = grid.add_variable(
            HEIGHTMAP_VARIABLE,
            initial,
            B::wave_kernel(),
            &WaveUniform::new(&params, PerturbationPoint::NONE),
        )?;
        grid.set_dependencies(heightmap, &[])?;
        let smoothing = grid.add_filter("smooth", B::smoothing_kernel(), &SmoothUniform::default())?;
        grid.init()?;

        Ok(Self {
            grid,
            heightmap,
            smoothing,
            params,
            steps: 0,
        })
    }

    /// Advance one step with this frame's perturbation point.
    pub fn advance(&mut self, point: PerturbationPoint) -> Result<(), GridError> {
        self.grid
            .set_params(self.heightmap, &WaveUniform::new(&self.params, point))?;
        self.grid.compute()?;
        self.steps += 1;
        Ok(())
    }

    /// Apply `passes` 5-point smoothing passes to both height layers.
    pub fn smooth(&mut self, passes: u32) -> Result<(), GridError> {
        self.grid.apply_filter(self.smoothing, self.heightmap, passes)
    }

    /// Replace the simulation parameters, effective from the next step.
    pub fn set_params(&mut self, params: SimulationParams) {
        self.params = params;
    }

    pub fn params(&self) -> &SimulationParams {
        &self.params
    }

    /// The most recently completed heightmap.
    pub fn heightmap_texture(&self) -> &B::Texture {
        self.grid.current_texture(self.heightmap)
    }

    /// Overwrite both time layers with new seed texels.
    pub fn reseed(&mut self, texels: &[Texel]) -> Result<(), GridError> {
        self.grid.write_variable(self.heightmap, texels)?;
        self.steps = 0;
        Ok(())
    }

    pub fn extent(&self) -> GridExtent {
        self.grid.extent()
    }

    /// Steps taken since creation or the last reseed.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn grid(&self) -> &ComputeGrid<B> {
        &self.grid
    }

    pub fn backend(&self) -> &B {
        self.grid.backend()
    }

    pub fn heightmap_id(&self) -> VariableId {
        self.heightmap
    }

    pub fn grid_mut(&mut self) -> &mut ComputeGrid<B> {
        &mut self.grid
    }
}

impl HeightfieldSimulation<CpuBackend> {
    /// Copy of the current heightmap texels.
    pub fn texels(&self) -> Vec<Texel> {
        self.heightmap_texture().to_vec()
    }
}

/// Largest absolute height at t.
pub fn max_abs_height(texels: &[Texel]) -> f32 {
    texels.iter().map(|t| t[0].abs()).fold(0.0, f32::max)
}

/// Whether every height channel is finite.
pub fn all_finite(texels: &[Texel]) -> bool {
    texels.iter().all(|t| t[0].is_finite() && t[1].is_finite())
}

/// Population variance of the height at t.
pub fn height_variance(texels: &[Texel]) -> f64 {
    if texels.is_empty() {
        return 0.0;
    }
    let n = texels.len() as f64;
    let mean = texels.iter().map(|t| t[0] as f64).sum::<f64>() / n;
    texels
        .iter()
        .map(|t| {
            let d = t[0] as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n
}

/// 4-neighbour clamp-to-edge mean of channel `channel` at every texel.
fn neighbour_mean(texels: &[Texel], extent: GridExtent, channel: usize) -> Vec<f64> {
    let max_x = extent.width as i64 - 1;
    let max_y = extent.height as i64 - 1;
    let at = |x: i64, y: i64| {
        let x = x.clamp(0, max_x) as u32;
        let y = y.clamp(0, max_y) as u32;
        texels[extent.index(x, y)][channel] as f64
    };

    let mut means = Vec::with_capacity(extent.texel_count());
    for y in 0..extent.height as i64 {
        for x in 0..extent.width as i64 {
            means.push((at(x, y + 1) + at(x, y - 1) + at(x + 1, y) + at(x - 1, y)) * 0.25);
        }
    }
    means
}

/// Per-texel energy density of the damped leapfrog scheme:
/// `h² + v·p² − 2v·h·mean(p)`.
fn energy_density(texels: &[Texel], extent: GridExtent, viscosity: f32) -> Vec<f64> {
    let v = viscosity as f64;
    let prev_mean = neighbour_mean(texels, extent, 1);
    texels
        .iter()
        .zip(prev_mean)
        .map(|(t, mp)| {
            let h = t[0] as f64;
            let p = t[1] as f64;
            h * h + v * p * p - 2.0 * v * h * mp
        })
        .collect()
}

/// Discrete energy of the field.
///
/// Without perturbation it is multiplied by `viscosity` every step, so it is
/// conserved at viscosity 1 and decays otherwise.
pub fn wave_energy(texels: &[Texel], extent: GridExtent, viscosity: f32) -> f64 {
    energy_density(texels, extent, viscosity).iter().sum()
}

/// Per-texel oscillation amplitude, `sqrt(max(0, energy density))`.
pub fn wave_envelope(texels: &[Texel], extent: GridExtent, viscosity: f32) -> Vec<f32> {
    energy_density(texels, extent, viscosity)
        .into_iter()
        .map(|e| e.max(0.0).sqrt() as f32)
        .collect()
}

/// Peak of `wave_envelope`.
pub fn peak_envelope(texels: &[Texel], extent: GridExtent, viscosity: f32) -> f32 {
    wave_envelope(texels, extent, viscosity)
        .into_iter()
        .fold(0.0, f32::max)
}
