//! Initial heightmaps for the wave simulation.
//!
//! The noise seed sums octaves of 2D Perlin noise (fractal Brownian motion),
//! each octave at a higher frequency and lower amplitude than the last. Both
//! time layers start equal so the surface starts at rest.

use noise::{Fbm, MultiFractal, NoiseFn, Perlin};

use super::heightfield::texel_position;
use crate::compute::{GridExtent, Texel};

/// Fewest octaves a noise seed is summed over.
pub const MIN_OCTAVES: usize = 10;

/// Fractal noise settings for `seed_heightmap`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseSeed {
    /// Perlin permutation seed
    pub seed: u32,
    /// Octave count, raised to `MIN_OCTAVES` if lower
    pub octaves: usize,
    /// Height scale applied to the summed noise
    pub amplitude: f32,
    /// Base frequency in cycles per world unit
    pub frequency: f64,
    /// Amplitude factor between octaves, in (0, 1)
    pub persistence: f64,
    /// Frequency factor between octaves, > 1
    pub lacunarity: f64,
}

impl Default for NoiseSeed {
    fn default() -> Self {
        Self {
            seed: 7,
            octaves: MIN_OCTAVES,
            amplitude: 0.02,
            frequency: 0.5,
            persistence: 0.5,
            lacunarity: 2.0,
        }
    }
}

/// How the grid is initialised.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeedMode {
    Noise(NoiseSeed),
    Flat,
}

impl SeedMode {
    /// Build seed texels for a grid covering `bounds`.
    pub fn texels(&self, extent: GridExtent, bounds: [f32; 2]) -> Vec<Texel> {
        match self {
            SeedMode::Noise(seed) => seed_heightmap(extent, bounds, seed),
            SeedMode::Flat => flat_heightmap(extent),
        }
    }
}

/// Fractal-noise heightmap with equal t and t−1 layers.
///
/// # Arguments
/// * `extent` - Grid resolution
/// * `bounds` - World extent so that noise features keep their size across resolutions
/// * `seed` - Noise settings
pub fn seed_heightmap(extent: GridExtent, bounds: [f32; 2], seed: &NoiseSeed) -> Vec<Texel> {
    let fbm: Fbm<Perlin> = Fbm::new(seed.seed)
        .set_octaves(seed.octaves.max(MIN_OCTAVES))
        .set_frequency(seed.frequency)
        .set_persistence(seed.persistence)
        .set_lacunarity(seed.lacunarity);

    let mut texels = Vec::with_capacity(extent.texel_count());
    for y in 0..extent.height {
        for x in 0..extent.width {
            let uv = [
                (x as f32 + 0.5) / extent.width as f32,
                (y as f32 + 0.5) / extent.height as f32,
            ];
            let [px, py] = texel_position(uv, bounds);
            let height = fbm.get([px as f64, py as f64]) as f32 * seed.amplitude;
            texels.push([height, height, 0.0, 0.0]);
        }
    }
    texels
}

/// All-zero heightmap.
pub fn flat_heightmap(extent: GridExtent) -> Vec<Texel> {
    vec![[0.0; 4]; extent.texel_count()]
}
