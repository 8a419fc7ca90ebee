//! Configuration module for the water and glass scene.
//!
//! Parameters are grouped the way they are consumed:
//! - `simulation`: heightfield grid, wave parameters and initial seed
//! - `transmission`: glass material and capture settings
//! - `render`: tone mapping, background and lighting
//!
//! Every field has a default, so a config file only needs the values it changes.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::compute::GridExtent;
use crate::physics::heightfield::SimulationParams;
use crate::physics::seeding::{NoiseSeed, SeedMode};
use crate::render::scene::{Background, ToneMapping, TransmissionParams, TransmissionSettings};

/// How the heightmap is initialised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedModeConfig {
    #[default]
    Noise,
    Flat,
}

/// Heightfield simulation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Grid width in texels
    pub width: u32,

    /// Grid height in texels
    pub height: u32,

    /// World extent of the water surface (x, y)
    pub bounds: [f32; 2],

    /// Radius of the pointer bump in world units
    pub mouse_size: f32,

    /// Per-step damping factor in [0, 1]
    pub viscosity: f32,

    /// Peak height added by the pointer bump
    pub wave_height: f32,

    /// Noise seed
    pub seed: u32,

    /// Noise octaves (at least 10 are used)
    pub octaves: usize,

    /// Height scale of the noise seed
    pub noise_amplitude: f32,

    /// Passes applied by the smoothing action
    pub smoothing_passes: u32,

    pub seed_mode: SeedModeConfig,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        let params = SimulationParams::default();
        let noise = NoiseSeed::default();
        Self {
            width: 128,
            height: 128,
            bounds: params.bounds,
            mouse_size: params.mouse_size,
            viscosity: params.viscosity,
            wave_height: params.wave_height,
            seed: noise.seed,
            octaves: noise.octaves,
            noise_amplitude: noise.amplitude,
            smoothing_passes: 10,
            seed_mode: SeedModeConfig::Noise,
        }
    }
}

/// Glass material and capture settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransmissionConfig {
    /// Render back faces into a second capture first
    pub backside: bool,

    pub thickness: f32,

    pub backside_thickness: f32,

    pub ior: f32,

    pub roughness: f32,

    pub chromatic_aberration: f32,

    pub distortion: f32,

    pub temporal_distortion: f32,

    pub anisotropic_blur: f32,

    pub reflectivity: f32,

    /// Tint (linear RGB)
    pub color: [f32; 3],

    pub attenuation_color: [f32; 3],

    /// Beer-law distance; 0 disables attenuation
    pub attenuation_distance: f32,

    /// Background color installed while capturing
    pub custom_background: Option<[f32; 3]>,

    /// Capture buffer size relative to the viewport
    #[serde(default = "default_capture_scale")]
    pub capture_scale: f32,
}

fn default_capture_scale() -> f32 {
    0.5
}

impl Default for TransmissionConfig {
    fn default() -> Self {
        let params = TransmissionParams::default();
        let settings = TransmissionSettings::default();
        Self {
            backside: settings.backside,
            thickness: settings.thickness,
            backside_thickness: settings.backside_thickness,
            ior: params.ior,
            roughness: params.roughness,
            chromatic_aberration: params.chromatic_aberration,
            distortion: params.distortion,
            temporal_distortion: params.temporal_distortion,
            anisotropic_blur: params.anisotropic_blur,
            reflectivity: params.reflectivity,
            color: params.color,
            attenuation_color: params.attenuation_color,
            attenuation_distance: params.attenuation_distance,
            custom_background: None,
            capture_scale: default_capture_scale(),
        }
    }
}

/// Output and lighting settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub tone_mapping: ToneMapping,

    /// Clear to zero alpha instead of `background_color`
    pub transparent_background: bool,

    pub background_color: [f32; 3],

    /// Direction the light travels
    pub light_direction: [f32; 3],

    pub light_intensity: f32,

    /// Size of the liquid inside the glass, relative to the glass radius
    #[serde(default = "default_liquid_scale")]
    pub liquid_scale: f32,
}

fn default_liquid_scale() -> f32 {
    0.6
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            tone_mapping: ToneMapping::AcesFilmic,
            transparent_background: true,
            background_color: [0.05, 0.06, 0.08],
            light_direction: [-0.3, -1.0, -0.2],
            light_intensity: 1.0,
            liquid_scale: default_liquid_scale(),
        }
    }
}

/// Complete scene configuration combining all parameter groups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub simulation: SimulationSettings,

    pub transmission: TransmissionConfig,

    pub render: RenderConfig,
}

impl SceneConfig {
    /// Load configuration from a JSON file.
    ///
    /// # Arguments
    /// * `path` - Path to the JSON configuration file
    ///
    /// # Returns
    /// * `Ok(SceneConfig)` - Parsed and validated configuration
    /// * `Err` - If the file cannot be read, parsed or fails validation
    // put id:'cfg_from_file', label:'Parse JSON config', input:'config.json', output:'final_config.internal'
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file.
    ///
    /// # Arguments
    /// * `path` - Path to write the JSON configuration file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), contents).map_err(|source| ConfigError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        })
    }

    /// Reject values the simulation cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sim = &self.simulation;
        if sim.width == 0 || sim.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "grid size {}x{} must be non-zero",
                sim.width, sim.height
            )));
        }
        if !(0.0..=1.0).contains(&sim.viscosity) {
            return Err(ConfigError::Invalid(format!(
                "viscosity {} is outside [0, 1]",
                sim.viscosity
            )));
        }
        if sim.mouse_size <= 0.0 || !sim.mouse_size.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "mouse_size {} must be positive",
                sim.mouse_size
            )));
        }
        if sim.bounds.iter().any(|b| *b <= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "bounds {:?} must be positive",
                sim.bounds
            )));
        }
        if self.transmission.capture_scale <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "capture_scale {} must be positive",
                self.transmission.capture_scale
            )));
        }
        Ok(())
    }

    pub fn grid_extent(&self) -> GridExtent {
        GridExtent::new(self.simulation.width, self.simulation.height)
    }

    pub fn simulation_params(&self) -> SimulationParams {
        SimulationParams {
            mouse_size: self.simulation.mouse_size,
            viscosity: self.simulation.viscosity,
            wave_height: self.simulation.wave_height,
            bounds: self.simulation.bounds,
        }
    }

    pub fn seed_mode(&self) -> SeedMode {
        match self.simulation.seed_mode {
            SeedModeConfig::Flat => SeedMode::Flat,
            SeedModeConfig::Noise => SeedMode::Noise(NoiseSeed {
                seed: self.simulation.seed,
                octaves: self.simulation.octaves,
                amplitude: self.simulation.noise_amplitude,
                ..NoiseSeed::default()
            }),
        }
    }

    pub fn transmission_params(&self) -> TransmissionParams {
        let t = &self.transmission;
        TransmissionParams {
            ior: t.ior,
            roughness: t.roughness,
            chromatic_aberration: t.chromatic_aberration,
            distortion: t.distortion,
            temporal_distortion: t.temporal_distortion,
            anisotropic_blur: t.anisotropic_blur,
            reflectivity: t.reflectivity,
            color: t.color,
            attenuation_color: t.attenuation_color,
            attenuation_distance: t.attenuation_distance,
        }
    }

    pub fn transmission_settings(&self) -> TransmissionSettings {
        TransmissionSettings {
            backside: self.transmission.backside,
            thickness: self.transmission.thickness,
            backside_thickness: self.transmission.backside_thickness,
            custom_background: self.transmission.custom_background.map(Background::Color),
        }
    }

    pub fn background(&self) -> Background {
        if self.render.transparent_background {
            Background::Transparent
        } else {
            Background::Color(self.render.background_color)
        }
    }
}

/// Error types for configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read/write config file '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
