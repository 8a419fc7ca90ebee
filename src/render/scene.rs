//! Scene description shared by the compositor and the renderers.
//!
//! The scene owns meshes, their materials and the global render state the
//! compositor snapshots (background, light, elapsed time). Transmissive meshes
//! carry a `TransmissiveMeshState` that only the compositor mutates; the
//! renderer reads it to decide how each mesh is drawn into the bound target.

use std::sync::Arc;

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::physics::geometry::MeshData;

/// Handle to a mesh in a `Scene`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshId(usize);

impl MeshId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Output transform applied in the scene shaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneMapping {
    None,
    #[default]
    AcesFilmic,
}

/// What the render target is cleared to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Background {
    /// Cleared to zero alpha
    Transparent,
    /// Opaque linear RGB
    Color([f32; 3]),
}

impl Background {
    /// Clear color for a render pass.
    pub fn clear_color(&self) -> wgpu::Color {
        match self {
            Background::Transparent => wgpu::Color::TRANSPARENT,
            Background::Color([r, g, b]) => wgpu::Color {
                r: *r as f64,
                g: *g as f64,
                b: *b as f64,
                a: 1.0,
            },
        }
    }
}

/// Which faces of a mesh are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CullSide {
    /// Front faces only
    #[default]
    Front,
    /// Back faces only
    Back,
    /// Both faces
    Double,
}

impl CullSide {
    /// Faces culled by the rasterizer for this side.
    pub fn cull_mode(self) -> Option<wgpu::Face> {
        match self {
            CullSide::Front => Some(wgpu::Face::Back),
            CullSide::Back => Some(wgpu::Face::Front),
            CullSide::Double => None,
        }
    }
}

/// One of the two offscreen capture buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureSlot {
    Main,
    Back,
}

/// Where draws go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderTarget {
    /// The final frame
    #[default]
    Screen,
    /// An offscreen capture buffer
    Capture(CaptureSlot),
}

/// Look of a transmissive (glass-like) material.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransmissionParams {
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
}

impl Default for TransmissionParams {
    fn default() -> Self {
        Self {
            ior: 1.5,
            roughness: 0.0,
            chromatic_aberration: 0.05,
            distortion: 0.0,
            temporal_distortion: 0.0,
            anisotropic_blur: 0.1,
            reflectivity: 0.04,
            color: [1.0, 1.0, 1.0],
            attenuation_color: [1.0, 1.0, 1.0],
            attenuation_distance: 0.0,
        }
    }
}

/// Per-mesh compositor configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransmissionSettings {
    /// Capture the back faces first and refract through them
    pub backside: bool,
    /// Thickness used with the main capture
    pub thickness: f32,
    /// Thickness used with the back capture
    pub backside_thickness: f32,
    /// Background installed while capturing, if any
    pub custom_background: Option<Background>,
}

impl Default for TransmissionSettings {
    fn default() -> Self {
        Self {
            backside: false,
            thickness: 2.0,
            backside_thickness: 0.5,
            custom_background: None,
        }
    }
}

/// Material a transmissive mesh is currently drawn with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveMaterial {
    /// Refracts the bound source capture
    Transmission,
    /// Writes depth only
    Discard,
}

/// Mutable per-frame record of a transmissive mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransmissiveMeshState {
    pub active: ActiveMaterial,
    pub source: CaptureSlot,
    pub thickness: f32,
    pub side: CullSide,
    pub enabled: bool,
}

impl TransmissiveMeshState {
    /// The between-frames configuration: transmission sampling `main`.
    pub fn steady(settings: &TransmissionSettings, side: CullSide) -> Self {
        Self {
            active: ActiveMaterial::Transmission,
            source: CaptureSlot::Main,
            thickness: settings.thickness,
            side,
            enabled: true,
        }
    }

    /// Whether the mesh must be drawn with the depth-only stand-in into
    /// `target`: either the compositor swapped it out, or its source is the
    /// bound target itself.
    pub fn draws_as_discard(&self, target: RenderTarget) -> bool {
        self.active == ActiveMaterial::Discard || target == RenderTarget::Capture(self.source)
    }
}

/// Glass material with its compositor state.
#[derive(Debug, Clone, PartialEq)]
pub struct TransmissiveMaterial {
    pub params: TransmissionParams,
    pub settings: TransmissionSettings,
    /// Configured culling side, restored after every pass
    pub side: CullSide,
    state: TransmissiveMeshState,
}

impl TransmissiveMaterial {
    pub fn new(params: TransmissionParams, settings: TransmissionSettings, side: CullSide) -> Self {
        Self {
            params,
            settings,
            side,
            state: TransmissiveMeshState::steady(&settings, side),
        }
    }

    pub fn state(&self) -> &TransmissiveMeshState {
        &self.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut TransmissiveMeshState {
        &mut self.state
    }
}

/// Surface appearance of a mesh.
#[derive(Debug, Clone, PartialEq)]
pub enum Material {
    /// Lit opaque surface
    Standard { color: [f32; 3], roughness: f32 },
    /// Heightmap-displaced water surface
    Water { color: [f32; 3] },
    /// Glass fed by the capture buffers
    Transmissive(TransmissiveMaterial),
}

/// A mesh instance placed in the scene.
#[derive(Debug, Clone)]
pub struct SceneMesh {
    pub name: String,
    pub mesh: Arc<MeshData>,
    pub transform: Mat4,
    pub material: Material,
    pub visible: bool,
}

/// Directional light.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    /// Direction the light travels (normalized on use)
    pub direction: Vec3,
    pub color: [f32; 3],
    pub intensity: f32,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vec3::new(-0.3, -1.0, -0.2),
            color: [1.0, 1.0, 1.0],
            intensity: 1.0,
        }
    }
}

/// Everything drawn in a frame.
#[derive(Debug, Clone)]
pub struct Scene {
    meshes: Vec<SceneMesh>,
    pub background: Background,
    pub light: DirectionalLight,
    /// Seconds since start, drives temporal distortion
    pub time: f32,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new(Background::Transparent)
    }
}

impl Scene {
    pub fn new(background: Background) -> Self {
        Self {
            meshes: Vec::new(),
            background,
            light: DirectionalLight::default(),
            time: 0.0,
        }
    }

    /// Add a visible mesh.
    pub fn add_mesh(
        &mut self,
        name: impl Into<String>,
        mesh: Arc<MeshData>,
        transform: Mat4,
        material: Material,
    ) -> MeshId {
        let id = MeshId(self.meshes.len());
        self.meshes.push(SceneMesh {
            name: name.into(),
            mesh,
            transform,
            material,
            visible: true,
        });
        id
    }

    pub fn mesh(&self, id: MeshId) -> Option<&SceneMesh> {
        self.meshes.get(id.0)
    }

    pub fn mesh_mut(&mut self, id: MeshId) -> Option<&mut SceneMesh> {
        self.meshes.get_mut(id.0)
    }

    /// All meshes with their ids, in insertion order.
    pub fn meshes(&self) -> impl Iterator<Item = (MeshId, &SceneMesh)> {
        self.meshes.iter().enumerate().map(|(i, m)| (MeshId(i), m))
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<MeshId> {
        self.meshes.iter().position(|m| m.name == name).map(MeshId)
    }

    /// Ids of every mesh with a transmissive material.
    pub fn transmissive_meshes(&self) -> Vec<MeshId> {
        self.meshes()
            .filter(|(_, m)| matches!(m.material, Material::Transmissive(_)))
            .map(|(id, _)| id)
            .collect()
    }

    pub fn transmissive(&self, id: MeshId) -> Option<&TransmissiveMaterial> {
        match self.mesh(id).map(|m| &m.material) {
            Some(Material::Transmissive(material)) => Some(material),
            _ => None,
        }
    }

    pub fn transmissive_mut(&mut self, id: MeshId) -> Option<&mut TransmissiveMaterial> {
        match self.mesh_mut(id).map(|m| &mut m.material) {
            Some(Material::Transmissive(material)) => Some(material),
            _ => None,
        }
    }

    pub fn set_visible(&mut self, id: MeshId, visible: bool) {
        if let Some(mesh) = self.mesh_mut(id) {
            mesh.visible = visible;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::geometry::SphereMesh;

    fn glass() -> Material {
        Material::Transmissive(TransmissiveMaterial::new(
            TransmissionParams::default(),
            TransmissionSettings::default(),
            CullSide::Front,
        ))
    }

    #[test]
    fn test_steady_state_samples_main() {
        let material = TransmissiveMaterial::new(
            TransmissionParams::default(),
            TransmissionSettings {
                thickness: 1.25,
                ..Default::default()
            },
            CullSide::Double,
        );
        let state = material.state();
        assert_eq!(state.active, ActiveMaterial::Transmission);
        assert_eq!(state.source, CaptureSlot::Main);
        assert_eq!(state.side, CullSide::Double);
        assert_eq!(state.thickness, 1.25);
    }

    #[test]
    fn test_discard_when_sampling_bound_target() {
        let mut state = TransmissiveMeshState::steady(&TransmissionSettings::default(), CullSide::Front);
        assert!(state.draws_as_discard(RenderTarget::Capture(CaptureSlot::Main)));
        assert!(!state.draws_as_discard(RenderTarget::Capture(CaptureSlot::Back)));
        assert!(!state.draws_as_discard(RenderTarget::Screen));

        state.active = ActiveMaterial::Discard;
        assert!(state.draws_as_discard(RenderTarget::Screen));
    }

    #[test]
    fn test_cull_modes() {
        assert_eq!(CullSide::Front.cull_mode(), Some(wgpu::Face::Back));
        assert_eq!(CullSide::Back.cull_mode(), Some(wgpu::Face::Front));
        assert_eq!(CullSide::Double.cull_mode(), None);
    }

    #[test]
    fn test_transmissive_lookup() {
        let mut scene = Scene::default();
        let sphere = Arc::new(SphereMesh::new(1.0, 0));
        let floor = scene.add_mesh(
            "floor",
            sphere.clone(),
            Mat4::IDENTITY,
            Material::Standard {
                color: [1.0, 0.0, 0.0],
                roughness: 0.5,
            },
        );
        let bottle = scene.add_mesh("bottle", sphere, Mat4::IDENTITY, glass());

        assert_eq!(scene.transmissive_meshes(), vec![bottle]);
        assert!(scene.transmissive(floor).is_none());
        assert!(scene.transmissive(bottle).is_some());
        assert_eq!(scene.find("bottle"), Some(bottle));
    }

    #[test]
    fn test_background_clear_color() {
        assert_eq!(Background::Transparent.clear_color().a, 0.0);
        let color = Background::Color([0.5, 0.25, 1.0]).clear_color();
        assert_eq!((color.r, color.g, color.b, color.a), (0.5, 0.25, 1.0, 1.0));
    }
}
