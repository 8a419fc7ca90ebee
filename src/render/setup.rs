//! Scene assembly from a `SceneConfig`.
//!
//! Builds the demo layout: a red floor, the water surface, a glass sphere
//! and a blue liquid inside it, lit by one directional light.

use std::f32::consts::FRAC_PI_2;
use std::sync::Arc;

use glam::{Mat4, Vec3};

use crate::config::SceneConfig;
use crate::physics::geometry::{PlaneMesh, SphereMesh};
use crate::render::camera::Camera;
use crate::render::frame::FrameContext;
use crate::render::pointer::SurfacePick;
use crate::render::scene::{
    CullSide, DirectionalLight, Material, MeshId, Scene, TransmissiveMaterial,
};

/// Glass sphere radius in world units.
pub const GLASS_RADIUS: f32 = 0.8;
/// Height of the glass centre above the floor.
pub const GLASS_ELEVATION: f32 = 0.9;
/// Height of the water surface above the floor.
pub const WATER_ELEVATION: f32 = 0.05;
/// Most quads per side of the rendered water mesh.
const MAX_WATER_SEGMENTS: u32 = 256;
/// Quads per side of the pick mesh; picking needs no displacement detail.
const PICK_SEGMENTS: u32 = 8;

/// Ids of the meshes the app manipulates after setup.
#[derive(Debug, Clone, Copy)]
pub struct SceneHandles {
    pub floor: MeshId,
    pub water: MeshId,
    pub glass: MeshId,
    pub liquid: MeshId,
}

/// Model transform of the water surface: the local XY plane laid flat.
pub fn water_transform() -> Mat4 {
    Mat4::from_translation(Vec3::new(0.0, WATER_ELEVATION, 0.0)) * Mat4::from_rotation_x(-FRAC_PI_2)
}

/// Build the scene, camera and pick geometry for `config`.
///
/// # Arguments
/// * `config` - Scene configuration
/// * `aspect` - Viewport aspect ratio (width / height)
pub fn build_frame_context(config: &SceneConfig, aspect: f32) -> (FrameContext, SceneHandles) {
    let mut scene = Scene::new(config.background());
    scene.light = DirectionalLight {
        direction: Vec3::from_array(config.render.light_direction),
        color: [1.0, 1.0, 1.0],
        intensity: config.render.light_intensity,
    };

    let floor = scene.add_mesh(
        "floor",
        Arc::new(PlaneMesh::new(10.0, 10.0, 1, 1)),
        Mat4::from_rotation_x(-FRAC_PI_2),
        Material::Standard {
            color: [1.0, 0.0, 0.0],
            roughness: 0.5,
        },
    );

    let [bounds_x, bounds_y] = config.simulation.bounds;
    let segments_x = config.simulation.width.saturating_sub(1).clamp(1, MAX_WATER_SEGMENTS);
    let segments_y = config.simulation.height.saturating_sub(1).clamp(1, MAX_WATER_SEGMENTS);
    let water = scene.add_mesh(
        "water",
        Arc::new(PlaneMesh::new(bounds_x, bounds_y, segments_x, segments_y)),
        water_transform(),
        Material::Water {
            color: [0.05, 0.25, 0.45],
        },
    );

    let glass_transform = Mat4::from_translation(Vec3::new(0.0, GLASS_ELEVATION, 0.0));
    let liquid = scene.add_mesh(
        "liquid",
        Arc::new(SphereMesh::new(GLASS_RADIUS, 2)),
        glass_transform * Mat4::from_scale(Vec3::splat(config.render.liquid_scale)),
        Material::Standard {
            color: [0.1, 0.3, 0.9],
            roughness: 0.3,
        },
    );
    let glass = scene.add_mesh(
        "glass",
        Arc::new(SphereMesh::new(GLASS_RADIUS, 3)),
        glass_transform,
        Material::Transmissive(TransmissiveMaterial::new(
            config.transmission_params(),
            config.transmission_settings(),
            CullSide::Front,
        )),
    );

    let surface = SurfacePick::new(
        PlaneMesh::new(bounds_x, bounds_y, PICK_SEGMENTS, PICK_SEGMENTS),
        water_transform(),
    );

    let context = FrameContext {
        scene,
        camera: Camera::new(aspect),
        surface,
        transmissive: vec![glass],
    };
    let handles = SceneHandles {
        floor,
        water,
        glass,
        liquid,
    };
    (context, handles)
}

/// Push the transmission values of `config` into the glass material.
pub fn apply_transmission(context: &mut FrameContext, handles: &SceneHandles, config: &SceneConfig) {
    if let Some(material) = context.scene.transmissive_mut(handles.glass) {
        material.params = config.transmission_params();
        material.settings = config.transmission_settings();
    }
}
