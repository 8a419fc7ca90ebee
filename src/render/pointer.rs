//! Pointer picking against the water surface.
//!
//! Turns the latest pointer position into this frame's perturbation point by
//! casting a camera ray at a flat copy of the surface mesh. A frame without
//! pointer movement, or a ray that misses, yields `PerturbationPoint::NONE`.

use glam::{Mat4, Vec2};

use crate::physics::geometry::MeshData;
use crate::physics::heightfield::PerturbationPoint;
use crate::physics::raycast::{intersect_mesh, Ray};
use crate::render::camera::Camera;

/// Flat pick mesh for the water surface plus its model transform.
#[derive(Debug, Clone)]
pub struct SurfacePick {
    pub mesh: MeshData,
    pub transform: Mat4,
}

impl SurfacePick {
    pub fn new(mesh: MeshData, transform: Mat4) -> Self {
        Self { mesh, transform }
    }

    /// Surface-plane coordinates of the nearest hit of a world-space ray.
    pub fn pick(&self, ray: &Ray) -> Option<PerturbationPoint> {
        let local = ray.transformed(&self.transform.inverse());
        intersect_mesh(&local, &self.mesh).map(|(_, hit)| PerturbationPoint::new(hit.x, hit.y))
    }
}

/// Latest pointer sample, consumed once per frame.
#[derive(Debug, Clone, Default)]
pub struct PointerResolver {
    ndc: Option<Vec2>,
    moved: bool,
}

impl PointerResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pointer move in normalized device coordinates ([-1, 1], +Y up).
    pub fn on_pointer_move(&mut self, ndc: Vec2) {
        self.ndc = Some(ndc);
        self.moved = true;
    }

    /// Forget the pointer, e.g. when it leaves the window.
    pub fn on_pointer_leave(&mut self) {
        self.ndc = None;
        self.moved = false;
    }

    /// Whether a move is waiting for the next `resolve`.
    pub fn has_moved(&self) -> bool {
        self.moved
    }

    /// This frame's perturbation point.
    ///
    /// Clears the movement flag, so the next frame yields the sentinel unless
    /// the pointer moves again.
    pub fn resolve(&mut self, camera: &Camera, surface: &SurfacePick) -> PerturbationPoint {
        let moved = std::mem::take(&mut self.moved);
        let Some(ndc) = self.ndc.filter(|_| moved) else {
            return PerturbationPoint::NONE;
        };

        let ray = camera.ray_through(ndc.x, ndc.y);
        surface.pick(&ray).unwrap_or(PerturbationPoint::NONE)
    }
}

/// Convert a window-space cursor position into normalized device coordinates.
pub fn cursor_to_ndc(x: f64, y: f64, width: u32, height: u32) -> Vec2 {
    let width = width.max(1) as f64;
    let height = height.max(1) as f64;
    Vec2::new(
        (x / width * 2.0 - 1.0) as f32,
        (1.0 - y / height * 2.0) as f32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::geometry::PlaneMesh;
    use glam::Vec3;
    use std::f32::consts::FRAC_PI_2;

    /// Horizontal 8×8 water plane, camera looking straight down at it.
    fn setup() -> (Camera, SurfacePick) {
        let transform = Mat4::from_rotation_x(-FRAC_PI_2);
        let surface = SurfacePick::new(PlaneMesh::new(8.0, 8.0, 4, 4), transform);

        let mut camera = Camera::new(1.0);
        camera.target = Vec3::ZERO;
        camera.pitch = 1.5;
        camera.yaw = 0.0;
        camera.distance = 10.0;
        (camera, surface)
    }

    #[test]
    fn test_no_movement_yields_sentinel() {
        let (camera, surface) = setup();
        let mut pointer = PointerResolver::new();
        assert!(pointer.resolve(&camera, &surface).is_none());
    }

    #[test]
    fn test_center_hit() {
        let (camera, surface) = setup();
        let mut pointer = PointerResolver::new();
        pointer.on_pointer_move(Vec2::ZERO);
        let point = pointer.resolve(&camera, &surface);
        assert!(!point.is_none());
        assert!(point.x.abs() < 1e-3 && point.y.abs() < 1e-3, "got {:?}", point);
    }

    #[test]
    fn test_hit_is_not_reused() {
        let (camera, surface) = setup();
        let mut pointer = PointerResolver::new();
        pointer.on_pointer_move(Vec2::ZERO);
        assert!(!pointer.resolve(&camera, &surface).is_none());
        assert!(pointer.resolve(&camera, &surface).is_none());
    }

    #[test]
    fn test_miss_yields_sentinel() {
        let (camera, mut surface) = setup();
        // Slide the surface far out of view
        surface.transform = Mat4::from_translation(Vec3::new(100.0, 0.0, 0.0)) * surface.transform;
        let mut pointer = PointerResolver::new();
        pointer.on_pointer_move(Vec2::new(0.1, -0.2));
        assert!(pointer.resolve(&camera, &surface).is_none());
    }

    #[test]
    fn test_leave_clears_pointer() {
        let (camera, surface) = setup();
        let mut pointer = PointerResolver::new();
        pointer.on_pointer_move(Vec2::ZERO);
        pointer.on_pointer_leave();
        assert!(!pointer.has_moved());
        assert!(pointer.resolve(&camera, &surface).is_none());
    }

    #[test]
    fn test_cursor_to_ndc() {
        assert_eq!(cursor_to_ndc(0.0, 0.0, 200, 100), Vec2::new(-1.0, 1.0));
        assert_eq!(cursor_to_ndc(200.0, 100.0, 200, 100), Vec2::new(1.0, -1.0));
        assert_eq!(cursor_to_ndc(100.0, 50.0, 200, 100), Vec2::ZERO);
    }
}
