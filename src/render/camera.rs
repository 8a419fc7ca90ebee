//! Perspective orbit camera around the glass
//!
//! Spherical coordinates (yaw, pitch, distance) around a target point. Pitch
//! stays above the water plane so the camera never dips under the surface.

use std::f32::consts::{FRAC_PI_2, FRAC_PI_4};

use glam::{Mat4, Vec3, Vec4};

use crate::physics::raycast::Ray;

/// Closest and farthest orbit distance.
pub const MIN_DISTANCE: f32 = 2.0;
pub const MAX_DISTANCE: f32 = 60.0;

/// Pitch range in radians; the upper bound stops short of the pole.
pub const MIN_PITCH: f32 = 0.05;
pub const MAX_PITCH: f32 = FRAC_PI_2 - 0.05;

/// Radians of orbit per pixel of drag.
const ORBIT_SPEED: f32 = 0.005;
/// Fraction of the distance covered per wheel line.
const ZOOM_STEP: f32 = 0.1;

// put id:'cpu_camera_state', label:'Camera view-projection', input:'loop_iteration.internal', output:'uniform_buffers_gpu.internal'
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub target: Vec3,
    pub distance: f32,
    /// Rotation about +Y, radians
    pub yaw: f32,
    /// Elevation above the XZ plane, radians
    pub pitch: f32,
    /// Vertical field of view, radians
    pub fov: f32,
    /// Width / height
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    /// Camera looking down at the glass from the front-right.
    pub fn new(aspect: f32) -> Self {
        Self {
            target: Vec3::new(0.0, 0.5, 0.0),
            distance: 12.0,
            yaw: -FRAC_PI_4,
            pitch: 0.6,
            fov: 45f32.to_radians(),
            aspect,
            near: 0.1,
            far: 200.0,
        }
    }

    /// Unit vector from the target towards the eye.
    fn offset_direction(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        Vec3::new(cos_pitch * sin_yaw, sin_pitch, cos_pitch * cos_yaw)
    }

    /// Eye position in world space.
    pub fn position(&self) -> Vec3 {
        self.target + self.offset_direction() * self.distance
    }

    /// Orbit by a drag of `(dx, dy)` pixels. Dragging down raises the eye.
    pub fn orbit(&mut self, dx: f32, dy: f32) {
        self.yaw = (self.yaw + dx * ORBIT_SPEED).rem_euclid(std::f32::consts::TAU);
        self.pitch = (self.pitch + dy * ORBIT_SPEED).clamp(MIN_PITCH, MAX_PITCH);
    }

    /// Move towards (positive `lines`) or away from the target.
    pub fn zoom(&mut self, lines: f32) {
        let factor = (1.0 - lines * ZOOM_STEP).max(0.1);
        self.distance = (self.distance * factor).clamp(MIN_DISTANCE, MAX_DISTANCE);
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        if aspect.is_finite() && aspect > 0.0 {
            self.aspect = aspect;
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position(), self.target, Vec3::Y)
    }

    /// Perspective projection with wgpu's [0, 1] depth range.
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov, self.aspect, self.near, self.far)
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// World-space ray from the camera through a point in normalized device
    /// coordinates (x right, y up, both in [-1, 1]).
    ///
    /// Unprojects the point on the near and far planes through the inverse
    /// view-projection.
    pub fn ray_through(&self, ndc_x: f32, ndc_y: f32) -> Ray {
        let inverse = self.view_projection_matrix().inverse();
        let unproject = |depth: f32| {
            let clip = inverse * Vec4::new(ndc_x, ndc_y, depth, 1.0);
            clip.truncate() / clip.w
        };
        let near = unproject(0.0);
        let far = unproject(1.0);
        Ray::new(near, far - near)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eye_sits_above_target_at_distance() {
        let camera = Camera::new(16.0 / 9.0);
        let eye = camera.position();
        assert!(((eye - camera.target).length() - camera.distance).abs() < 1e-4);
        assert!(eye.y > camera.target.y);
    }

    #[test]
    fn test_center_ray_points_at_target() {
        let camera = Camera::new(16.0 / 9.0);
        let ray = camera.ray_through(0.0, 0.0);
        let to_target = (camera.target - camera.position()).normalize();
        assert!(ray.direction.dot(to_target) > 0.9999);
        // The ray starts on the near plane, in front of the eye
        let offset = (ray.origin - camera.position()).length();
        assert!((offset - camera.near).abs() < 0.01);
    }

    #[test]
    fn test_edge_rays_span_horizontal_fov() {
        let camera = Camera::new(1.0);
        let left = camera.ray_through(-1.0, 0.0);
        let right = camera.ray_through(1.0, 0.0);
        let angle = left.direction.angle_between(right.direction);
        assert!((angle - camera.fov).abs() < 0.01);
    }

    #[test]
    fn test_ray_y_follows_ndc_up() {
        let camera = Camera::new(1.0);
        let up = camera.ray_through(0.0, 0.5);
        let down = camera.ray_through(0.0, -0.5);
        assert!(up.direction.y > down.direction.y);
    }

    #[test]
    fn test_orbit_keeps_distance_and_wraps_yaw() {
        let mut camera = Camera::new(1.0);
        for _ in 0..400 {
            camera.orbit(10.0, 0.0);
        }
        assert!((0.0..std::f32::consts::TAU).contains(&camera.yaw));
        assert!(((camera.position() - camera.target).length() - camera.distance).abs() < 1e-3);
    }

    #[test]
    fn test_pitch_stays_above_water() {
        let mut camera = Camera::new(1.0);
        camera.orbit(0.0, -10_000.0);
        assert_eq!(camera.pitch, MIN_PITCH);
        assert!(camera.position().y > camera.target.y);

        camera.orbit(0.0, 10_000.0);
        assert_eq!(camera.pitch, MAX_PITCH);
    }

    #[test]
    fn test_zoom_is_bounded() {
        let mut camera = Camera::new(1.0);
        let start = camera.distance;
        camera.zoom(1.0);
        assert!(camera.distance < start);

        for _ in 0..100 {
            camera.zoom(5.0);
        }
        assert_eq!(camera.distance, MIN_DISTANCE);
        for _ in 0..100 {
            camera.zoom(-5.0);
        }
        assert_eq!(camera.distance, MAX_DISTANCE);
    }

    #[test]
    fn test_set_aspect_ignores_degenerate_values() {
        let mut camera = Camera::new(1.0);
        camera.set_aspect(2.0);
        assert_eq!(camera.aspect, 2.0);
        camera.set_aspect(0.0);
        camera.set_aspect(f32::NAN);
        assert_eq!(camera.aspect, 2.0);
    }

    #[test]
    fn test_view_projection_maps_target_inside_clip() {
        let camera = Camera::new(4.0 / 3.0);
        let clip = camera.view_projection_matrix() * camera.target.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4);
        assert!((0.0..=1.0).contains(&ndc.z));
    }
}
