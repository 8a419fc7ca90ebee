//! Ray casting against triangle meshes.

use glam::{Mat4, Vec3};

use super::geometry::MeshData;

/// A half-line with normalized direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize_or_zero(),
        }
    }

    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Express the ray in the space `transform` maps from.
    ///
    /// The direction is not renormalized, so hit distances stay comparable
    /// with world-space distances along the original ray.
    pub fn transformed(&self, transform: &Mat4) -> Self {
        Self {
            origin: transform.transform_point3(self.origin),
            direction: transform.transform_vector3(self.direction),
        }
    }
}

/// Distance along `ray` to triangle (a, b, c), hitting either face.
///
/// Möller–Trumbore; parallel rays and hits behind the origin miss.
pub fn intersect_triangle(ray: &Ray, a: Vec3, b: Vec3, c: Vec3) -> Option<f32> {
    const EPSILON: f32 = 1e-7;

    let edge1 = b - a;
    let edge2 = c - a;
    let p = ray.direction.cross(edge2);
    let det = edge1.dot(p);
    if det.abs() < EPSILON {
        return None;
    }

    let inv_det = 1.0 / det;
    let s = ray.origin - a;
    let u = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(edge1);
    let v = ray.direction.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = edge2.dot(q) * inv_det;
    (t > EPSILON).then_some(t)
}

/// Nearest hit of `ray` against every triangle of `mesh`.
///
/// Returns the ray parameter and the local-space hit point.
pub fn intersect_mesh(ray: &Ray, mesh: &MeshData) -> Option<(f32, Vec3)> {
    mesh.triangles()
        .filter_map(|[a, b, c]| intersect_triangle(ray, a, b, c))
        .min_by(|x, y| x.total_cmp(y))
        .map(|t| (t, ray.at(t)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::geometry::PlaneMesh;

    #[test]
    fn test_hits_triangle_front_and_back() {
        let (a, b, c) = (Vec3::ZERO, Vec3::X, Vec3::Y);
        let down = Ray::new(Vec3::new(0.25, 0.25, 1.0), -Vec3::Z);
        let up = Ray::new(Vec3::new(0.25, 0.25, -1.0), Vec3::Z);
        assert!((intersect_triangle(&down, a, b, c).unwrap() - 1.0).abs() < 1e-6);
        assert!((intersect_triangle(&up, a, b, c).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_misses_outside_and_behind() {
        let (a, b, c) = (Vec3::ZERO, Vec3::X, Vec3::Y);
        let outside = Ray::new(Vec3::new(0.8, 0.8, 1.0), -Vec3::Z);
        let behind = Ray::new(Vec3::new(0.25, 0.25, 1.0), Vec3::Z);
        let parallel = Ray::new(Vec3::new(0.25, 0.25, 1.0), Vec3::X);
        assert!(intersect_triangle(&outside, a, b, c).is_none());
        assert!(intersect_triangle(&behind, a, b, c).is_none());
        assert!(intersect_triangle(&parallel, a, b, c).is_none());
    }

    #[test]
    fn test_mesh_hit_point() {
        let plane = PlaneMesh::new(4.0, 2.0, 8, 4);
        let ray = Ray::new(Vec3::new(1.3, -0.7, 5.0), -Vec3::Z);
        let (t, point) = intersect_mesh(&ray, &plane).unwrap();
        assert!((t - 5.0).abs() < 1e-5);
        assert!((point - Vec3::new(1.3, -0.7, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_mesh_miss() {
        let plane = PlaneMesh::new(4.0, 2.0, 2, 2);
        let ray = Ray::new(Vec3::new(3.0, 0.0, 5.0), -Vec3::Z);
        assert!(intersect_mesh(&ray, &plane).is_none());
    }

    #[test]
    fn test_transformed_ray_keeps_distance() {
        let transform = Mat4::from_translation(Vec3::new(0.0, 0.0, -2.0));
        let ray = Ray::new(Vec3::new(0.0, 0.0, 5.0), -Vec3::Z).transformed(&transform);
        assert_eq!(ray.origin, Vec3::new(0.0, 0.0, 3.0));
        assert_eq!(ray.direction, -Vec3::Z);
    }
}
