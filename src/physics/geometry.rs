//! Mesh generation for the scene
//!
//! Produces the two primitive shapes the scene is built from:
//! - `PlaneMesh`: a subdivided rectangle in the local XY plane, used for the
//!   floor, the water surface and its pick mesh
//! - `SphereMesh`: a UV sphere, used for the glass object and the liquid inside it

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use std::f32::consts::PI;

/// Vertex data for GPU rendering
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct Vertex {
    /// Position in mesh-local space
    pub position: [f32; 3],
    /// Surface normal (normalized)
    pub normal: [f32; 3],
    /// Texture coordinates; on planes these address the heightmap
    pub uv: [f32; 2],
}

impl Vertex {
    /// Create a new vertex with position, normal, and UV coordinates
    pub fn new(position: Vec3, normal: Vec3, uv: [f32; 2]) -> Self {
        Self {
            position: position.to_array(),
            normal: normal.normalize().to_array(),
            uv,
        }
    }

    /// Returns the vertex buffer layout for wgpu
    pub fn buffer_layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                // Position
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                // Normal
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x3,
                },
                // UV
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 6]>() as wgpu::BufferAddress,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32x2,
                },
            ],
        }
    }
}

/// Indexed triangle mesh.
#[derive(Debug, Clone)]
pub struct MeshData {
    /// Vertex data for the mesh
    pub vertices: Vec<Vertex>,
    /// Triangle indices (3 per triangle)
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Get the number of triangles in the mesh
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Get the number of vertices in the mesh
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Iterate triangles as local-space corner positions
    pub fn triangles(&self) -> impl Iterator<Item = [Vec3; 3]> + '_ {
        self.indices.chunks_exact(3).map(|tri| {
            [
                Vec3::from_array(self.vertices[tri[0] as usize].position),
                Vec3::from_array(self.vertices[tri[1] as usize].position),
                Vec3::from_array(self.vertices[tri[2] as usize].position),
            ]
        })
    }

    /// Get vertex data as bytes for GPU buffer creation
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Get index data as bytes for GPU buffer creation
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

/// Rectangle in the local XY plane, centred on the origin, facing +Z.
pub struct PlaneMesh;

impl PlaneMesh {
    /// Create a plane of `width` × `height` world units split into
    /// `segments_x` × `segments_y` quads.
    ///
    /// UVs run from (0, 0) at (−w/2, −h/2) to (1, 1) at (w/2, h/2), matching
    /// the heightmap's texel layout.
    pub fn new(width: f32, height: f32, segments_x: u32, segments_y: u32) -> MeshData {
        let segments_x = segments_x.max(1);
        let segments_y = segments_y.max(1);
        let mut vertices = Vec::with_capacity(((segments_x + 1) * (segments_y + 1)) as usize);
        let mut indices = Vec::with_capacity((segments_x * segments_y * 6) as usize);

        for j in 0..=segments_y {
            let v = j as f32 / segments_y as f32;
            for i in 0..=segments_x {
                let u = i as f32 / segments_x as f32;
                let position = Vec3::new((u - 0.5) * width, (v - 0.5) * height, 0.0);
                vertices.push(Vertex::new(position, Vec3::Z, [u, v]));
            }
        }

        let row = segments_x + 1;
        for j in 0..segments_y {
            for i in 0..segments_x {
                let a = j * row + i;
                let b = a + 1;
                let c = a + row;
                let d = c + 1;
                // Counter-clockwise seen from +Z
                indices.extend_from_slice(&[a, b, d, a, d, c]);
            }
        }

        MeshData { vertices, indices }
    }
}

/// UV sphere centred on the origin.
pub struct SphereMesh;

impl SphereMesh {
    /// Create a new UV sphere mesh
    ///
    /// # Arguments
    /// * `radius` - Radius of the sphere
    /// * `subdivision_level` - Controls resolution: segments = 16 * 2^level
    ///   * 0: 16 segments
    ///   * 1: 32 segments
    ///   * 2: 64 segments
    pub fn new(radius: f32, subdivision_level: u32) -> MeshData {
        let segments = 16 * (1 << subdivision_level);
        Self::generate_uv_sphere(radius, segments, segments / 2)
    }

    /// Generate a UV sphere mesh (latitude/longitude grid)
    fn generate_uv_sphere(radius: f32, lon_segments: u32, lat_segments: u32) -> MeshData {
        let mut vertices = Vec::new();
        let mut indices = Vec::new();

        for lat in 0..=lat_segments {
            let theta = (lat as f32 / lat_segments as f32) * PI; // 0 to PI (top to bottom)
            let sin_theta = theta.sin();
            let cos_theta = theta.cos();

            for lon in 0..=lon_segments {
                let phi = (lon as f32 / lon_segments as f32) * 2.0 * PI;
                let x = sin_theta * phi.cos();
                let y = cos_theta;
                let z = sin_theta * phi.sin();

                let normal = Vec3::new(x, y, z);
                let uv = [lon as f32 / lon_segments as f32, lat as f32 / lat_segments as f32];
                vertices.push(Vertex::new(normal * radius, normal, uv));
            }
        }

        for lat in 0..lat_segments {
            for lon in 0..lon_segments {
                let current = lat * (lon_segments + 1) + lon;
                let next = current + lon_segments + 1;

                // Skip degenerate triangles at the poles
                if lat != 0 {
                    indices.extend_from_slice(&[current, current + 1, next]);
                }
                if lat != lat_segments - 1 {
                    indices.extend_from_slice(&[current + 1, next + 1, next]);
                }
            }
        }

        MeshData { vertices, indices }
    }
}
