//! Triangle meshes handed to the renderer by the asset provider.

use crate::geometry::Sphere;
use bytemuck::{Pod, Zeroable};
use nalgebra::{Point3, Vector3};

/// Identifier for a mesh known to the asset provider.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MeshID(pub u32);

/// A vertex as laid out in the vertex buffers.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Zeroable, Pod)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
    pub normal: [f32; 3],
    /// Tangent along the `u` texture direction, with the handedness of the
    /// bitangent in `w`.
    pub tangent: [f32; 4],
}

/// Vertices and triangle indices of a mesh.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    vertices: Vec<MeshVertex>,
    indices: Vec<u32>,
}

impl MeshVertex {
    pub const ATTRIBUTES: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
        0 => Float32x3,
        1 => Float32x2,
        2 => Float32x3,
        3 => Float32x4,
    ];

    /// Returns the vertex buffer layout matching the shader locations 0 to 3.
    pub const fn buffer_layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

impl MeshData {
    /// Creates a mesh from the given vertices and indices.
    ///
    /// # Panics
    /// If an index refers to a non-existent vertex.
    pub fn new(vertices: Vec<MeshVertex>, indices: Vec<u32>) -> Self {
        assert!(
            indices.iter().all(|&idx| (idx as usize) < vertices.len()),
            "Mesh index out of bounds"
        );
        Self { vertices, indices }
    }

    /// Creates a mesh representing a box with the given extents, centered at
    /// the origin and with its faces facing outward.
    ///
    /// # Panics
    /// If any of the given extents are negative.
    pub fn create_box(extent_x: f32, extent_y: f32, extent_z: f32) -> Self {
        assert!(
            extent_x >= 0.0 && extent_y >= 0.0 && extent_z >= 0.0,
            "Tried to create box mesh with negative extent"
        );
        let half_extents = Vector3::new(extent_x, extent_y, extent_z) * 0.5;

        let x = Vector3::x();
        let y = Vector3::y();
        let z = Vector3::z();

        // (normal, u, v) with u × v = normal so each face winds
        // counter-clockwise seen from outside
        let faces = [
            (x, -z, y),
            (-x, z, y),
            (y, x, -z),
            (-y, x, z),
            (z, x, y),
            (-z, -x, y),
        ];

        let mut mesh = Self::default();
        for (normal, u, v) in faces {
            let center = normal.component_mul(&half_extents);
            let half_u = u.component_mul(&half_extents).abs().norm() * u;
            let half_v = v.component_mul(&half_extents).abs().norm() * v;
            mesh.add_quad(center, normal, half_u, half_v);
        }
        mesh
    }

    /// Creates a mesh representing a horizontal rectangle centered at the
    /// origin with its front face pointing along +Y.
    ///
    /// # Panics
    /// If any of the given extents are negative.
    pub fn create_rectangle(extent_x: f32, extent_z: f32) -> Self {
        assert!(
            extent_x >= 0.0 && extent_z >= 0.0,
            "Tried to create rectangle mesh with negative extent"
        );
        let mut mesh = Self::default();
        mesh.add_quad(
            Vector3::zeros(),
            Vector3::y(),
            Vector3::x() * (0.5 * extent_x),
            -Vector3::z() * (0.5 * extent_z),
        );
        mesh
    }

    pub fn vertices(&self) -> &[MeshVertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn index_count(&self) -> u32 {
        u32::try_from(self.indices.len()).unwrap_or(u32::MAX)
    }

    /// Computes the bounding sphere of the vertex positions in model space.
    pub fn bounding_sphere(&self) -> Sphere {
        let points: Vec<_> = self
            .vertices
            .iter()
            .map(|vertex| Point3::from(vertex.position))
            .collect();
        Sphere::bounding_sphere_for_points(&points)
    }

    fn add_quad(
        &mut self,
        center: Vector3<f32>,
        normal: Vector3<f32>,
        half_u: Vector3<f32>,
        half_v: Vector3<f32>,
    ) {
        let first = self.vertices.len() as u32;
        let tangent = half_u.try_normalize(f32::EPSILON).unwrap_or_else(Vector3::x);

        let corners = [
            (-1.0, -1.0, [0.0, 1.0]),
            (1.0, -1.0, [1.0, 1.0]),
            (1.0, 1.0, [1.0, 0.0]),
            (-1.0, 1.0, [0.0, 0.0]),
        ];
        for (su, sv, uv) in corners {
            let position = center + half_u * su + half_v * sv;
            self.vertices.push(MeshVertex {
                position: position.into(),
                uv,
                normal: normal.into(),
                tangent: [tangent.x, tangent.y, tangent.z, 1.0],
            });
        }

        self.indices
            .extend_from_slice(&[first, first + 1, first + 2, first, first + 2, first + 3]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn triangle_normal(mesh: &MeshData, triangle: &[u32]) -> Vector3<f32> {
        let p = |idx: u32| Vector3::from(mesh.vertices()[idx as usize].position);
        let (a, b, c) = (p(triangle[0]), p(triangle[1]), p(triangle[2]));
        (b - a).cross(&(c - a)).normalize()
    }

    #[test]
    fn vertex_is_48_bytes() {
        assert_eq!(std::mem::size_of::<MeshVertex>(), 48);
    }

    #[test]
    fn box_has_six_quads() {
        let mesh = MeshData::create_box(1.0, 2.0, 3.0);
        assert_eq!(mesh.vertices().len(), 24);
        assert_eq!(mesh.index_count(), 36);
    }

    #[test]
    fn box_triangles_wind_counter_clockwise_seen_from_outside() {
        let mesh = MeshData::create_box(1.0, 2.0, 3.0);
        for triangle in mesh.indices().chunks_exact(3) {
            let winding_normal = triangle_normal(&mesh, triangle);
            let vertex_normal = Vector3::from(mesh.vertices()[triangle[0] as usize].normal);
            assert_abs_diff_eq!(winding_normal, vertex_normal, epsilon = 1e-6);
        }
    }

    #[test]
    fn box_vertices_lie_on_box_surface() {
        let mesh = MeshData::create_box(2.0, 4.0, 6.0);
        for vertex in mesh.vertices() {
            assert_abs_diff_eq!(vertex.position[0].abs(), 1.0, epsilon = 1e-6);
            assert_abs_diff_eq!(vertex.position[1].abs(), 2.0, epsilon = 1e-6);
            assert_abs_diff_eq!(vertex.position[2].abs(), 3.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn rectangle_faces_up() {
        let mesh = MeshData::create_rectangle(4.0, 2.0);
        for triangle in mesh.indices().chunks_exact(3) {
            assert_abs_diff_eq!(triangle_normal(&mesh, triangle), Vector3::y(), epsilon = 1e-6);
        }
        assert_abs_diff_eq!(mesh.bounding_sphere().radius(), 5.0_f32.sqrt(), epsilon = 1e-6);
    }

    #[test]
    fn empty_mesh_has_zero_indices() {
        let mesh = MeshData::new(Vec::new(), Vec::new());
        assert_eq!(mesh.index_count(), 0);
    }
}
