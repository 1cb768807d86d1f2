//! Representation of frustums.

use super::{Plane, Sphere};
use nalgebra::{Matrix4, Point3};

/// A frustum, which in general is a pyramid truncated at the top. It is here
/// represented by the six planes making up the faces of the truncated
/// pyramid, with their normals pointing into the frustum.
///
/// The planes are ordered as left, right, bottom, top, near and far.
#[derive(Clone, Debug, PartialEq)]
pub struct Frustum {
    planes: [Plane; 6],
}

impl Frustum {
    /// Creates the frustum representing the clip space volume of the given
    /// view-projection matrix, using the Gribb-Hartmann row-combination
    /// method for a [0, 1] clip depth range. Each plane is normalized.
    ///
    /// Returns [`None`] if the matrix is degenerate so that some plane has no
    /// normal.
    pub fn from_view_projection(view_projection: &Matrix4<f32>) -> Option<Self> {
        let row_1 = view_projection.row(0).transpose();
        let row_2 = view_projection.row(1).transpose();
        let row_3 = view_projection.row(2).transpose();
        let row_4 = view_projection.row(3).transpose();

        let left = Plane::from_unnormalized_coefficients(&(row_4 + row_1))?;
        let right = Plane::from_unnormalized_coefficients(&(row_4 - row_1))?;
        let bottom = Plane::from_unnormalized_coefficients(&(row_4 + row_2))?;
        let top = Plane::from_unnormalized_coefficients(&(row_4 - row_2))?;
        let near = Plane::from_unnormalized_coefficients(&row_3)?;
        let far = Plane::from_unnormalized_coefficients(&(row_4 - row_3))?;

        Some(Self {
            planes: [left, right, bottom, top, near, far],
        })
    }

    /// Returns the planes bounding the frustum.
    pub fn planes(&self) -> &[Plane; 6] {
        &self.planes
    }

    /// Returns the plane coefficients in the layout used by shaders.
    pub fn plane_coefficients(&self) -> [[f32; 4]; 6] {
        self.planes.map(|plane| plane.to_coefficients())
    }

    /// Whether the given point is inside the frustum or on its boundary.
    pub fn contains_point(&self, point: &Point3<f32>) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.compute_signed_distance(point) >= 0.0)
    }

    /// Whether any part of the given sphere could be inside the frustum. This
    /// is the same test the culling shader performs, and it is conservative
    /// near the frustum's edges.
    pub fn could_contain_part_of_sphere(&self, sphere: &Sphere) -> bool {
        let center = sphere.center();
        self.planes
            .iter()
            .all(|plane| plane.compute_signed_distance(&center) >= -sphere.radius())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{AxisAlignedBox, PerspectiveCamera, orthographic_projection};
    use nalgebra::{Vector3, point};
    use std::f32::consts::FRAC_PI_2;

    fn unit_cube_frustum() -> Frustum {
        let aabb = AxisAlignedBox::new(point![-1.0, -1.0, -1.0], point![1.0, 1.0, 1.0]);
        Frustum::from_view_projection(&orthographic_projection(&aabb)).unwrap()
    }

    #[test]
    fn inside_point_has_positive_distance_to_all_planes() {
        let frustum = unit_cube_frustum();
        for plane in frustum.planes() {
            assert!(plane.compute_signed_distance(&point![0.2, -0.3, 0.1]) > 0.0);
        }
        assert!(frustum.contains_point(&point![0.9, 0.9, -0.9]));
    }

    #[test]
    fn outside_point_has_negative_distance_to_one_plane() {
        let frustum = unit_cube_frustum();

        let distances: Vec<_> = frustum
            .planes()
            .iter()
            .map(|plane| plane.compute_signed_distance(&point![1.5, 0.0, 0.0]))
            .collect();

        assert_eq!(distances.iter().filter(|&&distance| distance < 0.0).count(), 1);
        assert!(distances[1] < 0.0);
        assert!(!frustum.contains_point(&point![1.5, 0.0, 0.0]));
    }

    #[test]
    fn extracted_planes_are_normalized() {
        let camera = PerspectiveCamera::look_at(
            point![0.0, 2.0, 5.0],
            Point3::origin(),
            Vector3::y(),
            1.0,
            1.6,
            0.1,
            50.0,
        );
        let frustum = Frustum::from_view_projection(&camera.view_projection_matrix()).unwrap();
        for plane in frustum.planes() {
            approx::assert_abs_diff_eq!(plane.unit_normal().norm(), 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn perspective_frustum_classifies_points_along_view_axis() {
        let camera = PerspectiveCamera::look_at(
            Point3::origin(),
            point![0.0, 0.0, -1.0],
            Vector3::y(),
            FRAC_PI_2,
            1.0,
            1.0,
            10.0,
        );
        let frustum = Frustum::from_view_projection(&camera.view_projection_matrix()).unwrap();

        assert!(frustum.contains_point(&point![0.0, 0.0, -5.0]));
        assert!(!frustum.contains_point(&point![0.0, 0.0, -0.5]));
        assert!(!frustum.contains_point(&point![0.0, 0.0, -11.0]));
        assert!(!frustum.contains_point(&point![6.0, 0.0, -5.0]));
    }

    #[test]
    fn sphere_straddling_boundary_could_be_visible() {
        let frustum = unit_cube_frustum();
        assert!(frustum.could_contain_part_of_sphere(&Sphere::new(point![1.4, 0.0, 0.0], 0.5)));
        assert!(!frustum.could_contain_part_of_sphere(&Sphere::new(point![3.0, 0.0, 0.0], 0.5)));
    }
}
