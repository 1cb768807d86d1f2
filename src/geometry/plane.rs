//! Representation of planes.

use nalgebra::{Point3, UnitVector3, Vector4};

/// A plane in 3D, represented by a unit normal and a displacement.
///
/// The displacement `d` can be determined from the normal `n` and any point
/// `p` lying on the plane as `d = -n.dot(p)`.
///
/// The plane divides space into two halfspaces. The positive one is the
/// halfspace the unit normal is pointing into.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Plane {
    unit_normal: UnitVector3<f32>,
    displacement: f32,
}

impl Plane {
    /// Creates a new plane defined by the given unit normal vector and
    /// displacement.
    pub fn new(unit_normal: UnitVector3<f32>, displacement: f32) -> Self {
        Self {
            unit_normal,
            displacement,
        }
    }

    /// Creates a new plane defined by the given unit normal vector and point
    /// in the plane.
    pub fn from_normal_and_point(
        unit_normal: UnitVector3<f32>,
        point_in_plane: &Point3<f32>,
    ) -> Self {
        Self::new(unit_normal, -unit_normal.dot(&point_in_plane.coords))
    }

    /// Creates the plane `a*x + b*y + c*z + d = 0` from the given
    /// (not necessarily normalized) coefficients `[a, b, c, d]`, normalizing
    /// them so that the normal has unit length.
    ///
    /// Returns [`None`] if the normal part of the coefficients is zero.
    pub fn from_unnormalized_coefficients(coefficients: &Vector4<f32>) -> Option<Self> {
        let normal = coefficients.xyz();
        let magnitude = normal.norm();
        if magnitude <= f32::EPSILON {
            return None;
        }
        let unit_normal = UnitVector3::new_unchecked(normal / magnitude);
        Some(Self::new(unit_normal, coefficients.w / magnitude))
    }

    /// Returns the unit normal vector of the plane.
    pub fn unit_normal(&self) -> &UnitVector3<f32> {
        &self.unit_normal
    }

    /// Returns the displacement of the plane.
    pub fn displacement(&self) -> f32 {
        self.displacement
    }

    /// Computes the signed distance from the plane to the given point. If the
    /// signed distance is negative, the point lies in the negative halfspace
    /// of the plane.
    pub fn compute_signed_distance(&self, point: &Point3<f32>) -> f32 {
        self.unit_normal.dot(&point.coords) + self.displacement
    }

    /// Returns the plane as the four coefficients `[nx, ny, nz, d]`, the
    /// layout used in shaders.
    pub fn to_coefficients(&self) -> [f32; 4] {
        [
            self.unit_normal.x,
            self.unit_normal.y,
            self.unit_normal.z,
            self.displacement,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::{Vector3, point, vector};

    #[test]
    fn creating_plane_through_origin_gives_zero_displacement() {
        let plane = Plane::from_normal_and_point(
            UnitVector3::new_normalize(vector![1.2, -0.1, 2.7]),
            &Point3::origin(),
        );
        assert_abs_diff_eq!(plane.displacement(), 0.0);
    }

    #[test]
    fn signed_distance_is_correct() {
        let plane = Plane::from_normal_and_point(Vector3::y_axis(), &point![1.0, 2.0, 0.0]);
        assert_abs_diff_eq!(
            plane.compute_signed_distance(&point![-1.2, 0.0, 42.4]),
            -2.0
        );
        assert_abs_diff_eq!(
            plane.compute_signed_distance(&point![-2.1, 10.0, 4.42]),
            8.0
        );
    }

    #[test]
    fn normalizing_coefficients_scales_displacement() {
        let plane = Plane::from_unnormalized_coefficients(&vector![0.0, 0.0, 2.0, -4.0]).unwrap();
        assert_abs_diff_eq!(plane.unit_normal().into_inner(), Vector3::z());
        assert_abs_diff_eq!(plane.displacement(), -2.0);
        assert_abs_diff_eq!(plane.compute_signed_distance(&point![5.0, 1.0, 2.0]), 0.0);
    }

    #[test]
    fn zero_normal_coefficients_give_no_plane() {
        assert!(Plane::from_unnormalized_coefficients(&vector![0.0, 0.0, 0.0, 1.0]).is_none());
    }
}
