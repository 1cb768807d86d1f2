//! Representation of spheres.

use bytemuck::{Pod, Zeroable};
use nalgebra::{Matrix4, Point3};

/// A sphere represented by the center point and the radius.
///
/// The layout matches the bounding volume records read by the culling
/// shader: the center in the first three components followed by the radius.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Zeroable, Pod)]
pub struct Sphere {
    center: [f32; 3],
    radius: f32,
}

impl Sphere {
    /// Creates a new sphere with the given center and radius.
    ///
    /// # Panics
    /// If `radius` is negative.
    pub fn new(center: Point3<f32>, radius: f32) -> Self {
        assert!(radius >= 0.0, "Negative sphere radius {radius}");
        Self {
            center: center.into(),
            radius,
        }
    }

    /// Finds the smallest sphere centered on the centroid of the given points
    /// that encloses all of them. An empty slice gives a zero-radius sphere
    /// at the origin.
    pub fn bounding_sphere_for_points(points: &[Point3<f32>]) -> Self {
        if points.is_empty() {
            return Self::default();
        }

        #[allow(clippy::cast_precision_loss)]
        let centroid = Point3::from(
            points
                .iter()
                .fold(nalgebra::Vector3::zeros(), |sum, point| sum + point.coords)
                / points.len() as f32,
        );

        let radius = points
            .iter()
            .map(|point| nalgebra::distance(&centroid, point))
            .fold(0.0, f32::max);

        Self::new(centroid, radius)
    }

    /// Returns the center point of the sphere.
    pub fn center(&self) -> Point3<f32> {
        Point3::from(self.center)
    }

    /// Returns the radius of the sphere.
    pub fn radius(&self) -> f32 {
        self.radius
    }

    /// Transforms the sphere with the given model matrix, where
    /// `uniform_scale` is the scaling factor baked into the matrix.
    ///
    /// The center is transformed as a point and the radius is multiplied by
    /// the scaling factor.
    pub fn transformed(&self, model_matrix: &Matrix4<f32>, uniform_scale: f32) -> Self {
        Self::new(
            model_matrix.transform_point(&self.center()),
            self.radius * uniform_scale.abs(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::{Vector3, point};

    #[test]
    fn bounding_sphere_encloses_all_points() {
        let points = [
            point![1.0, 0.0, 0.0],
            point![-1.0, 0.0, 0.0],
            point![0.0, 3.0, 0.0],
        ];
        let sphere = Sphere::bounding_sphere_for_points(&points);
        for point in &points {
            assert!(nalgebra::distance(&sphere.center(), point) <= sphere.radius() + 1e-6);
        }
    }

    #[test]
    fn transforming_sphere_moves_center_and_scales_radius() {
        let sphere = Sphere::new(point![1.0, 0.0, 0.0], 2.0);
        let matrix =
            Matrix4::new_translation(&Vector3::new(0.0, 5.0, 0.0)) * Matrix4::new_scaling(3.0);

        let transformed = sphere.transformed(&matrix, 3.0);

        assert_abs_diff_eq!(transformed.center(), point![3.0, 5.0, 0.0]);
        assert_abs_diff_eq!(transformed.radius(), 6.0);
    }
}
