//! Representation of axis-aligned boxes.

use nalgebra::{self as na, Point3, Vector3};

/// A box with orientation aligned with the coordinate system axes. The width,
/// height and depth axes are aligned with the x-, y- and z-axis respectively.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AxisAlignedBox {
    lower_corner: Point3<f32>,
    upper_corner: Point3<f32>,
}

impl AxisAlignedBox {
    /// Creates a new box with the given lower and upper corner points.
    ///
    /// # Panics
    /// If any component of the lower corner exceeds the corresponding
    /// component of the upper corner.
    pub fn new(lower_corner: Point3<f32>, upper_corner: Point3<f32>) -> Self {
        assert!(
            lower_corner
                .iter()
                .zip(upper_corner.iter())
                .all(|(lower, upper)| lower <= upper),
            "Lower corner {lower_corner} exceeds upper corner {upper_corner}"
        );
        Self {
            lower_corner,
            upper_corner,
        }
    }

    /// Creates the axis-aligned bounding box for the given points.
    ///
    /// # Panics
    /// If the point slice is empty.
    pub fn aabb_for_points(points: &[Point3<f32>]) -> Self {
        assert!(
            !points.is_empty(),
            "Tried to create AABB for empty point slice"
        );

        let first_point = points[0];

        let (lower_corner, upper_corner) = points.iter().skip(1).fold(
            (first_point, first_point),
            |(lower_corner, upper_corner), point| {
                (lower_corner.inf(point), upper_corner.sup(point))
            },
        );

        Self::new(lower_corner, upper_corner)
    }

    /// Returns a reference to the lower corner of the box.
    pub fn lower_corner(&self) -> &Point3<f32> {
        &self.lower_corner
    }

    /// Returns a reference to the upper corner of the box.
    pub fn upper_corner(&self) -> &Point3<f32> {
        &self.upper_corner
    }

    /// Calculates and returns the center point of the box.
    pub fn center(&self) -> Point3<f32> {
        na::center(&self.lower_corner, &self.upper_corner)
    }

    /// Returns the extents of the box along each axis.
    pub fn extents(&self) -> Vector3<f32> {
        self.upper_corner - self.lower_corner
    }

    /// Returns half the extents of the box along each axis.
    pub fn half_extents(&self) -> Vector3<f32> {
        0.5 * self.extents()
    }

    /// Returns the largest extent of the box along any axis.
    pub fn max_extent(&self) -> f32 {
        self.extents().max()
    }

    /// Returns half the length of the diagonal of the box.
    pub fn half_diagonal(&self) -> f32 {
        0.5 * self.extents().norm()
    }

    /// Creates a new box with the extents of this box scaled uniformly by
    /// the given factor about the center of the box.
    pub fn scaled_about_center(&self, scaling: f32) -> Self {
        let center = self.center();
        let scaled_half_extents = self.half_extents() * scaling;
        Self::new(center - scaled_half_extents, center + scaled_half_extents)
    }

    /// Whether the given point is inside the box or on its boundary.
    pub fn contains_point(&self, point: &Point3<f32>) -> bool {
        point
            .iter()
            .zip(self.lower_corner.iter().zip(self.upper_corner.iter()))
            .all(|(coord, (lower, upper))| lower <= coord && coord <= upper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::point;

    #[test]
    fn creating_aabb_for_points_finds_lower_and_upper_corners() {
        let aabb = AxisAlignedBox::aabb_for_points(&[
            point![1.0, -2.0, 3.0],
            point![-1.0, 4.0, 0.5],
            point![0.0, 0.0, 7.0],
        ]);
        assert_eq!(aabb.lower_corner(), &point![-1.0, -2.0, 0.5]);
        assert_eq!(aabb.upper_corner(), &point![1.0, 4.0, 7.0]);
    }

    #[test]
    #[should_panic]
    fn creating_aabb_for_no_points_panics() {
        AxisAlignedBox::aabb_for_points(&[]);
    }

    #[test]
    fn scaling_aabb_about_center_preserves_center() {
        let aabb = AxisAlignedBox::new(point![0.0, 2.0, -4.0], point![2.0, 6.0, 4.0]);
        let scaled = aabb.scaled_about_center(0.5);

        assert_abs_diff_eq!(scaled.center(), aabb.center());
        assert_abs_diff_eq!(scaled.extents(), aabb.extents() * 0.5);
    }

    #[test]
    fn max_extent_and_half_diagonal_are_correct() {
        let aabb = AxisAlignedBox::new(point![0.0, 0.0, 0.0], point![3.0, 4.0, 0.0]);
        assert_abs_diff_eq!(aabb.max_extent(), 4.0);
        assert_abs_diff_eq!(aabb.half_diagonal(), 2.5);
    }

    #[test]
    fn boundary_points_are_contained() {
        let aabb = AxisAlignedBox::new(point![-1.0, -1.0, -1.0], point![1.0, 1.0, 1.0]);
        assert!(aabb.contains_point(&point![1.0, -1.0, 0.0]));
        assert!(!aabb.contains_point(&point![1.0001, 0.0, 0.0]));
    }
}
