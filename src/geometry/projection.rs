//! Projection and view transforms.
//!
//! All projections map view-space depth to the [0, 1] clip-space range used
//! by wgpu, in a right-handed view space looking along -Z.

use super::AxisAlignedBox;
use nalgebra::{Matrix4, Point3, UnitVector3, Vector3};

/// A coordinate axis.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

/// A camera with a perspective projection.
#[derive(Clone, Debug, PartialEq)]
pub struct PerspectiveCamera {
    position: Point3<f32>,
    view: Matrix4<f32>,
    vertical_field_of_view: f32,
    aspect_ratio: f32,
    near_distance: f32,
    far_distance: f32,
}

impl Axis {
    pub const ALL: [Self; 3] = [Self::X, Self::Y, Self::Z];

    fn unit_vector(self) -> Vector3<f32> {
        match self {
            Self::X => Vector3::x(),
            Self::Y => Vector3::y(),
            Self::Z => Vector3::z(),
        }
    }

    fn up_vector(self) -> Vector3<f32> {
        match self {
            Self::X | Self::Z => Vector3::y(),
            Self::Y => -Vector3::z(),
        }
    }
}

/// Computes the view-projection matrix of an orthographic projection framing
/// the given box, looking along -Z from the center of the box offset by half
/// its largest extent along +Z.
///
/// The view volume is a cube with edge length equal to the largest extent of
/// the box, so it covers the box symmetrically along all axes.
pub fn orthographic_projection(aabb: &AxisAlignedBox) -> Matrix4<f32> {
    orthographic_projection_along(aabb, Axis::Z)
}

/// Like [`orthographic_projection`], but looking along the negative direction
/// of the given axis.
pub fn orthographic_projection_along(aabb: &AxisAlignedBox, axis: Axis) -> Matrix4<f32> {
    let size = aabb.max_extent();
    let half_size = 0.5 * size;
    let center = aabb.center();

    let eye = center + axis.unit_vector() * half_size;
    let view = Matrix4::look_at_rh(&eye, &center, &axis.up_vector());

    let projection = orthographic_matrix(-half_size, half_size, -half_size, half_size, 0.0, size);

    projection * view
}

/// Computes the light-space view-projection matrix for a directional light
/// shining along `light_direction` onto the given box. The light looks from
/// `center - half_extent * light_direction` toward the center, where
/// `half_extent` is half the diagonal of the box, so the whole box is inside
/// the view volume whatever the direction.
pub fn directional_light_projection(
    aabb: &AxisAlignedBox,
    light_direction: &UnitVector3<f32>,
) -> Matrix4<f32> {
    let half_extent = aabb.half_diagonal().max(f32::EPSILON);
    let center = aabb.center();

    let eye = center - light_direction.into_inner() * half_extent;

    let up = if light_direction.y.abs() > 0.99 {
        Vector3::z()
    } else {
        Vector3::y()
    };

    let view = Matrix4::look_at_rh(&eye, &center, &up);

    let projection = orthographic_matrix(
        -half_extent,
        half_extent,
        -half_extent,
        half_extent,
        0.0,
        2.0 * half_extent,
    );

    projection * view
}

/// Creates an orthographic projection matrix mapping the given view-space box
/// to clip space, with `near` mapped to depth 0 and `far` to depth 1.
fn orthographic_matrix(
    left: f32,
    right: f32,
    bottom: f32,
    top: f32,
    near: f32,
    far: f32,
) -> Matrix4<f32> {
    let width = right - left;
    let height = top - bottom;
    let depth = far - near;

    #[rustfmt::skip]
    let matrix = Matrix4::new(
        2.0 / width, 0.0,          0.0,          -(right + left) / width,
        0.0,         2.0 / height, 0.0,          -(top + bottom) / height,
        0.0,         0.0,          -1.0 / depth, -near / depth,
        0.0,         0.0,          0.0,          1.0,
    );
    matrix
}

/// Creates a perspective projection matrix with the near plane mapped to
/// depth 0 and the far plane to depth 1.
fn perspective_matrix(
    vertical_field_of_view: f32,
    aspect_ratio: f32,
    near: f32,
    far: f32,
) -> Matrix4<f32> {
    let focal_length = 1.0 / (0.5 * vertical_field_of_view).tan();
    let inverse_depth = 1.0 / (near - far);

    #[rustfmt::skip]
    let matrix = Matrix4::new(
        focal_length / aspect_ratio, 0.0,          0.0,                 0.0,
        0.0,                         focal_length, 0.0,                 0.0,
        0.0,                         0.0,          far * inverse_depth, near * far * inverse_depth,
        0.0,                         0.0,          -1.0,                0.0,
    );
    matrix
}

impl PerspectiveCamera {
    /// Creates a camera at `eye` looking toward `target`.
    ///
    /// # Panics
    /// If the near distance is not positive or not smaller than the far
    /// distance.
    pub fn look_at(
        eye: Point3<f32>,
        target: Point3<f32>,
        up: Vector3<f32>,
        vertical_field_of_view: f32,
        aspect_ratio: f32,
        near_distance: f32,
        far_distance: f32,
    ) -> Self {
        assert!(near_distance > 0.0 && near_distance < far_distance);
        Self {
            position: eye,
            view: Matrix4::look_at_rh(&eye, &target, &up),
            vertical_field_of_view,
            aspect_ratio,
            near_distance,
            far_distance,
        }
    }

    /// Returns the world-space position of the camera.
    pub fn position(&self) -> &Point3<f32> {
        &self.position
    }

    /// Returns the world-to-view transform.
    pub fn view_matrix(&self) -> &Matrix4<f32> {
        &self.view
    }

    /// Returns the view-to-clip transform.
    pub fn projection_matrix(&self) -> Matrix4<f32> {
        perspective_matrix(
            self.vertical_field_of_view,
            self.aspect_ratio,
            self.near_distance,
            self.far_distance,
        )
    }

    /// Returns the combined world-to-clip transform.
    pub fn view_projection_matrix(&self) -> Matrix4<f32> {
        self.projection_matrix() * self.view
    }

    /// Sets the aspect ratio (width over height) of the projection.
    pub fn set_aspect_ratio(&mut self, aspect_ratio: f32) {
        self.aspect_ratio = aspect_ratio;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::{point, vector};
    use std::f32::consts::FRAC_PI_2;

    fn clip_to_ndc(matrix: &Matrix4<f32>, point: &Point3<f32>) -> Vector3<f32> {
        let clip = matrix * point.to_homogeneous();
        clip.xyz() / clip.w
    }

    #[test]
    fn orthographic_projection_maps_box_into_clip_volume() {
        let aabb = AxisAlignedBox::new(point![-1.0, -2.0, -4.0], point![3.0, 2.0, 4.0]);
        let matrix = orthographic_projection(&aabb);

        let ndc_center = clip_to_ndc(&matrix, &aabb.center());
        assert_abs_diff_eq!(ndc_center, vector![0.0, 0.0, 0.5], epsilon = 1e-6);

        // The largest extent (8 along z) spans the full depth range
        let near = clip_to_ndc(&matrix, &point![1.0, 0.0, 4.0]);
        let far = clip_to_ndc(&matrix, &point![1.0, 0.0, -4.0]);
        assert_abs_diff_eq!(near.z, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(far.z, 1.0, epsilon = 1e-6);

        let corner = clip_to_ndc(&matrix, &point![5.0, 4.0, 0.0]);
        assert_abs_diff_eq!(corner.x, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(corner.y, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn orthographic_projection_along_each_axis_keeps_box_inside() {
        let aabb = AxisAlignedBox::new(point![0.0, 0.0, 0.0], point![2.0, 2.0, 2.0]);
        for axis in Axis::ALL {
            let matrix = orthographic_projection_along(&aabb, axis);
            for corner in [point![0.0, 0.0, 0.0], point![2.0, 2.0, 2.0], point![2.0, 0.0, 2.0]] {
                let ndc = clip_to_ndc(&matrix, &corner);
                assert!(ndc.x.abs() <= 1.0 + 1e-5 && ndc.y.abs() <= 1.0 + 1e-5);
                assert!((-1e-5..=1.0 + 1e-5).contains(&ndc.z));
            }
        }
    }

    #[test]
    fn directional_light_projection_contains_whole_box() {
        let aabb = AxisAlignedBox::new(point![-3.0, -1.0, -2.0], point![3.0, 5.0, 2.0]);
        for direction in [
            vector![0.0, -1.0, 0.0],
            vector![1.0, -1.0, 0.3],
            vector![-0.2, 0.1, 1.0],
        ] {
            let matrix =
                directional_light_projection(&aabb, &UnitVector3::new_normalize(direction));
            for x in [-3.0, 3.0] {
                for y in [-1.0, 5.0] {
                    for z in [-2.0, 2.0] {
                        let ndc = clip_to_ndc(&matrix, &point![x, y, z]);
                        assert!(ndc.x.abs() <= 1.0 + 1e-5 && ndc.y.abs() <= 1.0 + 1e-5);
                        assert!((-1e-5..=1.0 + 1e-5).contains(&ndc.z));
                    }
                }
            }
        }
    }

    #[test]
    fn perspective_projection_maps_near_and_far_to_unit_depth_range() {
        let camera = PerspectiveCamera::look_at(
            Point3::origin(),
            point![0.0, 0.0, -1.0],
            Vector3::y(),
            FRAC_PI_2,
            1.0,
            0.5,
            100.0,
        );
        let matrix = camera.view_projection_matrix();

        assert_abs_diff_eq!(clip_to_ndc(&matrix, &point![0.0, 0.0, -0.5]).z, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(clip_to_ndc(&matrix, &point![0.0, 0.0, -100.0]).z, 1.0, epsilon = 1e-5);

        // With a 90 degree field of view, x = -z lies on the right edge
        assert_abs_diff_eq!(clip_to_ndc(&matrix, &point![2.0, 0.0, -2.0]).x, 1.0, epsilon = 1e-6);
    }
}
