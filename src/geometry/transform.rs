//! Model transforms of renderable entities.

use nalgebra::{Matrix4, Rotation3, Vector3};

/// Position, orientation and uniform scale of an entity, as provided by the
/// transform system.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EntityTransform {
    pub position: Vector3<f32>,
    /// Rotation angles about the x-, y- and z-axis, in degrees.
    pub rotation_deg: Vector3<f32>,
    pub scale: f32,
}

impl EntityTransform {
    /// Creates a transform with only a translation.
    pub fn from_position(position: Vector3<f32>) -> Self {
        Self {
            position,
            ..Self::identity()
        }
    }

    /// Creates the identity transform.
    pub fn identity() -> Self {
        Self {
            position: Vector3::zeros(),
            rotation_deg: Vector3::zeros(),
            scale: 1.0,
        }
    }

    /// Computes the model matrix `rotate(rotation) * translate(position) *
    /// scale(scale)`. The rotation is applied last, so it also rotates the
    /// translation about the origin.
    pub fn model_matrix(&self) -> Matrix4<f32> {
        self.rotation_matrix()
            * Matrix4::new_translation(&self.position)
            * Matrix4::new_scaling(self.scale)
    }

    /// Computes `Rx * Ry * Rz` from the rotation angles.
    fn rotation_matrix(&self) -> Matrix4<f32> {
        let rotation =
            Rotation3::from_axis_angle(&Vector3::x_axis(), self.rotation_deg.x.to_radians())
                * Rotation3::from_axis_angle(&Vector3::y_axis(), self.rotation_deg.y.to_radians())
                * Rotation3::from_axis_angle(&Vector3::z_axis(), self.rotation_deg.z.to_radians());
        rotation.to_homogeneous()
    }
}

impl Default for EntityTransform {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::{Point3, point, vector};

    #[test]
    fn identity_transform_gives_identity_matrix() {
        assert_abs_diff_eq!(EntityTransform::identity().model_matrix(), Matrix4::identity());
    }

    #[test]
    fn rotation_is_applied_after_translation() {
        let transform = EntityTransform {
            position: vector![1.0, 0.0, 0.0],
            rotation_deg: vector![0.0, 0.0, 90.0],
            scale: 1.0,
        };
        let origin = transform.model_matrix().transform_point(&Point3::origin());
        assert_abs_diff_eq!(origin, point![0.0, 1.0, 0.0], epsilon = 1e-6);
    }

    #[test]
    fn scale_is_applied_before_translation() {
        let transform = EntityTransform {
            position: vector![0.0, 2.0, 0.0],
            rotation_deg: Vector3::zeros(),
            scale: 3.0,
        };
        let point = transform.model_matrix().transform_point(&point![1.0, 0.0, 0.0]);
        assert_abs_diff_eq!(point, point![3.0, 2.0, 0.0], epsilon = 1e-6);
    }

    #[test]
    fn x_rotation_is_outermost() {
        let transform = EntityTransform {
            position: Vector3::zeros(),
            rotation_deg: vector![90.0, 90.0, 0.0],
            scale: 1.0,
        };
        // Ry maps +x to -z, then Rx maps -z to +y
        let point = transform.model_matrix().transform_point(&point![1.0, 0.0, 0.0]);
        assert_abs_diff_eq!(point, point![0.0, 1.0, 0.0], epsilon = 1e-6);
    }
}
