//! Light sources.

use nalgebra::{Point3, UnitVector3, Vector3};

/// Maximum number of point lights passed to the lighting shaders.
pub const MAX_POINT_LIGHTS: usize = 8;

/// A light infinitely far away, shining in one direction.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DirectionalLight {
    /// Direction the light travels in.
    pub direction: UnitVector3<f32>,
    pub radiance: Vector3<f32>,
}

/// An unshadowed light emitting uniformly in all directions.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PointLight {
    pub position: Point3<f32>,
    pub radiance: Vector3<f32>,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: UnitVector3::new_normalize(Vector3::new(0.3, -1.0, 0.2)),
            radiance: Vector3::repeat(3.0),
        }
    }
}
