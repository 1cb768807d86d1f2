//! Per-frame uniform data shared by every shader.

use crate::{
    geometry::{AxisAlignedBox, Frustum, PerspectiveCamera, directional_light_projection},
    rendering::RenderingConfig,
    scene::{DirectionalLight, MAX_POINT_LIGHTS, PointLight},
};
use bytemuck::{Pod, Zeroable};
use nalgebra::Vector3;

/// A point light as laid out in the frame uniform.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Zeroable, Pod)]
pub struct PointLightUniform {
    pub position: [f32; 4],
    pub radiance: [f32; 4],
}

/// Uniform bound at group 0, binding 0 of every shader. The layout matches
/// the `Frame` struct in the shared WGSL definitions.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Zeroable, Pod)]
pub struct FrameUniform {
    pub view_projection: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub light_view_projection: [[f32; 4]; 4],
    pub camera_position: [f32; 4],
    /// Left, right, bottom, top, near and far planes as `(normal, offset)`,
    /// with positive distances inside.
    pub frustum_planes: [[f32; 4]; 6],
    /// Direction the directional light travels in.
    pub light_direction: [f32; 4],
    pub light_radiance: [f32; 4],
    pub ambient: [f32; 4],
    pub point_lights: [PointLightUniform; MAX_POINT_LIGHTS],
    /// Full width and height, followed by the working width and height.
    pub resolution: [u32; 4],
    /// Frame index, point light count and downsample factor.
    pub parameters: [u32; 4],
    /// Time since the previous frame in milliseconds.
    pub timing: [f32; 4],
}

/// The lights currently illuminating the scene.
#[derive(Clone, Debug, PartialEq)]
pub struct SceneLights {
    pub directional: DirectionalLight,
    pub point_lights: Vec<PointLight>,
    pub ambient: Vector3<f32>,
}

impl FrameUniform {
    /// Gathers the uniform data for a frame.
    pub fn new(
        camera: &PerspectiveCamera,
        lights: &SceneLights,
        scene_aabb: &AxisAlignedBox,
        config: &RenderingConfig,
        frame_index: u64,
        delta_time_ms: f32,
    ) -> Self {
        let view_projection = camera.view_projection_matrix();
        let frustum_planes = Frustum::from_view_projection(&view_projection)
            .map_or([[0.0; 4]; 6], |frustum| frustum.plane_coefficients());

        let light_view_projection =
            directional_light_projection(scene_aabb, &lights.directional.direction);

        if lights.point_lights.len() > MAX_POINT_LIGHTS {
            log::warn!(
                "Only the first {MAX_POINT_LIGHTS} of {} point lights are used",
                lights.point_lights.len()
            );
        }
        let mut point_lights = [PointLightUniform::default(); MAX_POINT_LIGHTS];
        for (uniform, light) in point_lights.iter_mut().zip(&lights.point_lights) {
            *uniform = PointLightUniform {
                position: light.position.to_homogeneous().into(),
                radiance: light.radiance.push(0.0).into(),
            };
        }
        let point_light_count = lights.point_lights.len().min(MAX_POINT_LIGHTS) as u32;

        let (width, height) = config.resolution;
        let (working_width, working_height) = config.working_resolution();

        Self {
            view_projection: view_projection.into(),
            view: (*camera.view_matrix()).into(),
            light_view_projection: light_view_projection.into(),
            camera_position: camera.position().to_homogeneous().into(),
            frustum_planes,
            light_direction: lights.directional.direction.into_inner().push(0.0).into(),
            light_radiance: lights.directional.radiance.push(0.0).into(),
            ambient: lights.ambient.push(0.0).into(),
            point_lights,
            resolution: [width, height, working_width, working_height],
            parameters: [
                frame_index as u32,
                point_light_count,
                config.downsample_factor(),
                0,
            ],
            timing: [delta_time_ms, 0.0, 0.0, 0.0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Point3, Vector3, point, vector};
    use std::mem;

    fn lights(n_point_lights: usize) -> SceneLights {
        SceneLights {
            directional: DirectionalLight::default(),
            point_lights: (0..n_point_lights)
                .map(|idx| PointLight {
                    position: point![idx as f32, 1.0, 0.0],
                    radiance: Vector3::repeat(1.0),
                })
                .collect(),
            ambient: vector![0.1, 0.1, 0.1],
        }
    }

    fn camera() -> PerspectiveCamera {
        PerspectiveCamera::look_at(
            point![0.0, 0.0, 5.0],
            Point3::origin(),
            Vector3::y(),
            1.0,
            1.0,
            0.1,
            100.0,
        )
    }

    #[test]
    fn frame_uniform_size_matches_shader_layout() {
        assert_eq!(mem::size_of::<FrameUniform>(), 656);
        assert_eq!(mem::size_of::<FrameUniform>() % 16, 0);
    }

    #[test]
    fn excess_point_lights_are_dropped() {
        let aabb = AxisAlignedBox::new(point![-1.0, -1.0, -1.0], point![1.0, 1.0, 1.0]);
        let uniform = FrameUniform::new(
            &camera(),
            &lights(MAX_POINT_LIGHTS + 3),
            &aabb,
            &RenderingConfig::default(),
            7,
            16.0,
        );
        assert_eq!(uniform.parameters[0], 7);
        assert_eq!(uniform.parameters[1], MAX_POINT_LIGHTS as u32);
        assert_eq!(uniform.point_lights[1].position, [1.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn resolution_holds_full_and_working_sizes() {
        let aabb = AxisAlignedBox::new(point![-1.0, -1.0, -1.0], point![1.0, 1.0, 1.0]);
        let config = RenderingConfig {
            resolution: (640, 480),
            downsample_divisor: 4,
            ..Default::default()
        };
        let uniform = FrameUniform::new(&camera(), &lights(0), &aabb, &config, 0, 0.0);
        assert_eq!(uniform.resolution, [640, 480, 160, 120]);
        assert_eq!(uniform.parameters[2], 4);
    }
}
