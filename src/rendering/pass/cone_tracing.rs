//! Voxel cone tracing of indirect lighting.

use crate::{
    geometry::generate_diffuse_cones,
    gpu::{
        binding,
        buffer::{GPUBuffer, GPUBufferType},
    },
    rendering::{
        MAX_DIFFUSE_CONES, RenderingConfig, ShadowAlgorithm,
        lighting::{LightingChannels, LightingTextures},
        outputs::PassOutput,
        pass::{
            DownsampleOutput, FLOAT_SAMPLE, FrameContext, FullscreenDraw, GBufferOutput,
            PassOutcome, RenderPass, RenderPassID, SetupContext, VoxelOutput,
            create_fullscreen_pipeline, create_pipeline_layout, create_render_textures,
            create_texture_group, create_texture_group_layout, push_constant_range,
            record_fullscreen_draw,
        },
        shader_templates::SpecificShaderTemplate,
    },
};
use anyhow::{Result, anyhow};
use bytemuck::{Pod, Zeroable};
use std::{borrow::Cow, sync::Arc};

/// Upper bound on the number of steps along a cone.
const MAX_STEPS: u32 = 128;

const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

/// Number of clipmap textures the shader binds. Hierarchies with fewer
/// levels repeat the coarsest one.
const CLIPMAP_BINDINGS: usize = 4;

/// Traces cones through the voxel clipmaps from every visible lit surface
/// at the working resolution.
///
/// Writes indirect diffuse radiance (the weighted sum of the diffuse cones
/// divided by π), ambient light let through by the diffuse cones and
/// specular radiance along the reflected view direction. With cone traced
/// shadows, also writes direct light attenuated by a cone toward the light.
#[derive(Debug, Default)]
pub struct VoxelConeTracingRenderPass {
    resources: Option<ConeTracingResources>,
}

#[derive(Debug)]
struct ConeTracingResources {
    pipeline: wgpu::RenderPipeline,
    gbuffer_bind_group: wgpu::BindGroup,
    voxel_bind_group: wgpu::BindGroup,
    output: Arc<ConeTracingOutput>,
    cone_buffer: GPUBuffer,
    /// Number of diffuse cones currently in the cone buffer.
    cone_count: usize,
    /// Largest extent of the scene, the reference for the cone length.
    scene_extent: f32,
}

/// The cone-traced lighting channels, at the working resolution.
#[derive(Debug)]
pub struct ConeTracingOutput {
    pub textures: LightingTextures,
}

impl PassOutput for ConeTracingOutput {
    const NAME: &'static str = "cone-traced lighting";
    const PRODUCER: RenderPassID = RenderPassID::ConeTracing;
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Zeroable, Pod)]
struct ConeTracingPushConstants {
    cone_count: u32,
    diffuse_aperture: f32,
    specular_aperture_scale: f32,
    max_distance: f32,
    trace_shadow: u32,
}

type ConeUniform = [[f32; 4]; MAX_DIFFUSE_CONES];

impl ConeTracingPushConstants {
    fn new(config: &RenderingConfig, scene_extent: f32) -> Self {
        Self {
            cone_count: diffuse_cone_count(config) as u32,
            diffuse_aperture: config.cones.diffuse_aperture,
            specular_aperture_scale: config.cones.specular_aperture_scale,
            max_distance: config.cones.max_distance_fraction * scene_extent,
            trace_shadow: u32::from(config.shadows.algorithm == ShadowAlgorithm::ConeTraced),
        }
    }
}

fn diffuse_cone_count(config: &RenderingConfig) -> usize {
    config.cones.diffuse_count.min(MAX_DIFFUSE_CONES)
}

/// Packs the diffuse cones, with their weights in `w`, into the layout of
/// the cone uniform.
fn cone_uniform(cone_count: usize) -> ConeUniform {
    let mut uniform = [[0.0; 4]; MAX_DIFFUSE_CONES];
    for (packed, cone) in uniform
        .iter_mut()
        .zip(generate_diffuse_cones(cone_count.min(MAX_DIFFUSE_CONES)))
    {
        *packed = cone.direction.into_inner().push(cone.weight).into();
    }
    uniform
}

impl VoxelConeTracingRenderPass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RenderPass for VoxelConeTracingRenderPass {
    fn id(&self) -> RenderPassID {
        RenderPassID::ConeTracing
    }

    fn dependencies(&self) -> &'static [RenderPassID] {
        &[
            RenderPassID::Downsample,
            RenderPassID::Voxelization,
            RenderPassID::GBuffer,
        ]
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        let gbuffer = ctx.outputs.get::<GBufferOutput>()?;
        let downsampled = ctx.outputs.get::<DownsampleOutput>()?;
        let voxels = ctx.outputs.get::<VoxelOutput>()?;

        let module = ctx.compile_shader(
            SpecificShaderTemplate::VoxelConeTracing,
            &[],
            shader_template_replacements!(
                "max_cones" => MAX_DIFFUSE_CONES,
                "max_steps" => MAX_STEPS
            ),
        )?;
        let device = ctx.graphics_device.device();

        let gbuffer_layout = create_texture_group_layout(
            device,
            "Cone tracing G-buffer",
            &[
                FLOAT_SAMPLE,
                FLOAT_SAMPLE,
                FLOAT_SAMPLE,
                wgpu::TextureSampleType::Uint,
            ],
        );
        let gbuffer_bind_group = create_texture_group(
            device,
            "Cone tracing G-buffer",
            &gbuffer_layout,
            &[
                &downsampled.position,
                &downsampled.normal,
                &gbuffer.targets.pbr,
                &gbuffer.targets.shading_model,
            ],
        );

        let mut voxel_entries = vec![
            binding::uniform_buffer_entry(0, wgpu::ShaderStages::FRAGMENT),
            binding::uniform_buffer_entry(1, wgpu::ShaderStages::FRAGMENT),
        ];
        voxel_entries.extend((2..).take(CLIPMAP_BINDINGS).map(|binding_idx| {
            binding::texture_entry(
                binding_idx,
                wgpu::ShaderStages::FRAGMENT,
                FLOAT_SAMPLE,
                wgpu::TextureViewDimension::D3,
            )
        }));
        let voxel_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Cone tracing voxel bind group layout"),
            entries: &voxel_entries,
        });

        let cone_buffer = GPUBuffer::new_initialized(
            ctx.graphics_device,
            bytemuck::bytes_of(&cone_uniform(diffuse_cone_count(ctx.config))),
            0,
            GPUBufferType::Uniform.usage(),
            Cow::Borrowed("Diffuse cone uniform"),
        );

        log::debug!(
            "Tracing {} diffuse cones through {} clipmap levels",
            ctx.config.cones.diffuse_count,
            voxels.hierarchy.level_count()
        );
        let last_level = voxels
            .clipmaps
            .len()
            .checked_sub(1)
            .ok_or_else(|| anyhow!("No voxel clipmaps to trace cones through"))?;
        let mut voxel_bind_entries = vec![
            voxels.clipmap_uniform.create_bind_group_entry(0),
            cone_buffer.create_bind_group_entry(1),
        ];
        voxel_bind_entries.extend((0..CLIPMAP_BINDINGS).map(|level_idx| {
            binding::texture_view_binding(
                level_idx as u32 + 2,
                voxels.clipmaps[level_idx.min(last_level)].view(),
            )
        }));
        let voxel_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Cone tracing voxel bind group"),
            layout: &voxel_layout,
            entries: &voxel_bind_entries,
        });

        let layout = create_pipeline_layout(
            device,
            "Voxel cone tracing",
            &[&ctx.shared.frame_layout, &gbuffer_layout, &voxel_layout],
            &[push_constant_range::<ConeTracingPushConstants>(
                wgpu::ShaderStages::FRAGMENT,
            )],
        );
        let pipeline = create_fullscreen_pipeline(
            device,
            "Voxel cone tracing",
            &layout,
            &module,
            &[FORMAT; 4],
        );

        let working_resolution = (downsampled.position.width(), downsampled.position.height());
        let [indirect, ambient, specular, direct] = create_render_textures(
            ctx.graphics_device,
            [
                "Indirect diffuse",
                "Ambient",
                "Specular",
                "Cone-traced direct",
            ],
            working_resolution,
            FORMAT,
        );
        let output = ctx.outputs.publish(ConeTracingOutput {
            textures: LightingTextures {
                indirect,
                ambient,
                specular,
                direct,
            },
        })?;

        self.resources = Some(ConeTracingResources {
            pipeline,
            gbuffer_bind_group,
            voxel_bind_group,
            output,
            cone_buffer,
            cone_count: diffuse_cone_count(ctx.config),
            scene_extent: voxels.hierarchy.scene_aabb().max_extent(),
        });
        Ok(())
    }

    fn render(&mut self, ctx: &mut FrameContext<'_>) -> Result<PassOutcome> {
        let resources = self
            .resources
            .as_mut()
            .ok_or_else(|| anyhow!("Cone tracing pass used before setup"))?;

        let cone_count = diffuse_cone_count(ctx.config);
        if cone_count != resources.cone_count {
            log::debug!("Diffuse cone count changed to {cone_count}");
            resources.cone_buffer.queue_update_of_first_bytes(
                ctx.graphics_device,
                bytemuck::bytes_of(&cone_uniform(cone_count)),
            );
            resources.cone_count = cone_count;
        }

        let push_constants = &ConeTracingPushConstants::new(ctx.config, resources.scene_extent);
        let textures = &resources.output.textures;

        record_fullscreen_draw(
            ctx,
            RenderPassID::ConeTracing,
            &FullscreenDraw {
                label: "Voxel cone tracing render pass",
                pipeline: &resources.pipeline,
                targets: &[
                    &textures.indirect,
                    &textures.ambient,
                    &textures.specular,
                    &textures.direct,
                ],
                bind_groups: &[&resources.gbuffer_bind_group, &resources.voxel_bind_group],
                push_constants: bytemuck::bytes_of(push_constants),
            },
        );

        let mut channels =
            LightingChannels::INDIRECT | LightingChannels::AMBIENT | LightingChannels::SPECULAR;
        if push_constants.trace_shadow != 0 {
            channels |= LightingChannels::DIRECT;
        }
        ctx.lighting.record_cone_traced(channels);
        ctx.set_last_target(&textures.indirect);

        Ok(PassOutcome::Executed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f32::consts::PI;

    #[test]
    fn cone_uniform_weights_sum_to_pi_and_pad_with_zeros() {
        let uniform = cone_uniform(6);
        let total: f32 = uniform.iter().map(|cone| cone[3]).sum();
        assert_abs_diff_eq!(total, PI, epsilon = 1e-5);
        assert_eq!(uniform[6], [0.0; 4]);
        assert_abs_diff_eq!(uniform[0][1], 1.0);
    }

    #[test]
    fn cone_uniform_is_capped_at_maximum_cone_count() {
        let uniform = cone_uniform(MAX_DIFFUSE_CONES + 10);
        assert!(uniform.iter().all(|cone| cone[3] > 0.0));
    }

    #[test]
    fn push_constants_scale_distance_by_scene_extent() {
        let mut config = RenderingConfig::default();
        config.cones.max_distance_fraction = 0.5;
        config.shadows.algorithm = ShadowAlgorithm::ConeTraced;

        let push_constants = ConeTracingPushConstants::new(&config, 10.0);
        assert_abs_diff_eq!(push_constants.max_distance, 5.0);
        assert_eq!(push_constants.trace_shadow, 1);

        config.shadows.algorithm = ShadowAlgorithm::ShadowMapping;
        assert_eq!(ConeTracingPushConstants::new(&config, 10.0).trace_shadow, 0);
    }
}
