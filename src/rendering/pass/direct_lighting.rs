//! Shadow-mapped direct lighting.

use crate::{
    gpu::texture::RenderTexture,
    rendering::{
        MAX_SHADOW_SAMPLES, RenderingConfig, ShadowAlgorithm,
        outputs::PassOutput,
        pass::{
            FLOAT_SAMPLE, FrameContext, FullscreenDraw, GBufferOutput, PassOutcome, RenderPass,
            RenderPassID, SetupContext, ShadowOutput, create_fullscreen_pipeline,
            create_pipeline_layout, create_texture_group, create_texture_group_layout,
            push_constant_range, record_fullscreen_draw,
        },
        shader_templates::SpecificShaderTemplate,
    },
};
use anyhow::{Result, anyhow};
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;

const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

/// Computes direct light at full resolution from the directional light,
/// shadowed through the shadow map, and the unshadowed point lights. Only
/// used when shadows are not cone traced.
#[derive(Debug, Default)]
pub struct DirectLightingRenderPass {
    resources: Option<DirectLightingResources>,
}

#[derive(Debug)]
struct DirectLightingResources {
    pipeline: wgpu::RenderPipeline,
    bind_group: wgpu::BindGroup,
    direct: Arc<RenderTexture>,
}

/// Full-resolution direct lighting.
#[derive(Debug)]
pub struct DirectLightingOutput {
    pub direct: Arc<RenderTexture>,
}

impl PassOutput for DirectLightingOutput {
    const NAME: &'static str = "direct lighting";
    const PRODUCER: RenderPassID = RenderPassID::DirectLighting;
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Zeroable, Pod)]
struct DirectLightingPushConstants {
    filtered: u32,
    sample_count: u32,
    bias: f32,
}

impl DirectLightingPushConstants {
    fn new(config: &RenderingConfig) -> Self {
        Self {
            filtered: u32::from(
                config.shadows.algorithm == ShadowAlgorithm::PercentageCloserFiltering,
            ),
            sample_count: config.shadows.sample_count.clamp(1, MAX_SHADOW_SAMPLES),
            bias: config.shadows.bias,
        }
    }
}

impl DirectLightingRenderPass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RenderPass for DirectLightingRenderPass {
    fn id(&self) -> RenderPassID {
        RenderPassID::DirectLighting
    }

    fn dependencies(&self) -> &'static [RenderPassID] {
        &[RenderPassID::GBuffer, RenderPassID::Shadow]
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        let gbuffer = ctx.outputs.get::<GBufferOutput>()?;
        let shadow = ctx.outputs.get::<ShadowOutput>()?;

        let module = ctx.compile_shader(
            SpecificShaderTemplate::DirectLighting,
            &[],
            shader_template_replacements!("max_samples" => MAX_SHADOW_SAMPLES),
        )?;
        let device = ctx.graphics_device.device();

        let texture_layout = create_texture_group_layout(
            device,
            "Direct lighting",
            &[
                FLOAT_SAMPLE,
                FLOAT_SAMPLE,
                wgpu::TextureSampleType::Uint,
                wgpu::TextureSampleType::Depth,
            ],
        );
        let bind_group = create_texture_group(
            device,
            "Direct lighting",
            &texture_layout,
            &[
                &gbuffer.targets.position,
                &gbuffer.targets.mapped_normal,
                &gbuffer.targets.shading_model,
                &shadow.shadow_map,
            ],
        );

        let layout = create_pipeline_layout(
            device,
            "Direct lighting",
            &[&ctx.shared.frame_layout, &texture_layout],
            &[push_constant_range::<DirectLightingPushConstants>(
                wgpu::ShaderStages::FRAGMENT,
            )],
        );
        let pipeline =
            create_fullscreen_pipeline(device, "Direct lighting", &layout, &module, &[FORMAT]);

        let (width, height) = ctx.config.resolution;
        let direct = Arc::new(RenderTexture::new(
            ctx.graphics_device,
            "Direct lighting",
            width,
            height,
            FORMAT,
        ));
        ctx.outputs.publish(DirectLightingOutput {
            direct: Arc::clone(&direct),
        })?;

        self.resources = Some(DirectLightingResources {
            pipeline,
            bind_group,
            direct,
        });
        Ok(())
    }

    fn render(&mut self, ctx: &mut FrameContext<'_>) -> Result<PassOutcome> {
        if !ctx.config.passes.direct_lighting
            || ctx.config.shadows.algorithm == ShadowAlgorithm::ConeTraced
        {
            return Ok(PassOutcome::Skipped);
        }
        let resources = self
            .resources
            .as_ref()
            .ok_or_else(|| anyhow!("Direct lighting pass used before setup"))?;

        let push_constants = DirectLightingPushConstants::new(ctx.config);
        record_fullscreen_draw(
            ctx,
            RenderPassID::DirectLighting,
            &FullscreenDraw {
                label: "Direct lighting render pass",
                pipeline: &resources.pipeline,
                targets: &[&resources.direct],
                bind_groups: &[&resources.bind_group],
                push_constants: bytemuck::bytes_of(&push_constants),
            },
        );

        ctx.lighting.record_direct_lighting();
        ctx.set_last_target(&resources.direct);
        Ok(PassOutcome::Executed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_percentage_closer_filtering_is_filtered() {
        let mut config = RenderingConfig::default();
        config.shadows.algorithm = ShadowAlgorithm::PercentageCloserFiltering;
        assert_eq!(DirectLightingPushConstants::new(&config).filtered, 1);
        config.shadows.algorithm = ShadowAlgorithm::ShadowMapping;
        assert_eq!(DirectLightingPushConstants::new(&config).filtered, 0);
    }

    #[test]
    fn sample_count_is_clamped_to_shader_maximum() {
        let mut config = RenderingConfig::default();
        config.shadows.sample_count = 0;
        assert_eq!(DirectLightingPushConstants::new(&config).sample_count, 1);
        config.shadows.sample_count = 10 * MAX_SHADOW_SAMPLES;
        assert_eq!(
            DirectLightingPushConstants::new(&config).sample_count,
            MAX_SHADOW_SAMPLES
        );
    }
}
