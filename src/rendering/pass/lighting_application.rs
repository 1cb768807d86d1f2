//! Compositing of the lighting channels into the lit image.

use crate::{
    gpu::texture::RenderTexture,
    rendering::{
        lighting::{LightingChannels, LightingFrameState, LightingTextures},
        outputs::PassOutput,
        pass::{
            BilateralUpsampling, BilinearUpsampling, ConeTracingOutput, DirectLightingOutput,
            FLOAT_SAMPLE, FrameContext, FullscreenDraw, GBufferOutput, PassOutcome, RenderPass,
            RenderPassID, SetupContext, UpsamplingOutput, create_fullscreen_pipeline,
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

/// Multiplies the sum of the lighting channels valid this frame with the
/// diffuse color of every lit surface. Unlit surfaces show their emissive
/// color and the background shows the ambient light.
#[derive(Debug, Default)]
pub struct LightingApplicationRenderPass {
    resources: Option<ApplicationResources>,
}

#[derive(Debug)]
struct ApplicationResources {
    pipeline: wgpu::RenderPipeline,
    /// Reads the lighting channels as cone tracing wrote them.
    unsampled_bind_group: wgpu::BindGroup,
    bilateral_bind_group: Option<wgpu::BindGroup>,
    bilinear_bind_group: Option<wgpu::BindGroup>,
    lit: Arc<RenderTexture>,
}

/// The lit image at full resolution.
#[derive(Debug)]
pub struct LightingApplicationOutput {
    pub lit: Arc<RenderTexture>,
}

impl PassOutput for LightingApplicationOutput {
    const NAME: &'static str = "lit image";
    const PRODUCER: RenderPassID = RenderPassID::LightingApplication;
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Zeroable, Pod)]
struct ApplicationPushConstants {
    applicable_channels: u32,
    direct_from_lighting_pass: u32,
}

impl ApplicationPushConstants {
    fn new(lighting: &LightingFrameState) -> Self {
        Self {
            applicable_channels: lighting.applicable_channels().bits(),
            direct_from_lighting_pass: u32::from(lighting.direct_from_lighting_pass()),
        }
    }
}

impl LightingApplicationRenderPass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ApplicationResources {
    fn bind_group_for(&self, lighting: &LightingFrameState) -> &wgpu::BindGroup {
        let upsampled = match lighting.upsampled_by() {
            Some(RenderPassID::BilateralUpsampling) => self.bilateral_bind_group.as_ref(),
            Some(RenderPassID::BilinearUpsampling) => self.bilinear_bind_group.as_ref(),
            _ => None,
        };
        upsampled.unwrap_or(&self.unsampled_bind_group)
    }
}

impl RenderPass for LightingApplicationRenderPass {
    fn id(&self) -> RenderPassID {
        RenderPassID::LightingApplication
    }

    fn dependencies(&self) -> &'static [RenderPassID] {
        &[
            RenderPassID::GBuffer,
            RenderPassID::ConeTracing,
            RenderPassID::DirectLighting,
            RenderPassID::BilateralUpsampling,
            RenderPassID::BilinearUpsampling,
        ]
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        let gbuffer = ctx.outputs.get::<GBufferOutput>()?;
        let cone_traced = ctx.outputs.get::<ConeTracingOutput>()?;
        let direct = ctx.outputs.get::<DirectLightingOutput>()?;
        let bilateral = ctx.outputs.get::<UpsamplingOutput<BilateralUpsampling>>()?;
        let bilinear = ctx.outputs.get::<UpsamplingOutput<BilinearUpsampling>>()?;

        let module = ctx.compile_shader(SpecificShaderTemplate::LightingApplication, &[], &[])?;
        let device = ctx.graphics_device.device();

        let texture_layout = create_texture_group_layout(
            device,
            "Lighting application",
            &[
                FLOAT_SAMPLE,
                FLOAT_SAMPLE,
                FLOAT_SAMPLE,
                FLOAT_SAMPLE,
                FLOAT_SAMPLE,
                FLOAT_SAMPLE,
                FLOAT_SAMPLE,
                wgpu::TextureSampleType::Uint,
                FLOAT_SAMPLE,
            ],
        );

        let bind_group_for = |label: &str, channels: &LightingTextures| {
            let [indirect, ambient, specular, cone_traced_direct] = channels.all();
            create_texture_group(
                device,
                label,
                &texture_layout,
                &[
                    indirect,
                    ambient,
                    specular,
                    cone_traced_direct,
                    &direct.direct,
                    &gbuffer.targets.diffuse,
                    &gbuffer.targets.emissive,
                    &gbuffer.targets.shading_model,
                    &gbuffer.targets.position,
                ],
            )
        };
        let unsampled_bind_group = bind_group_for("Lighting application", &cone_traced.textures);
        let bilateral_bind_group = bilateral.textures.as_ref().map(|textures| {
            bind_group_for("Bilaterally upsampled lighting application", textures)
        });
        let bilinear_bind_group = bilinear.textures.as_ref().map(|textures| {
            bind_group_for("Bilinearly upsampled lighting application", textures)
        });

        let layout = create_pipeline_layout(
            device,
            "Lighting application",
            &[&ctx.shared.frame_layout, &texture_layout],
            &[push_constant_range::<ApplicationPushConstants>(
                wgpu::ShaderStages::FRAGMENT,
            )],
        );
        let pipeline =
            create_fullscreen_pipeline(device, "Lighting application", &layout, &module, &[FORMAT]);

        let (width, height) = ctx.config.resolution;
        let lit = Arc::new(RenderTexture::new(
            ctx.graphics_device,
            "Lit image",
            width,
            height,
            FORMAT,
        ));
        ctx.outputs.publish(LightingApplicationOutput {
            lit: Arc::clone(&lit),
        })?;

        self.resources = Some(ApplicationResources {
            pipeline,
            unsampled_bind_group,
            bilateral_bind_group,
            bilinear_bind_group,
            lit,
        });
        Ok(())
    }

    fn render(&mut self, ctx: &mut FrameContext<'_>) -> Result<PassOutcome> {
        if !ctx.config.passes.lighting_application {
            return Ok(PassOutcome::Skipped);
        }
        let resources = self
            .resources
            .as_ref()
            .ok_or_else(|| anyhow!("Lighting application pass used before setup"))?;

        let push_constants = ApplicationPushConstants::new(&ctx.lighting);
        log::trace!(
            "Applying lighting channels {:?}",
            LightingChannels::from_bits_truncate(push_constants.applicable_channels)
        );
        let bind_group = resources.bind_group_for(&ctx.lighting);

        record_fullscreen_draw(
            ctx,
            RenderPassID::LightingApplication,
            &FullscreenDraw {
                label: "Lighting application render pass",
                pipeline: &resources.pipeline,
                targets: &[&resources.lit],
                bind_groups: &[bind_group],
                push_constants: bytemuck::bytes_of(&push_constants),
            },
        );

        ctx.set_last_target(&resources.lit);
        Ok(PassOutcome::Executed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_constants_carry_applicable_channels_of_the_frame() {
        let mut lighting = LightingFrameState::new(false);
        lighting.record_cone_traced(LightingChannels::INDIRECT | LightingChannels::SPECULAR);
        lighting.record_direct_lighting();

        let push_constants = ApplicationPushConstants::new(&lighting);
        assert_eq!(
            push_constants.applicable_channels,
            (LightingChannels::INDIRECT | LightingChannels::SPECULAR | LightingChannels::DIRECT)
                .bits()
        );
        assert_eq!(push_constants.direct_from_lighting_pass, 1);
    }

    #[test]
    fn push_constants_exclude_low_resolution_channels_without_upsampling() {
        let mut lighting = LightingFrameState::new(true);
        lighting.record_cone_traced(LightingChannels::all());

        let push_constants = ApplicationPushConstants::new(&lighting);
        assert_eq!(push_constants.applicable_channels, 0);
        assert_eq!(push_constants.direct_from_lighting_pass, 0);
    }

    #[test]
    fn channel_bits_match_shader_constants() {
        assert_eq!(LightingChannels::INDIRECT.bits(), 1);
        assert_eq!(LightingChannels::AMBIENT.bits(), 2);
        assert_eq!(LightingChannels::SPECULAR.bits(), 4);
        assert_eq!(LightingChannels::DIRECT.bits(), 8);
    }
}
