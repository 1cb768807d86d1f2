//! Downsampling of the G-buffer inputs to cone tracing.

use crate::{
    gpu::texture::RenderTexture,
    rendering::{
        outputs::PassOutput,
        pass::{
            FLOAT_SAMPLE, FrameContext, FullscreenDraw, GBufferOutput, PassOutcome, RenderPass,
            RenderPassID, SetupContext, create_fullscreen_pipeline, create_pipeline_layout,
            create_render_textures, create_texture_group, create_texture_group_layout,
            record_fullscreen_draw,
        },
        shader_templates::SpecificShaderTemplate,
    },
};
use anyhow::{Result, anyhow};
use std::sync::Arc;

const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

/// Averages blocks of `divisor × divisor` G-buffer texels into the
/// low-resolution position and normal textures cone tracing reads. Inactive
/// when the divisor is 1, in which case the full-resolution G-buffer textures
/// are published in place of the low-resolution ones.
#[derive(Debug, Default)]
pub struct DownsampleRenderPass {
    resources: Option<DownsampleResources>,
}

#[derive(Debug)]
struct DownsampleResources {
    pipeline: wgpu::RenderPipeline,
    bind_group: wgpu::BindGroup,
    position: Arc<RenderTexture>,
    normal: Arc<RenderTexture>,
}

/// Position (with view depth) and normal at the resolution cone tracing
/// works at.
#[derive(Debug)]
pub struct DownsampleOutput {
    pub position: Arc<RenderTexture>,
    pub normal: Arc<RenderTexture>,
    /// Ratio of the full to the working resolution.
    pub factor: u32,
}

impl PassOutput for DownsampleOutput {
    const NAME: &'static str = "downsampled G-buffer";
    const PRODUCER: RenderPassID = RenderPassID::Downsample;
}

impl DownsampleOutput {
    pub fn is_downsampled(&self) -> bool {
        self.factor > 1
    }
}

impl DownsampleRenderPass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RenderPass for DownsampleRenderPass {
    fn id(&self) -> RenderPassID {
        RenderPassID::Downsample
    }

    fn dependencies(&self) -> &'static [RenderPassID] {
        &[RenderPassID::GBuffer]
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        let gbuffer = ctx.outputs.get::<GBufferOutput>()?;
        let factor = ctx.config.downsample_factor();

        if factor == 1 {
            log::debug!("Downsampling disabled, cone tracing at full resolution");
            ctx.outputs.publish(DownsampleOutput {
                position: Arc::clone(&gbuffer.targets.position),
                normal: Arc::clone(&gbuffer.targets.normal),
                factor,
            })?;
            return Ok(());
        }

        let module = ctx.compile_shader(SpecificShaderTemplate::Downsample, &[], &[])?;
        let device = ctx.graphics_device.device();

        let texture_layout =
            create_texture_group_layout(device, "Downsample", &[FLOAT_SAMPLE, FLOAT_SAMPLE]);
        let layout = create_pipeline_layout(
            device,
            "Downsample",
            &[&ctx.shared.frame_layout, &texture_layout],
            &[],
        );
        let pipeline =
            create_fullscreen_pipeline(device, "Downsample", &layout, &module, &[FORMAT, FORMAT]);

        let bind_group = create_texture_group(
            device,
            "Downsample",
            &texture_layout,
            &[&gbuffer.targets.position, &gbuffer.targets.normal],
        );

        let [position, normal] = create_render_textures(
            ctx.graphics_device,
            ["Downsampled position", "Downsampled normal"],
            ctx.config.working_resolution(),
            FORMAT,
        );
        log::debug!(
            "Downsampling G-buffer by {factor} to {}x{}",
            position.width(),
            position.height()
        );

        ctx.outputs.publish(DownsampleOutput {
            position: Arc::clone(&position),
            normal: Arc::clone(&normal),
            factor,
        })?;

        self.resources = Some(DownsampleResources {
            pipeline,
            bind_group,
            position,
            normal,
        });
        Ok(())
    }

    fn render(&mut self, ctx: &mut FrameContext<'_>) -> Result<PassOutcome> {
        if !ctx.config.is_downsampled() {
            return Ok(PassOutcome::Skipped);
        }
        let resources = self
            .resources
            .as_ref()
            .ok_or_else(|| anyhow!("Downsample pass used before setup"))?;

        record_fullscreen_draw(
            ctx,
            RenderPassID::Downsample,
            &FullscreenDraw {
                label: "Downsample render pass",
                pipeline: &resources.pipeline,
                targets: &[&resources.position, &resources.normal],
                bind_groups: &[&resources.bind_group],
                push_constants: &[],
            },
        );
        Ok(PassOutcome::Executed)
    }
}
