//! Upsampling of the low-resolution lighting channels to full resolution.

use crate::{
    gpu::texture::RenderTexture,
    rendering::{
        UpsamplingMode,
        lighting::LightingTextures,
        outputs::PassOutput,
        pass::{
            ConeTracingOutput, DownsampleOutput, FLOAT_SAMPLE, FrameContext, FullscreenDraw,
            GBufferOutput, PassOutcome, RenderPass, RenderPassID, SetupContext,
            create_fullscreen_pipeline, create_pipeline_layout, create_render_textures,
            create_texture_group, create_texture_group_layout, record_fullscreen_draw,
        },
        shader_templates::SpecificShaderTemplate,
    },
};
use anyhow::{Result, anyhow};
use std::{fmt, marker::PhantomData, sync::Arc};

const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

/// The filter an [`UpsamplingRenderPass`] applies.
pub trait UpsamplingFilter: fmt::Debug + Send + Sync + 'static {
    const PASS: RenderPassID;
    /// The upsampling mode selecting this filter.
    const MODE: UpsamplingMode;
    const TEMPLATE: SpecificShaderTemplate;
    const DEPENDENCIES: &'static [RenderPassID];
    const LABEL: &'static str;
    const OUTPUT_NAME: &'static str;
    const TARGET_LABELS: [&'static str; 4];
    /// Whether the filter reads the low- and full-resolution position and
    /// normal in addition to the lighting channels.
    const USES_GEOMETRY: bool;
}

/// Cross-bilateral upsampling guided by the G-buffer.
#[derive(Debug)]
pub struct BilateralUpsampling;

/// Plain bilinear upsampling.
#[derive(Debug)]
pub struct BilinearUpsampling;

impl UpsamplingFilter for BilateralUpsampling {
    const PASS: RenderPassID = RenderPassID::BilateralUpsampling;
    const MODE: UpsamplingMode = UpsamplingMode::Bilateral;
    const TEMPLATE: SpecificShaderTemplate = SpecificShaderTemplate::BilateralUpsampling;
    const DEPENDENCIES: &'static [RenderPassID] = &[
        RenderPassID::BilateralFiltering,
        RenderPassID::ConeTracing,
        RenderPassID::Downsample,
        RenderPassID::GBuffer,
    ];
    const LABEL: &'static str = "Bilateral upsampling";
    const OUTPUT_NAME: &'static str = "bilaterally upsampled lighting";
    const TARGET_LABELS: [&'static str; 4] = [
        "Bilaterally upsampled indirect diffuse",
        "Bilaterally upsampled ambient",
        "Bilaterally upsampled specular",
        "Bilaterally upsampled direct",
    ];
    const USES_GEOMETRY: bool = true;
}

impl UpsamplingFilter for BilinearUpsampling {
    const PASS: RenderPassID = RenderPassID::BilinearUpsampling;
    const MODE: UpsamplingMode = UpsamplingMode::Bilinear;
    const TEMPLATE: SpecificShaderTemplate = SpecificShaderTemplate::BilinearUpsampling;
    const DEPENDENCIES: &'static [RenderPassID] = &[
        RenderPassID::BilateralFiltering,
        RenderPassID::ConeTracing,
        RenderPassID::Downsample,
    ];
    const LABEL: &'static str = "Bilinear upsampling";
    const OUTPUT_NAME: &'static str = "bilinearly upsampled lighting";
    const TARGET_LABELS: [&'static str; 4] = [
        "Bilinearly upsampled indirect diffuse",
        "Bilinearly upsampled ambient",
        "Bilinearly upsampled specular",
        "Bilinearly upsampled direct",
    ];
    const USES_GEOMETRY: bool = false;
}

/// Brings the cone-traced lighting channels from the working resolution to
/// full resolution with the filter `F`. Only runs when the cone tracing
/// input was downsampled and `F` is the configured upsampling mode.
#[derive(Debug)]
pub struct UpsamplingRenderPass<F> {
    resources: Option<UpsamplingResources>,
    _filter: PhantomData<F>,
}

pub type BilateralUpsamplingRenderPass = UpsamplingRenderPass<BilateralUpsampling>;
pub type BilinearUpsamplingRenderPass = UpsamplingRenderPass<BilinearUpsampling>;

#[derive(Debug)]
struct UpsamplingResources {
    pipeline: wgpu::RenderPipeline,
    bind_group: wgpu::BindGroup,
    textures: LightingTextures,
}

/// The full-resolution lighting channels produced by the filter `F`, or
/// `None` if the renderer does not downsample.
#[derive(Debug)]
pub struct UpsamplingOutput<F> {
    pub textures: Option<LightingTextures>,
    _filter: PhantomData<F>,
}

impl<F: UpsamplingFilter> PassOutput for UpsamplingOutput<F> {
    const NAME: &'static str = F::OUTPUT_NAME;
    const PRODUCER: RenderPassID = F::PASS;
}

impl<F> UpsamplingOutput<F> {
    fn new(textures: Option<LightingTextures>) -> Self {
        Self {
            textures,
            _filter: PhantomData,
        }
    }
}

impl<F: UpsamplingFilter> UpsamplingRenderPass<F> {
    pub fn new() -> Self {
        Self {
            resources: None,
            _filter: PhantomData,
        }
    }
}

impl<F: UpsamplingFilter> Default for UpsamplingRenderPass<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: UpsamplingFilter> RenderPass for UpsamplingRenderPass<F> {
    fn id(&self) -> RenderPassID {
        F::PASS
    }

    fn dependencies(&self) -> &'static [RenderPassID] {
        F::DEPENDENCIES
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        let downsampled = ctx.outputs.get::<DownsampleOutput>()?;
        if !downsampled.is_downsampled() {
            ctx.outputs.publish(UpsamplingOutput::<F>::new(None))?;
            return Ok(());
        }
        let channels = ctx.outputs.get::<ConeTracingOutput>()?.textures.clone();

        let module = ctx.compile_shader(F::TEMPLATE, &[], &[])?;
        let device = ctx.graphics_device.device();

        let mut inputs: Vec<&RenderTexture> = channels.all().map(Arc::as_ref).to_vec();
        let gbuffer;
        if F::USES_GEOMETRY {
            gbuffer = ctx.outputs.get::<GBufferOutput>()?;
            inputs.extend([
                downsampled.position.as_ref(),
                downsampled.normal.as_ref(),
                gbuffer.targets.position.as_ref(),
                gbuffer.targets.normal.as_ref(),
            ]);
        }

        let texture_layout =
            create_texture_group_layout(device, F::LABEL, &vec![FLOAT_SAMPLE; inputs.len()]);
        let bind_group = create_texture_group(device, F::LABEL, &texture_layout, &inputs);

        let layout = create_pipeline_layout(
            device,
            F::LABEL,
            &[&ctx.shared.frame_layout, &texture_layout],
            &[],
        );
        let pipeline = create_fullscreen_pipeline(device, F::LABEL, &layout, &module, &[FORMAT; 4]);

        let [indirect, ambient, specular, direct] = create_render_textures(
            ctx.graphics_device,
            F::TARGET_LABELS,
            ctx.config.resolution,
            FORMAT,
        );
        let textures = LightingTextures {
            indirect,
            ambient,
            specular,
            direct,
        };
        ctx.outputs
            .publish(UpsamplingOutput::<F>::new(Some(textures.clone())))?;

        self.resources = Some(UpsamplingResources {
            pipeline,
            bind_group,
            textures,
        });
        Ok(())
    }

    fn render(&mut self, ctx: &mut FrameContext<'_>) -> Result<PassOutcome> {
        if !ctx.lighting.is_downsampled() || ctx.config.passes.upsampling != F::MODE {
            return Ok(PassOutcome::Skipped);
        }
        debug_assert!(
            ctx.lighting.upsampled_by().is_none(),
            "More than one upsampling pass executed in a frame"
        );
        let resources = self
            .resources
            .as_ref()
            .ok_or_else(|| anyhow!("{} pass used before setup", F::LABEL))?;

        log::trace!(
            "{} of channels {:?}",
            F::LABEL,
            ctx.lighting.low_res_channels()
        );
        let targets: [&RenderTexture; 4] = resources.textures.all().map(Arc::as_ref);
        record_fullscreen_draw(
            ctx,
            F::PASS,
            &FullscreenDraw {
                label: F::LABEL,
                pipeline: &resources.pipeline,
                targets: &targets,
                bind_groups: &[&resources.bind_group],
                push_constants: &[],
            },
        );

        ctx.lighting.record_upsampled(F::PASS);
        ctx.set_last_target(&resources.textures.indirect);
        Ok(PassOutcome::Executed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsampling_filters_are_selected_by_distinct_modes() {
        assert_ne!(BilateralUpsampling::MODE, BilinearUpsampling::MODE);
        assert_ne!(BilateralUpsampling::PASS, BilinearUpsampling::PASS);
        assert_ne!(UpsamplingMode::None, BilateralUpsampling::MODE);
        assert_ne!(UpsamplingMode::None, BilinearUpsampling::MODE);
    }

    #[test]
    fn upsampling_runs_after_filtering() {
        assert!(BilateralUpsampling::DEPENDENCIES.contains(&RenderPassID::BilateralFiltering));
        assert!(BilinearUpsampling::DEPENDENCIES.contains(&RenderPassID::BilateralFiltering));
        assert!(BilateralUpsampling::DEPENDENCIES.contains(&RenderPassID::GBuffer));
    }

    #[test]
    fn new_upsampling_pass_reports_its_filter_id() {
        assert_eq!(
            BilateralUpsamplingRenderPass::new().id(),
            RenderPassID::BilateralUpsampling
        );
        assert_eq!(
            BilinearUpsamplingRenderPass::new().id(),
            RenderPassID::BilinearUpsampling
        );
    }
}
