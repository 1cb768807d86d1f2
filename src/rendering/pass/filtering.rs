//! Bilateral denoising of the cone-traced lighting.

use crate::{
    gpu::texture::RenderTexture,
    rendering::{
        lighting::LightingTextures,
        pass::{
            ConeTracingOutput, DownsampleOutput, FLOAT_SAMPLE, FrameContext, FullscreenDraw,
            PassOutcome, RenderPass, RenderPassID, SetupContext, create_fullscreen_pipeline,
            create_pipeline_layout, create_render_textures, create_texture_group,
            create_texture_group_layout, push_constant_range, record_fullscreen_draw,
        },
        shader_templates::SpecificShaderTemplate,
    },
};
use anyhow::{Result, anyhow};
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;

/// Number of texels on each side of the center the filter reaches.
const RADIUS: i32 = 2;

const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

/// Filters the four cone-traced lighting channels in place with a separable
/// bilateral filter: a horizontal pass into intermediate textures followed
/// by a vertical pass back into the cone tracing targets.
#[derive(Debug, Default)]
pub struct BilateralFilteringRenderPass {
    resources: Option<FilteringResources>,
}

#[derive(Debug)]
struct FilteringResources {
    pipeline: wgpu::RenderPipeline,
    horizontal_bind_group: wgpu::BindGroup,
    vertical_bind_group: wgpu::BindGroup,
    intermediate: LightingTextures,
    filtered: LightingTextures,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Zeroable, Pod)]
struct FilterPushConstants {
    direction: [i32; 2],
}

impl FilterPushConstants {
    const HORIZONTAL: Self = Self { direction: [1, 0] };
    const VERTICAL: Self = Self { direction: [0, 1] };
}

impl BilateralFilteringRenderPass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RenderPass for BilateralFilteringRenderPass {
    fn id(&self) -> RenderPassID {
        RenderPassID::BilateralFiltering
    }

    fn dependencies(&self) -> &'static [RenderPassID] {
        &[RenderPassID::ConeTracing, RenderPassID::Downsample]
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        let cone_traced = ctx.outputs.get::<ConeTracingOutput>()?;
        let downsampled = ctx.outputs.get::<DownsampleOutput>()?;

        let module = ctx.compile_shader(
            SpecificShaderTemplate::BilateralFilter,
            &[],
            shader_template_replacements!("radius" => RADIUS),
        )?;
        let device = ctx.graphics_device.device();

        let texture_layout =
            create_texture_group_layout(device, "Bilateral filter", &[FLOAT_SAMPLE; 6]);
        let layout = create_pipeline_layout(
            device,
            "Bilateral filter",
            &[&ctx.shared.frame_layout, &texture_layout],
            &[push_constant_range::<FilterPushConstants>(
                wgpu::ShaderStages::FRAGMENT,
            )],
        );
        let pipeline =
            create_fullscreen_pipeline(device, "Bilateral filter", &layout, &module, &[FORMAT; 4]);

        let filtered = cone_traced.textures.clone();
        let [indirect, ambient, specular, direct] = create_render_textures(
            ctx.graphics_device,
            [
                "Horizontally filtered indirect diffuse",
                "Horizontally filtered ambient",
                "Horizontally filtered specular",
                "Horizontally filtered direct",
            ],
            (filtered.indirect.width(), filtered.indirect.height()),
            FORMAT,
        );
        let intermediate = LightingTextures {
            indirect,
            ambient,
            specular,
            direct,
        };

        let bind_group_for = |label: &str, channels: &LightingTextures| {
            let [indirect, ambient, specular, direct] = channels.all();
            create_texture_group(
                device,
                label,
                &texture_layout,
                &[
                    indirect,
                    ambient,
                    specular,
                    direct,
                    &downsampled.position,
                    &downsampled.normal,
                ],
            )
        };
        let horizontal_bind_group = bind_group_for("Horizontal bilateral filter", &filtered);
        let vertical_bind_group = bind_group_for("Vertical bilateral filter", &intermediate);

        self.resources = Some(FilteringResources {
            pipeline,
            horizontal_bind_group,
            vertical_bind_group,
            intermediate,
            filtered,
        });
        Ok(())
    }

    fn render(&mut self, ctx: &mut FrameContext<'_>) -> Result<PassOutcome> {
        if !ctx.config.passes.bilateral_filtering {
            return Ok(PassOutcome::Skipped);
        }
        let resources = self
            .resources
            .as_ref()
            .ok_or_else(|| anyhow!("Bilateral filtering pass used before setup"))?;

        for (label, targets, bind_group, push_constants) in [
            (
                "Horizontal bilateral filter render pass",
                &resources.intermediate,
                &resources.horizontal_bind_group,
                FilterPushConstants::HORIZONTAL,
            ),
            (
                "Vertical bilateral filter render pass",
                &resources.filtered,
                &resources.vertical_bind_group,
                FilterPushConstants::VERTICAL,
            ),
        ] {
            let targets: [&RenderTexture; 4] = targets.all().map(Arc::as_ref);
            record_fullscreen_draw(
                ctx,
                RenderPassID::BilateralFiltering,
                &FullscreenDraw {
                    label,
                    pipeline: &resources.pipeline,
                    targets: &targets,
                    bind_groups: &[bind_group],
                    push_constants: bytemuck::bytes_of(&push_constants),
                },
            );
        }

        ctx.set_last_target(&resources.filtered.indirect);
        Ok(PassOutcome::Executed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_directions_are_orthogonal_unit_steps() {
        let [hx, hy] = FilterPushConstants::HORIZONTAL.direction;
        let [vx, vy] = FilterPushConstants::VERTICAL.direction;
        assert_eq!(hx * vx + hy * vy, 0);
        assert_eq!(hx.abs() + hy.abs(), 1);
        assert_eq!(vx.abs() + vy.abs(), 1);
    }
}
