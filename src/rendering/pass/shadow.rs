//! Shadow mapping for the directional light.

use crate::{
    gpu::texture::RenderTexture,
    rendering::{
        outputs::PassOutput,
        pass::{
            FrameContext, InstanceSelection, PassOutcome, RenderPass, RenderPassID,
            SetupContext, create_mesh_pipeline, create_pipeline_layout, draw_batches,
        },
        raster::RasterState,
        resources::FRAME_GROUP,
        shader_templates::SpecificShaderTemplate,
    },
};
use anyhow::{Result, anyhow};
use std::{borrow::Cow, sync::Arc};

/// Format of the shadow map.
pub const SHADOW_MAP_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Renders the depth of every instance, seen from the directional light
/// through the light-space transform in the frame uniform, into a square
/// depth texture. Front faces are culled to reduce self-shadowing.
#[derive(Debug, Default)]
pub struct DirectionalShadowRenderPass {
    pipeline: Option<wgpu::RenderPipeline>,
    shadow_map: Option<Arc<RenderTexture>>,
}

/// The shadow map, sampled by the voxelization and direct lighting passes.
#[derive(Debug)]
pub struct ShadowOutput {
    pub shadow_map: Arc<RenderTexture>,
}

impl PassOutput for ShadowOutput {
    const NAME: &'static str = "shadow map";
    const PRODUCER: RenderPassID = RenderPassID::Shadow;
}

impl DirectionalShadowRenderPass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RenderPass for DirectionalShadowRenderPass {
    fn id(&self) -> RenderPassID {
        RenderPassID::Shadow
    }

    fn dependencies(&self) -> &'static [RenderPassID] {
        &[]
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        let module = ctx.compile_shader(SpecificShaderTemplate::ShadowMap, &[], &[])?;
        let device = ctx.graphics_device.device();

        let layout = create_pipeline_layout(
            device,
            "Shadow map",
            &[&ctx.shared.frame_layout, &ctx.shared.batch_layouts.instance],
            &[],
        );

        let raster_state = RasterState::SHADOW;
        self.pipeline = Some(create_mesh_pipeline(
            device,
            "Shadow map",
            &layout,
            &module,
            &[],
            raster_state.depth_stencil_state(
                SHADOW_MAP_FORMAT,
                wgpu::DepthBiasState {
                    constant: 2,
                    slope_scale: 2.0,
                    clamp: 0.0,
                },
            ),
            &raster_state,
        ));

        let resolution = ctx.config.shadows.resolution;
        let shadow_map = Arc::new(RenderTexture::new(
            ctx.graphics_device,
            "Shadow map",
            resolution,
            resolution,
            SHADOW_MAP_FORMAT,
        ));
        ctx.outputs.publish(ShadowOutput {
            shadow_map: Arc::clone(&shadow_map),
        })?;
        self.shadow_map = Some(shadow_map);
        Ok(())
    }

    fn render(&mut self, ctx: &mut FrameContext<'_>) -> Result<PassOutcome> {
        let (Some(pipeline), Some(shadow_map)) = (&self.pipeline, &self.shadow_map) else {
            return Err(anyhow!("Shadow pass used before setup"));
        };

        let raster_state =
            RasterState::SHADOW.with_viewport(shadow_map.width(), shadow_map.height());

        ctx.with_raster_state(raster_state, |ctx, raster_state| {
            let timestamp_writes = ctx
                .timestamps
                .register_timestamp_writes_for_single_render_pass(Cow::Borrowed(
                    RenderPassID::Shadow.name(),
                ));
            let mut render_pass = ctx.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Shadow map render pass"),
                color_attachments: &[],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: shadow_map.view(),
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes,
                occlusion_query_set: None,
            });

            raster_state.apply_viewport(&mut render_pass);
            render_pass.set_pipeline(pipeline);
            render_pass.set_bind_group(FRAME_GROUP, &ctx.shared.frame_bind_group, &[]);

            let n_draws = draw_batches(
                &mut render_pass,
                ctx.batches,
                1,
                InstanceSelection::All,
                |_, _| {},
            );
            log::trace!("Recorded {n_draws} shadow map draw calls");
            Ok(())
        })?;

        Ok(PassOutcome::Executed)
    }
}
