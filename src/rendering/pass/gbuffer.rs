//! Geometry pass filling the G-buffer.

use crate::{
    batch::ShaderConfiguration,
    gpu::texture::RenderTexture,
    rendering::{
        outputs::PassOutput,
        pass::{
            FrameContext, InstanceSelection, PassOutcome, RenderPass, RenderPassID,
            SetupContext, color_attachment, create_mesh_pipeline, create_pipeline_layout,
            draw_batches, push_constant_range,
        },
        raster::RasterState,
        resources::FRAME_GROUP,
        shader_templates::SpecificShaderTemplate,
    },
};
use anyhow::{Result, anyhow};
use bytemuck::{Pod, Zeroable};
use std::{borrow::Cow, collections::HashMap, sync::Arc};

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// The color targets of the G-buffer, in attachment order.
const TARGET_FORMATS: [(&str, wgpu::TextureFormat); 8] = [
    ("G-buffer normal", wgpu::TextureFormat::Rgba16Float),
    ("G-buffer position", wgpu::TextureFormat::Rgba16Float),
    ("G-buffer diffuse", wgpu::TextureFormat::Rgba8Unorm),
    ("G-buffer PBR parameters", wgpu::TextureFormat::Rgba8Unorm),
    ("G-buffer emissive", wgpu::TextureFormat::Rgba16Float),
    ("G-buffer shading model", wgpu::TextureFormat::R32Uint),
    ("G-buffer mapped normal", wgpu::TextureFormat::Rgba16Float),
    ("G-buffer tangent", wgpu::TextureFormat::Rgba16Float),
];

const CONFIGURATIONS: [ShaderConfiguration; 4] = [
    ShaderConfiguration::empty(),
    ShaderConfiguration::DIFFUSE_TEXTURE,
    ShaderConfiguration::NORMAL_MAP,
    ShaderConfiguration::DIFFUSE_TEXTURE.union(ShaderConfiguration::NORMAL_MAP),
];

/// Rasterizes the instances the culling pass found visible into the
/// G-buffer, with one pipeline per shader configuration of the batches.
#[derive(Debug, Default)]
pub struct GbufferRenderPass {
    pipelines: HashMap<ShaderConfiguration, wgpu::RenderPipeline>,
    output: Option<Arc<GBufferOutput>>,
}

/// The color targets of the G-buffer.
#[derive(Clone, Debug)]
pub struct GBufferTargets {
    /// Geometric world-space normal.
    pub normal: Arc<RenderTexture>,
    /// World-space position, with the linear view depth in `w`. A depth of
    /// zero marks the background.
    pub position: Arc<RenderTexture>,
    pub diffuse: Arc<RenderTexture>,
    /// Roughness in `r` and metallic in `g`.
    pub pbr: Arc<RenderTexture>,
    pub emissive: Arc<RenderTexture>,
    /// [`ShadingModel`](crate::scene::ShadingModel) id, zero for the
    /// background.
    pub shading_model: Arc<RenderTexture>,
    /// World-space normal after normal mapping.
    pub mapped_normal: Arc<RenderTexture>,
    /// World-space tangent, with the bitangent handedness in `w`.
    pub tangent: Arc<RenderTexture>,
}

#[derive(Debug)]
pub struct GBufferOutput {
    pub targets: GBufferTargets,
    pub depth: Arc<RenderTexture>,
}

impl PassOutput for GBufferOutput {
    const NAME: &'static str = "G-buffer";
    const PRODUCER: RenderPassID = RenderPassID::GBuffer;
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Zeroable, Pod)]
struct DrawPushConstants {
    visible_offset: u32,
}

impl GBufferTargets {
    /// The targets in attachment order.
    pub fn all(&self) -> [&Arc<RenderTexture>; 8] {
        [
            &self.normal,
            &self.position,
            &self.diffuse,
            &self.pbr,
            &self.emissive,
            &self.shading_model,
            &self.mapped_normal,
            &self.tangent,
        ]
    }
}

impl GbufferRenderPass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RenderPass for GbufferRenderPass {
    fn id(&self) -> RenderPassID {
        RenderPassID::GBuffer
    }

    fn dependencies(&self) -> &'static [RenderPassID] {
        &[RenderPassID::Culling]
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        let layout = create_pipeline_layout(
            ctx.graphics_device.device(),
            "G-buffer",
            &[
                &ctx.shared.frame_layout,
                &ctx.shared.batch_layouts.instance,
                &ctx.shared.material_layout,
            ],
            &[push_constant_range::<DrawPushConstants>(
                wgpu::ShaderStages::VERTEX,
            )],
        );

        let raster_state = RasterState::AMBIENT;
        let color_targets: Vec<_> = TARGET_FORMATS
            .iter()
            .map(|(_, format)| raster_state.color_target(*format))
            .collect();

        for configuration in CONFIGURATIONS {
            let flags = configuration_flags(configuration);
            let module = ctx.compile_shader(SpecificShaderTemplate::GeometryPass, &flags, &[])?;
            let pipeline = create_mesh_pipeline(
                ctx.graphics_device.device(),
                &format!("G-buffer {configuration:?}"),
                &layout,
                &module,
                &color_targets,
                raster_state.depth_stencil_state(DEPTH_FORMAT, wgpu::DepthBiasState::default()),
                &raster_state,
            );
            self.pipelines.insert(configuration, pipeline);
        }

        let (width, height) = ctx.config.resolution;
        let [normal, position, diffuse, pbr, emissive, shading_model, mapped_normal, tangent] =
            TARGET_FORMATS.map(|(label, format)| {
                Arc::new(RenderTexture::new(
                    ctx.graphics_device,
                    label,
                    width,
                    height,
                    format,
                ))
            });
        let depth = Arc::new(RenderTexture::new(
            ctx.graphics_device,
            "G-buffer depth",
            width,
            height,
            DEPTH_FORMAT,
        ));

        self.output = Some(ctx.outputs.publish(GBufferOutput {
            targets: GBufferTargets {
                normal,
                position,
                diffuse,
                pbr,
                emissive,
                shading_model,
                mapped_normal,
                tangent,
            },
            depth,
        })?);
        Ok(())
    }

    fn render(&mut self, ctx: &mut FrameContext<'_>) -> Result<PassOutcome> {
        let output = self
            .output
            .as_ref()
            .ok_or_else(|| anyhow!("G-buffer pass used before setup"))?;
        let pipelines = &self.pipelines;
        let frame_slot = ctx.frame.frame_slot;

        let color_attachments: Vec<_> = output
            .targets
            .all()
            .into_iter()
            .map(|target| color_attachment(target.view(), true))
            .collect();

        let timestamp_writes = ctx
            .timestamps
            .register_timestamp_writes_for_single_render_pass(Cow::Borrowed(
                RenderPassID::GBuffer.name(),
            ));
        let mut render_pass = ctx.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("G-buffer render pass"),
            color_attachments: &color_attachments,
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: output.depth.view(),
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes,
            occlusion_query_set: None,
        });

        render_pass.set_bind_group(FRAME_GROUP, &ctx.shared.frame_bind_group, &[]);
        render_pass.set_bind_group(2, &ctx.shared.material_bind_group, &[]);

        let n_draws = draw_batches(
            &mut render_pass,
            ctx.batches,
            1,
            InstanceSelection::Visible { frame_slot },
            |render_pass, batch| {
                // Every configuration has a pipeline, so the lookup only
                // fails for flags added without a matching pipeline
                if let Some(pipeline) = pipelines.get(&batch.key().configuration) {
                    render_pass.set_pipeline(pipeline);
                }
                let push_constants = DrawPushConstants {
                    visible_offset: batch.visible_index_offset(frame_slot),
                };
                render_pass.set_push_constants(
                    wgpu::ShaderStages::VERTEX,
                    0,
                    bytemuck::bytes_of(&push_constants),
                );
            },
        );
        drop(render_pass);

        log::trace!("Recorded {n_draws} G-buffer draw calls");

        ctx.set_last_target(&output.targets.diffuse);
        Ok(PassOutcome::Executed)
    }
}

/// Template flags enabling the features of the given configuration.
fn configuration_flags(configuration: ShaderConfiguration) -> Vec<&'static str> {
    let mut flags = Vec::with_capacity(2);
    if configuration.contains(ShaderConfiguration::DIFFUSE_TEXTURE) {
        flags.push("DIFFUSE_TEXTURE");
    }
    if configuration.contains(ShaderConfiguration::NORMAL_MAP) {
        flags.push("NORMAL_MAP");
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::device::REQUIRED_COLOR_ATTACHMENT_BYTES_PER_SAMPLE;

    #[test]
    fn every_configuration_has_distinct_flags() {
        let mut flag_sets: Vec<_> = CONFIGURATIONS
            .iter()
            .map(|c| configuration_flags(*c))
            .collect();
        flag_sets.sort();
        flag_sets.dedup();
        assert_eq!(flag_sets.len(), CONFIGURATIONS.len());
        assert_eq!(
            configuration_flags(ShaderConfiguration::all()),
            vec!["DIFFUSE_TEXTURE", "NORMAL_MAP"]
        );
    }

    #[test]
    fn targets_fit_in_requested_attachment_budget() {
        let mut bytes: u32 = 0;
        for (_, format) in TARGET_FORMATS {
            let alignment = format.target_component_alignment().unwrap();
            bytes = bytes.next_multiple_of(alignment) + format.target_pixel_byte_cost().unwrap();
        }
        assert!(bytes <= REQUIRED_COLOR_ATTACHMENT_BYTES_PER_SAMPLE);
    }
}
