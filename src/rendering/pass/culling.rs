//! View frustum culling on the GPU.

use crate::{
    batch::GraphicsBatch,
    rendering::{
        pass::{
            FrameContext, PassOutcome, RenderPass, RenderPassID, SetupContext,
            create_compute_pipeline, create_pipeline_layout, push_constant_range,
        },
        resources::FRAME_GROUP,
        shader_templates::SpecificShaderTemplate,
    },
};
use anyhow::{Result, anyhow};
use bytemuck::{Pod, Zeroable};
use std::borrow::Cow;

const WORKGROUP_SIZE: u32 = 64;

/// Fills the active visible-index partition and draw command of every batch
/// with the instances whose bounding sphere intersects the view frustum.
/// With culling disabled, every instance is marked visible, so the draw
/// commands are never stale.
#[derive(Debug, Default)]
pub struct ViewFrustumCullingPass {
    pipeline: Option<wgpu::ComputePipeline>,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Zeroable, Pod)]
struct CullingPushConstants {
    instance_count: u32,
    visible_offset: u32,
    draw_command_word: u32,
    culling_enabled: u32,
}

impl ViewFrustumCullingPass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RenderPass for ViewFrustumCullingPass {
    fn id(&self) -> RenderPassID {
        RenderPassID::Culling
    }

    fn dependencies(&self) -> &'static [RenderPassID] {
        &[]
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        let module = ctx.compile_shader(
            SpecificShaderTemplate::FrustumCulling,
            &[],
            shader_template_replacements!("workgroup_size" => WORKGROUP_SIZE),
        )?;
        let device = ctx.graphics_device.device();
        let layout = create_pipeline_layout(
            device,
            "Frustum culling",
            &[&ctx.shared.frame_layout, &ctx.shared.batch_layouts.culling],
            &[push_constant_range::<CullingPushConstants>(
                wgpu::ShaderStages::COMPUTE,
            )],
        );
        self.pipeline = Some(create_compute_pipeline(
            device,
            "Frustum culling",
            &layout,
            &module,
        ));
        Ok(())
    }

    fn render(&mut self, ctx: &mut FrameContext<'_>) -> Result<PassOutcome> {
        let pipeline = self
            .pipeline
            .as_ref()
            .ok_or_else(|| anyhow!("Culling pass used before setup"))?;

        if ctx.batches.batch_count() == 0 {
            return Ok(PassOutcome::Skipped);
        }

        let frame_slot = ctx.frame.frame_slot;
        let culling_enabled = u32::from(ctx.config.passes.frustum_culling);

        let timestamp_writes = ctx
            .timestamps
            .register_timestamp_writes_for_single_compute_pass(Cow::Borrowed(
                RenderPassID::Culling.name(),
            ));
        let mut compute_pass = ctx.encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Frustum culling pass"),
            timestamp_writes,
        });

        compute_pass.set_pipeline(pipeline);
        compute_pass.set_bind_group(FRAME_GROUP, &ctx.shared.frame_bind_group, &[]);

        for batch in ctx.batches.batches() {
            let Some(bind_groups) = batch.bind_groups() else {
                continue;
            };
            let instance_count = u32::try_from(batch.instance_count())?;
            if instance_count == 0 {
                continue;
            }
            let push_constants = CullingPushConstants {
                instance_count,
                visible_offset: batch.visible_index_offset(frame_slot),
                draw_command_word: draw_command_word(frame_slot),
                culling_enabled,
            };
            compute_pass.set_push_constants(0, bytemuck::bytes_of(&push_constants));
            compute_pass.set_bind_group(1, &bind_groups.culling, &[]);
            compute_pass.dispatch_workgroups(instance_count.div_ceil(WORKGROUP_SIZE), 1, 1);

            log::trace!(
                "Culling {instance_count} instances of batch {:?}",
                batch.key().mesh_id
            );
        }

        Ok(PassOutcome::Executed)
    }
}

/// Index of the first 32-bit word of the draw command of the given frame
/// slot in a batch's draw-command buffer.
fn draw_command_word(frame_slot: usize) -> u32 {
    (GraphicsBatch::draw_command_offset(frame_slot) / 4) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::indirect::DrawIndexedIndirectArgs;

    #[test]
    fn draw_command_words_match_byte_offsets() {
        assert_eq!(draw_command_word(0), 0);
        assert_eq!(
            draw_command_word(2) as usize,
            2 * DrawIndexedIndirectArgs::SIZE / 4
        );
    }

    #[test]
    fn push_constants_fit_in_sixteen_bytes() {
        assert_eq!(std::mem::size_of::<CullingPushConstants>(), 16);
    }
}
