//! Render passes and the contexts they are set up and recorded with.

mod blit;
mod cone_tracing;
mod culling;
mod direct_lighting;
mod downsample;
mod filtering;
mod gbuffer;
mod lighting_application;
mod shadow;
mod upsampling;
mod voxelization;

pub use blit::BlitPass;
pub use cone_tracing::{ConeTracingOutput, VoxelConeTracingRenderPass};
pub use culling::ViewFrustumCullingPass;
pub use direct_lighting::{DirectLightingOutput, DirectLightingRenderPass};
pub use downsample::{DownsampleOutput, DownsampleRenderPass};
pub use filtering::BilateralFilteringRenderPass;
pub use gbuffer::{GBufferOutput, GBufferTargets, GbufferRenderPass};
pub use lighting_application::{LightingApplicationOutput, LightingApplicationRenderPass};
pub use shadow::{DirectionalShadowRenderPass, ShadowOutput};
pub use upsampling::{
    BilateralUpsampling, BilateralUpsamplingRenderPass, BilinearUpsampling,
    BilinearUpsamplingRenderPass, UpsamplingFilter, UpsamplingOutput, UpsamplingRenderPass,
};
pub use voxelization::{VoxelOutput, VoxelizationRenderPass};

use crate::{
    batch::{BatchStorage, GraphicsBatch},
    geometry::ClipmapHierarchy,
    gpu::{
        GraphicsDevice, binding,
        query::TimestampQueryRegistry,
        shader::ShaderManager,
        texture::RenderTexture,
    },
    rendering::{
        RenderingConfig,
        lighting::LightingFrameState,
        outputs::PassOutputs,
        raster::{RasterState, RasterStateTracker},
        resources::{FRAME_GROUP, SharedResources},
        schedule::FrameExecution,
        shader_templates::SpecificShaderTemplate,
        surface::HeadlessSurface,
    },
    scene::MeshVertex,
};
use anyhow::{Context, Result};
use std::{borrow::Cow, fmt, sync::Arc};

/// Identifier of each render pass.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RenderPassID {
    Culling,
    Shadow,
    GBuffer,
    Downsample,
    Voxelization,
    ConeTracing,
    DirectLighting,
    BilateralFiltering,
    BilateralUpsampling,
    BilinearUpsampling,
    LightingApplication,
    Blit,
}

/// What a pass did when asked to render a frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PassOutcome {
    /// Commands were recorded.
    Executed,
    /// The pass is disabled or has nothing to do this frame.
    Skipped,
}

/// A stage of the frame pipeline.
///
/// The renderer calls [`setup`](Self::setup) once for every pass, in
/// dependency order, when it is initialized. A pass allocates all its GPU
/// resources there and publishes the outputs later passes need. The renderer
/// then calls [`render`](Self::render) once per frame in the same order.
pub trait RenderPass: fmt::Debug {
    fn id(&self) -> RenderPassID;

    /// The passes whose outputs this pass consumes.
    fn dependencies(&self) -> &'static [RenderPassID];

    /// Allocates the pass's resources and publishes its outputs.
    ///
    /// # Errors
    /// Returns an error if a shader fails to compile, a required output is
    /// missing or a resource can not be created.
    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()>;

    /// Records the pass's commands for the current frame.
    ///
    /// # Errors
    /// Returns an error if the commands can not be recorded. Passes depending
    /// on this one are then skipped for the frame.
    fn render(&mut self, ctx: &mut FrameContext<'_>) -> Result<PassOutcome>;
}

/// Everything a pass may use while setting up.
#[derive(Debug)]
pub struct SetupContext<'a> {
    pub graphics_device: &'a GraphicsDevice,
    pub shader_manager: &'a mut ShaderManager,
    pub outputs: &'a mut PassOutputs,
    pub shared: &'a SharedResources,
    pub config: &'a RenderingConfig,
    pub clipmaps: &'a ClipmapHierarchy,
    pub surface: &'a HeadlessSurface,
}

/// Index and timing of the frame being recorded.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FrameInfo {
    pub frame_index: u64,
    /// Slot of the frame in the ring of frames in flight, selecting the draw
    /// command copy and visible-index partition of every batch.
    pub frame_slot: usize,
    pub delta_time_ms: f32,
}

/// Everything a pass may use while recording a frame.
#[derive(Debug)]
pub struct FrameContext<'a> {
    pub graphics_device: &'a GraphicsDevice,
    pub encoder: wgpu::CommandEncoder,
    pub timestamps: TimestampQueryRegistry<'a>,
    pub batches: &'a BatchStorage,
    pub shared: &'a SharedResources,
    pub config: &'a RenderingConfig,
    pub surface: &'a HeadlessSurface,
    pub frame: FrameInfo,
    pub lighting: LightingFrameState,
    pub execution: FrameExecution,
    raster: RasterStateTracker,
    last_target: Option<Arc<RenderTexture>>,
}

/// What remains of a [`FrameContext`] once recording is complete.
#[derive(Debug)]
pub struct RecordedFrame {
    pub command_buffer: wgpu::CommandBuffer,
    pub execution: FrameExecution,
    pub lighting: LightingFrameState,
}

/// Which instances of a batch a draw covers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InstanceSelection {
    /// The instances the culling pass found visible in the given frame slot,
    /// drawn through the batch's indirect draw command.
    Visible { frame_slot: usize },
    /// Every instance, with the instance index as slot.
    All,
}

impl RenderPassID {
    /// Name used in logs and timing results.
    pub fn name(self) -> &'static str {
        match self {
            Self::Culling => "View frustum culling",
            Self::Shadow => "Directional shadow",
            Self::GBuffer => "G-buffer",
            Self::Downsample => "Downsample",
            Self::Voxelization => "Voxelization",
            Self::ConeTracing => "Voxel cone tracing",
            Self::DirectLighting => "Direct lighting",
            Self::BilateralFiltering => "Bilateral filtering",
            Self::BilateralUpsampling => "Bilateral upsampling",
            Self::BilinearUpsampling => "Bilinear upsampling",
            Self::LightingApplication => "Lighting application",
            Self::Blit => "Blit",
        }
    }
}

impl fmt::Display for RenderPassID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl SetupContext<'_> {
    /// Resolves and compiles the given shader template.
    ///
    /// # Errors
    /// Returns an error naming the template if resolution or compilation
    /// fails.
    pub fn compile_shader(
        &mut self,
        template: SpecificShaderTemplate,
        flags_to_set: &[&str],
        replacements: &[(&str, String)],
    ) -> Result<Arc<wgpu::ShaderModule>> {
        self.shader_manager
            .compile_template(
                self.graphics_device,
                template.name(),
                template.template()?,
                flags_to_set,
                replacements,
            )
            .with_context(|| format!("Could not compile {template} shader"))
    }
}

impl<'a> FrameContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graphics_device: &'a GraphicsDevice,
        encoder: wgpu::CommandEncoder,
        timestamps: TimestampQueryRegistry<'a>,
        batches: &'a BatchStorage,
        shared: &'a SharedResources,
        config: &'a RenderingConfig,
        surface: &'a HeadlessSurface,
        frame: FrameInfo,
    ) -> Self {
        Self {
            graphics_device,
            encoder,
            timestamps,
            batches,
            shared,
            config,
            surface,
            frame,
            lighting: LightingFrameState::new(config.is_downsampled()),
            execution: FrameExecution::new(),
            raster: RasterStateTracker::new(),
            last_target: None,
        }
    }

    /// Records commands with the given raster state in effect. The ambient
    /// state is restored afterwards whether or not recording succeeds.
    ///
    /// # Errors
    /// Returns the error of `record`.
    pub fn with_raster_state<T>(
        &mut self,
        state: RasterState,
        record: impl FnOnce(&mut Self, &RasterState) -> Result<T>,
    ) -> Result<T> {
        let previous = self.raster.swap(state);
        let result = record(self, &state);
        self.raster.swap(previous);
        result
    }

    pub fn raster_state(&self) -> &RasterState {
        self.raster.current()
    }

    /// Puts the ambient raster state back in place if a pass left another
    /// state behind, and returns whether it had to.
    pub fn restore_ambient_raster_state(&mut self) -> bool {
        self.raster.reset_to_ambient()
    }

    /// Makes the given texture the one the final blit copies to the surface.
    pub fn set_last_target(&mut self, target: &Arc<RenderTexture>) {
        self.last_target = Some(Arc::clone(target));
    }

    pub fn last_target(&self) -> Option<&Arc<RenderTexture>> {
        self.last_target.as_ref()
    }

    /// Resolves the registered timestamp queries and finishes the encoder.
    pub fn finish(self) -> RecordedFrame {
        let Self {
            mut encoder,
            timestamps,
            execution,
            lighting,
            ..
        } = self;
        timestamps.finish(&mut encoder);
        RecordedFrame {
            command_buffer: encoder.finish(),
            execution,
            lighting,
        }
    }
}

/// Creates a pipeline layout.
pub(super) fn create_pipeline_layout(
    device: &wgpu::Device,
    label: &str,
    bind_group_layouts: &[&wgpu::BindGroupLayout],
    push_constant_ranges: &[wgpu::PushConstantRange],
) -> wgpu::PipelineLayout {
    device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(&format!("{label} render pipeline layout")),
        bind_group_layouts,
        push_constant_ranges,
    })
}

/// Creates a push constant range of the size of `T` for the given stages.
pub(super) const fn push_constant_range<T>(stages: wgpu::ShaderStages) -> wgpu::PushConstantRange {
    wgpu::PushConstantRange {
        stages,
        range: 0..std::mem::size_of::<T>() as u32,
    }
}

/// Creates a render pipeline drawing meshes with the [`MeshVertex`] layout.
pub(super) fn create_mesh_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
    color_targets: &[Option<wgpu::ColorTargetState>],
    depth_stencil: Option<wgpu::DepthStencilState>,
    raster_state: &RasterState,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(&format!("{label} render pipeline")),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: Some("vs_main"),
            buffers: &[MeshVertex::buffer_layout()],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: (!color_targets.is_empty()).then_some(wgpu::FragmentState {
            module,
            entry_point: Some("fs_main"),
            targets: color_targets,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: raster_state.primitive_state(),
        depth_stencil,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

/// Creates a render pipeline drawing a single triangle covering the target,
/// with every color target using the given formats.
pub(super) fn create_fullscreen_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
    formats: &[wgpu::TextureFormat],
) -> wgpu::RenderPipeline {
    let raster_state = RasterState::FULLSCREEN;
    let color_targets: Vec<_> = formats
        .iter()
        .map(|format| raster_state.color_target(*format))
        .collect();

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(&format!("{label} render pipeline")),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: Some("vs_main"),
            buffers: &[],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: Some("fs_main"),
            targets: &color_targets,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: raster_state.primitive_state(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

pub(super) fn create_compute_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
) -> wgpu::ComputePipeline {
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(&format!("{label} compute pipeline")),
        layout: Some(layout),
        module,
        entry_point: Some("main"),
        compilation_options: wgpu::PipelineCompilationOptions::default(),
        cache: None,
    })
}

/// Creates a color attachment for the given view, cleared to transparent
/// black if `clear` is set.
pub(super) fn color_attachment(
    view: &wgpu::TextureView,
    clear: bool,
) -> Option<wgpu::RenderPassColorAttachment<'_>> {
    Some(wgpu::RenderPassColorAttachment {
        view,
        resolve_target: None,
        ops: wgpu::Operations {
            load: if clear {
                wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT)
            } else {
                wgpu::LoadOp::Load
            },
            store: wgpu::StoreOp::Store,
        },
    })
}

/// Creates one render texture of the given size and format for each label.
pub(super) fn create_render_textures<const N: usize>(
    graphics_device: &GraphicsDevice,
    labels: [&'static str; N],
    (width, height): (u32, u32),
    format: wgpu::TextureFormat,
) -> [Arc<RenderTexture>; N] {
    labels.map(|label| {
        Arc::new(RenderTexture::new(
            graphics_device,
            label,
            width,
            height,
            format,
        ))
    })
}

/// Sample type of the float render textures read by the full-screen passes.
pub(super) const FLOAT_SAMPLE: wgpu::TextureSampleType =
    wgpu::TextureSampleType::Float { filterable: true };

/// Creates a layout binding 2D textures of the given sample types, in order,
/// to the fragment stage.
pub(super) fn create_texture_group_layout(
    device: &wgpu::Device,
    label: &str,
    sample_types: &[wgpu::TextureSampleType],
) -> wgpu::BindGroupLayout {
    let entries: Vec<_> = (0_u32..)
        .zip(sample_types)
        .map(|(idx, sample_type)| {
            binding::texture_entry(
                idx,
                wgpu::ShaderStages::FRAGMENT,
                *sample_type,
                wgpu::TextureViewDimension::D2,
            )
        })
        .collect();
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(&format!("{label} bind group layout")),
        entries: &entries,
    })
}

/// Creates a bind group with the given textures bound in order.
pub(super) fn create_texture_group(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::BindGroupLayout,
    textures: &[&RenderTexture],
) -> wgpu::BindGroup {
    let entries: Vec<_> = (0_u32..)
        .zip(textures)
        .map(|(idx, texture)| binding::texture_view_binding(idx, texture.view()))
        .collect();
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(&format!("{label} bind group")),
        layout,
        entries: &entries,
    })
}

/// A full-screen triangle drawn into a set of color targets.
#[derive(Debug)]
pub(super) struct FullscreenDraw<'a> {
    pub label: &'a str,
    pub pipeline: &'a wgpu::RenderPipeline,
    /// Cleared before drawing.
    pub targets: &'a [&'a RenderTexture],
    /// Bound from group 1, after the frame group.
    pub bind_groups: &'a [&'a wgpu::BindGroup],
    /// Fragment-stage push constants, if any.
    pub push_constants: &'a [u8],
}

/// Records the given full-screen draw in its own render pass, timed under
/// the name of the given pass.
pub(super) fn record_fullscreen_draw(
    ctx: &mut FrameContext<'_>,
    pass_id: RenderPassID,
    draw: &FullscreenDraw<'_>,
) {
    let color_attachments: Vec<_> = draw
        .targets
        .iter()
        .map(|target| color_attachment(target.view(), true))
        .collect();

    let timestamp_writes = ctx
        .timestamps
        .register_timestamp_writes_for_single_render_pass(Cow::Borrowed(pass_id.name()));
    let mut render_pass = ctx.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(draw.label),
        color_attachments: &color_attachments,
        depth_stencil_attachment: None,
        timestamp_writes,
        occlusion_query_set: None,
    });

    render_pass.set_pipeline(draw.pipeline);
    render_pass.set_bind_group(FRAME_GROUP, &ctx.shared.frame_bind_group, &[]);
    for (idx, bind_group) in (1_u32..).zip(draw.bind_groups) {
        render_pass.set_bind_group(idx, *bind_group, &[]);
    }
    if !draw.push_constants.is_empty() {
        render_pass.set_push_constants(wgpu::ShaderStages::FRAGMENT, 0, draw.push_constants);
    }
    render_pass.draw(0..3, 0..1);
}

/// Draws the selected instances of every batch with mesh buffers. `prepare`
/// is called before each batch is drawn, with the pipeline and push
/// constants to set. Returns the number of draw calls.
pub(super) fn draw_batches(
    render_pass: &mut wgpu::RenderPass<'_>,
    batches: &BatchStorage,
    instance_group: u32,
    selection: InstanceSelection,
    mut prepare: impl FnMut(&mut wgpu::RenderPass<'_>, &GraphicsBatch),
) -> usize {
    let mut n_draws = 0;
    for batch in batches.batches() {
        if batch.is_empty() || batch.index_count() == 0 {
            continue;
        }
        let (Some(mesh), Some(bind_groups)) =
            (batches.mesh_buffers(batch.key().mesh_id), batch.bind_groups())
        else {
            log::warn!("Skipping batch {:?} without GPU resources", batch.key());
            continue;
        };

        prepare(render_pass, batch);

        render_pass.set_bind_group(instance_group, &bind_groups.instance, &[]);
        render_pass.set_vertex_buffer(0, mesh.vertices.buffer().slice(..));
        render_pass.set_index_buffer(mesh.indices.buffer().slice(..), wgpu::IndexFormat::Uint32);

        match selection {
            InstanceSelection::Visible { frame_slot } => {
                let Some(draw_commands) = batch.draw_command_buffer() else {
                    continue;
                };
                render_pass.draw_indexed_indirect(
                    draw_commands,
                    GraphicsBatch::draw_command_offset(frame_slot),
                );
            }
            InstanceSelection::All => {
                let instance_count = u32::try_from(batch.instance_count()).unwrap_or(u32::MAX);
                render_pass.draw_indexed(0..batch.index_count(), 0, 0..instance_count);
            }
        }
        n_draws += 1;
    }
    n_draws
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_names_are_unique() {
        let ids = [
            RenderPassID::Culling,
            RenderPassID::Shadow,
            RenderPassID::GBuffer,
            RenderPassID::Downsample,
            RenderPassID::Voxelization,
            RenderPassID::ConeTracing,
            RenderPassID::DirectLighting,
            RenderPassID::BilateralFiltering,
            RenderPassID::BilateralUpsampling,
            RenderPassID::BilinearUpsampling,
            RenderPassID::LightingApplication,
            RenderPassID::Blit,
        ];
        let mut names: Vec<_> = ids.iter().map(|id| id.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ids.len());
    }

    #[test]
    fn push_constant_range_covers_type() {
        let range = push_constant_range::<[u32; 4]>(wgpu::ShaderStages::COMPUTE);
        assert_eq!(range.range, 0..16);
    }
}
