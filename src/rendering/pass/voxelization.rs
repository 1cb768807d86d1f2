//! Voxelization of the scene into the clipmap hierarchy.

use crate::{
    batch::ShaderConfiguration,
    geometry::{
        Axis, ClipmapHierarchy, ClipmapLevel, MAX_CLIPMAP_LEVELS, orthographic_projection_along,
    },
    gpu::{
        binding,
        buffer::{GPUBuffer, GPUBufferType},
        texture::{RenderTexture, VoxelTexture},
    },
    rendering::{
        outputs::PassOutput,
        pass::{
            FrameContext, InstanceSelection, PassOutcome, RenderPass, RenderPassID,
            SetupContext, ShadowOutput, color_attachment, create_compute_pipeline,
            create_mesh_pipeline, create_pipeline_layout, draw_batches, push_constant_range,
        },
        raster::RasterState,
        resources::FRAME_GROUP,
        shader_templates::SpecificShaderTemplate,
    },
};
use anyhow::{Result, anyhow, bail};
use bytemuck::{Pod, Zeroable};
use nalgebra::Vector3;
use std::{borrow::Cow, collections::HashMap, mem, sync::Arc};

/// Edge length of the cubic workgroups of the resolve and mipmap shaders.
const WORKGROUP_SIZE: u32 = 4;

/// Bytes of accumulation storage per voxel: three fixed-point radiance sums
/// and a fragment count.
const VOXEL_ACCUMULATOR_SIZE: u64 = 4 * mem::size_of::<u32>() as u64;

/// Format of the attachment the voxelization render passes need but never
/// write.
const DUMMY_TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R8Unorm;

/// Voxelizes every instance into each clipmap level.
///
/// Each level is rasterized three times, looking along each axis at the
/// level's cube, and every fragment only counts along the axis its face is
/// most aligned with. Fragments are shaded with the directional light and
/// shadow map and summed into a per-level accumulation buffer with atomic
/// adds. A compute pass then averages the sums into the level's 3D texture
/// and builds its mip chain.
///
/// Unless voxelization is forced every frame, the result of the first
/// voxelization of a non-empty scene is kept.
#[derive(Debug, Default)]
pub struct VoxelizationRenderPass {
    resources: Option<VoxelizationResources>,
    voxelized: bool,
}

#[derive(Debug)]
struct VoxelizationResources {
    pipelines: HashMap<ShaderConfiguration, wgpu::RenderPipeline>,
    resolve_pipeline: wgpu::ComputePipeline,
    mipmap_pipeline: wgpu::ComputePipeline,
    dummy_target: RenderTexture,
    levels: Vec<LevelResources>,
    output: Arc<VoxelOutput>,
}

#[derive(Debug)]
struct LevelResources {
    accumulator: GPUBuffer,
    voxelization_bind_group: wgpu::BindGroup,
    resolve_bind_group: wgpu::BindGroup,
    /// One bind group per mip above the first, reading the mip below.
    mipmap_bind_groups: Vec<wgpu::BindGroup>,
}

/// The voxelized clipmaps, read by cone tracing.
#[derive(Debug)]
pub struct VoxelOutput {
    /// One texture per clipmap level, finest first, with radiance in RGB and
    /// opacity in A.
    pub clipmaps: Vec<Arc<VoxelTexture>>,
    /// Uniform buffer holding a [`ClipmapUniform`].
    pub clipmap_uniform: GPUBuffer,
    pub hierarchy: ClipmapHierarchy,
}

impl PassOutput for VoxelOutput {
    const NAME: &'static str = "voxel clipmaps";
    const PRODUCER: RenderPassID = RenderPassID::Voxelization;
}

/// Placement of one clipmap level's voxel grid, as laid out for shaders.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Zeroable, Pod)]
pub struct ClipmapLevelUniform {
    /// Lower corner of the level's cube.
    pub origin: [f32; 3],
    pub voxel_size: f32,
    /// Edge length of the level's cube.
    pub extent: f32,
    pub resolution: u32,
    pub mip_level_count: u32,
    _padding: u32,
}

/// The clipmap hierarchy as laid out for shaders.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Zeroable, Pod)]
pub struct ClipmapUniform {
    pub levels: [ClipmapLevelUniform; MAX_CLIPMAP_LEVELS],
    pub level_count: u32,
    _padding: [u32; 3],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Zeroable, Pod)]
struct VoxelizationPushConstants {
    view_projection: [[f32; 4]; 4],
    origin: [f32; 3],
    voxel_size: f32,
    resolution: u32,
    axis: u32,
    _padding: [u32; 2],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Zeroable, Pod)]
struct GridPushConstants {
    resolution: u32,
}

impl ClipmapLevelUniform {
    pub fn new(level: &ClipmapLevel) -> Self {
        let extent = level.aabb.max_extent();
        let origin = level.aabb.center().coords - Vector3::repeat(0.5 * extent);
        Self {
            origin: origin.into(),
            voxel_size: level.voxel_size(),
            extent,
            resolution: level.resolution,
            mip_level_count: level.mip_level_count(),
            _padding: 0,
        }
    }
}

impl ClipmapUniform {
    pub fn new(hierarchy: &ClipmapHierarchy) -> Self {
        let mut uniform = Self::default();
        for (level_uniform, level) in uniform.levels.iter_mut().zip(hierarchy.levels()) {
            *level_uniform = ClipmapLevelUniform::new(level);
        }
        uniform.level_count = hierarchy.level_count() as u32;
        uniform
    }
}

impl VoxelizationPushConstants {
    fn new(level: &ClipmapLevelUniform, level_aabb_projection: [[f32; 4]; 4], axis: Axis) -> Self {
        Self {
            view_projection: level_aabb_projection,
            origin: level.origin,
            voxel_size: level.voxel_size,
            resolution: level.resolution,
            axis: axis as u32,
            _padding: [0; 2],
        }
    }
}

impl VoxelizationRenderPass {
    pub fn new() -> Self {
        Self::default()
    }

    fn should_voxelize(&self, ctx: &FrameContext<'_>) -> bool {
        ctx.config.passes.always_voxelize || !self.voxelized
    }
}

impl RenderPass for VoxelizationRenderPass {
    fn id(&self) -> RenderPassID {
        RenderPassID::Voxelization
    }

    fn dependencies(&self) -> &'static [RenderPassID] {
        &[RenderPassID::Shadow]
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        let shadow = ctx.outputs.get::<ShadowOutput>()?;
        let hierarchy = ctx.clipmaps.clone();
        let device = ctx.graphics_device.device();

        let max_binding_size = u64::from(device.limits().max_storage_buffer_binding_size);
        for (level_idx, level) in hierarchy.levels().iter().enumerate() {
            let size = accumulator_size(level.resolution);
            if size > max_binding_size {
                bail!(
                    "Voxel buffer of clipmap level {level_idx} needs {size} bytes, \
                     but the graphics device only allows {max_binding_size}"
                );
            }
        }

        let voxel_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Voxelization bind group layout"),
            entries: &[
                binding::storage_buffer_entry(0, wgpu::ShaderStages::FRAGMENT, false),
                binding::texture_entry(
                    1,
                    wgpu::ShaderStages::FRAGMENT,
                    wgpu::TextureSampleType::Depth,
                    wgpu::TextureViewDimension::D2,
                ),
            ],
        });
        let resolve_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Voxel resolve bind group layout"),
            entries: &[
                binding::storage_buffer_entry(0, wgpu::ShaderStages::COMPUTE, true),
                binding::storage_texture_entry(
                    1,
                    wgpu::ShaderStages::COMPUTE,
                    VoxelTexture::FORMAT,
                    wgpu::TextureViewDimension::D3,
                ),
            ],
        });
        let mipmap_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Voxel mipmap bind group layout"),
            entries: &[
                binding::texture_entry(
                    0,
                    wgpu::ShaderStages::COMPUTE,
                    wgpu::TextureSampleType::Float { filterable: false },
                    wgpu::TextureViewDimension::D3,
                ),
                binding::storage_texture_entry(
                    1,
                    wgpu::ShaderStages::COMPUTE,
                    VoxelTexture::FORMAT,
                    wgpu::TextureViewDimension::D3,
                ),
            ],
        });

        let raster_layout = create_pipeline_layout(
            device,
            "Voxelization",
            &[
                &ctx.shared.frame_layout,
                &ctx.shared.batch_layouts.instance,
                &ctx.shared.material_layout,
                &voxel_layout,
            ],
            &[push_constant_range::<VoxelizationPushConstants>(
                wgpu::ShaderStages::VERTEX_FRAGMENT,
            )],
        );
        let grid_push_constants =
            [push_constant_range::<GridPushConstants>(wgpu::ShaderStages::COMPUTE)];
        let resolve_pipeline_layout = create_pipeline_layout(
            device,
            "Voxel resolve",
            &[&ctx.shared.frame_layout, &resolve_layout],
            &grid_push_constants,
        );
        let mipmap_pipeline_layout = create_pipeline_layout(
            device,
            "Voxel mipmap",
            &[&ctx.shared.frame_layout, &mipmap_layout],
            &grid_push_constants,
        );

        let raster_state = RasterState::VOXELIZATION;
        let color_targets = [raster_state.color_target(DUMMY_TARGET_FORMAT)];
        let mut pipelines = HashMap::with_capacity(2);
        for (configuration, flags) in [
            (ShaderConfiguration::empty(), &[][..]),
            (ShaderConfiguration::DIFFUSE_TEXTURE, &["DIFFUSE_TEXTURE"][..]),
        ] {
            let module = ctx.compile_shader(SpecificShaderTemplate::Voxelization, flags, &[])?;
            let pipeline = create_mesh_pipeline(
                ctx.graphics_device.device(),
                &format!("Voxelization {configuration:?}"),
                &raster_layout,
                &module,
                &color_targets,
                raster_state.depth_stencil_state(
                    wgpu::TextureFormat::Depth32Float,
                    wgpu::DepthBiasState::default(),
                ),
                &raster_state,
            );
            pipelines.insert(configuration, pipeline);
        }

        let workgroup_size = shader_template_replacements!("workgroup_size" => WORKGROUP_SIZE);
        let resolve_module =
            ctx.compile_shader(SpecificShaderTemplate::VoxelResolve, &[], workgroup_size)?;
        let mipmap_module =
            ctx.compile_shader(SpecificShaderTemplate::VoxelMipmap, &[], workgroup_size)?;
        let device = ctx.graphics_device.device();
        let resolve_pipeline = create_compute_pipeline(
            device,
            "Voxel resolve",
            &resolve_pipeline_layout,
            &resolve_module,
        );
        let mipmap_pipeline = create_compute_pipeline(
            device,
            "Voxel mipmap",
            &mipmap_pipeline_layout,
            &mipmap_module,
        );

        let mut clipmaps = Vec::with_capacity(hierarchy.level_count());
        let mut levels = Vec::with_capacity(hierarchy.level_count());

        for (level_idx, level) in hierarchy.levels().iter().enumerate() {
            let texture = Arc::new(VoxelTexture::new(
                ctx.graphics_device,
                &format!("Clipmap level {level_idx}"),
                level.resolution,
                level.mip_level_count(),
            ));

            let accumulator = GPUBuffer::new_uninitialized(
                ctx.graphics_device,
                accumulator_size(level.resolution) as usize,
                GPUBufferType::Storage.usage(),
                Cow::Owned(format!("Clipmap level {level_idx} voxel accumulator")),
            );

            let voxelization_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("Voxelization level {level_idx} bind group")),
                layout: &voxel_layout,
                entries: &[
                    accumulator.create_bind_group_entry(0),
                    binding::texture_view_binding(1, shadow.shadow_map.view()),
                ],
            });
            let resolve_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("Voxel resolve level {level_idx} bind group")),
                layout: &resolve_layout,
                entries: &[
                    accumulator.create_bind_group_entry(0),
                    binding::texture_view_binding(1, texture.mip_view(0)),
                ],
            });
            let mipmap_bind_groups = (1..texture.mip_level_count())
                .map(|mip| {
                    device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some(&format!(
                            "Voxel mipmap level {level_idx} mip {mip} bind group"
                        )),
                        layout: &mipmap_layout,
                        entries: &[
                            binding::texture_view_binding(0, texture.mip_view(mip - 1)),
                            binding::texture_view_binding(1, texture.mip_view(mip)),
                        ],
                    })
                })
                .collect();

            log::debug!(
                "Clipmap level {level_idx}: {}^3 voxels of size {:.3}, {} mips",
                level.resolution,
                level.voxel_size(),
                texture.mip_level_count()
            );

            clipmaps.push(texture);
            levels.push(LevelResources {
                accumulator,
                voxelization_bind_group,
                resolve_bind_group,
                mipmap_bind_groups,
            });
        }

        let max_resolution = hierarchy
            .levels()
            .iter()
            .map(|level| level.resolution)
            .max()
            .unwrap_or(1);
        let dummy_target = RenderTexture::new(
            ctx.graphics_device,
            "Voxelization target",
            max_resolution,
            max_resolution,
            DUMMY_TARGET_FORMAT,
        );

        let clipmap_uniform = GPUBuffer::new_initialized(
            ctx.graphics_device,
            bytemuck::bytes_of(&ClipmapUniform::new(&hierarchy)),
            0,
            GPUBufferType::Uniform.usage(),
            Cow::Borrowed("Clipmap uniform"),
        );

        let output = ctx.outputs.publish(VoxelOutput {
            clipmaps,
            clipmap_uniform,
            hierarchy,
        })?;

        self.resources = Some(VoxelizationResources {
            pipelines,
            resolve_pipeline,
            mipmap_pipeline,
            dummy_target,
            levels,
            output,
        });
        self.voxelized = false;
        Ok(())
    }

    fn render(&mut self, ctx: &mut FrameContext<'_>) -> Result<PassOutcome> {
        if !self.should_voxelize(ctx) {
            return Ok(PassOutcome::Skipped);
        }
        let resources = self
            .resources
            .as_ref()
            .ok_or_else(|| anyhow!("Voxelization pass used before setup"))?;

        for level in &resources.levels {
            ctx.encoder.clear_buffer(level.accumulator.buffer(), 0, None);
        }

        let hierarchy = &resources.output.hierarchy;
        for ((level_idx, level), level_resources) in
            hierarchy.levels().iter().enumerate().zip(&resources.levels)
        {
            let level_uniform = ClipmapLevelUniform::new(level);
            let raster_state =
                RasterState::VOXELIZATION.with_viewport(level.resolution, level.resolution);

            ctx.with_raster_state(raster_state, |ctx, raster_state| {
                let timestamp_writes = ctx
                    .timestamps
                    .register_timestamp_writes_for_single_render_pass(Cow::Owned(format!(
                        "{} (level {level_idx})",
                        RenderPassID::Voxelization.name()
                    )));
                let mut render_pass = ctx.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Voxelization render pass"),
                    color_attachments: &[color_attachment(resources.dummy_target.view(), true)],
                    depth_stencil_attachment: None,
                    timestamp_writes,
                    occlusion_query_set: None,
                });

                raster_state.apply_viewport(&mut render_pass);
                render_pass.set_bind_group(FRAME_GROUP, &ctx.shared.frame_bind_group, &[]);
                render_pass.set_bind_group(2, &ctx.shared.material_bind_group, &[]);
                render_pass.set_bind_group(3, &level_resources.voxelization_bind_group, &[]);

                for axis in Axis::ALL {
                    let push_constants = VoxelizationPushConstants::new(
                        &level_uniform,
                        orthographic_projection_along(&level.aabb, axis).into(),
                        axis,
                    );
                    draw_batches(
                        &mut render_pass,
                        ctx.batches,
                        1,
                        InstanceSelection::All,
                        |render_pass, batch| {
                            let configuration = batch.key().configuration
                                & ShaderConfiguration::DIFFUSE_TEXTURE;
                            if let Some(pipeline) = resources.pipelines.get(&configuration) {
                                render_pass.set_pipeline(pipeline);
                            }
                            render_pass.set_push_constants(
                                wgpu::ShaderStages::VERTEX_FRAGMENT,
                                0,
                                bytemuck::bytes_of(&push_constants),
                            );
                        },
                    );
                }
                Ok(())
            })?;
        }

        let timestamp_writes = ctx.timestamps.register_timestamp_writes_for_single_compute_pass(
            Cow::Borrowed("Voxel resolve and mipmapping"),
        );
        let mut compute_pass = ctx.encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Voxel resolve and mipmap pass"),
            timestamp_writes,
        });
        compute_pass.set_bind_group(FRAME_GROUP, &ctx.shared.frame_bind_group, &[]);

        for (texture, level_resources) in resources.output.clipmaps.iter().zip(&resources.levels) {
            compute_pass.set_pipeline(&resources.resolve_pipeline);
            dispatch_grid(
                &mut compute_pass,
                &level_resources.resolve_bind_group,
                texture.mip_resolution(0),
            );

            compute_pass.set_pipeline(&resources.mipmap_pipeline);
            for (mip, bind_group) in (1..).zip(&level_resources.mipmap_bind_groups) {
                dispatch_grid(&mut compute_pass, bind_group, texture.mip_resolution(mip));
            }
        }
        drop(compute_pass);

        if ctx.batches.instance_count() > 0 {
            self.voxelized = true;
        }
        Ok(PassOutcome::Executed)
    }
}

/// Dispatches enough workgroups to cover a cubic grid with the given
/// resolution.
fn dispatch_grid(
    compute_pass: &mut wgpu::ComputePass<'_>,
    bind_group: &wgpu::BindGroup,
    resolution: u32,
) {
    compute_pass.set_bind_group(1, bind_group, &[]);
    compute_pass.set_push_constants(0, bytemuck::bytes_of(&GridPushConstants { resolution }));
    let n_groups = resolution.div_ceil(WORKGROUP_SIZE);
    compute_pass.dispatch_workgroups(n_groups, n_groups, n_groups);
}

fn accumulator_size(resolution: u32) -> u64 {
    u64::from(resolution).pow(3) * VOXEL_ACCUMULATOR_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::AxisAlignedBox;
    use approx::assert_abs_diff_eq;
    use nalgebra::point;

    fn hierarchy() -> ClipmapHierarchy {
        ClipmapHierarchy::new(
            &AxisAlignedBox::new(point![-4.0, -2.0, -4.0], point![4.0, 2.0, 4.0]),
            3,
            64,
            32,
        )
    }

    #[test]
    fn uniform_layouts_match_shader_structs() {
        assert_eq!(mem::size_of::<ClipmapLevelUniform>(), 32);
        assert_eq!(mem::size_of::<ClipmapUniform>(), 144);
        assert_eq!(mem::size_of::<VoxelizationPushConstants>(), 96);
    }

    #[test]
    fn level_uniform_describes_cube_around_level_center() {
        let hierarchy = hierarchy();
        let coarsest = ClipmapLevelUniform::new(&hierarchy.levels()[2]);
        assert_abs_diff_eq!(coarsest.extent, 8.0);
        assert_abs_diff_eq!(coarsest.origin[0], -4.0);
        assert_abs_diff_eq!(coarsest.origin[1], -4.0);
        assert_abs_diff_eq!(coarsest.voxel_size, 8.0 / 32.0);
        assert_eq!(coarsest.resolution, 32);
        assert_eq!(coarsest.mip_level_count, 6);
    }

    #[test]
    fn clipmap_uniform_fills_only_existing_levels() {
        let uniform = ClipmapUniform::new(&hierarchy());
        assert_eq!(uniform.level_count, 3);
        assert_eq!(uniform.levels[3], ClipmapLevelUniform::default());
        assert!(uniform.levels[0].voxel_size < uniform.levels[1].voxel_size);
    }

    #[test]
    fn accumulator_holds_four_words_per_voxel() {
        assert_eq!(accumulator_size(2), 8 * 16);
        assert_eq!(accumulator_size(128), 128 * 128 * 128 * 16);
    }
}
