//! Voxel cone tracing rendering.

pub mod config;
pub mod lighting;
pub mod outputs;
pub mod pass;
pub mod raster;
pub mod resources;
pub mod schedule;
pub mod shader_templates;
pub mod state;
pub mod surface;
pub mod uniform;

pub use config::{
    MAX_DIFFUSE_CONES, MAX_SHADOW_SAMPLES, RenderingConfig, ShadowAlgorithm, UpsamplingMode,
};
pub use pass::{PassOutcome, RenderPassID};
pub use state::RendererState;
pub use uniform::SceneLights;

use crate::{
    batch::{BatchKey, BatchStorage, MaterialRecord},
    geometry::{AxisAlignedBox, ClipmapHierarchy, EntityTransform, PerspectiveCamera},
    gpu::{
        GraphicsDevice,
        query::{TimestampQueryManager, TimingResult},
        shader::ShaderManager,
        sync::{FrameRing, FrameSlot},
    },
    scene::{
        AssetProvider, EntityID, RenderableDescription, SceneDescription, TextureDescriptor,
        TransformSource,
    },
};
use anyhow::{Result, anyhow, bail};
use image::Rgb32FImage;
use nalgebra::{Vector3, vector};
use outputs::PassOutputs;
use pass::{
    BilateralFilteringRenderPass, BilateralUpsamplingRenderPass, BilinearUpsamplingRenderPass,
    BlitPass, DirectLightingRenderPass, DirectionalShadowRenderPass, DownsampleRenderPass,
    FrameContext, FrameInfo, GbufferRenderPass, LightingApplicationRenderPass, RenderPass,
    SetupContext, ViewFrustumCullingPass, VoxelConeTracingRenderPass, VoxelizationRenderPass,
};
use resources::SharedResources;
use schedule::{FrameExecution, PassSchedule};
use state::RendererEvent;
use std::{f32::consts::FRAC_PI_3, sync::Arc};
use surface::HeadlessSurface;
use uniform::FrameUniform;

/// Size of each chunk of the staging belt used for CPU-to-GPU writes.
const STAGING_BELT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Renders a scene with voxel cone traced global illumination into a
/// headless surface.
///
/// The renderer owns its passes and runs them in a fixed order derived from
/// their dependencies. It moves through the states of [`RendererState`]:
/// [`initialize`](Self::initialize) sets up every pass for a scene, the
/// first [`render`](Self::render) starts the frame loop and
/// [`destroy`](Self::destroy) tears everything down.
#[derive(Debug)]
pub struct Renderer {
    graphics_device: Arc<GraphicsDevice>,
    config: RenderingConfig,
    state: RendererState,
    assets: Box<dyn AssetProvider>,
    shader_manager: ShaderManager,
    shared: SharedResources,
    batches: BatchStorage,
    surface: HeadlessSurface,
    passes: Vec<Box<dyn RenderPass>>,
    schedule: PassSchedule,
    blit: BlitPass,
    outputs: PassOutputs,
    clipmaps: Option<ClipmapHierarchy>,
    camera: Option<PerspectiveCamera>,
    lights: Option<SceneLights>,
    frames: FrameRing<FrameSlot>,
    staging_belt: wgpu::util::StagingBelt,
    timestamps: TimestampQueryManager,
    last_execution: FrameExecution,
}

impl Renderer {
    /// Creates a renderer with the given configuration, loading meshes and
    /// textures from `assets`. Invalid configuration values are corrected
    /// with a warning.
    ///
    /// # Errors
    /// Returns an error if the dependencies of the passes do not form a valid
    /// schedule.
    pub fn new(
        graphics_device: Arc<GraphicsDevice>,
        config: &RenderingConfig,
        assets: Box<dyn AssetProvider>,
    ) -> Result<Self> {
        let mut config = config.resolved();
        config.make_compatible_with_device(&graphics_device);

        let passes = create_passes();
        let pass_dependencies: Vec<_> = passes
            .iter()
            .map(|pass| (pass.id(), pass.dependencies()))
            .collect();
        let schedule = PassSchedule::new(&pass_dependencies)?;

        let shared = SharedResources::new(&graphics_device, &config);
        let surface = HeadlessSurface::new(&graphics_device, config.resolution);
        let timestamps = TimestampQueryManager::new(&graphics_device, config.timings_enabled);

        log::info!(
            "Created renderer at {}x{} with downsample factor {}",
            config.resolution.0,
            config.resolution.1,
            config.downsample_factor()
        );

        Ok(Self {
            graphics_device,
            config,
            state: RendererState::Constructed,
            assets,
            shader_manager: ShaderManager::new(),
            shared,
            batches: BatchStorage::new(),
            surface,
            passes,
            schedule,
            blit: BlitPass::new(),
            outputs: PassOutputs::new(),
            clipmaps: None,
            camera: None,
            lights: None,
            frames: FrameRing::new(),
            staging_belt: wgpu::util::StagingBelt::new(STAGING_BELT_CHUNK_SIZE),
            timestamps,
            last_execution: FrameExecution::new(),
        })
    }

    pub fn state(&self) -> RendererState {
        self.state
    }

    pub fn config(&self) -> &RenderingConfig {
        &self.config
    }

    pub fn graphics_device(&self) -> &GraphicsDevice {
        &self.graphics_device
    }

    pub fn batches(&self) -> &BatchStorage {
        &self.batches
    }

    /// The clipmap hierarchy computed at initialization.
    pub fn clipmaps(&self) -> Option<&ClipmapHierarchy> {
        self.clipmaps.as_ref()
    }

    /// What happened to each pass in the last rendered frame.
    pub fn last_execution(&self) -> &FrameExecution {
        &self.last_execution
    }

    /// Registers a renderable for the given entity, placing it in the batch
    /// matching its mesh and material. The entity's transform is taken from
    /// `transforms`, falling back to the identity.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The renderer has been destroyed.
    /// - The entity already has a renderable component.
    /// - The mesh or a texture can not be loaded.
    pub fn add_component(
        &mut self,
        description: &RenderableDescription,
        entity_id: EntityID,
        transforms: &dyn TransformSource,
    ) -> Result<()> {
        self.ensure_alive()?;

        let material = &description.material;
        let key = BatchKey::for_material(description.mesh_id, material);

        let mut obtain_layer = |descriptor: &TextureDescriptor| {
            self.shared
                .material_textures
                .obtain_layer(&self.graphics_device, descriptor, || {
                    self.assets.texture(descriptor)
                })
        };
        let diffuse_layer = material
            .diffuse_texture
            .as_ref()
            .map(&mut obtain_layer)
            .transpose()?;
        let normal_layer = material
            .normal_texture
            .as_ref()
            .map(&mut obtain_layer)
            .transpose()?;

        let transform = transforms.lookup(entity_id).unwrap_or_else(|| {
            log::warn!("Entity {entity_id:?} has no transform, using the identity");
            EntityTransform::identity()
        });

        self.batches.add_instance(
            key,
            |mesh_id| self.assets.mesh(mesh_id),
            entity_id,
            &transform,
            MaterialRecord::new(material, diffuse_layer, normal_layer),
        )
    }

    /// Removes the renderable of the given entity.
    ///
    /// # Errors
    /// Returns an error if the renderer has been destroyed or the entity has
    /// no renderable component.
    pub fn remove_component(&mut self, entity_id: EntityID) -> Result<()> {
        self.ensure_alive()?;
        self.batches.remove_instance(entity_id)
    }

    /// Computes the clipmap hierarchy for the scene and sets up every pass.
    /// The scene bounding box can not be changed afterwards.
    ///
    /// # Errors
    /// Returns an error naming the failing pass if a shader fails to compile,
    /// the device reports a validation error or a required pass output is
    /// missing. The renderer then stays uninitialized.
    pub fn initialize(&mut self, scene: &SceneDescription) -> Result<()> {
        let next_state = self.state.after(RendererEvent::Initialize)?;

        let clipmaps = ClipmapHierarchy::new(
            &scene.aabb,
            self.config.clipmaps.level_count,
            self.config.clipmaps.resolution,
            self.config.clipmaps.coarsest_resolution,
        );
        log::info!(
            "Covering scene with {} clipmap levels",
            clipmaps.level_count()
        );

        let result = with_timing_info_logging!("Setting up render passes"; {
            self.setup_passes(&clipmaps)
        });
        if let Err(error) = result {
            self.outputs.clear();
            return Err(error);
        }

        if self.camera.is_none() {
            self.camera = Some(camera_framing_scene(&scene.aabb, self.aspect_ratio()));
        }
        if self.lights.is_none() {
            self.lights = Some(SceneLights {
                directional: scene.directional_light,
                point_lights: scene.point_lights.clone(),
                ambient: scene.ambient,
            });
        }
        self.clipmaps = Some(clipmaps);
        self.state = next_state;

        log::info!(
            "Renderer initialized with {} compiled shaders",
            self.shader_manager.shader_count()
        );
        Ok(())
    }

    /// Renders a frame, applying the transforms that changed since the last
    /// frame.
    ///
    /// A pass that fails to record is logged and its dependents are skipped
    /// for the frame. The frame is submitted regardless.
    ///
    /// # Errors
    /// Returns an error if the renderer is not initialized or the batches
    /// can not be synchronized with the device.
    pub fn render(
        &mut self,
        delta_time_ms: f32,
        transforms: &mut dyn TransformSource,
    ) -> Result<()> {
        let next_state = self.state.after(RendererEvent::Render)?;
        let scene_aabb = *self
            .clipmaps
            .as_ref()
            .ok_or_else(|| anyhow!("Rendering without clipmaps"))?
            .scene_aabb();

        let frame_index = self.frames.frame_index();
        let frame_slot = self.frames.active_slot();

        with_trace_logging!("Waiting for frame slot {}", frame_slot; {
            self.frames
                .active_mut()
                .wait_and_release(self.graphics_device.device());
        });

        for entity_id in transforms.take_dirty_transform_ids() {
            if !self.batches.has_entity(entity_id) {
                continue;
            }
            if let Some(transform) = transforms.lookup(entity_id) {
                self.batches.update_transform(entity_id, &transform)?;
            }
        }

        let mut encoder =
            self.graphics_device
                .device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Frame command encoder"),
                });

        let (Some(camera), Some(lights)) = (self.camera.as_ref(), self.lights.as_ref()) else {
            bail!("Rendering without camera or lights");
        };
        let frame_uniform = FrameUniform::new(
            camera,
            lights,
            &scene_aabb,
            &self.config,
            frame_index,
            delta_time_ms,
        );
        self.shared.frame_uniform.encode_update_of_bytes_from_offset(
            &self.graphics_device,
            &mut self.staging_belt,
            &mut encoder,
            0,
            bytemuck::bytes_of(&frame_uniform),
        );

        self.batches.reset_draw_commands(frame_slot);
        self.batches.sync_with_device(
            &self.graphics_device,
            &mut encoder,
            &mut self.staging_belt,
            &mut self.frames.active_mut().retired_buffers,
            &self.shared.batch_layouts,
        )?;
        self.staging_belt.finish();

        let mut ctx = FrameContext::new(
            &self.graphics_device,
            encoder,
            self.timestamps.create_timestamp_query_registry(frame_slot),
            &self.batches,
            &self.shared,
            &self.config,
            &self.surface,
            FrameInfo {
                frame_index,
                frame_slot,
                delta_time_ms,
            },
        );

        for &pass_idx in self.schedule.order() {
            let pass = &mut self.passes[pass_idx];
            run_pass(pass.as_mut(), &mut ctx);
        }
        debug_assert!(
            !(ctx.execution.has_executed(RenderPassID::BilateralUpsampling)
                && ctx.execution.has_executed(RenderPassID::BilinearUpsampling)),
            "Both upsampling passes executed in the same frame"
        );

        run_pass(&mut self.blit, &mut ctx);

        let recorded = ctx.finish();
        let submission = self
            .graphics_device
            .queue()
            .submit(std::iter::once(recorded.command_buffer));
        self.frames.active_mut().submission = Some(submission);
        self.staging_belt.recall();

        if self.timestamps.enabled() {
            self.timestamps
                .request_and_poll_results(&self.graphics_device);
        }

        log::trace!(
            "Frame {frame_index}: executed {:?}, skipped {:?}",
            recorded.execution.executed(),
            recorded.execution.skipped()
        );
        self.last_execution = recorded.execution;
        self.frames.advance();
        self.state = next_state;
        Ok(())
    }

    /// Replaces the camera. Its aspect ratio is adjusted to the output
    /// resolution.
    pub fn set_camera(&mut self, mut camera: PerspectiveCamera) {
        camera.set_aspect_ratio(self.aspect_ratio());
        self.camera = Some(camera);
    }

    pub fn set_lights(&mut self, lights: SceneLights) {
        self.lights = Some(lights);
    }

    /// Reads back the image currently on the surface as linear RGB. Blocks
    /// until the GPU is idle.
    ///
    /// # Errors
    /// Returns an error if nothing has been rendered yet or the readback
    /// fails.
    pub fn take_screenshot(&self) -> Result<Rgb32FImage> {
        if self.state != RendererState::Running {
            bail!("Can not take a screenshot when {}", self.state);
        }
        self.surface.take_screenshot(&self.graphics_device)
    }

    /// GPU execution time of each pass in the most recent frame whose
    /// timings have been read back.
    pub fn timings(&self) -> &[TimingResult] {
        self.timestamps.last_timing_results()
    }

    pub fn set_frustum_culling_enabled(&mut self, enabled: bool) {
        self.modify_config(|config| config.passes.frustum_culling = enabled);
    }

    pub fn set_bilateral_filtering_enabled(&mut self, enabled: bool) {
        self.modify_config(|config| config.passes.bilateral_filtering = enabled);
    }

    pub fn set_upsampling_mode(&mut self, mode: UpsamplingMode) {
        self.modify_config(|config| config.passes.upsampling = mode);
    }

    pub fn set_shadow_algorithm(&mut self, algorithm: ShadowAlgorithm) {
        self.modify_config(|config| config.shadows.algorithm = algorithm);
    }

    pub fn set_shadow_sample_count(&mut self, sample_count: u32) {
        self.modify_config(|config| config.shadows.sample_count = sample_count);
    }

    pub fn set_shadow_bias(&mut self, bias: f32) {
        self.modify_config(|config| config.shadows.bias = bias);
    }

    pub fn set_diffuse_cone_count(&mut self, count: usize) {
        self.modify_config(|config| config.cones.diffuse_count = count);
    }

    pub fn set_diffuse_cone_aperture(&mut self, aperture: f32) {
        self.modify_config(|config| config.cones.diffuse_aperture = aperture);
    }

    pub fn set_specular_aperture_scale(&mut self, scale: f32) {
        self.modify_config(|config| config.cones.specular_aperture_scale = scale);
    }

    /// Whether the scene is voxelized every frame instead of only once.
    pub fn set_always_voxelize(&mut self, always_voxelize: bool) {
        self.modify_config(|config| config.passes.always_voxelize = always_voxelize);
    }

    pub fn set_direct_lighting_enabled(&mut self, enabled: bool) {
        self.modify_config(|config| config.passes.direct_lighting = enabled);
    }

    pub fn set_lighting_application_enabled(&mut self, enabled: bool) {
        self.modify_config(|config| config.passes.lighting_application = enabled);
    }

    /// Enables or disables GPU timing of the passes. Has no effect if the
    /// device does not support timestamp queries.
    pub fn set_timings_enabled(&mut self, enabled: bool) {
        self.timestamps.set_enabled(enabled);
        let enabled = self.timestamps.enabled();
        self.modify_config(|config| config.timings_enabled = enabled);
    }

    /// Waits for the GPU to finish, then tears down the passes in reverse
    /// order and releases every retired buffer. Any later use of the
    /// renderer is an error.
    pub fn destroy(&mut self) {
        if self.state == RendererState::Destroyed {
            return;
        }
        self.graphics_device.device().poll(wgpu::Maintain::Wait);

        self.outputs.clear();
        log::debug!("Tearing down {} pass", self.blit.id());
        self.blit = BlitPass::new();
        while let Some(pass) = self.passes.pop() {
            log::debug!("Tearing down {} pass", pass.id());
            drop(pass);
        }
        for slot in self.frames.slots_mut() {
            slot.wait_and_release(self.graphics_device.device());
        }

        self.state = RendererState::Destroyed;
        log::info!("Renderer destroyed");
    }

    fn setup_passes(&mut self, clipmaps: &ClipmapHierarchy) -> Result<()> {
        let mut ctx = SetupContext {
            graphics_device: &self.graphics_device,
            shader_manager: &mut self.shader_manager,
            outputs: &mut self.outputs,
            shared: &self.shared,
            config: &self.config,
            clipmaps,
            surface: &self.surface,
        };

        for &pass_idx in self.schedule.order() {
            setup_pass(self.passes[pass_idx].as_mut(), &mut ctx)?;
        }
        setup_pass(&mut self.blit, &mut ctx)
    }

    fn modify_config(&mut self, modify: impl FnOnce(&mut RenderingConfig)) {
        let mut config = self.config.clone();
        modify(&mut config);
        self.config = config.resolved();
    }

    fn aspect_ratio(&self) -> f32 {
        let (width, height) = self.config.resolution;
        width as f32 / height as f32
    }

    fn ensure_alive(&self) -> Result<()> {
        if !self.state.is_alive() {
            bail!("Renderer has been destroyed");
        }
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Every pass except the blit, in registration order.
fn create_passes() -> Vec<Box<dyn RenderPass>> {
    vec![
        Box::new(ViewFrustumCullingPass::new()),
        Box::new(DirectionalShadowRenderPass::new()),
        Box::new(GbufferRenderPass::new()),
        Box::new(DownsampleRenderPass::new()),
        Box::new(VoxelizationRenderPass::new()),
        Box::new(VoxelConeTracingRenderPass::new()),
        Box::new(DirectLightingRenderPass::new()),
        Box::new(BilateralFilteringRenderPass::new()),
        Box::new(BilateralUpsamplingRenderPass::new()),
        Box::new(BilinearUpsamplingRenderPass::new()),
        Box::new(LightingApplicationRenderPass::new()),
    ]
}

/// Sets up a pass, turning any validation error it triggers into a setup
/// failure naming the pass.
fn setup_pass(pass: &mut dyn RenderPass, ctx: &mut SetupContext<'_>) -> Result<()> {
    let id = pass.id();
    let graphics_device = ctx.graphics_device;
    log::debug!("Setting up {id} pass");
    graphics_device
        .with_validation_error_capture(id.name(), || pass.setup(ctx))
        .inspect_err(|error| log::error!("Setup of the {id} pass failed: {error:#}"))
}

/// Runs a pass unless one of its dependencies failed this frame, and makes
/// sure the ambient raster state is in effect afterwards.
fn run_pass(pass: &mut dyn RenderPass, ctx: &mut FrameContext<'_>) {
    let id = pass.id();
    if ctx.execution.is_blocked(pass.dependencies()) {
        log::debug!("Skipping {id} pass after a failed dependency");
        ctx.execution.record_blocked(id);
        return;
    }

    match with_trace_logging!("Recording {} pass", id; pass.render(ctx)) {
        Ok(outcome) => ctx.execution.record_outcome(id, outcome),
        Err(error) => {
            log::error!("{id} pass failed: {error:#}");
            ctx.execution.record_failure(id);
        }
    }

    if ctx.restore_ambient_raster_state() {
        log::error!("{id} pass left a non-ambient raster state in effect, restored it");
    }
}

/// A camera looking at the center of the scene from above and in front,
/// far enough away to see all of it.
fn camera_framing_scene(scene_aabb: &AxisAlignedBox, aspect_ratio: f32) -> PerspectiveCamera {
    let center = scene_aabb.center();
    let distance = 1.5 * scene_aabb.half_diagonal().max(1e-3);
    let eye = center + distance * vector![0.0, 0.5, 1.0].normalize();
    PerspectiveCamera::look_at(
        eye,
        center,
        Vector3::y(),
        FRAC_PI_3,
        aspect_ratio,
        1e-2 * distance,
        4.0 * distance,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::point;

    #[test]
    fn registered_passes_run_in_registration_order() {
        let passes = create_passes();
        let dependencies: Vec<_> = passes
            .iter()
            .map(|pass| (pass.id(), pass.dependencies()))
            .collect();
        let schedule = PassSchedule::new(&dependencies).unwrap();

        let ordered_ids: Vec<_> = schedule.order().iter().map(|&idx| passes[idx].id()).collect();
        assert_eq!(
            ordered_ids,
            [
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
            ]
        );
    }

    #[test]
    fn no_registered_pass_depends_on_blit() {
        for pass in create_passes() {
            assert!(!pass.dependencies().contains(&RenderPassID::Blit));
        }
    }

    #[test]
    fn camera_framing_scene_sees_scene_center() {
        let aabb = AxisAlignedBox::new(point![-1.0, 0.0, -2.0], point![3.0, 2.0, 2.0]);
        let camera = camera_framing_scene(&aabb, 16.0 / 9.0);

        let clip = camera.view_projection_matrix() * aabb.center().to_homogeneous();
        let ndc = clip.xyz() / clip.w;
        assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }

    #[test]
    fn camera_framing_scene_sees_every_corner() {
        let aabb = AxisAlignedBox::new(point![0.0, 0.0, 0.0], point![10.0, 1.0, 10.0]);
        let camera = camera_framing_scene(&aabb, 1.0);
        let view_projection = camera.view_projection_matrix();

        for corner in [aabb.lower_corner(), aabb.upper_corner()] {
            let clip = view_projection * corner.to_homogeneous();
            assert!(clip.w > 0.0);
            let ndc = clip.xyz() / clip.w;
            assert!(ndc.z >= 0.0 && ndc.z <= 1.0);
        }
    }
}
