//! Owner of the renderer and the scene state it consumes.

use crate::{
    geometry::EntityTransform,
    gpu::GraphicsDevice,
    rendering::{Renderer, RenderingConfig},
    scene::{AssetProvider, EntityID, RenderableDescription, SceneDescription, TransformSystem},
};
use anyhow::Result;
use std::sync::Arc;

/// Holds the renderer together with the transforms of every entity, and
/// keeps the two consistent as entities come and go.
#[derive(Debug)]
pub struct Engine {
    renderer: Renderer,
    transforms: TransformSystem,
}

impl Engine {
    /// Creates an engine rendering with the given device and configuration.
    ///
    /// # Errors
    /// See [`Renderer::new`].
    pub fn new(
        graphics_device: Arc<GraphicsDevice>,
        config: &RenderingConfig,
        assets: Box<dyn AssetProvider>,
    ) -> Result<Self> {
        Ok(Self {
            renderer: Renderer::new(graphics_device, config, assets)?,
            transforms: TransformSystem::new(),
        })
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut Renderer {
        &mut self.renderer
    }

    pub fn transforms(&self) -> &TransformSystem {
        &self.transforms
    }

    /// Adds a renderable entity with the given transform.
    ///
    /// # Errors
    /// Returns an error if the renderer rejects the renderable, in which case
    /// the entity is not added.
    pub fn add_entity(
        &mut self,
        entity_id: EntityID,
        transform: EntityTransform,
        renderable: &RenderableDescription,
    ) -> Result<()> {
        self.transforms.set_transform(entity_id, transform);
        let result = self
            .renderer
            .add_component(renderable, entity_id, &self.transforms);
        if result.is_err() {
            self.transforms.remove(entity_id);
        }
        result
    }

    /// Removes the entity and its renderable. The transform is kept if the
    /// renderer fails to remove the renderable.
    ///
    /// # Errors
    /// See [`Renderer::remove_component`].
    pub fn remove_entity(&mut self, entity_id: EntityID) -> Result<()> {
        self.renderer.remove_component(entity_id)?;
        self.transforms.remove(entity_id);
        Ok(())
    }

    /// Applies the given modification to the transform of the entity. The
    /// renderer picks up the change in the next frame. Returns `false` if
    /// the entity does not exist.
    pub fn modify_transform(
        &mut self,
        entity_id: EntityID,
        modify: impl FnOnce(&mut EntityTransform),
    ) -> bool {
        self.transforms.modify_transform(entity_id, modify)
    }

    /// # Errors
    /// See [`Renderer::initialize`].
    pub fn initialize(&mut self, scene: &SceneDescription) -> Result<()> {
        self.renderer.initialize(scene)
    }

    /// Renders a frame with the transforms modified since the previous one.
    ///
    /// # Errors
    /// See [`Renderer::render`].
    pub fn render_frame(&mut self, delta_time_ms: f32) -> Result<()> {
        self.renderer.render(delta_time_ms, &mut self.transforms)
    }

    /// Tears down the renderer. The engine can not render afterwards.
    pub fn shutdown(&mut self) {
        self.renderer.destroy();
    }
}
