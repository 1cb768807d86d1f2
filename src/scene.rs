//! Interfaces to the scene being rendered: entities, transforms, assets and
//! lights.

mod assets;
mod light;
mod mesh;
mod transforms;

pub use assets::{AssetProvider, InMemoryAssets, TextureData, TextureDescriptor};
pub use light::{DirectionalLight, MAX_POINT_LIGHTS, PointLight};
pub use mesh::{MeshData, MeshID, MeshVertex};
pub use transforms::{TransformSource, TransformSystem};

use crate::geometry::AxisAlignedBox;
use nalgebra::Vector3;

/// Identifier for an entity in the scene.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityID(pub u64);

/// Static description of the scene, given to the renderer at
/// initialization. The bounding box is fixed from then on, while the lights
/// can be replaced with [`Renderer::set_lights`](crate::rendering::Renderer::set_lights).
#[derive(Clone, Debug, PartialEq)]
pub struct SceneDescription {
    /// Box enclosing everything that should contribute to global
    /// illumination. The coarsest clipmap level covers exactly this box.
    pub aabb: AxisAlignedBox,
    pub directional_light: DirectionalLight,
    pub point_lights: Vec<PointLight>,
    /// Radiance of the uniform ambient light added where cones escape the
    /// voxelized scene.
    pub ambient: Vector3<f32>,
}

/// How a surface is shaded in the lighting passes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ShadingModel {
    /// Lit by direct and indirect light.
    #[default]
    Lit,
    /// Only emits its emissive color.
    Unlit,
}

/// Material of a renderable entity.
#[derive(Clone, Debug, PartialEq)]
pub struct MaterialDescription {
    pub shading_model: ShadingModel,
    /// Albedo used when there is no diffuse texture, or multiplied with it.
    pub diffuse_color: Vector3<f32>,
    pub diffuse_texture: Option<TextureDescriptor>,
    pub normal_texture: Option<TextureDescriptor>,
    pub roughness: f32,
    pub metallic: f32,
    pub emissive: Vector3<f32>,
}

/// Everything needed to add a renderable component for an entity.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderableDescription {
    pub mesh_id: MeshID,
    pub material: MaterialDescription,
}

impl ShadingModel {
    /// Value written to the shading-model G-buffer target.
    pub fn id(self) -> u32 {
        match self {
            Self::Lit => 1,
            Self::Unlit => 2,
        }
    }
}

impl Default for MaterialDescription {
    fn default() -> Self {
        Self {
            shading_model: ShadingModel::Lit,
            diffuse_color: Vector3::repeat(0.8),
            diffuse_texture: None,
            normal_texture: None,
            roughness: 0.8,
            metallic: 0.0,
            emissive: Vector3::zeros(),
        }
    }
}
