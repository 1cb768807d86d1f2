//! Mesh and texture assets.

use crate::scene::{MeshData, MeshID};
use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
};

/// Identifies a texture image by the file it is loaded from.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TextureDescriptor {
    pub path: PathBuf,
}

/// Pixel data of a texture in RGBA8 format.
pub type TextureData = image::RgbaImage;

/// Provider of the meshes and texture images referenced by renderable
/// entities.
pub trait AssetProvider: fmt::Debug {
    /// Returns the mesh with the given ID.
    ///
    /// # Errors
    /// Returns an error if the mesh does not exist.
    fn mesh(&self, mesh_id: MeshID) -> Result<MeshData>;

    /// Returns the pixels of the described texture.
    ///
    /// # Errors
    /// Returns an error if the texture can not be loaded.
    fn texture(&self, descriptor: &TextureDescriptor) -> Result<TextureData>;
}

/// Asset provider holding meshes in memory. Textures are loaded from their
/// files on request, unless an image has been registered for the path.
#[derive(Clone, Debug, Default)]
pub struct InMemoryAssets {
    meshes: HashMap<MeshID, MeshData>,
    images: HashMap<TextureDescriptor, TextureData>,
    next_mesh_id: u32,
}

impl TextureDescriptor {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl InMemoryAssets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the given mesh and returns its new ID.
    pub fn add_mesh(&mut self, mesh: MeshData) -> MeshID {
        let mesh_id = MeshID(self.next_mesh_id);
        self.next_mesh_id += 1;
        self.meshes.insert(mesh_id, mesh);
        mesh_id
    }

    /// Registers an image for the given descriptor so that it is not loaded
    /// from file.
    pub fn add_image(&mut self, descriptor: TextureDescriptor, image: TextureData) {
        self.images.insert(descriptor, image);
    }
}

impl AssetProvider for InMemoryAssets {
    fn mesh(&self, mesh_id: MeshID) -> Result<MeshData> {
        self.meshes
            .get(&mesh_id)
            .cloned()
            .ok_or_else(|| anyhow!("Mesh {mesh_id:?} not present in assets"))
    }

    fn texture(&self, descriptor: &TextureDescriptor) -> Result<TextureData> {
        if let Some(image) = self.images.get(descriptor) {
            return Ok(image.clone());
        }
        let image = image::open(&descriptor.path)
            .with_context(|| format!("Could not load texture {}", descriptor.path.display()))?;
        Ok(image.to_rgba8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn added_meshes_get_distinct_ids() {
        let mut assets = InMemoryAssets::new();
        let a = assets.add_mesh(MeshData::create_box(1.0, 1.0, 1.0));
        let b = assets.add_mesh(MeshData::create_rectangle(1.0, 1.0));
        assert_ne!(a, b);
        assert_eq!(assets.mesh(b).unwrap().index_count(), 6);
    }

    #[test]
    fn missing_mesh_is_an_error() {
        assert!(InMemoryAssets::new().mesh(MeshID(3)).is_err());
    }

    #[test]
    fn registered_image_is_used_instead_of_file() {
        let mut assets = InMemoryAssets::new();
        let descriptor = TextureDescriptor::new("does/not/exist.png");
        assets.add_image(descriptor.clone(), image::RgbaImage::new(2, 2));
        assert_eq!(assets.texture(&descriptor).unwrap().dimensions(), (2, 2));
        assert!(assets.texture(&TextureDescriptor::new("missing.png")).is_err());
    }
}
