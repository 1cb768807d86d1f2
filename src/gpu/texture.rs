//! Textures used as render targets, voxel volumes and material images.

use crate::gpu::GraphicsDevice;
use anyhow::{Result, bail};
use std::{borrow::Cow, collections::HashMap, hash::Hash};

/// A 2D texture that passes render into and later passes sample from.
#[derive(Debug)]
pub struct RenderTexture {
    label: Cow<'static, str>,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

/// A 3D texture with a full mip chain holding one clipmap level of the voxel
/// representation of the scene.
#[derive(Debug)]
pub struct VoxelTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    mip_views: Vec<wgpu::TextureView>,
    resolution: u32,
}

/// A 2D texture array with one layer per material image, all resized to the
/// same layer size.
#[derive(Debug)]
pub struct MaterialTextureArray<K> {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    layer_size: u32,
    allocator: TextureLayerAllocator<K>,
}

/// Assigns texture array layers to image keys. When all layers are taken,
/// allocation wraps around to the first layer, overwriting its image.
#[derive(Clone, Debug)]
pub struct TextureLayerAllocator<K> {
    max_layers: u32,
    next_layer: u32,
    layers: HashMap<K, u32>,
}

/// The samplers shared by the passes.
#[derive(Debug)]
pub struct SamplerSet {
    /// Linear filtering with clamped addressing.
    pub linear: wgpu::Sampler,
    /// Nearest filtering with clamped addressing.
    pub nearest: wgpu::Sampler,
    /// Linear filtering with repeating addressing, for material textures.
    pub repeating: wgpu::Sampler,
    /// Comparison sampler for hardware-filtered shadow map lookups.
    pub shadow_comparison: wgpu::Sampler,
}

impl RenderTexture {
    /// Usage of every render texture: it can be rendered into, sampled and
    /// copied out of.
    pub const USAGE: wgpu::TextureUsages = wgpu::TextureUsages::RENDER_ATTACHMENT
        .union(wgpu::TextureUsages::TEXTURE_BINDING)
        .union(wgpu::TextureUsages::COPY_SRC);

    /// Creates a render texture with the given size and format.
    ///
    /// # Panics
    /// If the width or height is zero.
    pub fn new(
        graphics_device: &GraphicsDevice,
        label: impl Into<Cow<'static, str>>,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    ) -> Self {
        assert!(width > 0 && height > 0, "Render texture must not be empty");
        let label = label.into();
        let texture = graphics_device
            .device()
            .create_texture(&wgpu::TextureDescriptor {
                label: Some(&format!("{label} render texture")),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: Self::USAGE,
                view_formats: &[],
            });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            label,
            texture,
            view,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.texture.format()
    }

    pub fn width(&self) -> u32 {
        self.texture.width()
    }

    pub fn height(&self) -> u32 {
        self.texture.height()
    }
}

impl VoxelTexture {
    /// Format of the voxel radiance (RGB) and opacity (A) volumes.
    pub const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

    /// Creates a cubic voxel texture with the given resolution and number of
    /// mip levels.
    pub fn new(
        graphics_device: &GraphicsDevice,
        label: &str,
        resolution: u32,
        mip_level_count: u32,
    ) -> Self {
        let texture = graphics_device
            .device()
            .create_texture(&wgpu::TextureDescriptor {
                label: Some(&format!("{label} voxel texture")),
                size: wgpu::Extent3d {
                    width: resolution,
                    height: resolution,
                    depth_or_array_layers: resolution,
                },
                mip_level_count,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D3,
                format: Self::FORMAT,
                usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            });

        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&format!("{label} voxel texture view")),
            dimension: Some(wgpu::TextureViewDimension::D3),
            ..Default::default()
        });

        let mip_views = (0..mip_level_count)
            .map(|level| {
                texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some(&format!("{label} voxel texture mip {level} view")),
                    dimension: Some(wgpu::TextureViewDimension::D3),
                    base_mip_level: level,
                    mip_level_count: Some(1),
                    ..Default::default()
                })
            })
            .collect();

        Self {
            texture,
            view,
            mip_views,
            resolution,
        }
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    /// View of the whole mip chain, for sampling.
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    /// View of a single mip level, for storage writes.
    pub fn mip_view(&self, level: usize) -> &wgpu::TextureView {
        &self.mip_views[level]
    }

    pub fn mip_level_count(&self) -> usize {
        self.mip_views.len()
    }

    /// Resolution of the given mip level along each axis.
    pub fn mip_resolution(&self, level: usize) -> u32 {
        (self.resolution >> level).max(1)
    }
}

impl<K: Clone + Eq + Hash> MaterialTextureArray<K> {
    /// Creates a texture array with the given number of square layers.
    ///
    /// # Panics
    /// If `layer_size` or `max_layers` is zero.
    pub fn new(graphics_device: &GraphicsDevice, layer_size: u32, max_layers: u32) -> Self {
        assert!(layer_size > 0 && max_layers > 0);
        let texture = graphics_device
            .device()
            .create_texture(&wgpu::TextureDescriptor {
                label: Some("Material texture array"),
                size: wgpu::Extent3d {
                    width: layer_size,
                    height: layer_size,
                    depth_or_array_layers: max_layers,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Material texture array view"),
            dimension: Some(wgpu::TextureViewDimension::D2Array),
            ..Default::default()
        });
        Self {
            texture,
            view,
            layer_size,
            allocator: TextureLayerAllocator::new(max_layers),
        }
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    /// Returns the layer holding the image with the given key, if it has been
    /// uploaded.
    pub fn layer(&self, key: &K) -> Option<u32> {
        self.allocator.layer(key)
    }

    /// Returns the layer of the image with the given key, uploading it with
    /// `load_image` if it has no layer yet.
    ///
    /// # Errors
    /// Returns an error if `load_image` fails.
    pub fn obtain_layer(
        &mut self,
        graphics_device: &GraphicsDevice,
        key: &K,
        load_image: impl FnOnce() -> Result<image::RgbaImage>,
    ) -> Result<u32> {
        if let Some(layer) = self.allocator.layer(key) {
            return Ok(layer);
        }
        let image = load_image()?;
        let layer = self.allocator.allocate(key.clone());
        self.upload_layer(graphics_device, layer, &image)?;
        Ok(layer)
    }

    fn upload_layer(
        &self,
        graphics_device: &GraphicsDevice,
        layer: u32,
        image: &image::RgbaImage,
    ) -> Result<()> {
        if image.width() == 0 || image.height() == 0 {
            bail!("Tried to upload empty image to material texture array");
        }
        let resized;
        let image = if image.dimensions() == (self.layer_size, self.layer_size) {
            image
        } else {
            resized = image::imageops::resize(
                image,
                self.layer_size,
                self.layer_size,
                image::imageops::FilterType::Triangle,
            );
            &resized
        };

        graphics_device.queue().write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: 0,
                    y: 0,
                    z: layer,
                },
                aspect: wgpu::TextureAspect::All,
            },
            image.as_raw(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * self.layer_size),
                rows_per_image: Some(self.layer_size),
            },
            wgpu::Extent3d {
                width: self.layer_size,
                height: self.layer_size,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }
}

impl<K: Clone + Eq + Hash> TextureLayerAllocator<K> {
    pub fn new(max_layers: u32) -> Self {
        Self {
            max_layers,
            next_layer: 0,
            layers: HashMap::new(),
        }
    }

    pub fn layer(&self, key: &K) -> Option<u32> {
        self.layers.get(key).copied()
    }

    /// Returns the layer of the given key, allocating the next layer if the
    /// key is new. When every layer is taken, a warning is logged and the
    /// allocation wraps around, evicting the previous owner of the layer.
    pub fn allocate(&mut self, key: K) -> u32 {
        if let Some(layer) = self.layers.get(&key) {
            return *layer;
        }

        let layer = self.next_layer;
        if self.layers.len() >= self.max_layers as usize {
            log::warn!(
                "Material texture array is full ({} layers), overwriting layer {layer}",
                self.max_layers
            );
            self.layers.retain(|_, existing| *existing != layer);
        }

        self.layers.insert(key, layer);
        self.next_layer = (self.next_layer + 1) % self.max_layers;
        layer
    }
}

impl SamplerSet {
    pub fn new(graphics_device: &GraphicsDevice) -> Self {
        let device = graphics_device.device();
        let clamped = |filter: wgpu::FilterMode, label: &str| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: filter,
                min_filter: filter,
                mipmap_filter: filter,
                ..Default::default()
            })
        };

        let linear = clamped(wgpu::FilterMode::Linear, "Linear sampler");
        let nearest = clamped(wgpu::FilterMode::Nearest, "Nearest sampler");

        let repeating = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Repeating sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let shadow_comparison = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Shadow comparison sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            compare: Some(wgpu::CompareFunction::LessEqual),
            ..Default::default()
        });

        Self {
            linear,
            nearest,
            repeating,
            shadow_comparison,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layers_are_allocated_in_order() {
        let mut allocator = TextureLayerAllocator::new(4);
        assert_eq!(allocator.allocate("a"), 0);
        assert_eq!(allocator.allocate("b"), 1);
        assert_eq!(allocator.allocate("c"), 2);
    }

    #[test]
    fn allocating_known_key_returns_its_layer() {
        let mut allocator = TextureLayerAllocator::new(4);
        allocator.allocate("a");
        allocator.allocate("b");
        assert_eq!(allocator.allocate("a"), 0);
        assert_eq!(allocator.layer(&"b"), Some(1));
    }

    #[test]
    fn allocation_wraps_around_when_full() {
        let mut allocator = TextureLayerAllocator::new(2);
        allocator.allocate("a");
        allocator.allocate("b");

        assert_eq!(allocator.allocate("c"), 0);
        assert_eq!(allocator.layer(&"a"), None);
        assert_eq!(allocator.layer(&"c"), Some(0));

        assert_eq!(allocator.allocate("d"), 1);
        assert_eq!(allocator.layer(&"b"), None);
    }
}
