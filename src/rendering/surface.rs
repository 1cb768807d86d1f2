//! Offscreen surface the final image is presented to.

use crate::gpu::{GraphicsDevice, buffer, texture::RenderTexture};
use anyhow::{Result, anyhow};
use image::Rgb32FImage;

/// Stands in for a window surface: an 8-bit RGBA texture at the output
/// resolution that the final blit writes and screenshots are read from.
#[derive(Debug)]
pub struct HeadlessSurface {
    texture: RenderTexture,
}

impl HeadlessSurface {
    pub const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

    pub fn new(graphics_device: &GraphicsDevice, (width, height): (u32, u32)) -> Self {
        Self {
            texture: RenderTexture::new(graphics_device, "Surface", width, height, Self::FORMAT),
        }
    }

    pub fn texture(&self) -> &RenderTexture {
        &self.texture
    }

    pub fn width(&self) -> u32 {
        self.texture.width()
    }

    pub fn height(&self) -> u32 {
        self.texture.height()
    }

    /// Copies the surface to the CPU and converts it to linear RGB floats in
    /// [0, 1]. Blocks until every submitted frame has finished.
    ///
    /// # Errors
    /// Returns an error if the readback buffer can not be mapped.
    pub fn take_screenshot(&self, graphics_device: &GraphicsDevice) -> Result<Rgb32FImage> {
        let width = self.width();
        let height = self.height();
        let bytes = read_texture_bytes(graphics_device, self.texture.texture())?;

        let pixels: Vec<f32> = bytes
            .chunks_exact(4)
            .flat_map(|rgba| rgba[..3].iter().map(|&channel| f32::from(channel) / 255.0))
            .collect();

        Rgb32FImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("Surface data does not fill a {width}x{height} image"))
    }
}

/// Number of bytes in a texture row padded to the copy alignment.
fn padded_bytes_per_row(bytes_per_row: u32) -> u32 {
    bytes_per_row.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT
}

/// Reads the texel bytes of a 4-byte-per-texel 2D texture, without row
/// padding.
fn read_texture_bytes(
    graphics_device: &GraphicsDevice,
    texture: &wgpu::Texture,
) -> Result<Vec<u8>> {
    let device = graphics_device.device();
    let size = texture.size();
    let bytes_per_row = 4 * size.width;
    let padded_bytes_per_row = padded_bytes_per_row(bytes_per_row);

    let readback_buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Surface readback buffer"),
        size: u64::from(padded_bytes_per_row) * u64::from(size.height),
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut command_encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Surface readback encoder"),
    });
    command_encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &readback_buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_bytes_per_row),
                rows_per_image: Some(size.height),
            },
        },
        size,
    );
    graphics_device
        .queue()
        .submit(std::iter::once(command_encoder.finish()));

    let buffer_view = buffer::map_buffer_slice_to_cpu(device, readback_buffer.slice(..))?;

    if bytes_per_row == padded_bytes_per_row {
        return Ok(buffer_view.to_vec());
    }

    let mut bytes = Vec::with_capacity((bytes_per_row * size.height) as usize);
    for row in buffer_view.chunks_exact(padded_bytes_per_row as usize) {
        bytes.extend_from_slice(&row[..bytes_per_row as usize]);
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_padding_rounds_up_to_copy_alignment() {
        assert_eq!(padded_bytes_per_row(256), 256);
        assert_eq!(padded_bytes_per_row(4), 256);
        assert_eq!(padded_bytes_per_row(4 * 100), 512);
    }
}
