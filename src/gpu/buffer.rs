//! Fixed-size GPU buffers.

use crate::gpu::GraphicsDevice;
use anyhow::{Result, anyhow};
use parking_lot::Mutex;
use std::{borrow::Cow, sync::Arc};
use wgpu::util::DeviceExt;

/// A GPU buffer of fixed size. Every buffer can be written from the CPU.
#[derive(Debug)]
pub struct GPUBuffer {
    buffer: wgpu::Buffer,
    buffer_size: usize,
    label: Cow<'static, str>,
}

/// What a GPU buffer is used for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GPUBufferType {
    Vertex,
    Index,
    Uniform,
    Storage,
    /// Destination of a copy that is mapped for reading on the CPU.
    Result,
    /// Destination of resolved queries.
    Query,
}

impl GPUBuffer {
    /// Creates a GPU buffer holding the given bytes, zero-padded to at least
    /// `min_size` bytes.
    ///
    /// # Panics
    /// If both `bytes` and `min_size` are empty.
    pub fn new_initialized(
        graphics_device: &GraphicsDevice,
        bytes: &[u8],
        min_size: usize,
        usage: wgpu::BufferUsages,
        label: Cow<'static, str>,
    ) -> Self {
        let buffer_size = bytes.len().max(min_size);
        assert_ne!(buffer_size, 0, "Tried to create empty {label} buffer");

        let padded_bytes;
        let contents = if bytes.len() == buffer_size {
            bytes
        } else {
            let mut padded = vec![0; buffer_size];
            padded[..bytes.len()].copy_from_slice(bytes);
            padded_bytes = padded;
            &padded_bytes
        };

        let buffer = graphics_device
            .device()
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label.as_ref()),
                contents,
                usage: usage | wgpu::BufferUsages::COPY_DST,
            });

        Self {
            buffer,
            buffer_size,
            label,
        }
    }

    /// Creates a GPU buffer of the given size with unspecified contents.
    ///
    /// # Panics
    /// If `buffer_size` is zero.
    pub fn new_uninitialized(
        graphics_device: &GraphicsDevice,
        buffer_size: usize,
        usage: wgpu::BufferUsages,
        label: Cow<'static, str>,
    ) -> Self {
        assert_ne!(buffer_size, 0, "Tried to create empty {label} buffer");

        let buffer = graphics_device
            .device()
            .create_buffer(&wgpu::BufferDescriptor {
                label: Some(label.as_ref()),
                size: buffer_size as u64,
                usage: usage | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });

        Self {
            buffer,
            buffer_size,
            label,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Size of the buffer in bytes.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Encodes a write of the given bytes at the given byte offset through
    /// the staging belt. The write is ordered with the other commands in the
    /// encoder.
    ///
    /// # Panics
    /// If the written region extends past the end of the buffer.
    pub fn encode_update_of_bytes_from_offset(
        &self,
        graphics_device: &GraphicsDevice,
        staging_belt: &mut wgpu::util::StagingBelt,
        command_encoder: &mut wgpu::CommandEncoder,
        byte_offset: usize,
        updated_bytes: &[u8],
    ) {
        let Some(write_size) = wgpu::BufferSize::new(updated_bytes.len() as u64) else {
            return;
        };
        self.assert_fits(byte_offset, updated_bytes.len());

        staging_belt
            .write_buffer(
                command_encoder,
                &self.buffer,
                byte_offset as wgpu::BufferAddress,
                write_size,
                graphics_device.device(),
            )
            .copy_from_slice(updated_bytes);
    }

    /// Queues a write of the given bytes to the beginning of the buffer. The
    /// write happens before any command submitted after this call.
    ///
    /// # Panics
    /// If the bytes do not fit in the buffer.
    pub fn queue_update_of_first_bytes(
        &self,
        graphics_device: &GraphicsDevice,
        updated_bytes: &[u8],
    ) {
        self.assert_fits(0, updated_bytes.len());
        if !updated_bytes.is_empty() {
            graphics_device
                .queue()
                .write_buffer(&self.buffer, 0, updated_bytes);
        }
    }

    /// Creates a bind group entry for the whole buffer at the given binding.
    pub fn create_bind_group_entry(&self, binding: u32) -> wgpu::BindGroupEntry<'_> {
        wgpu::BindGroupEntry {
            binding,
            resource: self.buffer.as_entire_binding(),
        }
    }

    fn assert_fits(&self, byte_offset: usize, byte_count: usize) {
        assert!(
            byte_offset
                .checked_add(byte_count)
                .is_some_and(|end| end <= self.buffer_size),
            "Writing {byte_count} bytes at offset {byte_offset} overflows the {} buffer of {} bytes",
            self.label,
            self.buffer_size
        );
    }
}

impl GPUBufferType {
    /// The [`wgpu::BufferUsages`] a buffer of this type is created with, in
    /// addition to `COPY_DST`.
    pub fn usage(self) -> wgpu::BufferUsages {
        match self {
            Self::Vertex => wgpu::BufferUsages::VERTEX,
            Self::Index => wgpu::BufferUsages::INDEX,
            Self::Uniform => wgpu::BufferUsages::UNIFORM,
            Self::Storage => wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            Self::Result => wgpu::BufferUsages::MAP_READ,
            Self::Query => wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
        }
    }
}

/// Maps the given buffer slice for reading, blocking until the mapping is
/// complete, and returns the mapped view.
///
/// # Errors
/// Returns an error if the mapping fails.
pub fn map_buffer_slice_to_cpu<'a>(
    device: &wgpu::Device,
    buffer_slice: wgpu::BufferSlice<'a>,
) -> Result<wgpu::BufferView<'a>> {
    let map_result = Arc::new(Mutex::new(None));
    let map_result_sender = Arc::clone(&map_result);

    buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
        *map_result_sender.lock() = Some(result);
    });

    device.poll(wgpu::Maintain::Wait);

    map_result
        .lock()
        .take()
        .ok_or_else(|| anyhow!("Buffer mapping did not complete"))??;

    Ok(buffer_slice.get_mapped_range())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mappable_buffer_types_are_not_used_by_shaders() {
        let result = GPUBufferType::Result.usage();
        assert!(result.contains(wgpu::BufferUsages::MAP_READ));
        assert!(!result.intersects(
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::VERTEX
        ));
    }

    #[test]
    fn query_buffers_can_be_copied_to_result_buffers() {
        assert!(GPUBufferType::Query.usage().contains(wgpu::BufferUsages::COPY_SRC));
    }
}
