//! GPU buffers with a CPU mirror that grow as elements are added.

use crate::gpu::sync::RetiredBuffers;
use bytemuck::Pod;
use std::{borrow::Cow, marker::PhantomData, mem, ops::Range};

/// Number of elements a growable buffer has room for when created.
pub const INIT_BUFFER_SIZE: usize = 100;

/// A typed GPU buffer kept in lock-step with a CPU-side mirror.
///
/// Every modification is applied to the mirror immediately and recorded as a
/// dirty range. [`Self::flush`] then records the device writes into the
/// frame's command encoder through a staging belt, so every pass encoded
/// after the flush sees contents identical to the mirror.
///
/// When the element count exceeds the capacity, the capacity grows by a
/// factor of at least 1.5. On the next flush a larger device buffer is
/// allocated, the old contents are copied into it on the GPU and the old
/// buffer is retired until the submission using it has completed. The
/// capacity never shrinks.
#[derive(Debug)]
pub struct GrowableDeviceBuffer<T> {
    label: Cow<'static, str>,
    usage: wgpu::BufferUsages,
    mirror: Vec<T>,
    capacity: usize,
    dirty: Option<Range<usize>>,
    device_buffer: Option<wgpu::Buffer>,
    device_capacity: usize,
}

/// A GPU buffer whose contents are produced on the GPU only. It is
/// reallocated, without copying, when a larger size is requested.
#[derive(Debug)]
pub struct ScratchDeviceBuffer<T> {
    label: Cow<'static, str>,
    usage: wgpu::BufferUsages,
    buffer: Option<wgpu::Buffer>,
    capacity: usize,
    _element: PhantomData<T>,
}

/// Returns the capacity following `capacity` when a buffer must grow.
pub fn grown_capacity(capacity: usize) -> usize {
    (capacity + capacity / 2).max(capacity + 1)
}

impl<T: Pod> GrowableDeviceBuffer<T> {
    /// Creates an empty buffer with room for [`INIT_BUFFER_SIZE`] elements.
    /// No device buffer is allocated until the first flush.
    pub fn new(label: impl Into<Cow<'static, str>>, usage: wgpu::BufferUsages) -> Self {
        Self::with_capacity(label, usage, INIT_BUFFER_SIZE)
    }

    /// Creates an empty buffer with room for the given number of elements.
    ///
    /// # Panics
    /// If the element size is not a multiple of the copy alignment.
    pub fn with_capacity(
        label: impl Into<Cow<'static, str>>,
        usage: wgpu::BufferUsages,
        capacity: usize,
    ) -> Self {
        assert_eq!(
            mem::size_of::<T>() as u64 % wgpu::COPY_BUFFER_ALIGNMENT,
            0,
            "Element size must be a multiple of the copy alignment"
        );
        Self {
            label: label.into(),
            usage: usage | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
            mirror: Vec::with_capacity(capacity),
            capacity: capacity.max(1),
            dirty: None,
            device_buffer: None,
            device_capacity: 0,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn len(&self) -> usize {
        self.mirror.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mirror.is_empty()
    }

    /// Number of elements the buffer can hold before it must grow.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the CPU mirror of the buffer contents.
    pub fn as_slice(&self) -> &[T] {
        &self.mirror
    }

    pub fn get(&self, idx: usize) -> Option<&T> {
        self.mirror.get(idx)
    }

    /// Range of elements modified since the last flush.
    pub fn dirty_range(&self) -> Option<Range<usize>> {
        self.dirty.clone()
    }

    /// Returns the device buffer, if it has been allocated.
    pub fn device_buffer(&self) -> Option<&wgpu::Buffer> {
        self.device_buffer.as_ref()
    }

    /// Appends the given element and returns its index.
    pub fn push(&mut self, value: T) -> usize {
        if self.mirror.len() == self.capacity {
            self.capacity = grown_capacity(self.capacity);
            log::debug!("Growing {} buffer to {} elements", self.label, self.capacity);
        }
        let idx = self.mirror.len();
        self.mirror.push(value);
        self.mark_dirty(idx..idx + 1);
        idx
    }

    /// Overwrites the element at the given index.
    ///
    /// # Panics
    /// If the index is out of bounds.
    pub fn set(&mut self, idx: usize, value: T) {
        self.mirror[idx] = value;
        self.mark_dirty(idx..idx + 1);
    }

    /// Removes the element at the given index by moving the last element into
    /// its place, and returns the removed element.
    ///
    /// # Panics
    /// If the index is out of bounds.
    pub fn swap_remove(&mut self, idx: usize) -> T {
        let removed = self.mirror.swap_remove(idx);
        if idx < self.mirror.len() {
            self.mark_dirty(idx..idx + 1);
        }
        removed
    }

    /// Records the commands needed to make the device buffer equal to the
    /// mirror into the given encoder. Returns whether a new device buffer was
    /// allocated, in which case bind groups referencing the buffer must be
    /// recreated.
    ///
    /// The copy of the old contents into a grown buffer is recorded before the
    /// staging belt writes, so the writes land on top of the copied data.
    pub fn flush(
        &mut self,
        device: &wgpu::Device,
        command_encoder: &mut wgpu::CommandEncoder,
        staging_belt: &mut wgpu::util::StagingBelt,
        retired_buffers: &mut RetiredBuffers,
    ) -> bool {
        let mut reallocated = false;

        match self.device_buffer.take() {
            None => {
                self.device_buffer = Some(self.create_device_buffer(device));
                self.device_capacity = self.capacity;
                if !self.mirror.is_empty() {
                    self.mark_dirty(0..self.mirror.len());
                }
                reallocated = true;
            }
            Some(old_buffer) if self.device_capacity < self.capacity => {
                let new_buffer = self.create_device_buffer(device);
                command_encoder.copy_buffer_to_buffer(
                    &old_buffer,
                    0,
                    &new_buffer,
                    0,
                    old_buffer.size(),
                );
                retired_buffers.retire(old_buffer);
                self.device_buffer = Some(new_buffer);
                self.device_capacity = self.capacity;
                reallocated = true;
            }
            Some(buffer) => {
                self.device_buffer = Some(buffer);
            }
        }

        if let (Some(dirty), Some(buffer)) = (self.dirty.take(), &self.device_buffer) {
            let end = dirty.end.min(self.mirror.len());
            if dirty.start < end {
                let bytes: &[u8] = bytemuck::cast_slice(&self.mirror[dirty.start..end]);
                if let Some(size) = wgpu::BufferSize::new(bytes.len() as u64) {
                    let offset = (dirty.start * mem::size_of::<T>()) as wgpu::BufferAddress;
                    staging_belt
                        .write_buffer(command_encoder, buffer, offset, size, device)
                        .copy_from_slice(bytes);
                }
            }
        }

        reallocated
    }

    /// Retires the device buffer so that it is destroyed once the current
    /// submission has completed. The mirror is kept.
    pub fn retire_device_buffer(&mut self, retired_buffers: &mut RetiredBuffers) {
        if let Some(buffer) = self.device_buffer.take() {
            retired_buffers.retire(buffer);
        }
        self.device_capacity = 0;
    }

    fn mark_dirty(&mut self, range: Range<usize>) {
        self.dirty = Some(match self.dirty.take() {
            Some(dirty) => dirty.start.min(range.start)..dirty.end.max(range.end),
            None => range,
        });
    }

    fn create_device_buffer(&self, device: &wgpu::Device) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{} GPU buffer", self.label)),
            size: (self.capacity * mem::size_of::<T>()) as u64,
            usage: self.usage,
            mapped_at_creation: false,
        })
    }
}

impl<T: Pod> ScratchDeviceBuffer<T> {
    pub fn new(label: impl Into<Cow<'static, str>>, usage: wgpu::BufferUsages) -> Self {
        Self {
            label: label.into(),
            usage,
            buffer: None,
            capacity: 0,
            _element: PhantomData,
        }
    }

    /// Returns the device buffer, if it has been allocated.
    pub fn buffer(&self) -> Option<&wgpu::Buffer> {
        self.buffer.as_ref()
    }

    /// Makes sure the buffer holds at least `n_elements` elements (and at
    /// least one). Returns whether a new buffer was allocated.
    pub fn ensure_capacity(
        &mut self,
        device: &wgpu::Device,
        n_elements: usize,
        retired_buffers: &mut RetiredBuffers,
    ) -> bool {
        let n_elements = n_elements.max(1);
        if self.buffer.is_some() && self.capacity >= n_elements {
            return false;
        }
        if let Some(old_buffer) = self.buffer.take() {
            retired_buffers.retire(old_buffer);
        }
        self.buffer = Some(device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{} GPU buffer", self.label)),
            size: (n_elements * mem::size_of::<T>()) as u64,
            usage: self.usage,
            mapped_at_creation: false,
        }));
        self.capacity = n_elements;
        true
    }

    /// Retires the device buffer so that it is destroyed once the current
    /// submission has completed.
    pub fn retire(&mut self, retired_buffers: &mut RetiredBuffers) {
        if let Some(buffer) = self.buffer.take() {
            retired_buffers.retire(buffer);
        }
        self.capacity = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> GrowableDeviceBuffer<[f32; 4]> {
        GrowableDeviceBuffer::new("Test", wgpu::BufferUsages::STORAGE)
    }

    #[test]
    fn grown_capacity_is_at_least_one_and_a_half_times_larger() {
        for capacity in [1, 2, 3, 100, 151, 1000] {
            let grown = grown_capacity(capacity);
            assert!(2 * grown >= 3 * capacity);
            assert!(grown > capacity);
        }
        assert_eq!(grown_capacity(INIT_BUFFER_SIZE), 150);
    }

    #[test]
    fn pushing_beyond_capacity_grows_buffer() {
        let mut buffer = buffer();
        for idx in 0..INIT_BUFFER_SIZE {
            assert_eq!(buffer.push([idx as f32; 4]), idx);
        }
        assert_eq!(buffer.capacity(), INIT_BUFFER_SIZE);

        buffer.push([-1.0; 4]);
        assert_eq!(buffer.capacity(), 150);
        assert_eq!(buffer.len(), INIT_BUFFER_SIZE + 1);
    }

    #[test]
    fn growth_keeps_existing_contents() {
        let mut buffer = buffer();
        for idx in 0..(3 * INIT_BUFFER_SIZE) {
            buffer.push([idx as f32; 4]);
        }
        for (idx, value) in buffer.as_slice().iter().enumerate() {
            assert_eq!(*value, [idx as f32; 4]);
        }
    }

    #[test]
    fn modifications_are_merged_into_one_dirty_range() {
        let mut buffer = buffer();
        for _ in 0..10 {
            buffer.push([0.0; 4]);
        }
        buffer.dirty = None;

        buffer.set(7, [1.0; 4]);
        buffer.set(2, [2.0; 4]);
        assert_eq!(buffer.dirty_range(), Some(2..8));
    }

    #[test]
    fn swap_remove_moves_last_element_into_hole() {
        let mut buffer = buffer();
        for idx in 0..4 {
            buffer.push([idx as f32; 4]);
        }
        buffer.dirty = None;

        let removed = buffer.swap_remove(1);

        assert_eq!(removed, [1.0; 4]);
        assert_eq!(buffer.as_slice(), &[[0.0; 4], [3.0; 4], [2.0; 4]]);
        assert_eq!(buffer.dirty_range(), Some(1..2));
    }

    #[test]
    fn removing_last_element_leaves_nothing_dirty() {
        let mut buffer = buffer();
        buffer.push([0.0; 4]);
        buffer.dirty = None;

        buffer.swap_remove(0);

        assert!(buffer.is_empty());
        assert_eq!(buffer.dirty_range(), None);
    }

    #[test]
    fn capacity_never_shrinks() {
        let mut buffer = buffer();
        for _ in 0..(INIT_BUFFER_SIZE + 1) {
            buffer.push([0.0; 4]);
        }
        while !buffer.is_empty() {
            buffer.swap_remove(0);
        }
        assert_eq!(buffer.capacity(), 150);
    }
}
