//! Frame pacing for a pipeline with several frames in flight.

use std::fmt;

/// Number of frames that may be recorded on the CPU while earlier frames are
/// still executing on the GPU.
pub const FRAMES_IN_FLIGHT: usize = 3;

/// A ring of per-frame-slot state, indexed by `frame_index mod
/// FRAMES_IN_FLIGHT`.
#[derive(Clone, Debug)]
pub struct FrameRing<T> {
    slots: [T; FRAMES_IN_FLIGHT],
    frame_index: u64,
}

/// State kept for each frame slot.
#[derive(Default)]
pub struct FrameSlot {
    /// Submission that last used this slot. Waiting on it before reusing the
    /// slot bounds the CPU to [`FRAMES_IN_FLIGHT`] - 1 frames ahead.
    pub submission: Option<wgpu::SubmissionIndex>,
    /// Buffers that became unused while the submission of this slot may still
    /// reference them.
    pub retired_buffers: RetiredBuffers,
}

/// Buffers waiting for a submission to complete before they are destroyed.
#[derive(Debug, Default)]
pub struct RetiredBuffers {
    buffers: Vec<wgpu::Buffer>,
}

impl<T: Default> FrameRing<T> {
    pub fn new() -> Self {
        Self {
            slots: Default::default(),
            frame_index: 0,
        }
    }
}

impl<T: Default> Default for FrameRing<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FrameRing<T> {
    /// Index of the frame currently being recorded.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Slot index of the frame currently being recorded.
    pub fn active_slot(&self) -> usize {
        slot_for_frame(self.frame_index)
    }

    pub fn active(&self) -> &T {
        &self.slots[self.active_slot()]
    }

    pub fn active_mut(&mut self) -> &mut T {
        let slot = self.active_slot();
        &mut self.slots[slot]
    }

    pub fn slot(&self, slot: usize) -> &T {
        &self.slots[slot]
    }

    pub fn slots_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut()
    }

    /// Moves on to the next frame.
    pub fn advance(&mut self) {
        self.frame_index += 1;
    }
}

/// Returns the frame slot used by the frame with the given index.
pub fn slot_for_frame(frame_index: u64) -> usize {
    (frame_index % FRAMES_IN_FLIGHT as u64) as usize
}

impl FrameSlot {
    /// Blocks until the last submission in this slot has completed, then
    /// destroys the buffers retired while that submission was pending.
    pub fn wait_and_release(&mut self, device: &wgpu::Device) {
        if let Some(submission) = self.submission.take() {
            device.poll(wgpu::Maintain::WaitForSubmissionIndex(submission));
        }
        let n_released = self.retired_buffers.release();
        if n_released > 0 {
            log::debug!("Released {n_released} retired GPU buffers");
        }
    }
}

impl fmt::Debug for FrameSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSlot")
            .field("pending_submission", &self.submission.is_some())
            .field("retired_buffers", &self.retired_buffers.len())
            .finish()
    }
}

impl RetiredBuffers {
    /// Adds a buffer that must outlive the current submission.
    pub fn retire(&mut self, buffer: wgpu::Buffer) {
        self.buffers.push(buffer);
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Destroys all retired buffers and returns how many there were.
    pub fn release(&mut self) -> usize {
        let n_buffers = self.buffers.len();
        for buffer in self.buffers.drain(..) {
            buffer.destroy();
        }
        n_buffers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_slots_rotate_through_ring() {
        let mut ring = FrameRing::<u32>::new();
        let mut visited = Vec::new();
        for _ in 0..7 {
            *ring.active_mut() += 1;
            visited.push(ring.active_slot());
            ring.advance();
        }
        assert_eq!(visited, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(*ring.slot(0), 3);
        assert_eq!(*ring.slot(1), 2);
        assert_eq!(*ring.slot(2), 2);
        assert_eq!(ring.frame_index(), 7);
    }

    #[test]
    fn slot_for_frame_wraps_at_frames_in_flight() {
        assert_eq!(slot_for_frame(0), 0);
        assert_eq!(slot_for_frame(FRAMES_IN_FLIGHT as u64), 0);
        assert_eq!(slot_for_frame(FRAMES_IN_FLIGHT as u64 + 2), 2);
    }
}
