//! Indirect draw calls.

use bytemuck::{Pod, Zeroable};
use std::mem;

/// Argument buffer layout for `draw_indexed_indirect` commands.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Zeroable, Pod)]
pub struct DrawIndexedIndirectArgs {
    /// The number of indices to draw.
    pub index_count: u32,
    /// The number of instances to draw.
    pub instance_count: u32,
    /// The first index within the index buffer.
    pub first_index: u32,
    /// The value added to the vertex index before indexing into the vertex
    /// buffer.
    pub base_vertex: i32,
    /// The instance ID of the first instance to draw. Always 0, since
    /// instances are looked up through the visible-index list.
    pub first_instance: u32,
}

impl DrawIndexedIndirectArgs {
    /// Size of the arguments in bytes.
    pub const SIZE: usize = mem::size_of::<Self>();

    /// Byte offset of the `instance_count` field, which the culling shader
    /// increments atomically.
    pub const INSTANCE_COUNT_OFFSET: usize = mem::offset_of!(Self, instance_count);

    /// Creates arguments drawing all the indices of a mesh for the given
    /// number of instances.
    pub fn new(index_count: u32, instance_count: u32) -> Self {
        Self {
            index_count,
            instance_count,
            ..Default::default()
        }
    }

    /// Byte offset of the copy of the arguments with the given slot index in
    /// a buffer holding one copy per frame slot.
    pub fn byte_offset_for_slot(slot: usize) -> usize {
        slot * Self::SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_layout_matches_wgpu_expectation() {
        assert_eq!(DrawIndexedIndirectArgs::SIZE, 20);
        assert_eq!(DrawIndexedIndirectArgs::INSTANCE_COUNT_OFFSET, 4);
        assert_eq!(DrawIndexedIndirectArgs::byte_offset_for_slot(2), 40);
    }

    #[test]
    fn zero_index_mesh_gives_well_formed_args() {
        let args = DrawIndexedIndirectArgs::new(0, 0);
        assert_eq!(args.index_count, 0);
        assert_eq!(args.first_instance, 0);
        assert_eq!(bytemuck::bytes_of(&args).len(), 20);
    }
}
