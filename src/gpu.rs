//! Graphics device access and GPU resource helpers.

pub mod binding;
pub mod buffer;
pub mod device;
pub mod growable;
pub mod indirect;
pub mod query;
pub mod shader;
pub mod sync;
pub mod texture;

pub use device::GraphicsDevice;
