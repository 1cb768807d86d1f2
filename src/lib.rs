//! Real-time voxel cone tracing renderer.

#[macro_use]
mod macros;

pub mod batch;
pub mod engine;
pub mod geometry;
pub mod gpu;
pub mod io;
pub mod rendering;
pub mod scene;
