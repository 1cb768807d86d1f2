//! Geometrical primitives and the math behind clipmaps, cones and
//! projections.

mod axis_aligned_box;
mod clipmap;
mod cone;
mod frustum;
mod plane;
mod projection;
mod sphere;
mod transform;

pub use axis_aligned_box::AxisAlignedBox;
pub use clipmap::{
    ClipmapHierarchy, ClipmapLevel, MAX_CLIPMAP_LEVELS, MIN_CLIPMAP_LEVELS, clipmap_scaling_factor,
    generate_clipmaps,
};
pub use cone::{DiffuseCone, generate_diffuse_cones};
pub use frustum::Frustum;
pub use plane::Plane;
pub use projection::{
    Axis, PerspectiveCamera, directional_light_projection, orthographic_projection,
    orthographic_projection_along,
};
pub use sphere::Sphere;
pub use transform::EntityTransform;
