//! Nested clipmap hierarchies of axis-aligned boxes.

use super::AxisAlignedBox;

/// The smallest number of clipmap levels a hierarchy can have.
pub const MIN_CLIPMAP_LEVELS: usize = 2;

/// The largest number of clipmap levels the voxel shaders can address.
pub const MAX_CLIPMAP_LEVELS: usize = 4;

/// One level of a clipmap hierarchy: a region of space and the resolution of
/// the voxel grid covering it.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ClipmapLevel {
    pub aabb: AxisAlignedBox,
    pub resolution: u32,
}

/// A nested hierarchy of clipmaps centered on the same point, from the
/// finest (index 0) to the coarsest, which covers the whole scene. Computed
/// once from the scene bounding box and immutable afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct ClipmapHierarchy {
    levels: Vec<ClipmapLevel>,
}

/// Returns the factor by which the scene bounding box is scaled to obtain
/// clipmap level `level_idx` out of `level_count`, disregarding that the last
/// level is always the scene bounding box itself.
pub fn clipmap_scaling_factor(level_count: usize, level_idx: usize) -> f32 {
    let exponent = level_count as i32 - level_idx as i32 - 2;
    2.0_f32.powi(-exponent)
}

/// Generates the bounding boxes of `level_count` nested clipmaps around the
/// center of `scene_aabb`. The last box is exactly `scene_aabb`, and box `i`
/// before it is `scene_aabb` scaled by `1 / 2^(level_count - i - 2)`.
///
/// # Panics
/// If `level_count` is smaller than [`MIN_CLIPMAP_LEVELS`].
pub fn generate_clipmaps(scene_aabb: &AxisAlignedBox, level_count: usize) -> Vec<AxisAlignedBox> {
    assert!(
        level_count >= MIN_CLIPMAP_LEVELS,
        "Tried to generate {level_count} clipmaps (at least {MIN_CLIPMAP_LEVELS} required)"
    );

    let mut clipmaps: Vec<_> = (0..level_count - 1)
        .map(|level_idx| {
            scene_aabb.scaled_about_center(clipmap_scaling_factor(level_count, level_idx))
        })
        .collect();

    clipmaps.push(*scene_aabb);
    clipmaps
}

impl ClipmapHierarchy {
    /// Computes the clipmap hierarchy for the given scene bounding box. All
    /// levels but the last use `resolution` voxels along each axis, while the
    /// last, coarsest level uses `coarsest_resolution`.
    ///
    /// # Panics
    /// If `level_count` is outside
    /// [`MIN_CLIPMAP_LEVELS`]..=[`MAX_CLIPMAP_LEVELS`] or a resolution is
    /// zero.
    pub fn new(
        scene_aabb: &AxisAlignedBox,
        level_count: usize,
        resolution: u32,
        coarsest_resolution: u32,
    ) -> Self {
        assert!(
            level_count <= MAX_CLIPMAP_LEVELS,
            "Clipmap level count {level_count} exceeds maximum of {MAX_CLIPMAP_LEVELS}"
        );
        assert!(resolution > 0 && coarsest_resolution > 0);

        let levels = generate_clipmaps(scene_aabb, level_count)
            .into_iter()
            .enumerate()
            .map(|(level_idx, aabb)| ClipmapLevel {
                aabb,
                resolution: if level_idx + 1 == level_count {
                    coarsest_resolution
                } else {
                    resolution
                },
            })
            .collect();

        Self { levels }
    }

    /// Returns the clipmap levels, from finest to coarsest.
    pub fn levels(&self) -> &[ClipmapLevel] {
        &self.levels
    }

    /// Returns the number of levels in the hierarchy.
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Returns the bounding box of the coarsest level, which is the scene
    /// bounding box.
    pub fn scene_aabb(&self) -> &AxisAlignedBox {
        &self.levels[self.levels.len() - 1].aabb
    }
}

impl ClipmapLevel {
    /// Returns the edge length of a voxel in this level.
    #[allow(clippy::cast_precision_loss)]
    pub fn voxel_size(&self) -> f32 {
        self.aabb.max_extent() / self.resolution as f32
    }

    /// Returns the number of mip levels of a full mip chain for the voxel
    /// grid of this level.
    pub fn mip_level_count(&self) -> u32 {
        u32::BITS - self.resolution.leading_zeros()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::point;
    use proptest::prelude::*;

    fn cube(half_extent: f32) -> AxisAlignedBox {
        AxisAlignedBox::new(
            point![-half_extent, -half_extent, -half_extent],
            point![half_extent, half_extent, half_extent],
        )
    }

    prop_compose! {
        fn aabb_strategy()(
            x in -1e3_f32..1e3,
            y in -1e3_f32..1e3,
            z in -1e3_f32..1e3,
            dx in 1e-2_f32..1e3,
            dy in 1e-2_f32..1e3,
            dz in 1e-2_f32..1e3,
        ) -> AxisAlignedBox {
            AxisAlignedBox::new(point![x, y, z], point![x + dx, y + dy, z + dz])
        }
    }

    proptest! {
        #[test]
        fn generated_clipmaps_end_with_scene_aabb_and_share_its_center(
            scene_aabb in aabb_strategy(),
            level_count in 2_usize..8,
        ) {
            let clipmaps = generate_clipmaps(&scene_aabb, level_count);

            prop_assert_eq!(clipmaps.len(), level_count);
            prop_assert_eq!(clipmaps.last().unwrap(), &scene_aabb);

            let center = scene_aabb.center();
            let tolerance = 1e-3 * (1.0 + center.coords.amax());
            for clipmap in &clipmaps {
                prop_assert!((clipmap.center() - center).amax() <= tolerance);
            }
        }
    }

    #[test]
    #[should_panic]
    fn generating_fewer_than_two_clipmaps_panics() {
        generate_clipmaps(&cube(1.0), 1);
    }

    #[test]
    fn four_level_clipmaps_of_symmetric_scene_have_expected_extents() {
        let scene_aabb = cube(10.0);
        let clipmaps = generate_clipmaps(&scene_aabb, 4);

        assert_eq!(clipmaps[3], scene_aabb);

        assert_abs_diff_eq!(clipmap_scaling_factor(4, 0), 0.25);
        assert_abs_diff_eq!(*clipmaps[0].lower_corner(), point![-2.5, -2.5, -2.5]);
        assert_abs_diff_eq!(*clipmaps[0].upper_corner(), point![2.5, 2.5, 2.5]);

        assert_abs_diff_eq!(*clipmaps[1].upper_corner(), point![5.0, 5.0, 5.0]);
        assert_abs_diff_eq!(*clipmaps[2].upper_corner(), point![10.0, 10.0, 10.0]);
    }

    #[test]
    fn clipmap_hierarchy_uses_coarsest_resolution_for_last_level() {
        let hierarchy = ClipmapHierarchy::new(&cube(8.0), 3, 64, 32);

        let resolutions: Vec<_> = hierarchy
            .levels()
            .iter()
            .map(|level| level.resolution)
            .collect();
        assert_eq!(resolutions, vec![64, 64, 32]);
        assert_eq!(hierarchy.scene_aabb(), &cube(8.0));
    }

    #[test]
    fn voxel_size_and_mip_count_follow_resolution() {
        let level = ClipmapLevel {
            aabb: cube(16.0),
            resolution: 64,
        };
        assert_abs_diff_eq!(level.voxel_size(), 0.5);
        assert_eq!(level.mip_level_count(), 7);
    }
}
