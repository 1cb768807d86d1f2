//! Cone sets for cone-traced diffuse lighting.

use nalgebra::{UnitVector3, Vector3};
use std::f32::consts::{FRAC_PI_4, PI, TAU};

/// A cone direction on the hemisphere around the local +Y axis (the surface
/// normal) together with the weight of the radiance gathered along it.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DiffuseCone {
    pub direction: UnitVector3<f32>,
    pub weight: f32,
}

/// Weight of the central cone when it is accompanied by side cones. This is
/// the solid-angle based share of the central cone in the classic six-cone
/// arrangement.
const CENTRAL_CONE_WEIGHT: f32 = FRAC_PI_4;

/// Elevation of the side cones above the tangent plane.
const SIDE_CONE_ELEVATION: f32 = FRAC_PI_4;

/// Generates `count` cones covering the hemisphere around the local +Y axis.
///
/// With a single cone it points straight up with weight π. With more cones,
/// a central cone of weight π/4 is followed by `count - 1` cones at 45°
/// elevation, evenly spaced in azimuth, sharing the remaining weight equally.
///
/// The weights always sum to π. This weighting is an intentional
/// approximation used by the lighting model and not the hemisphere's solid
/// angle.
pub fn generate_diffuse_cones(count: usize) -> Vec<DiffuseCone> {
    match count {
        0 => Vec::new(),
        1 => vec![DiffuseCone {
            direction: Vector3::y_axis(),
            weight: PI,
        }],
        _ => {
            let n_side_cones = count - 1;

            #[allow(clippy::cast_precision_loss)]
            let side_weight = (PI - CENTRAL_CONE_WEIGHT) / n_side_cones as f32;

            let (sin_elevation, cos_elevation) = SIDE_CONE_ELEVATION.sin_cos();

            let mut cones = Vec::with_capacity(count);
            cones.push(DiffuseCone {
                direction: Vector3::y_axis(),
                weight: CENTRAL_CONE_WEIGHT,
            });

            cones.extend((0..n_side_cones).map(|cone_idx| {
                #[allow(clippy::cast_precision_loss)]
                let azimuth = TAU * cone_idx as f32 / n_side_cones as f32;
                let (sin_azimuth, cos_azimuth) = azimuth.sin_cos();
                DiffuseCone {
                    direction: UnitVector3::new_normalize(Vector3::new(
                        cos_elevation * cos_azimuth,
                        sin_elevation,
                        cos_elevation * sin_azimuth,
                    )),
                    weight: side_weight,
                }
            }));

            cones
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    fn total_weight(cones: &[DiffuseCone]) -> f32 {
        cones.iter().map(|cone| cone.weight).sum()
    }

    #[test]
    fn zero_cones_gives_empty_set() {
        assert!(generate_diffuse_cones(0).is_empty());
    }

    #[test]
    fn single_cone_points_straight_up_with_weight_pi() {
        let cones = generate_diffuse_cones(1);
        assert_eq!(cones.len(), 1);
        assert_abs_diff_eq!(cones[0].direction.into_inner(), Vector3::y());
        assert_abs_diff_eq!(cones[0].weight, PI);
    }

    #[test]
    fn cone_weights_sum_to_pi_for_common_counts() {
        for count in [1, 2, 6, 12] {
            let cones = generate_diffuse_cones(count);
            assert_eq!(cones.len(), count);
            assert_abs_diff_eq!(total_weight(&cones), PI, epsilon = 1e-3);
        }
    }

    #[test]
    fn six_cones_use_classic_weights() {
        let cones = generate_diffuse_cones(6);
        assert_abs_diff_eq!(cones[0].weight, PI / 4.0, epsilon = 1e-6);
        for cone in &cones[1..] {
            assert_abs_diff_eq!(cone.weight, 3.0 * PI / 20.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn side_cones_lie_at_45_degree_elevation() {
        for cone in &generate_diffuse_cones(9)[1..] {
            assert_abs_diff_eq!(cone.direction.y, FRAC_PI_4.sin(), epsilon = 1e-6);
        }
    }

    proptest! {
        #[test]
        fn cone_weights_always_sum_to_pi(count in 1_usize..64) {
            let cones = generate_diffuse_cones(count);
            prop_assert!((total_weight(&cones) - PI).abs() < 1e-3);
            prop_assert!(cones.iter().all(|cone| cone.direction.y > 0.0));
        }
    }
}
