//! Configuration of the renderer.

use crate::{
    geometry::{MAX_CLIPMAP_LEVELS, MIN_CLIPMAP_LEVELS},
    gpu::GraphicsDevice,
};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// Maximum number of diffuse cones the cone tracing shader can hold.
pub const MAX_DIFFUSE_CONES: usize = 16;

/// Maximum number of shadow map samples per pixel for percentage-closer
/// filtering.
pub const MAX_SHADOW_SAMPLES: u32 = 64;

/// Rendering configuration options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderingConfig {
    /// Width and height of the rendered image in pixels.
    pub resolution: (u32, u32),
    /// Factor by which the cone tracing input is downsampled. Must be 1 or a
    /// positive even number.
    pub downsample_divisor: i32,
    pub clipmaps: ClipmapConfig,
    pub cones: ConeConfig,
    pub shadows: ShadowConfig,
    pub passes: PassConfig,
    pub textures: MaterialTextureConfig,
    /// Whether GPU execution times are measured for each pass.
    pub timings_enabled: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipmapConfig {
    pub level_count: usize,
    /// Voxel resolution along each axis of every level except the coarsest.
    pub resolution: u32,
    /// Voxel resolution along each axis of the coarsest level.
    pub coarsest_resolution: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConeConfig {
    /// Number of cones gathering indirect diffuse light.
    pub diffuse_count: usize,
    /// Aperture of each diffuse cone in radians.
    pub diffuse_aperture: f32,
    /// Scale from surface roughness to specular cone aperture.
    pub specular_aperture_scale: f32,
    /// Maximum distance a cone travels, as a fraction of the scene diagonal.
    pub max_distance_fraction: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    pub algorithm: ShadowAlgorithm,
    /// Width and height of the shadow map in texels.
    pub resolution: u32,
    /// Number of shadow map samples for percentage-closer filtering.
    pub sample_count: u32,
    /// Depth bias subtracted before the shadow map comparison.
    pub bias: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassConfig {
    pub frustum_culling: bool,
    /// Whether the scene is voxelized every frame rather than once.
    pub always_voxelize: bool,
    pub bilateral_filtering: bool,
    pub upsampling: UpsamplingMode,
    pub direct_lighting: bool,
    pub lighting_application: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialTextureConfig {
    /// Width and height of each layer in the material texture array.
    pub layer_size: u32,
    /// Number of layers in the material texture array.
    pub max_layers: u32,
}

/// How direct light from the directional light is shadowed.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShadowAlgorithm {
    /// A single shadow map lookup per pixel.
    ShadowMapping,
    /// Several filtered shadow map lookups per pixel.
    #[default]
    PercentageCloserFiltering,
    /// A narrow cone traced through the voxels toward the light.
    ConeTraced,
}

/// How low-resolution lighting channels are brought back to full
/// resolution.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpsamplingMode {
    None,
    #[default]
    Bilateral,
    Bilinear,
}

impl RenderingConfig {
    /// Returns a copy of the configuration with invalid values replaced by
    /// valid ones. A warning is logged for every correction.
    pub fn resolved(&self) -> Self {
        let mut config = self.clone();

        if config.resolution.0 == 0 || config.resolution.1 == 0 {
            log::warn!(
                "Invalid resolution {}x{}, using at least 1 pixel along each axis",
                config.resolution.0,
                config.resolution.1
            );
            config.resolution = (config.resolution.0.max(1), config.resolution.1.max(1));
        }

        if !is_valid_downsample_divisor(config.downsample_divisor) {
            log::warn!(
                "Downsample divisor must be 1 or a positive even number, got {}; resetting to 1",
                config.downsample_divisor
            );
            config.downsample_divisor = 1;
        }

        let level_count = config
            .clipmaps
            .level_count
            .clamp(MIN_CLIPMAP_LEVELS, MAX_CLIPMAP_LEVELS);
        if level_count != config.clipmaps.level_count {
            log::warn!(
                "Clipmap level count {} outside {MIN_CLIPMAP_LEVELS}..={MAX_CLIPMAP_LEVELS}, using {level_count}",
                config.clipmaps.level_count
            );
            config.clipmaps.level_count = level_count;
        }

        config.clipmaps.resolution =
            resolved_voxel_resolution("Clipmap", config.clipmaps.resolution);
        config.clipmaps.coarsest_resolution =
            resolved_voxel_resolution("Coarsest clipmap", config.clipmaps.coarsest_resolution);

        if config.cones.diffuse_count > MAX_DIFFUSE_CONES {
            log::warn!(
                "Diffuse cone count {} exceeds the maximum of {MAX_DIFFUSE_CONES}",
                config.cones.diffuse_count
            );
            config.cones.diffuse_count = MAX_DIFFUSE_CONES;
        }
        if !(config.cones.diffuse_aperture > 0.0 && config.cones.diffuse_aperture < PI) {
            log::warn!(
                "Diffuse cone aperture {} outside (0, π), using the default",
                config.cones.diffuse_aperture
            );
            config.cones.diffuse_aperture = ConeConfig::default().diffuse_aperture;
        }
        if !(config.cones.max_distance_fraction > 0.0) {
            log::warn!(
                "Cone distance fraction {} must be positive, using 1",
                config.cones.max_distance_fraction
            );
            config.cones.max_distance_fraction = 1.0;
        }

        if config.shadows.resolution == 0 {
            log::warn!("Shadow map resolution must be at least 1");
            config.shadows.resolution = 1;
        }
        let sample_count = config.shadows.sample_count.clamp(1, MAX_SHADOW_SAMPLES);
        if sample_count != config.shadows.sample_count {
            log::warn!(
                "Shadow sample count {} outside 1..={MAX_SHADOW_SAMPLES}, using {sample_count}",
                config.shadows.sample_count
            );
            config.shadows.sample_count = sample_count;
        }

        if config.textures.layer_size == 0 || config.textures.max_layers == 0 {
            log::warn!("Material texture array must have at least one non-empty layer");
            config.textures.layer_size = config.textures.layer_size.max(1);
            config.textures.max_layers = config.textures.max_layers.max(1);
        }

        config
    }

    /// Adjusts the configuration parameters to avoid using features not
    /// supported by the given graphics device.
    pub fn make_compatible_with_device(&mut self, graphics_device: &GraphicsDevice) {
        if self.timings_enabled
            && !graphics_device.supports_features(wgpu::Features::TIMESTAMP_QUERY)
        {
            log::warn!("Disabling timestamp queries due to missing device features");
            self.timings_enabled = false;
        }
    }

    /// Downsample divisor as an unsigned factor. Only meaningful on a
    /// resolved configuration.
    pub fn downsample_factor(&self) -> u32 {
        self.downsample_divisor.max(1) as u32
    }

    /// Whether the cone tracing input is computed at reduced resolution.
    pub fn is_downsampled(&self) -> bool {
        self.downsample_factor() > 1
    }

    /// Width and height of the reduced-resolution targets.
    pub fn working_resolution(&self) -> (u32, u32) {
        let factor = self.downsample_factor();
        (
            (self.resolution.0 / factor).max(1),
            (self.resolution.1 / factor).max(1),
        )
    }
}

fn is_valid_downsample_divisor(divisor: i32) -> bool {
    divisor == 1 || (divisor > 0 && divisor % 2 == 0)
}

fn resolved_voxel_resolution(name: &str, resolution: u32) -> u32 {
    let valid = resolution.max(4).next_power_of_two();
    if valid != resolution {
        log::warn!(
            "{name} resolution {resolution} is not a power of two of at least 4, using {valid}"
        );
    }
    valid
}

impl Default for RenderingConfig {
    fn default() -> Self {
        Self {
            resolution: (1280, 720),
            downsample_divisor: 2,
            clipmaps: ClipmapConfig::default(),
            cones: ConeConfig::default(),
            shadows: ShadowConfig::default(),
            passes: PassConfig::default(),
            textures: MaterialTextureConfig::default(),
            timings_enabled: false,
        }
    }
}

impl Default for ClipmapConfig {
    fn default() -> Self {
        Self {
            level_count: MAX_CLIPMAP_LEVELS,
            resolution: 64,
            coarsest_resolution: 32,
        }
    }
}

impl Default for ConeConfig {
    fn default() -> Self {
        Self {
            diffuse_count: 6,
            diffuse_aperture: 60_f32.to_radians(),
            specular_aperture_scale: 1.0,
            max_distance_fraction: 1.0,
        }
    }
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            algorithm: ShadowAlgorithm::default(),
            resolution: 2048,
            sample_count: 9,
            bias: 0.002,
        }
    }
}

impl Default for PassConfig {
    fn default() -> Self {
        Self {
            frustum_culling: true,
            always_voxelize: true,
            bilateral_filtering: true,
            upsampling: UpsamplingMode::default(),
            direct_lighting: true,
            lighting_application: true,
        }
    }
}

impl Default for MaterialTextureConfig {
    fn default() -> Self {
        Self {
            layer_size: 512,
            max_layers: 32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io;

    #[test]
    fn default_config_is_already_resolved() {
        let config = RenderingConfig::default();
        assert_eq!(config.resolved(), config);
    }

    #[test]
    fn odd_or_non_positive_divisors_are_reset_to_one() {
        for divisor in [-4, 0, 3, 5] {
            let config = RenderingConfig {
                downsample_divisor: divisor,
                ..Default::default()
            };
            assert_eq!(config.resolved().downsample_divisor, 1);
        }
        for divisor in [1, 2, 4, 8] {
            let config = RenderingConfig {
                downsample_divisor: divisor,
                ..Default::default()
            };
            assert_eq!(config.resolved().downsample_divisor, divisor);
        }
    }

    #[test]
    fn clipmap_level_count_is_clamped() {
        let mut config = RenderingConfig::default();
        config.clipmaps.level_count = 1;
        assert_eq!(config.resolved().clipmaps.level_count, MIN_CLIPMAP_LEVELS);
        config.clipmaps.level_count = 9;
        assert_eq!(config.resolved().clipmaps.level_count, MAX_CLIPMAP_LEVELS);
    }

    #[test]
    fn cone_count_is_clamped_to_shader_maximum() {
        let mut config = RenderingConfig::default();
        config.cones.diffuse_count = 100;
        assert_eq!(config.resolved().cones.diffuse_count, MAX_DIFFUSE_CONES);
    }

    #[test]
    fn zero_resolutions_are_raised() {
        let mut config = RenderingConfig {
            resolution: (0, 10),
            ..Default::default()
        };
        config.clipmaps.resolution = 0;
        config.clipmaps.coarsest_resolution = 20;
        config.shadows.resolution = 0;

        let resolved = config.resolved();
        assert_eq!(resolved.resolution, (1, 10));
        assert_eq!(resolved.clipmaps.resolution, 4);
        assert_eq!(resolved.clipmaps.coarsest_resolution, 32);
        assert_eq!(resolved.shadows.resolution, 1);
    }

    #[test]
    fn working_resolution_follows_divisor() {
        let config = RenderingConfig {
            resolution: (640, 481),
            downsample_divisor: 4,
            ..Default::default()
        };
        assert!(config.is_downsampled());
        assert_eq!(config.working_resolution(), (160, 120));

        let full = RenderingConfig {
            downsample_divisor: 1,
            ..config
        };
        assert!(!full.is_downsampled());
        assert_eq!(full.working_resolution(), (640, 481));
    }

    #[test]
    fn partial_ron_config_uses_defaults_for_missing_fields() {
        let config: RenderingConfig = io::parse_ron_str(
            "(resolution: (320, 240), shadows: (algorithm: ConeTraced), passes: (upsampling: Bilinear))",
        )
        .unwrap();
        assert_eq!(config.resolution, (320, 240));
        assert_eq!(config.shadows.algorithm, ShadowAlgorithm::ConeTraced);
        assert_eq!(config.shadows.resolution, ShadowConfig::default().resolution);
        assert_eq!(config.passes.upsampling, UpsamplingMode::Bilinear);
        assert!(config.passes.frustum_culling);
    }

    #[test]
    fn shipped_config_is_valid() {
        let config: RenderingConfig = io::parse_ron_str(include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/config/rendering.ron"
        )))
        .unwrap();
        assert_eq!(config.resolved(), config);
        approx::assert_abs_diff_eq!(
            config.cones.diffuse_aperture,
            ConeConfig::default().diffuse_aperture,
            epsilon = 1e-6
        );
    }
}
