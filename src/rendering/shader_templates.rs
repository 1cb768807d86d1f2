//! The WGSL templates of the render passes.

use crate::gpu::shader::template::ShaderTemplate;
use anyhow::{Result, anyhow};
use std::{fmt, sync::LazyLock};

/// Specific shader templates that can be resolved to generate shaders.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SpecificShaderTemplate {
    FrustumCulling,
    ShadowMap,
    GeometryPass,
    Downsample,
    Voxelization,
    VoxelResolve,
    VoxelMipmap,
    VoxelConeTracing,
    DirectLighting,
    BilateralFilter,
    BilateralUpsampling,
    BilinearUpsampling,
    LightingApplication,
    Blit,
}

/// Definitions of the frame uniform, samplers and helper functions,
/// prepended to every template.
const FRAME_DEFINITIONS: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/shaders/common/frame.wgsl"
));

static TEMPLATE_SOURCES: LazyLock<Vec<String>> = LazyLock::new(|| {
    SpecificShaderTemplate::ALL
        .iter()
        .map(|template| format!("{FRAME_DEFINITIONS}\n{}", template.wgsl_source()))
        .collect()
});

static TEMPLATES: LazyLock<Vec<Result<ShaderTemplate<'static>, String>>> = LazyLock::new(|| {
    TEMPLATE_SOURCES
        .iter()
        .map(|source| ShaderTemplate::new(source).map_err(|error| format!("{error:#}")))
        .collect()
});

impl SpecificShaderTemplate {
    pub const ALL: [Self; 14] = [
        Self::FrustumCulling,
        Self::ShadowMap,
        Self::GeometryPass,
        Self::Downsample,
        Self::Voxelization,
        Self::VoxelResolve,
        Self::VoxelMipmap,
        Self::VoxelConeTracing,
        Self::DirectLighting,
        Self::BilateralFilter,
        Self::BilateralUpsampling,
        Self::BilinearUpsampling,
        Self::LightingApplication,
        Self::Blit,
    ];

    /// Name of the template, used as the label of the compiled shaders.
    pub const fn name(self) -> &'static str {
        match self {
            Self::FrustumCulling => "frustum_culling",
            Self::ShadowMap => "shadow_map",
            Self::GeometryPass => "geometry_pass",
            Self::Downsample => "downsample",
            Self::Voxelization => "voxelization",
            Self::VoxelResolve => "voxel_resolve",
            Self::VoxelMipmap => "voxel_mipmap",
            Self::VoxelConeTracing => "voxel_cone_tracing",
            Self::DirectLighting => "direct_lighting",
            Self::BilateralFilter => "bilateral_filter",
            Self::BilateralUpsampling => "bilateral_upsampling",
            Self::BilinearUpsampling => "bilinear_upsampling",
            Self::LightingApplication => "lighting_application",
            Self::Blit => "blit",
        }
    }

    /// Returns the WGSL source code of the template, without the shared
    /// frame definitions.
    pub const fn wgsl_source(self) -> &'static str {
        match self {
            Self::FrustumCulling => shader_template_source!("compute", "frustum_culling"),
            Self::ShadowMap => shader_template_source!("rendering", "shadow_map"),
            Self::GeometryPass => shader_template_source!("rendering", "geometry_pass"),
            Self::Downsample => shader_template_source!("rendering", "downsample"),
            Self::Voxelization => shader_template_source!("rendering", "voxelization"),
            Self::VoxelResolve => shader_template_source!("compute", "voxel_resolve"),
            Self::VoxelMipmap => shader_template_source!("compute", "voxel_mipmap"),
            Self::VoxelConeTracing => shader_template_source!("rendering", "voxel_cone_tracing"),
            Self::DirectLighting => shader_template_source!("rendering", "direct_lighting"),
            Self::BilateralFilter => shader_template_source!("rendering", "bilateral_filter"),
            Self::BilateralUpsampling => {
                shader_template_source!("rendering", "bilateral_upsampling")
            }
            Self::BilinearUpsampling => {
                shader_template_source!("rendering", "bilinear_upsampling")
            }
            Self::LightingApplication => {
                shader_template_source!("rendering", "lighting_application")
            }
            Self::Blit => shader_template_source!("rendering", "blit"),
        }
    }

    /// Returns the parsed template, with the shared frame definitions
    /// prepended.
    ///
    /// # Errors
    /// Returns an error if the template has invalid syntax.
    pub fn template(self) -> Result<&'static ShaderTemplate<'static>> {
        let idx = Self::ALL
            .iter()
            .position(|template| *template == self)
            .ok_or_else(|| anyhow!("Unregistered shader template {self}"))?;
        TEMPLATES[idx]
            .as_ref()
            .map_err(|error| anyhow!("Invalid shader template {self}: {error}"))
    }
}

impl fmt::Display for SpecificShaderTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}`", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::shader::template::validate_template;

    fn template(template: SpecificShaderTemplate) -> &'static ShaderTemplate<'static> {
        template.template().unwrap()
    }

    #[test]
    fn all_templates_parse() {
        for specific in SpecificShaderTemplate::ALL {
            assert!(specific.template().is_ok(), "{specific} failed to parse");
        }
    }

    #[test]
    fn frustum_culling_template_is_valid() {
        validate_template(
            template(SpecificShaderTemplate::FrustumCulling),
            &[],
            shader_template_replacements!("workgroup_size" => 64),
        );
    }

    #[test]
    fn shadow_map_template_is_valid() {
        validate_template(template(SpecificShaderTemplate::ShadowMap), &[], &[]);
    }

    #[test]
    fn geometry_pass_template_is_valid_for_all_configurations() {
        let template = template(SpecificShaderTemplate::GeometryPass);
        for flags in [
            &[][..],
            &["DIFFUSE_TEXTURE"],
            &["NORMAL_MAP"],
            &["DIFFUSE_TEXTURE", "NORMAL_MAP"],
        ] {
            validate_template(template, flags, &[]);
        }
    }

    #[test]
    fn downsample_template_is_valid() {
        validate_template(template(SpecificShaderTemplate::Downsample), &[], &[]);
    }

    #[test]
    fn voxelization_template_is_valid_with_and_without_textures() {
        let template = template(SpecificShaderTemplate::Voxelization);
        validate_template(template, &[], &[]);
        validate_template(template, &["DIFFUSE_TEXTURE"], &[]);
    }

    #[test]
    fn voxel_compute_templates_are_valid() {
        validate_template(
            template(SpecificShaderTemplate::VoxelResolve),
            &[],
            shader_template_replacements!("workgroup_size" => 4),
        );
        validate_template(
            template(SpecificShaderTemplate::VoxelMipmap),
            &[],
            shader_template_replacements!("workgroup_size" => 4),
        );
    }

    #[test]
    fn voxel_cone_tracing_template_is_valid() {
        validate_template(
            template(SpecificShaderTemplate::VoxelConeTracing),
            &[],
            shader_template_replacements!("max_cones" => 16, "max_steps" => 128),
        );
    }

    #[test]
    fn direct_lighting_template_is_valid() {
        validate_template(
            template(SpecificShaderTemplate::DirectLighting),
            &[],
            shader_template_replacements!("max_samples" => 64),
        );
    }

    #[test]
    fn filtering_and_upsampling_templates_are_valid() {
        validate_template(
            template(SpecificShaderTemplate::BilateralFilter),
            &[],
            shader_template_replacements!("radius" => 2),
        );
        validate_template(template(SpecificShaderTemplate::BilateralUpsampling), &[], &[]);
        validate_template(template(SpecificShaderTemplate::BilinearUpsampling), &[], &[]);
    }

    #[test]
    fn lighting_application_and_blit_templates_are_valid() {
        validate_template(template(SpecificShaderTemplate::LightingApplication), &[], &[]);
        validate_template(template(SpecificShaderTemplate::Blit), &[], &[]);
    }
}
