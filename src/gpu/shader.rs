//! Compilation and caching of shaders.

pub mod template;

use crate::gpu::GraphicsDevice;
use anyhow::{Context, Result};
use std::{borrow::Cow, collections::HashMap, sync::Arc};
use template::ShaderTemplate;

/// Compiles WGSL shaders resolved from templates and caches the resulting
/// modules by label, flags and replacements.
#[derive(Debug, Default)]
pub struct ShaderManager {
    shaders: HashMap<String, Arc<wgpu::ShaderModule>>,
}

impl ShaderManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct shaders compiled so far.
    pub fn shader_count(&self) -> usize {
        self.shaders.len()
    }

    /// Resolves the given template with the given flags and replacements and
    /// compiles the result, unless the same combination has been compiled
    /// before.
    ///
    /// The source is parsed and validated with naga before being handed to
    /// the device, so compilation errors are reported with the label and
    /// source location instead of surfacing as device errors.
    ///
    /// # Errors
    /// Returns an error if the template can not be resolved or the resolved
    /// source is not valid WGSL.
    pub fn compile_template(
        &mut self,
        graphics_device: &GraphicsDevice,
        label: &str,
        template: &ShaderTemplate<'_>,
        flags_to_set: &[&str],
        replacements: &[(&str, String)],
    ) -> Result<Arc<wgpu::ShaderModule>> {
        let key = create_shader_key(label, flags_to_set, replacements);
        if let Some(module) = self.shaders.get(&key) {
            return Ok(Arc::clone(module));
        }

        let source = template
            .resolve(flags_to_set, replacements)
            .with_context(|| format!("Could not resolve shader template `{label}`"))?;

        let module = Arc::new(compile_source(graphics_device, &key, &source)?);
        log::debug!("Compiled shader {key}");

        self.shaders.insert(key, Arc::clone(&module));
        Ok(module)
    }
}

/// Validates and compiles the given WGSL source into a shader module.
///
/// # Errors
/// Returns an error naming `label` if the source is not valid WGSL.
pub fn compile_source(
    graphics_device: &GraphicsDevice,
    label: &str,
    source: &str,
) -> Result<wgpu::ShaderModule> {
    let module = template::parse_and_validate_wgsl(label, source)?;
    Ok(graphics_device
        .device()
        .create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Naga(Cow::Owned(module)),
        }))
}

/// Creates a string uniquely identifying the shader resolved from the
/// template with the given label using the given flags and replacements.
fn create_shader_key(
    label: &str,
    flags_to_set: &[&str],
    replacements: &[(&str, String)],
) -> String {
    let mut flags: Vec<_> = flags_to_set.to_vec();
    flags.sort_unstable();

    let mut replacements: Vec<_> = replacements
        .iter()
        .map(|(label, replacement)| format!("{label} = {replacement}"))
        .collect();
    replacements.sort_unstable();

    let entries: Vec<_> = flags
        .into_iter()
        .map(str::to_string)
        .chain(replacements)
        .collect();

    format!("{label}{{ {} }}", entries.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shader_key_does_not_depend_on_flag_order() {
        assert_eq!(
            create_shader_key("test", &["b", "a"], &[]),
            create_shader_key("test", &["a", "b"], &[])
        );
    }

    #[test]
    fn shader_key_lists_flags_and_replacements() {
        let key = create_shader_key(
            "culling",
            &["ENABLED"],
            shader_template_replacements!("size" => 64),
        );
        assert_eq!(key, "culling{ ENABLED, size = 64 }");
    }

    #[test]
    fn shader_keys_differ_for_different_replacements() {
        assert_ne!(
            create_shader_key("x", &[], shader_template_replacements!("n" => 1)),
            create_shader_key("x", &[], shader_template_replacements!("n" => 2))
        );
    }
}
