//! Graphics device.

use anyhow::{Result, anyhow, bail};

/// Number of bytes per sample the eight G-buffer color attachments need.
/// wgpu counts an 8-bit RGBA target as 8 bytes, so five 16-bit float
/// targets, two 8-bit targets and one 32-bit integer target add up to 60.
pub const REQUIRED_COLOR_ATTACHMENT_BYTES_PER_SAMPLE: u32 = 60;

/// Largest push constant block of any pass, in bytes.
const REQUIRED_PUSH_CONSTANT_SIZE: u32 = 128;

/// A connected graphics device with its queue. There is no window surface;
/// everything is rendered to offscreen textures.
#[derive(Debug)]
pub struct GraphicsDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter: wgpu::Adapter,
}

/// Features and limits a device must be opened with.
#[derive(Clone, Debug)]
pub struct DeviceRequirements {
    pub features: wgpu::Features,
    /// Features enabled only if the adapter has them.
    pub optional_features: wgpu::Features,
    pub limits: wgpu::Limits,
}

impl DeviceRequirements {
    /// What the voxel cone tracing passes need from an adapter with the given
    /// limits. Buffer size limits are raised to what the adapter supports.
    pub fn for_rendering(adapter_limits: &wgpu::Limits) -> Self {
        Self {
            features: wgpu::Features::PUSH_CONSTANTS,
            optional_features: wgpu::Features::TIMESTAMP_QUERY,
            limits: wgpu::Limits {
                max_push_constant_size: REQUIRED_PUSH_CONSTANT_SIZE,
                max_color_attachment_bytes_per_sample: REQUIRED_COLOR_ATTACHMENT_BYTES_PER_SAMPLE,
                max_color_attachments: 8,
                max_storage_buffers_per_shader_stage: 8,
                max_storage_buffer_binding_size: adapter_limits.max_storage_buffer_binding_size,
                max_buffer_size: adapter_limits.max_buffer_size,
                ..wgpu::Limits::default()
            },
        }
    }

    /// Checks that the adapter meets the requirements and returns the
    /// features to request from it.
    ///
    /// # Errors
    /// Returns an error naming the first missing feature set or limit.
    fn features_to_request(&self, adapter: &wgpu::Adapter) -> Result<wgpu::Features> {
        let supported_features = adapter.features();
        let missing_features = self.features - supported_features;
        if !missing_features.is_empty() {
            bail!("Graphics device is missing required features: {missing_features:?}");
        }

        let supported_limits = adapter.limits();
        if supported_limits.max_color_attachment_bytes_per_sample
            < self.limits.max_color_attachment_bytes_per_sample
        {
            bail!(
                "Graphics device supports only {} color attachment bytes per sample, {} are required",
                supported_limits.max_color_attachment_bytes_per_sample,
                self.limits.max_color_attachment_bytes_per_sample
            );
        }
        if supported_limits.max_push_constant_size < self.limits.max_push_constant_size {
            bail!(
                "Graphics device supports only {} bytes of push constants, {} are required",
                supported_limits.max_push_constant_size,
                self.limits.max_push_constant_size
            );
        }

        Ok(self.features | (supported_features & self.optional_features))
    }
}

impl GraphicsDevice {
    /// Opens a connection to a high-performance graphics device meeting the
    /// given requirements.
    ///
    /// # Errors
    /// Returns an error if:
    /// - No adapter is available.
    /// - The adapter lacks a required feature or limit.
    /// - The connection request fails.
    pub async fn connect(
        wgpu_instance: &wgpu::Instance,
        requirements: impl FnOnce(&wgpu::Adapter) -> DeviceRequirements,
    ) -> Result<Self> {
        let adapter = wgpu_instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| anyhow!("Could not find a graphics adapter"))?;

        let requirements = requirements(&adapter);
        let required_features = requirements.features_to_request(&adapter)?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Renderer device"),
                    required_features,
                    required_limits: requirements.limits,
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await?;

        device.on_uncaptured_error(Box::new(|error| {
            log::error!("Uncaptured graphics device error: {error}");
        }));

        log::info!(
            "Connected to {} ({:?})",
            adapter.get_info().name,
            adapter.get_info().backend
        );

        Ok(Self {
            device,
            queue,
            adapter,
        })
    }

    /// Opens a connection to a graphics device suitable for headless voxel
    /// cone tracing. Timestamp queries are enabled only if the adapter
    /// supports them.
    ///
    /// # Errors
    /// See [`Self::connect`].
    pub async fn connect_for_rendering(wgpu_instance: &wgpu::Instance) -> Result<Self> {
        Self::connect(wgpu_instance, |adapter| {
            DeviceRequirements::for_rendering(&adapter.limits())
        })
        .await
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn adapter(&self) -> &wgpu::Adapter {
        &self.adapter
    }

    /// Whether the device was opened with all the given features.
    pub fn supports_features(&self, features: wgpu::Features) -> bool {
        self.device.features().contains(features)
    }

    /// Evaluates the given closure with a validation error scope pushed on
    /// the device. Any validation error raised by the commands the closure
    /// issues is returned as an error, as is any error returned by the
    /// closure itself.
    ///
    /// # Errors
    /// Returns an error if the closure fails or the device reports a
    /// validation error.
    pub fn with_validation_error_capture<T>(
        &self,
        label: &str,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let result = f();
        let validation_error = pollster::block_on(self.device.pop_error_scope());

        let value = result?;
        if let Some(error) = validation_error {
            bail!("Validation error in {label}: {error}");
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendering_requirements_fit_gbuffer_attachments() {
        let requirements = DeviceRequirements::for_rendering(&wgpu::Limits::default());
        assert!(requirements.limits.max_color_attachments >= 8);
        assert_eq!(
            requirements.limits.max_color_attachment_bytes_per_sample,
            REQUIRED_COLOR_ATTACHMENT_BYTES_PER_SAMPLE
        );
        assert!(requirements.features.contains(wgpu::Features::PUSH_CONSTANTS));
        assert!(!requirements.features.contains(wgpu::Features::TIMESTAMP_QUERY));
    }

    #[test]
    fn rendering_requirements_take_buffer_limits_from_adapter() {
        let adapter_limits = wgpu::Limits {
            max_buffer_size: 1 << 34,
            ..wgpu::Limits::default()
        };
        let requirements = DeviceRequirements::for_rendering(&adapter_limits);
        assert_eq!(requirements.limits.max_buffer_size, 1 << 34);
    }
}
