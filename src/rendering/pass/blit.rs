//! Final copy of the rendered image to the surface.

use crate::{
    gpu::texture::RenderTexture,
    rendering::{
        pass::{
            FLOAT_SAMPLE, FrameContext, FullscreenDraw, PassOutcome, RenderPass, RenderPassID,
            SetupContext, create_fullscreen_pipeline, create_pipeline_layout,
            create_texture_group, create_texture_group_layout, record_fullscreen_draw,
        },
        shader_templates::SpecificShaderTemplate,
        surface::HeadlessSurface,
    },
};
use anyhow::{Result, anyhow};
use std::sync::{Arc, Weak};

/// Copies the last target written by an executed pass to the surface. Runs
/// after every other pass, outside the dependency schedule, since its input
/// depends on which passes executed in the frame.
#[derive(Debug, Default)]
pub struct BlitPass {
    resources: Option<BlitResources>,
}

#[derive(Debug)]
struct BlitResources {
    pipeline: wgpu::RenderPipeline,
    texture_layout: wgpu::BindGroupLayout,
    bind_groups: PerTextureCache<RenderTexture, wgpu::BindGroup>,
}

/// Values derived from textures, keyed by the identity of the texture rather
/// than its label. Entries of dropped textures are evicted on the next
/// insertion.
#[derive(Debug)]
struct PerTextureCache<T, V> {
    entries: Vec<(Weak<T>, V)>,
}

impl<T, V> PerTextureCache<T, V> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn get_or_insert_with(&mut self, texture: &Arc<T>, create: impl FnOnce() -> V) -> &V {
        let existing = self
            .entries
            .iter()
            .position(|(cached, _)| std::ptr::eq(cached.as_ptr(), Arc::as_ptr(texture)));
        let idx = match existing {
            Some(idx) => idx,
            None => {
                self.entries.retain(|(cached, _)| cached.strong_count() > 0);
                self.entries.push((Arc::downgrade(texture), create()));
                self.entries.len() - 1
            }
        };
        &self.entries[idx].1
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

impl BlitPass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RenderPass for BlitPass {
    fn id(&self) -> RenderPassID {
        RenderPassID::Blit
    }

    fn dependencies(&self) -> &'static [RenderPassID] {
        &[]
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        let module = ctx.compile_shader(SpecificShaderTemplate::Blit, &[], &[])?;
        let device = ctx.graphics_device.device();

        let texture_layout = create_texture_group_layout(device, "Blit", &[FLOAT_SAMPLE]);
        let layout = create_pipeline_layout(
            device,
            "Blit",
            &[&ctx.shared.frame_layout, &texture_layout],
            &[],
        );
        let pipeline = create_fullscreen_pipeline(
            device,
            "Blit",
            &layout,
            &module,
            &[HeadlessSurface::FORMAT],
        );

        self.resources = Some(BlitResources {
            pipeline,
            texture_layout,
            bind_groups: PerTextureCache::new(),
        });
        Ok(())
    }

    fn render(&mut self, ctx: &mut FrameContext<'_>) -> Result<PassOutcome> {
        let resources = self
            .resources
            .as_mut()
            .ok_or_else(|| anyhow!("Blit pass used before setup"))?;

        let Some(source) = ctx.last_target().cloned() else {
            log::debug!("No pass produced an image this frame, nothing to blit");
            return Ok(PassOutcome::Skipped);
        };

        let device = ctx.graphics_device.device();
        let texture_layout = &resources.texture_layout;
        let bind_group = resources.bind_groups.get_or_insert_with(&source, || {
            log::debug!("Creating blit bind group for {}", source.label());
            create_texture_group(device, source.label(), texture_layout, &[&source])
        })
        .clone();
        log::trace!("{} blit bind groups cached", resources.bind_groups.len());
        let surface = ctx.surface;

        record_fullscreen_draw(
            ctx,
            RenderPassID::Blit,
            &FullscreenDraw {
                label: "Blit render pass",
                pipeline: &resources.pipeline,
                targets: &[surface.texture()],
                bind_groups: &[&bind_group],
                push_constants: &[],
            },
        );
        Ok(PassOutcome::Executed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn textures_with_equal_labels_get_separate_entries() {
        let first = Arc::new("Lit image".to_string());
        let second = Arc::new("Lit image".to_string());
        let mut cache = PerTextureCache::new();

        assert_eq!(*cache.get_or_insert_with(&first, || 1), 1);
        assert_eq!(*cache.get_or_insert_with(&second, || 2), 2);
        assert_eq!(*cache.get_or_insert_with(&first, || 3), 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn entries_of_dropped_textures_are_evicted() {
        let kept = Arc::new(0_u32);
        let mut cache = PerTextureCache::new();
        cache.get_or_insert_with(&kept, || "kept");
        {
            let dropped = Arc::new(1_u32);
            cache.get_or_insert_with(&dropped, || "dropped");
        }
        assert_eq!(cache.len(), 2);

        let replacement = Arc::new(1_u32);
        assert_eq!(*cache.get_or_insert_with(&replacement, || "replacement"), "replacement");
        assert_eq!(cache.len(), 2);
        assert_eq!(*cache.get_or_insert_with(&kept, || "new"), "kept");
    }
}
