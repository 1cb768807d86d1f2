//! GPU resources shared by all passes.

use crate::{
    batch::BatchBindGroupLayouts,
    gpu::{
        GraphicsDevice, binding,
        buffer::{GPUBuffer, GPUBufferType},
        texture::{MaterialTextureArray, SamplerSet},
    },
    rendering::{RenderingConfig, uniform::FrameUniform},
    scene::TextureDescriptor,
};
use std::{borrow::Cow, mem};

/// Bind group index of the frame uniform and samplers in every shader.
pub const FRAME_GROUP: u32 = 0;

/// Resources created with the renderer and used by every pass: the frame
/// uniform and samplers (bind group 0 of every shader), the material
/// texture array and the bind group layouts of the batches.
#[derive(Debug)]
pub struct SharedResources {
    pub samplers: SamplerSet,
    pub frame_uniform: GPUBuffer,
    pub frame_layout: wgpu::BindGroupLayout,
    pub frame_bind_group: wgpu::BindGroup,
    pub material_textures: MaterialTextureArray<TextureDescriptor>,
    pub material_layout: wgpu::BindGroupLayout,
    pub material_bind_group: wgpu::BindGroup,
    pub batch_layouts: BatchBindGroupLayouts,
}

impl SharedResources {
    pub fn new(graphics_device: &GraphicsDevice, config: &RenderingConfig) -> Self {
        let device = graphics_device.device();
        let all_stages = wgpu::ShaderStages::VERTEX_FRAGMENT | wgpu::ShaderStages::COMPUTE;

        let samplers = SamplerSet::new(graphics_device);

        let frame_uniform = GPUBuffer::new_uninitialized(
            graphics_device,
            mem::size_of::<FrameUniform>(),
            GPUBufferType::Uniform.usage(),
            Cow::Borrowed("Frame uniform"),
        );

        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Frame bind group layout"),
            entries: &[
                binding::uniform_buffer_entry(0, all_stages),
                binding::sampler_entry(1, all_stages, wgpu::SamplerBindingType::Filtering),
                binding::sampler_entry(2, all_stages, wgpu::SamplerBindingType::NonFiltering),
                binding::sampler_entry(3, all_stages, wgpu::SamplerBindingType::Filtering),
                binding::sampler_entry(4, all_stages, wgpu::SamplerBindingType::Comparison),
            ],
        });

        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Frame bind group"),
            layout: &frame_layout,
            entries: &[
                frame_uniform.create_bind_group_entry(0),
                binding::sampler_binding(1, &samplers.linear),
                binding::sampler_binding(2, &samplers.nearest),
                binding::sampler_binding(3, &samplers.repeating),
                binding::sampler_binding(4, &samplers.shadow_comparison),
            ],
        });

        let material_textures = MaterialTextureArray::new(
            graphics_device,
            config.textures.layer_size,
            config.textures.max_layers,
        );

        let material_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Material texture bind group layout"),
            entries: &[binding::texture_entry(
                0,
                wgpu::ShaderStages::FRAGMENT,
                wgpu::TextureSampleType::Float { filterable: true },
                wgpu::TextureViewDimension::D2Array,
            )],
        });

        let material_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Material texture bind group"),
            layout: &material_layout,
            entries: &[binding::texture_view_binding(0, material_textures.view())],
        });

        Self {
            samplers,
            frame_uniform,
            frame_layout,
            frame_bind_group,
            material_textures,
            material_layout,
            material_bind_group,
            batch_layouts: BatchBindGroupLayouts::new(device),
        }
    }
}
