//! GPU-resident batches of instances sharing a mesh and shader
//! configuration.

mod storage;

pub use storage::{BatchStorage, MeshBuffers};

use crate::{
    geometry::{EntityTransform, Sphere},
    gpu::{
        binding,
        growable::{GrowableDeviceBuffer, ScratchDeviceBuffer},
        indirect::DrawIndexedIndirectArgs,
        sync::{FRAMES_IN_FLIGHT, RetiredBuffers},
    },
    scene::{EntityID, MaterialDescription, MeshID, TextureDescriptor},
};
use anyhow::{Result, anyhow, bail};
use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use std::collections::HashMap;

bitflags! {
    /// Optional shader features a batch's instances need.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ShaderConfiguration: u32 {
        const DIFFUSE_TEXTURE = 1 << 0;
        const NORMAL_MAP      = 1 << 1;
    }
}

/// Textures sampled by the instances of a batch.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TextureSet {
    pub diffuse: Option<TextureDescriptor>,
    pub normal: Option<TextureDescriptor>,
}

/// Key identifying the batch an instance belongs to.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BatchKey {
    pub mesh_id: MeshID,
    pub configuration: ShaderConfiguration,
    pub textures: TextureSet,
}

/// Per-instance material as laid out in the material storage buffer.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Zeroable, Pod)]
pub struct MaterialRecord {
    pub diffuse_color: [f32; 3],
    pub shading_model: u32,
    pub emissive: [f32; 3],
    pub roughness: f32,
    /// Layer of the diffuse texture in the material texture array, or -1.
    pub diffuse_layer: i32,
    /// Layer of the normal map in the material texture array, or -1.
    pub normal_layer: i32,
    pub metallic: f32,
    _padding: f32,
}

/// Per-instance model matrix as laid out in the transform storage buffer.
pub type ModelMatrix = [[f32; 4]; 4];

/// The CPU-side state of one instance in a batch.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct InstanceRecord {
    pub slot: usize,
    pub transform: EntityTransform,
    pub model_matrix: ModelMatrix,
    pub material: MaterialRecord,
    pub bounding_sphere: Sphere,
}

/// Bind group layouts shared by all batches.
#[derive(Debug)]
pub struct BatchBindGroupLayouts {
    /// Transforms, materials and visible indices, read when drawing.
    pub instance: wgpu::BindGroupLayout,
    /// Bounding spheres, visible indices and draw commands, used for culling.
    pub culling: wgpu::BindGroupLayout,
}

/// Bind groups of a batch, recreated whenever one of its buffers is
/// reallocated.
#[derive(Debug)]
pub struct BatchBindGroups {
    pub instance: wgpu::BindGroup,
    pub culling: wgpu::BindGroup,
}

/// A homogeneous group of instances drawn with a single indirect draw call.
///
/// The transforms, bounding spheres and materials live in parallel growable
/// buffers indexed by slot. A slot is stable until its entity is removed,
/// at which point the last instance is moved into the freed slot.
///
/// The draw command is mirrored [`FRAMES_IN_FLIGHT`] times, and the frame
/// with index `i` uses copy `i mod FRAMES_IN_FLIGHT`, so the culling pass of
/// one frame never overwrites a command an earlier frame is still drawing
/// with. The visible-index buffer is partitioned the same way.
#[derive(Debug)]
pub struct GraphicsBatch {
    key: BatchKey,
    index_count: u32,
    transforms: GrowableDeviceBuffer<ModelMatrix>,
    bounding_spheres: GrowableDeviceBuffer<Sphere>,
    materials: GrowableDeviceBuffer<MaterialRecord>,
    entity_transforms: Vec<EntityTransform>,
    local_bounding_spheres: Vec<Sphere>,
    slot_entities: Vec<EntityID>,
    entity_slots: HashMap<EntityID, usize>,
    draw_commands: GrowableDeviceBuffer<DrawIndexedIndirectArgs>,
    visible_indices: ScratchDeviceBuffer<u32>,
    bind_groups: Option<BatchBindGroups>,
}

impl MaterialRecord {
    /// Creates the record for the given material, with the given texture
    /// array layers for its diffuse texture and normal map.
    pub fn new(
        material: &MaterialDescription,
        diffuse_layer: Option<u32>,
        normal_layer: Option<u32>,
    ) -> Self {
        let layer_index = |layer: Option<u32>| layer.map_or(-1, |layer| layer as i32);
        Self {
            diffuse_color: material.diffuse_color.into(),
            shading_model: material.shading_model.id(),
            emissive: material.emissive.into(),
            roughness: material.roughness.clamp(0.0, 1.0),
            diffuse_layer: layer_index(diffuse_layer),
            normal_layer: layer_index(normal_layer),
            metallic: material.metallic.clamp(0.0, 1.0),
            _padding: 0.0,
        }
    }
}

impl BatchKey {
    /// Determines the key of the batch an instance with the given mesh and
    /// material belongs to.
    pub fn for_material(mesh_id: MeshID, material: &MaterialDescription) -> Self {
        let mut configuration = ShaderConfiguration::empty();
        configuration.set(
            ShaderConfiguration::DIFFUSE_TEXTURE,
            material.diffuse_texture.is_some(),
        );
        configuration.set(ShaderConfiguration::NORMAL_MAP, material.normal_texture.is_some());
        Self {
            mesh_id,
            configuration,
            textures: TextureSet {
                diffuse: material.diffuse_texture.clone(),
                normal: material.normal_texture.clone(),
            },
        }
    }
}

impl BatchBindGroupLayouts {
    pub fn new(device: &wgpu::Device) -> Self {
        let draw_stages = wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT;

        let instance = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Batch instance bind group layout"),
            entries: &[
                binding::storage_buffer_entry(0, draw_stages, true),
                binding::storage_buffer_entry(1, draw_stages, true),
                binding::storage_buffer_entry(2, draw_stages, true),
            ],
        });

        let culling = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Batch culling bind group layout"),
            entries: &[
                binding::storage_buffer_entry(0, wgpu::ShaderStages::COMPUTE, true),
                binding::storage_buffer_entry(1, wgpu::ShaderStages::COMPUTE, false),
                binding::storage_buffer_entry(2, wgpu::ShaderStages::COMPUTE, false),
            ],
        });

        Self { instance, culling }
    }
}

impl GraphicsBatch {
    /// Creates an empty batch for a mesh with the given number of indices.
    pub fn new(key: BatchKey, index_count: u32) -> Self {
        let label = format!("Batch {:?}/{:?}", key.mesh_id, key.configuration);

        let mut draw_commands = GrowableDeviceBuffer::with_capacity(
            format!("{label} draw commands"),
            wgpu::BufferUsages::INDIRECT | wgpu::BufferUsages::STORAGE,
            FRAMES_IN_FLIGHT,
        );
        for _ in 0..FRAMES_IN_FLIGHT {
            draw_commands.push(DrawIndexedIndirectArgs::new(index_count, 0));
        }

        Self {
            index_count,
            transforms: GrowableDeviceBuffer::new(
                format!("{label} transforms"),
                wgpu::BufferUsages::STORAGE,
            ),
            bounding_spheres: GrowableDeviceBuffer::new(
                format!("{label} bounding spheres"),
                wgpu::BufferUsages::STORAGE,
            ),
            materials: GrowableDeviceBuffer::new(
                format!("{label} materials"),
                wgpu::BufferUsages::STORAGE,
            ),
            entity_transforms: Vec::new(),
            local_bounding_spheres: Vec::new(),
            slot_entities: Vec::new(),
            entity_slots: HashMap::new(),
            draw_commands,
            visible_indices: ScratchDeviceBuffer::new(
                format!("{label} visible indices"),
                wgpu::BufferUsages::STORAGE,
            ),
            bind_groups: None,
            key,
        }
    }

    pub fn key(&self) -> &BatchKey {
        &self.key
    }

    /// Number of indices in the batch's mesh.
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn instance_count(&self) -> usize {
        self.slot_entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slot_entities.is_empty()
    }

    /// Number of instances the per-instance buffers can hold without growing.
    /// Each partition of the visible-index buffer has this size.
    pub fn capacity(&self) -> usize {
        self.transforms.capacity()
    }

    /// Returns the slot of the given entity.
    pub fn slot(&self, entity_id: EntityID) -> Option<usize> {
        self.entity_slots.get(&entity_id).copied()
    }

    /// Returns the entity occupying each slot.
    pub fn slot_entities(&self) -> &[EntityID] {
        &self.slot_entities
    }

    /// Adds an instance for the given entity in the next free slot and
    /// returns the slot. `local_bounding_sphere` bounds the mesh in model
    /// space.
    ///
    /// # Errors
    /// Returns an error if the entity already has an instance in the batch.
    /// The batch is left unchanged in that case.
    pub fn add_instance(
        &mut self,
        transform: &EntityTransform,
        material: MaterialRecord,
        local_bounding_sphere: Sphere,
        entity_id: EntityID,
    ) -> Result<usize> {
        if self.entity_slots.contains_key(&entity_id) {
            bail!("Entity {entity_id:?} already has an instance in batch {:?}", self.key);
        }

        let model_matrix = transform.model_matrix();
        let slot = self.transforms.push(model_matrix.into());
        self.bounding_spheres
            .push(local_bounding_sphere.transformed(&model_matrix, transform.scale));
        self.materials.push(material);
        self.entity_transforms.push(*transform);
        self.local_bounding_spheres.push(local_bounding_sphere);
        self.slot_entities.push(entity_id);
        self.entity_slots.insert(entity_id, slot);

        Ok(slot)
    }

    /// Replaces the transform of the given entity's instance, recomputing its
    /// model matrix and world-space bounding sphere.
    ///
    /// # Errors
    /// Returns an error if the entity has no instance in the batch.
    pub fn update_instance(
        &mut self,
        entity_id: EntityID,
        transform: &EntityTransform,
    ) -> Result<()> {
        let slot = self.existing_slot(entity_id)?;

        let model_matrix = transform.model_matrix();
        self.transforms.set(slot, model_matrix.into());
        self.bounding_spheres.set(
            slot,
            self.local_bounding_spheres[slot].transformed(&model_matrix, transform.scale),
        );
        self.entity_transforms[slot] = *transform;

        Ok(())
    }

    /// Replaces the material of the given entity's instance.
    ///
    /// # Errors
    /// Returns an error if the entity has no instance in the batch.
    pub fn update_material(&mut self, entity_id: EntityID, material: MaterialRecord) -> Result<()> {
        let slot = self.existing_slot(entity_id)?;
        self.materials.set(slot, material);
        Ok(())
    }

    /// Removes the given entity's instance by moving the instance in the last
    /// slot into its place. Returns whether the batch became empty.
    ///
    /// # Errors
    /// Returns an error if the entity has no instance in the batch.
    pub fn remove_instance(&mut self, entity_id: EntityID) -> Result<bool> {
        let slot = self.existing_slot(entity_id)?;

        self.transforms.swap_remove(slot);
        self.bounding_spheres.swap_remove(slot);
        self.materials.swap_remove(slot);
        self.entity_transforms.swap_remove(slot);
        self.local_bounding_spheres.swap_remove(slot);
        self.slot_entities.swap_remove(slot);
        self.entity_slots.remove(&entity_id);

        if let Some(moved_entity) = self.slot_entities.get(slot) {
            self.entity_slots.insert(*moved_entity, slot);
        }

        Ok(self.is_empty())
    }

    /// Returns the state of the given entity's instance.
    pub fn lookup(&self, entity_id: EntityID) -> Option<InstanceRecord> {
        let slot = self.slot(entity_id)?;
        Some(InstanceRecord {
            slot,
            transform: self.entity_transforms[slot],
            model_matrix: *self.transforms.get(slot)?,
            material: *self.materials.get(slot)?,
            bounding_sphere: *self.bounding_spheres.get(slot)?,
        })
    }

    /// Returns the draw command in the given frame slot as last written from
    /// the CPU.
    pub fn draw_command(&self, frame_slot: usize) -> Option<&DrawIndexedIndirectArgs> {
        self.draw_commands.get(frame_slot)
    }

    /// Writes a draw command with zero instances into the given frame slot,
    /// for the culling pass to count visible instances into.
    pub fn reset_draw_command(&mut self, frame_slot: usize) {
        self.draw_commands
            .set(frame_slot, DrawIndexedIndirectArgs::new(self.index_count, 0));
    }

    /// Byte offset of the draw command of the given frame slot in the
    /// draw-command buffer.
    pub fn draw_command_offset(frame_slot: usize) -> wgpu::BufferAddress {
        DrawIndexedIndirectArgs::byte_offset_for_slot(frame_slot) as wgpu::BufferAddress
    }

    /// Offset of the given frame slot's partition of the visible-index
    /// buffer, in elements.
    pub fn visible_index_offset(&self, frame_slot: usize) -> u32 {
        u32::try_from(frame_slot * self.capacity()).unwrap_or(u32::MAX)
    }

    pub fn draw_command_buffer(&self) -> Option<&wgpu::Buffer> {
        self.draw_commands.device_buffer()
    }

    pub fn bind_groups(&self) -> Option<&BatchBindGroups> {
        self.bind_groups.as_ref()
    }

    /// Records the device writes needed to bring the batch's GPU buffers in
    /// line with its CPU state, allocating or growing buffers as needed, and
    /// recreates the bind groups if any buffer was reallocated.
    ///
    /// # Errors
    /// Returns an error if a buffer is unexpectedly missing after the flush.
    pub fn sync_with_device(
        &mut self,
        device: &wgpu::Device,
        command_encoder: &mut wgpu::CommandEncoder,
        staging_belt: &mut wgpu::util::StagingBelt,
        retired_buffers: &mut RetiredBuffers,
        layouts: &BatchBindGroupLayouts,
    ) -> Result<()> {
        let mut reallocated = false;
        reallocated |= self
            .transforms
            .flush(device, command_encoder, staging_belt, retired_buffers);
        reallocated |=
            self.bounding_spheres
                .flush(device, command_encoder, staging_belt, retired_buffers);
        reallocated |= self
            .materials
            .flush(device, command_encoder, staging_belt, retired_buffers);
        reallocated |=
            self.draw_commands
                .flush(device, command_encoder, staging_belt, retired_buffers);
        reallocated |= self.visible_indices.ensure_capacity(
            device,
            FRAMES_IN_FLIGHT * self.capacity(),
            retired_buffers,
        );

        if reallocated || self.bind_groups.is_none() {
            self.bind_groups = Some(self.create_bind_groups(device, layouts)?);
        }
        Ok(())
    }

    /// Retires every GPU buffer of the batch so that they are destroyed once
    /// the current submission has completed.
    pub fn retire_device_buffers(&mut self, retired_buffers: &mut RetiredBuffers) {
        self.bind_groups = None;
        self.transforms.retire_device_buffer(retired_buffers);
        self.bounding_spheres.retire_device_buffer(retired_buffers);
        self.materials.retire_device_buffer(retired_buffers);
        self.draw_commands.retire_device_buffer(retired_buffers);
        self.visible_indices.retire(retired_buffers);
    }

    fn existing_slot(&self, entity_id: EntityID) -> Result<usize> {
        self.slot(entity_id)
            .ok_or_else(|| anyhow!("Entity {entity_id:?} has no instance in batch {:?}", self.key))
    }

    fn create_bind_groups(
        &self,
        device: &wgpu::Device,
        layouts: &BatchBindGroupLayouts,
    ) -> Result<BatchBindGroups> {
        let missing = || anyhow!("Missing GPU buffer for batch {:?}", self.key);
        let transforms = self.transforms.device_buffer().ok_or_else(missing)?;
        let bounding_spheres = self.bounding_spheres.device_buffer().ok_or_else(missing)?;
        let materials = self.materials.device_buffer().ok_or_else(missing)?;
        let draw_commands = self.draw_commands.device_buffer().ok_or_else(missing)?;
        let visible_indices = self.visible_indices.buffer().ok_or_else(missing)?;

        let instance = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Batch instance bind group"),
            layout: &layouts.instance,
            entries: &[
                binding::buffer_binding(0, transforms),
                binding::buffer_binding(1, materials),
                binding::buffer_binding(2, visible_indices),
            ],
        });

        let culling = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Batch culling bind group"),
            layout: &layouts.culling,
            entries: &[
                binding::buffer_binding(0, bounding_spheres),
                binding::buffer_binding(1, visible_indices),
                binding::buffer_binding(2, draw_commands),
            ],
        });

        Ok(BatchBindGroups { instance, culling })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::growable::INIT_BUFFER_SIZE;
    use approx::assert_abs_diff_eq;
    use nalgebra::{Point3, vector};

    fn key() -> BatchKey {
        BatchKey::for_material(MeshID(0), &MaterialDescription::default())
    }

    fn material(roughness: f32) -> MaterialRecord {
        MaterialRecord::new(
            &MaterialDescription {
                roughness,
                ..Default::default()
            },
            None,
            None,
        )
    }

    fn transform(idx: usize) -> EntityTransform {
        EntityTransform::from_position(vector![idx as f32, 2.0 * idx as f32, -1.0])
    }

    fn unit_sphere() -> Sphere {
        Sphere::new(Point3::origin(), 1.0)
    }

    fn batch_with_instances(count: usize) -> GraphicsBatch {
        let mut batch = GraphicsBatch::new(key(), 36);
        for idx in 0..count {
            batch
                .add_instance(
                    &transform(idx),
                    material(idx as f32 / count as f32),
                    unit_sphere(),
                    EntityID(idx as u64),
                )
                .unwrap();
        }
        batch
    }

    #[test]
    fn material_record_is_48_bytes() {
        assert_eq!(std::mem::size_of::<MaterialRecord>(), 48);
    }

    #[test]
    fn slots_are_stable_under_append() {
        let count = 20;
        let batch = batch_with_instances(count);
        for idx in 0..count {
            let record = batch.lookup(EntityID(idx as u64)).unwrap();
            assert_eq!(record.slot, idx);
            assert_eq!(record.transform, transform(idx));
            assert_eq!(record.material, material(idx as f32 / count as f32));
        }
    }

    #[test]
    fn adding_existing_entity_fails_and_leaves_batch_unchanged() {
        let mut batch = batch_with_instances(3);
        let result = batch.add_instance(&transform(9), material(0.1), unit_sphere(), EntityID(1));

        assert!(result.is_err());
        assert_eq!(batch.instance_count(), 3);
        assert_eq!(batch.transforms.len(), 3);
        assert_eq!(batch.bounding_spheres.len(), 3);
        assert_eq!(batch.materials.len(), 3);
        assert_eq!(batch.lookup(EntityID(1)).unwrap().transform, transform(1));
    }

    #[test]
    fn removal_moves_last_instance_into_freed_slot() {
        let mut batch = batch_with_instances(5);
        let last_before = batch.lookup(EntityID(4)).unwrap();

        let became_empty = batch.remove_instance(EntityID(1)).unwrap();

        assert!(!became_empty);
        assert_eq!(batch.instance_count(), 4);
        assert!(batch.lookup(EntityID(1)).is_none());

        let moved = batch.lookup(EntityID(4)).unwrap();
        assert_eq!(moved.slot, 1);
        assert_eq!(moved.transform, last_before.transform);
        assert_eq!(moved.model_matrix, last_before.model_matrix);
        assert_eq!(moved.material, last_before.material);
        assert_eq!(moved.bounding_sphere, last_before.bounding_sphere);

        for idx in [0, 2, 3] {
            assert_eq!(batch.slot(EntityID(idx)), Some(idx as usize));
        }
    }

    #[test]
    fn removing_last_instance_reports_empty_batch() {
        let mut batch = batch_with_instances(1);
        assert!(batch.remove_instance(EntityID(0)).unwrap());
        assert!(batch.is_empty());
    }

    #[test]
    fn removing_unknown_entity_fails() {
        let mut batch = batch_with_instances(2);
        assert!(batch.remove_instance(EntityID(7)).is_err());
        assert_eq!(batch.instance_count(), 2);
    }

    #[test]
    fn growth_preserves_all_instance_data() {
        let mut batch = batch_with_instances(INIT_BUFFER_SIZE);
        let before: Vec<_> = (0..INIT_BUFFER_SIZE)
            .map(|idx| batch.lookup(EntityID(idx as u64)).unwrap())
            .collect();

        for idx in INIT_BUFFER_SIZE..(2 * INIT_BUFFER_SIZE) {
            batch
                .add_instance(&transform(idx), material(0.5), unit_sphere(), EntityID(idx as u64))
                .unwrap();
        }

        assert!(batch.capacity() > INIT_BUFFER_SIZE);
        for (idx, record) in before.iter().enumerate() {
            let after = batch.lookup(EntityID(idx as u64)).unwrap();
            assert_eq!(
                bytemuck::bytes_of(&after.model_matrix),
                bytemuck::bytes_of(&record.model_matrix)
            );
            assert_eq!(bytemuck::bytes_of(&after.material), bytemuck::bytes_of(&record.material));
            assert_eq!(
                bytemuck::bytes_of(&after.bounding_sphere),
                bytemuck::bytes_of(&record.bounding_sphere)
            );
        }
    }

    #[test]
    fn adding_101_instances_grows_once_to_150() {
        let mut batch = batch_with_instances(INIT_BUFFER_SIZE);
        assert_eq!(batch.capacity(), INIT_BUFFER_SIZE);

        let entity_id = EntityID(INIT_BUFFER_SIZE as u64);
        let added_transform = transform(INIT_BUFFER_SIZE);
        let added_material = material(0.25);
        let local_sphere = Sphere::new(Point3::new(0.5, 0.0, 0.0), 2.0);

        let slot = batch
            .add_instance(&added_transform, added_material, local_sphere, entity_id)
            .unwrap();

        assert_eq!(slot, INIT_BUFFER_SIZE);
        assert_eq!(batch.capacity(), 150);
        assert_eq!(batch.bounding_spheres.capacity(), 150);
        assert_eq!(batch.materials.capacity(), 150);
        assert_eq!(batch.instance_count(), INIT_BUFFER_SIZE + 1);

        let record = batch.lookup(entity_id).unwrap();
        assert_eq!(record.slot, INIT_BUFFER_SIZE);
        assert_eq!(record.transform, added_transform);
        assert_eq!(record.material, added_material);
        assert_abs_diff_eq!(
            record.bounding_sphere.center(),
            Point3::from(added_transform.position + vector![0.5, 0.0, 0.0]),
            epsilon = 1e-5
        );
        assert_abs_diff_eq!(record.bounding_sphere.radius(), 2.0, epsilon = 1e-6);
    }

    #[test]
    fn updating_instance_recomputes_bounding_sphere() {
        let mut batch = batch_with_instances(2);
        let new_transform = EntityTransform {
            position: vector![0.0, 5.0, 0.0],
            rotation_deg: vector![0.0, 0.0, 0.0],
            scale: 3.0,
        };

        batch.update_instance(EntityID(1), &new_transform).unwrap();

        let record = batch.lookup(EntityID(1)).unwrap();
        assert_eq!(record.transform, new_transform);
        assert_abs_diff_eq!(
            record.bounding_sphere.center(),
            Point3::new(0.0, 5.0, 0.0),
            epsilon = 1e-6
        );
        assert_abs_diff_eq!(record.bounding_sphere.radius(), 3.0);
    }

    #[test]
    fn draw_commands_are_mirrored_per_frame_slot() {
        let mut batch = batch_with_instances(4);
        batch.reset_draw_command(2);

        assert_eq!(batch.draw_command(2).unwrap().instance_count, 0);
        assert_eq!(batch.draw_command(2).unwrap().index_count, 36);
        assert_eq!(batch.draw_command(0).unwrap().index_count, 36);
        assert_eq!(GraphicsBatch::draw_command_offset(2), 40);
    }

    #[test]
    fn zero_index_mesh_gives_well_formed_draw_command() {
        let mut batch = GraphicsBatch::new(key(), 0);
        batch
            .add_instance(&transform(0), material(0.5), unit_sphere(), EntityID(0))
            .unwrap();
        batch.reset_draw_command(0);
        let command = batch.draw_command(0).unwrap();
        assert_eq!(command.index_count, 0);
        assert_eq!(command.instance_count, 0);
    }

    #[test]
    fn visible_index_partitions_follow_capacity() {
        let batch = batch_with_instances(INIT_BUFFER_SIZE + 1);
        assert_eq!(batch.visible_index_offset(0), 0);
        assert_eq!(batch.visible_index_offset(2), 2 * batch.capacity() as u32);
    }

    #[test]
    fn batch_key_reflects_material_textures() {
        let plain = BatchKey::for_material(MeshID(1), &MaterialDescription::default());
        assert!(plain.configuration.is_empty());

        let textured = BatchKey::for_material(
            MeshID(1),
            &MaterialDescription {
                diffuse_texture: Some(TextureDescriptor::new("a.png")),
                ..Default::default()
            },
        );
        assert_eq!(textured.configuration, ShaderConfiguration::DIFFUSE_TEXTURE);
        assert_ne!(plain, textured);
    }
}
