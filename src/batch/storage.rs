//! Routing of instances to batches.

use crate::{
    batch::{BatchBindGroupLayouts, BatchKey, GraphicsBatch, InstanceRecord, MaterialRecord},
    geometry::{EntityTransform, Sphere},
    gpu::{
        GraphicsDevice,
        buffer::{GPUBuffer, GPUBufferType},
        sync::RetiredBuffers,
    },
    scene::{EntityID, MeshData, MeshID, MeshVertex},
};
use anyhow::{Result, anyhow, bail};
use std::collections::{BTreeMap, HashMap};

/// Vertex and index buffers of a mesh, shared by every batch using the mesh.
#[derive(Debug)]
pub struct MeshBuffers {
    pub vertices: GPUBuffer,
    pub indices: GPUBuffer,
}

#[derive(Debug)]
struct MeshEntry {
    index_count: u32,
    bounding_sphere: Sphere,
    pending_upload: Option<MeshData>,
    buffers: Option<MeshBuffers>,
}

/// Owns every [`GraphicsBatch`] and the mesh buffers they draw with.
///
/// Batches are created when the first instance with a new [`BatchKey`] is
/// added and removed when their last instance is removed. Iteration order
/// over batches is determined by the keys, so it is stable between frames.
#[derive(Debug, Default)]
pub struct BatchStorage {
    batches: BTreeMap<BatchKey, GraphicsBatch>,
    entity_batches: HashMap<EntityID, BatchKey>,
    meshes: HashMap<MeshID, MeshEntry>,
    removed_batches: Vec<GraphicsBatch>,
}

impl MeshBuffers {
    fn new(graphics_device: &GraphicsDevice, mesh_id: MeshID, mesh: &MeshData) -> Self {
        let vertices = GPUBuffer::new_initialized(
            graphics_device,
            bytemuck::cast_slice(mesh.vertices()),
            std::mem::size_of::<MeshVertex>(),
            GPUBufferType::Vertex.usage(),
            format!("Mesh {} vertex", mesh_id.0).into(),
        );
        let indices = GPUBuffer::new_initialized(
            graphics_device,
            bytemuck::cast_slice(mesh.indices()),
            std::mem::size_of::<u32>(),
            GPUBufferType::Index.usage(),
            format!("Mesh {} index", mesh_id.0).into(),
        );
        Self { vertices, indices }
    }
}

impl BatchStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    /// Total number of instances over all batches.
    pub fn instance_count(&self) -> usize {
        self.entity_batches.len()
    }

    pub fn batches(&self) -> impl Iterator<Item = &GraphicsBatch> {
        self.batches.values()
    }

    pub fn batch(&self, key: &BatchKey) -> Option<&GraphicsBatch> {
        self.batches.get(key)
    }

    /// Returns the key of the batch holding the given entity's instance.
    pub fn batch_key_for_entity(&self, entity_id: EntityID) -> Option<&BatchKey> {
        self.entity_batches.get(&entity_id)
    }

    pub fn has_entity(&self, entity_id: EntityID) -> bool {
        self.entity_batches.contains_key(&entity_id)
    }

    /// Returns the GPU buffers of the given mesh, if they have been created.
    pub fn mesh_buffers(&self, mesh_id: MeshID) -> Option<&MeshBuffers> {
        self.meshes.get(&mesh_id)?.buffers.as_ref()
    }

    /// Adds an instance for the given entity to the batch with the given
    /// key, creating the batch if needed. The mesh is obtained from
    /// `load_mesh` only the first time it is referenced.
    ///
    /// # Errors
    /// Returns an error if the entity already has an instance, or if the
    /// mesh can not be loaded. Nothing is modified in either case.
    pub fn add_instance(
        &mut self,
        key: BatchKey,
        load_mesh: impl FnOnce(MeshID) -> Result<MeshData>,
        entity_id: EntityID,
        transform: &EntityTransform,
        material: MaterialRecord,
    ) -> Result<()> {
        if self.entity_batches.contains_key(&entity_id) {
            bail!("Entity {entity_id:?} already has a renderable component");
        }

        if !self.meshes.contains_key(&key.mesh_id) {
            let mesh = load_mesh(key.mesh_id)?;
            log::debug!(
                "Registering mesh {:?} with {} vertices and {} indices",
                key.mesh_id,
                mesh.vertices().len(),
                mesh.index_count()
            );
            self.meshes.insert(
                key.mesh_id,
                MeshEntry {
                    index_count: mesh.index_count(),
                    bounding_sphere: mesh.bounding_sphere(),
                    pending_upload: Some(mesh),
                    buffers: None,
                },
            );
        }
        let mesh = &self.meshes[&key.mesh_id];

        let batch = self.batches.entry(key.clone()).or_insert_with(|| {
            log::debug!("Creating batch for {key:?}");
            GraphicsBatch::new(key.clone(), mesh.index_count)
        });
        batch.add_instance(transform, material, mesh.bounding_sphere, entity_id)?;

        self.entity_batches.insert(entity_id, key);
        Ok(())
    }

    /// Removes the given entity's instance. A batch left without instances
    /// is removed, and its buffers are retired at the next device sync.
    ///
    /// # Errors
    /// Returns an error if the entity has no instance.
    pub fn remove_instance(&mut self, entity_id: EntityID) -> Result<()> {
        let key = self
            .entity_batches
            .remove(&entity_id)
            .ok_or_else(|| anyhow!("Entity {entity_id:?} has no renderable component"))?;

        let batch = self
            .batches
            .get_mut(&key)
            .ok_or_else(|| anyhow!("Missing batch {key:?} for entity {entity_id:?}"))?;

        if batch.remove_instance(entity_id)? {
            log::debug!("Removing empty batch {key:?}");
            if let Some(batch) = self.batches.remove(&key) {
                self.removed_batches.push(batch);
            }
        }
        Ok(())
    }

    /// Replaces the transform of the given entity's instance.
    ///
    /// # Errors
    /// Returns an error if the entity has no instance.
    pub fn update_transform(
        &mut self,
        entity_id: EntityID,
        transform: &EntityTransform,
    ) -> Result<()> {
        self.batch_mut_for_entity(entity_id)?
            .update_instance(entity_id, transform)
    }

    /// Replaces the material of the given entity's instance.
    ///
    /// # Errors
    /// Returns an error if the entity has no instance.
    pub fn update_material(&mut self, entity_id: EntityID, material: MaterialRecord) -> Result<()> {
        self.batch_mut_for_entity(entity_id)?
            .update_material(entity_id, material)
    }

    /// Returns the state of the given entity's instance.
    pub fn lookup(&self, entity_id: EntityID) -> Option<InstanceRecord> {
        let key = self.entity_batches.get(&entity_id)?;
        self.batches.get(key)?.lookup(entity_id)
    }

    /// Prepares the draw command of every batch in the given frame slot for
    /// the culling pass.
    pub fn reset_draw_commands(&mut self, frame_slot: usize) {
        for batch in self.batches.values_mut() {
            batch.reset_draw_command(frame_slot);
        }
    }

    /// Uploads new meshes, retires the buffers of removed batches and records
    /// the device writes of every batch.
    ///
    /// # Errors
    /// Returns an error if a batch fails to sync.
    pub fn sync_with_device(
        &mut self,
        graphics_device: &GraphicsDevice,
        command_encoder: &mut wgpu::CommandEncoder,
        staging_belt: &mut wgpu::util::StagingBelt,
        retired_buffers: &mut RetiredBuffers,
        layouts: &BatchBindGroupLayouts,
    ) -> Result<()> {
        for mut batch in self.removed_batches.drain(..) {
            batch.retire_device_buffers(retired_buffers);
        }

        for (mesh_id, entry) in &mut self.meshes {
            if let Some(mesh) = entry.pending_upload.take() {
                entry.buffers = Some(MeshBuffers::new(graphics_device, *mesh_id, &mesh));
            }
        }

        for batch in self.batches.values_mut() {
            batch.sync_with_device(
                graphics_device.device(),
                command_encoder,
                staging_belt,
                retired_buffers,
                layouts,
            )?;
        }
        Ok(())
    }

    fn batch_mut_for_entity(&mut self, entity_id: EntityID) -> Result<&mut GraphicsBatch> {
        let key = self
            .entity_batches
            .get(&entity_id)
            .ok_or_else(|| anyhow!("Entity {entity_id:?} has no renderable component"))?;
        self.batches
            .get_mut(key)
            .ok_or_else(|| anyhow!("Missing batch {key:?} for entity {entity_id:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{MaterialDescription, TextureDescriptor};
    use nalgebra::vector;

    fn load_box(_mesh_id: MeshID) -> Result<MeshData> {
        Ok(MeshData::create_box(1.0, 1.0, 1.0))
    }

    fn textured_material() -> MaterialDescription {
        MaterialDescription {
            diffuse_texture: Some(TextureDescriptor::new("wood.png")),
            ..Default::default()
        }
    }

    fn add(
        storage: &mut BatchStorage,
        mesh_id: u32,
        material: &MaterialDescription,
        entity: u64,
    ) -> Result<()> {
        storage.add_instance(
            BatchKey::for_material(MeshID(mesh_id), material),
            load_box,
            EntityID(entity),
            &EntityTransform::from_position(vector![entity as f32, 0.0, 0.0]),
            MaterialRecord::new(material, Some(0), None),
        )
    }

    #[test]
    fn instances_are_routed_by_mesh_and_configuration() {
        let mut storage = BatchStorage::new();
        let plain = MaterialDescription::default();
        let textured = textured_material();

        add(&mut storage, 0, &plain, 0).unwrap();
        add(&mut storage, 0, &plain, 1).unwrap();
        add(&mut storage, 0, &textured, 2).unwrap();
        add(&mut storage, 1, &plain, 3).unwrap();

        assert_eq!(storage.batch_count(), 3);
        assert_eq!(storage.instance_count(), 4);

        let plain_key = BatchKey::for_material(MeshID(0), &plain);
        assert_eq!(storage.batch(&plain_key).unwrap().instance_count(), 2);
        assert_eq!(storage.batch_key_for_entity(EntityID(1)), Some(&plain_key));
        assert_eq!(storage.lookup(EntityID(2)).unwrap().slot, 0);
    }

    #[test]
    fn emptied_batch_is_removed() {
        let mut storage = BatchStorage::new();
        let material = MaterialDescription::default();
        add(&mut storage, 0, &material, 0).unwrap();
        add(&mut storage, 1, &material, 1).unwrap();

        storage.remove_instance(EntityID(0)).unwrap();

        assert_eq!(storage.batch_count(), 1);
        assert!(!storage.has_entity(EntityID(0)));
        assert_eq!(storage.removed_batches.len(), 1);
        assert!(storage.remove_instance(EntityID(0)).is_err());
    }

    #[test]
    fn adding_existing_entity_fails() {
        let mut storage = BatchStorage::new();
        let material = MaterialDescription::default();
        add(&mut storage, 0, &material, 0).unwrap();

        assert!(add(&mut storage, 1, &material, 0).is_err());
        assert_eq!(storage.batch_count(), 1);
        assert_eq!(storage.instance_count(), 1);
    }

    #[test]
    fn mesh_is_loaded_only_once() {
        let mut storage = BatchStorage::new();
        let material = MaterialDescription::default();
        add(&mut storage, 0, &material, 0).unwrap();

        let result = storage.add_instance(
            BatchKey::for_material(MeshID(0), &material),
            |_| panic!("Mesh should already be registered"),
            EntityID(1),
            &EntityTransform::identity(),
            MaterialRecord::new(&material, None, None),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn failed_mesh_load_leaves_storage_unchanged() {
        let mut storage = BatchStorage::new();
        let material = MaterialDescription::default();
        let result = storage.add_instance(
            BatchKey::for_material(MeshID(5), &material),
            |mesh_id| Err(anyhow!("No mesh {mesh_id:?}")),
            EntityID(0),
            &EntityTransform::identity(),
            MaterialRecord::new(&material, None, None),
        );
        assert!(result.is_err());
        assert_eq!(storage.batch_count(), 0);
        assert!(!storage.has_entity(EntityID(0)));
    }

    #[test]
    fn updating_transform_reaches_batch() {
        let mut storage = BatchStorage::new();
        add(&mut storage, 0, &MaterialDescription::default(), 0).unwrap();

        let transform = EntityTransform::from_position(vector![0.0, 0.0, 9.0]);
        storage.update_transform(EntityID(0), &transform).unwrap();

        assert_eq!(storage.lookup(EntityID(0)).unwrap().transform, transform);
        assert!(storage.update_transform(EntityID(1), &transform).is_err());
    }
}
