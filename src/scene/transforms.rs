//! Entity transforms and change tracking.

use crate::{geometry::EntityTransform, scene::EntityID};
use std::collections::{HashMap, HashSet};

/// Source of entity transforms consumed by the renderer each frame.
pub trait TransformSource {
    /// Returns the entities whose transform changed since the last call, and
    /// clears the record of changes.
    fn take_dirty_transform_ids(&mut self) -> Vec<EntityID>;

    /// Returns the current transform of the given entity.
    fn lookup(&self, entity_id: EntityID) -> Option<EntityTransform>;
}

/// Stores the transform of each entity and records which entities have been
/// modified.
#[derive(Clone, Debug, Default)]
pub struct TransformSystem {
    transforms: HashMap<EntityID, EntityTransform>,
    dirty: Vec<EntityID>,
    dirty_set: HashSet<EntityID>,
}

impl TransformSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the transform of the given entity and marks it dirty.
    pub fn set_transform(&mut self, entity_id: EntityID, transform: EntityTransform) {
        self.transforms.insert(entity_id, transform);
        self.mark_dirty(entity_id);
    }

    /// Applies the given modification to the transform of the entity, if it
    /// has one, and marks it dirty.
    pub fn modify_transform(
        &mut self,
        entity_id: EntityID,
        modify: impl FnOnce(&mut EntityTransform),
    ) -> bool {
        let Some(transform) = self.transforms.get_mut(&entity_id) else {
            return false;
        };
        modify(transform);
        self.mark_dirty(entity_id);
        true
    }

    /// Removes the transform of the given entity.
    pub fn remove(&mut self, entity_id: EntityID) -> Option<EntityTransform> {
        if self.dirty_set.remove(&entity_id) {
            self.dirty.retain(|id| *id != entity_id);
        }
        self.transforms.remove(&entity_id)
    }

    pub fn get(&self, entity_id: EntityID) -> Option<&EntityTransform> {
        self.transforms.get(&entity_id)
    }

    fn mark_dirty(&mut self, entity_id: EntityID) {
        if self.dirty_set.insert(entity_id) {
            self.dirty.push(entity_id);
        }
    }
}

impl TransformSource for TransformSystem {
    fn take_dirty_transform_ids(&mut self) -> Vec<EntityID> {
        self.dirty_set.clear();
        std::mem::take(&mut self.dirty)
    }

    fn lookup(&self, entity_id: EntityID) -> Option<EntityTransform> {
        self.transforms.get(&entity_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::vector;

    #[test]
    fn modified_entities_are_reported_once_in_order() {
        let mut system = TransformSystem::new();
        system.set_transform(EntityID(2), EntityTransform::identity());
        system.set_transform(EntityID(1), EntityTransform::identity());
        system.set_transform(EntityID(2), EntityTransform::from_position(vector![1.0, 0.0, 0.0]));

        assert_eq!(system.take_dirty_transform_ids(), vec![EntityID(2), EntityID(1)]);
        assert!(system.take_dirty_transform_ids().is_empty());
        assert_eq!(system.lookup(EntityID(2)).unwrap().position.x, 1.0);
    }

    #[test]
    fn modifying_unknown_entity_does_nothing() {
        let mut system = TransformSystem::new();
        assert!(!system.modify_transform(EntityID(0), |transform| transform.scale = 2.0));
        assert!(system.take_dirty_transform_ids().is_empty());
    }

    #[test]
    fn removed_entity_is_no_longer_dirty() {
        let mut system = TransformSystem::new();
        system.set_transform(EntityID(0), EntityTransform::identity());
        system.remove(EntityID(0));
        assert!(system.take_dirty_transform_ids().is_empty());
        assert!(system.lookup(EntityID(0)).is_none());
    }
}
