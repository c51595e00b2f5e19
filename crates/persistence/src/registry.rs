// ---------------------------------------------------------------------------
// registry – live persistent entities, grouped by container
// ---------------------------------------------------------------------------
//
// Entities are held in a generational slot list. A handle carries the
// generation of the slot it was issued for, so a handle kept past
// unregistration resolves to nothing instead of to whatever reused the slot.

use std::collections::BTreeMap;

use crate::name_table::Name;
use crate::persistence_types::{PersistenceKey, SceneId, StableId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityHandle {
    index: u32,
    generation: u32,
}

/// Registration record for one live entity.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredEntity<O> {
    pub object: O,
    pub id: StableId,
    /// Container the entity is written to.
    pub container: Name,
    /// Set for entities stored in their own container instead of the scene's.
    pub save_key: Option<Name>,
    pub scene: SceneId,
    pub dynamic: bool,
    pub persist_transform: bool,
    pub persist_destroyed: bool,
    /// Already recorded as destroyed in its container.
    pub destroyed: bool,
}

impl<O> RegisteredEntity<O> {
    pub fn key(&self) -> PersistenceKey {
        PersistenceKey {
            container: self.container.clone(),
            id: self.id,
        }
    }
}

#[derive(Debug)]
struct Slot<O> {
    generation: u32,
    entry: Option<RegisteredEntity<O>>,
}

#[derive(Debug)]
pub struct EntityRegistry<O> {
    slots: Vec<Slot<O>>,
    free: Vec<u32>,
    /// Containers in use, each with its registered entities in registration
    /// order. A container can be in use with no entities.
    by_container: BTreeMap<Name, Vec<EntityHandle>>,
}

impl<O> Default for EntityRegistry<O> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            by_container: BTreeMap::new(),
        }
    }
}

impl<O> EntityRegistry<O> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&mut self, entity: RegisteredEntity<O>) -> EntityHandle {
        let container = entity.container.clone();
        let handle = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.generation = slot.generation.wrapping_add(1);
                slot.entry = Some(entity);
                EntityHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entity),
                });
                EntityHandle {
                    index: self.slots.len() as u32 - 1,
                    generation: 0,
                }
            }
        };
        self.by_container.entry(container).or_default().push(handle);
        handle
    }

    pub fn remove(&mut self, handle: EntityHandle) -> Option<RegisteredEntity<O>> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let entity = slot.entry.take()?;
        self.free.push(handle.index);
        if let Some(list) = self.by_container.get_mut(&entity.container) {
            list.retain(|h| *h != handle);
        }
        Some(entity)
    }

    pub fn get(&self, handle: EntityHandle) -> Option<&RegisteredEntity<O>> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    pub fn get_mut(&mut self, handle: EntityHandle) -> Option<&mut RegisteredEntity<O>> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    /// Move an entity to another container's list.
    pub fn set_container(&mut self, handle: EntityHandle, container: Name) -> bool {
        let Some(entity) = self.get_mut(handle) else {
            return false;
        };
        let old = std::mem::replace(&mut entity.container, container.clone());
        if let Some(list) = self.by_container.get_mut(&old) {
            list.retain(|h| *h != handle);
        }
        self.by_container.entry(container).or_default().push(handle);
        true
    }

    /// Mark a container as in use even before anything registers to it.
    pub fn track_container(&mut self, container: &Name) {
        self.by_container.entry(container.clone()).or_default();
    }

    /// Stop tracking a container, returning the handles still listed for it.
    pub fn untrack_container(&mut self, container: &Name) -> Vec<EntityHandle> {
        self.by_container.remove(container).unwrap_or_default()
    }

    pub fn is_tracked(&self, container: &Name) -> bool {
        self.by_container.contains_key(container)
    }

    /// Containers in use, in key order.
    pub fn containers(&self) -> Vec<Name> {
        self.by_container.keys().cloned().collect()
    }

    pub fn in_container(&self, container: &Name) -> &[EntityHandle] {
        self.by_container
            .get(container)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn find(&self, key: &PersistenceKey) -> Option<EntityHandle> {
        self.in_container(&key.container)
            .iter()
            .copied()
            .find(|h| self.get(*h).is_some_and(|e| e.id == key.id))
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityHandle, &RegisteredEntity<O>)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.entry.as_ref().map(|e| {
                (
                    EntityHandle {
                        index: i as u32,
                        generation: slot.generation,
                    },
                    e,
                )
            })
        })
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.by_container.clear();
    }
}
