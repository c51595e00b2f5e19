// ---------------------------------------------------------------------------
// reference – a saveable pointer to a persistent entity
// ---------------------------------------------------------------------------
//
// A reference stores the target's container and stable id, so it survives a
// save/load cycle even though the target's handle does not. The handle found
// on the last resolve is cached and checked against the key before reuse.

use std::cell::Cell;
use std::hash::Hash;

use crate::archive::{ArchiveReader, ArchiveWriter, EntityHost};
use crate::manager::PersistenceManager;
use crate::persistence_types::{PersistenceKey, StableId};
use crate::registry::EntityHandle;
use crate::save_error::SaveError;

#[derive(Debug, Clone, Default)]
pub struct PersistentReference {
    key: PersistenceKey,
    cached: Cell<Option<EntityHandle>>,
}

impl PartialEq for PersistentReference {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for PersistentReference {}

impl PersistentReference {
    pub fn new(key: PersistenceKey) -> Self {
        Self {
            key,
            cached: Cell::new(None),
        }
    }

    /// Point at a registered entity. Invalid if `handle` is stale.
    pub fn from_entity<H: EntityHost>(manager: &PersistenceManager<H>, handle: EntityHandle) -> Self {
        match manager.actor_key(handle) {
            Some(key) => Self {
                key,
                cached: Cell::new(Some(handle)),
            },
            None => Self::default(),
        }
    }

    pub fn key(&self) -> &PersistenceKey {
        &self.key
    }

    pub fn is_valid(&self) -> bool {
        self.key.is_valid()
    }

    /// The live entity this reference points at, if it is registered.
    pub fn resolve<H: EntityHost>(&self, manager: &PersistenceManager<H>) -> Option<EntityHandle> {
        if !self.is_valid() {
            return None;
        }
        if let Some(handle) = self.cached.get() {
            if manager.actor_key(handle).as_ref() == Some(&self.key) {
                return Some(handle);
            }
        }
        let found = manager.find_by_key(&self.key);
        self.cached.set(found);
        found
    }

    pub fn write<O: Copy + Eq + Hash>(&self, ar: &mut ArchiveWriter<'_, O>) {
        ar.write_name(&self.key.container);
        ar.write_u64(self.key.id.0);
    }

    pub fn read<O: Copy>(ar: &mut ArchiveReader<'_, O>) -> Result<Self, SaveError> {
        let container = ar.read_name()?;
        let id = StableId(ar.read_u64()?);
        Ok(Self::new(PersistenceKey { container, id }))
    }
}
