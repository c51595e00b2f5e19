// ---------------------------------------------------------------------------
// entities – registration and the per-entity lifecycle
// ---------------------------------------------------------------------------

use bevy::log::{error, trace, warn};

use crate::archive::EntityHost;
use crate::container::{EntityLoad, EntityRecord};
use crate::manager::PersistenceManager;
use crate::name_table::Name;
use crate::persistence_types::{PersistenceKey, SceneId, StableId};
use crate::registry::{EntityHandle, RegisteredEntity};

/// How an entity enters the persistence layer.
#[derive(Debug, Clone)]
pub struct EntityDesc<O> {
    pub object: O,
    pub scene: SceneId,
    /// Stable id of a pre-placed entity. `None` makes the entity dynamic.
    pub id: Option<StableId>,
    /// Store the entity in its own container instead of the scene's.
    pub save_key: Option<Name>,
    pub persist_transform: bool,
    pub persist_destroyed: bool,
}

impl<O> EntityDesc<O> {
    /// A pre-placed entity with a fixed id.
    pub fn placed(object: O, scene: SceneId, id: StableId) -> Self {
        Self {
            object,
            scene,
            id: Some(id),
            save_key: None,
            persist_transform: false,
            persist_destroyed: true,
        }
    }

    /// An entity created at run time. Its id is assigned on initialization.
    pub fn dynamic(object: O, scene: SceneId) -> Self {
        Self {
            object,
            scene,
            id: None,
            save_key: None,
            persist_transform: true,
            persist_destroyed: false,
        }
    }

    pub fn with_save_key(mut self, key: Name) -> Self {
        self.save_key = Some(key);
        self
    }

    pub fn with_transform(mut self, persist: bool) -> Self {
        self.persist_transform = persist;
        self
    }
}

/// Why an entity is leaving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Removed from the game (killed, picked up, ...).
    Destroyed,
    /// Its scene is going away.
    Unloaded,
}

impl<H: EntityHost> PersistenceManager<H> {
    /// Assign the entity an id, restore its saved state and register it.
    ///
    /// [`EntityLoad::Destroyed`] means the entity was persistently removed
    /// and the host should remove it again. Returns `None` when the entity's
    /// scene was never announced with [`PersistenceManager::scene_loaded`]
    /// and it has no save key.
    pub fn initialize_entity(
        &mut self,
        host: &mut H,
        desc: EntityDesc<H::Object>,
    ) -> Option<(EntityHandle, EntityLoad)> {
        let key = match (&desc.save_key, self.scenes.get(&desc.scene)) {
            (Some(save_key), _) => save_key.clone(),
            (None, Some(scene_key)) => scene_key.clone(),
            (None, None) => {
                error!(
                    "Entity {:?} initialized in scene {:?}, which has no container",
                    desc.object, desc.scene
                );
                return None;
            }
        };

        let dynamic = desc.id.is_none();
        let id = match desc.id {
            Some(id) => id,
            None => {
                let spawning = self
                    .world
                    .container_mut(&key)
                    .and_then(|c| c.take_spawning_id());
                match spawning {
                    Some(id) => id,
                    None => self.world.generate_id(),
                }
            }
        };

        let persistence_key = PersistenceKey {
            container: key.clone(),
            id,
        };
        if self.registry.find(&persistence_key).is_some() {
            self.user_message(&format!(
                "Duplicate persistent entity {} in '{}'",
                id, key
            ));
        }

        let schema = self.loaded_schema;
        let load = match self.world.container_mut(&key) {
            None => EntityLoad::NoData,
            Some(container) => {
                if !container.is_unpacked() {
                    // Failures are logged and leave an empty container.
                    let _ = container.unpack();
                }
                match container.read_entity(host, desc.object, id, schema) {
                    Ok(load) => load,
                    Err(e) => {
                        warn!("Couldn't restore entity {} from '{}': {}", id, key, e);
                        EntityLoad::NoData
                    }
                }
            }
        };
        trace!("Initialized entity {} in '{}': {:?}", id, key, load);

        let handle = self.register(RegisteredEntity {
            object: desc.object,
            id,
            container: key,
            save_key: desc.save_key,
            scene: desc.scene,
            dynamic,
            persist_transform: desc.persist_transform,
            persist_destroyed: desc.persist_destroyed,
            destroyed: load == EntityLoad::Destroyed,
        });
        Some((handle, load))
    }

    pub fn register(&mut self, entity: RegisteredEntity<H::Object>) -> EntityHandle {
        trace!("Registering entity {} in '{}'", entity.id, entity.container);
        self.registry.insert(entity)
    }

    /// Drop an entity's registration. An entity with its own container
    /// packs that container.
    pub fn unregister(&mut self, handle: EntityHandle) -> Option<RegisteredEntity<H::Object>> {
        let Some(entity) = self.registry.remove(handle) else {
            error!("Unregistering unknown or stale entity handle {:?}", handle);
            return None;
        };
        if entity.save_key.is_some() {
            if let Some(container) = self.world.container_mut(&entity.container) {
                container.pack(self.loader.as_mut());
            }
            if self.registry.in_container(&entity.container).is_empty() {
                self.registry.untrack_container(&entity.container);
            }
        }
        Some(entity)
    }

    /// The entity is leaving the game or its scene.
    pub fn end_entity(&mut self, host: &mut H, handle: EntityHandle, reason: EndReason) {
        let Some(entity) = self.registry.get(handle).cloned() else {
            error!("Ending unknown or stale entity handle {:?}", handle);
            return;
        };

        if reason == EndReason::Destroyed
            && entity.persist_destroyed
            && !entity.dynamic
            && !entity.destroyed
        {
            self.world
                .get_or_create_container(&entity.container)
                .set_destroyed(entity.id);
            if entity.save_key.is_some() {
                // The container is packed and untracked below, so the
                // destroyed record has to reach the blob now.
                let records: Vec<_> = self
                    .live_records(&entity.container)
                    .into_iter()
                    .filter(|r| r.id != entity.id)
                    .collect();
                self.write_container(host, &entity.container, &records);
            }
        } else if entity.save_key.is_some() && !entity.destroyed {
            let record = EntityRecord {
                object: entity.object,
                id: entity.id,
                dynamic: entity.dynamic,
                persist_transform: entity.persist_transform,
            };
            self.write_container(host, &entity.container, &[record]);
        }
        self.unregister(handle);
    }

    /// A dynamic entity moved to another scene. Static entities are tied to
    /// their scene and can't move.
    pub fn move_entity_to_scene(&mut self, handle: EntityHandle, scene: SceneId) -> bool {
        let Some(entity) = self.registry.get(handle) else {
            error!("Moving unknown or stale entity handle {:?}", handle);
            return false;
        };
        if !entity.dynamic {
            let message = format!(
                "Static entity {} in '{}' can't move to another scene",
                entity.id, entity.container
            );
            self.user_message(&message);
            return false;
        }

        if entity.save_key.is_none() {
            let Some(key) = self.scenes.get(&scene).cloned() else {
                error!("Moving entity {} into unknown scene {:?}", entity.id, scene);
                return false;
            };
            self.registry.set_container(handle, key);
        }
        if let Some(entity) = self.registry.get_mut(handle) {
            entity.scene = scene;
        }
        true
    }

    pub fn entity(&self, handle: EntityHandle) -> Option<&RegisteredEntity<H::Object>> {
        self.registry.get(handle)
    }

    pub fn actor_key(&self, handle: EntityHandle) -> Option<PersistenceKey> {
        self.registry.get(handle).map(|e| e.key())
    }

    pub fn find_by_key(&self, key: &PersistenceKey) -> Option<EntityHandle> {
        self.registry.find(key)
    }

    pub fn registered_count(&self) -> usize {
        self.registry.len()
    }

    pub fn generate_stable_id(&mut self) -> StableId {
        self.world.generate_id()
    }
}
