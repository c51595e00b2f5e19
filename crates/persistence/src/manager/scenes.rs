// ---------------------------------------------------------------------------
// scenes – container lifecycle driven by scene load/unload
// ---------------------------------------------------------------------------
//
// scene_loaded      unpack the scene's container and preload dynamic types
// scene_ready       spawn dynamic entities (or defer until types arrive)
// scene_unloading   write the scene's entities and pack, or drop the container
// scene_removed     pack and stop tracking

use bevy::log::{debug, info, warn};
use bevy::math::Vec3;

use crate::archive::EntityHost;
use crate::container::SpawnStep;
use crate::manager::entities::EntityDesc;
use crate::manager::{PersistenceEvent, PersistenceManager};
use crate::name_table::Name;
use crate::persistence_types::SceneId;
use crate::registry::EntityHandle;
use crate::type_loader::AsyncLoadHandle;

impl<H: EntityHost> PersistenceManager<H> {
    /// A scene finished loading; `key` names its container.
    pub fn scene_loaded(&mut self, scene: SceneId, key: Name) {
        info!("Scene {:?} loaded with container '{}'", scene, key);
        self.registry.track_container(&key);
        self.scenes.insert(scene, key.clone());
        let offset = self.scene_offsets.get(&scene).copied();

        let Some(container) = self.world.container_mut(&key) else {
            debug!("No saved data for '{}'", key);
            return;
        };
        container.set_scene_offset(offset);
        if !container.is_unpacked() && container.unpack().is_err() {
            return;
        }
        if let Err(e) = container.preload_dynamic(self.loader.as_mut()) {
            warn!("Couldn't read dynamic entities of '{}': {}", key, e);
        }
    }

    /// Whether the scene may start initializing its entities. False while
    /// its dynamic entity types are still loading.
    pub fn can_scene_initialize(&self, scene: SceneId, check_completed: bool) -> bool {
        let Some(key) = self.scenes.get(&scene) else {
            return true;
        };
        self.world
            .container(key)
            .map_or(true, |c| !c.is_preloading(check_completed, self.loader.as_ref()))
    }

    /// The scene can receive spawns. Returns the dynamic entities spawned now.
    pub fn scene_ready(&mut self, host: &mut H, scene: SceneId) -> Vec<EntityHandle> {
        let Some(key) = self.scenes.get(&scene).cloned() else {
            warn!("Scene {:?} is ready but was never loaded", scene);
            return Vec::new();
        };
        self.spawn_dynamic(host, scene, &key)
    }

    /// Write the scene's entities and pack its container, or delete the
    /// container when nothing in it needs saving.
    pub fn scene_unloading(&mut self, host: &mut H, scene: SceneId) {
        let Some(key) = self.scenes.get(&scene).cloned() else {
            warn!("Unloading scene {:?}, which was never loaded", scene);
            return;
        };
        let records = self.live_records(&key);
        let has_destroyed = self
            .world
            .container(&key)
            .is_some_and(|c| c.has_destroyed());
        if records.is_empty() && !has_destroyed {
            if let Some(mut container) = self.world.remove_container(&key) {
                container.cancel_load(self.loader.as_mut());
                info!("Deleting unused container '{}'", key);
            }
            return;
        }
        self.write_container(host, &key, &records);
        if let Some(container) = self.world.container_mut(&key) {
            container.pack(self.loader.as_mut());
        }
    }

    pub fn scene_removed(&mut self, scene: SceneId) {
        let Some(key) = self.scenes.remove(&scene) else {
            return;
        };
        if let Some(container) = self.world.container_mut(&key) {
            container.pack(self.loader.as_mut());
        }
        let leftover = self.registry.untrack_container(&key);
        if !leftover.is_empty() {
            debug!(
                "{} entities still registered to '{}' after its scene was removed",
                leftover.len(),
                key
            );
        }
    }

    /// Translation subtracted from placements on write and added back on read
    /// for every entity in `scene`.
    pub fn set_scene_offset(&mut self, scene: SceneId, offset: Vec3) {
        self.scene_offsets.insert(scene, offset);
        self.apply_scene_offset(scene);
    }

    pub fn clear_scene_offset(&mut self, scene: SceneId) {
        self.scene_offsets.remove(&scene);
        self.apply_scene_offset(scene);
    }

    fn apply_scene_offset(&mut self, scene: SceneId) {
        let offset = self.scene_offsets.get(&scene).copied();
        if let Some(key) = self.scenes.get(&scene) {
            if let Some(container) = self.world.container_mut(key) {
                container.set_scene_offset(offset);
            }
        }
    }

    /// Offset of the scene that owns container `key`, if any.
    pub(crate) fn offset_for_container(&self, key: &Name) -> Option<Vec3> {
        self.scenes
            .iter()
            .find(|(_, k)| *k == key)
            .and_then(|(scene, _)| self.scene_offsets.get(scene).copied())
    }

    /// Delete containers named `name`, or containing it when `substring`.
    /// Returns how many were deleted.
    pub fn delete_containers(&mut self, name: &str, substring: bool) -> usize {
        let keys = self.world.matching_containers(name, substring);
        for key in &keys {
            if let Some(mut container) = self.world.remove_container(key) {
                container.cancel_load(self.loader.as_mut());
                info!("Deleted container '{}'", key);
            }
        }
        keys.len()
    }

    /// Whether the dynamic entities of container `key` have been spawned.
    /// A container that doesn't exist has nothing to spawn.
    pub fn has_spawned_dynamic_entities(&self, key: &Name) -> bool {
        self.world
            .container(key)
            .map_or(true, |c| c.has_spawned_dynamic())
    }

    // =========================================================================
    // Dynamic spawning
    // =========================================================================

    pub(crate) fn on_container_types_loaded(&mut self, host: &mut H, handle: AsyncLoadHandle) {
        let Some(container) = self
            .world
            .containers
            .iter_mut()
            .find(|c| c.load_handle() == Some(handle))
        else {
            debug!("Type load {:?} finished for nothing we track", handle);
            return;
        };
        if !container.on_types_loaded(handle) {
            return;
        }
        let key = container.key().clone();
        let scene = self
            .scenes
            .iter()
            .find(|(_, k)| **k == key)
            .map(|(scene, _)| *scene);
        match scene {
            Some(scene) => {
                self.spawn_dynamic(host, scene, &key);
            }
            None => warn!("Container '{}' finished loading types without a scene", key),
        }
    }

    fn spawn_dynamic(&mut self, host: &mut H, scene: SceneId, key: &Name) -> Vec<EntityHandle> {
        let step = match self.world.container_mut(key) {
            None => SpawnStep::Idle,
            Some(container) => match container.spawn_dynamic() {
                Ok(step) => step,
                Err(e) => {
                    warn!("Couldn't read dynamic entities of '{}': {}", key, e);
                    SpawnStep::Idle
                }
            },
        };
        let SpawnStep::Spawn(records) = step else {
            return Vec::new();
        };

        let mut spawned = Vec::with_capacity(records.len());
        for record in records {
            if let Some(container) = self.world.container_mut(key) {
                container.set_spawning_id(record.id);
            }
            let Some(object) = host.spawn_entity(&record.class, scene, &record.transform) else {
                warn!(
                    "Couldn't spawn dynamic entity {} of class '{}'",
                    record.id, record.class
                );
                continue;
            };
            if let Some((handle, _)) = self.initialize_entity(host, EntityDesc::dynamic(object, scene)) {
                spawned.push(handle);
            }
        }
        if let Some(container) = self.world.container_mut(key) {
            container.take_spawning_id();
        }
        self.events.push(PersistenceEvent::DynamicSpawned {
            container: key.clone(),
        });
        spawned
    }
}
