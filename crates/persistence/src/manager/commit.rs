// ---------------------------------------------------------------------------
// commit – write registered entities and queue the save
// ---------------------------------------------------------------------------
//
// A commit does all serialization on the caller thread: every container with
// live entities or destroyed records is rewritten, unused ones are dropped,
// then the world and profile are encoded and framed. The worker only
// compresses and writes. World and profile are two separate writes; a crash
// between them leaves one newer than the other.

use bevy::log::{info, trace};

use crate::archive::{self, ClassCache, CustomVersions, EntityHost, NativeRoot, Root};
use crate::container::EntityRecord;
use crate::manager::jobs::PendingJob;
use crate::manager::worker::WorkerJob;
use crate::manager::{PersistenceEvent, PersistenceManager};
use crate::name_table::Name;
use crate::persistence_types::{ClassPath, SaveResult};
use crate::save_game::{PROFILE_ROOT_CLASS, WORLD_ROOT_CLASS};
use crate::save_header::{self, slot_name, PROFILE_SLOT};

impl<H: EntityHost> PersistenceManager<H> {
    /// Save everything to the current slot (and the profile). Rejections
    /// (disabled, shutting down, busy) call `callback` immediately and queue
    /// nothing.
    pub fn commit(&mut self, host: &mut H, reason: &str, callback: impl FnOnce(SaveResult) + 'static) {
        if let Some(rejected) = self.commit_gate() {
            info!("Commit ({}) rejected: {:?}", reason, rejected);
            callback(rejected);
            return;
        }
        info!("Committing ({})", reason);
        self.pending_saves += 1;
        self.events.push(PersistenceEvent::PreSave);
        if let Some(hook) = self.pre_commit.as_mut() {
            hook(host, &mut self.world, self.profile.as_mut());
        }

        self.write_containers(host);

        let build = self.current_build();
        let schema = self.settings.schema_version;
        let world = if self.current_slot >= 0 {
            let bytes = encode_root(host, &self.world, WORLD_ROOT_CLASS, &mut self.classes, schema, build);
            Some((slot_name(self.current_slot), bytes))
        } else {
            None
        };
        let profile = match self.profile.as_ref() {
            Some(profile) => {
                let bytes = encode_root(host, profile, PROFILE_ROOT_CLASS, &mut self.classes, schema, build);
                Some((PROFILE_SLOT.to_string(), bytes))
            }
            None => None,
        };

        self.enqueue(
            WorkerJob::Write { world, profile },
            PendingJob::Commit {
                callback: Box::new(callback),
            },
        );
    }

    /// Make `slot` current, then commit to it.
    pub fn commit_to_slot(
        &mut self,
        host: &mut H,
        slot: i32,
        callback: impl FnOnce(SaveResult) + 'static,
    ) {
        if let Some(rejected) = self.commit_gate() {
            info!("Commit to slot {} rejected: {:?}", slot, rejected);
            callback(rejected);
            return;
        }
        if slot != self.current_slot {
            info!("Switching current save slot from {} to {}", self.current_slot, slot);
            self.current_slot = slot;
        }
        self.commit(host, "commit to slot", callback);
    }

    fn commit_gate(&self) -> Option<SaveResult> {
        if self.settings.never_commit || self.disable_commit || self.shutting_down {
            return Some(SaveResult::Disabled);
        }
        if !self.settings.allow_queued_commits && self.pending_saves > 0 {
            return Some(SaveResult::Busy);
        }
        None
    }

    /// Live, not-destroyed entities registered to `key`.
    pub(crate) fn live_records(&self, key: &Name) -> Vec<EntityRecord<H::Object>> {
        self.registry
            .in_container(key)
            .iter()
            .filter_map(|h| self.registry.get(*h))
            .filter(|e| !e.destroyed)
            .map(|e| EntityRecord {
                object: e.object,
                id: e.id,
                dynamic: e.dynamic,
                persist_transform: e.persist_transform,
            })
            .collect()
    }

    /// Rewrite `key` from `records`, creating the container if needed.
    pub(crate) fn write_container(&mut self, host: &H, key: &Name, records: &[EntityRecord<H::Object>]) {
        let offset = self.offset_for_container(key);
        let container = self.world.get_or_create_container(key);
        container.set_scene_offset(offset);
        container.write_data(host, records, &mut self.classes);
    }

    fn write_containers(&mut self, host: &H) {
        let mut unused = Vec::new();
        for key in self.registry.containers() {
            let records = self.live_records(&key);
            let has_destroyed = self
                .world
                .container(&key)
                .is_some_and(|c| c.has_destroyed());
            if records.is_empty() && !has_destroyed {
                unused.push(key);
                continue;
            }
            trace!("Committing {} entities to '{}'", records.len(), key);
            self.write_container(host, &key, &records);
        }
        for key in unused {
            if let Some(mut container) = self.world.remove_container(&key) {
                container.cancel_load(self.loader.as_mut());
                info!("Deleting unused container '{}'", key);
            }
        }
    }
}

/// Encode a save root and frame it as an uncompressed save file.
fn encode_root<H: EntityHost>(
    host: &H,
    root: &dyn NativeRoot<H::Object>,
    root_class: &str,
    classes: &mut ClassCache,
    schema_version: u32,
    build: u32,
) -> Vec<u8> {
    let mut versions = CustomVersions::new();
    let payload = archive::write_graph(host, Root::Native(root), classes, None, &mut versions);
    save_header::build_save(
        build,
        schema_version,
        &ClassPath::new(root_class),
        &payload,
        &versions,
    )
}
