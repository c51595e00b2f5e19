// ---------------------------------------------------------------------------
// jobs – queue operations and their completions
// ---------------------------------------------------------------------------

use bevy::log::{debug, error, info, warn};

use crate::archive::{self, EntityHost, RootMut};
use crate::manager::worker::{Completion, WorkerJob, WorkerOutput};
use crate::manager::{PersistenceEvent, PersistenceManager};
use crate::name_table::Name;
use crate::persistence_types::{ClassPath, HasResult, LoadResult, SaveResult};
use crate::save_error::SaveError;
use crate::save_game::{SaveGameProfile, SaveGameWorld, PROFILE_ROOT_CLASS, WORLD_ROOT_CLASS};
use crate::save_header::{slot_name, SaveFile, PROFILE_SLOT};

pub type LoadCallback = Box<dyn FnOnce(LoadResult)>;
pub type ReadCallback<O> = Box<dyn FnOnce(LoadResult, Option<SaveGameWorld<O>>)>;
pub type HasCallback = Box<dyn FnOnce(HasResult)>;
pub type SaveCallback = Box<dyn FnOnce(SaveResult)>;
pub type FlagCallback = Box<dyn FnOnce(bool)>;

/// Caller-side half of a queued job: what to do with its completion.
pub(crate) enum PendingJob<O> {
    LoadSlot { slot: i32, callback: LoadCallback },
    LoadProfile { callback: LoadCallback },
    ReadSlot { callback: ReadCallback<O> },
    Has { callback: HasCallback },
    Flag { callback: FlagCallback },
    Commit { callback: SaveCallback },
}

impl<O> PendingJob<O> {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            PendingJob::LoadSlot { .. } => "load-slot",
            PendingJob::LoadProfile { .. } => "load-profile",
            PendingJob::ReadSlot { .. } => "read-slot",
            PendingJob::Has { .. } => "has",
            PendingJob::Flag { .. } => "flag",
            PendingJob::Commit { .. } => "commit",
        }
    }
}

/// A load whose save references types that are still loading.
pub(crate) struct Parked<O> {
    pub job: PendingJob<O>,
    pub result: LoadResult,
    pub save: SaveFile,
}

impl<H: EntityHost> PersistenceManager<H> {
    // =========================================================================
    // Queue operations
    // =========================================================================

    /// Load world slot `slot` and make it the current save. A slot with no
    /// save starts a fresh world.
    pub fn load_slot(&mut self, slot: i32, callback: impl FnOnce(LoadResult) + 'static) {
        let build = self.current_build();
        self.enqueue(
            WorkerJob::Load {
                slot: slot_name(slot),
                build,
            },
            PendingJob::LoadSlot {
                slot,
                callback: Box::new(callback),
            },
        );
    }

    pub fn load_profile(&mut self, callback: impl FnOnce(LoadResult) + 'static) {
        let build = self.current_build();
        self.enqueue(
            WorkerJob::Load {
                slot: PROFILE_SLOT.to_string(),
                build,
            },
            PendingJob::LoadProfile {
                callback: Box::new(callback),
            },
        );
    }

    /// Decode world slot `slot` and hand it to `callback` without touching
    /// the current save.
    pub fn read_slot(
        &mut self,
        slot: i32,
        callback: impl FnOnce(LoadResult, Option<SaveGameWorld<H::Object>>) + 'static,
    ) {
        let build = self.current_build();
        self.enqueue(
            WorkerJob::Load {
                slot: slot_name(slot),
                build,
            },
            PendingJob::ReadSlot {
                callback: Box::new(callback),
            },
        );
    }

    pub fn has_slot(&mut self, slot: i32, callback: impl FnOnce(HasResult) + 'static) {
        self.enqueue(
            WorkerJob::Has {
                slot: slot_name(slot),
            },
            PendingJob::Has {
                callback: Box::new(callback),
            },
        );
    }

    pub fn delete_slot(&mut self, slot: i32, callback: impl FnOnce(bool) + 'static) {
        self.queue_flag(WorkerJob::Delete { slot: slot_name(slot) }, callback);
    }

    pub fn delete_profile(&mut self, callback: impl FnOnce(bool) + 'static) {
        self.queue_flag(
            WorkerJob::Delete {
                slot: PROFILE_SLOT.to_string(),
            },
            callback,
        );
    }

    pub fn has_slot_backup(&mut self, slot: i32, callback: impl FnOnce(bool) + 'static) {
        self.queue_flag(WorkerJob::HasBackup { slot: slot_name(slot) }, callback);
    }

    pub fn has_profile_backup(&mut self, callback: impl FnOnce(bool) + 'static) {
        self.queue_flag(
            WorkerJob::HasBackup {
                slot: PROFILE_SLOT.to_string(),
            },
            callback,
        );
    }

    pub fn restore_slot_backup(&mut self, slot: i32, callback: impl FnOnce(bool) + 'static) {
        self.queue_flag(WorkerJob::RestoreBackup { slot: slot_name(slot) }, callback);
    }

    pub fn restore_profile_backup(&mut self, callback: impl FnOnce(bool) + 'static) {
        self.queue_flag(
            WorkerJob::RestoreBackup {
                slot: PROFILE_SLOT.to_string(),
            },
            callback,
        );
    }

    fn queue_flag(&mut self, job: WorkerJob, callback: impl FnOnce(bool) + 'static) {
        self.enqueue(
            job,
            PendingJob::Flag {
                callback: Box::new(callback),
            },
        );
    }

    // =========================================================================
    // Completion
    // =========================================================================

    pub(crate) fn dispatch(&mut self, host: &mut H, completion: Completion) {
        let Some(job) = self.pending.remove(&completion.seq) else {
            error!("Completion for unknown job {}", completion.seq);
            self.complete_job();
            return;
        };
        debug!("Job {} ({}) completed", completion.seq, job.kind());
        match (job, completion.output) {
            (
                job @ (PendingJob::LoadSlot { .. }
                | PendingJob::LoadProfile { .. }
                | PendingJob::ReadSlot { .. }),
                WorkerOutput::Loaded { result, save },
            ) => self.on_loaded(host, job, result, save),
            (PendingJob::Has { callback }, WorkerOutput::Has(result)) => {
                self.complete_job();
                callback(result);
            }
            (PendingJob::Flag { callback }, WorkerOutput::Flag(ok)) => {
                self.complete_job();
                callback(ok);
            }
            (PendingJob::Commit { callback }, WorkerOutput::Saved(result)) => {
                self.pending_saves = self.pending_saves.saturating_sub(1);
                match result {
                    SaveResult::Success => info!("Commit finished"),
                    other => warn!("Commit failed: {:?}", other),
                }
                self.events.push(PersistenceEvent::Committed(result));
                self.complete_job();
                callback(result);
            }
            (job, output) => {
                error!("Job {} got mismatched output {:?}", job.kind(), output);
                if matches!(job, PendingJob::Commit { .. }) {
                    self.pending_saves = self.pending_saves.saturating_sub(1);
                }
                self.complete_job();
            }
        }
    }

    fn on_loaded(
        &mut self,
        host: &mut H,
        job: PendingJob<H::Object>,
        result: LoadResult,
        save: Option<SaveFile>,
    ) {
        let Some(save) = save else {
            self.finish_load(host, job, result, None);
            return;
        };
        match archive::classes_to_load(&*host, &save.payload, None) {
            Ok(missing) if !missing.is_empty() => {
                info!(
                    "Save needs {} type(s) that aren't loaded, waiting: {:?}",
                    missing.len(),
                    missing
                );
                let handle = self.loader.request(missing);
                self.parked.insert(handle, Parked { job, result, save });
            }
            // A damaged index fails the decode below.
            _ => self.finish_load(host, job, result, Some(save)),
        }
    }

    pub(crate) fn finish_load(
        &mut self,
        host: &mut H,
        job: PendingJob<H::Object>,
        result: LoadResult,
        save: Option<SaveFile>,
    ) {
        self.complete_job();
        match job {
            PendingJob::LoadSlot { slot, callback } => {
                let result = match save {
                    Some(save) => match decode_world(host, &save) {
                        Ok(world) => {
                            self.install_world(slot, world, save.header.schema_version);
                            result
                        }
                        Err(e) => {
                            warn!("Couldn't decode save slot {}: {}", slot, e);
                            LoadResult::Corrupt
                        }
                    },
                    None if result == LoadResult::DoesNotExist => {
                        info!("Save slot {} is empty, starting a fresh world", slot);
                        let world = self.fresh_world(host);
                        let schema = self.settings.schema_version;
                        self.install_world(slot, world, schema);
                        result
                    }
                    None => result,
                };
                self.events.push(PersistenceEvent::SlotLoaded { slot, result });
                callback(result);
            }
            PendingJob::LoadProfile { callback } => {
                let result = match save {
                    Some(save) => match decode_profile(host, &save) {
                        Ok(profile) => {
                            self.profile = Some(profile);
                            result
                        }
                        Err(e) => {
                            warn!("Couldn't decode profile: {}", e);
                            LoadResult::Corrupt
                        }
                    },
                    None if result == LoadResult::DoesNotExist => {
                        info!("No profile saved, starting a fresh one");
                        self.profile = Some(self.fresh_profile(host));
                        result
                    }
                    None => result,
                };
                self.events.push(PersistenceEvent::ProfileLoaded(result));
                callback(result);
            }
            PendingJob::ReadSlot { callback } => match save {
                Some(save) => match decode_world(host, &save) {
                    Ok(world) => callback(result, Some(world)),
                    Err(e) => {
                        warn!("Couldn't decode save: {}", e);
                        callback(LoadResult::Corrupt, None);
                    }
                },
                None => callback(result, None),
            },
            other => error!("{} job finished as a load", other.kind()),
        }
    }

    fn install_world(&mut self, slot: i32, world: SaveGameWorld<H::Object>, schema: u32) {
        self.cancel_container_loads();
        info!(
            "Save slot {} is now current ({} containers)",
            slot,
            world.containers.len()
        );
        self.world = world;
        self.current_slot = slot;
        self.loaded_schema = schema;
    }

    fn fresh_world(&self, host: &mut H) -> SaveGameWorld<H::Object> {
        let mut world = SaveGameWorld::new();
        world.user_data = self
            .settings
            .world_data_class
            .as_ref()
            .and_then(|class| create_user_data(host, class, "world_data"));
        world
    }

    fn fresh_profile(&self, host: &mut H) -> SaveGameProfile<H::Object> {
        let mut profile = SaveGameProfile::new();
        profile.user_data = self
            .settings
            .profile_data_class
            .as_ref()
            .and_then(|class| create_user_data(host, class, "profile_data"));
        profile
    }
}

fn create_user_data<H: EntityHost>(host: &mut H, class: &ClassPath, name: &str) -> Option<H::Object> {
    let obj = host.create_object(class, &Name::new(name), None);
    if obj.is_none() {
        warn!("Couldn't create save data of class '{}'", class);
    }
    obj
}

fn check_root_type(save: &SaveFile, expected: &str) -> Result<(), SaveError> {
    if save.header.root_type.as_str() != expected {
        return Err(SaveError::ClassMismatch {
            expected: expected.to_string(),
            found: save.header.root_type.to_string(),
        });
    }
    Ok(())
}

fn decode_world<H: EntityHost>(
    host: &mut H,
    save: &SaveFile,
) -> Result<SaveGameWorld<H::Object>, SaveError> {
    check_root_type(save, WORLD_ROOT_CLASS)?;
    let mut world = SaveGameWorld::new();
    let stats = archive::read_graph(
        host,
        &save.payload,
        RootMut::Native(&mut world),
        None,
        &save.versions,
        save.header.schema_version,
    )?;
    debug!("Decoded world: {:?}", stats);
    Ok(world)
}

fn decode_profile<H: EntityHost>(
    host: &mut H,
    save: &SaveFile,
) -> Result<SaveGameProfile<H::Object>, SaveError> {
    check_root_type(save, PROFILE_ROOT_CLASS)?;
    let mut profile = SaveGameProfile::new();
    let stats = archive::read_graph(
        host,
        &save.payload,
        RootMut::Native(&mut profile),
        None,
        &save.versions,
        save.header.schema_version,
    )?;
    debug!("Decoded profile: {:?}", stats);
    Ok(profile)
}
