// ---------------------------------------------------------------------------
// worker – the background storage thread
// ---------------------------------------------------------------------------
//
// One thread owns the storage backend. It takes one request at a time, does
// the I/O, (de)compression and header validation, and sends a completion back.
// It then blocks until the caller releases it, which happens once the
// completion has been fully dispatched on the caller thread. That keeps both
// execution and completion in enqueue order, even when a load is parked on
// an async type load.

use std::sync::mpsc::{Receiver, Sender};
use std::thread;
use std::time::Duration;

use bevy::log::{debug, info, warn};

use crate::persistence_types::{HasResult, LoadResult, SaveResult};
use crate::save_header::{self, SaveFile};
use crate::storage::{ExistsResult, StorageBackend};

/// Work for the storage thread.
#[derive(Debug)]
pub(crate) enum WorkerJob {
    /// Read, decompress and validate a save. `build` is the running build
    /// number captured when the job was queued (0 = no gate).
    Load { slot: String, build: u32 },
    Has { slot: String },
    Delete { slot: String },
    /// Uncompressed world and profile saves, written in that order.
    Write {
        world: Option<(String, Vec<u8>)>,
        profile: Option<(String, Vec<u8>)>,
    },
    HasBackup { slot: String },
    RestoreBackup { slot: String },
}

impl WorkerJob {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            WorkerJob::Load { .. } => "load",
            WorkerJob::Has { .. } => "has",
            WorkerJob::Delete { .. } => "delete",
            WorkerJob::Write { .. } => "write",
            WorkerJob::HasBackup { .. } => "has-backup",
            WorkerJob::RestoreBackup { .. } => "restore-backup",
        }
    }
}

#[derive(Debug)]
pub(crate) enum WorkerOutput {
    Loaded {
        result: LoadResult,
        save: Option<SaveFile>,
    },
    Has(HasResult),
    Saved(SaveResult),
    Flag(bool),
}

#[derive(Debug)]
pub(crate) struct Request {
    pub seq: u64,
    pub job: WorkerJob,
}

#[derive(Debug)]
pub(crate) struct Completion {
    pub seq: u64,
    pub output: WorkerOutput,
}

/// Worker thread body. Returns when either channel to the caller closes.
pub(crate) fn run(
    mut backend: Box<dyn StorageBackend>,
    requests: Receiver<Request>,
    completions: Sender<Completion>,
    release: Receiver<()>,
    job_delay: Duration,
) {
    debug!("Persistence worker started");
    while let Ok(request) = requests.recv() {
        if !job_delay.is_zero() {
            thread::sleep(job_delay);
        }
        let output = execute(backend.as_mut(), request.job);
        let completion = Completion {
            seq: request.seq,
            output,
        };
        if completions.send(completion).is_err() {
            break;
        }
        if release.recv().is_err() {
            break;
        }
    }
    debug!("Persistence worker stopped");
}

pub(crate) fn execute(backend: &mut dyn StorageBackend, job: WorkerJob) -> WorkerOutput {
    match job {
        WorkerJob::Load { slot, build } => load(backend, &slot, build),
        WorkerJob::Has { slot } => WorkerOutput::Has(match backend.exists(&slot) {
            ExistsResult::Ok => HasResult::Exists,
            ExistsResult::DoesNotExist => HasResult::Empty,
            ExistsResult::Corrupt => HasResult::Corrupt,
            ExistsResult::Unknown => HasResult::Unknown,
        }),
        WorkerJob::Delete { slot } => WorkerOutput::Flag(match backend.delete(&slot) {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!("Failed to delete '{}': {}", slot, e);
                false
            }
        }),
        WorkerJob::Write { world, profile } => {
            WorkerOutput::Saved(write(backend, world.into_iter().chain(profile)))
        }
        WorkerJob::HasBackup { slot } => WorkerOutput::Flag(backend.has_backup(&slot)),
        WorkerJob::RestoreBackup { slot } => WorkerOutput::Flag(backend.restore_backup(&slot)),
    }
}

fn write(
    backend: &mut dyn StorageBackend,
    saves: impl Iterator<Item = (String, Vec<u8>)>,
) -> SaveResult {
    for (slot, bytes) in saves {
        let stored = save_header::compress(&bytes);
        if let Err(e) = backend.write(&slot, &stored) {
            warn!("Failed to write '{}': {}", slot, e);
            return SaveResult::Unknown;
        }
        debug!("Wrote '{}' ({} bytes, {} stored)", slot, bytes.len(), stored.len());
    }
    SaveResult::Success
}

fn restore_once(backend: &mut dyn StorageBackend, slot: &str, restored: &mut bool) -> bool {
    if *restored {
        return false;
    }
    *restored = true;
    let ok = backend.restore_backup(slot);
    if ok {
        info!("Restored '{}' from backup", slot);
    } else {
        warn!("No usable backup for '{}'", slot);
    }
    ok
}

fn load(backend: &mut dyn StorageBackend, slot: &str, build: u32) -> WorkerOutput {
    let failed = |result| WorkerOutput::Loaded { result, save: None };
    let mut restored = false;
    loop {
        match backend.exists(slot) {
            ExistsResult::Ok => {}
            ExistsResult::DoesNotExist => return failed(LoadResult::DoesNotExist),
            ExistsResult::Unknown => return failed(LoadResult::Unknown),
            ExistsResult::Corrupt => {
                warn!("Save '{}' is corrupt", slot);
                if restore_once(backend, slot, &mut restored) {
                    continue;
                }
                return failed(LoadResult::Corrupt);
            }
        }

        let stored = match backend.read(slot) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return failed(LoadResult::DoesNotExist),
            Err(e) => {
                warn!("Failed to read '{}': {}", slot, e);
                return failed(LoadResult::Unknown);
            }
        };

        match save_header::load_stored(&stored, build) {
            Ok(save) => {
                let result = if restored {
                    LoadResult::Restored
                } else {
                    LoadResult::Success
                };
                return WorkerOutput::Loaded {
                    result,
                    save: Some(save),
                };
            }
            Err(e) => {
                warn!("Failed to load '{}': {}", slot, e);
                let result = LoadResult::from(&e);
                if result == LoadResult::Corrupt && restore_once(backend, slot, &mut restored) {
                    continue;
                }
                return failed(result);
            }
        }
    }
}
