//! The persistence manager: entity registration, commits and the background
//! job pipeline.
//!
//! Everything here runs on the thread that owns the manager (in a Bevy app,
//! the main thread). Storage I/O happens on a single worker thread that talks
//! to the manager over channels; completions are handed back and their
//! callbacks run inside [`PersistenceManager::pump`], never on the worker.

pub mod commit;
pub mod entities;
pub mod jobs;
pub mod reference;
pub mod scenes;
pub mod worker;

#[cfg(test)]
mod tests_pipeline;

use std::collections::HashMap;
use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bevy::log::{debug, error, info, warn};
use bevy::math::Vec3;

use crate::archive::{ClassCache, EntityHost, ObjectHost};
use crate::name_table::Name;
use crate::persistence_types::{LoadResult, SaveResult, SceneId};
use crate::registry::EntityRegistry;
use crate::save_game::{SaveGameProfile, SaveGameWorld};
use crate::settings::PersistenceSettings;
use crate::storage::{FileSystemBackend, StorageBackend};
use crate::type_loader::{AsyncLoadHandle, TypeLoader};

pub use entities::{EndReason, EntityDesc};
pub use reference::PersistentReference;

use jobs::{Parked, PendingJob};
use worker::{Completion, Request, WorkerJob};

/// Notifications produced by the manager, drained with
/// [`PersistenceManager::drain_events`].
#[derive(Debug, Clone, PartialEq)]
pub enum PersistenceEvent {
    /// A commit passed its gates and is about to write.
    PreSave,
    /// The first job was queued while the pipeline was idle.
    BackgroundWorkBegan,
    /// The last outstanding job completed.
    BackgroundWorkEnded,
    DynamicSpawned { container: Name },
    Committed(SaveResult),
    SlotLoaded { slot: i32, result: LoadResult },
    ProfileLoaded(LoadResult),
}

pub type PreCommitHook<H> = Box<
    dyn FnMut(
        &mut H,
        &mut SaveGameWorld<<H as ObjectHost>::Object>,
        Option<&mut SaveGameProfile<<H as ObjectHost>::Object>>,
    ),
>;

pub type UserMessageHook = Box<dyn FnMut(&str)>;

pub type BuildNumberOracle = Box<dyn Fn() -> u32 + Send + Sync>;

pub struct PersistenceManager<H: EntityHost> {
    settings: PersistenceSettings,
    loader: Box<dyn TypeLoader>,
    classes: ClassCache,
    registry: EntityRegistry<H::Object>,

    world: SaveGameWorld<H::Object>,
    profile: Option<SaveGameProfile<H::Object>>,
    /// World slot commits write to. Negative when no slot is selected.
    current_slot: i32,
    /// Schema version of the loaded world, handed to entity readers.
    loaded_schema: u32,

    scenes: HashMap<SceneId, Name>,
    scene_offsets: HashMap<SceneId, Vec3>,

    disable_commit: bool,
    shutting_down: bool,
    pending_saves: usize,
    in_flight: usize,
    next_seq: u64,
    pending: HashMap<u64, PendingJob<H::Object>>,
    parked: HashMap<AsyncLoadHandle, Parked<H::Object>>,
    events: Vec<PersistenceEvent>,

    pre_commit: Option<PreCommitHook<H>>,
    user_message: Option<UserMessageHook>,
    build_number: Option<BuildNumberOracle>,

    requests: Option<Sender<Request>>,
    release: Option<Sender<()>>,
    completions: Receiver<Completion>,
    worker: Option<JoinHandle<()>>,
}

impl<H: EntityHost> PersistenceManager<H> {
    /// Start the worker thread. `backend` moves to the worker; `loader` stays
    /// on the calling thread.
    pub fn new(
        settings: PersistenceSettings,
        backend: Box<dyn StorageBackend>,
        loader: Box<dyn TypeLoader>,
    ) -> io::Result<Self> {
        let (request_tx, request_rx) = mpsc::channel::<Request>();
        let (completion_tx, completion_rx) = mpsc::channel::<Completion>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let job_delay = settings.job_delay();

        let worker = thread::Builder::new()
            .name("persistence-worker".into())
            .spawn(move || worker::run(backend, request_rx, completion_tx, release_rx, job_delay))?;

        info!(
            "Persistence manager started (backups: {}, queued commits: {})",
            settings.num_backups, settings.allow_queued_commits
        );
        let loaded_schema = settings.schema_version;
        Ok(Self {
            settings,
            loader,
            classes: ClassCache::new(),
            registry: EntityRegistry::new(),
            world: SaveGameWorld::new(),
            profile: None,
            current_slot: -1,
            loaded_schema,
            scenes: HashMap::new(),
            scene_offsets: HashMap::new(),
            disable_commit: false,
            shutting_down: false,
            pending_saves: 0,
            in_flight: 0,
            next_seq: 0,
            pending: HashMap::new(),
            parked: HashMap::new(),
            events: Vec::new(),
            pre_commit: None,
            user_message: None,
            build_number: None,
            requests: Some(request_tx),
            release: Some(release_tx),
            completions: completion_rx,
            worker: Some(worker),
        })
    }

    /// A manager writing to `settings.storage_dir()` on the local file system.
    pub fn with_file_system(
        settings: PersistenceSettings,
        loader: Box<dyn TypeLoader>,
    ) -> io::Result<Self> {
        let backend = FileSystemBackend::new(&settings);
        Self::new(settings, Box::new(backend), loader)
    }

    // =========================================================================
    // Accessors and hooks
    // =========================================================================

    pub fn settings(&self) -> &PersistenceSettings {
        &self.settings
    }

    pub fn world(&self) -> &SaveGameWorld<H::Object> {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut SaveGameWorld<H::Object> {
        &mut self.world
    }

    pub fn profile(&self) -> Option<&SaveGameProfile<H::Object>> {
        self.profile.as_ref()
    }

    pub fn profile_mut(&mut self) -> Option<&mut SaveGameProfile<H::Object>> {
        self.profile.as_mut()
    }

    pub fn current_slot(&self) -> i32 {
        self.current_slot
    }

    /// Whether any job is queued, running or parked.
    pub fn is_busy(&self) -> bool {
        self.in_flight > 0
    }

    pub fn pending_saves(&self) -> usize {
        self.pending_saves
    }

    /// Loads waiting on an async type load.
    pub fn parked_loads(&self) -> usize {
        self.parked.len()
    }

    pub fn drain_events(&mut self) -> Vec<PersistenceEvent> {
        std::mem::take(&mut self.events)
    }

    /// Runs before the world and profile are written by every commit.
    pub fn set_pre_commit_hook(&mut self, hook: PreCommitHook<H>) {
        self.pre_commit = Some(hook);
    }

    pub fn set_user_message_hook(&mut self, hook: UserMessageHook) {
        self.user_message = Some(hook);
    }

    /// Bind the running build number. Saves from a later build are refused.
    pub fn set_build_number_oracle(&mut self, oracle: BuildNumberOracle) {
        self.build_number = Some(oracle);
    }

    pub fn set_disable_commit(&mut self, disable: bool) {
        if disable != self.disable_commit {
            info!("Commits {}", if disable { "disabled" } else { "enabled" });
        }
        self.disable_commit = disable;
    }

    /// Refuse all further commits. Queued jobs still run.
    pub fn shutdown(&mut self) {
        info!("Persistence shutting down");
        self.shutting_down = true;
    }

    /// Forget the current world and every registration. The profile stays.
    pub fn reset_persistence(&mut self) {
        info!("Resetting persistence");
        self.cancel_container_loads();
        self.world = SaveGameWorld::new();
        self.current_slot = -1;
        self.loaded_schema = self.settings.schema_version;
        self.registry.clear();
        for key in self.scenes.values() {
            self.registry.track_container(key);
        }
    }

    fn current_build(&self) -> u32 {
        self.build_number.as_ref().map_or(0, |oracle| oracle())
    }

    fn user_message(&mut self, message: &str) {
        match self.user_message.as_mut() {
            Some(hook) => hook(message),
            None => warn!("{}", message),
        }
    }

    fn cancel_container_loads(&mut self) {
        for container in &mut self.world.containers {
            container.cancel_load(self.loader.as_mut());
        }
    }

    // =========================================================================
    // Queue plumbing
    // =========================================================================

    fn enqueue(&mut self, job: WorkerJob, pending: PendingJob<H::Object>) {
        let Some(requests) = self.requests.as_ref() else {
            error!("Persistence worker is closed, dropping {} job", job.kind());
            return;
        };
        self.next_seq += 1;
        let seq = self.next_seq;
        debug!("Queueing {} job {}", job.kind(), seq);
        if requests.send(Request { seq, job }).is_err() {
            error!("Persistence worker is gone, dropping job {}", seq);
            return;
        }
        self.pending.insert(seq, pending);
        self.in_flight += 1;
        if self.in_flight == 1 {
            self.events.push(PersistenceEvent::BackgroundWorkBegan);
        }
    }

    /// Let the worker start the next job and update the in-flight count.
    fn complete_job(&mut self) {
        if let Some(release) = self.release.as_ref() {
            let _ = release.send(());
        }
        self.in_flight = self.in_flight.saturating_sub(1);
        if self.in_flight == 0 {
            self.events.push(PersistenceEvent::BackgroundWorkEnded);
        }
    }

    /// Dispatch finished jobs and route finished type loads. Call once per
    /// frame from the owning thread.
    pub fn pump(&mut self, host: &mut H) {
        for handle in self.loader.drain_completed() {
            if let Some(parked) = self.parked.remove(&handle) {
                debug!("Types for parked load {:?} are ready", handle);
                self.finish_load(host, parked.job, parked.result, Some(parked.save));
                continue;
            }
            self.on_container_types_loaded(host, handle);
        }
        while let Ok(completion) = self.completions.try_recv() {
            self.dispatch(host, completion);
        }
    }

    /// Pump until no job is outstanding or `timeout` elapses. Returns whether
    /// the pipeline went idle. Parked loads only finish when their types do.
    pub fn flush(&mut self, host: &mut H, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.pump(host);
            if self.in_flight == 0 {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let wait = (deadline - now).min(Duration::from_millis(10));
            match self.completions.recv_timeout(wait) {
                Ok(completion) => self.dispatch(host, completion),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
    }
}

impl<H: EntityHost> Drop for PersistenceManager<H> {
    fn drop(&mut self) {
        for (handle, parked) in self.parked.drain() {
            debug!("Dropping parked load {:?} ({})", handle, parked.job.kind());
            self.loader.cancel(handle);
        }
        for container in &mut self.world.containers {
            container.cancel_load(self.loader.as_mut());
        }
        if !self.pending.is_empty() {
            info!("Dropping {} unfinished persistence job(s)", self.pending.len());
        }
        self.pending.clear();
        self.requests.take();
        self.release.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Persistence worker panicked");
            }
        }
    }
}
