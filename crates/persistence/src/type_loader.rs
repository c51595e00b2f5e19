// ---------------------------------------------------------------------------
// type_loader – batched asynchronous type/class loading
// ---------------------------------------------------------------------------

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use bevy::log::debug;

use crate::persistence_types::ClassPath;

/// Identifies one batched load request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AsyncLoadHandle(pub u64);

/// The host's asset/class loader.
///
/// Completions are polled with [`TypeLoader::drain_completed`] from the
/// owning thread, so a completion is never observed concurrently with caller
/// code.
pub trait TypeLoader {
    /// Whether `class` can be instantiated right now without loading.
    fn is_resident(&self, class: &ClassPath) -> bool;

    /// Start loading every class in `classes` as one batch.
    fn request(&mut self, classes: Vec<ClassPath>) -> AsyncLoadHandle;

    /// Whether the batch has finished loading, whether or not its completion
    /// has been drained yet.
    fn is_complete(&self, handle: AsyncLoadHandle) -> bool;

    /// Abandon a batch. A cancelled handle is never reported as completed.
    fn cancel(&mut self, handle: AsyncLoadHandle);

    /// Handles that finished since the last call.
    fn drain_completed(&mut self) -> Vec<AsyncLoadHandle>;
}

#[derive(Debug, Default)]
struct LoaderState {
    next_handle: u64,
    resident: HashSet<ClassPath>,
    pending: HashMap<AsyncLoadHandle, Vec<ClassPath>>,
    finished: HashSet<AsyncLoadHandle>,
    completed: Vec<AsyncLoadHandle>,
    cancelled: Vec<AsyncLoadHandle>,
    requests: Vec<Vec<ClassPath>>,
}

/// A loader whose requests finish when the owner says so.
///
/// Hosts without real streaming (tools, headless servers, tests) register the
/// classes they can build and call [`ManualTypeLoader::complete`] or
/// [`ManualTypeLoader::complete_all`] from their update loop. Clones share
/// state, so the host can keep one clone to consult residency while the
/// persistence manager owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualTypeLoader {
    state: Rc<RefCell<LoaderState>>,
}

impl ManualTypeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_resident(&self, class: impl Into<ClassPath>) {
        self.state.borrow_mut().resident.insert(class.into());
    }

    pub fn evict(&self, class: &ClassPath) {
        self.state.borrow_mut().resident.remove(class);
    }

    /// Finish `handle`: its classes become resident and the handle is reported
    /// by the next [`TypeLoader::drain_completed`]. Returns false for unknown
    /// or cancelled handles.
    pub fn complete(&self, handle: AsyncLoadHandle) -> bool {
        let mut state = self.state.borrow_mut();
        let Some(classes) = state.pending.remove(&handle) else {
            return false;
        };
        state.resident.extend(classes);
        state.finished.insert(handle);
        state.completed.push(handle);
        true
    }

    /// Finish every outstanding request, oldest first.
    pub fn complete_all(&self) -> usize {
        let mut handles: Vec<AsyncLoadHandle> =
            self.state.borrow().pending.keys().copied().collect();
        handles.sort_by_key(|h| h.0);
        handles.into_iter().filter(|h| self.complete(*h)).count()
    }

    pub fn pending_handles(&self) -> Vec<AsyncLoadHandle> {
        let mut handles: Vec<AsyncLoadHandle> =
            self.state.borrow().pending.keys().copied().collect();
        handles.sort_by_key(|h| h.0);
        handles
    }

    /// Every batch ever requested, in request order.
    pub fn requests(&self) -> Vec<Vec<ClassPath>> {
        self.state.borrow().requests.clone()
    }

    pub fn cancelled(&self) -> Vec<AsyncLoadHandle> {
        self.state.borrow().cancelled.clone()
    }
}

impl TypeLoader for ManualTypeLoader {
    fn is_resident(&self, class: &ClassPath) -> bool {
        self.state.borrow().resident.contains(class)
    }

    fn request(&mut self, classes: Vec<ClassPath>) -> AsyncLoadHandle {
        let mut state = self.state.borrow_mut();
        state.next_handle += 1;
        let handle = AsyncLoadHandle(state.next_handle);
        debug!("Requesting load of {} type(s) as {:?}", classes.len(), handle);
        state.requests.push(classes.clone());
        state.pending.insert(handle, classes);
        handle
    }

    fn is_complete(&self, handle: AsyncLoadHandle) -> bool {
        self.state.borrow().finished.contains(&handle)
    }

    fn cancel(&mut self, handle: AsyncLoadHandle) {
        let mut state = self.state.borrow_mut();
        state.pending.remove(&handle);
        state.completed.retain(|h| *h != handle);
        state.cancelled.push(handle);
    }

    fn drain_completed(&mut self) -> Vec<AsyncLoadHandle> {
        std::mem::take(&mut self.state.borrow_mut().completed)
    }
}
