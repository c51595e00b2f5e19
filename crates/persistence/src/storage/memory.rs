// ---------------------------------------------------------------------------
// memory – in-process storage backend
// ---------------------------------------------------------------------------

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use bevy::log::info;

use crate::save_header;
use crate::storage::{ExistsResult, StorageBackend};

#[derive(Debug, Default)]
struct MemoryState {
    files: HashMap<String, Vec<u8>>,
    /// Newest first.
    backups: HashMap<String, Vec<Vec<u8>>>,
    fail_reads: bool,
    fail_writes: bool,
    /// Names whose next write fails, once.
    fail_next_write: Vec<String>,
    writes: Vec<String>,
}

/// A map-backed store for headless hosts and tests.
///
/// Clones share the same store, so a test can keep one clone to inspect or
/// damage slots while the pipeline's worker owns another. Every successful
/// write pushes the previous bytes onto a bounded backup stack.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    num_backups: usize,
}

impl MemoryBackend {
    pub fn new(num_backups: usize) -> Self {
        Self {
            state: Arc::default(),
            num_backups,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.lock().files.get(name).cloned()
    }

    pub fn insert(&self, name: &str, bytes: Vec<u8>) {
        self.lock().files.insert(name.to_string(), bytes);
    }

    /// Delete behind the pipeline's back.
    pub fn remove(&self, name: &str) {
        self.lock().files.remove(name);
    }

    /// Flip one bit in the stored bytes of `name`.
    pub fn corrupt(&self, name: &str, at: usize) {
        if let Some(bytes) = self.lock().files.get_mut(name) {
            if let Some(b) = bytes.get_mut(at) {
                *b ^= 0x10;
            }
        }
    }

    pub fn backup_count(&self, name: &str) -> usize {
        self.lock().backups.get(name).map_or(0, |b| b.len())
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    pub fn fail_next_write(&self, name: &str) {
        self.lock().fail_next_write.push(name.to_string());
    }

    /// Names written so far, in order.
    pub fn writes(&self) -> Vec<String> {
        self.lock().writes.clone()
    }
}

impl StorageBackend for MemoryBackend {
    fn exists(&mut self, name: &str) -> ExistsResult {
        let state = self.lock();
        if state.fail_reads {
            return ExistsResult::Unknown;
        }
        match state.files.get(name) {
            None => ExistsResult::DoesNotExist,
            Some(bytes) => match save_header::verify_stored(bytes) {
                Ok(()) => ExistsResult::Ok,
                Err(_) => ExistsResult::Corrupt,
            },
        }
    }

    fn read(&mut self, name: &str) -> io::Result<Option<Vec<u8>>> {
        let state = self.lock();
        if state.fail_reads {
            return Err(io::Error::other("injected read failure"));
        }
        Ok(state.files.get(name).cloned())
    }

    fn write(&mut self, name: &str, bytes: &[u8]) -> io::Result<()> {
        let num_backups = self.num_backups;
        let mut state = self.lock();
        if let Some(i) = state.fail_next_write.iter().position(|n| n == name) {
            state.fail_next_write.remove(i);
            return Err(io::Error::other("injected write failure"));
        }
        if state.fail_writes {
            return Err(io::Error::other("injected write failure"));
        }
        if let Some(previous) = state.files.insert(name.to_string(), bytes.to_vec()) {
            if num_backups > 0 {
                let stack = state.backups.entry(name.to_string()).or_default();
                stack.insert(0, previous);
                stack.truncate(num_backups);
            }
        }
        state.writes.push(name.to_string());
        Ok(())
    }

    fn delete(&mut self, name: &str) -> io::Result<bool> {
        Ok(self.lock().files.remove(name).is_some())
    }

    fn has_backup(&mut self, name: &str) -> bool {
        self.backup_count(name) > 0
    }

    fn restore_backup(&mut self, name: &str) -> bool {
        let mut state = self.lock();
        let Some(newest) = state.backups.get_mut(name).and_then(|stack| {
            if stack.is_empty() {
                None
            } else {
                Some(stack.remove(0))
            }
        }) else {
            return false;
        };
        state.files.insert(name.to_string(), newest);
        info!("Restored '{}' from in-memory backup", name);
        true
    }
}
