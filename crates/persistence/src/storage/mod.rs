// ---------------------------------------------------------------------------
// storage – where save bytes live
// ---------------------------------------------------------------------------

pub mod atomic_write;
pub mod crash_recovery;
pub mod file_system;
pub mod memory;

use std::io;

pub use file_system::FileSystemBackend;
pub use memory::MemoryBackend;

/// Result of probing a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistsResult {
    Ok,
    DoesNotExist,
    /// Present but fails the size/checksum check.
    Corrupt,
    /// The backend couldn't tell.
    Unknown,
}

/// Platform storage for named save blobs.
///
/// Owned by the pipeline's worker thread, so every call happens off the
/// caller thread and never concurrently.
pub trait StorageBackend: Send {
    fn exists(&mut self, name: &str) -> ExistsResult;

    /// `Ok(None)` when there is nothing stored under `name`.
    fn read(&mut self, name: &str) -> io::Result<Option<Vec<u8>>>;

    /// Replace the stored bytes. Must not require a previous version to exist.
    fn write(&mut self, name: &str, bytes: &[u8]) -> io::Result<()>;

    /// Returns whether anything was deleted.
    fn delete(&mut self, name: &str) -> io::Result<bool>;

    fn has_backup(&mut self, name: &str) -> bool {
        let _ = name;
        false
    }

    /// Replace `name` with its newest backup. Returns false when there was
    /// nothing to restore.
    fn restore_backup(&mut self, name: &str) -> bool {
        let _ = name;
        false
    }
}
