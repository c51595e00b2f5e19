// ---------------------------------------------------------------------------
// Shared identity and result types
// ---------------------------------------------------------------------------

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::name_table::Name;
use crate::save_error::SaveError;

/// Outcome of a load, load-profile or read job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadResult {
    /// Loaded successfully.
    Success,
    /// There is no save in this slot. Load jobs hand back a fresh save,
    /// read jobs hand back nothing.
    DoesNotExist,
    /// The save is corrupt and no backup could recover it.
    Corrupt,
    /// The save was corrupt but a backup was restored and loaded.
    Restored,
    /// The save was written by a newer format or build.
    TooNew,
    /// The storage backend failed for some other reason.
    Unknown,
}

impl LoadResult {
    /// Whether a save was actually loaded (restored backups count).
    pub fn is_success(self) -> bool {
        matches!(self, LoadResult::Success | LoadResult::Restored)
    }
}

impl From<&SaveError> for LoadResult {
    fn from(err: &SaveError) -> Self {
        match err {
            SaveError::TooNew { .. } => LoadResult::TooNew,
            SaveError::Io(_) => LoadResult::Unknown,
            _ => LoadResult::Corrupt,
        }
    }
}

/// Outcome of a has-slot job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HasResult {
    Empty,
    Exists,
    Corrupt,
    Unknown,
}

/// Outcome of a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaveResult {
    Success,
    /// Committing is disabled, or the pipeline is shutting down.
    Disabled,
    /// Another commit is still pending and queueing is not allowed.
    Busy,
    Unknown,
}

/// A type reference: the path the host uses to find or load a class.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ClassPath(pub String);

impl ClassPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ClassPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClassPath {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identity of a persistent entity, unique for the lifetime of one save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StableId(pub u64);

impl StableId {
    /// Never handed out by any generator.
    pub const INVALID: StableId = StableId(0);

    /// Ids generated at run time have the top bit set so they never collide
    /// with ids assigned to pre-placed entities.
    pub const RUNTIME_BASE: StableId = StableId(0x8000_0000_0000_0000);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    pub fn is_runtime(self) -> bool {
        self.0 & Self::RUNTIME_BASE.0 != 0
    }
}

impl fmt::Display for StableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Opaque host identity for a loaded scene (level).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SceneId(pub u32);

/// Addresses one entity across save/load: its container plus its stable id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct PersistenceKey {
    pub container: Name,
    pub id: StableId,
}

impl PersistenceKey {
    pub fn is_valid(&self) -> bool {
        self.id.is_valid()
    }
}
