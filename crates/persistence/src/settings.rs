// ---------------------------------------------------------------------------
// settings – persistence configuration
// ---------------------------------------------------------------------------

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::persistence_types::ClassPath;

/// Configuration for the persistence pipeline and the file-system backend.
///
/// Every field has a default, so a partial JSON document is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceSettings {
    /// Root directory for save files.
    pub save_dir: PathBuf,
    /// Optional per-user subdirectory under `save_dir`.
    pub user_folder: Option<String>,
    /// Number of rotated backups kept per slot. 0 disables backups.
    pub num_backups: u32,
    /// Minimum time between two backup rotations of the same slot.
    pub backup_interval_secs: f64,
    /// Never write anything (commits report `Disabled`).
    pub never_commit: bool,
    /// Whether a commit may be queued while another is still pending.
    pub allow_queued_commits: bool,
    /// Game schema version stamped into every save and exposed to readers.
    pub schema_version: u32,
    /// Host class instantiated as the world save's user data.
    pub world_data_class: Option<ClassPath>,
    /// Host class instantiated as the profile's user data.
    pub profile_data_class: Option<ClassPath>,
    /// Debug delay applied on the worker before each job.
    pub job_delay_ms: u64,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            save_dir: PathBuf::from("saves"),
            user_folder: None,
            num_backups: 3,
            backup_interval_secs: 300.0,
            never_commit: false,
            allow_queued_commits: true,
            schema_version: 0,
            world_data_class: None,
            profile_data_class: None,
            job_delay_ms: 0,
        }
    }
}

impl PersistenceSettings {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Directory the save files actually live in.
    pub fn storage_dir(&self) -> PathBuf {
        match &self.user_folder {
            Some(user) if !user.is_empty() => self.save_dir.join(user),
            _ => self.save_dir.clone(),
        }
    }

    pub fn backup_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.backup_interval_secs).unwrap_or(Duration::ZERO)
    }

    pub fn job_delay(&self) -> Duration {
        Duration::from_millis(self.job_delay_ms)
    }
}
