// ---------------------------------------------------------------------------
// file_system – save slots as files, with rotated backups
// ---------------------------------------------------------------------------
//
//   {dir}/{name}.sav          live save
//   {dir}/{name}.sav.bak{n}   backups, 1 is newest
//   {dir}/{name}.sav.tmp      in-flight write
//
// Rotation only happens on a successful write and at most once per
// backup interval per slot. The first save of a slot in a session never
// rotates, so quickly restarting the game can't push out all the history.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bevy::log::{debug, info, warn};

use crate::save_header;
use crate::settings::PersistenceSettings;
use crate::storage::atomic_write::atomic_write_with;
use crate::storage::crash_recovery;
use crate::storage::{ExistsResult, StorageBackend};

pub struct FileSystemBackend {
    dir: PathBuf,
    num_backups: u32,
    backup_interval: Duration,
    /// Last rotation (or first save) per slot in this session.
    last_backup: HashMap<String, SystemTime>,
}

impl FileSystemBackend {
    pub fn new(settings: &PersistenceSettings) -> Self {
        Self::open(
            settings.storage_dir(),
            settings.num_backups,
            settings.backup_interval(),
        )
    }

    /// Use `dir` for saves, removing interrupted writes left in it.
    pub fn open(dir: PathBuf, num_backups: u32, backup_interval: Duration) -> Self {
        crash_recovery::clean_save_dir(&dir);
        Self {
            dir,
            num_backups,
            backup_interval,
            last_backup: HashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.sav"))
    }

    pub fn backup_path(&self, name: &str, n: u32) -> PathBuf {
        self.dir.join(format!("{name}.sav.bak{n}"))
    }

    fn existing_backups(&self, name: &str) -> Vec<PathBuf> {
        (1..=self.num_backups)
            .map(|n| self.backup_path(name, n))
            .filter(|p| p.exists())
            .collect()
    }

    fn should_rotate(&mut self, name: &str, now: SystemTime) -> bool {
        if self.num_backups == 0 {
            return false;
        }
        match self.last_backup.get(name) {
            None => {
                debug!("First save of '{}' this session, not rotating backups", name);
                self.last_backup.insert(name.to_string(), now);
                false
            }
            Some(last) => {
                let elapsed = now.duration_since(*last).unwrap_or(Duration::ZERO);
                elapsed >= self.backup_interval
            }
        }
    }

    /// Shift `.bak{n}` to `.bak{n+1}` (dropping the oldest) and copy the live
    /// file to `.bak1`, keeping its modification time.
    fn rotate_backups(&self, name: &str) -> io::Result<()> {
        let live = self.path_for(name);
        if !live.exists() {
            return Ok(());
        }
        for n in (1..self.num_backups).rev() {
            let from = self.backup_path(name, n);
            if from.exists() {
                fs::rename(&from, self.backup_path(name, n + 1))?;
            }
        }
        let bak1 = self.backup_path(name, 1);
        fs::copy(&live, &bak1)?;
        let modified = fs::metadata(&live)?.modified()?;
        File::options().write(true).open(&bak1)?.set_modified(modified)?;
        debug!("Rotated backups for '{}'", name);
        Ok(())
    }
}

impl StorageBackend for FileSystemBackend {
    fn exists(&mut self, name: &str) -> ExistsResult {
        let path = self.path_for(name);
        match fs::read(&path) {
            Ok(bytes) => match save_header::verify_stored(&bytes) {
                Ok(()) => ExistsResult::Ok,
                Err(e) => {
                    warn!("Save '{}' failed verification: {}", path.display(), e);
                    ExistsResult::Corrupt
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => ExistsResult::DoesNotExist,
            Err(e) => {
                warn!("Couldn't read save '{}': {}", path.display(), e);
                ExistsResult::Unknown
            }
        }
    }

    fn read(&mut self, name: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, name: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.path_for(name);
        let now = SystemTime::now();
        let rotate = self.should_rotate(name, now);
        let this = &*self;
        atomic_write_with(&path, bytes, || {
            if rotate {
                if let Err(e) = this.rotate_backups(name) {
                    warn!("Backup rotation for '{}' failed: {}", name, e);
                }
            }
            Ok(())
        })?;
        if rotate {
            self.last_backup.insert(name.to_string(), now);
        }
        Ok(())
    }

    fn delete(&mut self, name: &str) -> io::Result<bool> {
        match fs::remove_file(self.path_for(name)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn has_backup(&mut self, name: &str) -> bool {
        !self.existing_backups(name).is_empty()
    }

    fn restore_backup(&mut self, name: &str) -> bool {
        let backups = self.existing_backups(name);
        let Some((newest, rest)) = backups.split_first() else {
            return false;
        };

        let live = self.path_for(name);
        if live.exists() {
            let stamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            let mut corrupt = live.as_os_str().to_owned();
            corrupt.push(format!("_{stamp}.corrupt"));
            if let Err(e) = fs::rename(&live, &corrupt) {
                warn!("Couldn't move aside corrupt save '{}': {}", live.display(), e);
                return false;
            }
        }

        if let Err(e) = fs::rename(newest, &live) {
            warn!("Couldn't restore backup '{}': {}", newest.display(), e);
            return false;
        }

        // Close the gap so the next rotation sees .bak1.. in order.
        for (i, path) in rest.iter().enumerate() {
            let target = self.backup_path(name, i as u32 + 1);
            if *path != target {
                if let Err(e) = fs::rename(path, &target) {
                    warn!("Couldn't compact backup '{}': {}", path.display(), e);
                }
            }
        }

        info!("Restored '{}' from backup {}", name, newest.display());
        true
    }
}
