//! Leftovers from interrupted writes.
//!
//! A crash between writing `{slot}.sav.tmp` and renaming it leaves the temp
//! file behind. The live file is still the previous good save, so the temp
//! file is simply removed when the backend opens the directory.

use std::path::{Path, PathBuf};

use bevy::log::{info, warn};

/// Every `.tmp` file directly inside `dir`.
pub fn find_tmp_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut tmp_files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "tmp"))
        .collect();
    tmp_files.sort();
    tmp_files
}

/// Delete `tmp_files`, returning how many were actually removed.
pub fn clean_tmp_files(tmp_files: &[PathBuf]) -> usize {
    tmp_files
        .iter()
        .filter(|path| match std::fs::remove_file(path) {
            Ok(()) => {
                info!("Removed interrupted write {}", path.display());
                true
            }
            Err(e) => {
                warn!("Couldn't remove interrupted write {}: {}", path.display(), e);
                false
            }
        })
        .count()
}

/// Find and remove interrupted writes in `dir`.
pub fn clean_save_dir(dir: &Path) -> usize {
    let tmp_files = find_tmp_files(dir);
    if tmp_files.is_empty() {
        return 0;
    }
    info!("Found {} interrupted write(s) in {}", tmp_files.len(), dir.display());
    clean_tmp_files(&tmp_files)
}
