//! Atomic file replacement using the write-rename pattern.
//!
//! Data goes to `{path}.tmp` first and is flushed with `sync_all()`. Only
//! then is the temp file renamed over the live file, so a crash part way
//! through leaves the previous save untouched. The live file does not need
//! to exist.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Temp file used while replacing `path`.
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".tmp");
    PathBuf::from(s)
}

/// Atomically replace `path` with `data`.
pub fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    atomic_write_with(path, data, || Ok(()))
}

/// Like [`atomic_write`], running `before_replace` after the temp file is on
/// disk and before it is renamed into place. Backup rotation hooks in here.
pub fn atomic_write_with(
    path: &Path,
    data: &[u8],
    before_replace: impl FnOnce() -> std::io::Result<()>,
) -> std::io::Result<()> {
    let tmp = tmp_path(path);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut file = File::create(&tmp)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    if let Err(e) = before_replace() {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }

    fs::rename(&tmp, path)
}
