//! Crash-safe snapshot replacement
//!
//! The usage file is always replaced whole, never appended: the payload is
//! staged in a sibling `<path>.tmp` file, synced, then renamed over the
//! target. A reader opening the file mid-save sees either the previous
//! snapshot or the new one, never a torn write.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Atomically replace the file at `path` with `data`.
///
/// The staged file carries `mode` on unix, so the snapshot is never readable
/// by other users, even transiently. On failure the staged file is removed
/// and whatever was at `path` before is left in place.
pub fn write_snapshot(path: &Path, data: &[u8], mode: u32) -> io::Result<()> {
    let staging = staging_path(path);
    let result = stage_and_swap(&staging, path, data, mode);
    if result.is_err() {
        let _ = fs::remove_file(&staging);
    }
    result
}

fn stage_and_swap(staging: &Path, target: &Path, data: &[u8], mode: u32) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = options.open(staging)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(staging, target)
}

fn staging_path(target: &Path) -> PathBuf {
    let mut staging = target.as_os_str().to_owned();
    staging.push(".tmp");
    PathBuf::from(staging)
}
