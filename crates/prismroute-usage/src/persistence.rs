//! Durable persistence for usage statistics
//!
//! Snapshots are stripped to the retention window, pretty-printed, and written
//! via temp-file + atomic rename so readers never observe partial content. A
//! process-global mutex serializes writers; concurrent auto-save loops on the
//! same file are safe.

use crate::atomic::write_snapshot;
use crate::snapshot::{strip_request_details, ExportPayload, ImportPayload, EXPORT_VERSION};
use crate::stats::RequestStatistics;
use chrono::Utc;
use once_cell::sync::Lazy;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

const USAGE_STATS_FILE_NAME: &str = "usage_stats.json";

static PERSISTENCE_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Usage persistence errors
#[derive(Debug, Error)]
pub enum UsageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unsupported usage stats version: {0}")]
    UnsupportedVersion(u32),
}

/// Default usage stats path under the auth directory
pub fn stats_file_path(auth_dir: &Path) -> PathBuf {
    auth_dir.join(USAGE_STATS_FILE_NAME)
}

impl RequestStatistics {
    /// Wrap the current snapshot in a versioned export envelope
    pub fn export(&self) -> ExportPayload {
        ExportPayload {
            version: EXPORT_VERSION,
            exported_at: Utc::now(),
            usage: self.snapshot(),
        }
    }

    /// Merge a previously exported payload into the store.
    ///
    /// Accepts version 0 and 1 payloads; anything newer fails and leaves the
    /// store unchanged.
    pub fn import_merge(
        &self,
        payload: ImportPayload,
    ) -> Result<crate::stats::MergeOutcome, UsageError> {
        if payload.version > EXPORT_VERSION {
            return Err(UsageError::UnsupportedVersion(payload.version));
        }
        Ok(self.merge(payload.usage))
    }

    /// Persist the current statistics snapshot to disk.
    ///
    /// `retention_days` bounds the detail records written; `<= 0` defaults to
    /// 30 days. The in-memory store is expected to be pruned already by the
    /// auto-save loop; applying the filter to the snapshot again is a cheap
    /// no-op that keeps the on-disk form correct regardless.
    pub fn save_to_file<P: AsRef<Path>>(
        &self,
        path: P,
        retention_days: i64,
    ) -> Result<(), UsageError> {
        let mut snapshot = self.snapshot();
        strip_request_details(&mut snapshot, retention_days);

        let payload = ExportPayload {
            version: EXPORT_VERSION,
            exported_at: Utc::now(),
            usage: snapshot,
        };
        let data = serde_json::to_vec_pretty(&payload)?;

        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_private_dir(parent)?;
        }

        let _guard = PERSISTENCE_LOCK.lock().unwrap();
        write_snapshot(path, &data, 0o600)?;
        Ok(())
    }

    /// Replace the in-memory statistics with the snapshot loaded from disk.
    ///
    /// A missing or empty file is not an error; the store is left untouched.
    pub fn load_from_file<P: AsRef<Path>>(&self, path: P) -> Result<(), UsageError> {
        let data = match fs::read(path.as_ref()) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        if data.is_empty() {
            return Ok(());
        }

        let payload: ImportPayload = serde_json::from_slice(&data)?;
        if payload.version > EXPORT_VERSION {
            return Err(UsageError::UnsupportedVersion(payload.version));
        }
        self.replace(payload.usage);
        Ok(())
    }
}

fn create_private_dir(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
    }
    #[cfg(not(unix))]
    {
        fs::create_dir_all(dir)
    }
}
