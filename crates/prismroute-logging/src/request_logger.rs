//! Request log files and their retention janitor
//!
//! Request records append as JSON lines to `v1-request-<date>.log` files. The
//! janitor enforces two independent bounds over the logs directory: an age
//! cutoff and an aggregate byte cap, deleting oldest-by-mtime first. Only
//! files matching the request-log shape are eligible; `error-*.log`,
//! `main*.log`, `*.tmp` and anything else are protected.

use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use thiserror::Error;

const REQUEST_LOG_PREFIX: &str = "v1-request-";
const REQUEST_LOG_SUFFIX: &str = ".log";

const DEFAULT_RETENTION_DAYS: i64 = 7;
const DEFAULT_MAX_TOTAL_SIZE_MB: u64 = 100;

/// Logging errors
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// File-backed request logger with retention enforcement
#[derive(Debug, Clone)]
pub struct FileRequestLogger {
    enabled: bool,
    logs_dir: PathBuf,
    retention_days: i64,
    max_total_size_mb: u64,
}

/// A candidate log file collected for eviction selection
#[derive(Debug, Clone)]
struct LogFileEntry {
    path: PathBuf,
    modified: SystemTime,
    size: u64,
}

impl FileRequestLogger {
    /// Create a logger; zero retention/size arguments fall back to the
    /// defaults (7 days, 100 MB).
    pub fn new(
        enabled: bool,
        logs_dir: impl Into<PathBuf>,
        retention_days: i64,
        max_total_size_mb: u64,
    ) -> Self {
        Self {
            enabled,
            logs_dir: logs_dir.into(),
            retention_days: if retention_days == 0 {
                DEFAULT_RETENTION_DAYS
            } else {
                retention_days
            },
            max_total_size_mb: if max_total_size_mb == 0 {
                DEFAULT_MAX_TOTAL_SIZE_MB
            } else {
                max_total_size_mb
            },
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn retention_days(&self) -> i64 {
        self.retention_days
    }

    pub fn max_total_size_mb(&self) -> u64 {
        self.max_total_size_mb
    }

    /// Append a request record as one JSON line to today's request log.
    /// A disabled logger is a no-op.
    pub fn log_request(&self, record: &serde_json::Value) -> Result<(), LoggingError> {
        if !self.enabled {
            return Ok(());
        }
        fs::create_dir_all(&self.logs_dir)?;

        let file_name = format!(
            "{}{}{}",
            REQUEST_LOG_PREFIX,
            Utc::now().format("%Y%m%d"),
            REQUEST_LOG_SUFFIX
        );
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.logs_dir.join(file_name))?;

        let line = serde_json::to_string(record)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    /// Delete request logs violating the age or aggregate-size bound.
    ///
    /// Passing 0 for a bound disables that pass; both 0 deletes nothing. A
    /// missing directory is not an error. Returns the number of files
    /// deleted.
    pub fn cleanup_request_logs(
        &self,
        retention_days: i64,
        max_total_size_mb: u64,
    ) -> Result<usize, LoggingError> {
        if !self.logs_dir.exists() {
            return Ok(0);
        }

        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(&self.logs_dir)? {
            let dir_entry = dir_entry?;
            let path = dir_entry.path();
            if !path.is_file() {
                continue;
            }
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };
            if !is_request_log(name) {
                continue;
            }
            let metadata = dir_entry.metadata()?;
            entries.push(LogFileEntry {
                path,
                modified: metadata.modified()?,
                size: metadata.len(),
            });
        }

        let doomed = select_expired(
            &entries,
            SystemTime::now(),
            retention_days,
            max_total_size_mb,
        );

        let mut deleted = 0;
        for path in doomed {
            match fs::remove_file(&path) {
                Ok(()) => {
                    deleted += 1;
                    tracing::info!(path = %path.display(), "deleted expired request log");
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "failed to delete request log");
                }
            }
        }
        Ok(deleted)
    }
}

/// True for file names shaped like request logs (`v1-request-*.log`)
fn is_request_log(name: &str) -> bool {
    name.starts_with(REQUEST_LOG_PREFIX) && name.ends_with(REQUEST_LOG_SUFFIX)
}

/// Pick the files to delete: first everything older than the age cutoff, then
/// oldest-by-mtime among the survivors until the aggregate size fits the cap.
fn select_expired(
    entries: &[LogFileEntry],
    now: SystemTime,
    retention_days: i64,
    max_total_size_mb: u64,
) -> Vec<PathBuf> {
    let mut doomed = Vec::new();
    let mut survivors: Vec<&LogFileEntry> = entries.iter().collect();

    if retention_days > 0 {
        let cutoff = now - Duration::from_secs(retention_days as u64 * 86_400);
        let (expired, kept): (Vec<_>, Vec<_>) =
            survivors.into_iter().partition(|e| e.modified <= cutoff);
        doomed.extend(expired.into_iter().map(|e| e.path.clone()));
        survivors = kept;
    }

    if max_total_size_mb > 0 {
        let max_bytes = max_total_size_mb * 1024 * 1024;
        let mut total: u64 = survivors.iter().map(|e| e.size).sum();

        survivors.sort_by_key(|e| e.modified);
        let mut oldest_first = survivors.into_iter();
        while total > max_bytes {
            match oldest_first.next() {
                Some(entry) => {
                    total -= entry.size;
                    doomed.push(entry.path.clone());
                }
                None => break,
            }
        }
    }

    doomed
}
