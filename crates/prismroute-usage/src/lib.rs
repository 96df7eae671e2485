//! PrismRoute Usage Statistics
//!
//! This crate tracks per-request usage observations and keeps them durable:
//! - Concurrent in-memory stats store with per-model detail records
//! - Deep-copy snapshots, versioned export/import, merge with de-duplication
//! - Retention-based pruning of detail records
//! - Crash-safe persistence (temp file + atomic rename)
//! - Interval-driven auto-save loop with prune-before-save ordering

pub mod atomic;
pub mod autosave;
pub mod persistence;
pub mod snapshot;
pub mod stats;

pub use atomic::write_snapshot;
pub use autosave::{spawn_auto_save, AutoSaveTask};
pub use persistence::{stats_file_path, UsageError};
pub use snapshot::{
    strip_request_details, ApiSnapshot, ExportPayload, ImportPayload, ModelSnapshot,
    RequestDetail, StatisticsSnapshot, TokenStats, EXPORT_VERSION,
};
pub use stats::{CleanupOutcome, MergeOutcome, RequestStatistics};
