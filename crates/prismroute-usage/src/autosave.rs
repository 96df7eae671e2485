//! Background auto-save loop for usage statistics
//!
//! Each tick prunes old details from live memory *before* taking the snapshot
//! to persist. Pruning first keeps the snapshot O(retained details); saving a
//! fat store and filtering during serialization pays O(total details) on every
//! tick. Shutdown always performs one final prune+save.

use crate::stats::RequestStatistics;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

/// Handle for the background auto-save task
pub struct AutoSaveTask {
    shutdown_tx: mpsc::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
}

impl AutoSaveTask {
    /// Signal the task to shut down and wait for its terminal save
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.handle.await;
    }
}

/// Spawn a background task that periodically prunes and persists statistics.
///
/// A zero `interval` disables periodic saving; the task then idles until
/// shutdown and performs a single terminal prune+save.
pub fn spawn_auto_save(
    stats: Arc<RequestStatistics>,
    path: PathBuf,
    interval: Duration,
    retention_days: i64,
) -> AutoSaveTask {
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    let handle = tokio::spawn(async move {
        if interval.is_zero() {
            let _ = shutdown_rx.recv().await;
            cleanup_and_save(&stats, &path, retention_days);
            return;
        }

        tracing::info!(
            path = %path.display(),
            interval_secs = interval.as_secs(),
            retention_days,
            "starting usage statistics auto-save task"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    cleanup_and_save(&stats, &path, retention_days);
                    tracing::info!("usage statistics auto-save task shutting down");
                    break;
                }
                _ = sleep(interval) => {
                    cleanup_and_save(&stats, &path, retention_days);
                }
            }
        }
    });

    AutoSaveTask {
        shutdown_tx,
        handle,
    }
}

/// Prune old details from memory, then persist the (now small) snapshot
fn cleanup_and_save(stats: &RequestStatistics, path: &std::path::Path, retention_days: i64) {
    let outcome = stats.cleanup(retention_days);

    if outcome.removed > 0 {
        let removal_ratio = if outcome.before > 0 {
            outcome.removed as f64 / outcome.before as f64
        } else {
            0.0
        };
        tracing::info!(
            details_before = outcome.before,
            details_after = outcome.after,
            details_removed = outcome.removed,
            removal_ratio = format!("{:.1}%", removal_ratio * 100.0),
            "usage statistics memory cleanup completed"
        );
    }

    if let Err(err) = stats.save_to_file(path, retention_days) {
        tracing::warn!(error = %err, "failed to save usage statistics");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{ImportPayload, RequestDetail, TokenStats};
    use chrono::Utc;
    use tempfile::TempDir;

    fn detail(days_old: i64, total_tokens: u64) -> RequestDetail {
        RequestDetail {
            timestamp: Utc::now() - chrono::Duration::hours(days_old * 24),
            source: "cli".to_string(),
            auth_index: 0,
            tokens: TokenStats {
                total_tokens,
                ..TokenStats::default()
            },
            failed: false,
        }
    }

    fn read_payload(path: &std::path::Path) -> ImportPayload {
        serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_periodic_tick_prunes_then_saves() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("usage_stats.json");

        let stats = Arc::new(RequestStatistics::new());
        stats.record("pacore", "m", detail(40, 100));
        stats.record("pacore", "m", detail(1, 100));

        let task = spawn_auto_save(
            Arc::clone(&stats),
            path.clone(),
            Duration::from_millis(50),
            30,
        );
        tokio::time::sleep(Duration::from_millis(150)).await;
        task.shutdown().await;

        // Tick pruned live memory, not just the on-disk copy.
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.apis["pacore"].models["m"].details.len(), 1);

        let payload = read_payload(&path);
        assert_eq!(payload.usage.apis["pacore"].models["m"].details.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_interval_saves_only_on_shutdown() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("usage_stats.json");

        let stats = Arc::new(RequestStatistics::new());
        stats.record("pacore", "m", detail(0, 10));

        let task = spawn_auto_save(Arc::clone(&stats), path.clone(), Duration::ZERO, 30);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!path.exists(), "no periodic save with zero interval");

        task.shutdown().await;
        assert!(path.exists(), "terminal save on shutdown");
        assert_eq!(read_payload(&path).usage.total_requests, 1);
    }

    #[tokio::test]
    async fn test_shutdown_performs_final_save() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("usage_stats.json");

        let stats = Arc::new(RequestStatistics::new());
        let task = spawn_auto_save(
            Arc::clone(&stats),
            path.clone(),
            Duration::from_secs(3600),
            30,
        );

        // Record after spawning; only the terminal save can observe it.
        stats.record("pacore", "m", detail(0, 42));
        task.shutdown().await;

        let payload = read_payload(&path);
        assert_eq!(payload.usage.total_tokens, 42);
    }

    #[tokio::test]
    async fn test_save_failure_keeps_task_alive() {
        let temp_dir = TempDir::new().unwrap();
        // A directory path cannot be renamed over; saves fail but the loop
        // must keep running and still attempt the terminal save.
        let path = temp_dir.path().join("occupied");
        std::fs::create_dir_all(&path).unwrap();

        let stats = Arc::new(RequestStatistics::new());
        stats.record("pacore", "m", detail(0, 10));

        let task = spawn_auto_save(
            Arc::clone(&stats),
            path.clone(),
            Duration::from_millis(20),
            30,
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        task.shutdown().await;
    }
}
