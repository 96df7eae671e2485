//! Concurrent in-memory request statistics
//!
//! One reader-writer lock guards the whole store: mutations (`record*`,
//! `replace`, `merge`, `cleanup`) take the write lock, `snapshot` takes the
//! read lock and deep-copies. Snapshot and import need a consistent
//! cross-model view, and the update rate is tiny next to token generation, so
//! finer-grained locking buys nothing here.

use crate::snapshot::{
    ApiSnapshot, ModelSnapshot, RequestDetail, StatisticsSnapshot,
};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

#[derive(Debug, Default)]
struct ModelStats {
    total_requests: u64,
    total_tokens: u64,
    details: Vec<RequestDetail>,
}

#[derive(Debug, Default)]
struct ApiStats {
    total_requests: u64,
    total_tokens: u64,
    models: HashMap<String, ModelStats>,
}

#[derive(Debug, Default)]
struct StatsInner {
    total_requests: u64,
    total_tokens: u64,
    success_count: u64,
    failure_count: u64,
    apis: HashMap<String, ApiStats>,
}

/// Result of a merge-import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Details inserted
    pub added: u64,
    /// Duplicate details skipped
    pub skipped: u64,
}

/// Result of a retention cleanup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupOutcome {
    /// Detail records before the pass
    pub before: u64,
    /// Detail records surviving the pass
    pub after: u64,
    /// Detail records removed
    pub removed: u64,
}

/// Thread-safe usage statistics store
#[derive(Debug, Default)]
pub struct RequestStatistics {
    inner: RwLock<StatsInner>,
}

impl RequestStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful request observation
    pub fn record(&self, api: &str, model: &str, detail: RequestDetail) {
        self.apply(api, model, detail, false);
    }

    /// Record a failed request observation
    pub fn record_failure(&self, api: &str, model: &str, detail: RequestDetail) {
        self.apply(api, model, detail, true);
    }

    fn apply(&self, api: &str, model: &str, mut detail: RequestDetail, failed: bool) {
        detail.failed = failed;
        let tokens = detail.tokens.total_tokens;

        let mut inner = self.inner.write().unwrap();
        inner.total_requests += 1;
        inner.total_tokens += tokens;
        if failed {
            inner.failure_count += 1;
        } else {
            inner.success_count += 1;
        }

        let api_stats = inner.apis.entry(api.to_string()).or_default();
        api_stats.total_requests += 1;
        api_stats.total_tokens += tokens;

        let model_stats = api_stats.models.entry(model.to_string()).or_default();
        model_stats.total_requests += 1;
        model_stats.total_tokens += tokens;
        model_stats.details.push(detail);
    }

    /// Deep-copy the current state; no live reference escapes
    pub fn snapshot(&self) -> StatisticsSnapshot {
        let inner = self.inner.read().unwrap();

        let apis = inner
            .apis
            .iter()
            .map(|(api_name, api_stats)| {
                let models = api_stats
                    .models
                    .iter()
                    .map(|(model_name, model_stats)| {
                        (
                            model_name.clone(),
                            ModelSnapshot {
                                total_requests: model_stats.total_requests,
                                total_tokens: model_stats.total_tokens,
                                details: model_stats.details.clone(),
                            },
                        )
                    })
                    .collect();
                (
                    api_name.clone(),
                    ApiSnapshot {
                        total_requests: api_stats.total_requests,
                        total_tokens: api_stats.total_tokens,
                        models,
                    },
                )
            })
            .collect();

        StatisticsSnapshot {
            total_requests: inner.total_requests,
            total_tokens: inner.total_tokens,
            success_count: inner.success_count,
            failure_count: inner.failure_count,
            apis,
        }
    }

    /// Discard current state and reinitialize from a snapshot
    pub fn replace(&self, snapshot: StatisticsSnapshot) {
        let apis = snapshot
            .apis
            .into_iter()
            .map(|(api_name, api_snap)| {
                let models = api_snap
                    .models
                    .into_iter()
                    .map(|(model_name, model_snap)| {
                        (
                            model_name,
                            ModelStats {
                                total_requests: model_snap.total_requests,
                                total_tokens: model_snap.total_tokens,
                                details: model_snap.details,
                            },
                        )
                    })
                    .collect();
                (
                    api_name,
                    ApiStats {
                        total_requests: api_snap.total_requests,
                        total_tokens: api_snap.total_tokens,
                        models,
                    },
                )
            })
            .collect();

        let mut inner = self.inner.write().unwrap();
        *inner = StatsInner {
            total_requests: snapshot.total_requests,
            total_tokens: snapshot.total_tokens,
            success_count: snapshot.success_count,
            failure_count: snapshot.failure_count,
            apis,
        };
    }

    /// Add a snapshot's counters into the store and merge its details,
    /// de-duplicating details by full value equality.
    pub fn merge(&self, snapshot: StatisticsSnapshot) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        let mut inner = self.inner.write().unwrap();

        inner.total_requests += snapshot.total_requests;
        inner.total_tokens += snapshot.total_tokens;
        inner.success_count += snapshot.success_count;
        inner.failure_count += snapshot.failure_count;

        for (api_name, api_snap) in snapshot.apis {
            let api_stats = inner.apis.entry(api_name).or_default();
            api_stats.total_requests += api_snap.total_requests;
            api_stats.total_tokens += api_snap.total_tokens;

            for (model_name, model_snap) in api_snap.models {
                let model_stats = api_stats.models.entry(model_name).or_default();
                model_stats.total_requests += model_snap.total_requests;
                model_stats.total_tokens += model_snap.total_tokens;

                let mut seen: HashSet<RequestDetail> =
                    model_stats.details.iter().cloned().collect();
                for detail in model_snap.details {
                    if seen.contains(&detail) {
                        outcome.skipped += 1;
                    } else {
                        seen.insert(detail.clone());
                        model_stats.details.push(detail);
                        outcome.added += 1;
                    }
                }
            }
        }

        outcome
    }

    /// Evict details older than the retention window from live memory.
    ///
    /// `retention_days <= 0` falls back to the 30-day default. Aggregate
    /// counters are cumulative and are not adjusted. Survivor order is
    /// preserved.
    pub fn cleanup(&self, retention_days: i64) -> CleanupOutcome {
        let retention_days = if retention_days <= 0 { 30 } else { retention_days };
        let cutoff = Utc::now() - chrono::Duration::hours(retention_days * 24);

        let mut outcome = CleanupOutcome::default();
        let mut inner = self.inner.write().unwrap();

        for api_stats in inner.apis.values_mut() {
            for model_stats in api_stats.models.values_mut() {
                outcome.before += model_stats.details.len() as u64;
                model_stats.details.retain(|d| d.timestamp > cutoff);
                outcome.after += model_stats.details.len() as u64;
            }
        }

        outcome.removed = outcome.before - outcome.after;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::TokenStats;

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

    #[test]
    fn test_record_updates_all_levels() {
        let stats = RequestStatistics::new();
        stats.record("pacore", "pacore-large", detail(0, 100));
        stats.record("pacore", "pacore-large", detail(0, 50));
        stats.record("pacore", "pacore-mini", detail(0, 10));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.total_tokens, 160);
        assert_eq!(snapshot.success_count, 3);
        assert_eq!(snapshot.failure_count, 0);

        let api = &snapshot.apis["pacore"];
        assert_eq!(api.total_requests, 3);
        assert_eq!(api.total_tokens, 160);
        assert_eq!(api.models["pacore-large"].total_requests, 2);
        assert_eq!(api.models["pacore-large"].details.len(), 2);
        assert_eq!(api.models["pacore-mini"].total_requests, 1);
    }

    #[test]
    fn test_record_failure_counts_failures() {
        let stats = RequestStatistics::new();
        stats.record("pacore", "m", detail(0, 10));
        stats.record_failure("pacore", "m", detail(0, 0));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.success_count, 1);
        assert_eq!(snapshot.failure_count, 1);
        assert_eq!(snapshot.success_count + snapshot.failure_count, snapshot.total_requests);

        let details = &snapshot.apis["pacore"].models["m"].details;
        assert!(!details[0].failed);
        assert!(details[1].failed);
    }

    #[test]
    fn test_aggregates_equal_sums() {
        let stats = RequestStatistics::new();
        stats.record("a", "m1", detail(0, 10));
        stats.record("a", "m2", detail(0, 20));
        stats.record("b", "m1", detail(0, 30));
        stats.record_failure("b", "m3", detail(0, 5));

        let snapshot = stats.snapshot();
        let api_request_sum: u64 = snapshot.apis.values().map(|a| a.total_requests).sum();
        let api_token_sum: u64 = snapshot.apis.values().map(|a| a.total_tokens).sum();
        assert_eq!(api_request_sum, snapshot.total_requests);
        assert_eq!(api_token_sum, snapshot.total_tokens);

        for api in snapshot.apis.values() {
            let model_request_sum: u64 = api.models.values().map(|m| m.total_requests).sum();
            let model_token_sum: u64 = api.models.values().map(|m| m.total_tokens).sum();
            assert_eq!(model_request_sum, api.total_requests);
            assert_eq!(model_token_sum, api.total_tokens);
        }
    }

    #[test]
    fn test_snapshot_is_a_deep_copy() {
        let stats = RequestStatistics::new();
        stats.record("pacore", "m", detail(0, 10));

        let snapshot = stats.snapshot();
        stats.record("pacore", "m", detail(0, 10));

        // The earlier snapshot does not observe the later mutation.
        assert_eq!(snapshot.total_requests, 1);
        assert_eq!(snapshot.apis["pacore"].models["m"].details.len(), 1);
    }

    #[test]
    fn test_replace_overwrites_state() {
        let stats = RequestStatistics::new();
        stats.record("old-api", "m", detail(0, 999));

        let incoming = {
            let other = RequestStatistics::new();
            other.record("new-api", "m2", detail(0, 7));
            other.snapshot()
        };
        stats.replace(incoming.clone());

        let snapshot = stats.snapshot();
        assert_eq!(snapshot, incoming);
        assert!(!snapshot.apis.contains_key("old-api"));
    }

    #[test]
    fn test_merge_adds_counters_and_dedupes_details() {
        let stats = RequestStatistics::new();
        let shared = detail(0, 10);
        stats.record("pacore", "m", shared.clone());

        let incoming = {
            let other = RequestStatistics::new();
            other.record("pacore", "m", shared.clone());
            other.record("pacore", "m", detail(1, 20));
            other.snapshot()
        };

        let outcome = stats.merge(incoming);
        assert_eq!(outcome.added, 1);
        assert_eq!(outcome.skipped, 1);

        let snapshot = stats.snapshot();
        // Counters are added straight from the payload.
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.apis["pacore"].models["m"].details.len(), 2);
    }

    #[test]
    fn test_merge_into_empty_store() {
        let stats = RequestStatistics::new();
        let incoming = {
            let other = RequestStatistics::new();
            other.record("pacore", "m", detail(0, 10));
            other.record_failure("pacore", "m", detail(0, 0));
            other.snapshot()
        };

        let outcome = stats.merge(incoming.clone());
        assert_eq!(outcome.added, 2);
        assert_eq!(outcome.skipped, 0);
        assert_eq!(stats.snapshot(), incoming);
    }

    #[test]
    fn test_cleanup_retention_window() {
        let stats = RequestStatistics::new();
        for days_old in [40, 35, 25, 10, 1] {
            stats.record("pacore", "m", detail(days_old, 100));
        }

        let outcome = stats.cleanup(30);
        assert_eq!(outcome.before, 5);
        assert_eq!(outcome.after, 3);
        assert_eq!(outcome.removed, 2);

        let snapshot = stats.snapshot();
        let details = &snapshot.apis["pacore"].models["m"].details;
        assert_eq!(details.len(), 3);
        let cutoff = Utc::now() - chrono::Duration::hours(30 * 24);
        assert!(details.iter().all(|d| d.timestamp > cutoff));
        // Counters are cumulative and untouched by pruning.
        assert_eq!(snapshot.total_requests, 5);
    }

    #[test]
    fn test_cleanup_multiple_models() {
        let stats = RequestStatistics::new();
        stats.record("api1", "model-a", detail(40, 100));
        stats.record("api1", "model-a", detail(10, 100));
        stats.record("api1", "model-b", detail(50, 100));
        stats.record("api1", "model-b", detail(45, 100));
        stats.record("api1", "model-b", detail(5, 100));

        let outcome = stats.cleanup(30);
        assert_eq!(outcome.before, 5);
        assert_eq!(outcome.after, 2);
        assert_eq!(outcome.removed, 3);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.apis["api1"].models["model-a"].details.len(), 1);
        assert_eq!(snapshot.apis["api1"].models["model-b"].details.len(), 1);
    }

    #[test]
    fn test_cleanup_default_retention() {
        let stats = RequestStatistics::new();
        stats.record("pacore", "m", detail(31, 100));
        stats.record("pacore", "m", detail(29, 100));

        let outcome = stats.cleanup(0);
        assert_eq!(outcome.before, 2);
        assert_eq!(outcome.after, 1);
        assert_eq!(outcome.removed, 1);
    }

    #[test]
    fn test_cleanup_no_old_data() {
        let stats = RequestStatistics::new();
        stats.record("pacore", "m", detail(5, 100));
        stats.record("pacore", "m", detail(1, 100));

        let outcome = stats.cleanup(30);
        assert_eq!(outcome.before, 2);
        assert_eq!(outcome.after, 2);
        assert_eq!(outcome.removed, 0);
    }

    #[test]
    fn test_cleanup_preserves_survivor_order() {
        let stats = RequestStatistics::new();
        stats.record("pacore", "m", detail(25, 1));
        stats.record("pacore", "m", detail(40, 2));
        stats.record("pacore", "m", detail(10, 3));

        stats.cleanup(30);

        let snapshot = stats.snapshot();
        let kept: Vec<u64> = snapshot.apis["pacore"].models["m"]
            .details
            .iter()
            .map(|d| d.tokens.total_tokens)
            .collect();
        assert_eq!(kept, vec![1, 3]);
    }

    #[test]
    fn test_concurrent_records() {
        use std::sync::Arc;

        let stats = Arc::new(RequestStatistics::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let stats = Arc::clone(&stats);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    stats.record("pacore", "m", detail(0, 1));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_requests, 800);
        assert_eq!(snapshot.total_tokens, 800);
        assert_eq!(snapshot.apis["pacore"].models["m"].details.len(), 800);
    }
}
