//! Snapshot value types and the export/import envelope
//!
//! A snapshot is a pure value copy of the store: maps by name, details as
//! ordered lists. Nothing in here holds locks or references back into live
//! state, so snapshots can be serialized, shipped, and merged freely.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Current export payload version
pub const EXPORT_VERSION: u32 = 1;

/// Token counts for a single request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenStats {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub reasoning_tokens: u64,
    #[serde(default)]
    pub cached_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// One recorded request observation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestDetail {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub auth_index: i32,
    #[serde(default)]
    pub tokens: TokenStats,
    #[serde(default)]
    pub failed: bool,
}

/// Per-model aggregate plus bounded recent detail
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub total_requests: u64,
    pub total_tokens: u64,
    #[serde(default)]
    pub details: Vec<RequestDetail>,
}

/// Per-API aggregate over its models
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiSnapshot {
    pub total_requests: u64,
    pub total_tokens: u64,
    #[serde(default)]
    pub models: HashMap<String, ModelSnapshot>,
}

/// Full store snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    #[serde(default)]
    pub total_requests: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub failure_count: u64,
    #[serde(default)]
    pub apis: HashMap<String, ApiSnapshot>,
}

/// Serialization envelope written to disk and returned by exports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportPayload {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub usage: StatisticsSnapshot,
}

/// Envelope accepted on import; version 0 payloads predate the field
#[derive(Debug, Clone, Deserialize)]
pub struct ImportPayload {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub usage: StatisticsSnapshot,
}

/// Drop details older than the retention window from a snapshot value.
///
/// `retention_days <= 0` falls back to the 30-day default. Aggregate counters
/// are cumulative and stay untouched; only detail lists shrink, preserving
/// order.
pub fn strip_request_details(snapshot: &mut StatisticsSnapshot, retention_days: i64) {
    if snapshot.apis.is_empty() {
        return;
    }
    let retention_days = if retention_days <= 0 { 30 } else { retention_days };
    let cutoff = Utc::now() - chrono::Duration::hours(retention_days * 24);

    for api in snapshot.apis.values_mut() {
        for model in api.models.values_mut() {
            if model.details.is_empty() {
                continue;
            }
            model.details.retain(|detail| detail.timestamp > cutoff);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail(days_old: i64, total_tokens: u64) -> RequestDetail {
        RequestDetail {
            timestamp: Utc::now() - chrono::Duration::hours(days_old * 24),
            source: "test".to_string(),
            auth_index: 0,
            tokens: TokenStats {
                total_tokens,
                ..TokenStats::default()
            },
            failed: false,
        }
    }

    fn snapshot_with_details(details: Vec<RequestDetail>) -> StatisticsSnapshot {
        let mut models = HashMap::new();
        models.insert(
            "test-model".to_string(),
            ModelSnapshot {
                total_requests: details.len() as u64,
                total_tokens: details.iter().map(|d| d.tokens.total_tokens).sum(),
                details,
            },
        );
        let mut apis = HashMap::new();
        apis.insert(
            "test-api".to_string(),
            ApiSnapshot {
                total_requests: 5,
                total_tokens: 500,
                models,
            },
        );
        StatisticsSnapshot {
            total_requests: 5,
            total_tokens: 500,
            success_count: 5,
            failure_count: 0,
            apis,
        }
    }

    #[test]
    fn test_strip_retention_window() {
        let mut snapshot = snapshot_with_details(vec![
            detail(40, 100),
            detail(35, 100),
            detail(25, 100),
            detail(10, 100),
            detail(1, 100),
        ]);

        strip_request_details(&mut snapshot, 30);

        let model = &snapshot.apis["test-api"].models["test-model"];
        assert_eq!(model.details.len(), 3);
        let cutoff = Utc::now() - chrono::Duration::hours(30 * 24);
        assert!(model.details.iter().all(|d| d.timestamp > cutoff));
        // Aggregates are untouched.
        assert_eq!(model.total_requests, 5);
        assert_eq!(snapshot.total_tokens, 500);
    }

    #[test]
    fn test_strip_default_retention() {
        let mut snapshot = snapshot_with_details(vec![detail(31, 100), detail(29, 100)]);

        strip_request_details(&mut snapshot, 0);

        let model = &snapshot.apis["test-api"].models["test-model"];
        assert_eq!(model.details.len(), 1, "zero retention defaults to 30 days");
    }

    #[test]
    fn test_strip_empty_details() {
        let mut snapshot = snapshot_with_details(vec![]);
        strip_request_details(&mut snapshot, 30);
        assert!(snapshot.apis["test-api"].models["test-model"].details.is_empty());
    }

    #[test]
    fn test_strip_preserves_order() {
        let mut snapshot = snapshot_with_details(vec![
            detail(25, 1),
            detail(40, 2),
            detail(10, 3),
            detail(1, 4),
        ]);

        strip_request_details(&mut snapshot, 30);

        let kept: Vec<u64> = snapshot.apis["test-api"].models["test-model"]
            .details
            .iter()
            .map(|d| d.tokens.total_tokens)
            .collect();
        assert_eq!(kept, vec![1, 3, 4]);
    }

    #[test]
    fn test_import_payload_defaults_version_zero() {
        let payload: ImportPayload = serde_json::from_str(r#"{"usage":{}}"#).unwrap();
        assert_eq!(payload.version, 0);
        assert_eq!(payload.usage.total_requests, 0);
    }

    #[test]
    fn test_export_payload_round_trip() {
        let payload = ExportPayload {
            version: EXPORT_VERSION,
            exported_at: Utc::now(),
            usage: snapshot_with_details(vec![detail(1, 42)]),
        };

        let json = serde_json::to_string_pretty(&payload).unwrap();
        let back: ImportPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back.version, 1);
        assert_eq!(back.usage, payload.usage);
    }
}
