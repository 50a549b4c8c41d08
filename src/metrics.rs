//! Per-call operation records and aggregated views.
//!
//! Records are append-only within a process lifetime and guarded by a
//! single mutex; nothing is persisted. The token estimate is
//! `ceil(serialized_len / 4)`, a coarse proxy for LLM token count used
//! for reporting only.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Characters per token in the estimate.
const CHARS_PER_TOKEN: usize = 4;

/// Estimate tokens for a serialized JSON value.
#[must_use]
pub fn estimate_tokens(value: &Value) -> u64 {
    estimate_tokens_for_len(value.to_string().len())
}

/// Estimate tokens for a known serialized length.
#[must_use]
pub const fn estimate_tokens_for_len(len: usize) -> u64 {
    len.div_ceil(CHARS_PER_TOKEN) as u64
}

/// One dispatched call, as observed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperationRecord {
    /// Upstream that handled the call.
    pub upstream: String,
    /// Operation name as the agent spelled it.
    pub op_name: String,
    /// Wall-clock duration; zero for cache hits.
    pub duration_ms: u64,
    /// Token estimate of the returned body; zero for failures.
    pub tokens_estimate: u64,
    /// Whether the body came from cache.
    pub cached: bool,
    /// Whether the call succeeded.
    pub success: bool,
    /// When the call settled.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl OperationRecord {
    #[must_use]
    pub fn new(upstream: impl Into<String>, op_name: impl Into<String>) -> Self {
        Self {
            upstream: upstream.into(),
            op_name: op_name.into(),
            duration_ms: 0,
            tokens_estimate: 0,
            cached: false,
            success: false,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    #[must_use]
    pub const fn succeeded(mut self, duration_ms: u64, tokens_estimate: u64, cached: bool) -> Self {
        self.success = true;
        self.duration_ms = duration_ms;
        self.tokens_estimate = tokens_estimate;
        self.cached = cached;
        self
    }

    #[must_use]
    pub const fn failed(mut self, duration_ms: u64) -> Self {
        self.success = false;
        self.duration_ms = duration_ms;
        self.tokens_estimate = 0;
        self
    }
}

/// Aggregated view over all records so far.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    pub instance_id: String,
    pub uptime_secs: u64,
    pub total_calls: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cache_hits: usize,
    pub total_duration_ms: u64,
    pub avg_duration_ms: u64,
    pub tokens_estimate_total: u64,
    pub calls_per_upstream: HashMap<String, usize>,
}

/// Append-only in-memory metrics log.
pub struct MetricsLog {
    enabled: bool,
    instance_id: Uuid,
    started: Instant,
    records: Mutex<Vec<OperationRecord>>,
}

impl MetricsLog {
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            instance_id: Uuid::new_v4(),
            started: Instant::now(),
            records: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Append one record. A disabled log drops it.
    pub async fn record(&self, record: OperationRecord) {
        if !self.enabled {
            return;
        }
        self.records.lock().await.push(record);
    }

    /// Number of records so far.
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    /// Aggregate everything recorded so far.
    pub async fn summary(&self) -> MetricsSummary {
        let records = self.records.lock().await;

        let total_calls = records.len();
        let succeeded = records.iter().filter(|r| r.success).count();
        let cache_hits = records.iter().filter(|r| r.cached).count();
        let total_duration_ms: u64 = records.iter().map(|r| r.duration_ms).sum();
        let tokens_estimate_total: u64 = records.iter().map(|r| r.tokens_estimate).sum();

        let mut calls_per_upstream: HashMap<String, usize> = HashMap::new();
        for record in records.iter() {
            *calls_per_upstream.entry(record.upstream.clone()).or_default() += 1;
        }

        MetricsSummary {
            instance_id: self.instance_id.to_string(),
            uptime_secs: self.started.elapsed().as_secs(),
            total_calls,
            succeeded,
            failed: total_calls - succeeded,
            cache_hits,
            total_duration_ms,
            avg_duration_ms: if total_calls == 0 {
                0
            } else {
                total_duration_ms / total_calls as u64
            },
            tokens_estimate_total,
            calls_per_upstream,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_estimate_tokens_formula() {
        // {"a":1} serializes to 7 bytes -> ceil(7/4) = 2
        assert_eq!(estimate_tokens(&json!({"a": 1})), 2);
        assert_eq!(estimate_tokens_for_len(0), 0);
        assert_eq!(estimate_tokens_for_len(4), 1);
        assert_eq!(estimate_tokens_for_len(5), 2);
    }

    #[tokio::test]
    async fn test_record_and_summarize() {
        let log = MetricsLog::new(true);
        log.record(OperationRecord::new("serena", "findSymbol").succeeded(12, 5, false))
            .await;
        log.record(OperationRecord::new("serena", "findSymbol").succeeded(0, 5, true))
            .await;
        log.record(OperationRecord::new("tavily", "search").failed(30))
            .await;

        let summary = log.summary().await;
        assert_eq!(summary.total_calls, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.cache_hits, 1);
        assert_eq!(summary.total_duration_ms, 42);
        assert_eq!(summary.avg_duration_ms, 14);
        assert_eq!(summary.tokens_estimate_total, 10);
        assert_eq!(summary.calls_per_upstream["serena"], 2);
        assert_eq!(summary.calls_per_upstream["tavily"], 1);
        assert!(!summary.instance_id.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_log_drops_records() {
        let log = MetricsLog::new(false);
        log.record(OperationRecord::new("serena", "findSymbol").succeeded(1, 1, false))
            .await;
        assert!(log.is_empty().await);
        assert_eq!(log.summary().await.total_calls, 0);
    }

    #[test]
    fn test_failed_record_zeroes_tokens() {
        let record = OperationRecord::new("serena", "x")
            .succeeded(5, 9, false)
            .failed(7);
        assert!(!record.success);
        assert_eq!(record.tokens_estimate, 0);
        assert_eq!(record.duration_ms, 7);
    }
}
