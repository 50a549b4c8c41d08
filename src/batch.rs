//! Bounded parallel fan-out for batch operations.
//!
//! The executor gates work behind a semaphore: an operation runs when a
//! permit is free, otherwise it waits FIFO. Batches are all-settled; no
//! short-circuit on failure, no cancellation, and results preserve input
//! order even when completion order differs.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

use crate::types::{BridgeResult, ErrorCode, ResultMeta};

/// One operation inside a batch request, as the agent sends it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchOperation {
    /// Category string, e.g. `code_operations`.
    pub category: String,
    /// Operation name within the category.
    pub operation: String,
    /// Operation parameters; defaults to an empty object.
    #[serde(default = "empty_object")]
    pub params: Value,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Aggregate view of a settled batch.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub tokens_estimate: u64,
}

/// Concurrency gate shared by every batch the gateway runs.
pub struct BatchExecutor {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl BatchExecutor {
    /// `max_concurrent` is clamped to at least 1.
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    #[must_use]
    pub const fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Fan `items` out through the gate, settling them all.
    ///
    /// `f` receives the item's input index and the item; the returned
    /// vector keeps input order.
    pub async fn execute<T, F, Fut>(&self, items: Vec<T>, f: F) -> Vec<BridgeResult>
    where
        F: Fn(usize, T) -> Fut,
        Fut: Future<Output = BridgeResult>,
    {
        let futures = items.into_iter().enumerate().map(|(index, item)| {
            let semaphore = Arc::clone(&self.semaphore);
            let run = &f;
            async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    // The semaphore is never closed; this arm is unreachable
                    // in practice but must not panic.
                    return BridgeResult::fail(
                        ErrorCode::ExecutionError,
                        "concurrency gate closed",
                        ResultMeta::new("gateway", "batch"),
                    );
                };
                run(index, item).await
            }
        });

        join_all(futures).await
    }
}

/// Summarize settled results.
#[must_use]
pub fn summarize(results: &[BridgeResult], started: Instant) -> BatchSummary {
    let succeeded = results.iter().filter(|r| r.success).count();
    BatchSummary {
        total: results.len(),
        succeeded,
        failed: results.len() - succeeded,
        duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        tokens_estimate: results.iter().map(|r| r.metadata.tokens_estimate).sum(),
    }
}
