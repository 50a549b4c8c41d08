//! End-to-end routing: validate → cache → retry-call → compact → record.
//!
//! The dispatcher owns shared, read-only views of the registry and shared,
//! concurrent access to the cache and metrics. Upstream clients are keyed
//! by name; an upstream that is disabled or failed to start is simply
//! absent from the map and surfaces as `SERVER_UNAVAILABLE`.

use log::debug;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::batch::{BatchExecutor, BatchOperation, BatchSummary, summarize};
use crate::cache::{ResponseCache, cache_key};
use crate::client::UpstreamClient;
use crate::compact::{compact_content, enforce_size_limit};
use crate::metrics::{MetricsLog, OperationRecord, estimate_tokens};
use crate::registry::{Category, OperationRegistry, UpstreamName};
use crate::retry::{RetryConfig, run_with_retry};
use crate::types::{BridgeResult, ErrorCode, ResultMeta};

/// Routes every meta-operation to its upstream.
pub struct Dispatcher {
    registry: OperationRegistry,
    clients: HashMap<UpstreamName, Arc<UpstreamClient>>,
    cache: Arc<ResponseCache>,
    retry: RetryConfig,
    batch: BatchExecutor,
    metrics: Arc<MetricsLog>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        clients: HashMap<UpstreamName, Arc<UpstreamClient>>,
        cache: Arc<ResponseCache>,
        retry: RetryConfig,
        batch: BatchExecutor,
        metrics: Arc<MetricsLog>,
    ) -> Self {
        Self {
            registry: OperationRegistry::new(),
            clients,
            cache,
            retry,
            batch,
            metrics,
        }
    }

    #[must_use]
    pub const fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    #[must_use]
    pub const fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    #[must_use]
    pub const fn metrics(&self) -> &Arc<MetricsLog> {
        &self.metrics
    }

    /// Upstreams that actually started.
    #[must_use]
    pub fn connected_upstreams(&self) -> Vec<UpstreamName> {
        self.clients.keys().copied().collect()
    }

    /// Dispatch one operation within a routed category.
    pub async fn dispatch(&self, category: Category, op_name: &str, params: Value) -> BridgeResult {
        if category == Category::Batch {
            return BridgeResult::fail(
                ErrorCode::ValidationError,
                "batch operations cannot be nested",
                ResultMeta::new("gateway", op_name),
            );
        }

        let Some(mapping) = self.registry.resolve(category, op_name) else {
            return BridgeResult::fail(
                ErrorCode::InvalidOperation,
                format!(
                    "unknown operation '{op_name}' in {category}; valid operations: {}",
                    self.registry.list_operations(category).join(", ")
                ),
                ResultMeta::new(category.as_str(), op_name),
            );
        };

        let upstream = mapping.upstream;
        let meta = ResultMeta::new(upstream.as_str(), op_name);

        let Some(client) = self.clients.get(&upstream) else {
            self.metrics
                .record(OperationRecord::new(upstream.as_str(), op_name).failed(0))
                .await;
            return BridgeResult::fail(
                ErrorCode::ServerUnavailable,
                format!("upstream {upstream} is disabled or unavailable"),
                meta,
            );
        };

        let key = mapping
            .cacheable
            .then(|| cache_key(upstream.as_str(), mapping.tool, &params));

        if let Some(key) = &key {
            if let Some(body) = self.cache.get(key).await {
                debug!("cache hit for {upstream}/{op_name}");
                let tokens = estimate_tokens(&body);
                self.metrics
                    .record(
                        OperationRecord::new(upstream.as_str(), op_name).succeeded(0, tokens, true),
                    )
                    .await;
                return BridgeResult::ok(body, meta.cached().with_tokens(tokens));
            }
        }

        let label = format!("{upstream}/{op_name}");
        let outcome = run_with_retry(&self.retry, &label, || {
            client.call_tool(mapping.tool, params.clone())
        })
        .await;
        let duration_ms = millis(outcome.total_duration);

        match outcome.result {
            Ok(result) => {
                let content = compact_content(result.content);
                let data = enforce_size_limit(json!({ "content": content }));
                let tokens = estimate_tokens(&data);

                if let Some(key) = key {
                    self.cache.set(key, data.clone()).await;
                }
                self.metrics
                    .record(
                        OperationRecord::new(upstream.as_str(), op_name)
                            .succeeded(duration_ms, tokens, false),
                    )
                    .await;

                BridgeResult::ok(data, meta.with_duration(duration_ms).with_tokens(tokens))
            }
            Err(error) => {
                self.metrics
                    .record(OperationRecord::new(upstream.as_str(), op_name).failed(duration_ms))
                    .await;

                let code = if error.is_timeout() {
                    ErrorCode::TimeoutError
                } else {
                    ErrorCode::ExecutionError
                };
                let meta = meta.with_duration(duration_ms);
                match error.details {
                    Some(details) => BridgeResult::fail_with_details(
                        code,
                        error.message,
                        details,
                        meta,
                    ),
                    None => BridgeResult::fail(code, error.message, meta),
                }
            }
        }
    }

    /// Dispatch a batch: fan the operations out through the concurrency
    /// gate and settle them all, preserving input order.
    pub async fn dispatch_batch(
        &self,
        ops: Vec<BatchOperation>,
    ) -> (Vec<BridgeResult>, BatchSummary) {
        let started = Instant::now();

        let results = self
            .batch
            .execute(ops, |_, op| {
                let BatchOperation {
                    category,
                    operation,
                    params,
                } = op;
                async move {
                    match Category::parse(&category) {
                        None => BridgeResult::fail(
                            ErrorCode::ValidationError,
                            format!("unknown category '{category}'"),
                            ResultMeta::new("gateway", operation),
                        ),
                        Some(Category::Batch) => BridgeResult::fail(
                            ErrorCode::ValidationError,
                            "batch operations cannot be nested",
                            ResultMeta::new("gateway", operation),
                        ),
                        Some(routed) => self.dispatch(routed, &operation, params).await,
                    }
                }
            })
            .await;

        let summary = summarize(&results, started);
        (results, summary)
    }

    /// Disconnect every upstream, failing their pending requests
    /// terminally.
    pub async fn shutdown(&self) {
        for client in self.clients.values() {
            client.disconnect().await;
        }
    }
}

fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
