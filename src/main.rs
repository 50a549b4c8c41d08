//! Gateway binary: load configuration, launch upstreams, serve stdio.

use anyhow::Result;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;

use mcp_bridge::batch::BatchExecutor;
use mcp_bridge::cache::ResponseCache;
use mcp_bridge::client::UpstreamClient;
use mcp_bridge::config::GatewayConfig;
use mcp_bridge::dispatcher::Dispatcher;
use mcp_bridge::metrics::MetricsLog;
use mcp_bridge::registry::UpstreamName;
use mcp_bridge::server;
use mcp_bridge::surface::MetaToolSurface;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let config = GatewayConfig::from_env();
    info!(
        "starting mcp-bridge {} ({} upstream(s) configured)",
        env!("CARGO_PKG_VERSION"),
        config.upstreams.len()
    );

    let clients = launch_upstreams(&config).await;
    if clients.is_empty() {
        warn!("no upstream started; every routed call will be SERVER_UNAVAILABLE");
    }

    let cache = Arc::new(ResponseCache::new(config.cache.clone()));
    let sweeper = cache.start_sweeper();
    let metrics = Arc::new(MetricsLog::new(config.metrics_enabled));

    let dispatcher = Arc::new(Dispatcher::new(
        clients,
        Arc::clone(&cache),
        config.retry.clone(),
        BatchExecutor::new(config.max_concurrent_operations),
        Arc::clone(&metrics),
    ));
    let surface = Arc::new(MetaToolSurface::new(Arc::clone(&dispatcher)));

    let serve_result = server::serve(surface).await;

    sweeper.abort();
    dispatcher.shutdown().await;

    if metrics.is_enabled() {
        let summary = metrics.summary().await;
        info!(
            "session summary: {} call(s), {} cache hit(s), ~{} tokens returned",
            summary.total_calls, summary.cache_hits, summary.tokens_estimate_total
        );
    }

    serve_result
}

/// Spawn and handshake every configured upstream concurrently. Failures
/// are logged and skipped; the gateway runs with whatever started.
async fn launch_upstreams(config: &GatewayConfig) -> HashMap<UpstreamName, Arc<UpstreamClient>> {
    let launches = config.upstreams.iter().map(|descriptor| async move {
        match UpstreamClient::connect(descriptor).await {
            Ok(client) => {
                // Startup sanity check; a failure here is not fatal.
                match client.list_tools().await {
                    Ok(tools) => {
                        info!("upstream {} advertises {} tool(s)", descriptor.name, tools.len());
                    }
                    Err(e) => warn!("upstream {} tools/list failed: {e}", descriptor.name),
                }
                Some((descriptor.name, Arc::new(client)))
            }
            Err(e) => {
                warn!("upstream {} failed to start: {e:#}", descriptor.name);
                None
            }
        }
    });

    let clients: HashMap<UpstreamName, Arc<UpstreamClient>> =
        futures::future::join_all(launches)
            .await
            .into_iter()
            .flatten()
            .collect();

    for name in clients.keys() {
        info!("upstream {name} ready");
    }
    clients
}

/// `env_logger` honoring `LOG_LEVEL`; stderr only, stdout belongs to the
/// JSON-RPC stream.
fn init_logging() {
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    env_logger::Builder::new()
        .parse_filters(&level)
        .target(env_logger::Target::Stderr)
        .init();
}
