//! Gateway configuration from the process environment.
//!
//! Everything is optional and defaulted; malformed values fall back to the
//! default with a warning rather than aborting startup. Upstream launch
//! commands are stored pre-split into argv; `<UPSTREAM>_COMMAND` overrides
//! are split on whitespace, so arguments containing spaces cannot be
//! expressed through the override (a known limitation of the command-string
//! format).

use log::warn;
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::client::UpstreamDescriptor;
use crate::registry::UpstreamName;
use crate::retry::RetryConfig;

/// Everything the gateway needs to start.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Upstreams to launch, in order. Disabled upstreams are absent.
    pub upstreams: Vec<UpstreamDescriptor>,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    /// Batch executor concurrency cap.
    pub max_concurrent_operations: usize,
    pub metrics_enabled: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            upstreams: Vec::new(),
            cache: CacheConfig::default(),
            retry: RetryConfig::default(),
            max_concurrent_operations: 10,
            metrics_enabled: true,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(&|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Self {
        let cache = CacheConfig {
            enabled: get_bool(lookup, "CACHE_ENABLED", true),
            ttl: Duration::from_secs(get_u64(lookup, "CACHE_TTL_SECONDS", 300)),
            max_size: get_usize(lookup, "CACHE_MAX_SIZE", 1000),
        };

        let retry = RetryConfig {
            max_attempts: get_u32(lookup, "RETRY_MAX_ATTEMPTS", 3),
            initial_delay: Duration::from_millis(get_u64(lookup, "RETRY_INITIAL_DELAY_MS", 1000)),
            max_delay: Duration::from_millis(get_u64(lookup, "RETRY_MAX_DELAY_MS", 10_000)),
        };

        let upstreams = UpstreamName::all()
            .into_iter()
            .filter_map(|name| descriptor_from_lookup(name, lookup))
            .collect();

        Self {
            upstreams,
            cache,
            retry,
            max_concurrent_operations: get_usize(lookup, "MAX_CONCURRENT_OPERATIONS", 10),
            metrics_enabled: get_bool(lookup, "METRICS_ENABLED", true),
        }
    }
}

/// Build the descriptor for one upstream, honoring enable/command
/// overrides. Returns `None` when the upstream is disabled.
fn descriptor_from_lookup(
    name: UpstreamName,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Option<UpstreamDescriptor> {
    let prefix = name.as_str().to_uppercase();

    if !get_bool(lookup, &format!("{prefix}_ENABLED"), true) {
        return None;
    }

    // Tavily cannot run without its API key.
    let tavily_key = if name == UpstreamName::Tavily {
        match lookup("TAVILY_API_KEY") {
            Some(key) if !key.is_empty() => Some(key),
            _ => {
                warn!("TAVILY_API_KEY not set, disabling tavily upstream");
                return None;
            }
        }
    } else {
        None
    };

    let argv = match lookup(&format!("{prefix}_COMMAND")) {
        Some(command) if !command.trim().is_empty() => {
            command.split_whitespace().map(str::to_string).collect()
        }
        _ => default_argv(name),
    };

    let mut descriptor = UpstreamDescriptor::new(name, argv);
    if let Some(key) = tavily_key {
        descriptor = descriptor.with_env("TAVILY_API_KEY", key);
    }
    if let Some(warmup) = default_warmup(name) {
        descriptor = descriptor.with_warmup(warmup);
    }
    Some(descriptor)
}

/// Built-in launch command for each upstream.
fn default_argv(name: UpstreamName) -> Vec<String> {
    let command = match name {
        UpstreamName::Serena => {
            "uvx --from git+https://github.com/oraios/serena serena-mcp-server"
        }
        UpstreamName::Context7 => "npx -y @upstash/context7-mcp",
        UpstreamName::Playwright => "npx -y @playwright/mcp",
        UpstreamName::Tavily => "npx -y tavily-mcp",
        UpstreamName::Shadcn => "npx -y @jpisnice/shadcn-ui-mcp-server",
    };
    command.split_whitespace().map(str::to_string).collect()
}

/// Settle time for upstreams that answer `initialize` before they can
/// actually serve tool calls.
fn default_warmup(name: UpstreamName) -> Option<Duration> {
    match name {
        UpstreamName::Serena => Some(Duration::from_millis(1500)),
        UpstreamName::Playwright => Some(Duration::from_millis(500)),
        _ => None,
    }
}

fn get_bool(lookup: &dyn Fn(&str) -> Option<String>, name: &str, default: bool) -> bool {
    match lookup(name) {
        None => default,
        Some(value) => match value.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            other => {
                warn!("{name}={other} is not a boolean, using default {default}");
                default
            }
        },
    }
}

fn get_u64(lookup: &dyn Fn(&str) -> Option<String>, name: &str, default: u64) -> u64 {
    match lookup(name) {
        None => default,
        Some(value) => value.parse().unwrap_or_else(|_| {
            warn!("{name}={value} is not an integer, using default {default}");
            default
        }),
    }
}

fn get_u32(lookup: &dyn Fn(&str) -> Option<String>, name: &str, default: u32) -> u32 {
    match lookup(name) {
        None => default,
        Some(value) => value.parse().unwrap_or_else(|_| {
            warn!("{name}={value} is not an integer, using default {default}");
            default
        }),
    }
}

fn get_usize(lookup: &dyn Fn(&str) -> Option<String>, name: &str, default: usize) -> usize {
    match lookup(name) {
        None => default,
        Some(value) => value.parse().unwrap_or_else(|_| {
            warn!("{name}={value} is not an integer, using default {default}");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_bool_parsing() {
        let lookup = lookup_from(&[("A", "false"), ("B", "ON"), ("C", "maybe")]);
        assert!(!get_bool(&lookup, "A", true));
        assert!(get_bool(&lookup, "B", false));
        assert!(get_bool(&lookup, "C", true));
        assert!(get_bool(&lookup, "MISSING", true));
    }

    #[test]
    fn test_numbers_fall_back_on_garbage() {
        let lookup = lookup_from(&[("A", "250"), ("B", "many")]);
        assert_eq!(get_u64(&lookup, "A", 1), 250);
        assert_eq!(get_u64(&lookup, "B", 7), 7);
        assert_eq!(get_usize(&lookup, "MISSING", 42), 42);
    }

    #[test]
    fn test_defaults_with_empty_environment() {
        let lookup = lookup_from(&[]);
        let config = GatewayConfig::from_lookup(&lookup);

        assert_eq!(config.max_concurrent_operations, 10);
        assert!(config.metrics_enabled);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.cache.max_size, 1000);
        assert_eq!(config.cache.ttl, Duration::from_secs(300));
        // Tavily is absent without its key; the other four launch.
        assert_eq!(config.upstreams.len(), 4);
        assert!(
            !config
                .upstreams
                .iter()
                .any(|d| d.name == UpstreamName::Tavily)
        );
    }

    #[test]
    fn test_tavily_enabled_with_key() {
        let lookup = lookup_from(&[("TAVILY_API_KEY", "tvly-test")]);
        let config = GatewayConfig::from_lookup(&lookup);

        let tavily = config
            .upstreams
            .iter()
            .find(|d| d.name == UpstreamName::Tavily)
            .expect("tavily enabled");
        assert!(
            tavily
                .env
                .iter()
                .any(|(k, v)| k == "TAVILY_API_KEY" && v == "tvly-test")
        );
    }

    #[test]
    fn test_upstream_disable_flag() {
        let lookup = lookup_from(&[("SERENA_ENABLED", "false")]);
        let config = GatewayConfig::from_lookup(&lookup);
        assert!(
            !config
                .upstreams
                .iter()
                .any(|d| d.name == UpstreamName::Serena)
        );
    }

    #[test]
    fn test_command_override_is_split() {
        let lookup = lookup_from(&[("SHADCN_COMMAND", "node dist/server.js --stdio")]);
        let descriptor =
            descriptor_from_lookup(UpstreamName::Shadcn, &lookup).expect("enabled");
        assert_eq!(descriptor.argv, vec!["node", "dist/server.js", "--stdio"]);
    }

    #[test]
    fn test_default_argv_is_split() {
        let argv = default_argv(UpstreamName::Context7);
        assert_eq!(argv[0], "npx");
        assert!(argv.len() >= 3);
    }

    #[test]
    fn test_custom_numeric_settings() {
        let lookup = lookup_from(&[
            ("CACHE_TTL_SECONDS", "60"),
            ("CACHE_MAX_SIZE", "50"),
            ("RETRY_MAX_ATTEMPTS", "5"),
            ("MAX_CONCURRENT_OPERATIONS", "2"),
            ("CACHE_ENABLED", "false"),
        ]);
        let config = GatewayConfig::from_lookup(&lookup);

        assert_eq!(config.cache.ttl, Duration::from_secs(60));
        assert_eq!(config.cache.max_size, 50);
        assert!(!config.cache.enabled);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.max_concurrent_operations, 2);
    }
}
