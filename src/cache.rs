//! Response cache: keyed, TTL-bounded, size-bounded.
//!
//! Keys are `upstream:tool:canonical(args)` where `canonical` emits JSON
//! with object keys sorted at every depth, so semantically equal parameter
//! objects share an entry regardless of key order. Eviction picks the entry
//! minimizing `inserted_ms / (hit_count + 1)`, a cheap aging-LFU proxy: old
//! entries have small numerators, repeatedly-hit entries are pushed up by
//! the denominator. A background sweep clears expired entries; `get` checks
//! expiry as well because sweeps can lag.

use log::debug;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Cache tuning, from the environment.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl: Duration,
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(300),
            max_size: 1000,
        }
    }
}

struct CacheEntry {
    body: Value,
    /// Milliseconds since the cache was created, at insertion.
    inserted_ms: u64,
    hit_count: u64,
}

/// Serialize a JSON value with object keys sorted lexicographically at
/// every depth.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Key serialization cannot fail for a plain string.
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Build the cache key for one upstream call.
#[must_use]
pub fn cache_key(upstream: &str, tool: &str, args: &Value) -> String {
    format!("{upstream}:{tool}:{}", canonical_json(args))
}

/// TTL- and size-bounded result store shared across dispatches.
pub struct ResponseCache {
    config: CacheConfig,
    created: Instant,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ResponseCache {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            created: Instant::now(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.created.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn ttl_ms(&self) -> u64 {
        u64::try_from(self.config.ttl.as_millis()).unwrap_or(u64::MAX)
    }

    /// Look up a key. Expired entries are removed on the way out.
    pub async fn get(&self, key: &str) -> Option<Value> {
        if !self.config.enabled {
            return None;
        }

        let now = self.now_ms();
        let ttl = self.ttl_ms();
        let mut entries = self.entries.lock().await;

        let expired = match entries.get(key) {
            None => return None,
            Some(entry) => now.saturating_sub(entry.inserted_ms) > ttl,
        };
        if expired {
            entries.remove(key);
            return None;
        }

        entries.get_mut(key).map(|entry| {
            entry.hit_count += 1;
            entry.body.clone()
        })
    }

    /// Store a body under a key, evicting one entry if at capacity.
    pub async fn set(&self, key: String, body: Value) {
        if !self.config.enabled || self.config.max_size == 0 {
            return;
        }

        let now = self.now_ms();
        let mut entries = self.entries.lock().await;
        if entries.len() >= self.config.max_size && !entries.contains_key(&key) {
            evict_one(&mut entries);
        }
        entries.insert(
            key,
            CacheEntry {
                body,
                inserted_ms: now,
                hit_count: 0,
            },
        );
    }

    /// Remove entries whose key's first two segments match the given
    /// prefixes. With no pattern, clears everything. Returns the removed
    /// count.
    pub async fn invalidate(&self, upstream: Option<&str>, tool: Option<&str>) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();

        if upstream.is_none() && tool.is_none() {
            entries.clear();
            return before;
        }

        entries.retain(|key, _| {
            let mut segments = key.splitn(3, ':');
            let key_upstream = segments.next().unwrap_or("");
            let key_tool = segments.next().unwrap_or("");
            let upstream_match = upstream.is_none_or(|u| u == key_upstream);
            let tool_match = tool.is_none_or(|t| t == key_tool);
            !(upstream_match && tool_match)
        });

        before - entries.len()
    }

    /// Current entry count.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Drop expired entries. Returns the removed count.
    pub async fn sweep(&self) -> usize {
        let now = self.now_ms();
        let ttl = self.ttl_ms();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| now.saturating_sub(entry.inserted_ms) <= ttl);
        before - entries.len()
    }

    /// Spawn the periodic sweeper. Best-effort; runs until the cache is
    /// dropped by everyone else.
    pub fn start_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let period = self.sweep_period();
        let cache = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(cache) = cache.upgrade() else { break };
                let removed = cache.sweep().await;
                if removed > 0 {
                    debug!("cache sweep removed {removed} expired entries");
                }
            }
        })
    }

    fn sweep_period(&self) -> Duration {
        std::cmp::max(self.config.ttl / 2, Duration::from_secs(60))
    }
}

/// Evict the entry minimizing `inserted_ms / (hit_count + 1)`. Ties go to
/// whichever the map yields first.
fn evict_one(entries: &mut HashMap<String, CacheEntry>) {
    #[allow(clippy::cast_precision_loss)]
    let victim = entries
        .iter()
        .min_by(|(_, a), (_, b)| {
            let score_a = a.inserted_ms as f64 / (a.hit_count + 1) as f64;
            let score_b = b.inserted_ms as f64 / (b.hit_count + 1) as f64;
            score_a.total_cmp(&score_b)
        })
        .map(|(key, _)| key.clone());

    if let Some(key) = victim {
        debug!("cache evicting {key}");
        entries.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_config(ttl: Duration, max_size: usize) -> CacheConfig {
        CacheConfig {
            enabled: true,
            ttl,
            max_size,
        }
    }

    #[test]
    fn test_canonical_json_sorts_keys_recursively() {
        let a = json!({"b": 2, "a": {"z": 1, "y": [{"q": 1, "p": 2}]}});
        let b = json!({"a": {"y": [{"p": 2, "q": 1}], "z": 1}, "b": 2});
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(
            canonical_json(&json!({"b": 1, "a": 2})),
            r#"{"a":2,"b":1}"#
        );
    }

    #[test]
    fn test_cache_key_shape() {
        let key = cache_key("serena", "find_symbol", &json!({"name_path": "User"}));
        assert_eq!(key, r#"serena:find_symbol:{"name_path":"User"}"#);
    }

    #[tokio::test]
    async fn test_get_set_round_trip() {
        let cache = ResponseCache::new(test_config(Duration::from_secs(60), 10));
        let key = cache_key("serena", "find_symbol", &json!({"a": 1}));

        assert!(cache.get(&key).await.is_none());
        cache.set(key.clone(), json!({"content": "x"})).await;
        assert_eq!(cache.get(&key).await, Some(json!({"content": "x"})));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_disabled_cache_never_stores() {
        let cache = ResponseCache::new(CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        });
        cache.set("k".to_string(), json!(1)).await;
        assert!(cache.get("k").await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = ResponseCache::new(test_config(Duration::from_millis(100), 10));
        cache.set("k".to_string(), json!(1)).await;
        assert!(cache.get("k").await.is_some());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(cache.get("k").await.is_none());
        // The expired entry was removed by the get.
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_eviction_bounds_size() {
        let cache = ResponseCache::new(test_config(Duration::from_secs(60), 3));
        for i in 0..4 {
            cache.set(format!("k{i}"), json!(i)).await;
        }
        assert_eq!(cache.len().await, 3);
    }

    #[tokio::test]
    async fn test_eviction_drops_oldest_among_equally_hit() {
        let cache = ResponseCache::new(test_config(Duration::from_secs(60), 2));
        cache.set("oldest".to_string(), json!(1)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.set("middle".to_string(), json!(2)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.set("new".to_string(), json!(3)).await;

        assert_eq!(cache.len().await, 2);
        assert!(cache.get("oldest").await.is_none());
        assert!(cache.get("middle").await.is_some());
        assert!(cache.get("new").await.is_some());
    }

    #[tokio::test]
    async fn test_invalidate_by_prefix() {
        let cache = ResponseCache::new(test_config(Duration::from_secs(60), 10));
        cache
            .set(cache_key("serena", "find_symbol", &json!({"a": 1})), json!(1))
            .await;
        cache
            .set(cache_key("serena", "read_file", &json!({"a": 1})), json!(2))
            .await;
        cache
            .set(cache_key("tavily", "tavily-search", &json!({"q": "x"})), json!(3))
            .await;

        let removed = cache.invalidate(Some("serena"), Some("find_symbol")).await;
        assert_eq!(removed, 1);
        assert_eq!(cache.len().await, 2);

        let removed = cache.invalidate(Some("serena"), None).await;
        assert_eq!(removed, 1);

        let removed = cache.invalidate(None, None).await;
        assert_eq!(removed, 1);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_only() {
        let cache = ResponseCache::new(test_config(Duration::from_millis(80), 10));
        cache.set("stale".to_string(), json!(1)).await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        cache.set("fresh".to_string(), json!(2)).await;

        let removed = cache.sweep().await;
        assert_eq!(removed, 1);
        assert!(cache.get("fresh").await.is_some());
    }

    #[test]
    fn test_sweep_period_floor() {
        let cache = ResponseCache::new(test_config(Duration::from_secs(30), 10));
        assert_eq!(cache.sweep_period(), Duration::from_secs(60));

        let cache = ResponseCache::new(test_config(Duration::from_secs(600), 10));
        assert_eq!(cache.sweep_period(), Duration::from_secs(300));
    }
}
