// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Result Caching Layer
//!
//! Bounded LRU cache with a per-entry TTL, used to skip re-running a hook
//! for an identical `(hook, context)` pair.
//!
//! ## Eviction
//!
//! - Each entry expires after the TTL it was stored with. Expired entries
//!   are never returned and do not count toward `len`.
//! - Once `max_size` live entries exist, the least recently used entry is
//!   evicted. Every successful `get` refreshes recency.

use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use moka::Expiry;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Configuration for the result cache
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached entries
    pub max_size: usize,
    /// TTL used when `put` is called without one
    pub default_ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1_000,
            default_ttl_ms: 300_000, // 5 minutes
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    /// `size / max_size`
    pub utilization: f64,
    pub hits: u64,
    pub misses: u64,
    /// Cache hit rate (0.0 - 1.0)
    pub hit_rate: f64,
}

#[derive(Clone)]
struct TimedValue<V> {
    value: V,
    inserted_at: Instant,
    ttl: Duration,
}

impl<V> TimedValue<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) >= self.ttl
    }
}

/// Expires every entry after the TTL it was stored with. Overwrites restart
/// the clock.
struct PerEntryTtl;

impl<V> Expiry<String, TimedValue<V>> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &TimedValue<V>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &TimedValue<V>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Bounded LRU + TTL cache keyed by strings.
pub struct ResultCache<V> {
    entries: Cache<String, TimedValue<V>>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone + Send + Sync + 'static> ResultCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        let entries = Cache::builder()
            .max_capacity(config.max_size as u64)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(PerEntryTtl)
            .build();

        Self {
            entries,
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Store `value` under `key` with `ttl`, or the configured default TTL.
    pub fn put(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        if self.config.max_size == 0 {
            return;
        }
        self.entries.insert(
            key.into(),
            TimedValue {
                value,
                inserted_at: Instant::now(),
                ttl: ttl.unwrap_or_else(|| self.config.default_ttl()),
            },
        );
        // Apply the LRU eviction now so the size bound holds on return.
        self.entries.run_pending_tasks();
    }

    /// Get a live entry, refreshing its recency. Expired entries are removed.
    pub fn get(&self, key: &str) -> Option<V> {
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired(Instant::now()) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value)
            }
            Some(_) => {
                self.entries.invalidate(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Remove every entry whose key contains `pattern` (a prefix is a special
    /// case), or all entries when `pattern` is `None`. Returns the number of
    /// live entries removed.
    pub fn invalidate(&self, pattern: Option<&str>) -> usize {
        let now = Instant::now();
        let matching: Vec<(Arc<String>, bool)> = self
            .entries
            .iter()
            .filter(|(key, _)| match pattern {
                Some(pattern) => key.contains(pattern),
                None => true,
            })
            .map(|(key, entry)| (key, !entry.is_expired(now)))
            .collect();

        for (key, _) in &matching {
            self.entries.invalidate(key.as_str());
        }
        self.entries.run_pending_tasks();
        matching.iter().filter(|(_, live)| *live).count()
    }

    /// Get cache statistics
    pub fn get_stats(&self) -> CacheStats {
        let size = self.len();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            size,
            max_size: self.config.max_size,
            utilization: if self.config.max_size > 0 {
                size as f64 / self.config.max_size as f64
            } else {
                0.0
            },
            hits,
            misses,
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cache(max_size: usize) -> ResultCache<u32> {
        ResultCache::new(CacheConfig {
            max_size,
            default_ttl_ms: 60_000,
        })
    }

    #[test]
    fn test_put_then_get() {
        let cache = cache(10);
        cache.put("hook.sh#abc", 1, None);
        assert_eq!(cache.get("hook.sh#abc"), Some(1));
        assert_eq!(cache.get("missing"), None);

        let stats = cache.get_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.5);
    }

    #[test]
    fn test_expired_entry_is_not_returned_and_is_removed() {
        let cache = cache(10);
        cache.put("short", 1, Some(Duration::from_millis(10)));
        cache.put("long", 2, None);
        std::thread::sleep(Duration::from_millis(25));

        assert_eq!(cache.get("short"), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("long"), Some(2));
    }

    #[test]
    fn test_lru_eviction_respects_access_order() {
        let cache = cache(3);
        cache.put("a", 1, None);
        cache.put("b", 2, None);
        cache.put("c", 3, None);

        // Touch "a" so "b" becomes the least recently used.
        assert_eq!(cache.get("a"), Some(1));
        cache.put("d", 4, None);

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.get("d"), Some(4));
    }

    #[test]
    fn test_expired_entry_does_not_displace_live_ones() {
        let cache = cache(2);
        cache.put("stale", 1, Some(Duration::from_millis(5)));
        cache.put("live", 2, None);
        std::thread::sleep(Duration::from_millis(15));

        cache.put("new", 3, None);
        assert_eq!(cache.get("live"), Some(2));
        assert_eq!(cache.get("new"), Some(3));
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let cache = cache(2);
        cache.put("a", 1, None);
        cache.put("b", 2, None);
        cache.put("a", 10, None);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(10));
        assert_eq!(cache.get("b"), Some(2));
    }

    #[test]
    fn test_invalidate_pattern_keeps_other_keys() {
        let cache = cache(10);
        cache.put("git/pre_tool_commit.sh#1", 1, None);
        cache.put("git/post_tool_push.sh#2", 2, None);
        cache.put("security/pre_tool_guard.sh#3", 3, None);

        assert_eq!(cache.invalidate(Some("git/")), 2);
        assert_eq!(cache.get("security/pre_tool_guard.sh#3"), Some(3));
        assert_eq!(cache.get("git/pre_tool_commit.sh#1"), None);

        assert_eq!(cache.invalidate(None), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_stats_utilization() {
        let cache = cache(4);
        cache.put("a", 1, None);
        let stats = cache.get_stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.max_size, 4);
        assert!((stats.utilization - 0.25).abs() < f64::EPSILON);
    }

    proptest! {
        #[test]
        fn prop_size_never_exceeds_max(
            max_size in 1usize..8,
            ops in proptest::collection::vec((0u8..16, any::<bool>()), 0..200),
        ) {
            let cache = cache(max_size);
            for (key, is_put) in ops {
                let key = format!("k{key}");
                if is_put {
                    cache.put(key, 0, None);
                } else {
                    cache.get(&key);
                }
                prop_assert!(cache.len() <= max_size);
            }
        }
    }
}
