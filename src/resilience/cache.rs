//! Read-through cache with per-entry TTL and stale-on-error fallback.
//!
//! An expired entry is never dropped on read: it stays available as the fallback for the
//! next failed refresh. Only `prune` removes entries.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

struct CacheEntry<V> {
    value: V,
    set_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn age(&self) -> Duration {
        self.set_at.elapsed()
    }

    fn is_stale(&self) -> bool {
        self.age() > self.ttl
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup<V> {
    pub value: Option<V>,
    pub is_stale: bool,
    pub age: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<V> {
    pub value: V,
    pub from_cache: bool,
    pub is_stale: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// Fetch failed and an expired value was served instead.
    pub stale_served: u64,
}

pub struct Cache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    stale_served: AtomicU64,
}

impl<V: Clone> Cache<V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale_served: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> CacheLookup<V> {
        match self.entries.get(key) {
            Some(entry) => CacheLookup {
                value: Some(entry.value.clone()),
                is_stale: entry.is_stale(),
                age: Some(entry.age()),
            },
            None => CacheLookup {
                value: None,
                is_stale: false,
                age: None,
            },
        }
    }

    pub fn set(&self, key: &str, value: V, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                set_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Fresh hit → returned without calling `fetcher`. Otherwise fetch and store; if the fetch
    /// fails, fall back to whatever is cached (marked stale). The error only surfaces when
    /// nothing was ever cached under `key`.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        fetcher: F,
    ) -> Result<Fetched<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: std::fmt::Display,
    {
        let cached = self.get(key);
        if let (Some(value), false) = (&cached.value, cached.is_stale) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Fetched {
                value: value.clone(),
                from_cache: true,
                is_stale: false,
            });
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        match fetcher().await {
            Ok(value) => {
                self.set(key, value.clone(), ttl);
                Ok(Fetched {
                    value,
                    from_cache: false,
                    is_stale: false,
                })
            }
            Err(e) => match cached.value {
                Some(value) => {
                    self.stale_served.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        key,
                        age_secs = cached.age.map(|a| a.as_secs()).unwrap_or_default(),
                        error = %e,
                        "Refresh failed, serving stale cache entry",
                    );
                    Ok(Fetched {
                        value,
                        from_cache: true,
                        is_stale: true,
                    })
                }
                None => Err(e),
            },
        }
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.entries.remove(key).map(|(_, entry)| entry.value)
    }

    /// Drop entries older than `max_age` regardless of their TTL. Returns how many were removed.
    pub fn prune(&self, max_age: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.age() <= max_age);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, "Pruned expired cache entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
        }
    }
}

impl<V: Clone> Default for Cache<V> {
    fn default() -> Self {
        Self::new()
    }
}
