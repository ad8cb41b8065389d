use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{StoreConfig, STALE_EVICTION_FACTOR};
use crate::types::{Recommendation, Score, ScoredPool, UnifiedPool};

#[derive(Debug, Clone)]
struct PoolEntry {
    pool: UnifiedPool,
    updated_at: Instant,
    /// Monotonic write counter; breaks updated-at ties in eviction order.
    seq: u64,
    ttl: Duration,
}

impl PoolEntry {
    fn age(&self) -> Duration {
        self.updated_at.elapsed()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub pools: usize,
    pub scores: usize,
    pub recommendations: usize,
    pub watchlist: usize,
    pub max_pools: usize,
    pub evicted_total: u64,
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Bounded in-memory view of the latest enriched pools, their scores and the active
/// recommendation set. Watchlisted pools are never evicted.
pub struct MemoryStore {
    /// pool_id → latest unified pool
    pools: DashMap<String, PoolEntry>,
    /// pool_id → latest score
    scores: DashMap<String, Score>,
    /// replaced as a whole, never edited in place
    recommendations: RwLock<Arc<Vec<Recommendation>>>,
    /// pool_ids the user follows
    watchlist: DashSet<String>,
    seq: AtomicU64,
    evicted_total: AtomicU64,
    max_pools: usize,
    pool_ttl: Duration,
}

impl MemoryStore {
    pub fn new(cfg: &StoreConfig) -> Arc<Self> {
        Arc::new(Self {
            pools: DashMap::new(),
            scores: DashMap::new(),
            recommendations: RwLock::new(Arc::new(Vec::new())),
            watchlist: DashSet::new(),
            seq: AtomicU64::new(0),
            evicted_total: AtomicU64::new(0),
            max_pools: cfg.max_pools,
            pool_ttl: cfg.pool_ttl,
        })
    }

    pub fn max_pools(&self) -> usize {
        self.max_pools
    }

    // --- pools ---

    pub fn set_pool(&self, pool: UnifiedPool) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.pools.insert(
            pool.id.clone(),
            PoolEntry {
                pool,
                updated_at: Instant::now(),
                seq,
                ttl: self.pool_ttl,
            },
        );
    }

    pub fn set_pools(&self, pools: Vec<UnifiedPool>) {
        for pool in pools {
            self.set_pool(pool);
        }
    }

    pub fn get_pool(&self, pool_id: &str) -> Option<UnifiedPool> {
        self.pools.get(pool_id).map(|e| e.pool.clone())
    }

    /// Present and written within its TTL.
    pub fn is_pool_fresh(&self, pool_id: &str) -> bool {
        self.pools
            .get(pool_id)
            .is_some_and(|e| e.age() <= e.ttl)
    }

    pub fn get_all_pools(&self) -> Vec<UnifiedPool> {
        self.pools.iter().map(|e| e.pool.clone()).collect()
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    fn remove_pool(&self, pool_id: &str) {
        self.pools.remove(pool_id);
        self.scores.remove(pool_id);
    }

    // --- scores ---

    pub fn set_score(&self, score: Score) {
        self.scores.insert(score.pool_id.clone(), score);
    }

    pub fn get_score(&self, pool_id: &str) -> Option<Score> {
        self.scores.get(pool_id).map(|s| s.clone())
    }

    /// Every stored pool that also has a score.
    pub fn scored_pools(&self) -> Vec<ScoredPool> {
        self.pools
            .iter()
            .filter_map(|entry| {
                let score = self.scores.get(entry.key())?.clone();
                Some(ScoredPool {
                    pool: entry.pool.clone(),
                    score,
                })
            })
            .collect()
    }

    // --- recommendations ---

    /// Replace the active set in one step; readers see either the old or the new list.
    pub fn set_recommendations(&self, recs: Vec<Recommendation>) {
        let next = Arc::new(recs);
        match self.recommendations.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    pub fn get_recommendations(&self) -> Arc<Vec<Recommendation>> {
        match self.recommendations.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    // --- watchlist ---

    /// Returns false when the pool is not added: the watchlist may not outgrow the store cap,
    /// otherwise `enforce_limit` could no longer honor it.
    pub fn add_to_watchlist(&self, pool_id: &str) -> bool {
        let pool_id = pool_id.to_lowercase();
        if self.watchlist.contains(&pool_id) {
            return true;
        }
        if self.watchlist.len() >= self.max_pools {
            warn!(pool_id, cap = self.max_pools, "Watchlist full, not adding pool");
            return false;
        }
        self.watchlist.insert(pool_id);
        true
    }

    pub fn remove_from_watchlist(&self, pool_id: &str) -> bool {
        self.watchlist.remove(&pool_id.to_lowercase()).is_some()
    }

    pub fn is_watchlisted(&self, pool_id: &str) -> bool {
        self.watchlist.contains(&pool_id.to_lowercase())
    }

    pub fn watchlist_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.watchlist.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Watchlisted pools that currently have data; ids with nothing stored are omitted.
    pub fn get_watchlist_pools(&self) -> Vec<UnifiedPool> {
        self.watchlist_ids()
            .iter()
            .filter_map(|id| self.get_pool(id))
            .collect()
    }

    // --- eviction ---

    /// Drop non-watchlisted pools not updated for more than twice their TTL.
    pub fn evict_stale(&self) -> usize {
        let expired: Vec<String> = self
            .pools
            .iter()
            .filter(|e| e.age() > e.ttl * STALE_EVICTION_FACTOR)
            .filter(|e| !self.watchlist.contains(e.key()))
            .map(|e| e.key().clone())
            .collect();

        for id in &expired {
            self.remove_pool(id);
        }
        if !expired.is_empty() {
            self.evicted_total
                .fetch_add(expired.len() as u64, Ordering::Relaxed);
            info!(evicted = expired.len(), "Evicted stale pools");
        }
        expired.len()
    }

    /// Shrink to at most `max` pools, oldest non-watchlisted first.
    pub fn enforce_limit(&self, max: usize) -> usize {
        let excess = self.pools.len().saturating_sub(max);
        if excess == 0 {
            return 0;
        }

        let mut candidates: Vec<(Instant, u64, String)> = self
            .pools
            .iter()
            .filter(|e| !self.watchlist.contains(e.key()))
            .map(|e| (e.updated_at, e.seq, e.key().clone()))
            .collect();
        candidates.sort_unstable();

        let mut removed = 0;
        for (_, _, id) in candidates.into_iter().take(excess) {
            self.remove_pool(&id);
            removed += 1;
        }
        if removed < excess {
            warn!(
                pools = self.pools.len(),
                max,
                "Store over limit, remaining pools are all watchlisted"
            );
        }
        self.evicted_total.fetch_add(removed as u64, Ordering::Relaxed);
        debug!(removed, max, "Enforced pool limit");
        removed
    }

    pub fn get_stats(&self) -> StoreStats {
        StoreStats {
            pools: self.pools.len(),
            scores: self.scores.len(),
            recommendations: self.get_recommendations().len(),
            watchlist: self.watchlist.len(),
            max_pools: self.max_pools,
            evicted_total: self.evicted_total.load(Ordering::Relaxed),
        }
    }

    /// Drop everything, watchlist included.
    pub fn clear(&self) {
        self.pools.clear();
        self.scores.clear();
        self.watchlist.clear();
        self.set_recommendations(Vec::new());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::snapshot;
    use crate::scorer::enrich;
    use crate::types::{RiskMode, ScoreBreakdown};

    fn store(max_pools: usize) -> Arc<MemoryStore> {
        MemoryStore::new(&StoreConfig {
            max_pools,
            pool_ttl: Duration::from_secs(600),
        })
    }

    fn pool(n: usize) -> UnifiedPool {
        let snap = snapshot("base", &format!("0x{n:04x}"), 1_000_000.0, 100_000.0);
        enrich(&snap, None, snap.fetched_at_ms)
    }

    fn score(pool_id: &str) -> Score {
        Score {
            pool_id: pool_id.to_string(),
            total: 50.0,
            health: 30.0,
            returns: 25.0,
            risk: 5.0,
            breakdown: ScoreBreakdown::default(),
            recommended_mode: RiskMode::Normal,
            is_suspect: false,
            suspect_reason: None,
            scored_at_ms: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn enforce_limit_removes_oldest_first() {
        let s = store(500);
        for n in 0..600 {
            s.set_pool(pool(n));
            tokio::time::advance(Duration::from_millis(1)).await;
        }

        assert_eq!(s.enforce_limit(500), 100);
        assert_eq!(s.pool_count(), 500);
        for n in 0..100 {
            assert!(s.get_pool(&pool(n).id).is_none(), "pool {n} should be evicted");
        }
        for n in 100..600 {
            assert!(s.get_pool(&pool(n).id).is_some(), "pool {n} should remain");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn insertion_order_breaks_timestamp_ties() {
        let s = store(10);
        for n in 0..5 {
            s.set_pool(pool(n));
        }
        assert_eq!(s.enforce_limit(3), 2);
        assert!(s.get_pool(&pool(0).id).is_none());
        assert!(s.get_pool(&pool(1).id).is_none());
        assert!(s.get_pool(&pool(2).id).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn watchlisted_pools_survive_limit_and_staleness() {
        let s = store(500);
        let keep = pool(0);
        s.set_pool(keep.clone());
        s.set_score(score(&keep.id));
        assert!(s.add_to_watchlist(&keep.id));

        tokio::time::advance(Duration::from_secs(3_600)).await;
        for n in 1..=600 {
            s.set_pool(pool(n));
        }

        s.enforce_limit(500);
        assert!(s.get_pool(&keep.id).is_some());
        assert!(s.get_score(&keep.id).is_some());
        assert_eq!(s.pool_count(), 500);

        tokio::time::advance(Duration::from_secs(1_300)).await;
        assert_eq!(s.evict_stale(), 499);
        assert_eq!(s.get_watchlist_pools().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn evict_stale_waits_for_twice_the_ttl_and_drops_scores() {
        let s = store(10);
        let p = pool(1);
        s.set_pool(p.clone());
        s.set_score(score(&p.id));

        tokio::time::advance(Duration::from_secs(601)).await;
        assert!(!s.is_pool_fresh(&p.id));
        assert_eq!(s.evict_stale(), 0, "stale but within 2x ttl");

        tokio::time::advance(Duration::from_secs(600)).await;
        assert_eq!(s.evict_stale(), 1);
        assert!(s.get_pool(&p.id).is_none());
        assert!(s.get_score(&p.id).is_none());
        assert_eq!(s.get_stats().evicted_total, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn watchlist_is_capped_at_store_size() {
        let s = store(2);
        assert!(s.add_to_watchlist("base:0xa"));
        assert!(s.add_to_watchlist("BASE:0xB"));
        assert!(s.add_to_watchlist("base:0xa"), "re-adding is a no-op");
        assert!(!s.add_to_watchlist("base:0xc"));
        assert_eq!(s.watchlist_ids(), vec!["base:0xa".to_string(), "base:0xb".to_string()]);
        assert!(s.is_watchlisted("base:0xB"));
        assert!(s.remove_from_watchlist("base:0xa"));
        assert!(s.add_to_watchlist("base:0xc"));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_store_reads_are_empty() {
        let s = store(10);
        assert!(s.get_all_pools().is_empty());
        assert!(s.scored_pools().is_empty());
        assert!(s.get_recommendations().is_empty());
        assert!(s.get_watchlist_pools().is_empty());
        assert_eq!(s.enforce_limit(0), 0);
        assert_eq!(s.evict_stale(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn scored_pools_joins_pools_with_scores() {
        let s = store(10);
        let (a, b) = (pool(1), pool(2));
        s.set_pools(vec![a.clone(), b.clone()]);
        s.set_score(score(&a.id));

        let scored = s.scored_pools();
        assert_eq!(scored.len(), 1);
        assert_eq!(scored[0].pool.id, a.id);

        s.clear();
        assert_eq!(s.get_stats().pools, 0);
        assert_eq!(s.get_stats().watchlist, 0);
    }
}
