use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{Config, RadarConfig, RecommendConfig, ScoringConfig, CACHE_PRUNE_FACTOR};
use crate::providers::FallbackOrchestrator;
use crate::recommender::generate_top_n;
use crate::scorer::{annualized_volatility, apply_reference_price, enrich, score_pool};
use crate::state::MemoryStore;
use crate::telemetry::{HealthState, LatencyStats};
use crate::types::{now_ms, PoolSnapshot};

/// Outcome of one scan, for logs and tests.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub chains_scanned: usize,
    /// Open circuits closed early because their provider's health check passed.
    pub circuits_closed: usize,
    pub chains_failed: Vec<String>,
    /// Chains answered from an expired cache entry because every refresh failed.
    pub chains_stale: Vec<String>,
    pub pools_fetched: usize,
    pub pools_stored: usize,
    pub filtered_out: usize,
    pub watchlist_refreshed: usize,
    /// Pools whose price was checked against a second provider.
    pub prices_cross_checked: usize,
    pub evicted: usize,
    pub recommendations: usize,
    pub cache_pruned: usize,
    pub duration_ms: u64,
}

/// Periodic scan: fetch → filter → enrich → score → store → recommend.
pub struct Radar {
    cfg: RadarConfig,
    scoring: ScoringConfig,
    recommend: RecommendConfig,
    cache_prune_age: Duration,
    orchestrator: Arc<FallbackOrchestrator>,
    store: Arc<MemoryStore>,
    health: Arc<HealthState>,
    latency: Arc<LatencyStats>,
}

impl Radar {
    pub fn new(
        cfg: &Config,
        orchestrator: Arc<FallbackOrchestrator>,
        store: Arc<MemoryStore>,
        health: Arc<HealthState>,
        latency: Arc<LatencyStats>,
    ) -> Self {
        // Longest-lived cache class sets the prune horizon.
        let longest_ttl = [cfg.cache.pools, cfg.cache.pool, cfg.cache.price, cfg.cache.history]
            .into_iter()
            .max()
            .unwrap_or_default();
        Self {
            cfg: cfg.radar.clone(),
            scoring: cfg.scoring.clone(),
            recommend: cfg.recommend.clone(),
            cache_prune_age: longest_ttl * CACHE_PRUNE_FACTOR,
            orchestrator,
            store,
            health,
            latency,
        }
    }

    /// Scan on every interval tick (the first tick fires immediately) until `shutdown`
    /// flips to true or its sender is dropped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.cfg.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.scan_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Radar stopping");
                        break;
                    }
                }
            }
        }
    }

    pub async fn scan_once(&self) -> ScanReport {
        let started = Instant::now();
        let now = now_ms();
        self.health.set_scanning(true);

        let mut report = ScanReport {
            chains_scanned: self.cfg.chains.len(),
            circuits_closed: self.orchestrator.recheck_open_circuits().await,
            ..ScanReport::default()
        };

        let fetches = self.cfg.chains.iter().map(|chain| async move {
            let result = self
                .orchestrator
                .get_pools_with_fallback(chain, self.cfg.pools_per_chain)
                .await;
            (chain.as_str(), result)
        });

        let mut listed: HashSet<String> = HashSet::new();
        for (chain, result) in join_all(fetches).await {
            let served = match result {
                Ok(served) => served,
                Err(e) => {
                    warn!(chain, error = %e, "Chain scan failed, skipping");
                    report.chains_failed.push(chain.to_string());
                    continue;
                }
            };
            if served.is_stale {
                warn!(chain, provider = %served.provider, "Serving stale pool list");
                report.chains_stale.push(chain.to_string());
            }
            debug!(
                chain,
                provider = %served.provider,
                pools = served.data.len(),
                used_fallback = served.used_fallback,
                from_cache = served.from_cache,
                "Pool list received",
            );

            report.pools_fetched += served.data.len();
            let accepted: Vec<&PoolSnapshot> = served
                .data
                .iter()
                .filter(|snap| self.passes_filters(snap) || self.store.is_watchlisted(&snap.id()))
                .collect();
            report.filtered_out += served.data.len() - accepted.len();

            let references = self.reference_prices(chain, &served.provider, &accepted).await;
            for snap in accepted {
                let reference = references.get(&snap.token0.address.to_lowercase()).copied();
                if reference.is_some() {
                    report.prices_cross_checked += 1;
                }
                self.ingest(snap, reference, now);
                listed.insert(snap.id());
                report.pools_stored += 1;
            }
        }

        let (refreshed, cross_checked) = self.refresh_watchlist(&listed, now).await;
        report.watchlist_refreshed = refreshed;
        report.prices_cross_checked += cross_checked;

        report.evicted = self.store.evict_stale();
        report.evicted += self.store.enforce_limit(self.store.max_pools());

        let recs = generate_top_n(
            &self.store.scored_pools(),
            self.recommend.mode,
            self.recommend.capital_usd,
            &self.recommend,
            now,
        );
        report.recommendations = recs.len();
        self.store.set_recommendations(recs);

        report.cache_pruned = self.orchestrator.prune_cache(self.cache_prune_age);

        let elapsed = started.elapsed();
        report.duration_ms = elapsed.as_millis() as u64;
        self.latency.record(elapsed);
        self.health
            .record_scan(now, report.pools_stored, report.chains_failed.len());
        self.health.set_scanning(false);

        info!(
            chains = report.chains_scanned,
            failed = report.chains_failed.len(),
            stored = report.pools_stored,
            filtered = report.filtered_out,
            watchlist = report.watchlist_refreshed,
            cross_checked = report.prices_cross_checked,
            circuits_closed = report.circuits_closed,
            evicted = report.evicted,
            recommendations = report.recommendations,
            "Scan complete in {}ms: {} pools stored, {} recommendations",
            report.duration_ms,
            report.pools_stored,
            report.recommendations,
        );
        report
    }

    fn passes_filters(&self, snap: &PoolSnapshot) -> bool {
        snap.tvl_usd >= self.cfg.min_tvl_usd && snap.volume_24h >= self.cfg.min_volume_24h
    }

    /// Second-source prices for the base tokens of `pools`, keyed by lowercased token
    /// address. Tokens no other provider can price are left out.
    async fn reference_prices(
        &self,
        chain: &str,
        served_by: &str,
        pools: &[&PoolSnapshot],
    ) -> HashMap<String, f64> {
        if !self.cfg.price_cross_check {
            return HashMap::new();
        }
        let tokens: HashSet<String> = pools
            .iter()
            .map(|p| p.token0.address.to_lowercase())
            .filter(|a| !a.is_empty())
            .collect();

        let lookups = tokens.into_iter().map(|token| async move {
            match self.orchestrator.cross_check_price(chain, &token, served_by).await {
                Ok(served) => Some((token, served.data)),
                Err(e) => {
                    debug!(chain, token = %token, error = %e, "No reference price");
                    None
                }
            }
        });
        join_all(lookups).await.into_iter().flatten().collect()
    }

    /// Enrich against the stored version of the pool, score, and write both.
    fn ingest(&self, snap: &PoolSnapshot, reference_price: Option<f64>, now: u64) {
        let previous = self.store.get_pool(&snap.id());
        let mut pool = enrich(snap, previous.as_ref(), now);
        if let Some(reference) = reference_price {
            apply_reference_price(&mut pool, reference);
        }
        let score = score_pool(&pool, &self.scoring, now);
        if score.is_suspect {
            debug!(
                pool_id = %pool.id,
                reason = score.suspect_reason.as_deref().unwrap_or_default(),
                "Pool flagged suspect",
            );
        }
        self.store.set_pool(pool);
        self.store.set_score(score);
    }

    /// Fetch watchlisted pools the listing did not return. Returns how many were refreshed
    /// and how many of those had their price cross-checked.
    async fn refresh_watchlist(&self, listed: &HashSet<String>, now: u64) -> (usize, usize) {
        let missing: Vec<String> = self
            .store
            .watchlist_ids()
            .into_iter()
            .filter(|id| !listed.contains(id))
            .collect();
        if missing.is_empty() {
            return (0, 0);
        }

        let fetches = missing.iter().map(|id| async move {
            let Some((chain, address)) = id.split_once(':') else {
                warn!(pool_id = %id, "Watchlist id is not chain:address, skipping");
                return None;
            };
            let served = match self.orchestrator.get_pool_with_fallback(chain, address).await {
                Ok(served) => served,
                Err(e) => {
                    warn!(pool_id = %id, error = %e, "Watchlist refresh failed");
                    return None;
                }
            };
            let snap = self.with_volatility(served.data).await;
            let reference = self
                .reference_prices(chain, &served.provider, &[&snap])
                .await
                .into_values()
                .next();
            Some((snap, reference))
        });

        let mut refreshed = 0;
        let mut cross_checked = 0;
        for (snap, reference) in join_all(fetches).await.into_iter().flatten() {
            if reference.is_some() {
                cross_checked += 1;
            }
            self.ingest(&snap, reference, now);
            refreshed += 1;
        }
        (refreshed, cross_checked)
    }

    /// Fill in realized volatility from hourly history when the provider gave none.
    async fn with_volatility(&self, mut snap: PoolSnapshot) -> PoolSnapshot {
        if snap.volatility.is_some() {
            return snap;
        }
        match self
            .orchestrator
            .get_history_with_fallback(&snap.chain, &snap.address, self.cfg.history_hours)
            .await
        {
            Ok(served) => snap.volatility = annualized_volatility(&served.data),
            Err(e) => debug!(pool_id = %snap.id(), error = %e, "No history for volatility"),
        }
        snap
    }
}
