use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::providers::{build_adapters, FallbackOrchestrator, MarketData, PoolAdapter};
use crate::radar::Radar;
use crate::resilience::{Cache, CircuitBreaker, RetryExecutor, RetryPolicy};
use crate::state::MemoryStore;
use crate::telemetry::{HealthState, LatencyStats};

/// Every long-lived component, constructed once in dependency order.
pub struct Services {
    pub breaker: Arc<CircuitBreaker>,
    pub cache: Arc<Cache<MarketData>>,
    pub orchestrator: Arc<FallbackOrchestrator>,
    pub store: Arc<MemoryStore>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
    pub radar: Arc<Radar>,
}

impl Services {
    pub fn build(cfg: &Config) -> Result<Self> {
        let adapters = build_adapters(&cfg.providers)?;
        Self::with_adapters(cfg, adapters)
    }

    /// Same wiring with caller-supplied adapters.
    pub fn with_adapters(cfg: &Config, adapters: Vec<Arc<dyn PoolAdapter>>) -> Result<Self> {
        let adapter_names: Vec<&str> = adapters.iter().map(|a| a.name()).collect();
        info!(adapters = ?adapter_names, "Building services");

        let breaker = Arc::new(CircuitBreaker::new(&cfg.circuit));
        let cache = Arc::new(Cache::new());
        let orchestrator = Arc::new(FallbackOrchestrator::new(
            adapters,
            cfg.providers.clone(),
            RetryExecutor::new(Arc::clone(&breaker)),
            RetryPolicy::from(&cfg.retry),
            Arc::clone(&cache),
            cfg.cache.clone(),
        ));
        let store = MemoryStore::new(&cfg.store);
        let health = Arc::new(HealthState::new());
        let latency = Arc::new(LatencyStats::new()?);
        let radar = Arc::new(Radar::new(
            cfg,
            Arc::clone(&orchestrator),
            Arc::clone(&store),
            Arc::clone(&health),
            Arc::clone(&latency),
        ));

        Ok(Self {
            breaker,
            cache,
            orchestrator,
            store,
            health,
            latency,
            radar,
        })
    }

    /// Add configured watchlist ids. Returns how many were accepted.
    pub fn seed_watchlist(&self, ids: &[String]) -> usize {
        ids.iter()
            .filter(|id| self.store.add_to_watchlist(id))
            .count()
    }

    /// Log final stats and release in-memory state.
    pub fn shutdown(&self) {
        let store = self.store.get_stats();
        let cache = self.cache.stats();
        let health = self.health.snapshot();
        let latency = self.latency.summary();
        info!(
            scans = health.scans_total,
            pools = store.pools,
            evicted = store.evicted_total,
            cache_hits = cache.hits,
            cache_misses = cache.misses,
            stale_served = cache.stale_served,
            cache_entries = self.cache.len(),
            scans_timed = self.latency.len(),
            scan_p50_ms = latency.p50_ms.unwrap_or_default(),
            scan_p99_ms = latency.p99_ms.unwrap_or_default(),
            "Shutting down",
        );
        for circuit in self.breaker.statuses() {
            info!(
                circuit = %circuit.name,
                phase = %circuit.phase,
                failures = circuit.failures,
                "Circuit state at shutdown",
            );
        }
        self.store.clear();
        self.cache.clear();
    }
}
