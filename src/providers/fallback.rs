//! Multi-provider fallback: every read tries adapters in priority order, each through
//! the shared cache and the retry executor.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{CacheTtls, ProviderConfig};
use crate::error::FetchError;
use crate::providers::PoolAdapter;
use crate::resilience::{Cache, CacheStats, CircuitPhase, CircuitStatus, RetryExecutor, RetryPolicy};
use crate::types::{PoolHistoryPoint, PoolSnapshot};

/// Everything the orchestrator caches, in one cache instance. Keys are namespaced per
/// variant so a lookup never sees another variant.
#[derive(Debug, Clone)]
pub enum MarketData {
    Pools(Vec<PoolSnapshot>),
    Pool(PoolSnapshot),
    History(Vec<PoolHistoryPoint>),
    Price(f64),
}

/// A value plus where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Served<T> {
    pub data: T,
    /// Adapter that produced the value.
    pub provider: String,
    /// False only when the first-priority adapter for the chain answered.
    pub used_fallback: bool,
    pub from_cache: bool,
    pub is_stale: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub provider: String,
    pub healthy: bool,
    pub circuit: CircuitStatus,
}

pub struct FallbackOrchestrator {
    adapters: Vec<Arc<dyn PoolAdapter>>,
    providers: ProviderConfig,
    retry: RetryExecutor,
    policy: RetryPolicy,
    cache: Arc<Cache<MarketData>>,
    ttls: CacheTtls,
}

impl FallbackOrchestrator {
    pub fn new(
        adapters: Vec<Arc<dyn PoolAdapter>>,
        providers: ProviderConfig,
        retry: RetryExecutor,
        policy: RetryPolicy,
        cache: Arc<Cache<MarketData>>,
        ttls: CacheTtls,
    ) -> Self {
        Self {
            adapters,
            providers,
            retry,
            policy,
            cache,
            ttls,
        }
    }

    /// Adapters for `chain` in priority order. Names in the priority list with no built
    /// adapter, or adapters that do not cover the chain, are skipped.
    pub fn adapters_for(&self, chain: &str) -> Vec<Arc<dyn PoolAdapter>> {
        self.providers
            .priority_for(chain)
            .iter()
            .filter_map(|name| self.adapters.iter().find(|a| a.name() == name))
            .filter(|a| a.supports_chain(chain))
            .cloned()
            .collect()
    }

    pub async fn get_pools_with_fallback(
        &self,
        chain: &str,
        limit: usize,
    ) -> Result<Served<Vec<PoolSnapshot>>, FetchError> {
        self.with_fallback(
            self.adapters_for(chain),
            chain,
            &format!("pools:{{adapter}}:{chain}:{limit}"),
            self.ttls.pools,
            move |adapter| async move {
                let pools = adapter.get_pools(chain, limit).await?;
                if pools.is_empty() {
                    return Err(FetchError::NotFound(format!("no pools on {chain}")));
                }
                Ok(MarketData::Pools(pools))
            },
            |data| match data {
                MarketData::Pools(p) => Some(p),
                _ => None,
            },
        )
        .await
    }

    pub async fn get_pool_with_fallback(
        &self,
        chain: &str,
        address: &str,
    ) -> Result<Served<PoolSnapshot>, FetchError> {
        let address = address.to_lowercase();
        let address = address.as_str();
        self.with_fallback(
            self.adapters_for(chain),
            chain,
            &format!("pool:{{adapter}}:{chain}:{address}"),
            self.ttls.pool,
            move |adapter| async move {
                adapter
                    .get_pool(chain, address)
                    .await?
                    .map(MarketData::Pool)
                    .ok_or_else(|| FetchError::NotFound(format!("pool {chain}:{address}")))
            },
            |data| match data {
                MarketData::Pool(p) => Some(p),
                _ => None,
            },
        )
        .await
    }

    pub async fn get_price_with_fallback(
        &self,
        chain: &str,
        token_address: &str,
    ) -> Result<Served<f64>, FetchError> {
        self.price_from(self.adapters_for(chain), chain, token_address).await
    }

    /// Token price from any adapter other than `served_by`, for checking one provider's
    /// figure against another. Fails with zero attempts when no other adapter covers
    /// the chain.
    pub async fn cross_check_price(
        &self,
        chain: &str,
        token_address: &str,
        served_by: &str,
    ) -> Result<Served<f64>, FetchError> {
        let others = self
            .adapters_for(chain)
            .into_iter()
            .filter(|a| a.name() != served_by)
            .collect();
        self.price_from(others, chain, token_address).await
    }

    async fn price_from(
        &self,
        adapters: Vec<Arc<dyn PoolAdapter>>,
        chain: &str,
        token_address: &str,
    ) -> Result<Served<f64>, FetchError> {
        let token = token_address.to_lowercase();
        let token = token.as_str();
        self.with_fallback(
            adapters,
            chain,
            &format!("price:{{adapter}}:{chain}:{token}"),
            self.ttls.price,
            move |adapter| async move {
                adapter
                    .get_price(chain, token)
                    .await?
                    .filter(|p| p.is_finite() && *p > 0.0)
                    .map(MarketData::Price)
                    .ok_or_else(|| FetchError::NotFound(format!("price for {chain}:{token}")))
            },
            |data| match data {
                MarketData::Price(p) => Some(p),
                _ => None,
            },
        )
        .await
    }

    pub async fn get_history_with_fallback(
        &self,
        chain: &str,
        address: &str,
        hours: u32,
    ) -> Result<Served<Vec<PoolHistoryPoint>>, FetchError> {
        let address = address.to_lowercase();
        let address = address.as_str();
        self.with_fallback(
            self.adapters_for(chain),
            chain,
            &format!("history:{{adapter}}:{chain}:{address}:{hours}"),
            self.ttls.history,
            move |adapter| async move {
                let points = adapter.get_pool_history(chain, address, hours).await?;
                if points.is_empty() {
                    return Err(FetchError::NotFound(format!("history for {chain}:{address}")));
                }
                Ok(MarketData::History(points))
            },
            |data| match data {
                MarketData::History(h) => Some(h),
                _ => None,
            },
        )
        .await
    }

    /// Core loop shared by every read. `key_template` carries an `{adapter}` placeholder.
    async fn with_fallback<T, F, Fut>(
        &self,
        adapters: Vec<Arc<dyn PoolAdapter>>,
        chain: &str,
        key_template: &str,
        ttl: Duration,
        fetch: F,
        extract: fn(MarketData) -> Option<T>,
    ) -> Result<Served<T>, FetchError>
    where
        F: Fn(Arc<dyn PoolAdapter>) -> Fut,
        Fut: Future<Output = Result<MarketData, FetchError>>,
    {
        if adapters.is_empty() {
            return Err(FetchError::AllProvidersFailed {
                chain: chain.to_string(),
                attempts: 0,
                last: Box::new(FetchError::Unsupported {
                    provider: "any".to_string(),
                    operation: "chain",
                }),
            });
        }

        let mut last: Option<FetchError> = None;
        let mut not_found_only = true;

        for (idx, adapter) in adapters.iter().enumerate() {
            let name = adapter.name();
            let key = key_template.replace("{adapter}", name);

            let outcome = self
                .cache
                .get_or_fetch(&key, ttl, || {
                    self.retry
                        .execute(name, &self.policy, || fetch(Arc::clone(adapter)))
                })
                .await;

            match outcome {
                Ok(fetched) => {
                    let Some(data) = extract(fetched.value) else {
                        warn!(key, "Cache entry holds unexpected data class, dropping");
                        self.cache.remove(&key);
                        last = Some(FetchError::DataQuality(format!("bad cache entry {key}")));
                        not_found_only = false;
                        continue;
                    };
                    if idx > 0 {
                        info!(chain, provider = name, attempt = idx + 1, "Served by fallback provider");
                    }
                    return Ok(Served {
                        data,
                        provider: name.to_string(),
                        used_fallback: idx > 0,
                        from_cache: fetched.from_cache,
                        is_stale: fetched.is_stale,
                    });
                }
                Err(e) => {
                    debug!(chain, provider = name, error = %e, "Provider failed, trying next");
                    not_found_only &= matches!(e, FetchError::NotFound(_));
                    last = Some(e);
                }
            }
        }

        let last = last.unwrap_or_else(|| FetchError::Transient("no attempt made".into()));
        if not_found_only {
            return Err(last);
        }
        warn!(chain, attempts = adapters.len(), error = %last, "All providers failed");
        Err(FetchError::AllProvidersFailed {
            chain: chain.to_string(),
            attempts: adapters.len(),
            last: Box::new(last),
        })
    }

    /// Run every adapter's health check, concurrently.
    pub async fn health_check_all(&self) -> Vec<ProviderHealth> {
        let checks = self.adapters.iter().map(|adapter| async move {
            let healthy = adapter.health_check().await;
            ProviderHealth {
                provider: adapter.name().to_string(),
                healthy,
                circuit: self.retry.breaker().status(adapter.name()),
            }
        });
        futures_util::future::join_all(checks).await
    }

    /// Ping every adapter whose circuit is open and close the circuit when the ping
    /// passes, instead of waiting out the cooldown. Returns how many were closed.
    pub async fn recheck_open_circuits(&self) -> usize {
        let breaker = self.retry.breaker();
        let open: Vec<&Arc<dyn PoolAdapter>> = self
            .adapters
            .iter()
            .filter(|a| breaker.status(a.name()).phase == CircuitPhase::Open)
            .collect();
        if open.is_empty() {
            return 0;
        }

        let checks = open.into_iter().map(|adapter| async move {
            let healthy = adapter.health_check().await;
            if healthy {
                info!(provider = adapter.name(), "Health check passed, closing circuit early");
                breaker.reset(adapter.name());
            }
            healthy
        });
        futures_util::future::join_all(checks)
            .await
            .into_iter()
            .filter(|closed| *closed)
            .count()
    }

    pub fn circuit_statuses(&self) -> Vec<CircuitStatus> {
        self.retry.breaker().statuses()
    }

    pub fn prune_cache(&self, max_age: Duration) -> usize {
        self.cache.prune(max_age)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
