//! Scripted in-memory adapter for orchestrator and radar tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::FetchError;
use crate::providers::PoolAdapter;
use crate::types::{PoolHistoryPoint, PoolSnapshot, TokenInfo};

type Reply<T> = Result<T, FetchError>;

pub struct MockAdapter {
    name: String,
    /// Empty = every chain.
    chains: Vec<String>,
    /// Consumed front to back; once empty, `pools_default` answers.
    pools_script: Mutex<VecDeque<Reply<Vec<PoolSnapshot>>>>,
    pools_default: Mutex<Reply<Vec<PoolSnapshot>>>,
    single: Mutex<HashMap<String, Reply<PoolSnapshot>>>,
    history: Mutex<Option<Vec<PoolHistoryPoint>>>,
    price: Mutex<Option<Reply<f64>>>,
    healthy: bool,
    pool_list_calls: AtomicU32,
    pool_calls: AtomicU32,
    history_calls: AtomicU32,
}

impl MockAdapter {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            chains: Vec::new(),
            pools_script: Mutex::new(VecDeque::new()),
            pools_default: Mutex::new(Ok(Vec::new())),
            single: Mutex::new(HashMap::new()),
            history: Mutex::new(None),
            price: Mutex::new(None),
            healthy: true,
            pool_list_calls: AtomicU32::new(0),
            pool_calls: AtomicU32::new(0),
            history_calls: AtomicU32::new(0),
        }
    }

    pub fn with_pools(self, pools: Vec<PoolSnapshot>) -> Self {
        self.set_pools(Ok(pools));
        self
    }

    pub fn failing(self, err: FetchError) -> Self {
        self.set_pools(Err(err));
        self
    }

    pub fn only_chains(mut self, chains: &[&str]) -> Self {
        self.chains = chains.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    pub fn with_pool(self, pool: PoolSnapshot) -> Self {
        self.set_pool(&pool.address.clone(), Ok(pool));
        self
    }

    pub fn with_history(self, points: Vec<PoolHistoryPoint>) -> Self {
        *self.history.lock().unwrap() = Some(points);
        self
    }

    pub fn with_price(self, price: Reply<f64>) -> Self {
        *self.price.lock().unwrap() = Some(price);
        self
    }

    /// Replace the standing `get_pools` reply.
    pub fn set_pools(&self, reply: Reply<Vec<PoolSnapshot>>) {
        *self.pools_default.lock().unwrap() = reply;
    }

    /// Queue a one-shot `get_pools` reply ahead of the standing one.
    pub fn push_pools(&self, reply: Reply<Vec<PoolSnapshot>>) {
        self.pools_script.lock().unwrap().push_back(reply);
    }

    pub fn set_pool(&self, address: &str, reply: Reply<PoolSnapshot>) {
        self.single
            .lock()
            .unwrap()
            .insert(address.to_lowercase(), reply);
    }

    pub fn pool_list_calls(&self) -> u32 {
        self.pool_list_calls.load(Ordering::SeqCst)
    }

    pub fn pool_calls(&self) -> u32 {
        self.pool_calls.load(Ordering::SeqCst)
    }

    pub fn history_calls(&self) -> u32 {
        self.history_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PoolAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_chain(&self, chain: &str) -> bool {
        self.chains.is_empty() || self.chains.iter().any(|c| c == chain)
    }

    async fn get_pools(&self, chain: &str, limit: usize) -> Reply<Vec<PoolSnapshot>> {
        self.pool_list_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.pools_script.lock().unwrap().pop_front();
        let reply = scripted.unwrap_or_else(|| self.pools_default.lock().unwrap().clone());
        reply.map(|pools| {
            pools
                .into_iter()
                .filter(|p| p.chain == chain)
                .take(limit)
                .collect()
        })
    }

    async fn get_pool(&self, _chain: &str, address: &str) -> Reply<Option<PoolSnapshot>> {
        self.pool_calls.fetch_add(1, Ordering::SeqCst);
        match self.single.lock().unwrap().get(&address.to_lowercase()) {
            Some(reply) => reply.clone().map(Some),
            None => Ok(None),
        }
    }

    async fn get_pool_history(
        &self,
        _chain: &str,
        _address: &str,
        _hours: u32,
    ) -> Reply<Vec<PoolHistoryPoint>> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        match self.history.lock().unwrap().clone() {
            Some(points) => Ok(points),
            None => Err(FetchError::Unsupported {
                provider: self.name.clone(),
                operation: "pool history",
            }),
        }
    }

    async fn get_price(&self, _chain: &str, _token_address: &str) -> Reply<Option<f64>> {
        match self.price.lock().unwrap().clone() {
            Some(reply) => reply.map(Some),
            None => Err(FetchError::Unsupported {
                provider: self.name.clone(),
                operation: "token price",
            }),
        }
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }
}

/// A plausible mid-size WETH/USDC-style pool for tests; tweak fields as needed.
pub fn snapshot(chain: &str, address: &str, tvl_usd: f64, volume_24h: f64) -> PoolSnapshot {
    let fee_tier = 0.003;
    PoolSnapshot {
        chain: chain.to_string(),
        protocol: "uniswap_v3".to_string(),
        address: address.to_string(),
        token0: TokenInfo {
            symbol: "WETH".to_string(),
            address: "0xweth".to_string(),
            decimals: Some(18),
        },
        token1: TokenInfo {
            symbol: "USDC".to_string(),
            address: "0xusdc".to_string(),
            decimals: Some(6),
        },
        tvl_usd,
        volume_24h,
        volume_1h: volume_24h / 24.0,
        volume_5m: volume_24h / 288.0,
        fees_24h: volume_24h * fee_tier,
        fees_1h: volume_24h / 24.0 * fee_tier,
        fees_5m: volume_24h / 288.0 * fee_tier,
        price_usd: 3_000.0,
        fee_tier,
        volatility: None,
        price_change_24h_pct: Some(1.0),
        incentive_apr: None,
        created_at_ms: Some(0),
        fetched_at_ms: crate::types::now_ms(),
        provider: "mock".to_string(),
    }
}
