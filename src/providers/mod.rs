pub mod dexscreener;
pub mod fallback;
pub mod geckoterminal;
#[cfg(test)]
pub mod mock;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ProviderConfig;
use crate::error::{AppError, FetchError, Result};
use crate::types::{PoolHistoryPoint, PoolSnapshot};

pub use dexscreener::DexScreenerAdapter;
pub use fallback::{FallbackOrchestrator, MarketData};
pub use geckoterminal::GeckoTerminalAdapter;

/// One external pool-data source. The orchestrator only ever talks to providers through this
/// trait; which concrete adapters exist, and in what order they are tried, is configuration.
///
/// Adapters map provider payloads into `PoolSnapshot`s. A single pool that cannot be mapped is
/// skipped; only an unusable response envelope becomes `FetchError::DataQuality`.
#[async_trait]
pub trait PoolAdapter: Send + Sync {
    /// Stable name; also used as the circuit-breaker key and in cache keys.
    fn name(&self) -> &str;

    fn supports_chain(&self, chain: &str) -> bool;

    async fn get_pools(&self, chain: &str, limit: usize) -> std::result::Result<Vec<PoolSnapshot>, FetchError>;

    async fn get_pool(&self, chain: &str, address: &str) -> std::result::Result<Option<PoolSnapshot>, FetchError>;

    /// Hourly candles, newest last.
    async fn get_pool_history(
        &self,
        _chain: &str,
        _address: &str,
        _hours: u32,
    ) -> std::result::Result<Vec<PoolHistoryPoint>, FetchError> {
        Err(FetchError::Unsupported {
            provider: self.name().to_string(),
            operation: "pool history",
        })
    }

    /// USD price of a token.
    async fn get_price(&self, _chain: &str, _token_address: &str) -> std::result::Result<Option<f64>, FetchError> {
        Err(FetchError::Unsupported {
            provider: self.name().to_string(),
            operation: "token price",
        })
    }

    async fn health_check(&self) -> bool;
}

/// Every adapter name `build_adapter` understands.
pub const KNOWN_ADAPTERS: &[&str] = &["dexscreener", "geckoterminal"];

pub fn build_adapter(name: &str, cfg: &ProviderConfig) -> Result<Arc<dyn PoolAdapter>> {
    match name {
        "dexscreener" => Ok(Arc::new(DexScreenerAdapter::new(
            cfg.dexscreener_url.clone(),
            cfg.request_timeout,
        )?)),
        "geckoterminal" => Ok(Arc::new(GeckoTerminalAdapter::new(
            cfg.geckoterminal_url.clone(),
            cfg.request_timeout,
        )?)),
        other => Err(AppError::Config(format!(
            "unknown provider '{other}' (known: {})",
            KNOWN_ADAPTERS.join(", ")
        ))),
    }
}

/// Build every adapter named in the default or any per-chain priority list, once each.
pub fn build_adapters(cfg: &ProviderConfig) -> Result<Vec<Arc<dyn PoolAdapter>>> {
    let mut names: Vec<&str> = Vec::new();
    let listed = cfg
        .default_priority
        .iter()
        .chain(cfg.chain_priority.values().flatten());
    for name in listed {
        if !names.contains(&name.as_str()) {
            names.push(name.as_str());
        }
    }
    names.into_iter().map(|n| build_adapter(n, cfg)).collect()
}

// ---------------------------------------------------------------------------
// Shared JSON helpers for adapters
// ---------------------------------------------------------------------------

/// Providers send numbers both as JSON numbers and as decimal strings.
pub(crate) fn json_f64(v: Option<&serde_json::Value>) -> Option<f64> {
    let v = v?;
    let n = match v {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

pub(crate) fn json_str<'a>(v: Option<&'a serde_json::Value>) -> Option<&'a str> {
    v?.as_str().filter(|s| !s.is_empty())
}
