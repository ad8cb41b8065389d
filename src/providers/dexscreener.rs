use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{FetchError, Result};
use crate::providers::{json_f64, json_str, PoolAdapter};
use crate::types::{now_ms, PoolSnapshot, TokenInfo};

/// DexScreener does not report the swap fee; most of its listed pools are 30 bps AMMs.
const DEFAULT_FEE_TIER: f64 = 0.003;

/// DexScreener has no "top pools per chain" listing, so pools are discovered by searching
/// for the chain's wrapped native token and keeping matches on the requested chain.
const CHAIN_SEARCH_ANCHORS: &[(&str, &str)] = &[
    ("ethereum", "WETH"),
    ("base", "WETH"),
    ("arbitrum", "WETH"),
    ("optimism", "WETH"),
    ("bsc", "WBNB"),
    ("polygon", "WPOL"),
    ("avalanche", "WAVAX"),
    ("solana", "SOL"),
];

pub struct DexScreenerAdapter {
    base_url: String,
    client: reqwest::Client,
}

impl DexScreenerAdapter {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url, client })
    }

    async fn get_json(&self, url: &str) -> std::result::Result<serde_json::Value, FetchError> {
        debug!(provider = "dexscreener", url, "GET");
        let resp = self.client.get(url).send().await?.error_for_status()?;
        Ok(resp.json().await?)
    }

    fn search_anchor(chain: &str) -> Option<&'static str> {
        CHAIN_SEARCH_ANCHORS
            .iter()
            .find(|(c, _)| *c == chain)
            .map(|(_, anchor)| *anchor)
    }
}

#[async_trait]
impl PoolAdapter for DexScreenerAdapter {
    fn name(&self) -> &str {
        "dexscreener"
    }

    fn supports_chain(&self, chain: &str) -> bool {
        Self::search_anchor(chain).is_some()
    }

    async fn get_pools(&self, chain: &str, limit: usize) -> std::result::Result<Vec<PoolSnapshot>, FetchError> {
        let anchor = Self::search_anchor(chain).ok_or_else(|| FetchError::Unsupported {
            provider: self.name().to_string(),
            operation: "chain",
        })?;
        let url = format!("{}/latest/dex/search?q={anchor}", self.base_url);
        let body = self.get_json(&url).await?;
        let pools = parse_pairs(&body, chain, now_ms())?;
        Ok(top_by_liquidity(pools, limit))
    }

    async fn get_pool(&self, chain: &str, address: &str) -> std::result::Result<Option<PoolSnapshot>, FetchError> {
        let url = format!("{}/latest/dex/pairs/{chain}/{address}", self.base_url);
        let body = self.get_json(&url).await?;
        let pools = parse_pairs(&body, chain, now_ms())?;
        Ok(pools
            .into_iter()
            .find(|p| p.address.eq_ignore_ascii_case(address)))
    }

    async fn get_price(&self, chain: &str, token_address: &str) -> std::result::Result<Option<f64>, FetchError> {
        let url = format!("{}/tokens/v1/{chain}/{token_address}", self.base_url);
        let body = self.get_json(&url).await?;
        let pairs = body
            .as_array()
            .ok_or_else(|| FetchError::DataQuality("token pairs response is not an array".into()))?;

        // Price from the deepest pool where the token is the base side.
        let best = pairs
            .iter()
            .filter(|p| {
                json_str(p.pointer("/baseToken/address"))
                    .is_some_and(|a| a.eq_ignore_ascii_case(token_address))
            })
            .filter_map(|p| {
                let liquidity = json_f64(p.pointer("/liquidity/usd")).unwrap_or(0.0);
                let price = json_f64(p.get("priceUsd"))?;
                Some((liquidity, price))
            })
            .max_by(|a, b| a.0.total_cmp(&b.0));
        Ok(best.map(|(_, price)| price))
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/latest/dex/search?q=USDC", self.base_url);
        match self.get_json(&url).await {
            Ok(body) => body.get("pairs").is_some(),
            Err(e) => {
                debug!(provider = "dexscreener", error = %e, "Health check failed");
                false
            }
        }
    }
}

/// Map a `{ "pairs": [...] }` envelope. Pairs on other chains, or missing required fields,
/// are dropped rather than failing the whole response.
fn parse_pairs(
    body: &serde_json::Value,
    chain: &str,
    fetched_at_ms: u64,
) -> std::result::Result<Vec<PoolSnapshot>, FetchError> {
    let pairs = match body.get("pairs") {
        Some(serde_json::Value::Array(a)) => a,
        Some(serde_json::Value::Null) => return Ok(Vec::new()),
        _ => return Err(FetchError::DataQuality("response has no 'pairs' array".into())),
    };

    let total = pairs.len();
    let pools: Vec<PoolSnapshot> = pairs
        .iter()
        .filter(|p| json_str(p.get("chainId")) == Some(chain))
        .filter_map(|p| parse_pair(p, chain, fetched_at_ms))
        .collect();
    debug!(provider = "dexscreener", chain, total, mapped = pools.len(), "Mapped pairs");
    Ok(pools)
}

fn parse_pair(v: &serde_json::Value, chain: &str, fetched_at_ms: u64) -> Option<PoolSnapshot> {
    let address = json_str(v.get("pairAddress"))?.to_string();
    let token0 = parse_token(v.get("baseToken")?)?;
    let token1 = parse_token(v.get("quoteToken")?)?;
    let tvl_usd = json_f64(v.pointer("/liquidity/usd"))?;

    let dex = json_str(v.get("dexId")).unwrap_or("unknown");
    let protocol = match v.pointer("/labels/0").and_then(|l| l.as_str()) {
        Some(label) => format!("{dex}_{label}"),
        None => dex.to_string(),
    };

    let volume_24h = json_f64(v.pointer("/volume/h24")).unwrap_or(0.0);
    let volume_1h = json_f64(v.pointer("/volume/h1")).unwrap_or(0.0);
    let volume_5m = json_f64(v.pointer("/volume/m5")).unwrap_or(0.0);
    let fee_tier = DEFAULT_FEE_TIER;

    Some(PoolSnapshot {
        chain: chain.to_string(),
        protocol,
        address,
        token0,
        token1,
        tvl_usd,
        volume_24h,
        volume_1h,
        volume_5m,
        fees_24h: volume_24h * fee_tier,
        fees_1h: volume_1h * fee_tier,
        fees_5m: volume_5m * fee_tier,
        price_usd: json_f64(v.get("priceUsd")).unwrap_or(0.0),
        fee_tier,
        volatility: None,
        price_change_24h_pct: json_f64(v.pointer("/priceChange/h24")),
        incentive_apr: None,
        created_at_ms: v.get("pairCreatedAt").and_then(|t| t.as_u64()),
        fetched_at_ms,
        provider: "dexscreener".to_string(),
    })
}

fn parse_token(v: &serde_json::Value) -> Option<TokenInfo> {
    Some(TokenInfo {
        symbol: json_str(v.get("symbol"))?.to_string(),
        address: json_str(v.get("address"))?.to_string(),
        decimals: None,
    })
}

/// Deepest pools first, one entry per address, at most `limit`.
fn top_by_liquidity(mut pools: Vec<PoolSnapshot>, limit: usize) -> Vec<PoolSnapshot> {
    pools.sort_by(|a, b| b.tvl_usd.total_cmp(&a.tvl_usd));
    let mut seen = std::collections::HashSet::new();
    pools.retain(|p| seen.insert(p.id()));
    pools.truncate(limit);
    pools
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pair(chain: &str, address: &str, liquidity: serde_json::Value) -> serde_json::Value {
        json!({
            "chainId": chain,
            "dexId": "uniswap",
            "labels": ["v3"],
            "pairAddress": address,
            "baseToken": {"address": "0x4200000000000000000000000000000000000006", "name": "Wrapped Ether", "symbol": "WETH"},
            "quoteToken": {"address": "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913", "name": "USD Coin", "symbol": "USDC"},
            "priceUsd": "3012.55",
            "volume": {"h24": 2_400_000.0, "h6": 700_000.0, "h1": 100_000.0, "m5": 8_000.0},
            "priceChange": {"h24": -2.5},
            "liquidity": liquidity,
            "pairCreatedAt": 1_690_000_000_000u64
        })
    }

    #[test]
    fn maps_a_complete_pair() {
        let body = json!({"pairs": [pair("base", "0xPool", json!({"usd": 5_000_000.0}))]});
        let pools = parse_pairs(&body, "base", 1_000).unwrap();
        assert_eq!(pools.len(), 1);

        let p = &pools[0];
        assert_eq!(p.id(), "base:0xpool");
        assert_eq!(p.protocol, "uniswap_v3");
        assert_eq!(p.pair_label(), "WETH/USDC");
        assert_eq!(p.tvl_usd, 5_000_000.0);
        assert_eq!(p.price_usd, 3012.55);
        assert!((p.fees_24h - 7_200.0).abs() < 1e-6);
        assert_eq!(p.price_change_24h_pct, Some(-2.5));
        assert_eq!(p.created_at_ms, Some(1_690_000_000_000));
        assert_eq!(p.fetched_at_ms, 1_000);
    }

    #[test]
    fn drops_other_chains_and_unmappable_pairs() {
        let body = json!({"pairs": [
            pair("base", "0xA", json!({"usd": 1.0})),
            pair("ethereum", "0xB", json!({"usd": 1.0})),
            pair("base", "0xC", json!(null)),
            {"chainId": "base", "pairAddress": "0xD"}
        ]});
        let pools = parse_pairs(&body, "base", 0).unwrap();
        let ids: Vec<String> = pools.iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec!["base:0xa".to_string()]);
    }

    #[test]
    fn null_pairs_is_empty_but_missing_pairs_is_malformed() {
        assert!(parse_pairs(&json!({"pairs": null}), "base", 0).unwrap().is_empty());
        assert!(matches!(
            parse_pairs(&json!({"error": "bad"}), "base", 0),
            Err(FetchError::DataQuality(_))
        ));
    }

    #[test]
    fn top_by_liquidity_sorts_dedups_and_truncates() {
        let body = json!({"pairs": [
            pair("base", "0xA", json!({"usd": 10.0})),
            pair("base", "0xB", json!({"usd": 30.0})),
            pair("base", "0xb", json!({"usd": 30.0})),
            pair("base", "0xC", json!({"usd": 20.0}))
        ]});
        let pools = top_by_liquidity(parse_pairs(&body, "base", 0).unwrap(), 2);
        let ids: Vec<String> = pools.iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec!["base:0xb".to_string(), "base:0xc".to_string()]);
    }

    #[test]
    fn unsupported_chain_has_no_anchor() {
        assert_eq!(DexScreenerAdapter::search_anchor("base"), Some("WETH"));
        assert_eq!(DexScreenerAdapter::search_anchor("tron"), None);
    }
}
