use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{FetchError, Result};
use crate::providers::{json_f64, json_str, PoolAdapter};
use crate::types::{now_ms, PoolHistoryPoint, PoolSnapshot, TokenInfo};

const DEFAULT_FEE_TIER: f64 = 0.003;

/// GeckoTerminal pages its pool listings at 20 per page.
const PAGE_SIZE: usize = 20;
const MAX_PAGES: usize = 5;

/// Our chain names → GeckoTerminal network ids.
const NETWORKS: &[(&str, &str)] = &[
    ("ethereum", "eth"),
    ("base", "base"),
    ("arbitrum", "arbitrum"),
    ("optimism", "optimism"),
    ("bsc", "bsc"),
    ("polygon", "polygon_pos"),
    ("avalanche", "avax"),
    ("solana", "solana"),
];

pub struct GeckoTerminalAdapter {
    base_url: String,
    client: reqwest::Client,
}

impl GeckoTerminalAdapter {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url, client })
    }

    fn network(chain: &str) -> std::result::Result<&'static str, FetchError> {
        NETWORKS
            .iter()
            .find(|(c, _)| *c == chain)
            .map(|(_, n)| *n)
            .ok_or_else(|| FetchError::Unsupported {
                provider: "geckoterminal".to_string(),
                operation: "chain",
            })
    }

    async fn get_json(&self, url: &str) -> std::result::Result<serde_json::Value, FetchError> {
        debug!(provider = "geckoterminal", url, "GET");
        let resp = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl PoolAdapter for GeckoTerminalAdapter {
    fn name(&self) -> &str {
        "geckoterminal"
    }

    fn supports_chain(&self, chain: &str) -> bool {
        Self::network(chain).is_ok()
    }

    async fn get_pools(&self, chain: &str, limit: usize) -> std::result::Result<Vec<PoolSnapshot>, FetchError> {
        let network = Self::network(chain)?;
        let pages = limit.div_ceil(PAGE_SIZE).clamp(1, MAX_PAGES);
        let mut pools = Vec::with_capacity(limit);

        for page in 1..=pages {
            let url = format!(
                "{}/networks/{network}/pools?page={page}&include=base_token,quote_token,dex",
                self.base_url
            );
            let body = self.get_json(&url).await?;
            let batch = parse_pool_list(&body, chain, now_ms())?;
            let short_page = batch.len() < PAGE_SIZE;
            pools.extend(batch);
            if short_page || pools.len() >= limit {
                break;
            }
        }

        pools.truncate(limit);
        Ok(pools)
    }

    async fn get_pool(&self, chain: &str, address: &str) -> std::result::Result<Option<PoolSnapshot>, FetchError> {
        let network = Self::network(chain)?;
        let url = format!(
            "{}/networks/{network}/pools/{address}?include=base_token,quote_token,dex",
            self.base_url
        );
        let body = self.get_json(&url).await?;
        let data = body
            .get("data")
            .ok_or_else(|| FetchError::DataQuality("pool response has no 'data'".into()))?;
        let tokens = included_tokens(&body);
        Ok(parse_pool(data, &tokens, chain, now_ms()))
    }

    async fn get_pool_history(
        &self,
        chain: &str,
        address: &str,
        hours: u32,
    ) -> std::result::Result<Vec<PoolHistoryPoint>, FetchError> {
        let network = Self::network(chain)?;
        let url = format!(
            "{}/networks/{network}/pools/{address}/ohlcv/hour?limit={hours}",
            self.base_url
        );
        let body = self.get_json(&url).await?;
        parse_ohlcv(&body)
    }

    async fn get_price(&self, chain: &str, token_address: &str) -> std::result::Result<Option<f64>, FetchError> {
        let network = Self::network(chain)?;
        let url = format!(
            "{}/simple/networks/{network}/token_price/{token_address}",
            self.base_url
        );
        let body = self.get_json(&url).await?;
        let prices = body
            .pointer("/data/attributes/token_prices")
            .and_then(|p| p.as_object())
            .ok_or_else(|| FetchError::DataQuality("token_prices missing".into()))?;
        Ok(prices
            .iter()
            .find(|(addr, _)| addr.eq_ignore_ascii_case(token_address))
            .and_then(|(_, price)| json_f64(Some(price))))
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/networks?page=1", self.base_url);
        match self.get_json(&url).await {
            Ok(body) => body.get("data").is_some_and(|d| d.is_array()),
            Err(e) => {
                debug!(provider = "geckoterminal", error = %e, "Health check failed");
                false
            }
        }
    }
}

fn parse_pool_list(
    body: &serde_json::Value,
    chain: &str,
    fetched_at_ms: u64,
) -> std::result::Result<Vec<PoolSnapshot>, FetchError> {
    let data = body
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| FetchError::DataQuality("pool list has no 'data' array".into()))?;
    let tokens = included_tokens(body);
    Ok(data
        .iter()
        .filter_map(|p| parse_pool(p, &tokens, chain, fetched_at_ms))
        .collect())
}

/// token resource id (`eth_0x...`) → token info, from the JSON:API `included` section.
fn included_tokens(body: &serde_json::Value) -> HashMap<String, TokenInfo> {
    let Some(included) = body.get("included").and_then(|i| i.as_array()) else {
        return HashMap::new();
    };
    included
        .iter()
        .filter(|r| json_str(r.get("type")) == Some("token"))
        .filter_map(|r| {
            let id = json_str(r.get("id"))?.to_string();
            let attrs = r.get("attributes")?;
            let token = TokenInfo {
                symbol: json_str(attrs.get("symbol"))?.to_string(),
                address: json_str(attrs.get("address"))?.to_string(),
                decimals: attrs
                    .get("decimals")
                    .and_then(|d| d.as_u64())
                    .and_then(|d| u8::try_from(d).ok()),
            };
            Some((id, token))
        })
        .collect()
}

fn parse_pool(
    v: &serde_json::Value,
    tokens: &HashMap<String, TokenInfo>,
    chain: &str,
    fetched_at_ms: u64,
) -> Option<PoolSnapshot> {
    let attrs = v.get("attributes")?;
    let address = json_str(attrs.get("address"))?.to_string();
    let name = json_str(attrs.get("name")).unwrap_or_default();
    let tvl_usd = json_f64(attrs.get("reserve_in_usd"))?;

    // "WETH / USDC 0.05%" → symbols and fee tier
    let mut symbols = name.split(" / ");
    let name_base = symbols.next().map(str::trim);
    let name_quote = symbols
        .next()
        .and_then(|rest| rest.split_whitespace().next());

    let token0 = resolve_token(v, "base_token", tokens, name_base)?;
    let token1 = resolve_token(v, "quote_token", tokens, name_quote)?;
    let fee_tier = fee_tier_from_name(name).unwrap_or(DEFAULT_FEE_TIER);

    let protocol = json_str(v.pointer("/relationships/dex/data/id"))
        .unwrap_or("unknown")
        .to_string();

    let volume_24h = json_f64(attrs.pointer("/volume_usd/h24")).unwrap_or(0.0);
    let volume_1h = json_f64(attrs.pointer("/volume_usd/h1")).unwrap_or(0.0);
    let volume_5m = json_f64(attrs.pointer("/volume_usd/m5")).unwrap_or(0.0);

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
        price_usd: json_f64(attrs.get("base_token_price_usd")).unwrap_or(0.0),
        fee_tier,
        volatility: None,
        price_change_24h_pct: json_f64(attrs.pointer("/price_change_percentage/h24")),
        incentive_apr: None,
        created_at_ms: json_str(attrs.get("pool_created_at"))
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.timestamp_millis().max(0) as u64),
        fetched_at_ms,
        provider: "geckoterminal".to_string(),
    })
}

/// Prefer the `included` token; otherwise rebuild it from the relationship id and pool name.
fn resolve_token(
    pool: &serde_json::Value,
    side: &str,
    tokens: &HashMap<String, TokenInfo>,
    name_symbol: Option<&str>,
) -> Option<TokenInfo> {
    let id = json_str(pool.pointer(&format!("/relationships/{side}/data/id")))?;
    if let Some(token) = tokens.get(id) {
        return Some(token.clone());
    }
    let (_, address) = id.split_once('_')?;
    Some(TokenInfo {
        symbol: name_symbol.filter(|s| !s.is_empty())?.to_string(),
        address: address.to_string(),
        decimals: None,
    })
}

fn fee_tier_from_name(name: &str) -> Option<f64> {
    let pct = name.split_whitespace().last()?.strip_suffix('%')?;
    let fee = pct.parse::<f64>().ok()? / 100.0;
    (fee > 0.0 && fee < 0.1).then_some(fee)
}

/// `ohlcv_list` rows are `[ts_secs, open, high, low, close, volume]`, newest first.
fn parse_ohlcv(body: &serde_json::Value) -> std::result::Result<Vec<PoolHistoryPoint>, FetchError> {
    let rows = body
        .pointer("/data/attributes/ohlcv_list")
        .and_then(|l| l.as_array())
        .ok_or_else(|| FetchError::DataQuality("ohlcv_list missing".into()))?;

    let mut points: Vec<PoolHistoryPoint> = rows
        .iter()
        .filter_map(|row| {
            let row = row.as_array()?;
            Some(PoolHistoryPoint {
                timestamp_ms: row.first()?.as_u64()? * 1_000,
                close_usd: json_f64(row.get(4))?,
                volume_usd: json_f64(row.get(5)).unwrap_or(0.0),
            })
        })
        .collect();
    points.sort_by_key(|p| p.timestamp_ms);
    Ok(points)
}
