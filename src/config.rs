use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::scorer::pool_scorer::{HEALTH_MAX, RETURN_MAX, RISK_MAX};
use crate::types::RiskMode;

pub const DEXSCREENER_API_URL: &str = "https://api.dexscreener.com";
pub const GECKOTERMINAL_API_URL: &str = "https://api.geckoterminal.com/api/v2";

/// Default adapter priority when a chain has no `PROVIDER_PRIORITY_<CHAIN>` override.
pub const DEFAULT_PROVIDER_PRIORITY: &[&str] = &["dexscreener", "geckoterminal"];

/// Chains scanned when `RADAR_CHAINS` is unset.
pub const DEFAULT_CHAINS: &[&str] = &["ethereum", "base", "arbitrum", "solana"];

/// Evicted once older than this multiple of their TTL.
pub const STALE_EVICTION_FACTOR: u32 = 2;

/// Cache entries this many TTLs old are pruned at the end of a scan.
pub const CACHE_PRUNE_FACTOR: u32 = 10;

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub dexscreener_url: String,
    pub geckoterminal_url: String,
    /// Adapter order used for chains without an override (PROVIDER_PRIORITY).
    pub default_priority: Vec<String>,
    /// chain → adapter order (PROVIDER_PRIORITY_<CHAIN>).
    pub chain_priority: HashMap<String, Vec<String>>,
    /// HTTP client timeout for a single provider request (REQUEST_TIMEOUT_SECS).
    pub request_timeout: Duration,
}

impl ProviderConfig {
    pub fn priority_for(&self, chain: &str) -> &[String] {
        self.chain_priority
            .get(chain)
            .map(Vec::as_slice)
            .unwrap_or(&self.default_priority)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            dexscreener_url: DEXSCREENER_API_URL.to_string(),
            geckoterminal_url: GECKOTERMINAL_API_URL.to_string(),
            default_priority: DEFAULT_PROVIDER_PRIORITY.iter().map(|s| s.to_string()).collect(),
            chain_priority: HashMap::new(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Per-data-class TTLs. All classes share one cache; each entry carries its own TTL.
#[derive(Debug, Clone)]
pub struct CacheTtls {
    pub pools: Duration,
    pub pool: Duration,
    pub price: Duration,
    pub history: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            pools: Duration::from_secs(120),
            pool: Duration::from_secs(60),
            price: Duration::from_secs(30),
            history: Duration::from_secs(900),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub open_duration: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            open_duration: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound on one attempt, including the provider's own HTTP timeout.
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(8_000),
            attempt_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RadarConfig {
    pub chains: Vec<String>,
    pub interval: Duration,
    pub pools_per_chain: usize,
    pub min_tvl_usd: f64,
    pub min_volume_24h: f64,
    /// Hours of hourly candles used to derive volatility for watchlisted pools.
    pub history_hours: u32,
    /// Check each pool's price against a second provider (RADAR_PRICE_CROSS_CHECK).
    pub price_cross_check: bool,
}

impl Default for RadarConfig {
    fn default() -> Self {
        Self {
            chains: DEFAULT_CHAINS.iter().map(|s| s.to_string()).collect(),
            interval: Duration::from_secs(300),
            pools_per_chain: 50,
            min_tvl_usd: 100_000.0,
            min_volume_24h: 50_000.0,
            history_hours: 72,
            price_cross_check: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub max_pools: usize,
    pub pool_ttl: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_pools: 500,
            pool_ttl: Duration::from_secs(600),
        }
    }
}

/// Scoring coefficients. These are tuning knobs, not derived constants.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub health_weight: f64,
    pub return_weight: f64,
    pub risk_weight: f64,
    /// Total at or above this → aggressive.
    pub aggressive_min: f64,
    /// Total at or above this → normal, else defensive.
    pub normal_min: f64,
    /// Data older than this is suspect.
    pub max_data_age: Duration,
    /// APR (percent) above which yield is treated as implausible rather than rewarded.
    pub apr_cap: f64,
    /// Daily fees / TVL above this counts as a field inconsistency.
    pub fee_tvl_sanity: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            health_weight: 40.0,
            return_weight: 35.0,
            risk_weight: 25.0,
            aggressive_min: 70.0,
            normal_min: 45.0,
            max_data_age: Duration::from_secs(1_800),
            apr_cap: 300.0,
            fee_tvl_sanity: 0.02,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecommendConfig {
    pub top_n: usize,
    pub capital_usd: f64,
    pub mode: RiskMode,
    /// How long a recommendation set stays valid.
    pub validity: Duration,
    /// Holding period used for the estimated gain.
    pub holding_days: f64,
}

impl Default for RecommendConfig {
    fn default() -> Self {
        Self {
            top_n: 3,
            capital_usd: 10_000.0,
            mode: RiskMode::Normal,
            validity: Duration::from_secs(6 * 3_600),
            holding_days: 7.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub log_level: String,
    pub providers: ProviderConfig,
    pub cache: CacheTtls,
    pub circuit: CircuitConfig,
    pub retry: RetryConfig,
    pub radar: RadarConfig,
    pub store: StoreConfig,
    pub scoring: ScoringConfig,
    pub recommend: RecommendConfig,
    /// Pool ids pinned against eviction (WATCHLIST_POOLS, comma-separated `chain:address`).
    pub watchlist: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let default_priority = match std::env::var("PROVIDER_PRIORITY") {
            Ok(v) => split_list(&v),
            Err(_) => defaults.providers.default_priority.clone(),
        };
        let chain_priority: HashMap<String, Vec<String>> = std::env::vars()
            .filter_map(|(k, v)| {
                let chain = k.strip_prefix("PROVIDER_PRIORITY_")?;
                Some((chain.to_lowercase(), split_list(&v)))
            })
            .collect();

        let cfg = Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            providers: ProviderConfig {
                dexscreener_url: std::env::var("DEXSCREENER_API_URL")
                    .unwrap_or_else(|_| DEXSCREENER_API_URL.to_string()),
                geckoterminal_url: std::env::var("GECKOTERMINAL_API_URL")
                    .unwrap_or_else(|_| GECKOTERMINAL_API_URL.to_string()),
                default_priority,
                chain_priority,
                request_timeout: Duration::from_secs(env_or("REQUEST_TIMEOUT_SECS", 10)?),
            },
            cache: CacheTtls {
                pools: Duration::from_secs(env_or("CACHE_TTL_POOLS_SECS", 120)?),
                pool: Duration::from_secs(env_or("CACHE_TTL_POOL_SECS", 60)?),
                price: Duration::from_secs(env_or("CACHE_TTL_PRICE_SECS", 30)?),
                history: Duration::from_secs(env_or("CACHE_TTL_HISTORY_SECS", 900)?),
            },
            circuit: CircuitConfig {
                failure_threshold: env_or("CIRCUIT_FAILURE_THRESHOLD", 3)?,
                open_duration: Duration::from_secs(env_or("CIRCUIT_OPEN_SECS", 60)?),
            },
            retry: RetryConfig {
                max_retries: env_or("RETRY_MAX_RETRIES", 3)?,
                base_delay: Duration::from_millis(env_or("RETRY_BASE_DELAY_MS", 500)?),
                max_delay: Duration::from_millis(env_or("RETRY_MAX_DELAY_MS", 8_000)?),
                attempt_timeout: Duration::from_secs(env_or("RETRY_ATTEMPT_TIMEOUT_SECS", 15)?),
            },
            radar: RadarConfig {
                chains: match std::env::var("RADAR_CHAINS") {
                    Ok(v) => split_list(&v),
                    Err(_) => defaults.radar.chains.clone(),
                },
                interval: Duration::from_secs(env_or("RADAR_INTERVAL_SECS", 300)?),
                pools_per_chain: env_or("RADAR_POOLS_PER_CHAIN", 50)?,
                min_tvl_usd: env_or("RADAR_MIN_TVL_USD", 100_000.0)?,
                min_volume_24h: env_or("RADAR_MIN_VOLUME_24H", 50_000.0)?,
                history_hours: env_or("RADAR_HISTORY_HOURS", 72)?,
                price_cross_check: env_or("RADAR_PRICE_CROSS_CHECK", true)?,
            },
            store: StoreConfig {
                max_pools: env_or("STORE_MAX_POOLS", 500)?,
                pool_ttl: Duration::from_secs(env_or("STORE_POOL_TTL_SECS", 600)?),
            },
            scoring: ScoringConfig {
                health_weight: env_or("SCORE_WEIGHT_HEALTH", 40.0)?,
                return_weight: env_or("SCORE_WEIGHT_RETURN", 35.0)?,
                risk_weight: env_or("SCORE_WEIGHT_RISK", 25.0)?,
                aggressive_min: env_or("SCORE_AGGRESSIVE_MIN", 70.0)?,
                normal_min: env_or("SCORE_NORMAL_MIN", 45.0)?,
                max_data_age: Duration::from_secs(env_or("SCORE_MAX_DATA_AGE_SECS", 1_800)?),
                apr_cap: env_or("SCORE_APR_CAP", 300.0)?,
                fee_tvl_sanity: env_or("SCORE_FEE_TVL_SANITY", 0.02)?,
            },
            recommend: RecommendConfig {
                top_n: env_or("RECOMMEND_TOP_N", 3)?,
                capital_usd: env_or("RECOMMEND_CAPITAL_USD", 10_000.0)?,
                mode: env_or("RECOMMEND_MODE", RiskMode::Normal)?,
                validity: Duration::from_secs(env_or("RECOMMEND_VALID_HOURS", 6u64)? * 3_600),
                holding_days: env_or("RECOMMEND_HOLDING_DAYS", 7.0)?,
            },
            watchlist: std::env::var("WATCHLIST_POOLS")
                .map(|v| split_list(&v))
                .unwrap_or_default(),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.radar.chains.is_empty() {
            return Err(AppError::Config("RADAR_CHAINS must name at least one chain".to_string()));
        }
        if self.providers.default_priority.is_empty() {
            return Err(AppError::Config("PROVIDER_PRIORITY must name at least one provider".to_string()));
        }
        if self.circuit.failure_threshold == 0 {
            return Err(AppError::Config("CIRCUIT_FAILURE_THRESHOLD must be at least 1".to_string()));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(AppError::Config(
                "RETRY_BASE_DELAY_MS must not exceed RETRY_MAX_DELAY_MS".to_string(),
            ));
        }
        if self.store.max_pools == 0 {
            return Err(AppError::Config("STORE_MAX_POOLS must be at least 1".to_string()));
        }
        for (key, weight, band) in [
            ("SCORE_WEIGHT_HEALTH", self.scoring.health_weight, HEALTH_MAX),
            ("SCORE_WEIGHT_RETURN", self.scoring.return_weight, RETURN_MAX),
            ("SCORE_WEIGHT_RISK", self.scoring.risk_weight, RISK_MAX),
        ] {
            if !(0.0..=band).contains(&weight) {
                return Err(AppError::Config(format!("{key} must be between 0 and {band}")));
            }
        }
        if self.scoring.normal_min > self.scoring.aggressive_min {
            return Err(AppError::Config(
                "SCORE_NORMAL_MIN must not exceed SCORE_AGGRESSIVE_MIN".to_string(),
            ));
        }
        Ok(())
    }
}

/// Read `key` and parse it, falling back to `default` when unset.
/// A set-but-unparseable value is a configuration error rather than a silent default.
fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value: {raw:?}"))),
        Err(_) => Ok(default),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}
