use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Canonical pool id: unique per (chain, address). EVM addresses are case-insensitive.
pub fn pool_id(chain: &str, address: &str) -> String {
    format!("{}:{}", chain.to_lowercase(), address.to_lowercase())
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ---------------------------------------------------------------------------
// Pool snapshot (as produced by an adapter)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub symbol: String,
    pub address: String,
    /// Not every provider reports decimals.
    pub decimals: Option<u8>,
}

/// One provider's view of a pool at fetch time. Superseded by later fetches, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub chain: String,
    pub protocol: String,
    pub address: String,
    pub token0: TokenInfo,
    pub token1: TokenInfo,
    pub tvl_usd: f64,
    pub volume_24h: f64,
    pub volume_1h: f64,
    pub volume_5m: f64,
    pub fees_24h: f64,
    pub fees_1h: f64,
    pub fees_5m: f64,
    pub price_usd: f64,
    /// Swap fee as a fraction (0.003 = 30 bps).
    pub fee_tier: f64,
    /// Annualized realized volatility as a fraction, when the provider (or history) supplies it.
    pub volatility: Option<f64>,
    pub price_change_24h_pct: Option<f64>,
    /// Reward emissions on top of swap fees, in percent.
    pub incentive_apr: Option<f64>,
    pub created_at_ms: Option<u64>,
    pub fetched_at_ms: u64,
    pub provider: String,
}

impl PoolSnapshot {
    pub fn id(&self) -> String {
        pool_id(&self.chain, &self.address)
    }

    pub fn pair_label(&self) -> String {
        format!("{}/{}", self.token0.symbol, self.token1.symbol)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolHistoryPoint {
    pub timestamp_ms: u64,
    pub close_usd: f64,
    pub volume_usd: f64,
}

// ---------------------------------------------------------------------------
// Unified (enriched) pool
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolType {
    /// Both sides are USD stablecoins.
    Stable,
    /// Both sides track the same underlying (ETH/stETH, BTC/WBTC).
    Correlated,
    /// Both sides are majors or stables.
    Bluechip,
    Volatile,
}

impl std::fmt::Display for PoolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PoolType::Stable => "stable",
            PoolType::Correlated => "correlated",
            PoolType::Bluechip => "bluechip",
            PoolType::Volatile => "volatile",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedPool {
    pub id: String,
    pub snapshot: PoolSnapshot,
    /// Percent, from swap fees only.
    pub fee_apr: f64,
    pub incentive_apr: f64,
    pub total_apr: f64,
    /// Total APR haircut for volatility.
    pub adjusted_apr: f64,
    /// Annualized, as a fraction.
    pub volatility: f64,
    /// 0–100.
    pub health_score: f64,
    /// 24h volume / TVL.
    pub capital_efficiency: f64,
    pub is_bluechip: bool,
    pub pool_type: PoolType,
    pub warnings: Vec<String>,
    /// TVL change versus the previously stored snapshot, in percent.
    pub tvl_change_pct: Option<f64>,
    /// Price gap versus the previous snapshot when it came from another provider, in percent.
    pub price_divergence_pct: Option<f64>,
    pub age_days: Option<f64>,
}

// ---------------------------------------------------------------------------
// Score
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskMode {
    Defensive,
    Normal,
    Aggressive,
}

impl RiskMode {
    /// Largest risk penalty (on the default 25-point scale) a pool may carry for this mode.
    pub fn max_risk_penalty(self) -> f64 {
        match self {
            RiskMode::Defensive => 8.0,
            RiskMode::Normal => 15.0,
            RiskMode::Aggressive => 25.0,
        }
    }
}

impl std::fmt::Display for RiskMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskMode::Defensive => "defensive",
            RiskMode::Normal => "normal",
            RiskMode::Aggressive => "aggressive",
        };
        write!(f, "{s}")
    }
}

impl FromStr for RiskMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "defensive" => Ok(RiskMode::Defensive),
            "normal" => Ok(RiskMode::Normal),
            "aggressive" => Ok(RiskMode::Aggressive),
            other => Err(format!("unknown risk mode: {other}")),
        }
    }
}

/// Points contributed by each factor, before weight scaling.
/// Health factors sum to at most 40, return factors to 35, penalties to 25.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub liquidity: f64,
    pub liquidity_stability: f64,
    pub pool_age: f64,
    pub volume_consistency: f64,
    pub composition: f64,
    pub volume_ratio: f64,
    pub fee_efficiency: f64,
    pub apr: f64,
    pub volatility_penalty: f64,
    pub liquidity_drop_penalty: f64,
    pub inconsistency_penalty: f64,
    pub divergence_penalty: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub pool_id: String,
    /// 0–100.
    pub total: f64,
    pub health: f64,
    pub returns: f64,
    /// Penalty points subtracted from health + returns.
    pub risk: f64,
    pub breakdown: ScoreBreakdown,
    pub recommended_mode: RiskMode,
    pub is_suspect: bool,
    pub suspect_reason: Option<String>,
    pub scored_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPool {
    pub pool: UnifiedPool,
    pub score: Score,
}

// ---------------------------------------------------------------------------
// Recommendation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// 1-based.
    pub rank: usize,
    pub pool_id: String,
    pub pool: UnifiedPool,
    pub score: Score,
    pub mode: RiskMode,
    pub commentary: String,
    /// Rough odds (0–1) that the pool keeps its current yield over the holding period.
    pub probability: f64,
    pub estimated_gain_pct: f64,
    pub estimated_gain_usd: f64,
    pub entry_conditions: Vec<String>,
    pub exit_conditions: Vec<String>,
    pub risks: Vec<String>,
    pub created_at_ms: u64,
    pub valid_until_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_id_is_case_insensitive() {
        assert_eq!(pool_id("Base", "0xABCdef"), pool_id("base", "0xabcDEF"));
        assert_eq!(pool_id("base", "0xAB"), "base:0xab");
    }

    #[test]
    fn risk_mode_parses_from_config_strings() {
        assert_eq!("Aggressive".parse::<RiskMode>(), Ok(RiskMode::Aggressive));
        assert_eq!(" defensive ".parse::<RiskMode>(), Ok(RiskMode::Defensive));
        assert!("yolo".parse::<RiskMode>().is_err());
    }

    #[test]
    fn risk_tolerance_widens_with_mode() {
        assert!(RiskMode::Defensive.max_risk_penalty() < RiskMode::Normal.max_risk_penalty());
        assert!(RiskMode::Normal.max_risk_penalty() < RiskMode::Aggressive.max_risk_penalty());
    }
}
