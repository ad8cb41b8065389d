use crate::config::ScoringConfig;
use crate::types::{PoolType, RiskMode, Score, ScoreBreakdown, UnifiedPool};

// Raw point scales, which are also the sub-score bands. Sub-scores are rescaled by the
// configured weights afterwards; a weight never lifts a sub-score past its band.
pub const HEALTH_MAX: f64 = 40.0;
pub const RETURN_MAX: f64 = 35.0;
pub const RISK_MAX: f64 = 25.0;

/// 100% of TVL traded per day earns full volume points.
const TARGET_TURNOVER: f64 = 1.0;
/// 0.1% of TVL earned in fees per day earns full fee points.
const TARGET_DAILY_FEE_RATIO: f64 = 0.001;
/// Adjusted APR (percent) that earns full APR points.
const TARGET_APR: f64 = 60.0;
/// Points kept for APR above the implausibility cap.
const CAPPED_APR_POINTS: f64 = 2.0;
const MATURE_POOL_DAYS: f64 = 180.0;

/// Score one unified pool. Pure: same inputs, same score.
pub fn score_pool(pool: &UnifiedPool, cfg: &ScoringConfig, now_ms: u64) -> Score {
    let suspect_reason = suspect_reason(pool, cfg, now_ms);
    let breakdown = breakdown(pool, cfg);

    let health_raw = breakdown.liquidity
        + breakdown.liquidity_stability
        + breakdown.pool_age
        + breakdown.volume_consistency
        + breakdown.composition;
    let returns_raw = breakdown.volume_ratio + breakdown.fee_efficiency + breakdown.apr;
    let risk_raw = breakdown.volatility_penalty
        + breakdown.liquidity_drop_penalty
        + breakdown.inconsistency_penalty
        + breakdown.divergence_penalty;

    let health = (health_raw / HEALTH_MAX * cfg.health_weight).clamp(0.0, HEALTH_MAX);
    let returns = (returns_raw / RETURN_MAX * cfg.return_weight).clamp(0.0, RETURN_MAX);
    let risk = (risk_raw / RISK_MAX * cfg.risk_weight).clamp(0.0, RISK_MAX);
    let total = (health + returns - risk).clamp(0.0, 100.0);
    let total = if total.is_finite() { total } else { 0.0 };

    let recommended_mode = if total >= cfg.aggressive_min {
        RiskMode::Aggressive
    } else if total >= cfg.normal_min {
        RiskMode::Normal
    } else {
        RiskMode::Defensive
    };

    Score {
        pool_id: pool.id.clone(),
        total,
        health,
        returns,
        risk,
        breakdown,
        recommended_mode,
        is_suspect: suspect_reason.is_some(),
        suspect_reason,
        scored_at_ms: now_ms,
    }
}

fn breakdown(pool: &UnifiedPool, cfg: &ScoringConfig) -> ScoreBreakdown {
    let s = &pool.snapshot;
    let tvl = s.tvl_usd;

    // --- health ---
    let liquidity = if tvl > 0.0 {
        ((tvl.log10() - 4.0) / 4.0).clamp(0.0, 1.0) * 14.0
    } else {
        0.0
    };
    let liquidity_stability = match pool.tvl_change_pct {
        None => 4.0,
        Some(c) if c >= -5.0 => 8.0,
        Some(c) => (1.0 - (-c - 5.0) / 25.0).clamp(0.0, 1.0) * 8.0,
    };
    let pool_age = pool
        .age_days
        .map_or(2.0, |d| (d / MATURE_POOL_DAYS).clamp(0.0, 1.0) * 6.0);
    let volume_consistency = if s.volume_24h > 0.0 && s.volume_1h > 0.0 {
        // 1h run-rate vs the 24h figure; a 4x gap either way scores zero
        let ratio = s.volume_1h * 24.0 / s.volume_24h;
        (1.0 - ratio.ln().abs() / 4f64.ln()).clamp(0.0, 1.0) * 8.0
    } else {
        0.0
    };
    let composition = match pool.pool_type {
        PoolType::Stable => 4.0,
        PoolType::Correlated => 3.5,
        PoolType::Bluechip => 3.0,
        PoolType::Volatile => 1.0,
    };

    // --- returns ---
    let volume_ratio = (pool.capital_efficiency / TARGET_TURNOVER).clamp(0.0, 1.0) * 13.0;
    let daily_fee_ratio = if tvl > 0.0 { s.fees_24h / tvl } else { 0.0 };
    let fee_efficiency = (daily_fee_ratio / TARGET_DAILY_FEE_RATIO).clamp(0.0, 1.0) * 10.0;
    let apr = if pool.total_apr > cfg.apr_cap {
        CAPPED_APR_POINTS
    } else {
        (pool.adjusted_apr / TARGET_APR).clamp(0.0, 1.0) * 12.0
    };

    // --- risk ---
    let volatility_penalty = pool.volatility.clamp(0.0, 1.0) * 10.0;
    let liquidity_drop_penalty = pool
        .tvl_change_pct
        .filter(|c| *c < 0.0)
        .map_or(0.0, |c| (-c / 30.0).clamp(0.0, 1.0) * 7.0);
    let mut inconsistency_penalty = 0.0;
    if daily_fee_ratio > cfg.fee_tvl_sanity {
        inconsistency_penalty += 2.0;
    }
    if s.volume_1h > s.volume_24h {
        inconsistency_penalty += 2.0;
    }
    let divergence_penalty = pool
        .price_divergence_pct
        .map_or(0.0, |d| (d / 5.0).clamp(0.0, 1.0) * 4.0);

    ScoreBreakdown {
        liquidity,
        liquidity_stability,
        pool_age,
        volume_consistency,
        composition,
        volume_ratio,
        fee_efficiency,
        apr,
        volatility_penalty,
        liquidity_drop_penalty,
        inconsistency_penalty,
        divergence_penalty,
    }
}

/// First reason the pool's inputs cannot be trusted, if any.
fn suspect_reason(pool: &UnifiedPool, cfg: &ScoringConfig, now_ms: u64) -> Option<String> {
    let s = &pool.snapshot;
    let numbers = [
        s.tvl_usd,
        s.volume_24h,
        s.volume_1h,
        s.fees_24h,
        s.price_usd,
        pool.total_apr,
        pool.volatility,
    ];
    if numbers.iter().any(|n| !n.is_finite()) {
        return Some("non-finite numeric field".to_string());
    }
    if s.tvl_usd <= 0.0 && (s.fees_24h > 0.0 || s.volume_24h > 0.0) {
        return Some("zero TVL with non-zero fees or volume".to_string());
    }
    if s.price_usd <= 0.0 {
        return Some("missing USD price".to_string());
    }
    let age_ms = now_ms.saturating_sub(s.fetched_at_ms);
    if age_ms > cfg.max_data_age.as_millis() as u64 {
        return Some(format!("data is {}s old", age_ms / 1_000));
    }
    if s.tvl_usd > 0.0 && s.fees_24h > s.tvl_usd {
        return Some("24h fees exceed TVL".to_string());
    }
    if s.volume_1h > s.volume_24h {
        return Some("1h volume exceeds 24h volume".to_string());
    }
    None
}
