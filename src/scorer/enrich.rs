use crate::types::{PoolHistoryPoint, PoolSnapshot, PoolType, UnifiedPool};

const MS_PER_DAY: f64 = 86_400_000.0;
const HOURS_PER_YEAR: f64 = 24.0 * 365.0;

const STABLES: &[&str] = &[
    "USDC", "USDT", "DAI", "USDE", "FRAX", "LUSD", "USDBC", "USDC.E", "PYUSD", "TUSD", "FDUSD",
    "CRVUSD", "GHO",
];

const MAJORS: &[&str] = &[
    "ETH", "WETH", "STETH", "WSTETH", "RETH", "CBETH", "WEETH", "BTC", "WBTC", "CBBTC", "TBTC",
    "SOL", "WSOL", "JITOSOL", "MSOL", "BNB", "WBNB", "POL", "WPOL", "MATIC", "AVAX", "WAVAX",
    "ARB", "OP",
];

/// Tokens in the same group track the same underlying asset.
const CORRELATED_GROUPS: &[&[&str]] = &[
    &["ETH", "WETH", "STETH", "WSTETH", "RETH", "CBETH", "WEETH"],
    &["BTC", "WBTC", "CBBTC", "TBTC"],
    &["SOL", "WSOL", "JITOSOL", "MSOL"],
];

/// TVL below this gets a warning.
const LOW_LIQUIDITY_USD: f64 = 100_000.0;
const TVL_DROP_WARN_PCT: f64 = -20.0;
const DIVERGENCE_WARN_PCT: f64 = 2.0;
const NEW_POOL_DAYS: f64 = 7.0;
const HIGH_APR_WARN_PCT: f64 = 200.0;

pub fn classify(token0: &str, token1: &str) -> PoolType {
    let a = token0.to_uppercase();
    let b = token1.to_uppercase();
    let is_stable = |s: &str| STABLES.contains(&s);
    let is_major = |s: &str| MAJORS.contains(&s);

    if is_stable(&a) && is_stable(&b) {
        PoolType::Stable
    } else if CORRELATED_GROUPS
        .iter()
        .any(|g| g.contains(&a.as_str()) && g.contains(&b.as_str()))
    {
        PoolType::Correlated
    } else if (is_stable(&a) || is_major(&a)) && (is_stable(&b) || is_major(&b)) {
        PoolType::Bluechip
    } else {
        PoolType::Volatile
    }
}

/// Used when neither the provider nor history gives a volatility figure.
fn assumed_volatility(pool_type: PoolType) -> f64 {
    match pool_type {
        PoolType::Stable => 0.02,
        PoolType::Correlated => 0.10,
        PoolType::Bluechip => 0.60,
        PoolType::Volatile => 1.00,
    }
}

/// Build the unified view of `snapshot`. `previous` is the pool currently stored under the
/// same id, if any; TVL change and price divergence are measured against it.
pub fn enrich(snapshot: &PoolSnapshot, previous: Option<&UnifiedPool>, now_ms: u64) -> UnifiedPool {
    let mut warnings = Vec::new();
    let tvl = snapshot.tvl_usd;

    let fee_apr = if tvl > 0.0 {
        snapshot.fees_24h / tvl * 365.0 * 100.0
    } else {
        0.0
    };
    let incentive_apr = snapshot.incentive_apr.unwrap_or(0.0).max(0.0);
    let total_apr = fee_apr + incentive_apr;

    let pool_type = classify(&snapshot.token0.symbol, &snapshot.token1.symbol);

    let volatility = match (snapshot.volatility, snapshot.price_change_24h_pct) {
        (Some(v), _) if v.is_finite() => v.max(0.0),
        (_, Some(change)) if change.is_finite() => change.abs() * 365f64.sqrt() / 100.0,
        _ => {
            warnings.push(format!("volatility unknown, assuming {pool_type} profile"));
            assumed_volatility(pool_type)
        }
    };
    let adjusted_apr = total_apr * (1.0 - volatility.min(1.0) * 0.5);

    let capital_efficiency = if tvl > 0.0 { snapshot.volume_24h / tvl } else { 0.0 };

    let tvl_change_pct = previous
        .map(|p| p.snapshot.tvl_usd)
        .filter(|prev| *prev > 0.0)
        .map(|prev| (tvl - prev) / prev * 100.0);

    let price_divergence_pct = previous
        .filter(|p| p.snapshot.provider != snapshot.provider)
        .and_then(|p| divergence_pct(snapshot.price_usd, p.snapshot.price_usd));

    let age_days = snapshot
        .created_at_ms
        .map(|created| now_ms.saturating_sub(created) as f64 / MS_PER_DAY);

    if tvl < LOW_LIQUIDITY_USD {
        warnings.push(format!("low liquidity (${tvl:.0})"));
    }
    if let Some(change) = tvl_change_pct.filter(|c| *c <= TVL_DROP_WARN_PCT) {
        warnings.push(format!("TVL dropped {:.1}% since last scan", change.abs()));
    }
    if let Some(div) = price_divergence_pct.filter(|d| *d >= DIVERGENCE_WARN_PCT) {
        warnings.push(divergence_warning(div));
    }
    if age_days.is_some_and(|d| d < NEW_POOL_DAYS) {
        warnings.push("pool is less than a week old".to_string());
    }
    if total_apr > HIGH_APR_WARN_PCT {
        warnings.push(format!("APR of {total_apr:.0}% is unlikely to last"));
    }
    if snapshot.price_usd <= 0.0 {
        warnings.push("no USD price".to_string());
    }

    let health_score = health_score(tvl, capital_efficiency, age_days, pool_type);

    UnifiedPool {
        id: snapshot.id(),
        snapshot: snapshot.clone(),
        fee_apr,
        incentive_apr,
        total_apr,
        adjusted_apr,
        volatility,
        health_score,
        capital_efficiency,
        is_bluechip: pool_type != PoolType::Volatile,
        pool_type,
        warnings,
        tvl_change_pct,
        price_divergence_pct,
        age_days,
    }
}

/// Measure the pool's price against an independent source's figure for the same token.
/// Replaces any divergence derived from the previous snapshot; an unusable reference
/// leaves the pool untouched.
pub fn apply_reference_price(pool: &mut UnifiedPool, reference_usd: f64) {
    let Some(div) = divergence_pct(pool.snapshot.price_usd, reference_usd) else {
        return;
    };
    pool.warnings.retain(|w| !w.starts_with(DIVERGENCE_WARNING));
    if div >= DIVERGENCE_WARN_PCT {
        pool.warnings.push(divergence_warning(div));
    }
    pool.price_divergence_pct = Some(div);
}

const DIVERGENCE_WARNING: &str = "providers disagree on price";

fn divergence_warning(div: f64) -> String {
    format!("{DIVERGENCE_WARNING} by {div:.1}%")
}

/// |price − reference| / reference, in percent. None unless both are positive.
fn divergence_pct(price: f64, reference: f64) -> Option<f64> {
    (price.is_finite() && reference.is_finite() && price > 0.0 && reference > 0.0)
        .then(|| (price - reference).abs() / reference * 100.0)
}

/// Quick 0–100 health figure for display; the scoring engine does the full breakdown.
fn health_score(tvl: f64, capital_efficiency: f64, age_days: Option<f64>, pool_type: PoolType) -> f64 {
    let liquidity = if tvl > 0.0 {
        ((tvl.log10() - 4.0) / 4.0).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let efficiency = capital_efficiency.clamp(0.0, 1.0);
    let age = age_days.map_or(0.25, |d| (d / 180.0).clamp(0.0, 1.0));
    let composition = match pool_type {
        PoolType::Stable | PoolType::Correlated | PoolType::Bluechip => 1.0,
        PoolType::Volatile => 0.25,
    };
    (liquidity * 40.0 + efficiency * 20.0 + age * 20.0 + composition * 20.0).clamp(0.0, 100.0)
}

/// Annualized realized volatility from hourly closes, as a fraction.
/// None with fewer than two usable returns.
pub fn annualized_volatility(history: &[PoolHistoryPoint]) -> Option<f64> {
    let returns: Vec<f64> = history
        .windows(2)
        .filter(|w| w[0].close_usd > 0.0 && w[1].close_usd > 0.0)
        .map(|w| (w[1].close_usd / w[0].close_usd).ln())
        .filter(|r| r.is_finite())
        .collect();
    if returns.len() < 2 {
        return None;
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(variance.sqrt() * HOURS_PER_YEAR.sqrt())
}
