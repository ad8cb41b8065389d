use std::cmp::Ordering;

use crate::config::RecommendConfig;
use crate::types::{PoolType, Recommendation, RiskMode, ScoredPool};

/// Build the ranked recommendation list. Pure: inputs are only read.
///
/// Suspect pools, and pools whose raw risk penalty exceeds what `mode` tolerates, are
/// excluded. Ranking is total score desc, then TVL desc, then pool id asc.
pub fn generate_top_n(
    scored: &[ScoredPool],
    mode: RiskMode,
    capital_usd: f64,
    cfg: &RecommendConfig,
    now_ms: u64,
) -> Vec<Recommendation> {
    let mut eligible: Vec<&ScoredPool> = scored
        .iter()
        .filter(|sp| !sp.score.is_suspect)
        .filter(|sp| raw_risk(sp) <= mode.max_risk_penalty())
        .collect();

    eligible.sort_by(|a, b| rank_order(a, b));

    let valid_until_ms = now_ms + cfg.validity.as_millis() as u64;
    eligible
        .into_iter()
        .take(cfg.top_n)
        .enumerate()
        .map(|(i, sp)| {
            let estimated_gain_pct = sp.pool.adjusted_apr * cfg.holding_days / 365.0;
            Recommendation {
                rank: i + 1,
                pool_id: sp.pool.id.clone(),
                pool: sp.pool.clone(),
                score: sp.score.clone(),
                mode,
                commentary: commentary(sp),
                probability: probability(sp),
                estimated_gain_pct,
                estimated_gain_usd: capital_usd * estimated_gain_pct / 100.0,
                entry_conditions: entry_conditions(sp),
                exit_conditions: exit_conditions(sp, mode, cfg),
                risks: risks(sp),
                created_at_ms: now_ms,
                valid_until_ms,
            }
        })
        .collect()
}

fn rank_order(a: &ScoredPool, b: &ScoredPool) -> Ordering {
    b.score
        .total
        .total_cmp(&a.score.total)
        .then_with(|| b.pool.snapshot.tvl_usd.total_cmp(&a.pool.snapshot.tvl_usd))
        .then_with(|| a.pool.id.cmp(&b.pool.id))
}

/// Penalty points before weight scaling, comparable with `RiskMode::max_risk_penalty`.
fn raw_risk(sp: &ScoredPool) -> f64 {
    let b = &sp.score.breakdown;
    b.volatility_penalty + b.liquidity_drop_penalty + b.inconsistency_penalty + b.divergence_penalty
}

fn commentary(sp: &ScoredPool) -> String {
    let p = &sp.pool;
    let s = &p.snapshot;
    format!(
        "{} on {} ({}): score {:.0}/100, {:.1}% risk-adjusted APR on ${:.0} TVL, {} pool.",
        s.pair_label(),
        s.protocol,
        s.chain,
        sp.score.total,
        p.adjusted_apr,
        s.tvl_usd,
        p.pool_type,
    )
}

/// Rough odds that the pool keeps its yield over the holding period.
fn probability(sp: &ScoredPool) -> f64 {
    let mut p = 0.35 + 0.5 * (sp.score.total / 100.0);
    if matches!(sp.pool.pool_type, PoolType::Stable | PoolType::Correlated) {
        p += 0.05;
    }
    p -= 0.02 * sp.pool.warnings.len() as f64;
    p.clamp(0.05, 0.95)
}

fn entry_conditions(sp: &ScoredPool) -> Vec<String> {
    let p = &sp.pool;
    let s = &p.snapshot;
    let mut out = vec![
        format!("TVL still above ${:.0}", s.tvl_usd * 0.8),
        format!("{} price within 2% of ${:.4}", s.token0.symbol, s.price_usd),
    ];
    if sp.score.breakdown.volume_consistency < 4.0 {
        out.push("1h volume back in line with the 24h run-rate".to_string());
    }
    if p.price_divergence_pct.is_some() {
        out.push("Price confirmed across providers".to_string());
    }
    out
}

fn exit_conditions(sp: &ScoredPool, mode: RiskMode, cfg: &RecommendConfig) -> Vec<String> {
    let stop_pct = match mode {
        RiskMode::Defensive => 5.0,
        RiskMode::Normal => 10.0,
        RiskMode::Aggressive => 20.0,
    };
    vec![
        "TVL falls more than 25% from entry".to_string(),
        format!(
            "Risk-adjusted APR drops below {:.1}%",
            sp.pool.adjusted_apr * 0.5
        ),
        format!("Price moves more than {stop_pct:.0}% against entry"),
        format!(
            "Re-evaluate after {}h",
            cfg.validity.as_secs() / 3_600
        ),
    ]
}

fn risks(sp: &ScoredPool) -> Vec<String> {
    let b = &sp.score.breakdown;
    let p = &sp.pool;
    let mut out = Vec::new();

    if b.volatility_penalty >= 5.0 {
        out.push(format!(
            "High volatility ({:.0}% annualized), impermanent loss likely",
            p.volatility * 100.0
        ));
    }
    if b.liquidity_drop_penalty > 0.0 {
        out.push(format!(
            "Liquidity contracting ({:.1}% since last scan)",
            p.tvl_change_pct.unwrap_or_default()
        ));
    }
    if b.inconsistency_penalty > 0.0 {
        out.push("Provider fields are inconsistent".to_string());
    }
    if b.divergence_penalty > 0.0 {
        out.push("Price sources disagree".to_string());
    }
    if p.pool_type == PoolType::Volatile {
        out.push("Non-bluechip pair".to_string());
    }
    out.extend(p.warnings.iter().cloned());

    if out.is_empty() {
        out.push("No elevated risk factors".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoringConfig;
    use crate::providers::mock::snapshot;
    use crate::scorer::{enrich, score_pool};

    const NOW: u64 = 1_700_000_000_000;

    fn scored(address: &str, tvl: f64, volume: f64) -> ScoredPool {
        let mut snap = snapshot("base", address, tvl, volume);
        snap.fetched_at_ms = NOW;
        let pool = enrich(&snap, None, NOW);
        let score = score_pool(&pool, &ScoringConfig::default(), NOW);
        ScoredPool { pool, score }
    }

    fn cfg() -> RecommendConfig {
        RecommendConfig::default()
    }

    #[test]
    fn ranks_by_total_then_tvl_then_id() {
        let mut a = scored("0xA", 1_000_000.0, 100_000.0);
        let mut b = scored("0xB", 2_000_000.0, 100_000.0);
        let mut c = scored("0xC", 2_000_000.0, 100_000.0);
        let mut d = scored("0xD", 500_000.0, 100_000.0);
        a.score.total = 60.0;
        b.score.total = 60.0;
        c.score.total = 60.0;
        d.score.total = 90.0;

        let recs = generate_top_n(&[a, c, b, d], RiskMode::Aggressive, 10_000.0, &cfg(), NOW);
        let ids: Vec<&str> = recs.iter().map(|r| r.pool_id.as_str()).collect();
        assert_eq!(ids, vec!["base:0xd", "base:0xb", "base:0xc"]);
        assert_eq!(recs.iter().map(|r| r.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn suspect_pool_is_excluded_even_with_top_score() {
        let mut suspect = scored("0xA", 1_000_000.0, 100_000.0);
        suspect.score.total = 99.0;
        suspect.score.is_suspect = true;
        let fine = scored("0xB", 1_000_000.0, 100_000.0);

        let recs = generate_top_n(&[suspect, fine], RiskMode::Aggressive, 10_000.0, &cfg(), NOW);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].pool_id, "base:0xb");
    }

    #[test]
    fn zero_tvl_pool_with_fees_never_reaches_the_ranking() {
        let empty = scored("0xEmpty", 0.0, 500_000.0);
        assert!(empty.score.is_suspect);
        assert!(empty.score.suspect_reason.is_some());
        let fine = scored("0xB", 1_000_000.0, 100_000.0);
        assert!(!fine.score.is_suspect);

        // Aggressive tolerates every risk penalty, so only the suspect flag can drop it.
        let recs = generate_top_n(&[empty, fine], RiskMode::Aggressive, 10_000.0, &cfg(), NOW);
        let ids: Vec<&str> = recs.iter().map(|r| r.pool_id.as_str()).collect();
        assert_eq!(ids, vec!["base:0xb"]);
    }

    #[test]
    fn defensive_mode_drops_high_risk_pools() {
        let mut risky = scored("0xA", 1_000_000.0, 100_000.0);
        risky.score.breakdown.volatility_penalty = 10.0;
        let calm = scored("0xB", 1_000_000.0, 100_000.0);

        let defensive = generate_top_n(
            &[risky.clone(), calm.clone()],
            RiskMode::Defensive,
            10_000.0,
            &cfg(),
            NOW,
        );
        assert_eq!(defensive.len(), 1);
        assert_eq!(defensive[0].pool_id, "base:0xb");

        let aggressive = generate_top_n(&[risky, calm], RiskMode::Aggressive, 10_000.0, &cfg(), NOW);
        assert_eq!(aggressive.len(), 2);
    }

    #[test]
    fn gain_comes_from_capital_apr_and_holding_period() {
        let mut sp = scored("0xA", 1_000_000.0, 100_000.0);
        sp.pool.adjusted_apr = 36.5;
        let recs = generate_top_n(&[sp], RiskMode::Aggressive, 10_000.0, &cfg(), NOW);

        // 36.5% APR over 7 days = 0.7%
        assert!((recs[0].estimated_gain_pct - 0.7).abs() < 1e-9);
        assert!((recs[0].estimated_gain_usd - 70.0).abs() < 1e-9);
        assert_eq!(recs[0].valid_until_ms, NOW + 6 * 3_600_000);
        assert!(!recs[0].entry_conditions.is_empty());
        assert!(!recs[0].exit_conditions.is_empty());
        assert!(!recs[0].risks.is_empty());
        assert!((0.05..=0.95).contains(&recs[0].probability));
    }

    #[test]
    fn respects_top_n_and_leaves_input_untouched() {
        let pools: Vec<ScoredPool> = (0..10)
            .map(|n| scored(&format!("0x{n}"), 1_000_000.0 + n as f64, 100_000.0))
            .collect();
        let before = pools.clone();
        let recs = generate_top_n(&pools, RiskMode::Aggressive, 10_000.0, &cfg(), NOW);
        assert_eq!(recs.len(), 3);
        assert_eq!(pools, before);
    }

    #[test]
    fn empty_input_gives_empty_output() {
        assert!(generate_top_n(&[], RiskMode::Normal, 10_000.0, &cfg(), NOW).is_empty());
    }
}
