mod config;
mod error;
mod providers;
mod radar;
mod recommender;
mod resilience;
mod scorer;
mod services;
mod state;
mod telemetry;
mod types;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::error::Result;
use crate::services::Services;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    let services = Services::build(&cfg)?;

    // --- Provider health ---
    for report in services.orchestrator.health_check_all().await {
        if report.healthy {
            info!(provider = %report.provider, "Provider reachable");
        } else {
            warn!(provider = %report.provider, "Provider health check failed, will rely on fallback");
        }
    }

    // --- Watchlist ---
    if !cfg.watchlist.is_empty() {
        let accepted = services.seed_watchlist(&cfg.watchlist);
        info!(
            configured = cfg.watchlist.len(),
            accepted,
            "Watchlist seeded: {}",
            services.store.watchlist_ids().join(", "),
        );
    }

    info!(
        chains = %cfg.radar.chains.join(","),
        interval_secs = cfg.radar.interval.as_secs(),
        pools_per_chain = cfg.radar.pools_per_chain,
        mode = %cfg.recommend.mode,
        "Radar starting",
    );

    // --- Radar loop ---
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let radar = services.radar.clone();
    let radar_task = tokio::spawn(async move { radar.run(shutdown_rx).await });

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received, stopping radar");
    let _ = shutdown_tx.send(true);
    if let Err(e) = radar_task.await {
        warn!("Radar task ended abnormally: {e}");
    }

    for rec in services.store.get_recommendations().iter() {
        info!(
            rank = rec.rank,
            pool_id = %rec.pool_id,
            score = rec.score.total,
            gain_usd = rec.estimated_gain_usd,
            "{}",
            rec.commentary,
        );
    }

    services.shutdown();
    Ok(())
}
