//! QUORUM — Adaptive Bot-Weighting and Consensus Engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the store, and runs the evaluate → train → sweep feedback
//! loop with graceful shutdown. Consensus is recomputed and logged
//! after each evaluation pass for every asset with pending votes.

use anyhow::Result;
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use quorum::config;
use quorum::engine::{ConsensusAggregator, LifecycleManager, OutcomeEvaluator, WeightLearner};
use quorum::marketdata::{PriceFeed, RestFeed};
use quorum::storage::{EngineStore, SqliteStore};
use quorum::types::EngineStatus;

const BANNER: &str = r#"
  ___  _   _  ___  ____  _   _ __  __
 / _ \| | | |/ _ \|  _ \| | | |  \/  |
| | | | | | | | | | |_) | | | | |\/| |
| |_| | |_| | |_| |  _ <| |_| | |  | |
 \__\_\\___/ \___/|_| \_\\___/|_|  |_|

  Adaptive Bot-Weighting & Consensus Engine
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;
    init_logging();

    println!("{BANNER}");
    info!(
        engine_name = %cfg.engine.name,
        evaluate_interval_secs = cfg.engine.evaluate_interval_secs,
        train_interval_secs = cfg.engine.train_interval_secs,
        sweep_interval_secs = cfg.engine.sweep_interval_secs,
        "QUORUM starting up"
    );

    // -- Initialise components -------------------------------------------

    let store: Arc<dyn EngineStore> = Arc::new(SqliteStore::connect(&cfg.database_url()).await?);
    let feed: Arc<dyn PriceFeed> = Arc::new(RestFeed::new(&cfg.market_data)?);

    let aggregator = ConsensusAggregator::new(store.clone(), cfg.consensus.clone());
    let evaluator = OutcomeEvaluator::new(store.clone(), feed, cfg.evaluator.horizon_hours);
    let learner = WeightLearner::new(store.clone(), cfg.learner.clone());
    let lifecycle = LifecycleManager::new(store.clone(), cfg.lifecycle.clone());

    // -- Main loop -------------------------------------------------------

    let mut evaluate_tick =
        tokio::time::interval(Duration::from_secs(cfg.engine.evaluate_interval_secs));
    let mut train_tick =
        tokio::time::interval(Duration::from_secs(cfg.engine.train_interval_secs));
    let mut sweep_tick =
        tokio::time::interval(Duration::from_secs(cfg.engine.sweep_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Entering main loop. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = evaluate_tick.tick() => {
                match evaluator.evaluate_pending().await {
                    Ok(report) => {
                        info!(%report, "Evaluation tick complete");
                        if let Err(e) = log_consensus(&*store, &aggregator).await {
                            error!(error = %e, "Consensus recompute failed — continuing");
                        }
                    }
                    Err(e) => error!(error = %e, "Evaluation tick failed — continuing"),
                }
            }
            _ = train_tick.tick() => {
                match learner.train_all().await {
                    Ok(report) => info!(
                        episodes = report.episodes_trained,
                        avg_reward = report.avg_reward,
                        bots = report.per_bot.len(),
                        "Training tick complete"
                    ),
                    Err(e) => error!(error = %e, "Training tick failed — continuing"),
                }
            }
            _ = sweep_tick.tick() => {
                match lifecycle.sweep().await {
                    Ok(report) => info!(
                        enabled = report.enabled_count,
                        disabled = report.disabled_count,
                        actions = report.actions.len(),
                        "Sweep tick complete"
                    ),
                    Err(e) => error!(error = %e, "Sweep tick failed — continuing"),
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }

        match engine_status(&*store).await {
            Ok(status) => info!(%status, "Engine status"),
            Err(e) => error!(error = %e, "Status snapshot failed — continuing"),
        }
    }

    info!("QUORUM shut down cleanly.");
    Ok(())
}

/// Operational snapshot for the per-tick status line.
async fn engine_status(store: &dyn EngineStore) -> Result<EngineStatus> {
    let weights = store.list_weights().await?;
    let pending = store.list_pending_before(Utc::now()).await?;
    Ok(EngineStatus::from_parts(&weights, pending.len()))
}

/// Recompute and log the consensus for every asset with pending votes.
async fn log_consensus(store: &dyn EngineStore, aggregator: &ConsensusAggregator) -> Result<()> {
    let pending = store.list_pending_before(Utc::now()).await?;
    let assets: BTreeSet<String> = pending.iter().map(|p| p.asset_symbol.clone()).collect();
    for asset in assets {
        if let Some(rec) = aggregator.recommend(&asset, &pending).await? {
            info!("Consensus update: {rec}");
        }
    }
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("quorum=info"));

    let json_logging = std::env::var("QUORUM_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
