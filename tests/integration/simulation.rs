//! Full feedback-loop simulation.
//!
//! Drives predict → evaluate → train → sweep end to end against the
//! in-memory store and the mock feed, and checks that consensus
//! actually shifts toward the bots that were right.

use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use quorum::config::{ConsensusSection, LearnerSection, LifecycleSection};
use quorum::engine::{ConsensusAggregator, LifecycleManager, OutcomeEvaluator, WeightLearner};
use quorum::marketdata::PriceFeed;
use quorum::storage::{EngineStore, SqliteStore};
use quorum::types::{
    AdminOverride, Direction, MarketRegime, OutcomeStatus, OverrideType, Prediction,
};

use crate::mock_feed::MockFeed;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn make_prediction(
    bot: &str,
    symbol: &str,
    direction: Direction,
    confidence: f64,
    hours_ago: i64,
) -> Prediction {
    let (target, stop) = match direction {
        Direction::Long => (105.0, 97.0),
        Direction::Short => (95.0, 103.0),
    };
    Prediction {
        id: Uuid::new_v4(),
        bot_name: bot.to_string(),
        asset_symbol: symbol.to_string(),
        direction,
        entry_price: 100.0,
        target_price: target,
        stop_loss: stop,
        confidence,
        market_regime: MarketRegime::Bull,
        created_at: Utc::now() - Duration::hours(hours_ago),
        outcome_status: None,
        outcome_price: None,
        profit_loss_pct: None,
    }
}

fn consensus_cfg() -> ConsensusSection {
    ConsensusSection {
        contrarian_bots: Vec::new(),
        advanced_bots: Vec::new(),
    }
}

fn learner_cfg() -> LearnerSection {
    LearnerSection {
        learning_rate: 0.1,
        discount: 0.95,
        weight_sensitivity: 0.1,
        min_weight: 0.3,
        max_weight: 2.0,
    }
}

fn lifecycle_cfg() -> LifecycleSection {
    LifecycleSection {
        disable_min_predictions: 20,
        disable_threshold: 0.35,
        poor_performance_streak: 3,
        cooldown_days: 7,
        enable_min_predictions: 10,
        enable_threshold: 0.60,
    }
}

async fn store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::connect_in_memory().await.unwrap())
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_feedback_loop_shifts_consensus_toward_accurate_bot() {
    let store = store().await;
    let feed = Arc::new(MockFeed::new());
    // Price rallies: hits the 105 long target and the 103 short stop.
    feed.set_path("BTC-USD", &[101.0, 103.0, 106.0]);

    let aggregator = ConsensusAggregator::new(store.clone(), consensus_cfg());
    let evaluator = OutcomeEvaluator::new(
        store.clone(),
        feed.clone() as Arc<dyn PriceFeed>,
        1,
    );
    let learner = WeightLearner::new(store.clone(), learner_cfg());

    let long_bot = make_prediction("trend-rider", "BTC-USD", Direction::Long, 0.6, 3);
    let short_bot = make_prediction("knife-catcher", "BTC-USD", Direction::Short, 0.9, 3);
    store.insert_prediction(&long_bot).await.unwrap();
    store.insert_prediction(&short_bot).await.unwrap();

    // Untrained weights: the louder bot wins.
    let pending = store.list_pending_before(Utc::now()).await.unwrap();
    let rec = aggregator
        .recommend("BTC-USD", &pending)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rec.direction, Direction::Short);

    // Outcomes arrive: the long was right, the short stopped out.
    let report = evaluator.evaluate_pending().await.unwrap();
    assert_eq!(report.resolved, 2);
    assert_eq!(report.per_bot["trend-rider"].successes, 1);
    assert_eq!(report.per_bot["knife-catcher"].failures, 1);

    let resolved = store.get_prediction(long_bot.id).await.unwrap().unwrap();
    assert_eq!(resolved.outcome_status, Some(OutcomeStatus::Success));
    assert!(resolved.profit_loss_pct.unwrap() > 0.0);

    // Training bridges those outcomes into the weights.
    let report = learner.train_all().await.unwrap();
    assert_eq!(report.episodes_trained, 2);

    let winner = store
        .get_weight("trend-rider", MarketRegime::Bull)
        .await
        .unwrap()
        .unwrap();
    let loser = store
        .get_weight("knife-catcher", MarketRegime::Bull)
        .await
        .unwrap()
        .unwrap();
    assert!(winner.current_weight > 1.0);
    assert!(loser.current_weight < 1.0);
    assert!(!store
        .list_weight_changes("trend-rider")
        .await
        .unwrap()
        .is_empty());

    // Same disagreement again: consensus now follows the proven bot
    // even though the other one still shouts louder.
    store
        .insert_prediction(&make_prediction(
            "trend-rider",
            "BTC-USD",
            Direction::Long,
            0.6,
            0,
        ))
        .await
        .unwrap();
    store
        .insert_prediction(&make_prediction(
            "knife-catcher",
            "BTC-USD",
            Direction::Short,
            0.9,
            0,
        ))
        .await
        .unwrap();
    let pending = store.list_pending_before(Utc::now()).await.unwrap();
    let rec = aggregator
        .recommend("BTC-USD", &pending)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rec.direction, Direction::Long);
}

#[tokio::test]
async fn test_overlapping_evaluation_counts_once() {
    let store = store().await;
    let feed = Arc::new(MockFeed::new());
    feed.set_path("ETH-USD", &[106.0]);

    let p = make_prediction("alpha", "ETH-USD", Direction::Long, 0.8, 3);
    store.insert_prediction(&p).await.unwrap();

    let evaluator = OutcomeEvaluator::new(store.clone(), feed as Arc<dyn PriceFeed>, 1);
    let first = evaluator.evaluate_pending().await.unwrap();
    let second = evaluator.evaluate_pending().await.unwrap();
    assert_eq!(first.resolved, 1);
    assert_eq!(second.resolved, 0);

    // One resolution, one count — no matter how many passes ran.
    let rec = store
        .get_weight("alpha", MarketRegime::Bull)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rec.total_predictions, 1);
    assert_eq!(rec.successful, 1);
}

#[tokio::test]
async fn test_feed_outage_leaves_predictions_pending() {
    let store = store().await;
    let feed = Arc::new(MockFeed::new());
    feed.set_path("BTC-USD", &[106.0]);
    feed.set_error("simulated provider outage");

    let p = make_prediction("alpha", "BTC-USD", Direction::Long, 0.8, 3);
    store.insert_prediction(&p).await.unwrap();

    let evaluator = OutcomeEvaluator::new(
        store.clone(),
        feed.clone() as Arc<dyn PriceFeed>,
        1,
    );
    let report = evaluator.evaluate_pending().await.unwrap();
    assert_eq!(report.resolved, 0);
    assert_eq!(report.still_pending, 1);

    // Recovery on the next pass.
    feed.clear_error();
    let report = evaluator.evaluate_pending().await.unwrap();
    assert_eq!(report.resolved, 1);
}

#[tokio::test]
async fn test_override_round_trip_gates_consensus() {
    let store = store().await;
    let aggregator = ConsensusAggregator::new(store.clone(), consensus_cfg());
    let lifecycle = LifecycleManager::new(store.clone(), lifecycle_cfg());

    store
        .ensure_weight("alpha", MarketRegime::Bull)
        .await
        .unwrap();
    let pending = vec![make_prediction("alpha", "BTC-USD", Direction::Long, 0.8, 0)];

    // Healthy bot votes.
    assert!(aggregator
        .recommend("BTC-USD", &pending)
        .await
        .unwrap()
        .is_some());

    // Force-disabled bot does not.
    lifecycle
        .apply_override(&AdminOverride {
            bot_name: "alpha".to_string(),
            override_type: OverrideType::ForceDisable,
            reason: "incident response".to_string(),
            expires_at: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    assert!(aggregator
        .recommend("BTC-USD", &pending)
        .await
        .unwrap()
        .is_none());

    // Removing the override restores the vote.
    lifecycle.remove_override("alpha").await.unwrap();
    assert!(aggregator
        .recommend("BTC-USD", &pending)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_persistently_poor_bot_is_benched_and_excluded() {
    let store = store().await;
    let aggregator = ConsensusAggregator::new(store.clone(), consensus_cfg());
    let lifecycle = LifecycleManager::new(store.clone(), lifecycle_cfg());

    // 25% accuracy over 20 resolved predictions.
    let mut rec = store
        .ensure_weight("cold-hand", MarketRegime::Bull)
        .await
        .unwrap();
    rec.successful = 5;
    rec.failed = 15;
    rec.total_predictions = 20;
    store.update_weight(&rec).await.unwrap();

    // Needs three consecutive poor sweeps before benching.
    lifecycle.sweep().await.unwrap();
    lifecycle.sweep().await.unwrap();
    let pending = vec![make_prediction("cold-hand", "BTC-USD", Direction::Long, 0.9, 0)];
    assert!(aggregator
        .recommend("BTC-USD", &pending)
        .await
        .unwrap()
        .is_some());

    let report = lifecycle.sweep().await.unwrap();
    assert_eq!(report.disabled_count, 1);

    let rec = store
        .get_weight("cold-hand", MarketRegime::Bull)
        .await
        .unwrap()
        .unwrap();
    assert!(!rec.is_enabled);
    assert!(rec.cooldown_until.unwrap() > Utc::now());

    // Benched bots have no vote.
    assert!(aggregator
        .recommend("BTC-USD", &pending)
        .await
        .unwrap()
        .is_none());

    // An operator can put it straight back in the game.
    lifecycle
        .apply_override(&AdminOverride {
            bot_name: "cold-hand".to_string(),
            override_type: OverrideType::ForceEnable,
            reason: "model retrained offline".to_string(),
            expires_at: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    assert!(aggregator
        .recommend("BTC-USD", &pending)
        .await
        .unwrap()
        .is_some());
}
