//! Consensus aggregation.
//!
//! Folds the current pending predictions for one asset into a single
//! weighted recommendation. Read-only: weights and enablement come from
//! the store, and nothing here writes back — a recommendation is a
//! derived view, recomputed on every call.

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ConsensusSection;
use crate::storage::EngineStore;
use crate::types::{BotVote, ConsensusRecommendation, Direction, LifecycleState, Prediction};

// ---------------------------------------------------------------------------
// Tuning constants
// ---------------------------------------------------------------------------

/// Agreement fraction at which the strong-consensus boost applies.
const STRONG_CONSENSUS_PCT: f64 = 0.70;
const STRONG_CONSENSUS_BOOST: f64 = 1.06;

/// Contrarian-cluster boost: this many designated contrarian bots on
/// the winning side.
const CONTRARIAN_MIN_AGREEING: usize = 3;
const CONTRARIAN_BOOST: f64 = 1.08;

/// Advanced-model boost: this many designated advanced bots on the
/// winning side.
const ADVANCED_MIN_AGREEING: usize = 2;
const ADVANCED_BOOST: f64 = 1.05;

// ---------------------------------------------------------------------------
// Pure core
// ---------------------------------------------------------------------------

/// One eligible prediction paired with the bot's effective weight.
#[derive(Debug, Clone)]
pub struct EligibleVote {
    pub prediction: Prediction,
    pub weight: f64,
}

/// Aggregate eligible votes into a recommendation. Returns `None` when
/// there are no votes.
///
/// Tie-break policy (fixed, documented): equal weighted sums go to the
/// side with more raw votes; still equal goes Short — when the room is
/// split, the engine prefers the defensive stance.
pub fn aggregate(
    asset_symbol: &str,
    votes: &[EligibleVote],
    contrarian_bots: &[String],
    advanced_bots: &[String],
) -> Option<ConsensusRecommendation> {
    if votes.is_empty() {
        return None;
    }

    let mut long_score = 0.0;
    let mut short_score = 0.0;
    let mut long_count = 0usize;
    let mut short_count = 0usize;

    for vote in votes {
        let score = vote.prediction.confidence * vote.weight;
        match vote.prediction.direction {
            Direction::Long => {
                long_score += score;
                long_count += 1;
            }
            Direction::Short => {
                short_score += score;
                short_count += 1;
            }
        }
    }

    let winner = if long_score > short_score {
        Direction::Long
    } else if short_score > long_score {
        Direction::Short
    } else if long_count > short_count {
        Direction::Long
    } else {
        Direction::Short
    };

    let breakdown: Vec<BotVote> = votes
        .iter()
        .map(|v| BotVote {
            bot_name: v.prediction.bot_name.clone(),
            direction: v.prediction.direction,
            confidence: v.prediction.confidence,
            weight: v.weight,
            weighted_score: v.prediction.confidence * v.weight,
            agreed: v.prediction.direction == winner,
        })
        .collect();

    let agreeing: Vec<&EligibleVote> = votes
        .iter()
        .filter(|v| v.prediction.direction == winner)
        .collect();
    let consensus_percent = agreeing.len() as f64 / votes.len() as f64;

    // Base confidence and the price levels are plain means over the
    // winning side; weights decide the winner, not the levels.
    let mean = |f: fn(&Prediction) -> f64| -> f64 {
        agreeing.iter().map(|v| f(&v.prediction)).sum::<f64>() / agreeing.len() as f64
    };
    let mut avg_confidence = mean(|p| p.confidence);
    let avg_entry = mean(|p| p.entry_price);
    let avg_target = mean(|p| p.target_price);
    let avg_stop = mean(|p| p.stop_loss);

    // Sequential boosts, each applied to the already-boosted value,
    // capped at certainty.
    if consensus_percent >= STRONG_CONSENSUS_PCT {
        avg_confidence *= STRONG_CONSENSUS_BOOST;
    }
    let agreeing_in = |names: &[String]| {
        agreeing
            .iter()
            .filter(|v| names.contains(&v.prediction.bot_name))
            .count()
    };
    if agreeing_in(contrarian_bots) >= CONTRARIAN_MIN_AGREEING {
        avg_confidence *= CONTRARIAN_BOOST;
    }
    if agreeing_in(advanced_bots) >= ADVANCED_MIN_AGREEING {
        avg_confidence *= ADVANCED_BOOST;
    }
    avg_confidence = avg_confidence.min(1.0);

    Some(ConsensusRecommendation {
        asset_symbol: asset_symbol.to_string(),
        direction: winner,
        avg_confidence,
        avg_entry,
        avg_target,
        avg_stop,
        consensus_percent,
        long_bot_count: long_count,
        short_bot_count: short_count,
        breakdown,
    })
}

// ---------------------------------------------------------------------------
// Store-backed aggregator
// ---------------------------------------------------------------------------

/// Consensus aggregator wired to the engine store for weights,
/// enablement, and overrides.
pub struct ConsensusAggregator {
    store: Arc<dyn EngineStore>,
    config: ConsensusSection,
}

impl ConsensusAggregator {
    pub fn new(store: Arc<dyn EngineStore>, config: ConsensusSection) -> Self {
        Self { store, config }
    }

    /// Build the recommendation for one asset from the given candidate
    /// predictions. Malformed predictions and disabled bots are skipped
    /// (logged), never fatal.
    pub async fn recommend(
        &self,
        asset_symbol: &str,
        candidates: &[Prediction],
    ) -> Result<Option<ConsensusRecommendation>> {
        let now = Utc::now();
        let mut votes = Vec::new();

        for p in candidates {
            if p.asset_symbol != asset_symbol || p.is_resolved() {
                continue;
            }
            if let Err(reason) = p.validate() {
                warn!(
                    prediction = %p.id,
                    bot = %p.bot_name,
                    reason = %reason,
                    "Skipping malformed prediction"
                );
                continue;
            }

            let record = self.store.get_weight(&p.bot_name, p.market_regime).await?;
            let active_override = self.store.get_override(&p.bot_name).await?;

            // A bot with no record yet votes at the neutral default
            // weight; an override still binds it.
            let (state, weight) = match &record {
                Some(rec) => (
                    rec.lifecycle_state(active_override.as_ref(), now),
                    rec.current_weight,
                ),
                None => {
                    let fresh =
                        crate::types::BotWeightRecord::new(&p.bot_name, p.market_regime);
                    (fresh.lifecycle_state(active_override.as_ref(), now), 1.0)
                }
            };

            match state {
                LifecycleState::Enabled | LifecycleState::EnabledOverride => {
                    votes.push(EligibleVote {
                        prediction: p.clone(),
                        weight,
                    });
                }
                LifecycleState::DisabledCooldown | LifecycleState::DisabledOverride => {
                    debug!(
                        bot = %p.bot_name,
                        regime = %p.market_regime,
                        state = %state,
                        "Excluding disabled bot from consensus"
                    );
                }
            }
        }

        let recommendation = aggregate(
            asset_symbol,
            &votes,
            &self.config.contrarian_bots,
            &self.config.advanced_bots,
        );
        match &recommendation {
            Some(rec) => info!(votes = votes.len(), "Consensus: {rec}"),
            None => debug!(asset = %asset_symbol, "No eligible votes for consensus"),
        }
        Ok(recommendation)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
