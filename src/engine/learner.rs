//! Reinforcement learner.
//!
//! Replays resolved predictions as Q-learning episodes, maintains one
//! Q-table per bot, and bridges recent episode rewards into the
//! multiplicative weight the aggregator consumes. Every applied update
//! is journaled as an `Episode`, so a table can be rebuilt from the
//! journal and a training pass never consumes the same resolution
//! twice.

use anyhow::Result;
use chrono::Utc;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::LearnerSection;
use crate::storage::{EngineStore, StoreError};
use crate::types::{
    Action, BotTrainingSummary, Episode, MarketRegime, OutcomeStatus, Prediction, QTable,
    StateKey, TrainingReport, WeightChange,
};

/// Multiplicative epsilon decay per training pass.
const EXPLORATION_DECAY: f64 = 0.99;
/// Exploration never drops below this.
const EXPLORATION_FLOOR: f64 = 0.05;
/// Episodes considered when bridging reward into a weight.
const RECENT_REWARD_WINDOW: u32 = 20;
/// Journal fetch bound when deduplicating replay sources.
const REPLAY_JOURNAL_LIMIT: u32 = 100_000;
/// Attempts before giving up on a contended weight-record write.
const MAX_CAS_RETRIES: u32 = 5;

// ---------------------------------------------------------------------------
// Q-table algorithms
// ---------------------------------------------------------------------------

impl QTable {
    /// One Bellman update:
    /// `Q(s,a) += α · (r + γ · max_a' Q(s',a') − Q(s,a))`.
    /// Terminal episodes (no next state) drop the future term.
    pub fn apply_update(
        &mut self,
        state: StateKey,
        action: Action,
        reward: f64,
        next_state: Option<StateKey>,
    ) {
        let future = next_state.map(|s| self.best_value(&s)).unwrap_or(0.0);
        let cell = self
            .values
            .entry(state)
            .or_default()
            .entry(action)
            .or_insert(0.0);
        *cell += self.learning_rate * (reward + self.discount * future - *cell);
        self.episodes_trained += 1;
        self.cumulative_reward += reward;
        self.updated_at = Utc::now();
    }

    /// Decay epsilon toward the floor. Called once per training pass,
    /// not per episode, so exploration shrinks with wall-clock
    /// experience rather than raw episode volume.
    pub fn decay_exploration(&mut self) {
        self.exploration = (self.exploration * EXPLORATION_DECAY).max(EXPLORATION_FLOOR);
    }
}

/// Epsilon-greedy action selection: explore uniformly with probability
/// epsilon, otherwise take the best learned action (unvisited cells
/// read as 0.0, so an empty state explores by construction).
pub fn select_action<R: Rng + ?Sized>(table: &QTable, state: &StateKey, rng: &mut R) -> Action {
    let actions = Action::all();
    if rng.gen::<f64>() < table.exploration {
        return actions[rng.gen_range(0..actions.len())];
    }
    let mut best = actions[0];
    for action in &actions[1..] {
        if table.value(state, action) > table.value(state, &best) {
            best = *action;
        }
    }
    best
}

/// Reward shaping from a resolved outcome. P/L (in percent) is doubled
/// so profitable calls dominate marginal ones, floored at ±1 so every
/// success teaches something and every failure costs something.
pub fn shaped_reward(status: OutcomeStatus, profit_loss_pct: f64) -> f64 {
    match status {
        OutcomeStatus::Success => (profit_loss_pct * 2.0).max(1.0),
        OutcomeStatus::Failed => (profit_loss_pct * 2.0).min(-1.0),
    }
}

/// Bounded monotonic bridge from average recent reward to a weight.
pub fn bridge_weight(avg_recent_reward: f64, cfg: &LearnerSection) -> f64 {
    (1.0 + avg_recent_reward * cfg.weight_sensitivity).clamp(cfg.min_weight, cfg.max_weight)
}

// ---------------------------------------------------------------------------
// Learner
// ---------------------------------------------------------------------------

pub struct WeightLearner {
    store: Arc<dyn EngineStore>,
    config: LearnerSection,
}

impl WeightLearner {
    pub fn new(store: Arc<dyn EngineStore>, config: LearnerSection) -> Self {
        Self { store, config }
    }

    /// Train every bot that has resolved predictions.
    pub async fn train_all(&self) -> Result<TrainingReport> {
        let bots = self.store.list_bots_with_resolutions().await?;
        let mut report = TrainingReport::default();
        let mut reward_sum = 0.0;

        for bot in &bots {
            let summary = self.train_bot(bot).await?;
            report.episodes_trained += summary.episodes_trained;
            report.table_size += summary.table_size;
            reward_sum += summary.avg_reward * summary.episodes_trained as f64;
            report.per_bot.push(summary);
        }
        if report.episodes_trained > 0 {
            report.avg_reward = reward_sum / report.episodes_trained as f64;
        }

        info!(
            bots = bots.len(),
            episodes = report.episodes_trained,
            avg_reward = report.avg_reward,
            "Training pass complete"
        );
        Ok(report)
    }

    /// Replay one bot's unconsumed resolutions into its Q-table, then
    /// refresh the bot's per-regime weights from recent rewards.
    pub async fn train_bot(&self, bot: &str) -> Result<BotTrainingSummary> {
        let mut table = match self.store.load_qtable(bot).await? {
            Some(table) => table,
            None => QTable::new(bot, self.config.learning_rate, self.config.discount),
        };

        // The episode journal says which resolutions were already
        // consumed; replay only the remainder, in order.
        let consumed: HashSet<Uuid> = self
            .store
            .list_episodes(bot, REPLAY_JOURNAL_LIMIT)
            .await?
            .iter()
            .map(|e| e.source_prediction_id)
            .collect();
        let resolved = self.store.list_resolved_for_bot(bot).await?;
        let fresh: Vec<(usize, &Prediction)> = resolved
            .iter()
            .enumerate()
            .filter(|(_, p)| !consumed.contains(&p.id))
            .collect();

        let mut trained = 0usize;
        let mut reward_sum = 0.0;
        for &(idx, p) in &fresh {
            let (Some(status), Some(pnl)) = (p.outcome_status, p.profit_loss_pct) else {
                continue;
            };
            let state = StateKey::from_prediction(p);
            let action = Action::from_prediction(p);
            let reward = shaped_reward(status, pnl);
            // The successor state is the bot's next chronological
            // resolution, even one consumed in an earlier pass; only
            // the newest resolution is terminal for now.
            let next_state = resolved.get(idx + 1).map(StateKey::from_prediction);

            table.apply_update(state, action, reward, next_state);
            self.store
                .append_episode(&Episode {
                    id: Uuid::new_v4(),
                    bot_name: bot.to_string(),
                    state,
                    action,
                    reward,
                    next_state,
                    source_prediction_id: p.id,
                    created_at: Utc::now(),
                })
                .await?;
            trained += 1;
            reward_sum += reward;
        }

        if trained > 0 {
            table.decay_exploration();
        }
        self.store.save_qtable(bot, &table).await?;
        debug!(
            bot = %bot,
            new_episodes = trained,
            cells = table.cell_count(),
            exploration = table.exploration,
            "Q-table updated"
        );

        let new_weight = if trained > 0 {
            self.refresh_weights(bot).await?
        } else {
            None
        };

        Ok(BotTrainingSummary {
            bot_name: bot.to_string(),
            episodes_trained: trained,
            avg_reward: if trained > 0 {
                reward_sum / trained as f64
            } else {
                0.0
            },
            table_size: table.cell_count(),
            new_weight,
        })
    }

    /// Bridge the recent reward window into per-regime weights.
    /// Returns the last weight written, for the training summary.
    async fn refresh_weights(&self, bot: &str) -> Result<Option<f64>> {
        let recent = self.store.list_episodes(bot, RECENT_REWARD_WINDOW).await?;

        let mut per_regime: HashMap<MarketRegime, (f64, usize)> = HashMap::new();
        for episode in &recent {
            let entry = per_regime.entry(episode.state.regime).or_insert((0.0, 0));
            entry.0 += episode.reward;
            entry.1 += 1;
        }

        let mut last_written = None;
        for (regime, (sum, count)) in per_regime {
            let avg = sum / count as f64;
            let target = bridge_weight(avg, &self.config);
            if let Some(weight) = self.write_weight(bot, regime, target, avg).await? {
                last_written = Some(weight);
            }
        }
        Ok(last_written)
    }

    /// CAS-write one regime weight, journaling the change. No-op when
    /// the weight is already at the target.
    async fn write_weight(
        &self,
        bot: &str,
        regime: MarketRegime,
        target: f64,
        avg_reward: f64,
    ) -> Result<Option<f64>> {
        debug_assert!(
            target >= self.config.min_weight && target <= self.config.max_weight,
            "weight {target} escaped bridge bounds"
        );
        for _ in 0..MAX_CAS_RETRIES {
            let mut rec = self.store.ensure_weight(bot, regime).await?;
            let old = rec.current_weight;
            if (old - target).abs() < 1e-9 {
                return Ok(None);
            }
            rec.current_weight = target;
            match self.store.update_weight(&rec).await {
                Ok(_) => {
                    self.store
                        .append_weight_change(&WeightChange {
                            bot_name: bot.to_string(),
                            regime,
                            old_weight: old,
                            new_weight: target,
                            reason: format!(
                                "training pass: avg reward {avg_reward:.3} over last {RECENT_REWARD_WINDOW} episodes"
                            ),
                            timestamp: Utc::now(),
                        })
                        .await?;
                    info!(
                        bot = %bot,
                        regime = %regime,
                        old_weight = old,
                        new_weight = target,
                        avg_reward = avg_reward,
                        "Weight adjusted"
                    );
                    return Ok(Some(target));
                }
                Err(StoreError::VersionConflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        anyhow::bail!("Gave up writing weight for {bot}@{regime} after {MAX_CAS_RETRIES} attempts")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
