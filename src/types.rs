//! Shared types for the QUORUM engine.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that storage, market-data,
//! and engine modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Direction & regime
// ---------------------------------------------------------------------------

/// Predicted price direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// The opposite direction.
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    /// Sign multiplier for P/L calculations (+1 long, -1 short).
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "LONG" => Ok(Direction::Long),
            "SHORT" => Ok(Direction::Short),
            _ => Err(anyhow::anyhow!("Unknown direction: {s}")),
        }
    }
}

/// Coarse market-condition label, produced upstream by the regime
/// classifier and consumed here as an opaque tag. Bot skill is tracked
/// per regime because a bot that reads bull markets well may be noise
/// in a bear market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketRegime {
    Bull,
    Bear,
    Sideways,
}

impl MarketRegime {
    /// All known regimes (useful for iteration).
    pub const ALL: &'static [MarketRegime] = &[
        MarketRegime::Bull,
        MarketRegime::Bear,
        MarketRegime::Sideways,
    ];
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketRegime::Bull => write!(f, "BULL"),
            MarketRegime::Bear => write!(f, "BEAR"),
            MarketRegime::Sideways => write!(f, "SIDEWAYS"),
        }
    }
}

impl std::str::FromStr for MarketRegime {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BULL" | "BULLISH" => Ok(MarketRegime::Bull),
            "BEAR" | "BEARISH" => Ok(MarketRegime::Bear),
            "SIDEWAYS" | "RANGING" | "FLAT" => Ok(MarketRegime::Sideways),
            _ => Err(anyhow::anyhow!("Unknown market regime: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Prediction
// ---------------------------------------------------------------------------

/// Final outcome of a resolved prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeStatus {
    Success,
    Failed,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeStatus::Success => write!(f, "SUCCESS"),
            OutcomeStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl std::str::FromStr for OutcomeStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SUCCESS" => Ok(OutcomeStatus::Success),
            "FAILED" => Ok(OutcomeStatus::Failed),
            _ => Err(anyhow::anyhow!("Unknown outcome status: {s}")),
        }
    }
}

/// A single bot's directional prediction for one asset.
///
/// Created by upstream prediction generators; the outcome fields are
/// owned by the evaluator and written exactly once. Predictions are
/// never deleted — they are the audit trail the learner replays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub id: Uuid,
    pub bot_name: String,
    pub asset_symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub target_price: f64,
    pub stop_loss: f64,
    /// Bot self-reported confidence (0–1).
    pub confidence: f64,
    pub market_regime: MarketRegime,
    pub created_at: DateTime<Utc>,
    /// None while pending; set exactly once by the evaluator.
    pub outcome_status: Option<OutcomeStatus>,
    pub outcome_price: Option<f64>,
    pub profit_loss_pct: Option<f64>,
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} entry={:.4} target={:.4} stop={:.4} conf={:.0}% ({})",
            self.bot_name,
            self.direction,
            self.asset_symbol,
            self.entry_price,
            self.target_price,
            self.stop_loss,
            self.confidence * 100.0,
            self.market_regime,
        )
    }
}

impl Prediction {
    /// Whether this prediction has been resolved.
    pub fn is_resolved(&self) -> bool {
        self.outcome_status.is_some()
    }

    /// Validate the numeric fields. Malformed predictions (non-finite
    /// prices, confidence outside [0,1]) are skipped by the aggregator
    /// and evaluator rather than aborting the batch.
    pub fn validate(&self) -> Result<(), String> {
        for (name, v) in [
            ("entry_price", self.entry_price),
            ("target_price", self.target_price),
            ("stop_loss", self.stop_loss),
        ] {
            if !v.is_finite() || v <= 0.0 {
                return Err(format!("{name} is not a positive finite number: {v}"));
            }
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!("confidence out of range: {}", self.confidence));
        }
        Ok(())
    }

    /// Helper to build a test prediction with sensible defaults.
    #[cfg(test)]
    pub fn sample(bot: &str, direction: Direction, confidence: f64) -> Self {
        let (target, stop) = match direction {
            Direction::Long => (105.0, 97.0),
            Direction::Short => (95.0, 103.0),
        };
        Prediction {
            id: Uuid::new_v4(),
            bot_name: bot.to_string(),
            asset_symbol: "BTC-USD".to_string(),
            direction,
            entry_price: 100.0,
            target_price: target,
            stop_loss: stop,
            confidence,
            market_regime: MarketRegime::Bull,
            created_at: Utc::now() - chrono::Duration::hours(2),
            outcome_status: None,
            outcome_price: None,
            profit_loss_pct: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Bot weight record
// ---------------------------------------------------------------------------

/// Per-(bot, regime) weight and accuracy state.
///
/// Mutated by the learner (weight) and the lifecycle manager
/// (enablement, cooldown, streak); every write goes through the
/// store's version check so concurrent sweeps cannot lose updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotWeightRecord {
    pub bot_name: String,
    pub regime: MarketRegime,
    /// Multiplicative weight applied to this bot's confidence in the
    /// aggregator. Always >= 0; the learner clamps to its configured
    /// bounds before writing.
    pub current_weight: f64,
    /// Lifetime resolution count, never reset.
    pub total_predictions: u64,
    /// Accuracy window counters. Zeroed when the bot is disabled, so
    /// re-enable judges what the bot did after the bench.
    pub successful: u64,
    pub failed: u64,
    /// Consecutive lifecycle sweeps in which the disable condition held.
    pub poor_streak: u32,
    pub is_enabled: bool,
    /// While set and in the future, automatic re-enable is blocked.
    pub cooldown_until: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency token, incremented on every store write.
    pub version: i64,
}

impl fmt::Display for BotWeightRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} w={:.3} acc={:.1}% ({}/{}) streak={} {}",
            self.bot_name,
            self.regime,
            self.current_weight,
            self.accuracy() * 100.0,
            self.successful,
            self.resolved(),
            self.poor_streak,
            if self.is_enabled { "enabled" } else { "disabled" },
        )
    }
}

impl BotWeightRecord {
    /// Initial state for a newly observed bot: enabled, weight 1.0.
    pub fn new(bot_name: &str, regime: MarketRegime) -> Self {
        Self {
            bot_name: bot_name.to_string(),
            regime,
            current_weight: 1.0,
            total_predictions: 0,
            successful: 0,
            failed: 0,
            poor_streak: 0,
            is_enabled: true,
            cooldown_until: None,
            updated_at: Utc::now(),
            version: 0,
        }
    }

    /// Number of resolved predictions (successful + failed).
    pub fn resolved(&self) -> u64 {
        self.successful + self.failed
    }

    /// Rolling accuracy over resolved predictions. 0.0 when nothing
    /// has resolved yet.
    pub fn accuracy(&self) -> f64 {
        let resolved = self.resolved();
        if resolved == 0 {
            0.0
        } else {
            self.successful as f64 / resolved as f64
        }
    }

    /// Whether an unexpired cooldown blocks automatic re-enable.
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        matches!(self.cooldown_until, Some(until) if until > now)
    }

    /// Effective lifecycle state, accounting for an active override.
    pub fn lifecycle_state(
        &self,
        active_override: Option<&AdminOverride>,
        now: DateTime<Utc>,
    ) -> LifecycleState {
        if let Some(ov) = active_override {
            if ov.is_active(now) {
                return match ov.override_type {
                    OverrideType::ForceEnable => LifecycleState::EnabledOverride,
                    OverrideType::ForceDisable => LifecycleState::DisabledOverride,
                    // A cooldown reset doesn't freeze transitions; fall
                    // through to the automatic state.
                    OverrideType::ResetCooldown => self.automatic_state(),
                };
            }
        }
        self.automatic_state()
    }

    fn automatic_state(&self) -> LifecycleState {
        if self.is_enabled {
            LifecycleState::Enabled
        } else {
            // Covers both an active cooldown and an expired one where
            // the enable rule has not fired yet.
            LifecycleState::DisabledCooldown
        }
    }
}

/// Lifecycle states for a (bot, regime) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    Enabled,
    DisabledCooldown,
    DisabledOverride,
    EnabledOverride,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Enabled => write!(f, "ENABLED"),
            LifecycleState::DisabledCooldown => write!(f, "DISABLED_COOLDOWN"),
            LifecycleState::DisabledOverride => write!(f, "DISABLED_OVERRIDE"),
            LifecycleState::EnabledOverride => write!(f, "ENABLED_OVERRIDE"),
        }
    }
}

/// Append-only audit entry for a weight mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightChange {
    pub bot_name: String,
    pub regime: MarketRegime,
    pub old_weight: f64,
    pub new_weight: f64,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Admin override
// ---------------------------------------------------------------------------

/// Manual override type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverrideType {
    ForceEnable,
    ForceDisable,
    ResetCooldown,
}

impl fmt::Display for OverrideType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverrideType::ForceEnable => write!(f, "force_enable"),
            OverrideType::ForceDisable => write!(f, "force_disable"),
            OverrideType::ResetCooldown => write!(f, "reset_cooldown"),
        }
    }
}

impl std::str::FromStr for OverrideType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "force_enable" => Ok(OverrideType::ForceEnable),
            "force_disable" => Ok(OverrideType::ForceDisable),
            "reset_cooldown" => Ok(OverrideType::ResetCooldown),
            _ => Err(anyhow::anyhow!("Unknown override type: {s}")),
        }
    }
}

/// A manual enablement override. While active (not expired) it is the
/// sole source of truth for a bot's enablement, taking precedence over
/// both weight-based and cooldown-based logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminOverride {
    pub bot_name: String,
    pub override_type: OverrideType,
    pub reason: String,
    /// None = never expires (until explicitly removed).
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl AdminOverride {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expiry) => expiry > now,
            None => true,
        }
    }
}

impl fmt::Display for AdminOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on {} ({})",
            self.override_type, self.bot_name, self.reason,
        )
    }
}

// ---------------------------------------------------------------------------
// Q-learning state & action
// ---------------------------------------------------------------------------

/// Discretized market state used as the Q-table row key.
///
/// Derived deterministically from a prediction so that training passes
/// are reproducible: trend from the sign/magnitude of the target move,
/// volatility flag from the stop distance, momentum from the bot's own
/// direction, plus the regime label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct StateKey {
    pub regime: MarketRegime,
    /// -1, 0, or +1.
    pub trend: i8,
    pub volatile: bool,
    /// -1 or +1, from the bot's own direction.
    pub momentum: i8,
}

/// Target move below this fraction of entry counts as flat trend.
const TREND_FLAT_PCT: f64 = 0.005;
/// Stop distance above this fraction of entry flags a volatile setup.
const VOLATILE_STOP_PCT: f64 = 0.02;

impl StateKey {
    pub fn from_prediction(p: &Prediction) -> Self {
        let move_pct = (p.target_price - p.entry_price) / p.entry_price;
        let trend = if move_pct.abs() < TREND_FLAT_PCT {
            0
        } else if move_pct > 0.0 {
            1
        } else {
            -1
        };
        let stop_pct = ((p.entry_price - p.stop_loss) / p.entry_price).abs();
        Self {
            regime: p.market_regime,
            trend,
            volatile: stop_pct > VOLATILE_STOP_PCT,
            momentum: match p.direction {
                Direction::Long => 1,
                Direction::Short => -1,
            },
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.regime,
            self.trend,
            if self.volatile { 1 } else { 0 },
            self.momentum,
        )
    }
}

impl From<StateKey> for String {
    fn from(k: StateKey) -> String {
        k.to_string()
    }
}

impl TryFrom<String> for StateKey {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 4 {
            anyhow::bail!("Malformed state key: {s}");
        }
        Ok(StateKey {
            regime: parts[0].parse()?,
            trend: parts[1].parse()?,
            volatile: parts[2] == "1",
            momentum: parts[3].parse()?,
        })
    }
}

/// Trading stance half of an action label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stance {
    Long,
    Short,
    Neutral,
}

impl fmt::Display for Stance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stance::Long => write!(f, "LONG"),
            Stance::Short => write!(f, "SHORT"),
            Stance::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Confidence bucket half of an action label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfidenceBucket {
    High,
    Med,
    Low,
}

impl ConfidenceBucket {
    /// Bucket boundaries: >= 0.7 high, >= 0.4 medium, else low.
    pub fn from_confidence(c: f64) -> Self {
        if c >= 0.7 {
            ConfidenceBucket::High
        } else if c >= 0.4 {
            ConfidenceBucket::Med
        } else {
            ConfidenceBucket::Low
        }
    }
}

impl fmt::Display for ConfidenceBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfidenceBucket::High => write!(f, "HIGH"),
            ConfidenceBucket::Med => write!(f, "MED"),
            ConfidenceBucket::Low => write!(f, "LOW"),
        }
    }
}

/// Q-table action label: stance × confidence bucket (9 combinations).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Action {
    pub stance: Stance,
    pub bucket: ConfidenceBucket,
}

impl Action {
    /// All nine possible actions.
    pub fn all() -> Vec<Action> {
        let mut out = Vec::with_capacity(9);
        for stance in [Stance::Long, Stance::Short, Stance::Neutral] {
            for bucket in [
                ConfidenceBucket::High,
                ConfidenceBucket::Med,
                ConfidenceBucket::Low,
            ] {
                out.push(Action { stance, bucket });
            }
        }
        out
    }

    /// The action a prediction recorded at creation time.
    pub fn from_prediction(p: &Prediction) -> Self {
        Action {
            stance: match p.direction {
                Direction::Long => Stance::Long,
                Direction::Short => Stance::Short,
            },
            bucket: ConfidenceBucket::from_confidence(p.confidence),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.stance, self.bucket)
    }
}

impl From<Action> for String {
    fn from(a: Action) -> String {
        a.to_string()
    }
}

impl TryFrom<String> for Action {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let (stance, bucket) = s
            .split_once('-')
            .ok_or_else(|| anyhow::anyhow!("Malformed action label: {s}"))?;
        let stance = match stance {
            "LONG" => Stance::Long,
            "SHORT" => Stance::Short,
            "NEUTRAL" => Stance::Neutral,
            _ => anyhow::bail!("Unknown stance: {stance}"),
        };
        let bucket = match bucket {
            "HIGH" => ConfidenceBucket::High,
            "MED" => ConfidenceBucket::Med,
            "LOW" => ConfidenceBucket::Low,
            _ => anyhow::bail!("Unknown confidence bucket: {bucket}"),
        };
        Ok(Action { stance, bucket })
    }
}

/// One applied Q-update, logged for auditability so a table can be
/// rebuilt by replaying episodes in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: Uuid,
    pub bot_name: String,
    pub state: StateKey,
    pub action: Action,
    pub reward: f64,
    pub next_state: Option<StateKey>,
    pub source_prediction_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Per-bot Q-table: learned values for each visited (state, action)
/// cell, plus the hyperparameters that evolve with it. Persisted as a
/// single JSON blob per bot; the string-keyed serde representation of
/// `StateKey`/`Action` keeps the blob readable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QTable {
    pub bot_name: String,
    pub values: HashMap<StateKey, HashMap<Action, f64>>,
    pub learning_rate: f64,
    pub discount: f64,
    /// Epsilon for epsilon-greedy selection; decays per training pass.
    pub exploration: f64,
    pub episodes_trained: u64,
    pub cumulative_reward: f64,
    pub updated_at: DateTime<Utc>,
}

impl QTable {
    pub fn new(bot_name: &str, learning_rate: f64, discount: f64) -> Self {
        Self {
            bot_name: bot_name.to_string(),
            values: HashMap::new(),
            learning_rate,
            discount,
            exploration: 1.0,
            episodes_trained: 0,
            cumulative_reward: 0.0,
            updated_at: Utc::now(),
        }
    }

    /// Learned value for a cell; unvisited cells read as 0.0.
    pub fn value(&self, state: &StateKey, action: &Action) -> f64 {
        self.values
            .get(state)
            .and_then(|row| row.get(action))
            .copied()
            .unwrap_or(0.0)
    }

    /// Best learned value across all actions in a state (the `max_a'`
    /// term of the update rule). 0.0 for an unvisited state.
    pub fn best_value(&self, state: &StateKey) -> f64 {
        self.values
            .get(state)
            .map(|row| row.values().copied().fold(0.0, f64::max))
            .unwrap_or(0.0)
    }

    /// Number of (state, action) cells holding a learned value.
    pub fn cell_count(&self) -> usize {
        self.values.values().map(|row| row.len()).sum()
    }

    pub fn avg_reward(&self) -> f64 {
        if self.episodes_trained == 0 {
            0.0
        } else {
            self.cumulative_reward / self.episodes_trained as f64
        }
    }
}

// ---------------------------------------------------------------------------
// Consensus output
// ---------------------------------------------------------------------------

/// One bot's contribution to a consensus run (audit/display).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotVote {
    pub bot_name: String,
    pub direction: Direction,
    pub confidence: f64,
    pub weight: f64,
    pub weighted_score: f64,
    /// Whether this bot agreed with the winning direction.
    pub agreed: bool,
}

/// The aggregated recommendation for one asset. Derived output —
/// recomputed on every aggregation run, never a source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusRecommendation {
    pub asset_symbol: String,
    pub direction: Direction,
    pub avg_confidence: f64,
    pub avg_entry: f64,
    pub avg_target: f64,
    pub avg_stop: f64,
    /// Fraction of voting bots agreeing with the winning direction.
    pub consensus_percent: f64,
    pub long_bot_count: usize,
    pub short_bot_count: usize,
    pub breakdown: Vec<BotVote>,
}

impl fmt::Display for ConsensusRecommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} conf={:.1}% consensus={:.0}% (L{}/S{}) entry={:.4} target={:.4} stop={:.4}",
            self.direction,
            self.asset_symbol,
            self.avg_confidence * 100.0,
            self.consensus_percent * 100.0,
            self.long_bot_count,
            self.short_bot_count,
            self.avg_entry,
            self.avg_target,
            self.avg_stop,
        )
    }
}

// ---------------------------------------------------------------------------
// Unit reports
// ---------------------------------------------------------------------------

/// Per-bot tally emitted by an evaluation pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotOutcomeSummary {
    pub successes: u64,
    pub failures: u64,
    pub still_pending: u64,
}

/// Summary of one `evaluate_pending` pass.
///
/// The interim counters track open predictions that have touched
/// neither level yet, split by whether the price currently sits on
/// their side of the entry. Display only; nothing learns from them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub evaluated: usize,
    pub resolved: usize,
    pub still_pending: usize,
    pub interim_favorable: usize,
    pub interim_unfavorable: usize,
    pub per_bot: HashMap<String, BotOutcomeSummary>,
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "evaluated={} resolved={} pending={} (favorable={} unfavorable={}) bots={}",
            self.evaluated,
            self.resolved,
            self.still_pending,
            self.interim_favorable,
            self.interim_unfavorable,
            self.per_bot.len(),
        )
    }
}

/// Per-bot summary of one training pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotTrainingSummary {
    pub bot_name: String,
    pub episodes_trained: usize,
    pub avg_reward: f64,
    /// Number of (state, action) cells with a learned value.
    pub table_size: usize,
    pub new_weight: Option<f64>,
}

/// Summary of one `train` invocation (one or all bots).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingReport {
    pub episodes_trained: usize,
    pub avg_reward: f64,
    pub table_size: usize,
    pub per_bot: Vec<BotTrainingSummary>,
}

/// Action taken for one (bot, regime) during a lifecycle sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SweepAction {
    Enabled,
    Disabled { cooldown_until: DateTime<Utc> },
    StreakIncremented(u32),
    OverrideHeld(OverrideType),
    NoChange,
}

impl fmt::Display for SweepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepAction::Enabled => write!(f, "enable"),
            SweepAction::Disabled { cooldown_until } => {
                write!(f, "disable (cooldown until {cooldown_until})")
            }
            SweepAction::StreakIncremented(n) => write!(f, "streak={n}"),
            SweepAction::OverrideHeld(t) => write!(f, "held by {t}"),
            SweepAction::NoChange => write!(f, "no change"),
        }
    }
}

/// Summary of one lifecycle sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepReport {
    pub enabled_count: usize,
    pub disabled_count: usize,
    pub actions: Vec<(String, MarketRegime, SweepAction)>,
}

/// Point-in-time operational snapshot, logged by the runner.
///
/// A bot counts as enabled if any of its per-regime records is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStatus {
    pub bots_tracked: usize,
    pub bots_enabled: usize,
    pub bots_disabled: usize,
    pub pending_predictions: usize,
}

impl EngineStatus {
    pub fn from_parts(weights: &[BotWeightRecord], pending_predictions: usize) -> Self {
        let mut enabled: HashMap<&str, bool> = HashMap::new();
        for rec in weights {
            let e = enabled.entry(rec.bot_name.as_str()).or_insert(false);
            *e |= rec.is_enabled;
        }
        let bots_enabled = enabled.values().filter(|e| **e).count();
        Self {
            bots_tracked: enabled.len(),
            bots_enabled,
            bots_disabled: enabled.len() - bots_enabled,
            pending_predictions,
        }
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bots={} enabled={} disabled={} pending={}",
            self.bots_tracked,
            self.bots_enabled,
            self.bots_disabled,
            self.pending_predictions,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for QUORUM.
#[derive(Debug, thiserror::Error)]
pub enum QuorumError {
    /// Requested bot has no weight record in any regime. Distinct from
    /// transient store failures so operators can tell a typo from an
    /// outage.
    #[error("Bot not found: {0}")]
    BotNotFound(String),

    #[error("Rate limit exhausted after waiting {waited_ms}ms")]
    RateLimited { waited_ms: u64 },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
