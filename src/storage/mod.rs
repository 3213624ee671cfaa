//! Persistence layer.
//!
//! The engine's four units (aggregator, evaluator, learner, lifecycle)
//! run as independent tasks and communicate only through this store.
//! The trait models the two guarantees the units rely on:
//!
//! - prediction resolution is a *conditional* write (only applies while
//!   `outcome_status` is still null), making the evaluator idempotent
//!   under concurrent runs;
//! - weight-record writes are version-checked (optimistic concurrency),
//!   so a learner pass and a lifecycle sweep racing on the same
//!   (bot, regime) row cannot silently lose an update.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::{
    AdminOverride, BotWeightRecord, Episode, MarketRegime, OutcomeStatus, Prediction, QTable,
    WeightChange,
};

pub use sqlite::SqliteStore;

/// Storage errors. `NotFound` and `VersionConflict` are part of the
/// contract (callers branch on them); everything else is a backend
/// failure to be retried or surfaced.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Version conflict on {bot}@{regime} (expected v{expected})")]
    VersionConflict {
        bot: String,
        regime: MarketRegime,
        expected: i64,
    },

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Backend(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Transactional store shared by all engine units.
#[async_trait]
pub trait EngineStore: Send + Sync {
    // -- Predictions (append-only + one conditional outcome write) ----

    async fn insert_prediction(&self, p: &Prediction) -> StoreResult<()>;

    async fn get_prediction(&self, id: Uuid) -> StoreResult<Option<Prediction>>;

    /// Unresolved predictions created before `cutoff`, oldest first.
    async fn list_pending_before(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Prediction>>;

    /// Resolved predictions for one bot, in chronological order
    /// (the learner replays these).
    async fn list_resolved_for_bot(&self, bot: &str) -> StoreResult<Vec<Prediction>>;

    /// Bot names that have at least one resolved prediction.
    async fn list_bots_with_resolutions(&self) -> StoreResult<Vec<String>>;

    /// Write the outcome fields iff the prediction is still unresolved.
    /// Returns false (and writes nothing) when another evaluator run
    /// got there first — the idempotency guard, enforced in SQL.
    async fn resolve_prediction(
        &self,
        id: Uuid,
        status: OutcomeStatus,
        outcome_price: f64,
        profit_loss_pct: f64,
    ) -> StoreResult<bool>;

    // -- Bot weight records (versioned) -------------------------------

    async fn get_weight(
        &self,
        bot: &str,
        regime: MarketRegime,
    ) -> StoreResult<Option<BotWeightRecord>>;

    /// Fetch the record, creating the default (enabled, weight 1.0)
    /// row for a newly observed bot.
    async fn ensure_weight(&self, bot: &str, regime: MarketRegime)
        -> StoreResult<BotWeightRecord>;

    async fn list_weights(&self) -> StoreResult<Vec<BotWeightRecord>>;

    /// Compare-and-swap write: applies `rec` only if the stored version
    /// still equals `rec.version`, returning the record with the bumped
    /// version. `VersionConflict` means re-read and retry.
    async fn update_weight(&self, rec: &BotWeightRecord) -> StoreResult<BotWeightRecord>;

    async fn append_weight_change(&self, change: &WeightChange) -> StoreResult<()>;

    async fn list_weight_changes(&self, bot: &str) -> StoreResult<Vec<WeightChange>>;

    // -- Admin overrides ----------------------------------------------

    /// Upsert: one override per bot; a new one replaces the old.
    async fn put_override(&self, ov: &AdminOverride) -> StoreResult<()>;

    async fn get_override(&self, bot: &str) -> StoreResult<Option<AdminOverride>>;

    async fn remove_override(&self, bot: &str) -> StoreResult<()>;

    // -- Learner artifacts --------------------------------------------

    async fn append_episode(&self, episode: &Episode) -> StoreResult<()>;

    /// Most recent episodes first, up to `limit`.
    async fn list_episodes(&self, bot: &str, limit: u32) -> StoreResult<Vec<Episode>>;

    async fn save_qtable(&self, bot: &str, table: &QTable) -> StoreResult<()>;

    async fn load_qtable(&self, bot: &str) -> StoreResult<Option<QTable>>;
}
