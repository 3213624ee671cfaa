//! SQLite-backed `EngineStore`.
//!
//! Schema lives here and is applied idempotently on connect. Timestamps
//! are stored as fixed-width RFC3339 text so lexicographic ordering in
//! SQL matches chronological ordering.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::fmt::Display;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use super::{EngineStore, StoreError, StoreResult};
use crate::types::{
    AdminOverride, BotWeightRecord, Episode, MarketRegime, OutcomeStatus, Prediction, QTable,
    WeightChange,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS predictions (
        id              TEXT PRIMARY KEY,
        bot_name        TEXT NOT NULL,
        asset_symbol    TEXT NOT NULL,
        direction       TEXT NOT NULL,
        entry_price     REAL NOT NULL,
        target_price    REAL NOT NULL,
        stop_loss       REAL NOT NULL,
        confidence      REAL NOT NULL,
        market_regime   TEXT NOT NULL,
        created_at      TEXT NOT NULL,
        outcome_status  TEXT,
        outcome_price   REAL,
        profit_loss_pct REAL
    )",
    "CREATE INDEX IF NOT EXISTS idx_predictions_pending
        ON predictions (created_at) WHERE outcome_status IS NULL",
    "CREATE INDEX IF NOT EXISTS idx_predictions_bot
        ON predictions (bot_name, created_at)",
    "CREATE TABLE IF NOT EXISTS bot_weights (
        bot_name          TEXT NOT NULL,
        regime            TEXT NOT NULL,
        current_weight    REAL NOT NULL,
        total_predictions INTEGER NOT NULL,
        successful        INTEGER NOT NULL,
        failed            INTEGER NOT NULL,
        poor_streak       INTEGER NOT NULL,
        is_enabled        INTEGER NOT NULL,
        cooldown_until    TEXT,
        updated_at        TEXT NOT NULL,
        version           INTEGER NOT NULL,
        PRIMARY KEY (bot_name, regime)
    )",
    "CREATE TABLE IF NOT EXISTS weight_changes (
        seq        INTEGER PRIMARY KEY AUTOINCREMENT,
        bot_name   TEXT NOT NULL,
        regime     TEXT NOT NULL,
        old_weight REAL NOT NULL,
        new_weight REAL NOT NULL,
        reason     TEXT NOT NULL,
        timestamp  TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS admin_overrides (
        bot_name      TEXT PRIMARY KEY,
        override_type TEXT NOT NULL,
        reason        TEXT NOT NULL,
        expires_at    TEXT,
        created_at    TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS episodes (
        seq                  INTEGER PRIMARY KEY AUTOINCREMENT,
        id                   TEXT NOT NULL,
        bot_name             TEXT NOT NULL,
        state                TEXT NOT NULL,
        action               TEXT NOT NULL,
        reward               REAL NOT NULL,
        next_state           TEXT,
        source_prediction_id TEXT NOT NULL,
        created_at           TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS qtables (
        bot_name   TEXT PRIMARY KEY,
        table_json TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
];

/// SQLite implementation of the engine store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to the given SQLite URL, creating the file and schema
    /// if missing.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        info!(url = %url, "Connected to SQLite store");
        Ok(store)
    }

    /// In-memory database on a single connection (each SQLite memory
    /// connection is its own database, so the pool must not grow).
    pub async fn connect_in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Schema up to date");
        Ok(())
    }
}

// -- Row mapping ------------------------------------------------------

fn fmt_ts(ts: DateTime<Utc>) -> String {
    // Fixed fractional width keeps text ordering chronological.
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {s:?}: {e}")))
}

fn corrupt(e: impl Display) -> StoreError {
    StoreError::Corrupt(e.to_string())
}

fn parse_uuid(s: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| StoreError::Corrupt(format!("bad uuid {s:?}: {e}")))
}

fn prediction_from_row(row: &SqliteRow) -> StoreResult<Prediction> {
    let status: Option<String> = row.try_get("outcome_status")?;
    Ok(Prediction {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        bot_name: row.try_get("bot_name")?,
        asset_symbol: row.try_get("asset_symbol")?,
        direction: row
            .try_get::<String, _>("direction")?
            .parse()
            .map_err(corrupt)?,
        entry_price: row.try_get("entry_price")?,
        target_price: row.try_get("target_price")?,
        stop_loss: row.try_get("stop_loss")?,
        confidence: row.try_get("confidence")?,
        market_regime: row
            .try_get::<String, _>("market_regime")?
            .parse()
            .map_err(corrupt)?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
        outcome_status: status.map(|s| s.parse::<OutcomeStatus>()).transpose().map_err(corrupt)?,
        outcome_price: row.try_get("outcome_price")?,
        profit_loss_pct: row.try_get("profit_loss_pct")?,
    })
}

fn weight_from_row(row: &SqliteRow) -> StoreResult<BotWeightRecord> {
    let cooldown: Option<String> = row.try_get("cooldown_until")?;
    Ok(BotWeightRecord {
        bot_name: row.try_get("bot_name")?,
        regime: row
            .try_get::<String, _>("regime")?
            .parse()
            .map_err(corrupt)?,
        current_weight: row.try_get("current_weight")?,
        total_predictions: row.try_get::<i64, _>("total_predictions")? as u64,
        successful: row.try_get::<i64, _>("successful")? as u64,
        failed: row.try_get::<i64, _>("failed")? as u64,
        poor_streak: row.try_get::<i64, _>("poor_streak")? as u32,
        is_enabled: row.try_get("is_enabled")?,
        cooldown_until: cooldown.as_deref().map(parse_ts).transpose()?,
        updated_at: parse_ts(&row.try_get::<String, _>("updated_at")?)?,
        version: row.try_get("version")?,
    })
}

fn override_from_row(row: &SqliteRow) -> StoreResult<AdminOverride> {
    let expires: Option<String> = row.try_get("expires_at")?;
    Ok(AdminOverride {
        bot_name: row.try_get("bot_name")?,
        override_type: row
            .try_get::<String, _>("override_type")?
            .parse()
            .map_err(corrupt)?,
        reason: row.try_get("reason")?,
        expires_at: expires.as_deref().map(parse_ts).transpose()?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn episode_from_row(row: &SqliteRow) -> StoreResult<Episode> {
    let next: Option<String> = row.try_get("next_state")?;
    Ok(Episode {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        bot_name: row.try_get("bot_name")?,
        state: row
            .try_get::<String, _>("state")?
            .try_into()
            .map_err(corrupt)?,
        action: row
            .try_get::<String, _>("action")?
            .try_into()
            .map_err(corrupt)?,
        reward: row.try_get("reward")?,
        next_state: next.map(TryInto::try_into).transpose().map_err(corrupt)?,
        source_prediction_id: parse_uuid(&row.try_get::<String, _>("source_prediction_id")?)?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
    })
}

// -- Trait implementation ---------------------------------------------

#[async_trait]
impl EngineStore for SqliteStore {
    async fn insert_prediction(&self, p: &Prediction) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO predictions
                (id, bot_name, asset_symbol, direction, entry_price, target_price,
                 stop_loss, confidence, market_regime, created_at,
                 outcome_status, outcome_price, profit_loss_pct)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(p.id.to_string())
        .bind(&p.bot_name)
        .bind(&p.asset_symbol)
        .bind(p.direction.to_string())
        .bind(p.entry_price)
        .bind(p.target_price)
        .bind(p.stop_loss)
        .bind(p.confidence)
        .bind(p.market_regime.to_string())
        .bind(fmt_ts(p.created_at))
        .bind(p.outcome_status.map(|s| s.to_string()))
        .bind(p.outcome_price)
        .bind(p.profit_loss_pct)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_prediction(&self, id: Uuid) -> StoreResult<Option<Prediction>> {
        let row = sqlx::query("SELECT * FROM predictions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(prediction_from_row).transpose()
    }

    async fn list_pending_before(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Prediction>> {
        let rows = sqlx::query(
            "SELECT * FROM predictions
             WHERE outcome_status IS NULL AND created_at <= ?
             ORDER BY created_at ASC",
        )
        .bind(fmt_ts(cutoff))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(prediction_from_row).collect()
    }

    async fn list_resolved_for_bot(&self, bot: &str) -> StoreResult<Vec<Prediction>> {
        let rows = sqlx::query(
            "SELECT * FROM predictions
             WHERE bot_name = ? AND outcome_status IS NOT NULL
             ORDER BY created_at ASC",
        )
        .bind(bot)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(prediction_from_row).collect()
    }

    async fn list_bots_with_resolutions(&self) -> StoreResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT bot_name FROM predictions
             WHERE outcome_status IS NOT NULL
             ORDER BY bot_name",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("bot_name").map_err(StoreError::from))
            .collect()
    }

    async fn resolve_prediction(
        &self,
        id: Uuid,
        status: OutcomeStatus,
        outcome_price: f64,
        profit_loss_pct: f64,
    ) -> StoreResult<bool> {
        // The IS NULL guard is the idempotency contract: a prediction
        // resolves at most once no matter how many evaluators race.
        let result = sqlx::query(
            "UPDATE predictions
             SET outcome_status = ?, outcome_price = ?, profit_loss_pct = ?
             WHERE id = ? AND outcome_status IS NULL",
        )
        .bind(status.to_string())
        .bind(outcome_price)
        .bind(profit_loss_pct)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_weight(
        &self,
        bot: &str,
        regime: MarketRegime,
    ) -> StoreResult<Option<BotWeightRecord>> {
        let row = sqlx::query("SELECT * FROM bot_weights WHERE bot_name = ? AND regime = ?")
            .bind(bot)
            .bind(regime.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(weight_from_row).transpose()
    }

    async fn ensure_weight(
        &self,
        bot: &str,
        regime: MarketRegime,
    ) -> StoreResult<BotWeightRecord> {
        let fresh = BotWeightRecord::new(bot, regime);
        sqlx::query(
            "INSERT OR IGNORE INTO bot_weights
                (bot_name, regime, current_weight, total_predictions, successful,
                 failed, poor_streak, is_enabled, cooldown_until, updated_at, version)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&fresh.bot_name)
        .bind(fresh.regime.to_string())
        .bind(fresh.current_weight)
        .bind(fresh.total_predictions as i64)
        .bind(fresh.successful as i64)
        .bind(fresh.failed as i64)
        .bind(fresh.poor_streak as i64)
        .bind(fresh.is_enabled)
        .bind(Option::<String>::None)
        .bind(fmt_ts(fresh.updated_at))
        .bind(fresh.version)
        .execute(&self.pool)
        .await?;

        self.get_weight(bot, regime)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("weight record {bot}@{regime}")))
    }

    async fn list_weights(&self) -> StoreResult<Vec<BotWeightRecord>> {
        let rows = sqlx::query("SELECT * FROM bot_weights ORDER BY bot_name, regime")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(weight_from_row).collect()
    }

    async fn update_weight(&self, rec: &BotWeightRecord) -> StoreResult<BotWeightRecord> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE bot_weights
             SET current_weight = ?, total_predictions = ?, successful = ?,
                 failed = ?, poor_streak = ?, is_enabled = ?, cooldown_until = ?,
                 updated_at = ?, version = version + 1
             WHERE bot_name = ? AND regime = ? AND version = ?",
        )
        .bind(rec.current_weight)
        .bind(rec.total_predictions as i64)
        .bind(rec.successful as i64)
        .bind(rec.failed as i64)
        .bind(rec.poor_streak as i64)
        .bind(rec.is_enabled)
        .bind(rec.cooldown_until.map(fmt_ts))
        .bind(fmt_ts(now))
        .bind(&rec.bot_name)
        .bind(rec.regime.to_string())
        .bind(rec.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get_weight(&rec.bot_name, rec.regime).await? {
                Some(_) => Err(StoreError::VersionConflict {
                    bot: rec.bot_name.clone(),
                    regime: rec.regime,
                    expected: rec.version,
                }),
                None => Err(StoreError::NotFound(format!(
                    "weight record {}@{}",
                    rec.bot_name, rec.regime
                ))),
            };
        }

        let mut updated = rec.clone();
        updated.version += 1;
        updated.updated_at = now;
        Ok(updated)
    }

    async fn append_weight_change(&self, change: &WeightChange) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO weight_changes
                (bot_name, regime, old_weight, new_weight, reason, timestamp)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&change.bot_name)
        .bind(change.regime.to_string())
        .bind(change.old_weight)
        .bind(change.new_weight)
        .bind(&change.reason)
        .bind(fmt_ts(change.timestamp))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_weight_changes(&self, bot: &str) -> StoreResult<Vec<WeightChange>> {
        let rows = sqlx::query(
            "SELECT * FROM weight_changes WHERE bot_name = ? ORDER BY seq ASC",
        )
        .bind(bot)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(WeightChange {
                    bot_name: row.try_get("bot_name")?,
                    regime: row
                        .try_get::<String, _>("regime")?
                        .parse()
                        .map_err(corrupt)?,
                    old_weight: row.try_get("old_weight")?,
                    new_weight: row.try_get("new_weight")?,
                    reason: row.try_get("reason")?,
                    timestamp: parse_ts(&row.try_get::<String, _>("timestamp")?)?,
                })
            })
            .collect()
    }

    async fn put_override(&self, ov: &AdminOverride) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO admin_overrides (bot_name, override_type, reason, expires_at, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (bot_name) DO UPDATE SET
                override_type = excluded.override_type,
                reason = excluded.reason,
                expires_at = excluded.expires_at,
                created_at = excluded.created_at",
        )
        .bind(&ov.bot_name)
        .bind(ov.override_type.to_string())
        .bind(&ov.reason)
        .bind(ov.expires_at.map(fmt_ts))
        .bind(fmt_ts(ov.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_override(&self, bot: &str) -> StoreResult<Option<AdminOverride>> {
        let row = sqlx::query("SELECT * FROM admin_overrides WHERE bot_name = ?")
            .bind(bot)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(override_from_row).transpose()
    }

    async fn remove_override(&self, bot: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM admin_overrides WHERE bot_name = ?")
            .bind(bot)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn append_episode(&self, episode: &Episode) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO episodes
                (id, bot_name, state, action, reward, next_state,
                 source_prediction_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(episode.id.to_string())
        .bind(&episode.bot_name)
        .bind(episode.state.to_string())
        .bind(episode.action.to_string())
        .bind(episode.reward)
        .bind(episode.next_state.map(|s| s.to_string()))
        .bind(episode.source_prediction_id.to_string())
        .bind(fmt_ts(episode.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_episodes(&self, bot: &str, limit: u32) -> StoreResult<Vec<Episode>> {
        let rows = sqlx::query(
            "SELECT * FROM episodes WHERE bot_name = ? ORDER BY seq DESC LIMIT ?",
        )
        .bind(bot)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(episode_from_row).collect()
    }

    async fn save_qtable(&self, bot: &str, table: &QTable) -> StoreResult<()> {
        let json = serde_json::to_string(table).map_err(corrupt)?;
        sqlx::query(
            "INSERT INTO qtables (bot_name, table_json, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT (bot_name) DO UPDATE SET
                table_json = excluded.table_json,
                updated_at = excluded.updated_at",
        )
        .bind(bot)
        .bind(json)
        .bind(fmt_ts(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_qtable(&self, bot: &str) -> StoreResult<Option<QTable>> {
        let row = sqlx::query("SELECT table_json FROM qtables WHERE bot_name = ?")
            .bind(bot)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let json: String = row.try_get("table_json")?;
                Ok(Some(serde_json::from_str(&json).map_err(corrupt)?))
            }
            None => Ok(None),
        }
    }
}
