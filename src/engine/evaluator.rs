//! Outcome evaluation.
//!
//! Resolves pending predictions against the price path the asset
//! actually took. Resolution is write-once: the store's conditional
//! update is the idempotency guard, so overlapping evaluator runs are
//! harmless. A feed failure skips the affected prediction and the pass
//! continues; nothing in here aborts a batch.

use anyhow::Result;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::marketdata::{PriceFeed, PricePoint};
use crate::storage::{EngineStore, StoreError};
use crate::types::{Direction, EvaluationReport, OutcomeStatus, Prediction};

/// Attempts before giving up on a contended weight-record write.
const MAX_CAS_RETRIES: u32 = 5;

// ---------------------------------------------------------------------------
// Pure judgment
// ---------------------------------------------------------------------------

/// What a price path says about an open prediction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathVerdict {
    /// A level was touched; the prediction is settled at that price.
    Resolved(OutcomeStatus, f64),
    /// Neither level touched. The directional read is reporting-only;
    /// the prediction stays pending and nothing learns from it.
    Open { favorable: bool, last_price: f64 },
}

/// Walk a chronological price path and judge the prediction.
///
/// First level hit wins; if one observation crosses both levels the
/// stop wins. A path that never touches either level leaves the
/// prediction open, with a tentative read off the final price.
/// Empty paths return `None` (caller falls back or leaves pending).
pub fn judge_path(p: &Prediction, path: &[PricePoint]) -> Option<PathVerdict> {
    let relevant: Vec<&PricePoint> = path
        .iter()
        .filter(|pt| pt.timestamp >= p.created_at)
        .collect();
    let last = relevant.last()?;

    for point in &relevant {
        let (stop_hit, target_hit) = match p.direction {
            Direction::Long => (point.price <= p.stop_loss, point.price >= p.target_price),
            Direction::Short => (point.price >= p.stop_loss, point.price <= p.target_price),
        };
        if stop_hit {
            return Some(PathVerdict::Resolved(OutcomeStatus::Failed, point.price));
        }
        if target_hit {
            return Some(PathVerdict::Resolved(OutcomeStatus::Success, point.price));
        }
    }

    let favorable = match p.direction {
        Direction::Long => last.price > p.entry_price,
        Direction::Short => last.price < p.entry_price,
    };
    Some(PathVerdict::Open {
        favorable,
        last_price: last.price,
    })
}

/// Sign-adjusted percentage P/L: positive when the move went the
/// predicted way, for longs and shorts alike.
pub fn profit_loss_pct(p: &Prediction, outcome_price: f64) -> f64 {
    p.direction.sign() * (outcome_price - p.entry_price) / p.entry_price * 100.0
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

pub struct OutcomeEvaluator {
    store: Arc<dyn EngineStore>,
    feed: Arc<dyn PriceFeed>,
    horizon: Duration,
}

impl OutcomeEvaluator {
    pub fn new(store: Arc<dyn EngineStore>, feed: Arc<dyn PriceFeed>, horizon_hours: i64) -> Self {
        Self {
            store,
            feed,
            horizon: Duration::hours(horizon_hours),
        }
    }

    /// One evaluation pass over everything older than the horizon.
    pub async fn evaluate_pending(&self) -> Result<EvaluationReport> {
        let now = Utc::now();
        let cutoff = now - self.horizon;
        let pending = self.store.list_pending_before(cutoff).await?;

        let mut report = EvaluationReport::default();
        report.evaluated = pending.len();

        for p in &pending {
            if let Err(reason) = p.validate() {
                warn!(prediction = %p.id, bot = %p.bot_name, reason = %reason,
                    "Skipping malformed pending prediction");
                report.still_pending += 1;
                report.per_bot.entry(p.bot_name.clone()).or_default().still_pending += 1;
                continue;
            }

            let judgment = match self.judge(p).await {
                Ok(j) => j,
                Err(e) => {
                    warn!(prediction = %p.id, symbol = %p.asset_symbol, error = %e,
                        "Feed failure, leaving prediction pending");
                    report.still_pending += 1;
                    report.per_bot.entry(p.bot_name.clone()).or_default().still_pending += 1;
                    continue;
                }
            };

            let (status, outcome_price) = match judgment {
                Some(PathVerdict::Resolved(status, price)) => (status, price),
                Some(PathVerdict::Open { favorable, last_price }) => {
                    debug!(prediction = %p.id, symbol = %p.asset_symbol,
                        favorable, last_price,
                        "Neither level touched, leaving prediction open");
                    report.still_pending += 1;
                    if favorable {
                        report.interim_favorable += 1;
                    } else {
                        report.interim_unfavorable += 1;
                    }
                    report.per_bot.entry(p.bot_name.clone()).or_default().still_pending += 1;
                    continue;
                }
                None => {
                    debug!(prediction = %p.id, symbol = %p.asset_symbol,
                        "No price data yet, leaving prediction pending");
                    report.still_pending += 1;
                    report.per_bot.entry(p.bot_name.clone()).or_default().still_pending += 1;
                    continue;
                }
            };

            let pnl = profit_loss_pct(p, outcome_price);
            let applied = self
                .store
                .resolve_prediction(p.id, status, outcome_price, pnl)
                .await?;
            if !applied {
                debug!(prediction = %p.id, "Already resolved by another run");
                continue;
            }

            info!(
                prediction = %p.id,
                bot = %p.bot_name,
                status = %status,
                outcome_price = outcome_price,
                pnl_pct = pnl,
                "Prediction resolved"
            );
            self.record_resolution(p, status).await?;

            report.resolved += 1;
            let summary = report.per_bot.entry(p.bot_name.clone()).or_default();
            match status {
                OutcomeStatus::Success => summary.successes += 1,
                OutcomeStatus::Failed => summary.failures += 1,
            }
        }

        info!(%report, "Evaluation pass complete");
        Ok(report)
    }

    /// Price-path judgment over everything the asset has traded since
    /// the prediction was made (the horizon only gates *when* a
    /// prediction first becomes due, never how much history is seen),
    /// with a degraded single-snapshot fallback when the provider has
    /// no candles at all.
    async fn judge(&self, p: &Prediction) -> Result<Option<PathVerdict>> {
        let path = self
            .feed
            .price_history(&p.asset_symbol, p.created_at, Utc::now())
            .await?;

        if let Some(judgment) = judge_path(p, &path) {
            return Ok(Some(judgment));
        }

        match self.feed.current_price(&p.asset_symbol).await? {
            Some(price) => {
                debug!(prediction = %p.id, "No history, judging from spot snapshot");
                let snapshot = [PricePoint {
                    timestamp: Utc::now(),
                    price,
                }];
                Ok(judge_path(p, &snapshot))
            }
            None => Ok(None),
        }
    }

    /// Fold one resolution into the bot's weight record, retrying on
    /// version conflicts with concurrent learner/lifecycle writes.
    async fn record_resolution(&self, p: &Prediction, status: OutcomeStatus) -> Result<()> {
        for _ in 0..MAX_CAS_RETRIES {
            let mut rec = self.store.ensure_weight(&p.bot_name, p.market_regime).await?;
            rec.total_predictions += 1;
            match status {
                OutcomeStatus::Success => rec.successful += 1,
                OutcomeStatus::Failed => rec.failed += 1,
            }
            match self.store.update_weight(&rec).await {
                Ok(_) => return Ok(()),
                Err(StoreError::VersionConflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        anyhow::bail!(
            "Gave up updating weight record for {}@{} after {MAX_CAS_RETRIES} attempts",
            p.bot_name,
            p.market_regime
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
