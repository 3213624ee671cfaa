//! Bot lifecycle management.
//!
//! Periodic sweeps disable bots whose accuracy has stayed bad long
//! enough and re-enable bots that earned their way back after cooldown.
//! Disabling requires the poor-accuracy condition to hold for several
//! consecutive sweeps (the streak), so one bad batch of resolutions
//! does not bench a bot. Admin overrides outrank everything while
//! active.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::LifecycleSection;
use crate::storage::{EngineStore, StoreError};
use crate::types::{
    AdminOverride, BotWeightRecord, OverrideType, QuorumError, SweepAction, SweepReport,
};

/// Attempts before giving up on a contended weight-record write.
const MAX_CAS_RETRIES: u32 = 5;

// ---------------------------------------------------------------------------
// Pure decision
// ---------------------------------------------------------------------------

/// Decide what a sweep does to one record. Returns the post-decision
/// record and the action taken; the caller persists when they differ.
pub fn decide(
    rec: &BotWeightRecord,
    active_override: Option<&AdminOverride>,
    now: DateTime<Utc>,
    cfg: &LifecycleSection,
) -> (BotWeightRecord, SweepAction) {
    let mut next = rec.clone();

    if let Some(ov) = active_override.filter(|ov| ov.is_active(now)) {
        match ov.override_type {
            OverrideType::ForceEnable => {
                next.is_enabled = true;
                return (next, SweepAction::OverrideHeld(OverrideType::ForceEnable));
            }
            OverrideType::ForceDisable => {
                next.is_enabled = false;
                return (next, SweepAction::OverrideHeld(OverrideType::ForceDisable));
            }
            OverrideType::ResetCooldown => {
                // Clears the clock, then normal rules apply below.
                next.cooldown_until = None;
                next.poor_streak = 0;
            }
        }
    }

    if next.is_enabled {
        let poor = next.resolved() >= cfg.disable_min_predictions
            && next.accuracy() < cfg.disable_threshold;
        if !poor {
            next.poor_streak = 0;
            return (next, SweepAction::NoChange);
        }
        next.poor_streak += 1;
        if next.poor_streak < cfg.poor_performance_streak {
            let streak = next.poor_streak;
            return (next, SweepAction::StreakIncremented(streak));
        }
        let cooldown_until = now + Duration::days(cfg.cooldown_days);
        next.is_enabled = false;
        next.poor_streak = 0;
        next.cooldown_until = Some(cooldown_until);
        // Start a fresh accuracy window: re-enable judges what the bot
        // does after the bench, not its lifetime record.
        next.successful = 0;
        next.failed = 0;
        return (next, SweepAction::Disabled { cooldown_until });
    }

    // Disabled: wait out the cooldown, then require earned recovery.
    if next.in_cooldown(now) {
        return (next, SweepAction::NoChange);
    }
    let recovered = next.resolved() >= cfg.enable_min_predictions
        && next.accuracy() >= cfg.enable_threshold;
    if recovered {
        next.is_enabled = true;
        next.cooldown_until = None;
        next.poor_streak = 0;
        return (next, SweepAction::Enabled);
    }
    (next, SweepAction::NoChange)
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct LifecycleManager {
    store: Arc<dyn EngineStore>,
    config: LifecycleSection,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn EngineStore>, config: LifecycleSection) -> Self {
        Self { store, config }
    }

    /// One sweep over every weight record.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let records = self.store.list_weights().await?;
        self.sweep_records(records).await
    }

    /// Sweep only one bot's records (all regimes). Unknown bots yield
    /// an empty report, the structured no-data result.
    pub async fn sweep_bot(&self, bot: &str) -> Result<SweepReport> {
        let records: Vec<BotWeightRecord> = self
            .store
            .list_weights()
            .await?
            .into_iter()
            .filter(|rec| rec.bot_name == bot)
            .collect();
        self.sweep_records(records).await
    }

    async fn sweep_records(&self, records: Vec<BotWeightRecord>) -> Result<SweepReport> {
        let now = Utc::now();
        let mut report = SweepReport::default();

        for rec in records {
            let active_override = self.store.get_override(&rec.bot_name).await?;
            let (next, action) = self.apply_decision(rec, active_override, now).await?;

            if next.is_enabled {
                report.enabled_count += 1;
            } else {
                report.disabled_count += 1;
            }
            match &action {
                SweepAction::NoChange => {}
                action => {
                    info!(
                        bot = %next.bot_name,
                        regime = %next.regime,
                        accuracy = next.accuracy(),
                        resolved = next.resolved(),
                        "Lifecycle: {action}"
                    );
                    report
                        .actions
                        .push((next.bot_name.clone(), next.regime, action.clone()));
                }
            }
        }

        info!(
            enabled = report.enabled_count,
            disabled = report.disabled_count,
            actions = report.actions.len(),
            "Lifecycle sweep complete"
        );
        Ok(report)
    }

    /// Decide and persist for one record, re-deciding from a fresh read
    /// when a concurrent writer bumped the version.
    async fn apply_decision(
        &self,
        rec: BotWeightRecord,
        active_override: Option<AdminOverride>,
        now: DateTime<Utc>,
    ) -> Result<(BotWeightRecord, SweepAction)> {
        let mut current = rec;
        for _ in 0..MAX_CAS_RETRIES {
            let (next, action) = decide(&current, active_override.as_ref(), now, &self.config);
            debug_assert!(
                match active_override.as_ref().filter(|ov| ov.is_active(now)) {
                    Some(ov) if ov.override_type == OverrideType::ForceEnable => next.is_enabled,
                    Some(ov) if ov.override_type == OverrideType::ForceDisable => !next.is_enabled,
                    _ => true,
                },
                "sweep decision contradicts an active force override"
            );
            let dirty = next.is_enabled != current.is_enabled
                || next.poor_streak != current.poor_streak
                || next.cooldown_until != current.cooldown_until;
            if !dirty {
                return Ok((next, action));
            }
            match self.store.update_weight(&next).await {
                Ok(written) => return Ok((written, action)),
                Err(StoreError::VersionConflict { .. }) => {
                    debug!(bot = %current.bot_name, regime = %current.regime,
                        "Sweep lost a write race, re-deciding");
                    current = self
                        .store
                        .ensure_weight(&current.bot_name, current.regime)
                        .await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        anyhow::bail!(
            "Gave up sweeping {}@{} after {MAX_CAS_RETRIES} attempts",
            current.bot_name,
            current.regime
        )
    }

    /// Install a manual override for a known bot. `ResetCooldown` is a
    /// one-shot action (clears clocks immediately, nothing stored);
    /// force overrides persist until removed or expired.
    pub async fn apply_override(&self, ov: &AdminOverride) -> Result<()> {
        let known = self
            .store
            .list_weights()
            .await?
            .iter()
            .any(|rec| rec.bot_name == ov.bot_name);
        if !known {
            return Err(QuorumError::BotNotFound(ov.bot_name.clone()).into());
        }

        match ov.override_type {
            OverrideType::ResetCooldown => {
                for rec in self.store.list_weights().await? {
                    if rec.bot_name != ov.bot_name || rec.cooldown_until.is_none() {
                        continue;
                    }
                    self.clear_cooldown(rec).await?;
                }
                info!(bot = %ov.bot_name, reason = %ov.reason, "Cooldown reset");
            }
            OverrideType::ForceEnable | OverrideType::ForceDisable => {
                self.store.put_override(ov).await?;
                warn!(bot = %ov.bot_name, override_type = %ov.override_type,
                    reason = %ov.reason, "Admin override installed");
            }
        }
        Ok(())
    }

    pub async fn remove_override(&self, bot: &str) -> Result<()> {
        self.store.remove_override(bot).await?;
        info!(bot = %bot, "Admin override removed");
        Ok(())
    }

    async fn clear_cooldown(&self, rec: BotWeightRecord) -> Result<()> {
        let mut current = rec;
        for _ in 0..MAX_CAS_RETRIES {
            let mut next = current.clone();
            next.cooldown_until = None;
            next.poor_streak = 0;
            match self.store.update_weight(&next).await {
                Ok(_) => return Ok(()),
                Err(StoreError::VersionConflict { .. }) => {
                    current = self
                        .store
                        .ensure_weight(&current.bot_name, current.regime)
                        .await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        anyhow::bail!(
            "Gave up clearing cooldown for {}@{}",
            current.bot_name,
            current.regime
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;
    use crate::types::MarketRegime;

    fn lifecycle_config() -> LifecycleSection {
        LifecycleSection {
            disable_min_predictions: 20,
            disable_threshold: 0.35,
            poor_performance_streak: 3,
            cooldown_days: 7,
            enable_min_predictions: 10,
            enable_threshold: 0.60,
        }
    }

    fn poor_record() -> BotWeightRecord {
        let mut rec = BotWeightRecord::new("alpha", MarketRegime::Bull);
        rec.successful = 6;
        rec.failed = 14; // 30% over 20 resolved
        rec
    }

    #[test]
    fn test_disable_requires_streak_of_sweeps() {
        let cfg = lifecycle_config();
        let now = Utc::now();

        let (rec, action) = decide(&poor_record(), None, now, &cfg);
        assert_eq!(action, SweepAction::StreakIncremented(1));
        let (rec, action) = decide(&rec, None, now, &cfg);
        assert_eq!(action, SweepAction::StreakIncremented(2));
        let (rec, action) = decide(&rec, None, now, &cfg);
        match action {
            SweepAction::Disabled { cooldown_until } => {
                assert_eq!(cooldown_until, now + Duration::days(7));
            }
            other => panic!("expected disable, got {other:?}"),
        }
        assert!(!rec.is_enabled);
        assert_eq!(rec.poor_streak, 0);
    }

    #[test]
    fn test_disable_starts_fresh_accuracy_window() {
        let cfg = lifecycle_config();
        let now = Utc::now();

        let mut rec = poor_record();
        rec.poor_streak = 2;
        let (benched, action) = decide(&rec, None, now, &cfg);
        assert!(matches!(action, SweepAction::Disabled { .. }));
        assert_eq!(benched.successful, 0);
        assert_eq!(benched.failed, 0);

        // A fresh 70% window over 10 resolved re-enables once the
        // cooldown has run out, regardless of the pre-bench record.
        let mut recovered = benched;
        recovered.cooldown_until = Some(now - Duration::hours(1));
        recovered.successful = 7;
        recovered.failed = 3;
        let (next, action) = decide(&recovered, None, now, &cfg);
        assert_eq!(action, SweepAction::Enabled);
        assert!(next.is_enabled);
    }

    #[test]
    fn test_good_sweep_resets_streak() {
        let cfg = lifecycle_config();
        let now = Utc::now();

        let (rec, _) = decide(&poor_record(), None, now, &cfg);
        assert_eq!(rec.poor_streak, 1);

        // Accuracy recovers above the disable threshold.
        let mut recovered = rec;
        recovered.successful = 10;
        recovered.failed = 10;
        let (rec, action) = decide(&recovered, None, now, &cfg);
        assert_eq!(action, SweepAction::NoChange);
        assert_eq!(rec.poor_streak, 0);
    }

    #[test]
    fn test_no_streak_below_minimum_sample() {
        let cfg = lifecycle_config();
        let mut rec = BotWeightRecord::new("alpha", MarketRegime::Bull);
        rec.successful = 1;
        rec.failed = 9; // terrible, but only 10 resolved
        let (_, action) = decide(&rec, None, Utc::now(), &cfg);
        assert_eq!(action, SweepAction::NoChange);
    }

    #[test]
    fn test_cooldown_blocks_reenable_until_expiry() {
        let cfg = lifecycle_config();
        let now = Utc::now();

        let mut rec = BotWeightRecord::new("alpha", MarketRegime::Bull);
        rec.is_enabled = false;
        rec.cooldown_until = Some(now + Duration::days(2));
        rec.successful = 12;
        rec.failed = 3; // 80%, would qualify

        let (_, action) = decide(&rec, None, now, &cfg);
        assert_eq!(action, SweepAction::NoChange);

        // After expiry the same record re-enables.
        rec.cooldown_until = Some(now - Duration::hours(1));
        let (next, action) = decide(&rec, None, now, &cfg);
        assert_eq!(action, SweepAction::Enabled);
        assert!(next.is_enabled);
        assert!(next.cooldown_until.is_none());
    }

    #[test]
    fn test_expired_cooldown_without_recovery_stays_disabled() {
        let cfg = lifecycle_config();
        let now = Utc::now();

        let mut rec = poor_record();
        rec.is_enabled = false;
        rec.cooldown_until = Some(now - Duration::hours(1));
        let (next, action) = decide(&rec, None, now, &cfg);
        assert_eq!(action, SweepAction::NoChange);
        assert!(!next.is_enabled);
    }

    #[test]
    fn test_force_overrides_outrank_automatic_rules() {
        let cfg = lifecycle_config();
        let now = Utc::now();

        let force_enable = AdminOverride {
            bot_name: "alpha".into(),
            override_type: OverrideType::ForceEnable,
            reason: "manual".into(),
            expires_at: None,
            created_at: now,
        };
        // Poor enough to disable, but the override holds it enabled.
        let mut rec = poor_record();
        rec.poor_streak = 2;
        let (next, action) = decide(&rec, Some(&force_enable), now, &cfg);
        assert_eq!(action, SweepAction::OverrideHeld(OverrideType::ForceEnable));
        assert!(next.is_enabled);

        let force_disable = AdminOverride {
            override_type: OverrideType::ForceDisable,
            ..force_enable
        };
        let healthy = BotWeightRecord::new("alpha", MarketRegime::Bull);
        let (next, action) = decide(&healthy, Some(&force_disable), now, &cfg);
        assert_eq!(
            action,
            SweepAction::OverrideHeld(OverrideType::ForceDisable)
        );
        assert!(!next.is_enabled);
    }

    #[test]
    fn test_expired_override_is_ignored() {
        let cfg = lifecycle_config();
        let now = Utc::now();
        let expired = AdminOverride {
            bot_name: "alpha".into(),
            override_type: OverrideType::ForceEnable,
            reason: "manual".into(),
            expires_at: Some(now - Duration::hours(1)),
            created_at: now - Duration::days(1),
        };
        let (_, action) = decide(&poor_record(), Some(&expired), now, &cfg);
        assert_eq!(action, SweepAction::StreakIncremented(1));
    }

    // -- Sweep against the in-memory store --

    #[tokio::test]
    async fn test_sweep_disables_persistently_poor_bot() {
        let store = Arc::new(SqliteStore::connect_in_memory().await.unwrap());
        let rec = store
            .ensure_weight("alpha", MarketRegime::Bull)
            .await
            .unwrap();
        let mut poor = rec;
        poor.successful = 6;
        poor.failed = 14;
        store.update_weight(&poor).await.unwrap();

        let manager = LifecycleManager::new(store.clone(), lifecycle_config());
        manager.sweep().await.unwrap();
        manager.sweep().await.unwrap();
        let report = manager.sweep().await.unwrap();

        assert_eq!(report.disabled_count, 1);
        assert_eq!(report.enabled_count, 0);
        let rec = store
            .get_weight("alpha", MarketRegime::Bull)
            .await
            .unwrap()
            .unwrap();
        assert!(!rec.is_enabled);
        assert!(rec.cooldown_until.is_some());
    }

    #[tokio::test]
    async fn test_benched_bot_reenables_on_fresh_window() {
        let store = Arc::new(SqliteStore::connect_in_memory().await.unwrap());
        let rec = store
            .ensure_weight("alpha", MarketRegime::Bull)
            .await
            .unwrap();
        let mut poor = rec;
        poor.successful = 6;
        poor.failed = 14;
        poor.total_predictions = 20;
        store.update_weight(&poor).await.unwrap();

        let manager = LifecycleManager::new(store.clone(), lifecycle_config());
        manager.sweep().await.unwrap();
        manager.sweep().await.unwrap();
        manager.sweep().await.unwrap();

        let benched = store
            .get_weight("alpha", MarketRegime::Bull)
            .await
            .unwrap()
            .unwrap();
        assert!(!benched.is_enabled);
        assert_eq!(benched.resolved(), 0);

        // Cooldown elapses, and the bot goes 7/3 while benched. At
        // 70% over the fresh window it earns its way back even though
        // its lifetime record (13 of 30) never would.
        let mut recovered = benched;
        recovered.cooldown_until = Some(Utc::now() - Duration::hours(1));
        recovered.successful = 7;
        recovered.failed = 3;
        recovered.total_predictions += 10;
        store.update_weight(&recovered).await.unwrap();

        let report = manager.sweep().await.unwrap();
        assert_eq!(report.enabled_count, 1);
        assert!(report
            .actions
            .iter()
            .any(|(_, _, action)| *action == SweepAction::Enabled));

        let rec = store
            .get_weight("alpha", MarketRegime::Bull)
            .await
            .unwrap()
            .unwrap();
        assert!(rec.is_enabled);
        assert!(rec.cooldown_until.is_none());
    }

    #[tokio::test]
    async fn test_sweep_bot_ignores_other_bots() {
        let store = Arc::new(SqliteStore::connect_in_memory().await.unwrap());
        for bot in ["alpha", "beta"] {
            let rec = store.ensure_weight(bot, MarketRegime::Bull).await.unwrap();
            let mut poor = rec;
            poor.successful = 6;
            poor.failed = 14;
            poor.poor_streak = 2;
            store.update_weight(&poor).await.unwrap();
        }

        let manager = LifecycleManager::new(store.clone(), lifecycle_config());
        let report = manager.sweep_bot("alpha").await.unwrap();
        assert_eq!(report.disabled_count, 1);
        assert_eq!(report.actions.len(), 1);

        // beta was never looked at.
        let beta = store
            .get_weight("beta", MarketRegime::Bull)
            .await
            .unwrap()
            .unwrap();
        assert!(beta.is_enabled);
        assert_eq!(beta.poor_streak, 2);

        // Unknown bot: empty report, not an error.
        let report = manager.sweep_bot("ghost").await.unwrap();
        assert_eq!(report.enabled_count + report.disabled_count, 0);
    }

    #[tokio::test]
    async fn test_apply_override_unknown_bot_is_typed_error() {
        let store = Arc::new(SqliteStore::connect_in_memory().await.unwrap());
        let manager = LifecycleManager::new(store, lifecycle_config());
        let err = manager
            .apply_override(&AdminOverride {
                bot_name: "ghost".into(),
                override_type: OverrideType::ForceDisable,
                reason: "typo".into(),
                expires_at: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<QuorumError>(),
            Some(QuorumError::BotNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reset_cooldown_clears_clock_immediately() {
        let store = Arc::new(SqliteStore::connect_in_memory().await.unwrap());
        let rec = store
            .ensure_weight("alpha", MarketRegime::Bull)
            .await
            .unwrap();
        let mut cooled = rec;
        cooled.is_enabled = false;
        cooled.cooldown_until = Some(Utc::now() + Duration::days(5));
        store.update_weight(&cooled).await.unwrap();

        let manager = LifecycleManager::new(store.clone(), lifecycle_config());
        manager
            .apply_override(&AdminOverride {
                bot_name: "alpha".into(),
                override_type: OverrideType::ResetCooldown,
                reason: "give it another shot".into(),
                expires_at: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let rec = store
            .get_weight("alpha", MarketRegime::Bull)
            .await
            .unwrap()
            .unwrap();
        assert!(rec.cooldown_until.is_none());
        // Nothing persisted as an override.
        assert!(store.get_override("alpha").await.unwrap().is_none());
    }
}
