//! Ban Set Reconciler
//!
//! Turns scheduler decisions into persisted bans mirrored in the filter set,
//! and sweeps bans out of both once they expire.

use super::gate::{Mutation, Outcome, RunMode, WriteGate};
use super::scheduler::Decision;
use crate::filter::FilterSet;
use crate::store::{Database, StoreError};
use chrono::NaiveDateTime;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// Result of a sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Bans removed from the set and the store
    pub removed: usize,
    /// Expired bans kept because the filter tool failed
    pub deferred: usize,
}

/// Applies bans and expiries through a [`WriteGate`]
pub struct BanReconciler<'a> {
    db: &'a Database,
    filter: &'a dyn FilterSet,
    gate: WriteGate<'a>,
}

impl<'a> BanReconciler<'a> {
    pub fn new(db: &'a Database, filter: &'a dyn FilterSet, mode: RunMode) -> Self {
        Self {
            db,
            filter,
            gate: WriteGate::new(db, filter, mode),
        }
    }

    /// The gate shared with the rest of the run
    pub fn gate(&self) -> &WriteGate<'a> {
        &self.gate
    }

    /// Persist a ban decision and push it to the filter set.
    ///
    /// `NoAction` is a no-op. Under dry-run the ban is only logged.
    pub async fn apply_ban(
        &self,
        ip: &str,
        decision: Decision,
        banned_at: NaiveDateTime,
    ) -> Result<Outcome, StoreError> {
        let Decision::Ban { days, ban_number } = decision else {
            return Ok(Outcome::Unchanged);
        };

        info!("Adding {} for {} days (ban #{})", ip, days, ban_number);
        self.gate
            .apply(Mutation::Ban {
                ip: ip.to_string(),
                banned_on: banned_at,
                days,
                times_banned: ban_number,
            })
            .await
    }

    /// Remove every ban whose expiry day is on or before `now`'s day
    pub async fn sweep_expired(&self, now: NaiveDateTime) -> Result<SweepSummary, StoreError> {
        let expired = self.db.bans().expired(now).await?;
        let mut summary = SweepSummary::default();

        for ban in expired {
            debug!(
                ip = %ban.ip,
                banned_on = %ban.banned_on,
                days = ban.banned_for,
                "Ban expired"
            );
            match self.gate.apply(Mutation::Unban { ip: ban.ip }).await? {
                Outcome::FilterDrift => summary.deferred += 1,
                _ => summary.removed += 1,
            }
        }

        info!("Removed {} IPs from {} list", summary.removed, self.filter.name());
        if summary.deferred > 0 {
            warn!("{} expired bans kept for retry on the next run", summary.deferred);
        }

        Ok(summary)
    }

    /// Re-add active bans the filter set no longer lists. Returns how many
    /// were restored. Members without a ban row are left alone.
    pub async fn restore_missing(&self, now: NaiveDateTime) -> Result<usize, StoreError> {
        let members: HashSet<String> = match self.filter.members().await {
            Ok(members) => members.into_iter().collect(),
            Err(e) => {
                warn!(error = %e, "Unable to list {}, skipping restore", self.filter.name());
                return Ok(0);
            }
        };

        let mut restored = 0;
        for ban in self.db.bans().active(now).await? {
            if members.contains(&ban.ip) {
                continue;
            }
            info!(ip = %ban.ip, "Restoring banned IP missing from {}", self.filter.name());
            if self.gate.apply(Mutation::Restore { ip: ban.ip }).await? == Outcome::Committed {
                restored += 1;
            }
        }

        Ok(restored)
    }

    /// Best-effort dump of the filter set to `path`
    pub async fn persist_snapshot(&self, path: &Path) -> Outcome {
        match self
            .gate
            .apply(Mutation::Snapshot {
                path: path.to_path_buf(),
            })
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Snapshot failed");
                Outcome::FilterDrift
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::MemoryFilterSet;
    use chrono::{Days, NaiveDate};

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 10)
            .unwrap()
            .and_hms_opt(15, 45, 0)
            .unwrap()
    }

    async fn ban(reconciler: &BanReconciler<'_>, db: &Database, ip: &str, days: u64) {
        db.hosts().record_observation(ip, 50, start()).await.unwrap();
        let decision = Decision::Ban {
            days,
            ban_number: 1,
        };
        reconciler.apply_ban(ip, decision, start()).await.unwrap();
    }

    #[tokio::test]
    async fn test_apply_ban_persists_and_adds() {
        let db = Database::in_memory().await.unwrap();
        let filter = MemoryFilterSet::new("unwelcome");
        let reconciler = BanReconciler::new(&db, &filter, RunMode::Commit);

        ban(&reconciler, &db, "10.0.0.5", 3).await;

        let record = db.bans().get("10.0.0.5").await.unwrap().unwrap();
        assert_eq!(record.banned_for, 3);
        assert_eq!(db.hosts().times_banned("10.0.0.5").await.unwrap(), 1);
        assert!(filter.contents().contains("10.0.0.5"));
    }

    #[tokio::test]
    async fn test_no_action_does_nothing() {
        let db = Database::in_memory().await.unwrap();
        let filter = MemoryFilterSet::new("unwelcome");
        let reconciler = BanReconciler::new(&db, &filter, RunMode::Commit);

        let outcome = reconciler
            .apply_ban("10.0.0.5", Decision::NoAction, start())
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Unchanged);
        assert!(filter.calls().is_empty());
    }

    #[tokio::test]
    async fn test_expiry_boundary() {
        let db = Database::in_memory().await.unwrap();
        let filter = MemoryFilterSet::new("unwelcome");
        let reconciler = BanReconciler::new(&db, &filter, RunMode::Commit);

        ban(&reconciler, &db, "10.0.0.5", 3).await;

        // T + D - 1 day, late in the evening: still banned
        let day_before = start()
            .checked_add_days(Days::new(2))
            .unwrap()
            .date()
            .and_hms_opt(23, 59, 59)
            .unwrap();
        let summary = reconciler.sweep_expired(day_before).await.unwrap();
        assert_eq!(summary.removed, 0);
        assert!(db.bans().get("10.0.0.5").await.unwrap().is_some());
        assert!(filter.contents().contains("10.0.0.5"));

        // T + D, first thing in the morning: gone from both
        let expiry_day = start()
            .checked_add_days(Days::new(3))
            .unwrap()
            .date()
            .and_hms_opt(0, 0, 1)
            .unwrap();
        let summary = reconciler.sweep_expired(expiry_day).await.unwrap();
        assert_eq!(summary.removed, 1);
        assert!(db.bans().get("10.0.0.5").await.unwrap().is_none());
        assert!(!filter.contents().contains("10.0.0.5"));

        // The ledger keeps the host
        assert_eq!(db.hosts().times_banned("10.0.0.5").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sweep_mixed_durations() {
        let db = Database::in_memory().await.unwrap();
        let filter = MemoryFilterSet::new("unwelcome");
        let reconciler = BanReconciler::new(&db, &filter, RunMode::Commit);

        ban(&reconciler, &db, "10.0.0.1", 1).await;
        ban(&reconciler, &db, "10.0.0.2", 3).await;
        ban(&reconciler, &db, "10.0.0.3", 9).await;

        let now = start().checked_add_days(Days::new(3)).unwrap();
        let summary = reconciler.sweep_expired(now).await.unwrap();

        assert_eq!(summary.removed, 2);
        let remaining: Vec<String> = db
            .bans()
            .all()
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.ip)
            .collect();
        assert_eq!(remaining, vec!["10.0.0.3"]);
        assert_eq!(filter.contents().len(), 1);
    }

    #[tokio::test]
    async fn test_restore_missing_readds_lost_members() {
        let db = Database::in_memory().await.unwrap();
        let filter = MemoryFilterSet::new("unwelcome");
        let reconciler = BanReconciler::new(&db, &filter, RunMode::Commit);

        filter.fail_on("add");
        ban(&reconciler, &db, "10.0.0.5", 3).await;
        assert!(filter.contents().is_empty());

        // Admin-managed entry without a ban row is not touched
        filter.insert("192.0.2.1");
        filter.clear_failures();

        let restored = reconciler.restore_missing(start()).await.unwrap();

        assert_eq!(restored, 1);
        assert!(filter.contents().contains("10.0.0.5"));
        assert!(filter.contents().contains("192.0.2.1"));
    }

    #[tokio::test]
    async fn test_dry_run_sweep_is_simulated() {
        let db = Database::in_memory().await.unwrap();
        let filter = MemoryFilterSet::new("unwelcome");
        ban(&BanReconciler::new(&db, &filter, RunMode::Commit), &db, "10.0.0.5", 1).await;

        let dry = BanReconciler::new(&db, &filter, RunMode::DryRun);
        let now = start().checked_add_days(Days::new(5)).unwrap();
        dry.sweep_expired(now).await.unwrap();

        assert!(db.bans().get("10.0.0.5").await.unwrap().is_some());
        assert!(filter.contents().contains("10.0.0.5"));
    }
}
