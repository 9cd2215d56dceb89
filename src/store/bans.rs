//! Active ban table.

use super::{to_i64, to_u64, HostLedger, StoreError};
use chrono::{Days, NaiveDate, NaiveDateTime};
use sqlx::SqlitePool;

/// A ban currently in force. At most one exists per IP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanRecord {
    pub ip: String,
    pub banned_on: NaiveDateTime,
    /// Length in days
    pub banned_for: u64,
}

impl BanRecord {
    /// First calendar day on which the ban no longer applies
    pub fn expires_on(&self) -> NaiveDate {
        self.banned_on
            .date()
            .checked_add_days(Days::new(self.banned_for))
            .unwrap_or(NaiveDate::MAX)
    }

    /// Day-granular expiry: compares against the start of `now`'s day
    pub fn is_expired(&self, now: NaiveDateTime) -> bool {
        self.expires_on() <= now.date()
    }
}

/// Repository for ban operations
pub struct BanRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> BanRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a ban and raise the host's ban count in one transaction.
    ///
    /// An existing ban that is still in force at `banned_on` is left untouched;
    /// one that has already expired but not yet been swept is replaced.
    /// Returns whether a new row was written.
    pub async fn record(
        &self,
        ip: &str,
        banned_on: NaiveDateTime,
        banned_for: u64,
        times_banned: u64,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, (String, NaiveDateTime, i64)>(
            "SELECT ip, banned_on, banned_for FROM bans WHERE ip = ?",
        )
        .bind(ip)
        .fetch_optional(&mut *tx)
        .await?
        .map(Self::from_row);

        if existing.is_some_and(|ban| ban.is_expired(banned_on)) {
            sqlx::query("DELETE FROM bans WHERE ip = ?")
                .bind(ip)
                .execute(&mut *tx)
                .await?;
        }

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO bans (ip, banned_on, banned_for) VALUES (?, ?, ?)",
        )
        .bind(ip)
        .bind(banned_on)
        .bind(to_i64(banned_for))
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        HostLedger::set_times_banned(&mut *tx, ip, times_banned).await?;

        tx.commit().await?;
        Ok(inserted)
    }

    /// Remove a ban
    pub async fn delete(&self, ip: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM bans WHERE ip = ?")
            .bind(ip)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Fetch the ban for one IP
    pub async fn get(&self, ip: &str) -> Result<Option<BanRecord>, StoreError> {
        let row = sqlx::query_as::<_, (String, NaiveDateTime, i64)>(
            "SELECT ip, banned_on, banned_for FROM bans WHERE ip = ?",
        )
        .bind(ip)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(Self::from_row))
    }

    /// Every ban in the table, expired or not
    pub async fn all(&self) -> Result<Vec<BanRecord>, StoreError> {
        let rows = sqlx::query_as::<_, (String, NaiveDateTime, i64)>(
            "SELECT ip, banned_on, banned_for FROM bans ORDER BY banned_on, ip",
        )
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(Self::from_row).collect())
    }

    /// Bans whose expiry day is on or before `now`'s day
    pub async fn expired(&self, now: NaiveDateTime) -> Result<Vec<BanRecord>, StoreError> {
        let bans = self.all().await?;
        Ok(bans.into_iter().filter(|ban| ban.is_expired(now)).collect())
    }

    /// Bans still in force at `now`
    pub async fn active(&self, now: NaiveDateTime) -> Result<Vec<BanRecord>, StoreError> {
        let bans = self.all().await?;
        Ok(bans.into_iter().filter(|ban| !ban.is_expired(now)).collect())
    }

    fn from_row((ip, banned_on, banned_for): (String, NaiveDateTime, i64)) -> BanRecord {
        BanRecord {
            ip,
            banned_on,
            banned_for: to_u64(banned_for),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;

    fn at(month: u32, day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, month, day)
            .unwrap()
            .and_hms_opt(hour, 30, 0)
            .unwrap()
    }

    #[test]
    fn test_expiry_is_day_granular() {
        let ban = BanRecord {
            ip: "10.0.0.1".to_string(),
            banned_on: at(6, 1, 23),
            banned_for: 3,
        };

        assert_eq!(ban.expires_on(), NaiveDate::from_ymd_opt(2024, 6, 4).unwrap());
        assert!(!ban.is_expired(at(6, 3, 23)));
        // Start of the expiry day, earlier in the day than the ban was issued
        assert!(ban.is_expired(at(6, 4, 0)));
        assert!(ban.is_expired(at(7, 1, 0)));
    }

    #[tokio::test]
    async fn test_duplicate_record_is_noop() {
        let db = Database::in_memory().await.unwrap();
        let bans = db.bans();

        assert!(bans.record("10.0.0.1", at(6, 1, 0), 3, 1).await.unwrap());
        assert!(!bans.record("10.0.0.1", at(6, 2, 0), 9, 2).await.unwrap());

        let expected = BanRecord {
            ip: "10.0.0.1".to_string(),
            banned_on: at(6, 1, 0),
            banned_for: 3,
        };
        assert_eq!(bans.get("10.0.0.1").await.unwrap(), Some(expected));
        assert_eq!(bans.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_record_updates_host_ban_count() {
        let db = Database::in_memory().await.unwrap();
        db.hosts()
            .record_observation("10.0.0.1", 30, at(6, 1, 0))
            .await
            .unwrap();

        let inserted = db.bans().record("10.0.0.1", at(6, 1, 0), 3, 1).await.unwrap();

        assert!(inserted);
        assert_eq!(db.hosts().times_banned("10.0.0.1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_record_replaces_unswept_expired_ban() {
        let db = Database::in_memory().await.unwrap();
        let bans = db.bans();

        assert!(bans.record("10.0.0.1", at(6, 1, 0), 3, 1).await.unwrap());
        // Still in force on the 2nd: kept
        assert!(!bans.record("10.0.0.1", at(6, 2, 0), 9, 2).await.unwrap());
        assert_eq!(bans.get("10.0.0.1").await.unwrap().unwrap().banned_for, 3);

        // Expired on the 4th but the sweep has not run yet
        assert!(bans.record("10.0.0.1", at(6, 4, 0), 9, 2).await.unwrap());
        let ban = bans.get("10.0.0.1").await.unwrap().unwrap();
        assert_eq!(ban.banned_on, at(6, 4, 0));
        assert_eq!(ban.banned_for, 9);
    }

    #[tokio::test]
    async fn test_expired_and_active_partition() {
        let db = Database::in_memory().await.unwrap();
        let bans = db.bans();

        for (ip, days) in [("10.0.0.1", 1), ("10.0.0.2", 10)] {
            bans.record(ip, at(6, 1, 0), days, 1).await.unwrap();
        }

        let now = at(6, 5, 0);
        let expired = bans.expired(now).await.unwrap();
        let active = bans.active(now).await.unwrap();

        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].ip, "10.0.0.1");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].ip, "10.0.0.2");

        assert!(bans.delete("10.0.0.1").await.unwrap());
        assert!(!bans.delete("10.0.0.1").await.unwrap());
    }
}
