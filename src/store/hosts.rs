//! Host Ledger
//!
//! Audit trail of every IP that has failed a login. Rows are never deleted
//! and both counters only move upwards.

use super::{to_i64, to_u64, StoreError};
use chrono::NaiveDateTime;
use sqlx::{SqliteConnection, SqlitePool};

/// Lifetime record for one source address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    pub ip: String,
    pub first_seen: NaiveDateTime,
    pub last_seen: NaiveDateTime,
    pub times_seen: u64,
    pub times_banned: u64,
}

/// Repository over the `hosts` table
pub struct HostLedger<'a> {
    pool: &'a SqlitePool,
}

impl<'a> HostLedger<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the host if needed, then add `count` sightings at `observed_at`
    pub async fn record_observation(
        &self,
        ip: &str,
        count: u64,
        observed_at: NaiveDateTime,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO hosts (ip, first_seen, last_seen, times_seen, times_banned)
            VALUES (?, ?, ?, 0, 0)
            "#,
        )
        .bind(ip)
        .bind(observed_at)
        .bind(observed_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE hosts SET times_seen = times_seen + ?, last_seen = ? WHERE ip = ?")
            .bind(to_i64(count))
            .bind(observed_at)
            .bind(ip)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Number of bans recorded against `ip`; 0 for unknown hosts
    pub async fn times_banned(&self, ip: &str) -> Result<u64, StoreError> {
        let banned: Option<i64> = sqlx::query_scalar("SELECT times_banned FROM hosts WHERE ip = ?")
            .bind(ip)
            .fetch_optional(self.pool)
            .await?;

        Ok(banned.map(to_u64).unwrap_or(0))
    }

    /// Set the ban count to the scheduler's value on `conn`, so callers can
    /// fold it into their own transaction. Never lowers it.
    pub async fn set_times_banned(
        conn: &mut SqliteConnection,
        ip: &str,
        times_banned: u64,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE hosts SET times_banned = MAX(times_banned, ?) WHERE ip = ?")
            .bind(to_i64(times_banned))
            .bind(ip)
            .execute(conn)
            .await?;

        Ok(())
    }

    /// Fetch one host
    pub async fn get(&self, ip: &str) -> Result<Option<HostRecord>, StoreError> {
        let row = sqlx::query_as::<_, (String, NaiveDateTime, NaiveDateTime, i64, i64)>(
            r#"
            SELECT ip, first_seen, last_seen, times_seen, times_banned
            FROM hosts
            WHERE ip = ?
            "#,
        )
        .bind(ip)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(Self::from_row))
    }

    /// All known hosts, ordered by address text
    pub async fn all(&self) -> Result<Vec<HostRecord>, StoreError> {
        let rows = sqlx::query_as::<_, (String, NaiveDateTime, NaiveDateTime, i64, i64)>(
            r#"
            SELECT ip, first_seen, last_seen, times_seen, times_banned
            FROM hosts
            ORDER BY ip
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(Self::from_row).collect())
    }

    fn from_row(
        (ip, first_seen, last_seen, times_seen, times_banned): (
            String,
            NaiveDateTime,
            NaiveDateTime,
            i64,
            i64,
        ),
    ) -> HostRecord {
        HostRecord {
            ip,
            first_seen,
            last_seen,
            times_seen: to_u64(times_seen),
            times_banned: to_u64(times_banned),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::HostLedger;
    use crate::store::Database;
    use chrono::{NaiveDate, NaiveDateTime};

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, d)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn test_first_observation_creates_host() {
        let db = Database::in_memory().await.unwrap();
        let hosts = db.hosts();

        hosts.record_observation("10.0.0.5", 1, day(1)).await.unwrap();

        let host = hosts.get("10.0.0.5").await.unwrap().unwrap();
        assert_eq!(host.times_seen, 1);
        assert_eq!(host.times_banned, 0);
        assert_eq!(host.first_seen, day(1));
        assert_eq!(host.last_seen, day(1));
    }

    #[tokio::test]
    async fn test_observations_accumulate() {
        let db = Database::in_memory().await.unwrap();
        let hosts = db.hosts();

        hosts.record_observation("10.0.0.5", 3, day(1)).await.unwrap();
        hosts.record_observation("10.0.0.5", 4, day(2)).await.unwrap();

        let host = hosts.get("10.0.0.5").await.unwrap().unwrap();
        assert_eq!(host.times_seen, 7);
        assert_eq!(host.first_seen, day(1));
        assert_eq!(host.last_seen, day(2));
    }

    #[tokio::test]
    async fn test_times_banned_unknown_host_is_zero() {
        let db = Database::in_memory().await.unwrap();
        assert_eq!(db.hosts().times_banned("10.9.9.9").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_times_banned_never_decreases() {
        let db = Database::in_memory().await.unwrap();
        let hosts = db.hosts();

        hosts.record_observation("10.0.0.5", 1, day(1)).await.unwrap();
        let mut conn = db.pool.acquire().await.unwrap();
        HostLedger::set_times_banned(&mut *conn, "10.0.0.5", 3).await.unwrap();
        HostLedger::set_times_banned(&mut *conn, "10.0.0.5", 1).await.unwrap();
        drop(conn);

        assert_eq!(hosts.times_banned("10.0.0.5").await.unwrap(), 3);
    }
}
