//! Run Cursor
//!
//! Remembers when the last successful scan started so the next one only
//! looks at newer log lines.

use super::StoreError;
use chrono::NaiveDateTime;
use sqlx::SqlitePool;
use tracing::{debug, warn};

const LAST_RUN_KEY: &str = "last_run";

/// Earliest floor: used for the first run and for full rescans
pub fn epoch() -> NaiveDateTime {
    NaiveDateTime::default()
}

/// Reader/writer for the `last_run` scalar
pub struct RunCursor<'a> {
    pool: &'a SqlitePool,
}

impl<'a> RunCursor<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Persisted start time of the last successful scan, if any
    pub async fn last_run(&self) -> Result<Option<NaiveDateTime>, StoreError> {
        let last_run: Option<NaiveDateTime> =
            sqlx::query_scalar("SELECT value FROM run_state WHERE key = ?")
                .bind(LAST_RUN_KEY)
                .fetch_optional(self.pool)
                .await?;

        Ok(last_run)
    }

    /// Floor for the next scan. `from_scratch` forces a full rescan.
    pub async fn floor(&self, from_scratch: bool) -> Result<NaiveDateTime, StoreError> {
        if from_scratch {
            debug!("Full rescan requested, ignoring stored run cursor");
            return Ok(epoch());
        }

        Ok(self.last_run().await?.unwrap_or_else(epoch))
    }

    /// Move the floor forward to `scan_start`. Never moves it backwards;
    /// returns whether the stored value changed.
    pub async fn advance(&self, scan_start: NaiveDateTime) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let current: Option<NaiveDateTime> =
            sqlx::query_scalar("SELECT value FROM run_state WHERE key = ?")
                .bind(LAST_RUN_KEY)
                .fetch_optional(&mut *tx)
                .await?;

        if let Some(current) = current {
            if scan_start <= current {
                warn!(
                    "Run cursor not advanced: {} is not after stored {}",
                    scan_start, current
                );
                return Ok(false);
            }
        }

        sqlx::query(
            r#"
            INSERT INTO run_state (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(LAST_RUN_KEY)
        .bind(scan_start)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("Run cursor advanced to {}", scan_start);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;
    use chrono::NaiveDate;

    fn at(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, day)
            .unwrap()
            .and_hms_opt(4, 0, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn test_first_run_floor_is_epoch() {
        let db = Database::in_memory().await.unwrap();
        assert_eq!(db.cursor().floor(false).await.unwrap(), epoch());
    }

    #[tokio::test]
    async fn test_advance_and_read_back() {
        let db = Database::in_memory().await.unwrap();
        let cursor = db.cursor();

        assert!(cursor.advance(at(2)).await.unwrap());
        assert_eq!(cursor.floor(false).await.unwrap(), at(2));
        assert_eq!(cursor.floor(true).await.unwrap(), epoch());
    }

    #[tokio::test]
    async fn test_cursor_never_moves_backwards() {
        let db = Database::in_memory().await.unwrap();
        let cursor = db.cursor();

        cursor.advance(at(5)).await.unwrap();
        assert!(!cursor.advance(at(3)).await.unwrap());
        assert!(!cursor.advance(at(5)).await.unwrap());

        assert_eq!(cursor.last_run().await.unwrap(), Some(at(5)));
    }
}
