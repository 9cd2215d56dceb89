//! Persistent State
//!
//! Async SQLite access through SQLx for:
//! - the host ledger (every IP ever seen failing a login)
//! - the active ban table
//! - the run cursor (timestamp of the last successful scan)

pub mod bans;
pub mod cursor;
pub mod hosts;

pub use bans::{BanRecord, BanRepository};
pub use cursor::RunCursor;
pub use hosts::{HostLedger, HostRecord};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

static MEMDB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("failed to create state directory {path}: {source}")]
    StateDir {
        path: String,
        source: std::io::Error,
    },
}

/// Owned handle to the state database
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connection acquire timeout
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Open (creating if needed) the database at `path` and apply migrations
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::StateDir {
                    path: parent.display().to_string(),
                    source,
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        // One writer at a time; concurrent invocations are not supported anyway
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Self::ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await?;

        info!(path = %path.display(), "Database connected");
        Self::prepare(pool).await
    }

    /// Open a private in-memory database
    pub async fn in_memory() -> Result<Self, StoreError> {
        // Shared-cache URIs are process global, so each call gets its own name
        let id = MEMDB_COUNTER.fetch_add(1, Ordering::Relaxed);
        let memdb_uri = format!(
            "file:unwelcome-memdb-{}-{}?mode=memory&cache=shared",
            std::process::id(),
            id
        );

        let options = SqliteConnectOptions::new()
            .filename(&memdb_uri)
            .shared_cache(true)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .acquire_timeout(Self::ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await?;

        Self::prepare(pool).await
    }

    async fn prepare(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Database migrations checked/applied");

        Ok(Self { pool })
    }

    /// Host ledger repository
    pub fn hosts(&self) -> HostLedger<'_> {
        HostLedger::new(&self.pool)
    }

    /// Active ban repository
    pub fn bans(&self) -> BanRepository<'_> {
        BanRepository::new(&self.pool)
    }

    /// Run cursor
    pub fn cursor(&self) -> RunCursor<'_> {
        RunCursor::new(&self.pool)
    }

    /// Close the pool, flushing any pending writes
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// SQLite integers are signed; counters never go negative
pub(crate) fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

pub(crate) fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
