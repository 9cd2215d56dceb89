//! Commit-or-simulate gate
//!
//! Every write a run performs, to the store, the filter set or the snapshot
//! file, is described as a [`Mutation`] and passed through [`WriteGate::apply`].
//! In dry-run mode the gate only logs what it would have done.

use crate::filter::FilterSet;
use crate::store::{Database, StoreError};
use chrono::NaiveDateTime;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Whether writes happen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Commit,
    DryRun,
}

impl RunMode {
    pub fn from_dry_run(dry_run: bool) -> Self {
        if dry_run {
            RunMode::DryRun
        } else {
            RunMode::Commit
        }
    }

    pub fn is_dry_run(&self) -> bool {
        matches!(self, RunMode::DryRun)
    }
}

/// A single write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Add sightings to the host ledger
    Observe {
        ip: String,
        count: u64,
        at: NaiveDateTime,
    },
    /// Persist a ban, raise the host's ban count and add the IP to the set
    Ban {
        ip: String,
        banned_on: NaiveDateTime,
        days: u64,
        times_banned: u64,
    },
    /// Take the IP out of the set, then drop its ban row
    Unban { ip: String },
    /// Re-add an actively banned IP the set has lost
    Restore { ip: String },
    /// Move the run cursor forward
    AdvanceCursor { to: NaiveDateTime },
    /// Dump the set to a restore file
    Snapshot { path: PathBuf },
}

/// What happened to a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Written everywhere it needed to go
    Committed,
    /// Stored, but the filter tool failed; the next run reconciles
    FilterDrift,
    /// Nothing to do (duplicate ban, cursor already ahead)
    Unchanged,
    /// Dry-run: logged only
    Simulated,
}

/// Single funnel for all writes of a run
pub struct WriteGate<'a> {
    db: &'a Database,
    filter: &'a dyn FilterSet,
    mode: RunMode,
}

impl<'a> WriteGate<'a> {
    pub fn new(db: &'a Database, filter: &'a dyn FilterSet, mode: RunMode) -> Self {
        Self { db, filter, mode }
    }

    pub fn is_dry_run(&self) -> bool {
        self.mode.is_dry_run()
    }

    /// Commit `mutation`, or log it under dry-run.
    ///
    /// Store failures are returned; filter tool failures are logged and
    /// reported as [`Outcome::FilterDrift`].
    pub async fn apply(&self, mutation: Mutation) -> Result<Outcome, StoreError> {
        if self.is_dry_run() {
            info!("Dry run, would apply: {}", describe(&mutation));
            return Ok(Outcome::Simulated);
        }

        match mutation {
            Mutation::Observe { ip, count, at } => {
                self.db.hosts().record_observation(&ip, count, at).await?;
                Ok(Outcome::Committed)
            }
            Mutation::Ban {
                ip,
                banned_on,
                days,
                times_banned,
            } => {
                let inserted = self
                    .db
                    .bans()
                    .record(&ip, banned_on, days, times_banned)
                    .await?;
                if !inserted {
                    debug!(ip = %ip, "Ban already present, keeping original expiry");
                }

                // Add even when the row existed: the set may have lost the entry
                match self.filter.add(&ip).await {
                    Ok(()) => Ok(Outcome::Committed),
                    Err(e) => {
                        warn!(ip = %ip, error = %e, "Failed to add IP to {}", self.filter.name());
                        Ok(Outcome::FilterDrift)
                    }
                }
            }
            Mutation::Unban { ip } => {
                if let Err(e) = self.filter.remove(&ip).await {
                    // Keep the row so the next sweep retries the removal
                    warn!(ip = %ip, error = %e, "Failed to remove IP from {}", self.filter.name());
                    return Ok(Outcome::FilterDrift);
                }
                self.db.bans().delete(&ip).await?;
                Ok(Outcome::Committed)
            }
            Mutation::Restore { ip } => match self.filter.add(&ip).await {
                Ok(()) => Ok(Outcome::Committed),
                Err(e) => {
                    warn!(ip = %ip, error = %e, "Failed to restore IP to {}", self.filter.name());
                    Ok(Outcome::FilterDrift)
                }
            },
            Mutation::AdvanceCursor { to } => {
                if self.db.cursor().advance(to).await? {
                    Ok(Outcome::Committed)
                } else {
                    Ok(Outcome::Unchanged)
                }
            }
            Mutation::Snapshot { path } => Ok(self.write_snapshot(path).await),
        }
    }

    async fn write_snapshot(&self, path: PathBuf) -> Outcome {
        let dump = match self.filter.save().await {
            Ok(dump) => dump,
            Err(e) => {
                warn!(error = %e, "Failed to save {}", self.filter.name());
                return Outcome::FilterDrift;
            }
        };

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(path = %parent.display(), error = %e, "Failed to create snapshot directory");
                return Outcome::FilterDrift;
            }
        }

        match tokio::fs::write(&path, dump).await {
            Ok(()) => {
                debug!(path = %path.display(), "Filter set snapshot written");
                Outcome::Committed
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to write filter set snapshot");
                Outcome::FilterDrift
            }
        }
    }
}

fn describe(mutation: &Mutation) -> String {
    match mutation {
        Mutation::Observe { ip, count, .. } => format!("record {} failures for {}", count, ip),
        Mutation::Ban {
            ip,
            days,
            times_banned,
            ..
        } => format!("ban {} for {} days (ban #{})", ip, days, times_banned),
        Mutation::Unban { ip } => format!("unban {}", ip),
        Mutation::Restore { ip } => format!("restore {} to filter set", ip),
        Mutation::AdvanceCursor { to } => format!("advance run cursor to {}", to),
        Mutation::Snapshot { path } => format!("write snapshot to {}", path.display()),
    }
}
