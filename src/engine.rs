//! Scan Orchestration
//!
//! One invocation: precheck, scan since the floor, ban, advance the cursor,
//! sweep expired bans and snapshot the filter set.

use crate::ban::{BanReconciler, BanScheduler, Mutation, Outcome, RunMode};
use crate::config::Config;
use crate::filter::{FilterError, FilterSet};
use crate::report::{self, RunReport};
use crate::scanner::{self, EventExtractor};
use crate::store::Database;
use crate::Result;
use chrono::{Local, NaiveDateTime, Timelike};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Per-invocation switches from the command line
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Ignore the stored cursor and rescan the whole log
    pub from_scratch: bool,
    /// Compute and report everything, write nothing
    pub dry_run: bool,
    /// Export per-IP counts for this run
    pub log_ips: bool,
}

/// Ties the components together for a run
pub struct Unwelcome<'a> {
    config: &'a Config,
    db: &'a Database,
    filter: &'a dyn FilterSet,
    scheduler: BanScheduler,
}

impl<'a> Unwelcome<'a> {
    pub fn new(config: &'a Config, db: &'a Database, filter: &'a dyn FilterSet) -> Self {
        Self {
            config,
            db,
            filter,
            scheduler: BanScheduler::from_config(&config.options),
        }
    }

    /// The filter set must already exist; nothing is written otherwise
    pub async fn precheck(&self) -> std::result::Result<(), FilterError> {
        let exists = match self.filter.exists().await {
            Ok(exists) => exists,
            Err(e) => {
                error!(error = %e, "Unable to query {}", self.filter.name());
                false
            }
        };

        if !exists {
            return Err(FilterError::SetMissing {
                set: self.filter.name().to_string(),
            });
        }

        Ok(())
    }

    /// Run against the current local time
    pub async fn run(&self, options: RunOptions) -> Result<RunReport> {
        self.run_at(options, Local::now().naive_local()).await
    }

    /// Run as if the scan started at `now`
    pub async fn run_at(&self, options: RunOptions, now: NaiveDateTime) -> Result<RunReport> {
        let timer = Instant::now();
        self.precheck().await?;

        let started_at = now.with_nanosecond(0).unwrap_or(now);
        let mode = RunMode::from_dry_run(options.dry_run);
        let reconciler = BanReconciler::new(self.db, self.filter, mode);
        let gate = reconciler.gate();

        let floor = self.db.cursor().floor(options.from_scratch).await?;
        info!("Last run: {}", floor);

        let extractor = EventExtractor::new(started_at)?;
        let tally = scanner::scan_file(&self.config.options.audit_log, &extractor, floor).await?;

        let mut report = RunReport::new(options.dry_run, started_at, floor);
        report.lines_read = tally.lines_read;
        report.lines_matched = tally.lines_matched;
        report.ips_seen = tally.ips.len();

        for (user, count) in tally.top_users(5) {
            debug!(user = %user, count, "Most targeted account");
        }

        for (&ip, &count) in &tally.ips {
            let ip_str = ip.to_string();

            let observed = gate
                .apply(Mutation::Observe {
                    ip: ip_str.clone(),
                    count,
                    at: started_at,
                })
                .await;
            if let Err(e) = observed {
                error!(ip = %ip_str, error = %e, "Failed to record observation");
                report.store_failures += 1;
                continue;
            }

            if !self.scheduler.should_ban(count) {
                continue;
            }

            if self.is_ignored(ip) {
                info!(
                    ip = %ip_str,
                    failures = count,
                    "Over threshold but in ignore_ips, not banning"
                );
                report.ips_ignored += 1;
                continue;
            }

            let prior_bans = match self.db.hosts().times_banned(&ip_str).await {
                Ok(prior) => prior,
                Err(e) => {
                    error!(ip = %ip_str, error = %e, "Failed to read ban count");
                    report.store_failures += 1;
                    continue;
                }
            };

            let decision = self.scheduler.evaluate(count, prior_bans);

            match reconciler.apply_ban(&ip_str, decision, started_at).await {
                Ok(outcome) => {
                    report.ips_banned += 1;
                    if outcome == Outcome::FilterDrift {
                        report.filter_failures += 1;
                    }
                }
                Err(e) => {
                    error!(ip = %ip_str, error = %e, "Failed to record ban");
                    report.store_failures += 1;
                }
            }
        }

        if let Err(e) = gate.apply(Mutation::AdvanceCursor { to: started_at }).await {
            error!(error = %e, "Failed to advance run cursor");
            report.store_failures += 1;
        }

        if options.log_ips {
            let log_dir = &self.config.paths.log_dir;
            if let Err(e) = report::export_seen_ips(log_dir, started_at, &tally).await {
                warn!(error = %e, "Failed to export seen IPs");
            }
        }

        if mode.is_dry_run() {
            info!("Dry run, skipping expiry sweep and snapshot");
        } else {
            match reconciler.sweep_expired(started_at).await {
                Ok(summary) => {
                    report.bans_swept = summary.removed;
                    report.filter_failures += summary.deferred;
                }
                Err(e) => {
                    error!(error = %e, "Expiry sweep failed");
                    report.store_failures += 1;
                }
            }

            match reconciler.restore_missing(started_at).await {
                Ok(restored) => report.members_restored = restored,
                Err(e) => {
                    error!(error = %e, "Restoring filter members failed");
                    report.store_failures += 1;
                }
            }

            let snapshot = reconciler
                .persist_snapshot(&self.config.snapshot_path())
                .await;
            if snapshot == Outcome::FilterDrift {
                report.filter_failures += 1;
            }
        }

        report.elapsed = timer.elapsed();
        report.log();
        match report::export_report_json(&report) {
            Ok(json) => debug!("Run report: {}", json),
            Err(e) => warn!(error = %e, "Failed to serialize run report"),
        }
        Ok(report)
    }

    fn is_ignored(&self, ip: Ipv4Addr) -> bool {
        let addr = IpAddr::V4(ip);
        self.config
            .options
            .ignore_ips
            .iter()
            .any(|net| net.contains(&addr))
    }
}
