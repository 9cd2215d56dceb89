//! Run Reporting
//!
//! End-of-run summary and the optional per-IP diagnostic export used for
//! tuning thresholds. Neither is ever read back.

use crate::scanner::ScanTally;
use crate::Result;
use anyhow::Context;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Summary of one invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub dry_run: bool,
    pub started_at: NaiveDateTime,
    pub floor: NaiveDateTime,
    pub lines_read: u64,
    pub lines_matched: u64,
    pub ips_seen: usize,
    pub ips_banned: usize,
    /// Over threshold but inside `ignore_ips`
    pub ips_ignored: usize,
    pub bans_swept: usize,
    pub members_restored: usize,
    /// Filter tool calls that failed and were left for the next run
    pub filter_failures: usize,
    /// Hosts whose store update failed mid-run
    pub store_failures: usize,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

impl RunReport {
    pub fn new(dry_run: bool, started_at: NaiveDateTime, floor: NaiveDateTime) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            dry_run,
            started_at,
            floor,
            lines_read: 0,
            lines_matched: 0,
            ips_seen: 0,
            ips_banned: 0,
            ips_ignored: 0,
            bans_swept: 0,
            members_restored: 0,
            filter_failures: 0,
            store_failures: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// Log the completion summary
    pub fn log(&self) {
        info!("Processed {} matching lines", self.lines_matched);
        info!("Banned {} IPs", self.ips_banned);
        info!(
            run_id = %self.run_id,
            dry_run = self.dry_run,
            ips_seen = self.ips_seen,
            ignored = self.ips_ignored,
            swept = self.bans_swept,
            restored = self.members_restored,
            filter_failures = self.filter_failures,
            store_failures = self.store_failures,
            "Run complete in {}",
            humantime::format_duration(self.elapsed)
        );
    }
}

/// Serialize a run report to JSON
pub fn export_report_json(report: &RunReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("Failed to serialize report to JSON")
}

/// File name for the diagnostic export of a run started at `started_at`
pub fn seen_ips_file_name(started_at: NaiveDateTime) -> String {
    format!("failed_auth_ips_{}.json", started_at.format("%Y%m%d-%H%M%S"))
}

/// Write the IP → failures map for this run into `log_dir`
pub async fn export_seen_ips(
    log_dir: &Path,
    started_at: NaiveDateTime,
    tally: &ScanTally,
) -> Result<PathBuf> {
    tokio::fs::create_dir_all(log_dir)
        .await
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

    let path = log_dir.join(seen_ips_file_name(started_at));
    info!("Saving seen IPs to {}", path.display());

    let json = serde_json::to_string(&tally.ip_counts())?;
    tokio::fs::write(&path, json)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    Ok(path)
}
