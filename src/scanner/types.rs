//! Scanner Types

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// One failed-login record extracted from the audit log. `count` is greater
/// than one for "message repeated N times" lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedLogin {
    pub timestamp: NaiveDateTime,
    pub ip: Ipv4Addr,
    pub username: String,
    pub count: u64,
}

/// Aggregated failures for one scan window
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanTally {
    pub ips: BTreeMap<Ipv4Addr, u64>,
    pub users: BTreeMap<String, u64>,
    pub lines_read: u64,
    pub lines_matched: u64,
}

impl ScanTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the per-IP and per-username counters
    pub fn record(&mut self, event: &FailedLogin) {
        self.lines_matched += 1;
        *self.ips.entry(event.ip).or_insert(0) += event.count;
        *self.users.entry(event.username.clone()).or_insert(0) += event.count;
    }

    /// Failures attributed to `ip` in this window
    pub fn failures_for(&self, ip: Ipv4Addr) -> u64 {
        self.ips.get(&ip).copied().unwrap_or(0)
    }

    /// Usernames sorted by attempts, most targeted first
    pub fn top_users(&self, limit: usize) -> Vec<(&str, u64)> {
        let mut users: Vec<(&str, u64)> = self
            .users
            .iter()
            .map(|(user, count)| (user.as_str(), *count))
            .collect();
        users.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        users.truncate(limit);
        users
    }

    /// IP → count map keyed by dotted-quad strings, for the diagnostic export
    pub fn ip_counts(&self) -> BTreeMap<String, u64> {
        self.ips
            .iter()
            .map(|(ip, count)| (ip.to_string(), *count))
            .collect()
    }
}
