//! Configuration Types

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub options: OptionsConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Detection and ban policy. Every key except `ignore_ips` is required.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OptionsConfig {
    pub audit_log: PathBuf,
    /// Base ban length in days, raised to the n-th power on the n-th ban
    pub interval: u64,
    /// Failures tolerated within one scan before a ban
    pub interval_count: u64,
    /// Reserved, not used by the ban formula
    pub interval_multiple: u64,
    /// Ceiling on any single ban, in days
    pub max_ban: u64,
    #[serde(default)]
    pub ignore_ips: Vec<IpNet>,
}

/// On-disk locations for state and artifacts
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PathsConfig {
    pub state_dir: PathBuf,
    pub log_dir: PathBuf,
}

/// Packet-filter set the bans are mirrored into
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FilterConfig {
    pub set_name: String,
    pub command: String,
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Config {
    /// SQLite database holding hosts, bans and run state
    pub fn database_path(&self) -> PathBuf {
        self.paths.state_dir.join("unwelcome.db")
    }

    /// Restore-formatted dump of the filter set
    pub fn snapshot_path(&self) -> PathBuf {
        self.paths.state_dir.join("restore.ipset")
    }
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            audit_log: PathBuf::from("/var/log/auth.log"),
            interval: 3,
            interval_count: 21,
            interval_multiple: 3,
            max_ban: 90,
            ignore_ips: vec![],
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("/var/lib/unwelcome"),
            log_dir: PathBuf::from("/var/lib/unwelcome/logs"),
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            set_name: "unwelcome".to_string(),
            command: "ipset".to_string(),
            command_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some(PathBuf::from("/var/lib/unwelcome/logs/unwelcome.log")),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            options: OptionsConfig::default(),
            paths: PathsConfig::default(),
            filter: FilterConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
