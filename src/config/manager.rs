//! Configuration Manager

use super::Config;
use crate::Result;
use anyhow::{bail, Context};
use std::path::{Path, PathBuf};

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file. A missing file is an error: the caller
    /// asked for it explicitly.
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if !path.is_file() {
            bail!("Unable to locate config file {}", path.display());
        }

        tracing::info!("Loading configuration from: {}", path.display());
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::load_from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        tracing::info!("Configuration loaded and validated successfully");
        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn load_from_str(content: &str) -> Result<Config> {
        let config: Config = toml::from_str(content)?;
        config
            .validate()
            .with_context(|| "Configuration validation failed")?;
        Ok(config)
    }

    /// Build configuration from defaults plus environment variables
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Override paths and names from `UNWELCOME_*` environment variables
    pub fn apply_env_overrides(&mut self) {
        if let Ok(audit_log) = std::env::var("UNWELCOME_AUDIT_LOG") {
            self.options.audit_log = PathBuf::from(audit_log);
        }

        if let Ok(state_dir) = std::env::var("UNWELCOME_STATE_DIR") {
            self.paths.state_dir = PathBuf::from(state_dir);
        }

        if let Ok(log_dir) = std::env::var("UNWELCOME_LOG_DIR") {
            self.paths.log_dir = PathBuf::from(log_dir);
        }

        if let Ok(set_name) = std::env::var("UNWELCOME_SET_NAME") {
            self.filter.set_name = set_name;
        }

        if let Ok(log_level) = std::env::var("UNWELCOME_LOG_LEVEL") {
            self.logging.level = log_level;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_options()
            .with_context(|| "Options validation failed")?;

        self.validate_filter()
            .with_context(|| "Filter configuration validation failed")?;

        self.validate_logging()
            .with_context(|| "Logging configuration validation failed")?;

        Ok(())
    }

    fn validate_options(&self) -> Result<()> {
        if self.options.audit_log.as_os_str().is_empty() {
            bail!("options.audit_log must not be empty");
        }

        if self.options.interval == 0 {
            bail!("options.interval must be at least 1 day");
        }

        if self.options.max_ban == 0 {
            bail!("options.max_ban must be at least 1 day");
        }

        if self.options.interval_multiple == 0 {
            bail!("options.interval_multiple must be greater than 0");
        }

        Ok(())
    }

    fn validate_filter(&self) -> Result<()> {
        if self.filter.set_name.is_empty() {
            bail!("filter.set_name must not be empty");
        }

        if self.filter.set_name.len() > 31 {
            bail!("filter.set_name cannot exceed 31 characters");
        }

        if self.filter.command.is_empty() {
            bail!("filter.command must not be empty");
        }

        if self.filter.command_timeout.is_zero() {
            bail!("filter.command_timeout must be greater than 0");
        }

        Ok(())
    }

    fn validate_logging(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.as_str()) {
            bail!("logging.level must be one of: {}", valid_log_levels.join(", "));
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(&mut self, log: Option<&Path>, log_level: Option<&str>) {
        if let Some(log) = log {
            self.options.audit_log = log.to_path_buf();
            tracing::info!("CLI override: audit log set to {}", log.display());
        }

        if let Some(level) = log_level {
            self.logging.level = level.to_string();
            tracing::info!("CLI override: log level set to {}", level);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const FULL: &str = r#"
[options]
audit_log = "/tmp/auth.log"
interval = 2
interval_count = 5
interval_multiple = 3
max_ban = 30
ignore_ips = ["10.1.0.0/16", "192.168.1.7/32"]

[paths]
state_dir = "/tmp/unwelcome"
log_dir = "/tmp/unwelcome/logs"

[filter]
set_name = "blocked"
command_timeout = "3s"
"#;

    #[test]
    fn test_load_full_config() {
        let config = ConfigManager::load_from_str(FULL).unwrap();

        assert_eq!(config.options.interval, 2);
        assert_eq!(config.options.interval_count, 5);
        assert_eq!(config.options.max_ban, 30);
        assert_eq!(config.options.ignore_ips.len(), 2);
        assert_eq!(config.filter.set_name, "blocked");
        assert_eq!(config.filter.command, "ipset");
        assert_eq!(config.filter.command_timeout, Duration::from_secs(3));
        assert_eq!(
            config.database_path(),
            PathBuf::from("/tmp/unwelcome/unwelcome.db")
        );
        // Unspecified section falls back to defaults
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_missing_options_section_rejected() {
        let result = ConfigManager::load_from_str("[paths]\nstate_dir = \"/tmp\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_option_rejected() {
        let content = r#"
[options]
audit_log = "/tmp/auth.log"
interval = 3
interval_count = 21
max_ban = 90
"#;
        let err = ConfigManager::load_from_str(content).unwrap_err();
        assert!(format!("{:#}", err).contains("interval_multiple"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let content = FULL.replace("interval = 2", "interval = 0");
        assert!(ConfigManager::load_from_str(&content).is_err());
    }

    #[test]
    fn test_invalid_ignore_network_rejected() {
        let content = FULL.replace("10.1.0.0/16", "not-a-network");
        assert!(ConfigManager::load_from_str(&content).is_err());
    }

    #[test]
    fn test_missing_file_is_error() {
        let result = ConfigManager::load_from_file(Path::new("/nonexistent/unwelcome.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.options.audit_log, PathBuf::from("/var/log/auth.log"));
        assert_eq!(config.options.interval, 3);
        assert_eq!(config.options.interval_count, 21);
        assert_eq!(config.options.max_ban, 90);
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = Config::default();
        config.merge_with_cli_args(Some(Path::new("/tmp/other.log")), Some("debug"));

        assert_eq!(config.options.audit_log, PathBuf::from("/tmp/other.log"));
        assert_eq!(config.logging.level, "debug");
    }
}
