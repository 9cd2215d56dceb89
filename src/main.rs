//! Unwelcome - process the audit log for failed login attempts and maintain
//! an ipset of unwelcome IPs.
//!
//! Meant to be run periodically (cron or a systemd timer). Each run only looks
//! at log lines newer than the previous successful run.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use unwelcome::config::ConfigManager;
use unwelcome::filter::Ipset;
use unwelcome::{Config, Database, RunOptions, Unwelcome};

/// CLI arguments for unwelcome
#[derive(Parser, Debug)]
#[command(name = "unwelcome")]
#[command(about = "Unwelcome processes the audit log for failed login attempts and creates an ipset of unwelcome IPs")]
#[command(version)]
#[command(long_about = "
Unwelcome processes the audit log for failed login attempts and creates an
ipset of unwelcome IPs. Repeat offenders are banned for exponentially longer
periods, up to max_ban days.

The ipset must exist before the first run, for example:
  ipset create unwelcome hash:ip
  iptables -I INPUT -m set --match-set unwelcome src -j DROP

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables (only when no config file is given)
4. Built-in defaults

Environment variables:
  UNWELCOME_AUDIT_LOG   - Audit log to scan
  UNWELCOME_STATE_DIR   - Directory for the database and ipset snapshot
  UNWELCOME_LOG_DIR     - Directory for diagnostic exports
  UNWELCOME_SET_NAME    - Name of the ipset
  UNWELCOME_LOG_LEVEL   - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, help = "Path to configuration file")]
    pub config: Option<PathBuf>,

    /// Log to parse (overrides config file)
    #[arg(long, help = "Path to log to parse, defaults to /var/log/auth.log")]
    pub log: Option<PathBuf>,

    #[arg(long, help = "Process logfile from beginning instead of last run time")]
    pub from_scratch: bool,

    #[arg(long, help = "Parse log and count up bans only, do not alter database or ipset")]
    pub dry_run: bool,

    #[arg(long, help = "Store seen IPs to JSON for each run, useful for tuning thresholds")]
    pub log_ips: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, help = "Log level")]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let mut config = match &args.config {
        Some(path) => ConfigManager::load_from_file(path)?,
        None => ConfigManager::load_from_env()?,
    };

    let log_level = if args.verbose {
        Some("debug")
    } else {
        args.log_level.as_deref()
    };
    config.merge_with_cli_args(args.log.as_deref(), log_level);
    config
        .validate()
        .context("Final configuration validation failed")?;

    init_tracing(&config, args.dry_run)?;

    if args.validate_config {
        info!("Configuration is valid");
        info!("  Audit log: {}", config.options.audit_log.display());
        info!(
            "  Threshold: more than {} failures per run",
            config.options.interval_count
        );
        info!(
            "  Ban length: {}^n days, at most {} days",
            config.options.interval, config.options.max_ban
        );
        info!("  Ignored networks: {}", config.options.ignore_ips.len());
        info!("  State directory: {}", config.paths.state_dir.display());
        info!("  ipset: {}", config.filter.set_name);
        return Ok(());
    }

    let filter = Ipset::from_config(&config.filter);
    let db = Database::open(&config.database_path())
        .await
        .context("Failed to open state database")?;

    let options = RunOptions {
        from_scratch: args.from_scratch,
        dry_run: args.dry_run,
        log_ips: args.log_ips,
    };

    let result = Unwelcome::new(&config, &db, &filter).run(options).await;
    db.close().await;
    result?;

    Ok(())
}

/// Initialize tracing/logging. Dry runs always log to the console.
fn init_tracing(config: &Config, dry_run: bool) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.logging.file.as_deref().filter(|_| !dry_run) {
        Some(path) => {
            let file = open_log_file(path)?;
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .init();
        }
        None => {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_level(true)
                        .with_ansi(true),
                )
                .init();
        }
    }

    Ok(())
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {}", path.display()))
}
