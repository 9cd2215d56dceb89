//! `ipset` command-line bridge

use super::{FilterError, FilterSet};
use crate::config::FilterConfig;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Drives a named ipset through the `ipset` binary
#[derive(Debug, Clone)]
pub struct Ipset {
    command: String,
    set_name: String,
    timeout: Duration,
}

/// Captured result of one tool invocation
struct CommandOutput {
    status: i32,
    stdout: String,
    stderr: String,
}

impl Ipset {
    pub fn new(command: impl Into<String>, set_name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            set_name: set_name.into(),
            timeout,
        }
    }

    pub fn from_config(config: &FilterConfig) -> Self {
        Self::new(&config.command, &config.set_name, config.command_timeout)
    }

    async fn run(&self, args: &[&str]) -> Result<CommandOutput, FilterError> {
        let operation = args.first().copied().unwrap_or_default();
        debug!(command = %self.command, ?args, "Running filter command");

        let child = Command::new(&self.command)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| FilterError::Timeout {
                command: self.command.clone(),
                operation: operation.to_string(),
                timeout: self.timeout,
            })?
            .map_err(|source| FilterError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        Ok(CommandOutput {
            // Killed by a signal has no code
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    async fn run_checked(&self, args: &[&str]) -> Result<CommandOutput, FilterError> {
        let output = self.run(args).await?;
        if output.status != 0 {
            return Err(FilterError::Command {
                command: self.command.clone(),
                operation: args.first().copied().unwrap_or_default().to_string(),
                status: output.status,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }
}

#[async_trait]
impl FilterSet for Ipset {
    fn name(&self) -> &str {
        &self.set_name
    }

    async fn exists(&self) -> Result<bool, FilterError> {
        let output = self.run(&["list", &self.set_name]).await?;
        Ok(output.status == 0)
    }

    async fn add(&self, ip: &str) -> Result<(), FilterError> {
        // -exist: already present is not a failure
        self.run_checked(&["add", &self.set_name, ip, "-exist"]).await?;
        Ok(())
    }

    async fn remove(&self, ip: &str) -> Result<(), FilterError> {
        self.run_checked(&["del", &self.set_name, ip, "-exist"]).await?;
        Ok(())
    }

    async fn members(&self) -> Result<Vec<String>, FilterError> {
        let output = self.run_checked(&["list", &self.set_name]).await?;
        Ok(parse_members(&output.stdout))
    }

    async fn save(&self) -> Result<String, FilterError> {
        let output = self.run_checked(&["save", &self.set_name]).await?;
        Ok(output.stdout)
    }
}

/// Pull member addresses out of `ipset list` output.
///
/// Entries may carry options after the address (`1.2.3.4 timeout 60`).
pub fn parse_members(listing: &str) -> Vec<String> {
    listing
        .lines()
        .skip_while(|line| !line.starts_with("Members:"))
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}
