//! External Filter Bridge
//!
//! Boundary to the packet-filter address set that actually drops traffic.
//! The production implementation shells out to `ipset`; tests use the
//! in-memory set.

pub mod ipset;
pub mod memory;

pub use ipset::Ipset;
pub use memory::MemoryFilterSet;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Filter tool errors
#[derive(Debug, Error)]
pub enum FilterError {
    /// Precondition failure: the named set has to be created by the operator
    #[error("{set} ipset must exist")]
    SetMissing { set: String },
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("{command} {operation} exited with status {status}: {stderr}")]
    Command {
        command: String,
        operation: String,
        status: i32,
        stderr: String,
    },
    #[error("{command} {operation} timed out after {timeout:?}")]
    Timeout {
        command: String,
        operation: String,
        timeout: Duration,
    },
}

/// Named address set consulted by the packet filter
#[async_trait]
pub trait FilterSet: Send + Sync {
    /// Name of the set, for logging
    fn name(&self) -> &str;

    /// Whether the set exists (`list`)
    async fn exists(&self) -> Result<bool, FilterError>;

    /// Add an address to the set
    async fn add(&self, ip: &str) -> Result<(), FilterError>;

    /// Remove an address from the set
    async fn remove(&self, ip: &str) -> Result<(), FilterError>;

    /// Current members of the set
    async fn members(&self) -> Result<Vec<String>, FilterError>;

    /// Restore-formatted dump of the set (`save`)
    async fn save(&self) -> Result<String, FilterError>;
}
