//! Unwelcome Library
//!
//! Incrementally scans an authentication log for failed logins, keeps a
//! durable ledger of offending hosts, and mirrors an exponentially escalating
//! ban list into an ipset.

pub mod ban;
pub mod config;
pub mod engine;
pub mod filter;
pub mod report;
pub mod scanner;
pub mod store;

pub use config::Config;
pub use engine::{RunOptions, Unwelcome};
pub use report::RunReport;
pub use store::Database;

/// Common error type for unwelcome
pub type Result<T> = anyhow::Result<T>;
