//! Ban Management
//!
//! Policy (scheduler), the dry-run write gate, and reconciliation of the
//! persisted ban table with the external filter set.

pub mod gate;
pub mod reconciler;
pub mod scheduler;

pub use gate::{Mutation, Outcome, RunMode, WriteGate};
pub use reconciler::{BanReconciler, SweepSummary};
pub use scheduler::{BanScheduler, Decision};
