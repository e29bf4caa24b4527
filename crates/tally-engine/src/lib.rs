//! Tally Engine - reconciliation orchestration
//!
//! Provides the stability verifier and sweep scheduler that:
//! - Re-aggregate a run's window until the ledger's totals stop changing
//! - Record every polling cycle as an auditable attempt
//! - Persist updated run records after each run, one run at a time

pub mod scheduler;
pub mod verifier;

// Re-export key types
pub use scheduler::{ReconciliationResult, ReconciliationScheduler};
pub use verifier::StabilityVerifier;
