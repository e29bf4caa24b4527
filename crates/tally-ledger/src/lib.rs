//! Tally Ledger - usage ledger access
//!
//! Provides the time-bucketed ledger client and whole-window bucket
//! aggregation:
//! - Minute-granularity, identity-filtered usage queries
//! - Window splitting against the ledger's bucket-per-query ceiling
//! - Pure summation of every bucket touching a run's window

pub mod aggregate;
pub mod client;
pub mod fakes;
pub mod model;

// Re-export key types
pub use aggregate::{overlaps, sum_overlapping};
pub use client::{HttpLedgerClient, LedgerClient, LedgerError};
pub use model::{QueryWindow, UsageBucket, UsageReportPage, BUCKET_WIDTH, MAX_BUCKETS_PER_QUERY};
