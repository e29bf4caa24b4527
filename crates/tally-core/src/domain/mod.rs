//! Domain models for tally.
//!
//! Canonical definitions for the core entities:
//! - `RunRecord`: One execution of a framework under test
//! - `UsageTotals` / `AggregateMetrics`: Run-level consumption sums
//! - `ReconciliationAttempt`: One polling cycle's observation
//! - Schema validation and the error taxonomy

pub mod error;
pub mod run;
pub mod validation;

// Re-export main types and errors
pub use error::{ConfigError, Result, SchemaError, TallyError};
pub use run::{
    AggregateMetrics, ReconciliationAttempt, RunRecord, UsageReconciliation, UsageTotals,
    VerificationStatus,
};
pub use validation::{
    validate_caller_identity, validate_no_step_usage_fields, validate_record,
    validate_run_config, CALLER_IDENTITY_MIN_SUFFIX_LEN, CALLER_IDENTITY_PREFIX,
    RUN_LEVEL_USAGE_FIELDS,
};
