//! Tally Core Library
//!
//! Domain types, schema validation, configuration, cost model, and the
//! filesystem run store for the usage reconciliation engine.

pub mod config;
pub mod cost;
pub mod domain;
pub mod store;
pub mod telemetry;

pub use config::{FrameworkIdentity, LedgerConfig, Pricing, ReconcileConfig, TallyConfig};
pub use cost::cost_for;
pub use domain::{
    validate_caller_identity, validate_no_step_usage_fields, validate_record,
    validate_run_config, AggregateMetrics, ConfigError, ReconciliationAttempt, Result, RunRecord,
    SchemaError, TallyError, UsageReconciliation, UsageTotals, VerificationStatus,
};
pub use store::RunStore;
pub use telemetry::init_tracing;
