//! Schema validation for persisted run records.
//!
//! Two rules are enforced here, both fail-fast:
//!
//! 1. Identity and window fields must be present and well-formed before
//!    any ledger query is attempted.
//! 2. Consumption fields exist only at run granularity. A step record
//!    carrying any of them is rejected even when the values are
//!    well-formed: the schema itself is disallowed.

use super::error::SchemaError;
use super::run::RunRecord;

/// Required prefix for a queryable ledger key id.
pub const CALLER_IDENTITY_PREFIX: &str = "apikey_";

/// Minimum alphanumeric suffix length after the prefix.
pub const CALLER_IDENTITY_MIN_SUFFIX_LEN: usize = 8;

/// Consumption fields that may appear only on the run itself.
pub const RUN_LEVEL_USAGE_FIELDS: &[&str] =
    &["tokens_in", "tokens_out", "api_calls", "cached_tokens"];

/// Check a ledger key id against the required format: a fixed prefix plus
/// an alphanumeric suffix of minimum length.
pub fn validate_caller_identity(run_id: &str, identity: &str) -> Result<(), SchemaError> {
    let malformed = || SchemaError::InvalidCallerIdentity {
        run_id: run_id.to_string(),
        identity: identity.to_string(),
        expected_prefix: CALLER_IDENTITY_PREFIX,
        min_suffix_len: CALLER_IDENTITY_MIN_SUFFIX_LEN,
    };

    let suffix = identity.strip_prefix(CALLER_IDENTITY_PREFIX).ok_or_else(malformed)?;
    if suffix.len() < CALLER_IDENTITY_MIN_SUFFIX_LEN
        || !suffix.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(malformed());
    }
    Ok(())
}

/// Validate the identity and window configuration of a run.
///
/// # Errors
///
/// - `SchemaError::MissingField` — `run_id`, `framework`, or
///   `caller_identity` is empty.
/// - `SchemaError::InvalidCallerIdentity` — identity fails the format check.
/// - `SchemaError::InvalidWindow` — `start_timestamp >= end_timestamp`.
pub fn validate_run_config(run: &RunRecord) -> Result<(), SchemaError> {
    let missing = |field: &str| SchemaError::MissingField {
        run_id: run.run_id.clone(),
        field: field.to_string(),
    };

    if run.run_id.is_empty() {
        return Err(missing("run_id"));
    }
    if run.framework.is_empty() {
        return Err(missing("framework"));
    }
    if run.caller_identity.is_empty() {
        return Err(missing("caller_identity"));
    }
    validate_caller_identity(&run.run_id, &run.caller_identity)?;

    if run.start_timestamp >= run.end_timestamp {
        return Err(SchemaError::InvalidWindow {
            run_id: run.run_id.clone(),
            start: run.start_timestamp,
            end: run.end_timestamp,
        });
    }
    Ok(())
}

/// Reject a step record that carries any run-level consumption field.
pub fn validate_no_step_usage_fields(
    run_id: &str,
    step_index: usize,
    step: &serde_json::Value,
) -> Result<(), SchemaError> {
    if let Some(obj) = step.as_object() {
        for &field in RUN_LEVEL_USAGE_FIELDS {
            if obj.contains_key(field) {
                return Err(SchemaError::StepUsageField {
                    run_id: run_id.to_string(),
                    step_index,
                    field: field.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Full record validation: config plus every step record.
///
/// Called by the store before every write, so a violating record is
/// never committed, even partially.
pub fn validate_record(run: &RunRecord) -> Result<(), SchemaError> {
    validate_run_config(run)?;
    for (i, step) in run.steps.iter().enumerate() {
        validate_no_step_usage_fields(&run.run_id, i, step)?;
    }
    Ok(())
}
