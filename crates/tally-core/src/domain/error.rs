//! Domain-level error taxonomy for tally.

/// Errors produced by run-record schema validation.
///
/// These are fatal: the validator never substitutes a default for a
/// missing or malformed field, and no partial write is committed.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("run {run_id} missing required field: {field}")]
    MissingField { run_id: String, field: String },

    #[error("invalid caller identity {identity:?} for {run_id}: expected prefix {expected_prefix:?} followed by at least {min_suffix_len} alphanumeric characters")]
    InvalidCallerIdentity {
        run_id: String,
        identity: String,
        expected_prefix: &'static str,
        min_suffix_len: usize,
    },

    #[error("run {run_id} has invalid window: start {start} must be before end {end}")]
    InvalidWindow { run_id: String, start: i64, end: i64 },

    #[error("run {run_id} step {step_index} carries run-level consumption field {field:?}: usage exists only at run granularity")]
    StepUsageField {
        run_id: String,
        step_index: usize,
        field: String,
    },
}

/// Errors produced by configuration loading and strict key access.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config missing required key: {key}")]
    MissingKey { key: String },

    #[error("config key {key} is invalid: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("no identity configured for framework: {framework}")]
    UnknownFramework { framework: String },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config file {path} is not valid JSON: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Tally domain errors.
#[derive(Debug, thiserror::Error)]
pub enum TallyError {
    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("schema violation: {0}")]
    Schema(#[from] SchemaError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for tally domain operations.
pub type Result<T> = std::result::Result<T, TallyError>;
