//! Engine configuration.
//!
//! Loaded once at startup and passed by reference into each component.
//! Every field is required: a missing or malformed key is a fatal
//! `ConfigError` naming the full key path, raised before any network
//! call. There are no silent defaults.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use crate::domain::error::ConfigError;
use crate::domain::validation::validate_caller_identity;

/// Connection details for the external usage ledger.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LedgerConfig {
    /// Base URL of the ledger API.
    pub base_url: String,
    /// Admin key authorized to query the usage report endpoint.
    pub admin_key: String,
    /// Per-request timeout. Expiry is a transient error, not a failure.
    pub timeout_secs: u64,
}

/// The two identity values for one framework: the execution credential
/// reference, and the ledger-side key id that filters queries to it.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FrameworkIdentity {
    /// Reference to the credential the adapter executes with (an env var
    /// name or secret ref — the engine never needs the secret itself).
    pub api_key_ref: String,
    /// Queryable ledger key id (`apikey_` + alphanumeric suffix).
    pub key_id: String,
}

/// Reconciliation thresholds. The ledger publishes no SLA for its
/// reporting delay, so these are empirically chosen per provider —
/// configurable, never defaulted.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct ReconcileConfig {
    /// Runs younger than this are not queried (ledger reporting delay).
    pub min_age_secs: i64,
    /// Runs older than this that are still unstable are marked failed.
    pub max_age_secs: i64,
    /// Consecutive identical non-empty observations required to verify.
    pub required_stable_attempts: u32,
    /// Interval between scheduler sweeps, used by the daemon.
    pub poll_interval_secs: u64,
}

/// Per-million-token pricing used to derive `cost`.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct Pricing {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
    pub cache_read_per_mtok: f64,
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TallyConfig {
    pub ledger: LedgerConfig,
    pub frameworks: BTreeMap<String, FrameworkIdentity>,
    pub reconciliation: ReconcileConfig,
    pub pricing: Pricing,
}

impl TallyConfig {
    /// Read and parse a JSON config file, then build with strict accessors.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let value: Value = serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_value(&value)
    }

    /// Build a config from parsed JSON, failing on the first missing or
    /// malformed key with its full path.
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let ledger = require_object(value, "ledger")?;
        let ledger = LedgerConfig {
            base_url: require_str(ledger, "ledger.base_url")?,
            admin_key: require_str(ledger, "ledger.admin_key")?,
            timeout_secs: require_u64(ledger, "ledger.timeout_secs")?,
        };

        let frameworks_obj = require_object(value, "frameworks")?
            .as_object()
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "frameworks".to_string(),
                reason: "expected an object".to_string(),
            })?;
        let mut frameworks = BTreeMap::new();
        for (name, entry) in frameworks_obj {
            let key = |field: &str| format!("frameworks.{name}.{field}");
            let identity = FrameworkIdentity {
                api_key_ref: require_str(entry, &key("api_key_ref"))?,
                key_id: require_str(entry, &key("key_id"))?,
            };
            validate_caller_identity(name, &identity.key_id).map_err(|e| {
                ConfigError::InvalidValue {
                    key: key("key_id"),
                    reason: e.to_string(),
                }
            })?;
            frameworks.insert(name.clone(), identity);
        }

        let recon = require_object(value, "reconciliation")?;
        let reconciliation = ReconcileConfig {
            min_age_secs: require_i64(recon, "reconciliation.min_age_secs")?,
            max_age_secs: require_i64(recon, "reconciliation.max_age_secs")?,
            required_stable_attempts: require_u64(recon, "reconciliation.required_stable_attempts")?
                as u32,
            poll_interval_secs: require_u64(recon, "reconciliation.poll_interval_secs")?,
        };

        let pricing_obj = require_object(value, "pricing")?;
        let pricing = Pricing {
            input_per_mtok: require_f64(pricing_obj, "pricing.input_per_mtok")?,
            output_per_mtok: require_f64(pricing_obj, "pricing.output_per_mtok")?,
            cache_read_per_mtok: require_f64(pricing_obj, "pricing.cache_read_per_mtok")?,
        };

        let config = Self {
            ledger,
            frameworks,
            reconciliation,
            pricing,
        };
        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks beyond key presence.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, reason: &str| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        if self.ledger.base_url.is_empty() {
            return Err(invalid("ledger.base_url", "must not be empty"));
        }
        if self.ledger.admin_key.is_empty() {
            return Err(invalid("ledger.admin_key", "must not be empty"));
        }
        if self.frameworks.is_empty() {
            return Err(invalid("frameworks", "at least one framework is required"));
        }
        if self.reconciliation.min_age_secs < 0 {
            return Err(invalid("reconciliation.min_age_secs", "must be non-negative"));
        }
        if self.reconciliation.max_age_secs <= self.reconciliation.min_age_secs {
            return Err(invalid(
                "reconciliation.max_age_secs",
                "must be greater than min_age_secs",
            ));
        }
        if self.reconciliation.required_stable_attempts == 0 {
            return Err(invalid(
                "reconciliation.required_stable_attempts",
                "must be at least 1",
            ));
        }
        if self.reconciliation.poll_interval_secs == 0 {
            return Err(invalid("reconciliation.poll_interval_secs", "must be positive"));
        }
        Ok(())
    }

    /// Look up the identity pair for a framework, by name.
    pub fn identity_for(&self, framework: &str) -> Result<&FrameworkIdentity, ConfigError> {
        self.frameworks
            .get(framework)
            .ok_or_else(|| ConfigError::UnknownFramework {
                framework: framework.to_string(),
            })
    }
}

// Strict accessors: value-or-error, carrying the full key path. The
// permissive `.get(key).unwrap_or(default)` shape is deliberately absent.

fn require_key<'a>(value: &'a Value, key: &str) -> Result<&'a Value, ConfigError> {
    let leaf = key.rsplit('.').next().expect("split yields at least one part");
    value.get(leaf).ok_or_else(|| ConfigError::MissingKey {
        key: key.to_string(),
    })
}

fn require_object<'a>(value: &'a Value, key: &str) -> Result<&'a Value, ConfigError> {
    let v = require_key(value, key)?;
    if !v.is_object() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "expected an object".to_string(),
        });
    }
    Ok(v)
}

fn require_str(value: &Value, key: &str) -> Result<String, ConfigError> {
    require_key(value, key)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "expected a string".to_string(),
        })
}

fn require_i64(value: &Value, key: &str) -> Result<i64, ConfigError> {
    require_key(value, key)?
        .as_i64()
        .ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "expected an integer".to_string(),
        })
}

fn require_u64(value: &Value, key: &str) -> Result<u64, ConfigError> {
    require_key(value, key)?
        .as_u64()
        .ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "expected a non-negative integer".to_string(),
        })
}

fn require_f64(value: &Value, key: &str) -> Result<f64, ConfigError> {
    require_key(value, key)?
        .as_f64()
        .ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "expected a number".to_string(),
        })
}
