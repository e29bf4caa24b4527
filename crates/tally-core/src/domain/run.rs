//! Run records and reconciliation state.

use serde::{Deserialize, Serialize};

/// Where a run stands in the reconciliation lifecycle.
///
/// `Verified` and `Failed` are terminal: once reached, the run is never
/// swept again and its totals never change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    /// The ledger has not yet reported anything for the run's window.
    DataNotAvailable,
    /// At least one non-empty aggregate observed, but not yet stable.
    Pending,
    /// Totals were identical across the required number of consecutive
    /// attempts. Terminal.
    Verified,
    /// Fatal error or max-age timeout. Terminal.
    Failed,
}

impl VerificationStatus {
    /// Whether this status ends the run's reconciliation lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, VerificationStatus::Verified | VerificationStatus::Failed)
    }
}

/// Ledger-sourced consumption sums for one run window.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageTotals {
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub api_calls: u64,
    pub cached_tokens: u64,
}

impl UsageTotals {
    /// Accumulate another set of totals into this one.
    pub fn merge(&mut self, other: &UsageTotals) {
        self.tokens_in += other.tokens_in;
        self.tokens_out += other.tokens_out;
        self.api_calls += other.api_calls;
        self.cached_tokens += other.cached_tokens;
    }

    /// True when every field is zero — treated as "ledger has nothing yet".
    pub fn is_empty(&self) -> bool {
        self.tokens_in == 0
            && self.tokens_out == 0
            && self.api_calls == 0
            && self.cached_tokens == 0
    }
}

/// Run-level consumption totals plus the derived cost.
///
/// These fields exist only at run granularity. Step records must never
/// carry them; `domain::validation` enforces this at persistence time.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct AggregateMetrics {
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub api_calls: u64,
    pub cached_tokens: u64,
    /// Computed from totals and configured pricing, never ledger-sourced.
    pub cost: f64,
}

impl AggregateMetrics {
    /// Build metrics from observed totals and a computed cost.
    pub fn from_totals(totals: UsageTotals, cost: f64) -> Self {
        Self {
            tokens_in: totals.tokens_in,
            tokens_out: totals.tokens_out,
            api_calls: totals.api_calls,
            cached_tokens: totals.cached_tokens,
            cost,
        }
    }

    /// The ledger-sourced portion of the metrics.
    pub fn totals(&self) -> UsageTotals {
        UsageTotals {
            tokens_in: self.tokens_in,
            tokens_out: self.tokens_out,
            api_calls: self.api_calls,
            cached_tokens: self.cached_tokens,
        }
    }
}

/// One polling cycle's observation, kept append-only per run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconciliationAttempt {
    /// When the attempt was made (Unix seconds).
    pub timestamp: i64,

    /// Totals observed this cycle (all-zero when nothing was observed,
    /// e.g. a transient ledger error or an empty window).
    pub totals: UsageTotals,

    /// Status the run held after this attempt.
    pub status: VerificationStatus,
}

impl ReconciliationAttempt {
    /// Build an attempt stamped with the current wall clock.
    pub fn now(totals: UsageTotals, status: VerificationStatus) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp(),
            totals,
            status,
        }
    }
}

/// Reconciliation state persisted alongside the run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageReconciliation {
    pub verification_status: VerificationStatus,

    /// Full attempt history, chronological, append-only.
    pub attempts: Vec<ReconciliationAttempt>,

    /// Unix seconds at which the run became `verified` (None otherwise).
    pub verified_at: Option<i64>,
}

impl Default for UsageReconciliation {
    fn default() -> Self {
        Self {
            verification_status: VerificationStatus::DataNotAvailable,
            attempts: Vec::new(),
            verified_at: None,
        }
    }
}

/// One execution of a framework under test, as persisted to disk.
///
/// Created by the driving adapter when execution finishes; mutated only by
/// the reconciliation scheduler; never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    /// Opaque unique identifier (adapters mint UUIDs, but any unique
    /// string is accepted).
    pub run_id: String,

    /// Which framework produced this run.
    pub framework: String,

    /// Ledger-side key id used to filter usage queries to this run's
    /// credential. Format-checked by the schema validator.
    pub caller_identity: String,

    /// Execution window, Unix seconds. `start_timestamp < end_timestamp`.
    pub start_timestamp: i64,
    pub end_timestamp: i64,

    /// Current best estimate of the run's consumption.
    pub aggregate_metrics: AggregateMetrics,

    pub usage_reconciliation: UsageReconciliation,

    /// Sub-run records produced by adapters (schema checked, never
    /// interpreted here).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<serde_json::Value>,
}

impl RunRecord {
    /// Create a fresh record awaiting reconciliation.
    pub fn new(
        run_id: impl Into<String>,
        framework: impl Into<String>,
        caller_identity: impl Into<String>,
        start_timestamp: i64,
        end_timestamp: i64,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            framework: framework.into(),
            caller_identity: caller_identity.into(),
            start_timestamp,
            end_timestamp,
            aggregate_metrics: AggregateMetrics::default(),
            usage_reconciliation: UsageReconciliation::default(),
            steps: Vec::new(),
        }
    }

    /// Current status, as determined by the latest attempt.
    pub fn status(&self) -> VerificationStatus {
        self.usage_reconciliation.verification_status
    }

    /// Seconds elapsed since the run finished.
    pub fn age_secs(&self, now: i64) -> i64 {
        now - self.end_timestamp
    }

    /// Append one attempt and take its status as the run's status.
    pub fn push_attempt(&mut self, attempt: ReconciliationAttempt) {
        self.usage_reconciliation.verification_status = attempt.status;
        self.usage_reconciliation.attempts.push(attempt);
    }

    /// Totals from the most recent attempt that actually observed data.
    pub fn last_observed_totals(&self) -> Option<UsageTotals> {
        self.usage_reconciliation
            .attempts
            .iter()
            .rev()
            .map(|a| a.totals)
            .find(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_run() -> RunRecord {
        RunRecord::new("run-1", "codex", "apikey_0123456789", 1000, 1036)
    }

    #[test]
    fn test_status_serde_snake_case() {
        let json = serde_json::to_string(&VerificationStatus::DataNotAvailable).expect("serialize");
        assert_eq!(json, "\"data_not_available\"");
        let json = serde_json::to_string(&VerificationStatus::Verified).expect("serialize");
        assert_eq!(json, "\"verified\"");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!VerificationStatus::DataNotAvailable.is_terminal());
        assert!(!VerificationStatus::Pending.is_terminal());
        assert!(VerificationStatus::Verified.is_terminal());
        assert!(VerificationStatus::Failed.is_terminal());
    }

    #[test]
    fn test_totals_merge() {
        let mut a = UsageTotals {
            tokens_in: 10,
            tokens_out: 20,
            api_calls: 2,
            cached_tokens: 5,
        };
        let b = UsageTotals {
            tokens_in: 1,
            tokens_out: 2,
            api_calls: 1,
            cached_tokens: 0,
        };
        a.merge(&b);
        assert_eq!(a.tokens_in, 11);
        assert_eq!(a.tokens_out, 22);
        assert_eq!(a.api_calls, 3);
        assert_eq!(a.cached_tokens, 5);
    }

    #[test]
    fn test_totals_is_empty() {
        assert!(UsageTotals::default().is_empty());
        let t = UsageTotals {
            tokens_in: 1,
            ..Default::default()
        };
        assert!(!t.is_empty());
    }

    #[test]
    fn test_run_record_serde_roundtrip() {
        let mut run = make_run();
        run.push_attempt(ReconciliationAttempt {
            timestamp: 2800,
            totals: UsageTotals {
                tokens_in: 25202,
                tokens_out: 310,
                api_calls: 4,
                cached_tokens: 12000,
            },
            status: VerificationStatus::Pending,
        });

        let json = serde_json::to_string(&run).expect("serialize");
        let back: RunRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(run, back);
    }

    #[test]
    fn test_push_attempt_updates_status() {
        let mut run = make_run();
        assert_eq!(run.status(), VerificationStatus::DataNotAvailable);

        run.push_attempt(ReconciliationAttempt {
            timestamp: 2800,
            totals: UsageTotals {
                tokens_in: 100,
                ..Default::default()
            },
            status: VerificationStatus::Pending,
        });
        assert_eq!(run.status(), VerificationStatus::Pending);
        assert_eq!(run.usage_reconciliation.attempts.len(), 1);
    }

    #[test]
    fn test_last_observed_totals_skips_empty() {
        let mut run = make_run();
        let observed = UsageTotals {
            tokens_in: 100,
            ..Default::default()
        };
        run.push_attempt(ReconciliationAttempt {
            timestamp: 1,
            totals: observed,
            status: VerificationStatus::Pending,
        });
        // Transient failure cycle records zero totals.
        run.push_attempt(ReconciliationAttempt {
            timestamp: 2,
            totals: UsageTotals::default(),
            status: VerificationStatus::Pending,
        });
        assert_eq!(run.last_observed_totals(), Some(observed));
    }

    #[test]
    fn test_empty_steps_not_serialized() {
        let run = make_run();
        let json = serde_json::to_string(&run).expect("serialize");
        assert!(!json.contains("\"steps\""));
    }
}
