//! Reconciliation sweeps.
//!
//! Each sweep discovers every run awaiting reconciliation and drives it
//! through the verifier strictly one at a time — never concurrently.
//! Ledger queries are filtered by caller identity, and sequential
//! processing is what keeps overlapping time windows from reintroducing
//! cross-run contamination at the query layer; there is no throughput to
//! win back, since ledger queries are I/O-bound and infrequent.
//!
//! State is persisted per run, after each run, so it is safe to crash
//! and restart between runs and each invocation is an independent sweep.

use serde::Serialize;
use tracing::{error, info, warn};

use tally_core::domain::error::Result;
use tally_core::domain::run::{RunRecord, UsageTotals, VerificationStatus};
use tally_core::store::RunStore;

use crate::verifier::StabilityVerifier;

/// Outcome of one run's processing within a sweep.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReconciliationResult {
    pub run_id: String,
    pub framework: String,
    pub old_status: VerificationStatus,
    pub new_status: VerificationStatus,
    pub totals: UsageTotals,
    pub attempt_count: usize,
}

/// Drives pending runs through verification and persists the results.
pub struct ReconciliationScheduler {
    store: RunStore,
    verifier: StabilityVerifier,
}

impl ReconciliationScheduler {
    pub fn new(store: RunStore, verifier: StabilityVerifier) -> Self {
        Self { store, verifier }
    }

    /// One sweep against the current wall clock.
    pub async fn run_once(&self) -> Result<Vec<ReconciliationResult>> {
        self.run_once_at(chrono::Utc::now().timestamp()).await
    }

    /// One complete sweep at an explicit point in time.
    ///
    /// Discovers non-terminal runs old enough to query (runs past the
    /// max age are included once more so the verifier can record their
    /// terminal attempt), processes them in ascending `start_timestamp`
    /// order, and persists each run before moving to the next.
    pub async fn run_once_at(&self, now: i64) -> Result<Vec<ReconciliationResult>> {
        let min_age = self.verifier.policy().min_age_secs;
        let mut runs = self.store.list_reconcilable(now, min_age)?;
        let mut results = Vec::with_capacity(runs.len());

        for run in &mut runs {
            let old_status = run.status();
            let new_status = self.verifier.verify_at(run, now).await;

            if let Err(e) = self.store.save(run) {
                // A record the store refuses to persist (e.g. hand-edited
                // into a schema violation) must not block the rest of the
                // sweep; it will surface again next sweep.
                error!(run_id = %run.run_id, error = %e, "failed to persist run after attempt");
                continue;
            }

            self.log_transition(run, old_status, new_status);
            results.push(ReconciliationResult {
                run_id: run.run_id.clone(),
                framework: run.framework.clone(),
                old_status,
                new_status,
                totals: run.aggregate_metrics.totals(),
                attempt_count: run.usage_reconciliation.attempts.len(),
            });
        }

        info!(swept = results.len(), "reconciliation sweep complete");
        Ok(results)
    }

    /// One structured event per run per transition, with the observed
    /// totals, so an operator can audit when and why a run converged.
    fn log_transition(
        &self,
        run: &RunRecord,
        old_status: VerificationStatus,
        new_status: VerificationStatus,
    ) {
        let metrics = &run.aggregate_metrics;
        info!(
            run_id = %run.run_id,
            framework = %run.framework,
            old_status = ?old_status,
            new_status = ?new_status,
            tokens_in = metrics.tokens_in,
            tokens_out = metrics.tokens_out,
            api_calls = metrics.api_calls,
            cached_tokens = metrics.cached_tokens,
            attempt_count = run.usage_reconciliation.attempts.len(),
            "run reconciled"
        );

        if new_status == VerificationStatus::Failed {
            // Full history at warn level for post-mortem analysis.
            for (i, attempt) in run.usage_reconciliation.attempts.iter().enumerate() {
                warn!(
                    run_id = %run.run_id,
                    attempt = i + 1,
                    timestamp = attempt.timestamp,
                    status = ?attempt.status,
                    tokens_in = attempt.totals.tokens_in,
                    tokens_out = attempt.totals.tokens_out,
                    "reconciliation attempt history"
                );
            }
        }
    }
}
