//! Stability verification state machine.
//!
//! The ledger is eventually consistent: totals for a window keep growing
//! for minutes to tens of minutes after a run ends. A run's total is
//! trusted only once repeated re-aggregation stops changing it. This is
//! modeled as an explicit state machine with a bounded, append-only
//! attempt history rather than a retry-until-success loop, so both
//! termination and the audit trail are explicit.
//!
//! Transitions:
//! - `data_not_available -> pending -> verified`
//! - `pending -> failed` on max-age timeout or fatal error
//! - transient ledger errors leave the current non-terminal status in
//!   place for the next sweep

use std::sync::Arc;

use tracing::{error, warn};

use tally_core::config::{Pricing, ReconcileConfig};
use tally_core::cost::cost_for;
use tally_core::domain::run::{
    AggregateMetrics, ReconciliationAttempt, RunRecord, UsageTotals, VerificationStatus,
};
use tally_core::domain::validation::validate_record;
use tally_ledger::aggregate::sum_overlapping;
use tally_ledger::client::LedgerClient;
use tally_ledger::model::QueryWindow;

/// Drives one run through a single reconciliation attempt.
pub struct StabilityVerifier {
    client: Arc<dyn LedgerClient>,
    policy: ReconcileConfig,
    pricing: Pricing,
}

impl StabilityVerifier {
    pub fn new(client: Arc<dyn LedgerClient>, policy: ReconcileConfig, pricing: Pricing) -> Self {
        Self {
            client,
            policy,
            pricing,
        }
    }

    pub fn policy(&self) -> &ReconcileConfig {
        &self.policy
    }

    /// One attempt against the current wall clock.
    pub async fn verify(&self, run: &mut RunRecord) -> VerificationStatus {
        self.verify_at(run, chrono::Utc::now().timestamp()).await
    }

    /// One attempt at an explicit point in time.
    ///
    /// Appends exactly one `ReconciliationAttempt` unless the run is
    /// already terminal, in which case this is a no-op: verified totals
    /// are immutable and failed runs are never retried.
    pub async fn verify_at(&self, run: &mut RunRecord, now: i64) -> VerificationStatus {
        let current = run.status();
        if current.is_terminal() {
            return current;
        }

        // Schema problems are fatal and surface before any network call.
        if let Err(e) = validate_record(run) {
            error!(run_id = %run.run_id, error = %e, "schema violation during verification");
            return self.record(run, now, UsageTotals::default(), VerificationStatus::Failed);
        }

        let age = run.age_secs(now);
        if age < self.policy.min_age_secs {
            // Younger than the ledger's reporting delay; don't bother asking.
            return self.record(
                run,
                now,
                UsageTotals::default(),
                VerificationStatus::DataNotAvailable,
            );
        }

        let window = match QueryWindow::new(run.start_timestamp, run.end_timestamp) {
            Ok(w) => w,
            Err(e) => {
                error!(run_id = %run.run_id, error = %e, "unqueryable run window");
                return self.record(run, now, UsageTotals::default(), VerificationStatus::Failed);
            }
        };

        let buckets = match self.client.query(window, &run.caller_identity).await {
            Ok(buckets) => buckets,
            Err(e) if e.is_transient() => {
                warn!(
                    run_id = %run.run_id,
                    error = %e,
                    "transient ledger error; run stays in current status for next sweep"
                );
                return self.record(run, now, UsageTotals::default(), current);
            }
            Err(e) => {
                error!(run_id = %run.run_id, error = %e, "fatal ledger error");
                return self.record(run, now, UsageTotals::default(), VerificationStatus::Failed);
            }
        };

        let totals = sum_overlapping(&buckets, &window);
        let timed_out = age > self.policy.max_age_secs;

        let status = if totals.is_empty() {
            if timed_out {
                VerificationStatus::Failed
            } else {
                VerificationStatus::DataNotAvailable
            }
        } else {
            let consecutive = self.trailing_stable_count(run, &totals) + 1;
            if consecutive >= self.policy.required_stable_attempts {
                VerificationStatus::Verified
            } else if timed_out {
                VerificationStatus::Failed
            } else {
                VerificationStatus::Pending
            }
        };

        if !totals.is_empty() {
            // Latest observation is the current best estimate, whatever
            // the outcome; once verified it never changes again.
            run.aggregate_metrics =
                AggregateMetrics::from_totals(totals, cost_for(&totals, &self.pricing));
        }
        if status == VerificationStatus::Verified {
            run.usage_reconciliation.verified_at = Some(now);
        }
        self.record(run, now, totals, status)
    }

    /// Append the attempt and return its status.
    fn record(
        &self,
        run: &mut RunRecord,
        now: i64,
        totals: UsageTotals,
        status: VerificationStatus,
    ) -> VerificationStatus {
        run.push_attempt(ReconciliationAttempt {
            timestamp: now,
            totals,
            status,
        });
        status
    }

    /// How many attempts at the tail of the history observed exactly
    /// these totals. Empty observations (transient errors, not-yet-
    /// reported windows) break the chain: stability requires consecutive
    /// real observations.
    fn trailing_stable_count(&self, run: &RunRecord, totals: &UsageTotals) -> u32 {
        run.usage_reconciliation
            .attempts
            .iter()
            .rev()
            .take_while(|a| !a.totals.is_empty() && a.totals == *totals)
            .count() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_ledger::fakes::{ScriptedLedger, ScriptedResponse, StaticLedger};
    use tally_ledger::model::UsageBucket;

    const MIN_AGE: i64 = 1800;
    const MAX_AGE: i64 = 86400;

    fn policy(required_stable: u32) -> ReconcileConfig {
        ReconcileConfig {
            min_age_secs: MIN_AGE,
            max_age_secs: MAX_AGE,
            required_stable_attempts: required_stable,
            poll_interval_secs: 1800,
        }
    }

    fn pricing() -> Pricing {
        Pricing {
            input_per_mtok: 3.0,
            output_per_mtok: 15.0,
            cache_read_per_mtok: 0.3,
        }
    }

    fn make_run() -> RunRecord {
        RunRecord::new("run-1", "codex", "apikey_0123456789", 1000, 1036)
    }

    fn bucket(start: i64, tokens_in: u64) -> UsageBucket {
        UsageBucket {
            starting_at: start,
            ending_at: start + 60,
            results: UsageTotals {
                tokens_in,
                ..Default::default()
            },
        }
    }

    fn verifier_with(script: Vec<ScriptedResponse>, required_stable: u32) -> StabilityVerifier {
        StabilityVerifier::new(
            Arc::new(ScriptedLedger::new(script)),
            policy(required_stable),
            pricing(),
        )
    }

    #[tokio::test]
    async fn test_young_run_is_data_not_available_without_query() {
        let ledger = Arc::new(ScriptedLedger::new(vec![]));
        let verifier = StabilityVerifier::new(ledger.clone(), policy(2), pricing());
        let mut run = make_run();

        // Ten seconds after the run ended: below min age.
        let status = verifier.verify_at(&mut run, 1046).await;
        assert_eq!(status, VerificationStatus::DataNotAvailable);
        assert_eq!(run.usage_reconciliation.attempts.len(), 1);
        assert!(ledger.queried_keys().is_empty(), "no query before min age");
    }

    // Earliest instant at which a run ending at 1036 clears min age.
    const ELIGIBLE_AT: i64 = 1036 + MIN_AGE;

    #[tokio::test]
    async fn test_empty_window_is_data_not_available() {
        let verifier = verifier_with(vec![ScriptedResponse::Buckets(vec![])], 2);
        let mut run = make_run();
        let status = verifier.verify_at(&mut run, ELIGIBLE_AT).await;
        assert_eq!(status, VerificationStatus::DataNotAvailable);
    }

    #[tokio::test]
    async fn test_example_scenario_converges_on_third_poll() {
        // 36-second run; polls at +30, +60, +90 minutes after start.
        // The first poll lands inside the reporting delay and observes
        // nothing; the next two observe 25202 -> verified with N=2.
        let verifier = verifier_with(
            vec![
                ScriptedResponse::Buckets(vec![bucket(960, 25202)]),
                ScriptedResponse::Buckets(vec![bucket(960, 25202)]),
            ],
            2,
        );
        let mut run = make_run();

        let s1 = verifier.verify_at(&mut run, 1000 + 1800).await;
        assert_eq!(s1, VerificationStatus::DataNotAvailable);

        let s2 = verifier.verify_at(&mut run, 1000 + 3600).await;
        assert_eq!(s2, VerificationStatus::Pending);

        let s3 = verifier.verify_at(&mut run, 1000 + 5400).await;
        assert_eq!(s3, VerificationStatus::Verified);
        assert_eq!(run.aggregate_metrics.tokens_in, 25202);
        assert_eq!(run.usage_reconciliation.verified_at, Some(1000 + 5400));
        assert_eq!(run.usage_reconciliation.attempts.len(), 3);
    }

    #[tokio::test]
    async fn test_changed_totals_restart_stability_count() {
        // [100, 105, 105] with N=2: pending after the second attempt,
        // verified after the third with final totals 105.
        let verifier = verifier_with(
            vec![
                ScriptedResponse::Buckets(vec![bucket(960, 100)]),
                ScriptedResponse::Buckets(vec![bucket(960, 105)]),
                ScriptedResponse::Buckets(vec![bucket(960, 105)]),
            ],
            2,
        );
        let mut run = make_run();

        let base = ELIGIBLE_AT;
        assert_eq!(
            verifier.verify_at(&mut run, base).await,
            VerificationStatus::Pending
        );
        assert_eq!(
            verifier.verify_at(&mut run, base + 1800).await,
            VerificationStatus::Pending
        );
        assert_eq!(
            verifier.verify_at(&mut run, base + 3600).await,
            VerificationStatus::Verified
        );
        assert_eq!(run.aggregate_metrics.tokens_in, 105);
    }

    #[tokio::test]
    async fn test_transient_error_keeps_status_and_breaks_chain() {
        let verifier = verifier_with(
            vec![
                ScriptedResponse::Buckets(vec![bucket(960, 100)]),
                ScriptedResponse::Transient("http status 503".to_string()),
                ScriptedResponse::Buckets(vec![bucket(960, 100)]),
            ],
            2,
        );
        let mut run = make_run();
        let base = ELIGIBLE_AT;

        assert_eq!(
            verifier.verify_at(&mut run, base).await,
            VerificationStatus::Pending
        );
        // Transient failure: status unchanged, attempt still recorded.
        assert_eq!(
            verifier.verify_at(&mut run, base + 1800).await,
            VerificationStatus::Pending
        );
        assert_eq!(run.usage_reconciliation.attempts.len(), 2);
        // The empty transient attempt broke the stable chain, so this
        // observation counts as 1 of 2, not 2 of 2.
        assert_eq!(
            verifier.verify_at(&mut run, base + 3600).await,
            VerificationStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_parse_error_is_terminal_failure() {
        let verifier = verifier_with(
            vec![ScriptedResponse::Parse("unexpected token".to_string())],
            2,
        );
        let mut run = make_run();
        let status = verifier.verify_at(&mut run, ELIGIBLE_AT).await;
        assert_eq!(status, VerificationStatus::Failed);
    }

    #[tokio::test]
    async fn test_max_age_exceeded_while_unstable_fails() {
        let verifier = verifier_with(
            vec![ScriptedResponse::Buckets(vec![bucket(960, 100)])],
            5,
        );
        let mut run = make_run();
        let status = verifier.verify_at(&mut run, 1036 + MAX_AGE + 60).await;
        assert_eq!(status, VerificationStatus::Failed);
        // The observation is still kept as the best estimate for audit.
        assert_eq!(run.aggregate_metrics.tokens_in, 100);
    }

    #[tokio::test]
    async fn test_max_age_with_empty_window_fails() {
        let verifier = verifier_with(vec![ScriptedResponse::Buckets(vec![])], 2);
        let mut run = make_run();
        let status = verifier.verify_at(&mut run, 1036 + MAX_AGE + 60).await;
        assert_eq!(status, VerificationStatus::Failed);
    }

    #[tokio::test]
    async fn test_stability_at_max_age_edge_still_verifies() {
        // If the run stabilizes on the very sweep that crosses max age,
        // the converged total wins over the timeout.
        let verifier = verifier_with(
            vec![
                ScriptedResponse::Buckets(vec![bucket(960, 100)]),
                ScriptedResponse::Buckets(vec![bucket(960, 100)]),
            ],
            2,
        );
        let mut run = make_run();
        assert_eq!(
            verifier.verify_at(&mut run, ELIGIBLE_AT).await,
            VerificationStatus::Pending
        );
        assert_eq!(
            verifier.verify_at(&mut run, 1036 + MAX_AGE + 60).await,
            VerificationStatus::Verified
        );
    }

    #[tokio::test]
    async fn test_verified_run_is_immutable_no_op() {
        let verifier = verifier_with(
            vec![
                ScriptedResponse::Buckets(vec![bucket(960, 100)]),
                ScriptedResponse::Buckets(vec![bucket(960, 100)]),
                // Would change the totals if it were ever consulted.
                ScriptedResponse::Buckets(vec![bucket(960, 999_999)]),
            ],
            2,
        );
        let mut run = make_run();
        let base = ELIGIBLE_AT;
        verifier.verify_at(&mut run, base).await;
        verifier.verify_at(&mut run, base + 1800).await;
        assert_eq!(run.status(), VerificationStatus::Verified);

        let attempts_before = run.usage_reconciliation.attempts.len();
        let metrics_before = run.aggregate_metrics;
        let status = verifier.verify_at(&mut run, base + 3600).await;

        assert_eq!(status, VerificationStatus::Verified);
        assert_eq!(run.usage_reconciliation.attempts.len(), attempts_before);
        assert_eq!(run.aggregate_metrics, metrics_before);
    }

    #[tokio::test]
    async fn test_bad_identity_fails_before_network() {
        let ledger = Arc::new(ScriptedLedger::new(vec![ScriptedResponse::Buckets(vec![
            bucket(960, 100),
        ])]));
        let verifier = StabilityVerifier::new(ledger.clone(), policy(2), pricing());

        let mut run = make_run();
        run.caller_identity = "not-a-key".to_string();
        let status = verifier.verify_at(&mut run, ELIGIBLE_AT).await;

        assert_eq!(status, VerificationStatus::Failed);
        assert!(ledger.queried_keys().is_empty(), "no network call attempted");
    }

    #[tokio::test]
    async fn test_single_required_attempt_verifies_immediately() {
        let verifier = verifier_with(
            vec![ScriptedResponse::Buckets(vec![bucket(960, 42)])],
            1,
        );
        let mut run = make_run();
        let status = verifier.verify_at(&mut run, ELIGIBLE_AT).await;
        assert_eq!(status, VerificationStatus::Verified);
        assert_eq!(run.aggregate_metrics.tokens_in, 42);
    }

    #[tokio::test]
    async fn test_cross_run_isolation_by_identity() {
        // Two runs with overlapping wall-clock windows but different
        // key ids: each only ever sees its own buckets.
        let ledger = Arc::new(StaticLedger::new());
        ledger.insert("apikey_runAaaaaa", vec![bucket(960, 100)]);
        ledger.insert("apikey_runBbbbbb", vec![bucket(960, 900)]);
        let verifier = StabilityVerifier::new(ledger, policy(1), pricing());

        let mut run_a = RunRecord::new("run-a", "codex", "apikey_runAaaaaa", 1000, 1036);
        let mut run_b = RunRecord::new("run-b", "aider", "apikey_runBbbbbb", 1010, 1040);

        verifier.verify_at(&mut run_a, ELIGIBLE_AT).await;
        verifier.verify_at(&mut run_b, ELIGIBLE_AT + 30).await;

        assert_eq!(run_a.aggregate_metrics.tokens_in, 100);
        assert_eq!(run_b.aggregate_metrics.tokens_in, 900);
    }
}
