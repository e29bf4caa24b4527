//! Whole-window bucket aggregation.
//!
//! The ledger attributes consumption by the time its backend finished
//! processing a request, which lags the caller's observed window by
//! seconds to tens of seconds. Mapping a bucket to a specific sub-unit
//! of a run is therefore unreliable: a bucket may contain spillover from
//! the previous step, or a step's own consumption may land in the next
//! bucket. Summing every bucket that touches the run window cancels that
//! noise, because spillover in either direction nets to the same run
//! total. Reconciliation happens at run granularity only.

use tally_core::domain::run::UsageTotals;

use crate::model::{QueryWindow, UsageBucket};

/// Whether a bucket's interval touches the window at all.
pub fn overlaps(bucket: &UsageBucket, window: &QueryWindow) -> bool {
    bucket.starting_at < window.end && bucket.ending_at > window.start
}

/// Sum every bucket overlapping `window` into one run-level total.
///
/// Pure and idempotent: the same bucket set always yields the same sums.
pub fn sum_overlapping(buckets: &[UsageBucket], window: &QueryWindow) -> UsageTotals {
    let mut totals = UsageTotals::default();
    for bucket in buckets.iter().filter(|b| overlaps(b, window)) {
        totals.merge(&bucket.results);
    }
    totals
}
