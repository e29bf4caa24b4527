//! Wire types for the usage ledger's time-bucketed report endpoint.

use serde::{Deserialize, Serialize};

use tally_core::domain::run::UsageTotals;

use crate::client::LedgerError;

/// Bucket width requested from the ledger. Always minutes: daily or
/// hourly buckets conflate unrelated activity that merely happened on
/// the same day, making every run on that day report the same total.
pub const BUCKET_WIDTH: &str = "1m";

/// Ledger-enforced ceiling on buckets per query (24h of minute buckets).
pub const MAX_BUCKETS_PER_QUERY: i64 = 1440;

/// Seconds covered by one bucket.
pub const BUCKET_WIDTH_SECS: i64 = 60;

/// A half-open query window in Unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryWindow {
    pub start: i64,
    pub end: i64,
}

impl QueryWindow {
    /// Build a window, rejecting `start >= end`.
    pub fn new(start: i64, end: i64) -> Result<Self, LedgerError> {
        if start >= end {
            return Err(LedgerError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Split into consecutive sub-windows that each fit the ledger's
    /// bucket ceiling.
    pub fn split_for_bucket_limit(&self) -> Vec<QueryWindow> {
        let max_span = MAX_BUCKETS_PER_QUERY * BUCKET_WIDTH_SECS;
        let mut windows = Vec::new();
        let mut cursor = self.start;
        while cursor < self.end {
            let end = (cursor + max_span).min(self.end);
            windows.push(QueryWindow { start: cursor, end });
            cursor = end;
        }
        windows
    }
}

/// One pre-aggregated bucket returned by the ledger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageBucket {
    /// Bucket interval, Unix seconds.
    pub starting_at: i64,
    pub ending_at: i64,

    /// Consumption the ledger attributed to this interval, by internal
    /// completion time (not the caller's request window).
    pub results: UsageTotals,
}

/// Response page from the usage report endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct UsageReportPage {
    pub data: Vec<UsageBucket>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_page: Option<String>,
}
