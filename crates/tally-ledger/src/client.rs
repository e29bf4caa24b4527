//! HTTP client for the external usage ledger.
//!
//! Queries are always minute-bucketed and always filtered by a single
//! caller key id, so two runs with different credentials cannot
//! contaminate each other's totals even when their wall-clock windows
//! overlap. Windows longer than the ledger's bucket ceiling are split
//! into sub-queries and merged.

use async_trait::async_trait;
use tracing::debug;

use tally_core::config::LedgerConfig;

use crate::model::{QueryWindow, UsageBucket, UsageReportPage, BUCKET_WIDTH, MAX_BUCKETS_PER_QUERY};

/// Errors from ledger queries.
///
/// `Transient` is recoverable: the attempt is recorded as a failed cycle
/// and the next sweep retries. `Parse` is fatal: a malformed response is
/// never silently defaulted to zero.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("invalid query window: start {start} must be before end {end}")]
    InvalidWindow { start: i64, end: i64 },

    #[error("caller identity filter must not be empty")]
    EmptyIdentity,

    #[error("failed to construct ledger client: {reason}")]
    Client { reason: String },

    #[error("transient ledger error: {reason}")]
    Transient { reason: String },

    #[error("malformed ledger response: {reason}")]
    Parse { reason: String },
}

impl LedgerError {
    /// Whether the caller should retry on the next sweep.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Transient { .. })
    }
}

/// Read access to the usage ledger.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Fetch every minute bucket in `window` attributed to `key_id`.
    async fn query(
        &self,
        window: QueryWindow,
        key_id: &str,
    ) -> Result<Vec<UsageBucket>, LedgerError>;
}

/// Ledger client backed by the usage report HTTP endpoint.
pub struct HttpLedgerClient {
    http: reqwest::Client,
    base_url: String,
    admin_key: String,
}

impl HttpLedgerClient {
    /// Build a client from ledger config, with the configured timeout.
    pub fn new(config: &LedgerConfig) -> Result<Self, LedgerError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("tally-ledger/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LedgerError::Client {
                reason: e.to_string(),
            })?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            admin_key: config.admin_key.clone(),
        })
    }

    /// Fetch one sub-window, following pagination until exhausted.
    async fn fetch_window(
        &self,
        window: QueryWindow,
        key_id: &str,
    ) -> Result<Vec<UsageBucket>, LedgerError> {
        let url = format!("{}/v1/usage_report/messages", self.base_url);
        let mut buckets = Vec::new();
        let mut page_cursor: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(&url)
                .header("x-api-key", &self.admin_key)
                .query(&[
                    ("starting_at", window.start.to_string()),
                    ("ending_at", window.end.to_string()),
                    ("bucket_width", BUCKET_WIDTH.to_string()),
                    ("api_key_ids[]", key_id.to_string()),
                    ("limit", MAX_BUCKETS_PER_QUERY.to_string()),
                ]);
            if let Some(cursor) = &page_cursor {
                request = request.query(&[("page", cursor.as_str())]);
            }

            let response = request.send().await.map_err(|e| LedgerError::Transient {
                reason: format!("request failed: {e}"),
            })?;

            let status = response.status();
            if !status.is_success() {
                // Rate limits and server errors alike: retry next sweep.
                return Err(LedgerError::Transient {
                    reason: format!("http status {status}"),
                });
            }

            let page: UsageReportPage =
                response.json().await.map_err(|e| LedgerError::Parse {
                    reason: e.to_string(),
                })?;

            debug!(
                key_id,
                window_start = window.start,
                window_end = window.end,
                buckets = page.data.len(),
                has_more = page.has_more,
                "ledger page fetched"
            );
            buckets.extend(page.data);

            match (page.has_more, page.next_page) {
                (true, Some(next)) => page_cursor = Some(next),
                (true, None) => {
                    return Err(LedgerError::Parse {
                        reason: "has_more set without next_page cursor".to_string(),
                    })
                }
                (false, _) => break,
            }
        }

        Ok(buckets)
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn query(
        &self,
        window: QueryWindow,
        key_id: &str,
    ) -> Result<Vec<UsageBucket>, LedgerError> {
        if key_id.is_empty() {
            return Err(LedgerError::EmptyIdentity);
        }

        let mut buckets = Vec::new();
        for sub in window.split_for_bucket_limit() {
            buckets.extend(self.fetch_window(sub, key_id).await?);
        }
        buckets.sort_by_key(|b| b.starting_at);
        Ok(buckets)
    }
}
