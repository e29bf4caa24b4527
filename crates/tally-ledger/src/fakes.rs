//! In-memory fakes for the ledger client (testing only)
//!
//! `StaticLedger` serves a fixed bucket set per key id; `ScriptedLedger`
//! replays a sequence of responses, one per query, to exercise the
//! verifier's convergence behavior.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::aggregate::overlaps;
use crate::client::{LedgerClient, LedgerError};
use crate::model::{QueryWindow, UsageBucket};

/// Fake ledger holding a fixed bucket set per caller key id.
///
/// Queries return only the buckets registered under the queried key that
/// overlap the window — the same isolation guarantee the real ledger's
/// identity filter provides.
#[derive(Debug, Default)]
pub struct StaticLedger {
    buckets: Mutex<HashMap<String, Vec<UsageBucket>>>,
}

impl StaticLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register buckets attributed to `key_id`.
    pub fn insert(&self, key_id: impl Into<String>, buckets: Vec<UsageBucket>) {
        self.buckets
            .lock()
            .expect("static ledger lock")
            .entry(key_id.into())
            .or_default()
            .extend(buckets);
    }
}

#[async_trait]
impl LedgerClient for StaticLedger {
    async fn query(
        &self,
        window: QueryWindow,
        key_id: &str,
    ) -> Result<Vec<UsageBucket>, LedgerError> {
        if key_id.is_empty() {
            return Err(LedgerError::EmptyIdentity);
        }
        let buckets = self.buckets.lock().expect("static ledger lock");
        Ok(buckets
            .get(key_id)
            .map(|all| {
                all.iter()
                    .filter(|b| overlaps(b, &window))
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// One scripted response for `ScriptedLedger`.
pub enum ScriptedResponse {
    Buckets(Vec<UsageBucket>),
    Transient(String),
    Parse(String),
}

/// Fake ledger that replays responses in order, one per query.
///
/// Queries beyond the script return an empty bucket set.
#[derive(Default)]
pub struct ScriptedLedger {
    script: Mutex<Vec<ScriptedResponse>>,
    queries_seen: Mutex<Vec<String>>,
}

impl ScriptedLedger {
    pub fn new(script: Vec<ScriptedResponse>) -> Self {
        Self {
            script: Mutex::new(script),
            queries_seen: Mutex::new(Vec::new()),
        }
    }

    /// Key ids queried so far, in order.
    pub fn queried_keys(&self) -> Vec<String> {
        self.queries_seen.lock().expect("scripted ledger lock").clone()
    }
}

#[async_trait]
impl LedgerClient for ScriptedLedger {
    async fn query(
        &self,
        _window: QueryWindow,
        key_id: &str,
    ) -> Result<Vec<UsageBucket>, LedgerError> {
        if key_id.is_empty() {
            return Err(LedgerError::EmptyIdentity);
        }
        self.queries_seen
            .lock()
            .expect("scripted ledger lock")
            .push(key_id.to_string());

        let mut script = self.script.lock().expect("scripted ledger lock");
        if script.is_empty() {
            return Ok(Vec::new());
        }
        match script.remove(0) {
            ScriptedResponse::Buckets(b) => Ok(b),
            ScriptedResponse::Transient(reason) => Err(LedgerError::Transient { reason }),
            ScriptedResponse::Parse(reason) => Err(LedgerError::Parse { reason }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::domain::run::UsageTotals;

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

    #[tokio::test]
    async fn test_static_ledger_filters_by_key() {
        let ledger = StaticLedger::new();
        ledger.insert("apikey_run1aaaa", vec![bucket(0, 100)]);
        ledger.insert("apikey_run2bbbb", vec![bucket(0, 999)]);

        let window = QueryWindow::new(0, 120).unwrap();
        let got = ledger.query(window, "apikey_run1aaaa").await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].results.tokens_in, 100);
    }

    #[tokio::test]
    async fn test_static_ledger_unknown_key_is_empty() {
        let ledger = StaticLedger::new();
        let window = QueryWindow::new(0, 120).unwrap();
        assert!(ledger.query(window, "apikey_nobody00").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scripted_ledger_replays_in_order() {
        let ledger = ScriptedLedger::new(vec![
            ScriptedResponse::Transient("timeout".to_string()),
            ScriptedResponse::Buckets(vec![bucket(0, 5)]),
        ]);
        let window = QueryWindow::new(0, 60).unwrap();

        let first = ledger.query(window, "apikey_abcdefgh").await;
        assert!(matches!(first, Err(LedgerError::Transient { .. })));

        let second = ledger.query(window, "apikey_abcdefgh").await.unwrap();
        assert_eq!(second[0].results.tokens_in, 5);

        // Past the script: empty.
        assert!(ledger.query(window, "apikey_abcdefgh").await.unwrap().is_empty());
        assert_eq!(ledger.queried_keys().len(), 3);
    }
}
