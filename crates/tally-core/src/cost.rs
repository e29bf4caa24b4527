//! Derived cost computation.
//!
//! Cost is computed locally from verified totals and configured
//! per-million-token pricing. It is never read from the ledger.

use crate::config::Pricing;
use crate::domain::run::UsageTotals;

const TOKENS_PER_MTOK: f64 = 1_000_000.0;

/// Compute the dollar cost of a set of totals under the given pricing.
pub fn cost_for(totals: &UsageTotals, pricing: &Pricing) -> f64 {
    let input = (totals.tokens_in as f64 / TOKENS_PER_MTOK) * pricing.input_per_mtok;
    let output = (totals.tokens_out as f64 / TOKENS_PER_MTOK) * pricing.output_per_mtok;
    let cached = (totals.cached_tokens as f64 / TOKENS_PER_MTOK) * pricing.cache_read_per_mtok;
    input + output + cached
}
