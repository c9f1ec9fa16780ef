//! Per-session cost accounting from token usage and backend pricing.
//!
//! One [`CostAggregator`] exists per debate session; it is threaded through
//! the orchestrator explicitly and never shared, so concurrent sessions can
//! never bleed cost into each other.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::backend::ModelBackend;

/// Accumulated usage and cost for a single backend within one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendCost {
    pub backend_id: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// USD, rounded to 4 decimal places by the adapter's pricing math
    pub cost_usd: f64,
}

/// Point-in-time view of a session's accrued cost.
///
/// Grand totals are always the sum of the per-backend rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostSnapshot {
    pub rows: Vec<BackendCost>,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost_usd: f64,
}

#[derive(Debug, Default)]
struct RowState {
    input_tokens: u64,
    output_tokens: u64,
    cost_usd: f64,
}

/// Running per-backend token totals for one debate session.
///
/// The aggregator trusts each `record` call to represent genuinely new usage;
/// idempotency is the caller's responsibility. Cost is recomputed from the
/// accumulated totals on every record, so the row cost always equals
/// `estimate_cost(total_input, total_output)` for that backend.
#[derive(Debug, Default)]
pub struct CostAggregator {
    rows: BTreeMap<String, RowState>,
}

impl CostAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add usage for a backend and recompute that row's cost.
    pub fn record(&mut self, backend: &dyn ModelBackend, input_tokens: u64, output_tokens: u64) {
        let row = self.rows.entry(backend.id().to_string()).or_default();
        row.input_tokens = row.input_tokens.saturating_add(input_tokens);
        row.output_tokens = row.output_tokens.saturating_add(output_tokens);
        row.cost_usd = backend.estimate_cost(row.input_tokens, row.output_tokens);
    }

    /// Per-backend rows plus grand totals.
    pub fn snapshot(&self) -> CostSnapshot {
        let mut snapshot = CostSnapshot::default();
        for (backend_id, row) in &self.rows {
            snapshot.total_input_tokens = snapshot.total_input_tokens.saturating_add(row.input_tokens);
            snapshot.total_output_tokens =
                snapshot.total_output_tokens.saturating_add(row.output_tokens);
            snapshot.total_cost_usd += row.cost_usd;
            snapshot.rows.push(BackendCost {
                backend_id: backend_id.clone(),
                input_tokens: row.input_tokens,
                output_tokens: row.output_tokens,
                cost_usd: row.cost_usd,
            });
        }
        snapshot
    }
}
