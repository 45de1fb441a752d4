//! Run-wide cost totals and the reuse cache.

use crate::core::{ApprovalState, NodeResult};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Outcome of recording a cost against the budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BudgetCheck {
    /// Charged spend is within the ceiling, or there is no ceiling.
    Within,
    /// This record pushed charged spend over the ceiling.
    Exceeded {
        /// Charged spend after the record.
        charged: f64,
        /// The ceiling.
        budget: f64,
    },
    /// The ceiling was already exceeded by an earlier record.
    Halted,
}

/// Accumulated cost of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CostTotals {
    /// All recorded costs, reused results included.
    pub total: f64,
    /// Costs actually spent by this run.
    pub charged: f64,
}

#[derive(Debug, Default)]
struct LedgerState {
    totals: CostTotals,
    halted: bool,
}

/// Prior results a run may reuse, keyed by qualified node id.
#[derive(Debug, Clone, Default)]
pub struct PriorResults {
    by_node: HashMap<String, NodeResult>,
}

impl PriorResults {
    /// An empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps the last successful, dispatched result of every node.
    ///
    /// The kept result carries the cost of every recorded attempt of its
    /// node, so reusing it restores the node's whole share of the total.
    #[must_use]
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a NodeResult>) -> Self {
        let mut spent: HashMap<&str, f64> = HashMap::new();
        let mut by_node: HashMap<String, NodeResult> = HashMap::new();
        for result in results {
            if let Some(cost) = result.cost_usd {
                *spent.entry(result.node_id.as_str()).or_default() += cost;
            }
            if result.is_success() && result.attempt > 0 {
                by_node.insert(result.node_id.clone(), result.clone());
            }
        }
        for (node_id, result) in &mut by_node {
            if let Some(cost) = spent.get(node_id.as_str()) {
                result.cost_usd = Some(*cost);
            }
        }
        Self { by_node }
    }

    /// A prior success of `node_id` with the same instructions hash.
    #[must_use]
    pub fn reusable(&self, node_id: &str, hash: &str) -> Option<&NodeResult> {
        self.by_node
            .get(node_id)
            .filter(|r| r.instructions_hash == hash)
    }

    /// A prior approval of the gate `node_id`.
    #[must_use]
    pub fn approved(&self, node_id: &str) -> Option<&NodeResult> {
        self.by_node
            .get(node_id)
            .filter(|r| r.approval_state == Some(ApprovalState::Approved))
    }

    /// Number of cached results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_node.len()
    }

    /// Returns true if nothing can be reused.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_node.is_empty()
    }
}

/// Cost and cache ledger shared by every task of a run.
///
/// Totals live behind one lock so the budget decision always sees the
/// aggregate including the record being added.
#[derive(Debug)]
pub struct CostLedger {
    budget: Option<f64>,
    state: Mutex<LedgerState>,
    prior: PriorResults,
}

impl CostLedger {
    /// Creates a ledger with an optional ceiling on charged spend.
    #[must_use]
    pub fn new(budget: Option<f64>, prior: PriorResults) -> Self {
        Self {
            budget,
            state: Mutex::new(LedgerState::default()),
            prior,
        }
    }

    /// The configured ceiling.
    #[must_use]
    pub fn budget(&self) -> Option<f64> {
        self.budget
    }

    /// Adds the cost of a leaf result.
    ///
    /// Reused results count toward the total but are never charged.
    pub fn record(&self, result: &NodeResult) -> BudgetCheck {
        let mut state = self.state.lock();
        if let Some(cost) = result.cost_usd {
            state.totals.total += cost;
            if !result.reused {
                state.totals.charged += cost;
            }
        }
        if state.halted {
            return BudgetCheck::Halted;
        }
        match self.budget {
            Some(budget) if state.totals.charged > budget => {
                state.halted = true;
                BudgetCheck::Exceeded {
                    charged: state.totals.charged,
                    budget,
                }
            }
            _ => BudgetCheck::Within,
        }
    }

    /// Current totals.
    #[must_use]
    pub fn totals(&self) -> CostTotals {
        self.state.lock().totals
    }

    /// Returns true once the budget has been exceeded.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.state.lock().halted
    }

    /// Prior results available for reuse.
    #[must_use]
    pub fn prior(&self) -> &PriorResults {
        &self.prior
    }
}
