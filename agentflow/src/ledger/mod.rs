//! Cost accounting, budget enforcement and result reuse.

mod cost;
mod ledger;
mod stats;

pub use cost::{extract_cost, parse_cost};
pub use ledger::{BudgetCheck, CostLedger, CostTotals, PriorResults};
pub use stats::{
    average_ai_cost, estimate_pipeline_cost, NodeCost, PipelineCost, RunCostSummary, UsageStats,
};
