//! Assertions over run reports.

use crate::core::{NodeStatus, RunStatus};
use crate::runner::RunReport;

/// Asserts the run finished with `expected`.
#[track_caller]
pub fn assert_run_status(report: &RunReport, expected: RunStatus) {
    assert_eq!(
        report.state.status, expected,
        "run {} finished {:?}; node states: {:?}",
        report.state.run_id, report.state.status, report.state.node_states
    );
}

/// Asserts every listed node finished with `expected`.
#[track_caller]
pub fn assert_nodes_status(report: &RunReport, node_ids: &[&str], expected: NodeStatus) {
    for id in node_ids {
        assert_eq!(
            report.status_of(id),
            expected,
            "node {id}: {:?}",
            report.result(id)
        );
    }
}

/// Asserts `first` finished before `second` started.
#[track_caller]
pub fn assert_finished_before(report: &RunReport, first: &str, second: &str) {
    let position = |id: &str| {
        report
            .results
            .iter()
            .position(|r| r.node_id == id)
            .unwrap_or_else(|| panic!("no result for {id}"))
    };
    let finished = report
        .result(first)
        .and_then(|r| r.finished_at.clone())
        .unwrap_or_else(|| panic!("{first} never finished"));
    let started = report
        .result(second)
        .and_then(|r| r.started_at.clone())
        .unwrap_or_else(|| panic!("{second} never started"));
    assert!(
        finished <= started && position(first) < position(second),
        "{first} finished at {finished}, {second} started at {started}"
    );
}
