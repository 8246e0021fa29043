//! Run health evaluation.
//!
//! The monitor is a pure decision function over a snapshot of a run's
//! state. The scheduler loop calls it between dispatches and acts on the
//! verdict; the monitor itself never touches stores or tasks, which keeps
//! every branch unit-testable.

use taskflow_types::diagnostic::{DiagnosticKind, FailureCode, FailureMode};
use taskflow_types::run::{NodeStatus, RunConstraints, RunDag};

/// Snapshot of everything the monitor looks at.
#[derive(Debug, Clone, Copy)]
pub struct RunHealth<'a> {
    pub dag: &'a RunDag,
    pub constraints: &'a RunConstraints,
    /// Wall-clock seconds since the run started.
    pub elapsed_s: u64,
    /// Ledger spend so far, in USD.
    pub total_usd: f64,
    /// Attempts executed across all nodes.
    pub step_counter: u32,
    /// Attempts executed since the last periodic reflection.
    pub steps_since_reflection: u32,
    /// Node attempts currently in flight.
    pub inflight: usize,
    /// Pending nodes whose dependencies are all completed.
    pub ready: usize,
    pub cancel_requested: bool,
}

/// A run-level limit violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunFault {
    pub code: FailureCode,
    pub diagnostic: DiagnosticKind,
    pub mode: FailureMode,
}

/// Why a run is finishing `Failed` without a limit violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedReason {
    /// Pending nodes remain but none can ever become ready.
    Deadlock,
    /// Nothing left to run and at least one node failed.
    StepsFailed,
}

/// What the scheduler should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorVerdict {
    Continue,
    /// Append a fault diagnostic, reflect, finish `Failed`.
    Fault(RunFault),
    /// Reflect (low confidence), then keep going.
    PeriodicReflection,
    FinishCompleted,
    FinishCanceled,
    /// Reflect (mode `Other`), then finish `Failed`.
    FinishFailed(FailedReason),
}

/// Evaluate a snapshot. Checks run in priority order; the first hit wins.
pub fn evaluate(health: &RunHealth<'_>) -> MonitorVerdict {
    if health.cancel_requested {
        return MonitorVerdict::FinishCanceled;
    }

    if health.elapsed_s >= health.constraints.timeout_s {
        return MonitorVerdict::Fault(RunFault {
            code: FailureCode::Timeout,
            diagnostic: DiagnosticKind::Timeout,
            mode: FailureMode::Timeout,
        });
    }

    if health.total_usd >= health.constraints.budget_usd {
        return MonitorVerdict::Fault(RunFault {
            code: FailureCode::BudgetExceeded,
            diagnostic: DiagnosticKind::BudgetExceeded,
            mode: FailureMode::BudgetRisk,
        });
    }

    let mut pending = 0usize;
    let mut running = 0usize;
    let mut failed = 0usize;
    let mut settled = 0usize;
    for node in &health.dag.nodes {
        match node.status {
            NodeStatus::Pending => pending += 1,
            NodeStatus::Running => running += 1,
            NodeStatus::Failed => failed += 1,
            NodeStatus::Completed | NodeStatus::Skipped => settled += 1,
            NodeStatus::Canceled => {}
        }
    }

    if settled == health.dag.nodes.len() {
        return MonitorVerdict::FinishCompleted;
    }

    if pending > 0 && running == 0 && health.inflight == 0 && health.ready == 0 {
        return MonitorVerdict::FinishFailed(FailedReason::Deadlock);
    }

    if pending == 0 && running == 0 && health.inflight == 0 && failed > 0 {
        return MonitorVerdict::FinishFailed(FailedReason::StepsFailed);
    }

    if health.step_counter >= health.constraints.max_steps {
        return MonitorVerdict::Fault(RunFault {
            code: FailureCode::MaxStepsExceeded,
            diagnostic: DiagnosticKind::MaxSteps,
            mode: FailureMode::Other,
        });
    }

    let interval = health.constraints.reflection_interval_steps;
    if interval > 0 && health.step_counter > 0 && health.steps_since_reflection >= interval {
        return MonitorVerdict::PeriodicReflection;
    }

    MonitorVerdict::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use taskflow_types::run::RunNode;

    fn dag(statuses: &[(&str, NodeStatus)]) -> RunDag {
        RunDag {
            nodes: statuses
                .iter()
                .map(|(id, status)| RunNode {
                    id: id.to_string(),
                    name: id.to_string(),
                    description: None,
                    depends_on: vec![],
                    status: *status,
                    attempts: 0,
                    last_output: None,
                    last_error: None,
                    started_at: None,
                    ended_at: None,
                })
                .collect(),
            edges: vec![],
            contracts: HashMap::new(),
            planner_notes: None,
        }
    }

    fn health<'a>(dag: &'a RunDag, constraints: &'a RunConstraints) -> RunHealth<'a> {
        RunHealth {
            dag,
            constraints,
            elapsed_s: 0,
            total_usd: 0.0,
            step_counter: 0,
            steps_since_reflection: 0,
            inflight: 0,
            ready: 0,
            cancel_requested: false,
        }
    }

    #[test]
    fn cancel_wins_over_everything() {
        let dag = dag(&[("a", NodeStatus::Pending)]);
        let constraints = RunConstraints::default();
        let mut h = health(&dag, &constraints);
        h.cancel_requested = true;
        h.elapsed_s = 10_000; // would also be a timeout
        assert_eq!(evaluate(&h), MonitorVerdict::FinishCanceled);
    }

    #[test]
    fn timeout_faults_before_budget() {
        let dag = dag(&[("a", NodeStatus::Pending)]);
        let constraints = RunConstraints::default();
        let mut h = health(&dag, &constraints);
        h.elapsed_s = 300;
        h.total_usd = 5.0;
        let MonitorVerdict::Fault(fault) = evaluate(&h) else {
            panic!("expected fault");
        };
        assert_eq!(fault.code, FailureCode::Timeout);
        assert_eq!(fault.mode, FailureMode::Timeout);
    }

    #[test]
    fn budget_fault_at_threshold() {
        let dag = dag(&[("a", NodeStatus::Pending)]);
        let constraints = RunConstraints::default();
        let mut h = health(&dag, &constraints);
        h.total_usd = 2.0;
        h.ready = 1;
        let MonitorVerdict::Fault(fault) = evaluate(&h) else {
            panic!("expected fault");
        };
        assert_eq!(fault.code, FailureCode::BudgetExceeded);
        assert_eq!(fault.diagnostic, DiagnosticKind::BudgetExceeded);
    }

    #[test]
    fn all_settled_completes() {
        let dag = dag(&[("a", NodeStatus::Completed), ("b", NodeStatus::Skipped)]);
        let constraints = RunConstraints::default();
        assert_eq!(evaluate(&health(&dag, &constraints)), MonitorVerdict::FinishCompleted);
    }

    #[test]
    fn stuck_pending_is_deadlock() {
        let dag = dag(&[("a", NodeStatus::Completed), ("b", NodeStatus::Pending)]);
        let constraints = RunConstraints::default();
        // pending node, nothing ready, nothing running
        assert_eq!(
            evaluate(&health(&dag, &constraints)),
            MonitorVerdict::FinishFailed(FailedReason::Deadlock)
        );
    }

    #[test]
    fn exhausted_with_failures_finishes_failed() {
        let dag = dag(&[("a", NodeStatus::Completed), ("b", NodeStatus::Failed)]);
        let constraints = RunConstraints::default();
        assert_eq!(
            evaluate(&health(&dag, &constraints)),
            MonitorVerdict::FinishFailed(FailedReason::StepsFailed)
        );
    }

    #[test]
    fn failed_node_with_pending_work_continues() {
        // A failed branch must not end the run while other work is ready.
        let dag = dag(&[("a", NodeStatus::Failed), ("b", NodeStatus::Pending)]);
        let constraints = RunConstraints::default();
        let mut h = health(&dag, &constraints);
        h.ready = 1;
        assert_eq!(evaluate(&h), MonitorVerdict::Continue);
    }

    #[test]
    fn max_steps_fault() {
        let dag = dag(&[("a", NodeStatus::Pending)]);
        let constraints = RunConstraints::default();
        let mut h = health(&dag, &constraints);
        h.step_counter = 30;
        h.ready = 1;
        let MonitorVerdict::Fault(fault) = evaluate(&h) else {
            panic!("expected fault");
        };
        assert_eq!(fault.code, FailureCode::MaxStepsExceeded);
        assert_eq!(fault.mode, FailureMode::Other);
    }

    #[test]
    fn periodic_reflection_every_interval() {
        let dag = dag(&[("a", NodeStatus::Pending), ("b", NodeStatus::Completed)]);
        let constraints = RunConstraints::default();
        let mut h = health(&dag, &constraints);
        h.step_counter = 2;
        h.steps_since_reflection = 2;
        h.ready = 1;
        assert_eq!(evaluate(&h), MonitorVerdict::PeriodicReflection);

        h.steps_since_reflection = 1;
        assert_eq!(evaluate(&h), MonitorVerdict::Continue);
    }

    #[test]
    fn zero_interval_disables_periodic_reflection() {
        let dag = dag(&[("a", NodeStatus::Pending)]);
        let constraints = RunConstraints {
            reflection_interval_steps: 0,
            ..RunConstraints::default()
        };
        let mut h = health(&dag, &constraints);
        h.step_counter = 10;
        h.steps_since_reflection = 10;
        h.ready = 1;
        assert_eq!(evaluate(&h), MonitorVerdict::Continue);
    }
}
