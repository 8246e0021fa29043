//! Reflection: deterministic recovery decisions.
//!
//! Every trigger (node failure, run fault, periodic check-in) maps to
//! exactly one action:
//!
//! - `Timeout | BudgetRisk | Other` -> `Terminated`. The run is not worth
//!   continuing; pending nodes are left untouched.
//! - `SchemaError` -> `Replanned`. The failed node's pending descendants
//!   are skipped so unrelated branches can still finish.
//! - `LowConfidence` -> `AdjustedParameters`. Subsequent dispatches are
//!   upgraded to the expensive model tier.
//!
//! Reflection never re-executes completed work and appends exactly one
//! diagnostic per invocation.

use serde_json::json;
use taskflow_types::diagnostic::{
    Diagnostic, DiagnosticKind, FailureCode, FailureMode, ReflectionAction, StructuredError,
};
use taskflow_types::run::{NodeStatus, RunDag};
use taskflow_types::workflow::ModelPreference;
use uuid::Uuid;

use crate::dag::pending_descendants;

/// The action for a failure mode. Total and deterministic.
pub fn decide_action(mode: FailureMode) -> ReflectionAction {
    match mode {
        FailureMode::Timeout | FailureMode::BudgetRisk | FailureMode::Other => {
            ReflectionAction::Terminated
        }
        FailureMode::SchemaError => ReflectionAction::Replanned,
        FailureMode::LowConfidence => ReflectionAction::AdjustedParameters,
    }
}

/// What one reflection pass did.
#[derive(Debug, Clone)]
pub struct ReflectionReport {
    pub action: ReflectionAction,
    /// Nodes moved to `Skipped` (replan only).
    pub skipped_nodes: Vec<String>,
    /// Model tier override for the rest of the run (adjust only).
    pub model_override: Option<ModelPreference>,
    /// The diagnostic to append.
    pub diagnostic: Diagnostic,
}

/// Run one reflection pass, mutating the dag where the action calls for it.
pub fn reflect(
    dag: &mut RunDag,
    run_id: Uuid,
    mode: FailureMode,
    node_id: Option<&str>,
    reason: &str,
) -> ReflectionReport {
    let action = decide_action(mode);

    let mut skipped_nodes = Vec::new();
    let mut model_override = None;

    match action {
        ReflectionAction::Replanned => {
            if let Some(failed_id) = node_id {
                skipped_nodes = pending_descendants(dag, failed_id);
                for skip_id in &skipped_nodes {
                    if let Some(node) = dag.node_mut(skip_id) {
                        node.status = NodeStatus::Skipped;
                        node.ended_at = Some(chrono::Utc::now());
                        node.last_error = Some(
                            StructuredError::new(
                                FailureCode::ExecutionError,
                                format!("skipped: ancestor '{failed_id}' failed"),
                            )
                            .with_details(json!({ "failed_ancestor": failed_id })),
                        );
                    }
                }
            }
        }
        ReflectionAction::AdjustedParameters => {
            model_override = Some(ModelPreference::Expensive);
        }
        ReflectionAction::Terminated => {}
    }

    tracing::info!(
        %run_id,
        node_id,
        failure_mode = ?mode,
        action = ?action,
        skipped = skipped_nodes.len(),
        "reflection verdict"
    );

    let mut diagnostic = Diagnostic::new(run_id, DiagnosticKind::Reflection, reason).with_details(
        json!({
            "failure_mode": mode,
            "action": action,
            "skipped_nodes": skipped_nodes,
        }),
    );
    if let Some(id) = node_id {
        diagnostic = diagnostic.for_node(id);
    }

    ReflectionReport {
        action,
        skipped_nodes,
        model_override,
        diagnostic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use taskflow_types::run::RunNode;
    use taskflow_types::workflow::GraphEdge;

    fn run_node(id: &str, status: NodeStatus) -> RunNode {
        RunNode {
            id: id.to_string(),
            name: id.to_string(),
            description: None,
            depends_on: vec![],
            status,
            attempts: 0,
            last_output: None,
            last_error: None,
            started_at: None,
            ended_at: None,
        }
    }

    fn edge(source: &str, target: &str) -> GraphEdge {
        GraphEdge {
            source: source.to_string(),
            target: target.to_string(),
        }
    }

    #[test]
    fn action_mapping_is_total() {
        assert_eq!(decide_action(FailureMode::Timeout), ReflectionAction::Terminated);
        assert_eq!(decide_action(FailureMode::BudgetRisk), ReflectionAction::Terminated);
        assert_eq!(decide_action(FailureMode::Other), ReflectionAction::Terminated);
        assert_eq!(decide_action(FailureMode::SchemaError), ReflectionAction::Replanned);
        assert_eq!(
            decide_action(FailureMode::LowConfidence),
            ReflectionAction::AdjustedParameters
        );
    }

    #[test]
    fn replan_skips_pending_descendants_only() {
        // b (failed) -> c -> d, with e on an unrelated branch
        let mut dag = RunDag {
            nodes: vec![
                run_node("b", NodeStatus::Failed),
                run_node("c", NodeStatus::Pending),
                run_node("d", NodeStatus::Pending),
                run_node("e", NodeStatus::Pending),
            ],
            edges: vec![edge("b", "c"), edge("c", "d")],
            contracts: HashMap::new(),
            planner_notes: None,
        };

        let report = reflect(
            &mut dag,
            Uuid::now_v7(),
            FailureMode::SchemaError,
            Some("b"),
            "output failed validation",
        );

        assert_eq!(report.action, ReflectionAction::Replanned);
        assert_eq!(report.skipped_nodes, vec!["c", "d"]);
        assert_eq!(dag.node("c").unwrap().status, NodeStatus::Skipped);
        assert_eq!(dag.node("d").unwrap().status, NodeStatus::Skipped);
        assert_eq!(dag.node("e").unwrap().status, NodeStatus::Pending);
        let err = dag.node("c").unwrap().last_error.as_ref().unwrap();
        assert!(err.message.contains("ancestor 'b'"));
    }

    #[test]
    fn replan_leaves_completed_descendants_alone() {
        let mut dag = RunDag {
            nodes: vec![
                run_node("b", NodeStatus::Failed),
                run_node("c", NodeStatus::Completed),
            ],
            edges: vec![edge("b", "c")],
            contracts: HashMap::new(),
            planner_notes: None,
        };
        let report = reflect(
            &mut dag,
            Uuid::now_v7(),
            FailureMode::SchemaError,
            Some("b"),
            "output failed validation",
        );
        assert!(report.skipped_nodes.is_empty());
        assert_eq!(dag.node("c").unwrap().status, NodeStatus::Completed);
    }

    #[test]
    fn low_confidence_upgrades_model_tier() {
        let mut dag = RunDag {
            nodes: vec![run_node("a", NodeStatus::Pending)],
            edges: vec![],
            contracts: HashMap::new(),
            planner_notes: None,
        };
        let report = reflect(
            &mut dag,
            Uuid::now_v7(),
            FailureMode::LowConfidence,
            None,
            "periodic check-in",
        );
        assert_eq!(report.action, ReflectionAction::AdjustedParameters);
        assert_eq!(report.model_override, Some(ModelPreference::Expensive));
        assert!(report.skipped_nodes.is_empty());
    }

    #[test]
    fn diagnostic_carries_mode_and_action() {
        let mut dag = RunDag {
            nodes: vec![run_node("a", NodeStatus::Pending)],
            edges: vec![],
            contracts: HashMap::new(),
            planner_notes: None,
        };
        let run_id = Uuid::now_v7();
        let report = reflect(&mut dag, run_id, FailureMode::Timeout, None, "run timed out");
        assert_eq!(report.diagnostic.run_id, run_id);
        assert_eq!(report.diagnostic.kind, DiagnosticKind::Reflection);
        assert_eq!(report.diagnostic.details["failure_mode"], "timeout");
        assert_eq!(report.diagnostic.details["action"], "terminated");
    }
}
