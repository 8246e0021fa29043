//! Run execution types.
//!
//! A run is a single execution of a template: it owns a mutable snapshot of
//! the template graph (`RunDag`) plus per-node state, cost totals, and a
//! persistent cancel flag. Run and node statuses only ever move forward;
//! `Completed | Failed | Canceled` are terminal for a run.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::diagnostic::StructuredError;
use crate::workflow::{GraphEdge, NodeContract};

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Created,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

/// Status of a single node within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Canceled,
}

impl NodeStatus {
    /// Terminal node states count toward run completion.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Skipped | Self::Canceled
        )
    }

    /// Open states are the ones a canceled run closes out.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

// ---------------------------------------------------------------------------
// Run DAG (owned per-run snapshot)
// ---------------------------------------------------------------------------

/// The mutable per-run copy of a template graph.
///
/// Materialized once at planning time; never aliases template storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDag {
    pub nodes: Vec<RunNode>,
    pub edges: Vec<GraphEdge>,
    /// Contracts copied from the template, keyed by node ID.
    pub contracts: HashMap<String, NodeContract>,
    /// Free-form notes produced by the planner call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planner_notes: Option<String>,
}

impl RunDag {
    pub fn node(&self, node_id: &str) -> Option<&RunNode> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    pub fn node_mut(&mut self, node_id: &str) -> Option<&mut RunNode> {
        self.nodes.iter_mut().find(|n| n.id == node_id)
    }
}

/// Per-run execution state of one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunNode {
    /// Node ID matching the template definition.
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub status: NodeStatus,
    /// Attempts executed so far (0 until first dispatch).
    #[serde(default)]
    pub attempts: u32,
    /// Validated output of the last successful attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_output: Option<serde_json::Value>,
    /// Structured error from the last failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<StructuredError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Per-run execution limits. Defaults come from engine settings; each run
/// may override them at creation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RunConstraints {
    /// Hard USD budget. The monitor fails the run once ledger spend reaches it.
    #[serde(default = "default_budget_usd")]
    pub budget_usd: f64,
    /// Wall-clock limit for the whole run, in seconds.
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u64,
    /// Upper bound on executed attempts across all nodes.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Periodic reflection fires every this many executed attempts.
    #[serde(default = "default_reflection_interval")]
    pub reflection_interval_steps: u32,
    /// Concurrency bound for in-flight node attempts.
    #[serde(default = "default_max_parallel_nodes")]
    pub max_parallel_nodes: usize,
}

impl Default for RunConstraints {
    fn default() -> Self {
        Self {
            budget_usd: default_budget_usd(),
            timeout_s: default_timeout_s(),
            max_steps: default_max_steps(),
            reflection_interval_steps: default_reflection_interval(),
            max_parallel_nodes: default_max_parallel_nodes(),
        }
    }
}

fn default_budget_usd() -> f64 {
    2.0
}

fn default_timeout_s() -> u64 {
    300
}

fn default_max_steps() -> u32 {
    30
}

fn default_reflection_interval() -> u32 {
    2
}

fn default_max_parallel_nodes() -> usize {
    4
}

/// Aggregated token/cost totals for a run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunTotals {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub usd: f64,
}

/// A single execution of a workflow template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// UUIDv7 run ID.
    pub id: Uuid,
    /// Request ID stamped by the API layer (propagated into ledger entries).
    pub request_id: String,
    /// The user task this run is executing.
    pub task: String,
    /// Template the run was planned from. None until planning picks the default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    pub status: RunStatus,
    pub constraints: RunConstraints,
    /// Materialized graph state. None until planning completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dag: Option<RunDag>,
    pub totals: RunTotals,
    /// Cooperative cancellation flag, observed by the scheduler loop.
    #[serde(default)]
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn run_status_terminality() {
        assert!(!RunStatus::Created.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Canceled.is_terminal());
    }

    #[test]
    fn node_status_open_vs_terminal() {
        assert!(NodeStatus::Pending.is_open());
        assert!(NodeStatus::Running.is_open());
        assert!(NodeStatus::Skipped.is_terminal());
        assert!(!NodeStatus::Running.is_terminal());
    }

    #[test]
    fn constraints_defaults_apply() {
        let constraints: RunConstraints = serde_json::from_value(json!({})).unwrap();
        assert_eq!(constraints.budget_usd, 2.0);
        assert_eq!(constraints.timeout_s, 300);
        assert_eq!(constraints.max_steps, 30);
        assert_eq!(constraints.reflection_interval_steps, 2);
        assert_eq!(constraints.max_parallel_nodes, 4);
    }

    #[test]
    fn statuses_use_snake_case() {
        assert_eq!(
            serde_json::to_value(RunStatus::Canceled).unwrap(),
            json!("canceled")
        );
        assert_eq!(
            serde_json::to_value(NodeStatus::Skipped).unwrap(),
            json!("skipped")
        );
    }
}
