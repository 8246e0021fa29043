//! Workflow template types for Taskflow.
//!
//! A template is the immutable description of a workflow: the node graph,
//! the explicit edge list, and a per-node execution contract. Runs never
//! mutate templates; they materialize an owned copy of the graph instead.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Workflow Template
// ---------------------------------------------------------------------------

/// An immutable workflow template.
///
/// Stored once, instantiated many times. `contracts` must contain an entry
/// for every node in `graph`; the validator rejects templates where it
/// does not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    /// Stable template ID (e.g. "template.default.v1").
    pub id: String,
    /// Human-readable template name.
    pub name: String,
    /// Monotonic template version.
    pub version: u32,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The node graph.
    pub graph: WorkflowGraph,
    /// Per-node execution contracts, keyed by node ID.
    pub contracts: HashMap<String, NodeContract>,
}

/// The node/edge structure of a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowGraph {
    /// Nodes forming the DAG.
    pub nodes: Vec<NodeDefinition>,
    /// Explicit edge list. Redundant with `depends_on` and required to
    /// match it exactly.
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
}

/// A single node in the workflow DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Node ID (e.g. "understand_task"). Unique within a template.
    pub id: String,
    /// Human-readable node name.
    pub name: String,
    /// What this node is supposed to accomplish.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Node IDs this node depends on (DAG edges).
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// A directed edge `source -> target`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
}

// ---------------------------------------------------------------------------
// Node Contract
// ---------------------------------------------------------------------------

/// Execution contract for a single node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeContract {
    /// Tool capabilities this node may invoke.
    #[serde(default = "default_allowed_tools")]
    pub allowed_tools: Vec<ToolCapability>,
    /// Per-attempt timeout in seconds.
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u64,
    /// Retries allowed after the first failed attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Which model tier to prefer for this node.
    #[serde(default)]
    pub model_preference: ModelPreference,
    /// Which output schema the validator applies.
    #[serde(default)]
    pub output: OutputKind,
}

impl Default for NodeContract {
    fn default() -> Self {
        Self {
            allowed_tools: default_allowed_tools(),
            timeout_s: default_timeout_s(),
            max_retries: default_max_retries(),
            model_preference: ModelPreference::default(),
            output: OutputKind::default(),
        }
    }
}

fn default_allowed_tools() -> Vec<ToolCapability> {
    vec![ToolCapability::Generate]
}

fn default_timeout_s() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

/// A tool capability a node contract can grant.
///
/// Closed set: unknown capability strings fail deserialization rather than
/// passing through as opaque names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToolCapability {
    /// Text generation via the configured LLM provider.
    #[serde(rename = "llm.generate")]
    Generate,
}

/// Model tier preference for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelPreference {
    Cheap,
    #[default]
    Default,
    Expensive,
}

/// Which output schema a node's result is validated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    #[default]
    Generic,
    Plan,
    Execution,
    Synthesis,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
