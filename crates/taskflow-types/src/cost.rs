//! Token accounting and the cost ledger entry shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Token usage reported by one provider call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// A priced token count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    /// USD, rounded to 8 decimal places.
    pub usd: f64,
}

/// One append-only row in the cost ledger.
///
/// `run_id` and `node_id` are first-class so budget aggregation is a single
/// indexed SUM; `meta` carries anything else callers want to attach.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// UUIDv7 entry ID.
    pub id: Uuid,
    pub run_id: Uuid,
    /// Node the spend belongs to; None for run-level calls (planning).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Request ID of the API call that created the run.
    pub request_id: String,
    /// Application name (fixed per deployment, e.g. "taskflow").
    pub app: String,
    /// What the spend was for: "planner" or "step_execution".
    pub feature: String,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub usd: f64,
    #[serde(default)]
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
