//! Failure classification and run diagnostics.
//!
//! Every node failure is a `StructuredError` with a closed `FailureCode`.
//! The monitor and reflection layers append `Diagnostic` records to a run's
//! append-only diagnostic log; those records are the run's audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Failure codes
// ---------------------------------------------------------------------------

/// Why a node attempt (or a whole run) failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    Timeout,
    BudgetExceeded,
    SchemaError,
    ToolNotAllowed,
    ExecutionError,
    Canceled,
    MaxStepsExceeded,
}

/// The only error shape stored on run nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    pub code: FailureCode,
    pub message: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl StructuredError {
    pub fn new(code: FailureCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: serde_json::Value::Null,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Category of a diagnostic record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    Reflection,
    SchemaError,
    ToolNotAllowed,
    Timeout,
    BudgetExceeded,
    MaxSteps,
}

/// One append-only diagnostic record on a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    /// UUIDv7 diagnostic ID (creation-ordered).
    pub id: Uuid,
    pub run_id: Uuid,
    pub kind: DiagnosticKind,
    /// Node the diagnostic concerns, when it concerns one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Diagnostic {
    pub fn new(run_id: Uuid, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            run_id,
            kind,
            node_id: None,
            message: message.into(),
            details: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn for_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

// ---------------------------------------------------------------------------
// Reflection
// ---------------------------------------------------------------------------

/// Classification of what triggered a reflection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    Timeout,
    SchemaError,
    LowConfidence,
    BudgetRisk,
    Other,
}

/// What reflection decided to do about a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflectionAction {
    Replanned,
    AdjustedParameters,
    Terminated,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failure_codes_use_snake_case() {
        assert_eq!(
            serde_json::to_value(FailureCode::ToolNotAllowed).unwrap(),
            json!("tool_not_allowed")
        );
        assert_eq!(
            serde_json::to_value(FailureCode::MaxStepsExceeded).unwrap(),
            json!("max_steps_exceeded")
        );
    }

    #[test]
    fn structured_error_round_trips() {
        let err = StructuredError::new(FailureCode::SchemaError, "confidence out of range")
            .with_details(json!({ "field": "confidence", "value": 1.5 }));
        let back: StructuredError =
            serde_json::from_str(&serde_json::to_string(&err).unwrap()).unwrap();
        assert_eq!(back.code, FailureCode::SchemaError);
        assert_eq!(back.details["field"], "confidence");
    }

    #[test]
    fn diagnostic_builder_sets_fields() {
        let run_id = Uuid::now_v7();
        let diag = Diagnostic::new(run_id, DiagnosticKind::Reflection, "schema failure")
            .for_node("execute_task")
            .with_details(json!({ "action": "replanned" }));
        assert_eq!(diag.run_id, run_id);
        assert_eq!(diag.node_id.as_deref(), Some("execute_task"));
        assert_eq!(diag.details["action"], "replanned");
    }
}
