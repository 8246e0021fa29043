//! Output validation against node contracts.
//!
//! Every node's result is validated before the node can complete. The
//! schemas are typed serde structs: the candidate JSON is deserialized into
//! the struct for the node's `OutputKind`, then range and emptiness
//! constraints are checked. Any violation maps to `FailureCode::SchemaError`
//! upstream.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use taskflow_types::workflow::OutputKind;
use thiserror::Error;

/// A concrete schema violation, with enough detail for a diagnostic.
#[derive(Debug, Error)]
pub enum SchemaViolation {
    #[error("output is not valid for schema '{kind:?}': {message}")]
    Shape { kind: OutputKind, message: String },

    #[error("field '{field}' out of range: {message}")]
    Range { field: &'static str, message: String },

    #[error("field '{field}' must not be empty")]
    Empty { field: &'static str },
}

/// The base step output shape shared by all output kinds.
///
/// Specialized kinds (plan, execution, synthesis) reuse this shape; the
/// kind chooses which node the step plays in the workflow, not a different
/// wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutput {
    pub summary: String,
    /// Model self-assessed confidence, 0.0 to 1.0 inclusive.
    pub confidence: f64,
    #[serde(default)]
    pub artifacts: HashMap<String, serde_json::Value>,
}

impl StepOutput {
    fn check(&self) -> Result<(), SchemaViolation> {
        if self.summary.trim().is_empty() {
            return Err(SchemaViolation::Empty { field: "summary" });
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(SchemaViolation::Range {
                field: "confidence",
                message: format!("expected 0.0..=1.0, got {}", self.confidence),
            });
        }
        Ok(())
    }
}

/// Validate a candidate output value against the schema for `kind`.
pub fn validate_output(kind: OutputKind, value: &serde_json::Value) -> Result<(), SchemaViolation> {
    let output: StepOutput =
        serde_json::from_value(value.clone()).map_err(|e| SchemaViolation::Shape {
            kind,
            message: e.to_string(),
        })?;
    output.check()
}
