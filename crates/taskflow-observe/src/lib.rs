//! Observability layer for Taskflow.
//!
//! Tracing subscriber setup plus OpenTelemetry GenAI attribute constants
//! used when instrumenting LLM gateway calls.

pub mod genai_attrs;
pub mod tracing_setup;
