//! Infrastructure layer for Taskflow.
//!
//! Contains implementations of the store traits defined in `taskflow-core`
//! (SQLite with WAL mode and split read/write pools), the LLM provider
//! gateways (mock, OpenAI, Anthropic), environment-driven settings, and the
//! built-in default template.

pub mod llm;
pub mod seed;
pub mod settings;
pub mod sqlite;
