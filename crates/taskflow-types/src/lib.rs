//! Shared domain types for Taskflow.
//!
//! This crate contains the core domain types used across the Taskflow engine:
//! workflow templates, runs, node contracts, diagnostics, and cost entries.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod cost;
pub mod diagnostic;
pub mod error;
pub mod run;
pub mod workflow;
