//! Execution engine and repository trait definitions for Taskflow.
//!
//! This crate defines the "ports" (store and gateway traits) that the
//! infrastructure layer implements. It depends only on `taskflow-types` --
//! never on `taskflow-infra` or any database/IO crate.

pub mod contract;
pub mod cost;
pub mod dag;
pub mod gateway;
pub mod monitor;
pub mod planner;
pub mod reflection;
pub mod repository;
pub mod router;
pub mod scheduler;
pub mod supervisor;
