//! REST API layer for Taskflow.
//!
//! Exposed as a library so integration tests can build the router and
//! application state directly; the `taskflow` binary wraps this with CLI
//! parsing and server startup.

pub mod http;
pub mod state;
