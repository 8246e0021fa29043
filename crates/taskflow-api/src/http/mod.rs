//! HTTP/REST API layer for Taskflow.
//!
//! Axum-based REST API at `/api/v1/` with request ID propagation,
//! envelope response format, and CORS support.

pub mod error;
pub mod handlers;
pub mod request_id;
pub mod response;
pub mod router;
