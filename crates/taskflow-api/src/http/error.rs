//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use uuid::Uuid;

use taskflow_core::supervisor::SupervisorError;
use taskflow_types::error::StoreError;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// No run with the given ID.
    RunNotFound(Uuid),
    /// No template with the given ID.
    TemplateNotFound(String),
    /// Malformed or semantically invalid input.
    Validation(String),
    /// Operation not valid for the resource's current state.
    Conflict(String),
    /// Persistence failure.
    Storage(String),
    /// Generic internal error.
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { entity: "run", id } => match id.parse() {
                Ok(run_id) => AppError::RunNotFound(run_id),
                Err(_) => AppError::Storage(format!("run not found: {id}")),
            },
            StoreError::NotFound {
                entity: "template",
                id,
            } => AppError::TemplateNotFound(id),
            StoreError::Conflict(msg) => AppError::Conflict(msg),
            other => AppError::Storage(other.to_string()),
        }
    }
}

impl From<SupervisorError> for AppError {
    fn from(e: SupervisorError) -> Self {
        match e {
            SupervisorError::Store(inner) => inner.into(),
            SupervisorError::RunNotFound(id) => AppError::RunNotFound(id),
            SupervisorError::NotRetryable(..) => AppError::Conflict(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::RunNotFound(id) => (
                StatusCode::NOT_FOUND,
                "RUN_NOT_FOUND",
                format!("Run {id} not found"),
            ),
            AppError::TemplateNotFound(id) => (
                StatusCode::NOT_FOUND,
                "TEMPLATE_NOT_FOUND",
                format!("Template '{id}' not found"),
            ),
            AppError::Validation(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "VALIDATION_ERROR",
                msg.clone(),
            ),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::Storage(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE_ERROR",
                msg.clone(),
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        let body = json!({
            "data": null,
            "meta": {
                "request_id": "",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "response_time_ms": 0
            },
            "errors": [{
                "code": code,
                "message": message,
            }]
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
