//! Workflow template handlers for the REST API.

use std::time::Instant;

use axum::extract::{Path, State};
use axum::{Extension, Json};

use taskflow_core::dag::validate_graph;
use taskflow_core::repository::TemplateStore;
use taskflow_types::workflow::WorkflowTemplate;

use crate::http::error::AppError;
use crate::http::request_id::RequestId;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// GET /api/v1/templates - List all templates.
pub async fn list_templates(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
) -> Result<Json<ApiResponse<Vec<serde_json::Value>>>, AppError> {
    let start = Instant::now();

    let templates = state.template_store.list_templates().await?;
    let elapsed = start.elapsed().as_millis() as u64;

    let templates_json = templates
        .iter()
        .map(|t| serde_json::to_value(t).map_err(|e| AppError::Internal(e.to_string())))
        .collect::<Result<Vec<_>, _>>()?;

    let resp = ApiResponse::success(templates_json, request_id, elapsed)
        .with_link("self", "/api/v1/templates");

    Ok(Json(resp))
}

/// GET /api/v1/templates/:id - Get a template by ID.
pub async fn get_template(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();

    let template = state
        .template_store
        .get_template(&id)
        .await?
        .ok_or_else(|| AppError::TemplateNotFound(id.clone()))?;
    let elapsed = start.elapsed().as_millis() as u64;

    let template_json =
        serde_json::to_value(&template).map_err(|e| AppError::Internal(e.to_string()))?;
    let resp = ApiResponse::success(template_json, request_id, elapsed)
        .with_link("self", &format!("/api/v1/templates/{id}"));

    Ok(Json(resp))
}

/// PUT /api/v1/templates/:id - Create or replace a template.
///
/// The graph is validated before anything is stored; an invalid graph is a
/// 422 and leaves any existing template untouched.
pub async fn put_template(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path(id): Path<String>,
    Json(template): Json<WorkflowTemplate>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();

    if template.id != id {
        return Err(AppError::Validation(format!(
            "template ID '{}' does not match path '{id}'",
            template.id
        )));
    }

    validate_graph(&template).map_err(|e| AppError::Validation(e.to_string()))?;
    state.template_store.upsert_template(&template).await?;
    let elapsed = start.elapsed().as_millis() as u64;

    let template_json =
        serde_json::to_value(&template).map_err(|e| AppError::Internal(e.to_string()))?;
    let resp = ApiResponse::success(template_json, request_id, elapsed)
        .with_link("self", &format!("/api/v1/templates/{id}"));

    Ok(Json(resp))
}
