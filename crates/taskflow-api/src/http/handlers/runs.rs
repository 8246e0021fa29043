//! Run lifecycle handlers for the REST API.

use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use taskflow_types::run::RunConstraints;

use crate::http::error::AppError;
use crate::http::request_id::RequestId;
use crate::http::response::ApiResponse;
use crate::state::AppState;
use taskflow_core::repository::RunStore;

/// Body for POST /api/v1/runs.
#[derive(Debug, Deserialize)]
pub struct CreateRunRequest {
    /// The task the run should carry out.
    pub task: String,
    /// Template to plan from; the default template when omitted.
    #[serde(default)]
    pub template_id: Option<String>,
    /// Constraint overrides; engine defaults when omitted.
    #[serde(default)]
    pub constraints: Option<RunConstraints>,
}

#[derive(Debug, Deserialize)]
pub struct RunListQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

/// POST /api/v1/runs - Create a run and start driving it.
pub async fn create_run(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Json(body): Json<CreateRunRequest>,
) -> Result<impl IntoResponse, AppError> {
    let start = Instant::now();

    if body.task.trim().is_empty() {
        return Err(AppError::Validation("task must not be empty".to_string()));
    }

    let run = state
        .supervisor
        .create_run(body.task, body.template_id, body.constraints, request_id.clone())
        .await?;
    let elapsed = start.elapsed().as_millis() as u64;

    let run_json = serde_json::to_value(&run)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    let resp = ApiResponse::success(run_json, request_id, elapsed)
        .with_link("self", &format!("/api/v1/runs/{}", run.id))
        .with_link("cancel", &format!("/api/v1/runs/{}/cancel", run.id));

    Ok((StatusCode::CREATED, Json(resp)))
}

/// GET /api/v1/runs - List runs, newest first.
pub async fn list_runs(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Query(query): Query<RunListQuery>,
) -> Result<Json<ApiResponse<Vec<serde_json::Value>>>, AppError> {
    let start = Instant::now();

    let runs = state.run_store.list_runs(query.limit).await?;
    let elapsed = start.elapsed().as_millis() as u64;

    let runs_json = runs
        .iter()
        .map(|r| serde_json::to_value(r).map_err(|e| AppError::Internal(e.to_string())))
        .collect::<Result<Vec<_>, _>>()?;

    let resp =
        ApiResponse::success(runs_json, request_id, elapsed).with_link("self", "/api/v1/runs");

    Ok(Json(resp))
}

/// GET /api/v1/runs/:id - Run detail including its diagnostic log.
pub async fn get_run(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let run_id = parse_run_id(&id)?;

    let run = state
        .run_store
        .get_run(&run_id)
        .await?
        .ok_or(AppError::RunNotFound(run_id))?;
    let diagnostics = state.run_store.list_diagnostics(&run_id).await?;
    let elapsed = start.elapsed().as_millis() as u64;

    let data = serde_json::json!({
        "run": run,
        "diagnostics": diagnostics,
    });
    let resp = ApiResponse::success(data, request_id, elapsed)
        .with_link("self", &format!("/api/v1/runs/{run_id}"))
        .with_link("cancel", &format!("/api/v1/runs/{run_id}/cancel"))
        .with_link("retry", &format!("/api/v1/runs/{run_id}/retry"));

    Ok(Json(resp))
}

/// POST /api/v1/runs/:id/cancel - Request cooperative cancellation.
pub async fn cancel_run(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let run_id = parse_run_id(&id)?;

    state.supervisor.request_cancel(run_id).await?;
    let elapsed = start.elapsed().as_millis() as u64;

    let data = serde_json::json!({ "id": run_id, "cancel_requested": true });
    let resp = ApiResponse::success(data, request_id, elapsed)
        .with_link("self", &format!("/api/v1/runs/{run_id}"));

    Ok(Json(resp))
}

/// POST /api/v1/runs/:id/retry - Re-drive a failed run.
///
/// Responds 409 when the run is in any state other than failed.
pub async fn retry_run(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let run_id = parse_run_id(&id)?;

    let run = state.supervisor.retry_run(run_id).await?;
    let elapsed = start.elapsed().as_millis() as u64;

    let run_json = serde_json::to_value(&run)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    let resp = ApiResponse::success(run_json, request_id, elapsed)
        .with_link("self", &format!("/api/v1/runs/{run_id}"));

    Ok(Json(resp))
}

fn parse_run_id(id: &str) -> Result<Uuid, AppError> {
    id.parse()
        .map_err(|_| AppError::Validation(format!("'{id}' is not a valid run ID")))
}
