//! SQLite run store implementation.
//!
//! Implements `RunStore` from `taskflow-core` using sqlx with split read/write
//! pools. Run rows carry the serialized DAG snapshot and the aggregated cost
//! totals; diagnostics live in their own append-only table.

use chrono::{DateTime, Utc};
use sqlx::Row;
use taskflow_core::repository::{RunStore, RunUpdate};
use taskflow_types::diagnostic::{Diagnostic, DiagnosticKind};
use taskflow_types::error::StoreError;
use taskflow_types::run::{Run, RunConstraints, RunDag, RunStatus, RunTotals};
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `RunStore`.
pub struct SqliteRunStore {
    pool: DatabasePool,
}

impl SqliteRunStore {
    /// Create a new store backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

/// Internal row type for mapping SQLite rows to domain runs.
struct RunRow {
    id: String,
    request_id: String,
    task: String,
    template_id: Option<String>,
    status: String,
    constraints_json: String,
    dag_json: Option<String>,
    total_prompt_tokens: i64,
    total_completion_tokens: i64,
    total_tokens: i64,
    total_usd: f64,
    cancel_requested: bool,
    created_at: String,
    started_at: Option<String>,
    ended_at: Option<String>,
}

impl RunRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            request_id: row.try_get("request_id")?,
            task: row.try_get("task")?,
            template_id: row.try_get("template_id")?,
            status: row.try_get("status")?,
            constraints_json: row.try_get("constraints_json")?,
            dag_json: row.try_get("dag_json")?,
            total_prompt_tokens: row.try_get("total_prompt_tokens")?,
            total_completion_tokens: row.try_get("total_completion_tokens")?,
            total_tokens: row.try_get("total_tokens")?,
            total_usd: row.try_get("total_usd")?,
            cancel_requested: row.try_get("cancel_requested")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            ended_at: row.try_get("ended_at")?,
        })
    }

    fn into_run(self) -> Result<Run, StoreError> {
        let id = parse_uuid(&self.id)?;
        let status: RunStatus = enum_from_str(&self.status)?;

        let constraints: RunConstraints = serde_json::from_str(&self.constraints_json)
            .map_err(|e| StoreError::Query(format!("invalid constraints JSON: {e}")))?;

        let dag: Option<RunDag> = self
            .dag_json
            .as_deref()
            .map(|json| {
                serde_json::from_str(json)
                    .map_err(|e| StoreError::Query(format!("invalid dag JSON: {e}")))
            })
            .transpose()?;

        let created_at = parse_datetime(&self.created_at)?;
        let started_at = self.started_at.as_deref().map(parse_datetime).transpose()?;
        let ended_at = self.ended_at.as_deref().map(parse_datetime).transpose()?;

        Ok(Run {
            id,
            request_id: self.request_id,
            task: self.task,
            template_id: self.template_id,
            status,
            constraints,
            dag,
            totals: RunTotals {
                prompt_tokens: self.total_prompt_tokens as u64,
                completion_tokens: self.total_completion_tokens as u64,
                total_tokens: self.total_tokens as u64,
                usd: self.total_usd,
            },
            cancel_requested: self.cancel_requested,
            created_at,
            started_at,
            ended_at,
        })
    }
}

/// Internal row type for mapping SQLite rows to diagnostics.
struct DiagnosticRow {
    id: String,
    run_id: String,
    kind: String,
    node_id: Option<String>,
    message: String,
    details_json: String,
    created_at: String,
}

impl DiagnosticRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            run_id: row.try_get("run_id")?,
            kind: row.try_get("kind")?,
            node_id: row.try_get("node_id")?,
            message: row.try_get("message")?,
            details_json: row.try_get("details_json")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_diagnostic(self) -> Result<Diagnostic, StoreError> {
        let kind: DiagnosticKind = enum_from_str(&self.kind)?;
        let details = serde_json::from_str(&self.details_json)
            .map_err(|e| StoreError::Query(format!("invalid details JSON: {e}")))?;

        Ok(Diagnostic {
            id: parse_uuid(&self.id)?,
            run_id: parse_uuid(&self.run_id)?,
            kind,
            node_id: self.node_id,
            message: self.message,
            details,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(s).map_err(|e| StoreError::Query(format!("invalid uuid: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Serialize a snake_case serde enum to its wire string.
fn enum_to_str<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    match serde_json::to_value(value).map_err(|e| StoreError::Query(e.to_string()))? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(StoreError::Query(format!(
            "expected string enum, got {other}"
        ))),
    }
}

/// Parse a snake_case serde enum from its wire string.
fn enum_from_str<T: serde::de::DeserializeOwned>(s: &str) -> Result<T, StoreError> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|e| StoreError::Query(format!("invalid enum value '{s}': {e}")))
}

impl RunStore for SqliteRunStore {
    async fn create_run(&self, run: &Run) -> Result<(), StoreError> {
        let status = enum_to_str(&run.status)?;
        let constraints_json = serde_json::to_string(&run.constraints)
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let dag_json = run
            .dag
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Query(e.to_string()))?;

        sqlx::query(
            "INSERT INTO runs (id, request_id, task, template_id, status, constraints_json, dag_json,
                               total_prompt_tokens, total_completion_tokens, total_tokens, total_usd,
                               cancel_requested, created_at, started_at, ended_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(run.id.to_string())
        .bind(&run.request_id)
        .bind(&run.task)
        .bind(&run.template_id)
        .bind(&status)
        .bind(&constraints_json)
        .bind(&dag_json)
        .bind(run.totals.prompt_tokens as i64)
        .bind(run.totals.completion_tokens as i64)
        .bind(run.totals.total_tokens as i64)
        .bind(run.totals.usd)
        .bind(run.cancel_requested)
        .bind(format_datetime(&run.created_at))
        .bind(run.started_at.as_ref().map(format_datetime))
        .bind(run.ended_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(())
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<Run>, StoreError> {
        let row = sqlx::query("SELECT * FROM runs WHERE id = ?")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let run_row =
                    RunRow::from_row(&row).map_err(|e| StoreError::Query(e.to_string()))?;
                Ok(Some(run_row.into_run()?))
            }
            None => Ok(None),
        }
    }

    async fn list_runs(&self, limit: u32) -> Result<Vec<Run>, StoreError> {
        let rows = sqlx::query("SELECT * FROM runs ORDER BY created_at DESC, id DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in &rows {
            let run_row = RunRow::from_row(row).map_err(|e| StoreError::Query(e.to_string()))?;
            runs.push(run_row.into_run()?);
        }

        Ok(runs)
    }

    async fn update_run(&self, run_id: &Uuid, update: RunUpdate) -> Result<(), StoreError> {
        let mut sets: Vec<&str> = Vec::new();

        let status = update.status.as_ref().map(enum_to_str).transpose()?;
        if status.is_some() {
            sets.push("status = ?");
        }

        let dag_json = update
            .dag
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Query(e.to_string()))?;
        if dag_json.is_some() {
            sets.push("dag_json = ?");
        }

        if update.totals.is_some() {
            sets.push("total_prompt_tokens = ?");
            sets.push("total_completion_tokens = ?");
            sets.push("total_tokens = ?");
            sets.push("total_usd = ?");
        }

        if update.started_at.is_some() {
            sets.push("started_at = ?");
        }

        if update.clear_ended_at {
            sets.push("ended_at = NULL");
        } else if update.ended_at.is_some() {
            sets.push("ended_at = ?");
        }

        if sets.is_empty() {
            return Ok(());
        }

        let sql = format!("UPDATE runs SET {} WHERE id = ?", sets.join(", "));
        let mut query = sqlx::query(&sql);

        if let Some(status) = &status {
            query = query.bind(status);
        }
        if let Some(dag_json) = &dag_json {
            query = query.bind(dag_json);
        }
        if let Some(totals) = &update.totals {
            query = query
                .bind(totals.prompt_tokens as i64)
                .bind(totals.completion_tokens as i64)
                .bind(totals.total_tokens as i64)
                .bind(totals.usd);
        }
        if let Some(started_at) = &update.started_at {
            query = query.bind(format_datetime(started_at));
        }
        if !update.clear_ended_at {
            if let Some(ended_at) = &update.ended_at {
                query = query.bind(format_datetime(ended_at));
            }
        }

        let result = query
            .bind(run_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("run", run_id.to_string()));
        }

        Ok(())
    }

    async fn set_cancel_requested(&self, run_id: &Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE runs SET cancel_requested = 1 WHERE id = ?")
            .bind(run_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("run", run_id.to_string()));
        }

        Ok(())
    }

    async fn list_incomplete_runs(&self) -> Result<Vec<Run>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM runs WHERE status IN ('created', 'running') ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in &rows {
            let run_row = RunRow::from_row(row).map_err(|e| StoreError::Query(e.to_string()))?;
            runs.push(run_row.into_run()?);
        }

        Ok(runs)
    }

    async fn append_diagnostic(&self, diagnostic: &Diagnostic) -> Result<(), StoreError> {
        let kind = enum_to_str(&diagnostic.kind)?;
        let details_json = serde_json::to_string(&diagnostic.details)
            .map_err(|e| StoreError::Query(e.to_string()))?;

        sqlx::query(
            "INSERT INTO run_diagnostics (id, run_id, kind, node_id, message, details_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(diagnostic.id.to_string())
        .bind(diagnostic.run_id.to_string())
        .bind(&kind)
        .bind(&diagnostic.node_id)
        .bind(&diagnostic.message)
        .bind(&details_json)
        .bind(format_datetime(&diagnostic.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(())
    }

    async fn list_diagnostics(&self, run_id: &Uuid) -> Result<Vec<Diagnostic>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM run_diagnostics WHERE run_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut diagnostics = Vec::with_capacity(rows.len());
        for row in &rows {
            let diag_row =
                DiagnosticRow::from_row(row).map_err(|e| StoreError::Query(e.to_string()))?;
            diagnostics.push(diag_row.into_diagnostic()?);
        }

        Ok(diagnostics)
    }
}
