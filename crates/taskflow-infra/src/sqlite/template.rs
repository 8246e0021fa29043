//! SQLite template store implementation.
//!
//! Implements `TemplateStore` from `taskflow-core` using sqlx with split read/write pools.

use chrono::Utc;
use sqlx::Row;
use taskflow_core::repository::TemplateStore;
use taskflow_types::error::StoreError;
use taskflow_types::workflow::{NodeContract, WorkflowGraph, WorkflowTemplate};

use super::pool::DatabasePool;

/// SQLite-backed implementation of `TemplateStore`.
pub struct SqliteTemplateStore {
    pool: DatabasePool,
}

impl SqliteTemplateStore {
    /// Create a new store backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

/// Internal row type for mapping SQLite rows to domain templates.
struct TemplateRow {
    id: String,
    name: String,
    version: i64,
    description: Option<String>,
    graph_json: String,
    contracts_json: String,
}

impl TemplateRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            version: row.try_get("version")?,
            description: row.try_get("description")?,
            graph_json: row.try_get("graph_json")?,
            contracts_json: row.try_get("contracts_json")?,
        })
    }

    fn into_template(self) -> Result<WorkflowTemplate, StoreError> {
        let graph: WorkflowGraph = serde_json::from_str(&self.graph_json)
            .map_err(|e| StoreError::Query(format!("invalid graph JSON: {e}")))?;

        let contracts: std::collections::HashMap<String, NodeContract> =
            serde_json::from_str(&self.contracts_json)
                .map_err(|e| StoreError::Query(format!("invalid contracts JSON: {e}")))?;

        Ok(WorkflowTemplate {
            id: self.id,
            name: self.name,
            version: self.version as u32,
            description: self.description,
            graph,
            contracts,
        })
    }
}

impl TemplateStore for SqliteTemplateStore {
    async fn upsert_template(&self, template: &WorkflowTemplate) -> Result<(), StoreError> {
        let graph_json = serde_json::to_string(&template.graph)
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let contracts_json = serde_json::to_string(&template.contracts)
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO workflow_templates (id, name, version, description, graph_json, contracts_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 version = excluded.version,
                 description = excluded.description,
                 graph_json = excluded.graph_json,
                 contracts_json = excluded.contracts_json,
                 updated_at = excluded.updated_at",
        )
        .bind(&template.id)
        .bind(&template.name)
        .bind(template.version as i64)
        .bind(&template.description)
        .bind(&graph_json)
        .bind(&contracts_json)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(())
    }

    async fn get_template(&self, id: &str) -> Result<Option<WorkflowTemplate>, StoreError> {
        let row = sqlx::query("SELECT * FROM workflow_templates WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let template_row =
                    TemplateRow::from_row(&row).map_err(|e| StoreError::Query(e.to_string()))?;
                Ok(Some(template_row.into_template()?))
            }
            None => Ok(None),
        }
    }

    async fn get_default_template(&self) -> Result<Option<WorkflowTemplate>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM workflow_templates ORDER BY created_at ASC, id ASC LIMIT 1",
        )
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let template_row =
                    TemplateRow::from_row(&row).map_err(|e| StoreError::Query(e.to_string()))?;
                Ok(Some(template_row.into_template()?))
            }
            None => Ok(None),
        }
    }

    async fn list_templates(&self) -> Result<Vec<WorkflowTemplate>, StoreError> {
        let rows = sqlx::query("SELECT * FROM workflow_templates ORDER BY created_at ASC, id ASC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut templates = Vec::with_capacity(rows.len());
        for row in &rows {
            let template_row =
                TemplateRow::from_row(row).map_err(|e| StoreError::Query(e.to_string()))?;
            templates.push(template_row.into_template()?);
        }

        Ok(templates)
    }
}
