//! SQLite cost ledger implementation.
//!
//! Append-only spend accounting. The budget monitor reads `aggregate`, so the
//! SUM query has to see every recorded row; all inserts go through the single
//! writer connection.

use chrono::{DateTime, Utc};
use sqlx::Row;
use taskflow_core::repository::CostLedger;
use taskflow_types::cost::LedgerEntry;
use taskflow_types::error::StoreError;
use taskflow_types::run::RunTotals;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `CostLedger`.
pub struct SqliteCostLedger {
    pool: DatabasePool,
}

impl SqliteCostLedger {
    /// Create a new ledger backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

/// Internal row type for mapping SQLite rows to ledger entries.
struct LedgerRow {
    id: String,
    run_id: String,
    node_id: Option<String>,
    request_id: String,
    app: String,
    feature: String,
    provider: String,
    model: String,
    prompt_tokens: i64,
    completion_tokens: i64,
    total_tokens: i64,
    usd: f64,
    meta_json: String,
    created_at: String,
}

impl LedgerRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            run_id: row.try_get("run_id")?,
            node_id: row.try_get("node_id")?,
            request_id: row.try_get("request_id")?,
            app: row.try_get("app")?,
            feature: row.try_get("feature")?,
            provider: row.try_get("provider")?,
            model: row.try_get("model")?,
            prompt_tokens: row.try_get("prompt_tokens")?,
            completion_tokens: row.try_get("completion_tokens")?,
            total_tokens: row.try_get("total_tokens")?,
            usd: row.try_get("usd")?,
            meta_json: row.try_get("meta_json")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_entry(self) -> Result<LedgerEntry, StoreError> {
        let meta = serde_json::from_str(&self.meta_json)
            .map_err(|e| StoreError::Query(format!("invalid meta JSON: {e}")))?;

        Ok(LedgerEntry {
            id: parse_uuid(&self.id)?,
            run_id: parse_uuid(&self.run_id)?,
            node_id: self.node_id,
            request_id: self.request_id,
            app: self.app,
            feature: self.feature,
            provider: self.provider,
            model: self.model,
            prompt_tokens: self.prompt_tokens as u32,
            completion_tokens: self.completion_tokens as u32,
            total_tokens: self.total_tokens as u32,
            usd: self.usd,
            meta,
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

impl CostLedger for SqliteCostLedger {
    async fn record(&self, entry: &LedgerEntry) -> Result<(), StoreError> {
        let meta_json =
            serde_json::to_string(&entry.meta).map_err(|e| StoreError::Query(e.to_string()))?;

        sqlx::query(
            "INSERT INTO cost_ledger (id, run_id, node_id, request_id, app, feature, provider, model,
                                      prompt_tokens, completion_tokens, total_tokens, usd, meta_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.id.to_string())
        .bind(entry.run_id.to_string())
        .bind(&entry.node_id)
        .bind(&entry.request_id)
        .bind(&entry.app)
        .bind(&entry.feature)
        .bind(&entry.provider)
        .bind(&entry.model)
        .bind(entry.prompt_tokens as i64)
        .bind(entry.completion_tokens as i64)
        .bind(entry.total_tokens as i64)
        .bind(entry.usd)
        .bind(&meta_json)
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(())
    }

    async fn aggregate(&self, run_id: &Uuid) -> Result<RunTotals, StoreError> {
        let row: (i64, i64, i64, f64) = sqlx::query_as(
            "SELECT COALESCE(SUM(prompt_tokens), 0),
                    COALESCE(SUM(completion_tokens), 0),
                    COALESCE(SUM(total_tokens), 0),
                    COALESCE(SUM(usd), 0.0)
             FROM cost_ledger WHERE run_id = ?",
        )
        .bind(run_id.to_string())
        .fetch_one(&self.pool.reader)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(RunTotals {
            prompt_tokens: row.0 as u64,
            completion_tokens: row.1 as u64,
            total_tokens: row.2 as u64,
            usd: row.3,
        })
    }

    async fn list_for_run(&self, run_id: &Uuid) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows =
            sqlx::query("SELECT * FROM cost_ledger WHERE run_id = ? ORDER BY created_at ASC, id ASC")
                .bind(run_id.to_string())
                .fetch_all(&self.pool.reader)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let ledger_row =
                LedgerRow::from_row(row).map_err(|e| StoreError::Query(e.to_string()))?;
            entries.push(ledger_row.into_entry()?);
        }

        Ok(entries)
    }
}
