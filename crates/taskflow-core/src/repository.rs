//! Store trait definitions.
//!
//! Defines the storage interface for templates, runs, diagnostics, and the
//! cost ledger. The infrastructure layer (taskflow-infra) implements these
//! traits with SQLite persistence; tests substitute in-memory stores. The
//! engine takes them by injection -- there is no global store.
//!
//! Uses native async fn in traits (Rust 2024 edition, no async_trait macro).

use taskflow_types::cost::LedgerEntry;
use taskflow_types::diagnostic::Diagnostic;
use taskflow_types::error::StoreError;
use taskflow_types::run::{Run, RunDag, RunStatus, RunTotals};
use taskflow_types::workflow::WorkflowTemplate;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// Storage for immutable workflow templates.
pub trait TemplateStore: Send + Sync {
    /// Upsert a template (insert or replace by ID). Callers validate first.
    fn upsert_template(
        &self,
        template: &WorkflowTemplate,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Get a template by its ID.
    fn get_template(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowTemplate>, StoreError>> + Send;

    /// The default template: the earliest created one.
    fn get_default_template(
        &self,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowTemplate>, StoreError>> + Send;

    fn list_templates(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowTemplate>, StoreError>> + Send;
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

/// Fields the engine updates on a run as execution progresses.
///
/// `None` leaves a column untouched; dag and timestamps write whole values.
#[derive(Debug, Default, Clone)]
pub struct RunUpdate {
    pub status: Option<RunStatus>,
    pub dag: Option<RunDag>,
    pub totals: Option<RunTotals>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Null out `ended_at` (run retry re-opens a finished run).
    pub clear_ended_at: bool,
}

/// Storage for runs and their diagnostic logs.
pub trait RunStore: Send + Sync {
    fn create_run(
        &self,
        run: &Run,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    fn get_run(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Run>, StoreError>> + Send;

    /// Runs in reverse creation order.
    fn list_runs(
        &self,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Run>, StoreError>> + Send;

    /// Apply a partial update. Errors with `NotFound` for unknown runs.
    fn update_run(
        &self,
        run_id: &Uuid,
        update: RunUpdate,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Set the persistent cooperative-cancel flag.
    fn set_cancel_requested(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Runs that were `created` or `running` when the process last stopped.
    fn list_incomplete_runs(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Run>, StoreError>> + Send;

    /// Append one diagnostic record. Append-only.
    fn append_diagnostic(
        &self,
        diagnostic: &Diagnostic,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Diagnostics for a run in creation order.
    fn list_diagnostics(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Diagnostic>, StoreError>> + Send;
}

// ---------------------------------------------------------------------------
// Cost ledger
// ---------------------------------------------------------------------------

/// Append-only spend accounting.
pub trait CostLedger: Send + Sync {
    fn record(
        &self,
        entry: &LedgerEntry,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Sum of all entries for a run. The budget check reads this, so it
    /// must reflect every recorded entry.
    fn aggregate(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<RunTotals, StoreError>> + Send;

    /// Entries for a run in creation order.
    fn list_for_run(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<LedgerEntry>, StoreError>> + Send;
}
