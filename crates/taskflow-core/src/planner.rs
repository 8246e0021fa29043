//! Run planning: template selection and dag materialization.
//!
//! Planning is resume-aware: a run that already carries a materialized dag
//! keeps it untouched, so restarts never lose node state. Fresh runs load
//! their template (explicit ID or the stored default), validate it, make
//! one cheap-tier gateway call for planner notes, and materialize the
//! template graph into pending run state.

use serde_json::json;
use taskflow_types::cost::{CostEstimate, LedgerEntry, TokenUsage};
use taskflow_types::error::StoreError;
use taskflow_types::run::{Run, RunDag};
use thiserror::Error;
use uuid::Uuid;

use crate::cost::CostEstimator;
use crate::dag::{GraphError, materialize, validate_graph};
use crate::gateway::{GenerationRequest, ToolGateway};
use crate::repository::{CostLedger, TemplateStore};
use crate::router::{ModelRouter, Workload};
use crate::scheduler::APP_NAME;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("no templates available")]
    NoTemplates,

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("planner call failed: {0}")]
    Gateway(String),
}

/// Produce the dag a run will execute.
pub async fn plan_run<G, T, L>(
    run: &Run,
    gateway: &G,
    router: &ModelRouter,
    estimator: &CostEstimator,
    templates: &T,
    ledger: &L,
) -> Result<RunDag, PlanError>
where
    G: ToolGateway,
    T: TemplateStore,
    L: CostLedger,
{
    // Resume path: an existing dag is authoritative.
    if let Some(dag) = &run.dag
        && !dag.nodes.is_empty()
    {
        return Ok(dag.clone());
    }

    let template = match &run.template_id {
        Some(id) => templates
            .get_template(id)
            .await?
            .ok_or_else(|| PlanError::TemplateNotFound(id.clone()))?,
        None => templates
            .get_default_template()
            .await?
            .ok_or(PlanError::NoTemplates)?,
    };

    validate_graph(&template)?;

    let spec = router.for_workload(Workload::Planner);
    let prompt = format!(
        "Task: {}\nWorkflow: {}\nWrite one short paragraph of guidance for \
         executing this workflow against the task.",
        run.task, template.name
    );
    let request = GenerationRequest::new(prompt, &spec.name);
    let generation = match gateway.generate(&request).await {
        Ok(generation) => generation,
        Err(err) => {
            // A failed planner call can still have billed tokens.
            if let Some(usage) = &err.usage {
                let estimate = estimator.estimate(usage);
                ledger
                    .record(&planner_entry(run, &template.id, usage, estimate))
                    .await?;
            }
            return Err(PlanError::Gateway(err.message));
        }
    };

    let estimate = estimator.estimate(&generation.usage);
    ledger
        .record(&planner_entry(run, &template.id, &generation.usage, estimate))
        .await?;

    let mut dag = materialize(&template);
    dag.planner_notes = Some(generation.content);

    tracing::info!(
        run_id = %run.id,
        template_id = %template.id,
        nodes = dag.nodes.len(),
        "run planned"
    );

    Ok(dag)
}

fn planner_entry(
    run: &Run,
    template_id: &str,
    usage: &TokenUsage,
    estimate: CostEstimate,
) -> LedgerEntry {
    LedgerEntry {
        id: Uuid::now_v7(),
        run_id: run.id,
        node_id: None,
        request_id: run.request_id.clone(),
        app: APP_NAME.to_string(),
        feature: "planner".to_string(),
        provider: usage.provider.clone(),
        model: usage.model.clone(),
        prompt_tokens: estimate.prompt_tokens,
        completion_tokens: estimate.completion_tokens,
        total_tokens: estimate.total_tokens,
        usd: estimate.usd,
        meta: json!({ "template_id": template_id }),
        created_at: chrono::Utc::now(),
    }
}
