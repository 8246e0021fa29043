//! Node dispatch: ready-set computation and the per-node attempt runner.
//!
//! The supervisor's run loop owns the `RunDag` and is the only writer of
//! node state. It computes the ready set, marks nodes `Running`, and hands
//! each one to a `NodeRunner` task. The runner performs the attempt cycle
//! (allow-list check, model routing, timed gateway call, output validation,
//! ledger recording, backoff retries) against its own copy of the node and
//! reports a `NodeOutcome` back; the loop applies the outcome to the dag.
//! A ledger or diagnostic write failure is not a node failure: it bubbles
//! out as a `StoreError` and halts the whole run, so spend and audit records
//! are never silently dropped.

use std::sync::Arc;

use serde_json::json;
use taskflow_types::config::RetryPolicy;
use taskflow_types::cost::LedgerEntry;
use taskflow_types::diagnostic::{
    Diagnostic, DiagnosticKind, FailureCode, FailureMode, StructuredError,
};
use taskflow_types::error::StoreError;
use taskflow_types::run::{NodeStatus, RunDag, RunNode};
use taskflow_types::workflow::{ModelPreference, NodeContract, ToolCapability};
use uuid::Uuid;

use crate::contract::validate_output;
use crate::cost::CostEstimator;
use crate::gateway::{GenerationRequest, ToolGateway, ensure_allowed};
use crate::repository::{CostLedger, RunStore};
use crate::router::ModelRouter;

/// Application name stamped on ledger entries.
pub const APP_NAME: &str = "taskflow";

// ---------------------------------------------------------------------------
// Ready set
// ---------------------------------------------------------------------------

/// Pending nodes whose every dependency is `Completed`.
///
/// A dependency that is `Skipped`, `Failed`, or `Canceled` never satisfies
/// a dependent; such dependents either get skipped by reflection or picked
/// up by the monitor's deadlock check.
pub fn ready_nodes(dag: &RunDag) -> Vec<String> {
    dag.nodes
        .iter()
        .filter(|node| node.status == NodeStatus::Pending)
        .filter(|node| {
            node.depends_on.iter().all(|dep| {
                dag.node(dep)
                    .is_some_and(|d| d.status == NodeStatus::Completed)
            })
        })
        .map(|node| node.id.clone())
        .collect()
}

// ---------------------------------------------------------------------------
// Node job / outcome
// ---------------------------------------------------------------------------

/// Everything one node attempt cycle needs, detached from the live dag.
#[derive(Debug, Clone)]
pub struct NodeJob {
    pub run_id: Uuid,
    pub request_id: String,
    pub task: String,
    pub node: RunNode,
    pub contract: NodeContract,
    /// Reflection's run-scoped tier override, if any.
    pub model_override: Option<ModelPreference>,
    /// Prompt context assembled from planner notes and dependency outputs.
    pub context: String,
}

/// Result of a full attempt cycle for one node.
#[derive(Debug)]
pub struct NodeOutcome {
    pub node_id: String,
    /// Attempts executed by this cycle (drives the run step counter).
    pub attempts_executed: u32,
    pub result: Result<serde_json::Value, NodeFailure>,
}

/// A node that exhausted its attempts (or hit a terminal condition).
#[derive(Debug, Clone)]
pub struct NodeFailure {
    pub error: StructuredError,
    /// Reflection trigger classification for this failure.
    pub mode: FailureMode,
}

// ---------------------------------------------------------------------------
// Prompt assembly
// ---------------------------------------------------------------------------

/// Build the prompt context for a node: planner notes plus the summaries of
/// its completed dependencies.
pub fn build_context(dag: &RunDag, node: &RunNode) -> String {
    let mut context = String::new();
    if let Some(notes) = &dag.planner_notes {
        context.push_str("Plan notes: ");
        context.push_str(notes);
        context.push('\n');
    }
    for dep in &node.depends_on {
        if let Some(dep_node) = dag.node(dep)
            && let Some(output) = &dep_node.last_output
            && let Some(summary) = output.get("summary").and_then(|s| s.as_str())
        {
            context.push_str(&format!("Result of {dep}: {summary}\n"));
        }
    }
    context
}

fn build_prompt(job: &NodeJob) -> String {
    let description = job.node.description.as_deref().unwrap_or(&job.node.name);
    format!(
        "Task: {}\nCurrent step: {} ({})\n{}Respond with a JSON object: \
         {{\"summary\": string, \"confidence\": number 0..1, \"artifacts\": object}}.",
        job.task, job.node.id, description, job.context
    )
}

/// Interpret gateway text as a step output candidate.
///
/// JSON objects are taken verbatim (so the model controls confidence);
/// plain text is wrapped into the base shape.
fn candidate_output(content: &str) -> serde_json::Value {
    match serde_json::from_str::<serde_json::Value>(content) {
        Ok(value) if value.is_object() => value,
        _ => json!({
            "summary": content,
            "confidence": 0.9,
            "artifacts": {},
        }),
    }
}

// ---------------------------------------------------------------------------
// Node runner
// ---------------------------------------------------------------------------

/// Executes the attempt cycle for a single node.
pub struct NodeRunner<G, S, L> {
    gateway: Arc<G>,
    router: Arc<ModelRouter>,
    estimator: Arc<CostEstimator>,
    retry: RetryPolicy,
    store: Arc<S>,
    ledger: Arc<L>,
}

impl<G, S, L> Clone for NodeRunner<G, S, L> {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
            router: Arc::clone(&self.router),
            estimator: Arc::clone(&self.estimator),
            retry: self.retry,
            store: Arc::clone(&self.store),
            ledger: Arc::clone(&self.ledger),
        }
    }
}

/// One classified attempt failure, before retry policy is applied.
struct AttemptError {
    error: StructuredError,
    mode: FailureMode,
    retryable: bool,
}

impl<G, S, L> NodeRunner<G, S, L>
where
    G: ToolGateway + 'static,
    S: RunStore + 'static,
    L: CostLedger + 'static,
{
    pub fn new(
        gateway: Arc<G>,
        router: Arc<ModelRouter>,
        estimator: Arc<CostEstimator>,
        retry: RetryPolicy,
        store: Arc<S>,
        ledger: Arc<L>,
    ) -> Self {
        Self {
            gateway,
            router,
            estimator,
            retry,
            store,
            ledger,
        }
    }

    /// Run attempts until success, exhaustion, or a terminal condition.
    ///
    /// `Err` here means a storage write failed, which aborts the run.
    pub async fn execute(&self, job: NodeJob) -> Result<NodeOutcome, StoreError> {
        // Static precondition: retrying an allow-list miss cannot help.
        if let Err(err) = ensure_allowed(&job.contract, ToolCapability::Generate) {
            self.store
                .append_diagnostic(
                    &Diagnostic::new(job.run_id, DiagnosticKind::ToolNotAllowed, err.to_string())
                        .for_node(&job.node.id),
                )
                .await?;
            return Ok(NodeOutcome {
                node_id: job.node.id.clone(),
                attempts_executed: 1,
                result: Err(NodeFailure {
                    error: StructuredError::new(FailureCode::ToolNotAllowed, err.to_string()),
                    mode: FailureMode::Other,
                }),
            });
        }

        // Attempts already charged to the node (interrupted ones included)
        // count against its budget.
        let remaining = (job.contract.max_retries + 1).saturating_sub(job.node.attempts);
        if remaining == 0 {
            return Ok(NodeOutcome {
                node_id: job.node.id.clone(),
                attempts_executed: 0,
                result: Err(NodeFailure {
                    error: StructuredError::new(
                        FailureCode::ExecutionError,
                        "retry budget exhausted",
                    ),
                    mode: FailureMode::Other,
                }),
            });
        }

        let mut attempts_executed = 0u32;
        let mut last_failure: Option<AttemptError> = None;

        while attempts_executed < remaining {
            let attempt = job.node.attempts + attempts_executed + 1;
            attempts_executed += 1;

            match self.attempt(&job, attempt).await? {
                Ok(output) => {
                    return Ok(NodeOutcome {
                        node_id: job.node.id.clone(),
                        attempts_executed,
                        result: Ok(output),
                    });
                }
                Err(failure) => {
                    tracing::warn!(
                        run_id = %job.run_id,
                        node_id = %job.node.id,
                        attempt,
                        code = ?failure.error.code,
                        "node attempt failed: {}",
                        failure.error.message
                    );
                    let retryable = failure.retryable;
                    last_failure = Some(failure);
                    if !retryable || attempts_executed >= remaining {
                        break;
                    }
                    let backoff = self.retry.backoff_seconds(attempt);
                    tokio::time::sleep(std::time::Duration::from_secs(backoff)).await;
                }
            }
        }

        // Loop only exits through a failure here.
        let failure = last_failure.unwrap_or_else(|| AttemptError {
            error: StructuredError::new(FailureCode::ExecutionError, "no attempts executed"),
            mode: FailureMode::Other,
            retryable: false,
        });
        Ok(NodeOutcome {
            node_id: job.node.id.clone(),
            attempts_executed,
            result: Err(NodeFailure {
                error: failure.error,
                mode: failure.mode,
            }),
        })
    }

    /// One attempt: timed gateway call, output validation, ledger entry.
    ///
    /// The outer `Result` carries storage failures; the inner one is the
    /// attempt's own verdict.
    async fn attempt(
        &self,
        job: &NodeJob,
        attempt: u32,
    ) -> Result<Result<serde_json::Value, AttemptError>, StoreError> {
        let spec = self
            .router
            .for_step(job.contract.model_preference, job.model_override);
        let mut request = GenerationRequest::new(build_prompt(job), &spec.name);
        request
            .metadata
            .insert("run_id".to_string(), job.run_id.to_string());
        request
            .metadata
            .insert("node_id".to_string(), job.node.id.clone());

        let timeout = std::time::Duration::from_secs(job.contract.timeout_s);
        let generation = match tokio::time::timeout(timeout, self.gateway.generate(&request)).await
        {
            Err(_) => {
                return Ok(Err(AttemptError {
                    error: StructuredError::new(
                        FailureCode::Timeout,
                        format!("attempt exceeded {}s", job.contract.timeout_s),
                    )
                    .with_details(json!({ "attempt": attempt })),
                    mode: FailureMode::Timeout,
                    retryable: true,
                }));
            }
            Ok(Err(err)) => {
                // Failed calls can still have billed tokens.
                if let Some(usage) = &err.usage {
                    self.record_spend(job, usage, attempt).await?;
                }
                return Ok(Err(AttemptError {
                    error: StructuredError::new(FailureCode::ExecutionError, err.message.clone())
                        .with_details(json!({ "attempt": attempt })),
                    mode: FailureMode::Other,
                    retryable: true,
                }));
            }
            Ok(Ok(generation)) => generation,
        };

        self.record_spend(job, &generation.usage, attempt).await?;

        let output = candidate_output(&generation.content);
        if let Err(violation) = validate_output(job.contract.output, &output) {
            self.store
                .append_diagnostic(
                    &Diagnostic::new(job.run_id, DiagnosticKind::SchemaError, violation.to_string())
                        .for_node(&job.node.id)
                        .with_details(json!({ "attempt": attempt })),
                )
                .await?;
            return Ok(Err(AttemptError {
                error: StructuredError::new(FailureCode::SchemaError, violation.to_string())
                    .with_details(json!({ "attempt": attempt })),
                mode: FailureMode::SchemaError,
                retryable: true,
            }));
        }

        Ok(Ok(output))
    }

    async fn record_spend(
        &self,
        job: &NodeJob,
        usage: &taskflow_types::cost::TokenUsage,
        attempt: u32,
    ) -> Result<(), StoreError> {
        let estimate = self.estimator.estimate(usage);
        let entry = LedgerEntry {
            id: Uuid::now_v7(),
            run_id: job.run_id,
            node_id: Some(job.node.id.clone()),
            request_id: job.request_id.clone(),
            app: APP_NAME.to_string(),
            feature: "step_execution".to_string(),
            provider: usage.provider.clone(),
            model: usage.model.clone(),
            prompt_tokens: estimate.prompt_tokens,
            completion_tokens: estimate.completion_tokens,
            total_tokens: estimate.total_tokens,
            usd: estimate.usd,
            meta: json!({ "attempt": attempt }),
            created_at: chrono::Utc::now(),
        };
        self.ledger.record(&entry).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
