//! Run supervision: driver tasks, resume, cancellation, retry.
//!
//! The supervisor owns exactly one driver task per active run. The driver
//! is the single writer of the run's dag: it plans, dispatches ready nodes
//! through a semaphore-bounded `JoinSet`, applies outcomes, consults the
//! monitor between turns, and finishes the run. Node state is persisted
//! before and after every dispatch, so a crash at any point resumes from
//! durable state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use taskflow_types::config::EngineSettings;
use taskflow_types::diagnostic::{
    Diagnostic, FailureCode, FailureMode, ReflectionAction, StructuredError,
};
use taskflow_types::error::StoreError;
use taskflow_types::run::{NodeStatus, Run, RunConstraints, RunDag, RunStatus, RunTotals};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::cost::CostEstimator;
use crate::gateway::ToolGateway;
use crate::monitor::{FailedReason, MonitorVerdict, RunHealth, evaluate};
use crate::planner::plan_run;
use crate::reflection::reflect;
use crate::repository::{CostLedger, RunStore, RunUpdate, TemplateStore};
use crate::router::ModelRouter;
use crate::scheduler::{NodeFailure, NodeJob, NodeOutcome, NodeRunner, build_context, ready_nodes};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("run not found: {0}")]
    RunNotFound(Uuid),

    #[error("run {0} is {1:?}; only failed runs can be retried")]
    NotRetryable(Uuid, RunStatus),
}

/// Drives runs to completion. Cheap to clone; all clones share state.
pub struct RunSupervisor<S, T, L, G> {
    inner: Arc<Inner<S, T, L, G>>,
}

impl<S, T, L, G> Clone for RunSupervisor<S, T, L, G> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<S, T, L, G> {
    store: Arc<S>,
    templates: Arc<T>,
    ledger: Arc<L>,
    gateway: Arc<G>,
    router: Arc<ModelRouter>,
    estimator: Arc<CostEstimator>,
    settings: EngineSettings,
    runner: NodeRunner<G, S, L>,
    /// One driver task per active run.
    tasks: DashMap<Uuid, tokio::task::JoinHandle<()>>,
}

impl<S, T, L, G> RunSupervisor<S, T, L, G>
where
    S: RunStore + 'static,
    T: TemplateStore + 'static,
    L: CostLedger + 'static,
    G: ToolGateway + 'static,
{
    pub fn new(
        store: Arc<S>,
        templates: Arc<T>,
        ledger: Arc<L>,
        gateway: Arc<G>,
        settings: EngineSettings,
    ) -> Self {
        let router = Arc::new(ModelRouter::new(settings.models.clone()));
        let estimator = Arc::new(CostEstimator::new(settings.models.clone()));
        let runner = NodeRunner::new(
            Arc::clone(&gateway),
            Arc::clone(&router),
            Arc::clone(&estimator),
            settings.retry,
            Arc::clone(&store),
            Arc::clone(&ledger),
        );
        Self {
            inner: Arc::new(Inner {
                store,
                templates,
                ledger,
                gateway,
                router,
                estimator,
                settings,
                runner,
                tasks: DashMap::new(),
            }),
        }
    }

    /// Constraint defaults applied to runs that do not override them.
    pub fn default_constraints(&self) -> RunConstraints {
        self.inner.settings.default_constraints
    }

    /// Create a run record and start driving it.
    pub async fn create_run(
        &self,
        task: String,
        template_id: Option<String>,
        constraints: Option<RunConstraints>,
        request_id: String,
    ) -> Result<Run, SupervisorError> {
        let run = Run {
            id: Uuid::now_v7(),
            request_id,
            task,
            template_id,
            status: RunStatus::Created,
            constraints: constraints.unwrap_or(self.inner.settings.default_constraints),
            dag: None,
            totals: RunTotals::default(),
            cancel_requested: false,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        };
        self.inner.store.create_run(&run).await?;
        self.start_run(run.id);
        Ok(run)
    }

    /// Spawn a driver for a run. A run that already has a live driver is
    /// left alone.
    pub fn start_run(&self, run_id: Uuid) {
        if let Some(existing) = self.inner.tasks.get(&run_id)
            && !existing.is_finished()
        {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            if let Err(err) = drive(&inner, run_id).await {
                tracing::error!(%run_id, "run driver failed: {err}");
                let update = RunUpdate {
                    status: Some(RunStatus::Failed),
                    ended_at: Some(Utc::now()),
                    ..RunUpdate::default()
                };
                if let Err(err) = inner.store.update_run(&run_id, update).await {
                    tracing::error!(%run_id, "failed to mark run failed: {err}");
                }
            }
            inner.tasks.remove(&run_id);
        });
        self.inner.tasks.insert(run_id, handle);
    }

    /// Re-enter every run that was open when the process last stopped.
    pub async fn resume_incomplete_runs(&self) -> Result<usize, SupervisorError> {
        let runs = self.inner.store.list_incomplete_runs().await?;
        let count = runs.len();
        for run in runs {
            tracing::info!(run_id = %run.id, status = ?run.status, "resuming run");
            self.start_run(run.id);
        }
        Ok(count)
    }

    /// Set the cooperative cancel flag. The driver observes it at its next
    /// evaluation point; in-flight attempts are allowed to finish.
    pub async fn request_cancel(&self, run_id: Uuid) -> Result<(), SupervisorError> {
        self.inner.store.set_cancel_requested(&run_id).await?;
        Ok(())
    }

    /// Reset a failed run's failed nodes and drive it again.
    pub async fn retry_run(&self, run_id: Uuid) -> Result<Run, SupervisorError> {
        let mut run = self
            .inner
            .store
            .get_run(&run_id)
            .await?
            .ok_or(SupervisorError::RunNotFound(run_id))?;
        if run.status != RunStatus::Failed {
            return Err(SupervisorError::NotRetryable(run_id, run.status));
        }

        if let Some(dag) = &mut run.dag {
            for node in &mut dag.nodes {
                if node.status == NodeStatus::Failed {
                    node.status = NodeStatus::Pending;
                    node.attempts = 0;
                    node.last_error = None;
                    node.started_at = None;
                    node.ended_at = None;
                }
            }
        }
        run.status = RunStatus::Created;
        run.ended_at = None;

        let update = RunUpdate {
            status: Some(RunStatus::Created),
            dag: run.dag.clone(),
            clear_ended_at: true,
            ..RunUpdate::default()
        };
        self.inner.store.update_run(&run_id, update).await?;
        self.start_run(run_id);
        Ok(run)
    }

    /// Whether a driver task is currently live for this run.
    pub fn is_active(&self, run_id: &Uuid) -> bool {
        self.inner
            .tasks
            .get(run_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Wait for a run's driver task to finish. Test and shutdown helper.
    pub async fn wait_for(&self, run_id: Uuid) {
        let handle = self.inner.tasks.remove(&run_id);
        if let Some((_, handle)) = handle {
            let _ = handle.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

async fn drive<S, T, L, G>(inner: &Arc<Inner<S, T, L, G>>, run_id: Uuid) -> Result<(), SupervisorError>
where
    S: RunStore + 'static,
    T: TemplateStore + 'static,
    L: CostLedger + 'static,
    G: ToolGateway + 'static,
{
    let run = inner
        .store
        .get_run(&run_id)
        .await?
        .ok_or(SupervisorError::RunNotFound(run_id))?;
    if run.status.is_terminal() {
        return Ok(());
    }

    let started_at = run.started_at.unwrap_or_else(Utc::now);
    inner
        .store
        .update_run(
            &run_id,
            RunUpdate {
                status: Some(RunStatus::Running),
                started_at: Some(started_at),
                ..RunUpdate::default()
            },
        )
        .await?;
    tracing::info!(%run_id, task = %run.task, "run started");

    let mut dag = match plan_run(
        &run,
        inner.gateway.as_ref(),
        &inner.router,
        &inner.estimator,
        inner.templates.as_ref(),
        inner.ledger.as_ref(),
    )
    .await
    {
        Ok(dag) => dag,
        Err(err) => {
            tracing::error!(%run_id, "planning failed: {err}");
            finish(inner, run_id, None, RunStatus::Failed).await?;
            return Ok(());
        }
    };

    // A node left `Running` by a crash was interrupted mid-attempt; the
    // interruption counts against its retry budget.
    for node in &mut dag.nodes {
        if node.status == NodeStatus::Running {
            node.status = NodeStatus::Pending;
            node.attempts += 1;
            node.started_at = None;
        }
    }
    persist(inner, &run_id, &dag).await?;

    let semaphore = Arc::new(Semaphore::new(run.constraints.max_parallel_nodes.max(1)));
    let mut join_set: JoinSet<Result<NodeOutcome, StoreError>> = JoinSet::new();
    let mut task_nodes: HashMap<tokio::task::Id, String> = HashMap::new();
    let mut inflight: HashSet<String> = HashSet::new();

    let mut step_counter: u32 = dag.nodes.iter().map(|n| n.attempts).sum();
    let mut steps_since_reflection: u32 = 0;
    let mut model_override = None;

    loop {
        let stored = inner
            .store
            .get_run(&run_id)
            .await?
            .ok_or(SupervisorError::RunNotFound(run_id))?;
        let totals = inner.ledger.aggregate(&run_id).await?;
        let ready: Vec<String> = ready_nodes(&dag)
            .into_iter()
            .filter(|id| !inflight.contains(id))
            .collect();
        let elapsed_s = (Utc::now() - started_at).num_seconds().max(0) as u64;

        let verdict = evaluate(&RunHealth {
            dag: &dag,
            constraints: &run.constraints,
            elapsed_s,
            total_usd: totals.usd,
            step_counter,
            steps_since_reflection,
            inflight: inflight.len(),
            ready: ready.len(),
            cancel_requested: stored.cancel_requested,
        });

        match verdict {
            MonitorVerdict::Continue => {}
            MonitorVerdict::PeriodicReflection => {
                let report = reflect(
                    &mut dag,
                    run_id,
                    FailureMode::LowConfidence,
                    None,
                    "periodic confidence check",
                );
                inner.store.append_diagnostic(&report.diagnostic).await?;
                if report.model_override.is_some() {
                    model_override = report.model_override;
                }
                steps_since_reflection = 0;
                persist(inner, &run_id, &dag).await?;
                continue;
            }
            MonitorVerdict::Fault(fault) => {
                let message = match fault.code {
                    FailureCode::Timeout => {
                        format!("run exceeded its {}s time limit", run.constraints.timeout_s)
                    }
                    FailureCode::BudgetExceeded => format!(
                        "spend ${:.6} reached the ${:.2} budget",
                        totals.usd, run.constraints.budget_usd
                    ),
                    _ => format!(
                        "step counter {} reached max_steps {}",
                        step_counter, run.constraints.max_steps
                    ),
                };
                inner
                    .store
                    .append_diagnostic(&Diagnostic::new(run_id, fault.diagnostic, &message))
                    .await?;
                let report = reflect(&mut dag, run_id, fault.mode, None, &message);
                inner.store.append_diagnostic(&report.diagnostic).await?;
                halt_inflight(&mut join_set, &mut task_nodes, &mut inflight, &mut dag).await;
                finish(inner, run_id, Some(&mut dag), RunStatus::Failed).await?;
                return Ok(());
            }
            MonitorVerdict::FinishCompleted => {
                finish(inner, run_id, Some(&mut dag), RunStatus::Completed).await?;
                return Ok(());
            }
            MonitorVerdict::FinishCanceled => {
                // Cooperative: in-flight attempts finish and their results
                // are kept, then everything still open closes as canceled.
                while let Some(joined) = join_set.join_next_with_id().await {
                    let (node_id, outcome) = unpack(joined, &mut task_nodes);
                    inflight.remove(&node_id);
                    let outcome = outcome?;
                    apply_node_state(&mut dag, &node_id, &outcome);
                }
                finish(inner, run_id, Some(&mut dag), RunStatus::Canceled).await?;
                return Ok(());
            }
            MonitorVerdict::FinishFailed(reason) => {
                let message = match reason {
                    FailedReason::Deadlock => {
                        "dependency deadlock: pending nodes can never become ready"
                    }
                    FailedReason::StepsFailed => {
                        "no runnable work remains and at least one node failed"
                    }
                };
                let report = reflect(&mut dag, run_id, FailureMode::Other, None, message);
                inner.store.append_diagnostic(&report.diagnostic).await?;
                finish(inner, run_id, Some(&mut dag), RunStatus::Failed).await?;
                return Ok(());
            }
        }

        // Dispatch ready nodes while permits allow.
        let mut dispatched = false;
        for node_id in ready {
            let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                break;
            };
            let Some(contract) = dag.contracts.get(&node_id).cloned() else {
                // Validation guarantees a contract; a miss is a broken dag.
                if let Some(node) = dag.node_mut(&node_id) {
                    node.status = NodeStatus::Failed;
                    node.ended_at = Some(Utc::now());
                    node.last_error = Some(StructuredError::new(
                        FailureCode::ExecutionError,
                        "node has no contract",
                    ));
                }
                continue;
            };

            let Some(node) = dag.node_mut(&node_id) else {
                continue;
            };
            node.status = NodeStatus::Running;
            node.started_at = Some(Utc::now());
            let snapshot = node.clone();
            let context = build_context(&dag, &snapshot);

            let job = NodeJob {
                run_id,
                request_id: run.request_id.clone(),
                task: run.task.clone(),
                node: snapshot,
                contract,
                model_override,
                context,
            };
            tracing::info!(%run_id, node_id = %node_id, attempt = job.node.attempts + 1, "dispatching node");
            let runner = inner.runner.clone();
            let handle = join_set.spawn(async move {
                let outcome = runner.execute(job).await;
                drop(permit);
                outcome
            });
            task_nodes.insert(handle.id(), node_id.clone());
            inflight.insert(node_id);
            dispatched = true;
        }
        if dispatched {
            persist(inner, &run_id, &dag).await?;
        }

        if join_set.is_empty() {
            // Nothing in flight: loop back so the monitor can settle the run.
            continue;
        }

        let Some(joined) = join_set.join_next_with_id().await else {
            continue;
        };
        let (node_id, outcome) = unpack(joined, &mut task_nodes);
        inflight.remove(&node_id);
        let outcome = outcome?;
        step_counter += outcome.attempts_executed;
        steps_since_reflection += outcome.attempts_executed;
        let failure = apply_node_state(&mut dag, &node_id, &outcome);

        if let Some(failure) = failure {
            let report = reflect(
                &mut dag,
                run_id,
                failure.mode,
                Some(&node_id),
                &failure.error.message,
            );
            inner.store.append_diagnostic(&report.diagnostic).await?;
            if report.model_override.is_some() {
                model_override = report.model_override;
            }
            if report.action == ReflectionAction::Terminated {
                persist(inner, &run_id, &dag).await?;
                halt_inflight(&mut join_set, &mut task_nodes, &mut inflight, &mut dag).await;
                finish(inner, run_id, Some(&mut dag), RunStatus::Failed).await?;
                return Ok(());
            }
        }
        persist(inner, &run_id, &dag).await?;
    }
}

/// Resolve a joined task into (node_id, outcome). A panicked task becomes
/// a synthetic failed outcome; a storage error inside the runner stays an
/// error so the driver halts instead of proceeding with unpersisted state.
fn unpack(
    joined: Result<(tokio::task::Id, Result<NodeOutcome, StoreError>), tokio::task::JoinError>,
    task_nodes: &mut HashMap<tokio::task::Id, String>,
) -> (String, Result<NodeOutcome, StoreError>) {
    match joined {
        Ok((id, Ok(outcome))) => {
            let node_id = task_nodes.remove(&id).unwrap_or_else(|| outcome.node_id.clone());
            (node_id, Ok(outcome))
        }
        Ok((id, Err(err))) => {
            let node_id = task_nodes.remove(&id).unwrap_or_default();
            (node_id, Err(err))
        }
        Err(err) => {
            let node_id = task_nodes.remove(&err.id()).unwrap_or_default();
            let outcome = NodeOutcome {
                node_id: node_id.clone(),
                attempts_executed: 1,
                result: Err(NodeFailure {
                    error: StructuredError::new(
                        FailureCode::ExecutionError,
                        format!("node task aborted: {err}"),
                    ),
                    mode: FailureMode::Other,
                }),
            };
            (node_id, Ok(outcome))
        }
    }
}

/// Write an outcome into the dag. Returns the failure when the node failed.
fn apply_node_state(dag: &mut RunDag, node_id: &str, outcome: &NodeOutcome) -> Option<NodeFailure> {
    let node = dag.node_mut(node_id)?;
    node.attempts += outcome.attempts_executed;
    node.ended_at = Some(Utc::now());
    match &outcome.result {
        Ok(output) => {
            node.status = NodeStatus::Completed;
            node.last_output = Some(output.clone());
            node.last_error = None;
            None
        }
        Err(failure) => {
            node.status = NodeStatus::Failed;
            node.last_error = Some(failure.error.clone());
            Some(failure.clone())
        }
    }
}

/// Abort in-flight attempts and put their nodes back to pending, charging
/// the interrupted attempt like a crash would.
async fn halt_inflight(
    join_set: &mut JoinSet<Result<NodeOutcome, StoreError>>,
    task_nodes: &mut HashMap<tokio::task::Id, String>,
    inflight: &mut HashSet<String>,
    dag: &mut RunDag,
) {
    join_set.abort_all();
    while join_set.join_next().await.is_some() {}
    task_nodes.clear();
    for node_id in inflight.drain() {
        if let Some(node) = dag.node_mut(&node_id)
            && node.status == NodeStatus::Running
        {
            node.status = NodeStatus::Pending;
            node.attempts += 1;
            node.started_at = None;
        }
    }
}

async fn persist<S, T, L, G>(
    inner: &Inner<S, T, L, G>,
    run_id: &Uuid,
    dag: &RunDag,
) -> Result<(), StoreError>
where
    S: RunStore,
    T: TemplateStore,
    L: CostLedger,
    G: ToolGateway,
{
    let totals = inner.ledger.aggregate(run_id).await?;
    inner
        .store
        .update_run(
            run_id,
            RunUpdate {
                dag: Some(dag.clone()),
                totals: Some(totals),
                ..RunUpdate::default()
            },
        )
        .await
}

async fn finish<S, T, L, G>(
    inner: &Inner<S, T, L, G>,
    run_id: Uuid,
    dag: Option<&mut RunDag>,
    status: RunStatus,
) -> Result<(), StoreError>
where
    S: RunStore,
    T: TemplateStore,
    L: CostLedger,
    G: ToolGateway,
{
    let dag = match dag {
        Some(dag) => {
            if status == RunStatus::Canceled {
                // A canceled run closes out everything still open; a failed
                // run leaves pending nodes untouched.
                let now = Utc::now();
                for node in &mut dag.nodes {
                    if node.status.is_open() {
                        node.status = NodeStatus::Canceled;
                        node.ended_at = Some(now);
                    }
                }
            }
            Some(dag.clone())
        }
        None => None,
    };
    let totals = inner.ledger.aggregate(&run_id).await?;
    inner
        .store
        .update_run(
            &run_id,
            RunUpdate {
                status: Some(status),
                dag,
                totals: Some(totals),
                ended_at: Some(Utc::now()),
                ..RunUpdate::default()
            },
        )
        .await?;
    tracing::info!(%run_id, status = ?status, usd = totals.usd, "run finished");
    Ok(())
}
