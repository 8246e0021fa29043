//! In-memory stores and a scriptable gateway for engine tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use taskflow_core::gateway::{Generation, GenerationRequest, GatewayError, GatewayErrorKind, ToolGateway};
use taskflow_core::repository::{CostLedger, RunStore, RunUpdate, TemplateStore};
use taskflow_types::cost::{LedgerEntry, TokenUsage};
use taskflow_types::diagnostic::Diagnostic;
use taskflow_types::error::StoreError;
use taskflow_types::run::{Run, RunStatus, RunTotals};
use taskflow_types::workflow::WorkflowTemplate;
use tokio::sync::Notify;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryRunStore {
    runs: Mutex<HashMap<Uuid, Run>>,
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl RunStore for MemoryRunStore {
    async fn create_run(&self, run: &Run) -> Result<(), StoreError> {
        let mut runs = self.runs.lock().unwrap();
        if runs.contains_key(&run.id) {
            return Err(StoreError::Conflict(format!("run {} exists", run.id)));
        }
        runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<Run>, StoreError> {
        Ok(self.runs.lock().unwrap().get(run_id).cloned())
    }

    async fn list_runs(&self, limit: u32) -> Result<Vec<Run>, StoreError> {
        let mut runs: Vec<Run> = self.runs.lock().unwrap().values().cloned().collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        runs.truncate(limit as usize);
        Ok(runs)
    }

    async fn update_run(&self, run_id: &Uuid, update: RunUpdate) -> Result<(), StoreError> {
        let mut runs = self.runs.lock().unwrap();
        let run = runs
            .get_mut(run_id)
            .ok_or_else(|| StoreError::not_found("run", run_id.to_string()))?;
        if let Some(status) = update.status {
            run.status = status;
        }
        if let Some(dag) = update.dag {
            run.dag = Some(dag);
        }
        if let Some(totals) = update.totals {
            run.totals = totals;
        }
        if let Some(started_at) = update.started_at {
            run.started_at = Some(started_at);
        }
        if let Some(ended_at) = update.ended_at {
            run.ended_at = Some(ended_at);
        }
        if update.clear_ended_at {
            run.ended_at = None;
        }
        Ok(())
    }

    async fn set_cancel_requested(&self, run_id: &Uuid) -> Result<(), StoreError> {
        let mut runs = self.runs.lock().unwrap();
        let run = runs
            .get_mut(run_id)
            .ok_or_else(|| StoreError::not_found("run", run_id.to_string()))?;
        run.cancel_requested = true;
        Ok(())
    }

    async fn list_incomplete_runs(&self) -> Result<Vec<Run>, StoreError> {
        Ok(self
            .runs
            .lock()
            .unwrap()
            .values()
            .filter(|r| matches!(r.status, RunStatus::Created | RunStatus::Running))
            .cloned()
            .collect())
    }

    async fn append_diagnostic(&self, diagnostic: &Diagnostic) -> Result<(), StoreError> {
        self.diagnostics.lock().unwrap().push(diagnostic.clone());
        Ok(())
    }

    async fn list_diagnostics(&self, run_id: &Uuid) -> Result<Vec<Diagnostic>, StoreError> {
        Ok(self
            .diagnostics
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.run_id == *run_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryTemplateStore {
    templates: Mutex<Vec<WorkflowTemplate>>,
}

impl MemoryTemplateStore {
    pub fn with(template: WorkflowTemplate) -> Self {
        Self {
            templates: Mutex::new(vec![template]),
        }
    }
}

impl TemplateStore for MemoryTemplateStore {
    async fn upsert_template(&self, template: &WorkflowTemplate) -> Result<(), StoreError> {
        let mut templates = self.templates.lock().unwrap();
        templates.retain(|t| t.id != template.id);
        templates.push(template.clone());
        Ok(())
    }

    async fn get_template(&self, id: &str) -> Result<Option<WorkflowTemplate>, StoreError> {
        Ok(self
            .templates
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id == id)
            .cloned())
    }

    async fn get_default_template(&self) -> Result<Option<WorkflowTemplate>, StoreError> {
        Ok(self.templates.lock().unwrap().first().cloned())
    }

    async fn list_templates(&self) -> Result<Vec<WorkflowTemplate>, StoreError> {
        Ok(self.templates.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct MemoryLedger {
    entries: Mutex<Vec<LedgerEntry>>,
    fail_features: Mutex<HashSet<String>>,
}

impl MemoryLedger {
    /// Make `record` fail for entries carrying this feature tag.
    pub fn fail_feature(&self, feature: &str) {
        self.fail_features.lock().unwrap().insert(feature.to_string());
    }
}

impl CostLedger for MemoryLedger {
    async fn record(&self, entry: &LedgerEntry) -> Result<(), StoreError> {
        if self.fail_features.lock().unwrap().contains(&entry.feature) {
            return Err(StoreError::Query(format!(
                "ledger write rejected for feature '{}'",
                entry.feature
            )));
        }
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn aggregate(&self, run_id: &Uuid) -> Result<RunTotals, StoreError> {
        let entries = self.entries.lock().unwrap();
        let mut totals = RunTotals::default();
        for entry in entries.iter().filter(|e| e.run_id == *run_id) {
            totals.prompt_tokens += u64::from(entry.prompt_tokens);
            totals.completion_tokens += u64::from(entry.completion_tokens);
            totals.total_tokens += u64::from(entry.total_tokens);
            totals.usd += entry.usd;
        }
        Ok(totals)
    }

    async fn list_for_run(&self, run_id: &Uuid) -> Result<Vec<LedgerEntry>, StoreError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.run_id == *run_id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Scriptable gateway
// ---------------------------------------------------------------------------

/// Per-node behavior for `ScriptedGateway`.
#[derive(Clone)]
pub enum Script {
    /// Return plain text (wrapped by the runner into the base output shape).
    Text(String),
    /// Return a raw JSON object (taken verbatim as the output candidate).
    Json(serde_json::Value),
    /// Fail with a provider error.
    Error(String),
    /// Fail with a provider error that still reports billed token usage.
    BilledError(String),
    /// Play the entries in order, one per call; exhausted sequences fall
    /// back to the default success content.
    Sequence(Vec<Script>),
    /// Signal `started`, wait for `release`, then return text. Lets tests
    /// cancel a run with work genuinely in flight.
    Gated {
        started: Arc<Notify>,
        release: Arc<Notify>,
        text: String,
    },
}

pub struct ScriptedGateway {
    scripts: Mutex<HashMap<String, Script>>,
    planner_script: Mutex<Option<Script>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            planner_script: Mutex::new(None),
        }
    }

    pub fn script(self, node_id: &str, script: Script) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(node_id.to_string(), script);
        self
    }

    /// Script the planner call (the one request without a node id).
    pub fn planner(self, script: Script) -> Self {
        *self.planner_script.lock().unwrap() = Some(script);
        self
    }

    fn usage(model: &str, prompt: &str, content: &str) -> TokenUsage {
        TokenUsage {
            provider: "scripted".to_string(),
            model: model.to_string(),
            prompt_tokens: prompt.split_whitespace().count() as u32,
            completion_tokens: content.split_whitespace().count() as u32,
        }
    }
}

impl ToolGateway for ScriptedGateway {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GatewayError> {
        let script = match request.metadata.get("node_id") {
            Some(id) => {
                let mut scripts = self.scripts.lock().unwrap();
                match scripts.get_mut(id) {
                    Some(Script::Sequence(queue)) if !queue.is_empty() => Some(queue.remove(0)),
                    Some(Script::Sequence(_)) => None,
                    Some(other) => Some(other.clone()),
                    None => None,
                }
            }
            None => self.planner_script.lock().unwrap().clone(),
        };

        let content = match script {
            None => format!("Processed prompt_len={}", request.prompt.len()),
            Some(Script::Text(text)) => text,
            Some(Script::Json(value)) => value.to_string(),
            Some(Script::Error(message)) => {
                return Err(GatewayError::new(GatewayErrorKind::Provider, message));
            }
            Some(Script::BilledError(message)) => {
                let usage = Self::usage(&request.model, &request.prompt, "");
                return Err(
                    GatewayError::new(GatewayErrorKind::Provider, message).with_usage(usage)
                );
            }
            // Nested sequences are not supported; fall back to default content.
            Some(Script::Sequence(_)) => format!("Processed prompt_len={}", request.prompt.len()),
            Some(Script::Gated {
                started,
                release,
                text,
            }) => {
                started.notify_one();
                release.notified().await;
                text
            }
        };
        let usage = Self::usage(&request.model, &request.prompt, &content);
        Ok(Generation { content, usage })
    }
}
