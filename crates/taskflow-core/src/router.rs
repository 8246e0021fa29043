//! Model tier routing.
//!
//! Each engine workload has a default tier: planning runs on the cheap
//! tier, step execution on the default tier, and reflection/synthesis on
//! the expensive tier. A node contract's `model_preference` (or a
//! run-scoped reflection override) wins over the workload default.

use taskflow_types::config::{ModelCatalog, ModelSpec};
use taskflow_types::workflow::ModelPreference;

/// What kind of call is being routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workload {
    Planner,
    StepExecution,
    Reflection,
    Synthesis,
}

#[derive(Debug, Clone)]
pub struct ModelRouter {
    catalog: ModelCatalog,
}

impl ModelRouter {
    pub fn new(catalog: ModelCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn tier(&self, preference: ModelPreference) -> &ModelSpec {
        match preference {
            ModelPreference::Cheap => &self.catalog.cheap,
            ModelPreference::Default => &self.catalog.default,
            ModelPreference::Expensive => &self.catalog.expensive,
        }
    }

    /// Model for a workload with no per-step preference.
    pub fn for_workload(&self, workload: Workload) -> &ModelSpec {
        match workload {
            Workload::Planner => &self.catalog.cheap,
            Workload::StepExecution => &self.catalog.default,
            Workload::Reflection | Workload::Synthesis => &self.catalog.expensive,
        }
    }

    /// Model for a step: the override (from reflection) wins, then the
    /// contract preference, then the workload default.
    pub fn for_step(
        &self,
        preference: ModelPreference,
        override_preference: Option<ModelPreference>,
    ) -> &ModelSpec {
        match override_preference {
            Some(p) => self.tier(p),
            None if preference == ModelPreference::Default => {
                self.for_workload(Workload::StepExecution)
            }
            None => self.tier(preference),
        }
    }
}
