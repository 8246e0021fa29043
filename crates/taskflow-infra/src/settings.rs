//! Environment-driven settings.
//!
//! Everything the binary needs at startup, read once from the environment.
//! Invalid values fail startup with a typed error instead of falling back
//! silently.

use taskflow_types::config::{EngineSettings, ModelCatalog, ModelSpec};
use taskflow_types::run::RunConstraints;
use thiserror::Error;

use crate::sqlite::pool::default_database_url;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid value for {var}: {message}")]
    InvalidValue { var: &'static str, message: String },
}

/// Startup configuration for the Taskflow service.
#[derive(Debug, Clone)]
pub struct Settings {
    /// SQLite database URL (`TASKFLOW_DATABASE_URL`).
    pub database_url: String,
    /// HTTP bind address (`TASKFLOW_BIND_ADDR`).
    pub bind_addr: String,
    /// Gateway backend name (`LLM_PROVIDER`): mock, openai, or anthropic.
    pub provider: String,
    pub engine: EngineSettings,
}

impl Settings {
    /// Load settings from the environment, applying defaults for anything unset.
    pub fn from_env() -> Result<Self, SettingsError> {
        let database_url =
            std::env::var("TASKFLOW_DATABASE_URL").unwrap_or_else(|_| default_database_url());
        let bind_addr =
            std::env::var("TASKFLOW_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let provider = std::env::var("LLM_PROVIDER").unwrap_or_else(|_| "mock".to_string());

        let mut engine = EngineSettings::default();
        engine.models = catalog_from_env(engine.models)?;
        engine.default_constraints = constraints_from_env(engine.default_constraints)?;

        Ok(Self {
            database_url,
            bind_addr,
            provider,
            engine,
        })
    }
}

/// Apply `TASKFLOW_MODEL_*` and `TASKFLOW_PRICE_*` overrides on top of the
/// built-in catalog.
fn catalog_from_env(mut catalog: ModelCatalog) -> Result<ModelCatalog, SettingsError> {
    apply_tier(
        &mut catalog.cheap,
        "TASKFLOW_MODEL_CHEAP",
        "TASKFLOW_PRICE_CHEAP_PROMPT",
        "TASKFLOW_PRICE_CHEAP_COMPLETION",
    )?;
    apply_tier(
        &mut catalog.default,
        "TASKFLOW_MODEL_DEFAULT",
        "TASKFLOW_PRICE_DEFAULT_PROMPT",
        "TASKFLOW_PRICE_DEFAULT_COMPLETION",
    )?;
    apply_tier(
        &mut catalog.expensive,
        "TASKFLOW_MODEL_EXPENSIVE",
        "TASKFLOW_PRICE_EXPENSIVE_PROMPT",
        "TASKFLOW_PRICE_EXPENSIVE_COMPLETION",
    )?;
    Ok(catalog)
}

fn apply_tier(
    spec: &mut ModelSpec,
    name_var: &'static str,
    prompt_var: &'static str,
    completion_var: &'static str,
) -> Result<(), SettingsError> {
    if let Ok(name) = std::env::var(name_var) {
        spec.name = name;
    }
    if let Some(rate) = parse_rate(prompt_var)? {
        spec.prompt_per_1k = rate;
    }
    if let Some(rate) = parse_rate(completion_var)? {
        spec.completion_per_1k = rate;
    }
    Ok(())
}

/// Apply `TASKFLOW_RUN_*` overrides on top of the built-in run constraint
/// defaults. Individual runs can still override these per request.
fn constraints_from_env(mut constraints: RunConstraints) -> Result<RunConstraints, SettingsError> {
    if let Some(budget) = parse_rate("TASKFLOW_RUN_BUDGET_USD")? {
        constraints.budget_usd = budget;
    }
    if let Some(timeout) = parse_int("TASKFLOW_RUN_TIMEOUT_S")? {
        constraints.timeout_s = timeout;
    }
    if let Some(max_steps) = parse_int("TASKFLOW_RUN_MAX_STEPS")? {
        constraints.max_steps = max_steps;
    }
    if let Some(interval) = parse_int("TASKFLOW_RUN_REFLECTION_INTERVAL")? {
        constraints.reflection_interval_steps = interval;
    }
    if let Some(parallel) = parse_int("TASKFLOW_RUN_MAX_PARALLEL_NODES")? {
        constraints.max_parallel_nodes = parallel;
    }
    Ok(constraints)
}

fn parse_int<T>(var: &'static str) -> Result<Option<T>, SettingsError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| SettingsError::InvalidValue {
                var,
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

fn parse_rate(var: &'static str) -> Result<Option<f64>, SettingsError> {
    match std::env::var(var) {
        Ok(raw) => {
            let rate = raw.parse::<f64>().map_err(|e| SettingsError::InvalidValue {
                var,
                message: e.to_string(),
            })?;
            if !rate.is_finite() || rate < 0.0 {
                return Err(SettingsError::InvalidValue {
                    var,
                    message: format!("rate must be a non-negative number, got {raw}"),
                });
            }
            Ok(Some(rate))
        }
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test owns all TASKFLOW_RUN_* vars; env access is process-global.
    #[test]
    fn run_constraint_env_overrides() {
        unsafe {
            std::env::set_var("TASKFLOW_RUN_BUDGET_USD", "5.5");
            std::env::set_var("TASKFLOW_RUN_TIMEOUT_S", "120");
            std::env::set_var("TASKFLOW_RUN_MAX_STEPS", "9");
            std::env::set_var("TASKFLOW_RUN_REFLECTION_INTERVAL", "4");
            std::env::set_var("TASKFLOW_RUN_MAX_PARALLEL_NODES", "2");
        }
        let constraints = constraints_from_env(RunConstraints::default()).unwrap();
        assert_eq!(constraints.budget_usd, 5.5);
        assert_eq!(constraints.timeout_s, 120);
        assert_eq!(constraints.max_steps, 9);
        assert_eq!(constraints.reflection_interval_steps, 4);
        assert_eq!(constraints.max_parallel_nodes, 2);

        unsafe {
            std::env::set_var("TASKFLOW_RUN_MAX_STEPS", "not-a-number");
        }
        let err = constraints_from_env(RunConstraints::default()).unwrap_err();
        assert!(matches!(
            err,
            SettingsError::InvalidValue {
                var: "TASKFLOW_RUN_MAX_STEPS",
                ..
            }
        ));

        unsafe {
            std::env::remove_var("TASKFLOW_RUN_BUDGET_USD");
            std::env::remove_var("TASKFLOW_RUN_TIMEOUT_S");
            std::env::remove_var("TASKFLOW_RUN_MAX_STEPS");
            std::env::remove_var("TASKFLOW_RUN_REFLECTION_INTERVAL");
            std::env::remove_var("TASKFLOW_RUN_MAX_PARALLEL_NODES");
        }
        let constraints = constraints_from_env(RunConstraints::default()).unwrap();
        assert_eq!(constraints.max_steps, 30);
        assert_eq!(constraints.budget_usd, 2.0);
    }
}
