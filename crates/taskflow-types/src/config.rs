//! Engine configuration types.
//!
//! Plain serde structs with defaults; the infra crate populates them from
//! the environment and the engine consumes them as-is.

use serde::{Deserialize, Serialize};

use crate::run::RunConstraints;

/// One model tier: a concrete model name plus its per-1k-token rates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    /// USD per 1000 prompt tokens.
    pub prompt_per_1k: f64,
    /// USD per 1000 completion tokens.
    pub completion_per_1k: f64,
}

/// The three model tiers the router picks between.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCatalog {
    pub cheap: ModelSpec,
    pub default: ModelSpec,
    pub expensive: ModelSpec,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self {
            cheap: ModelSpec {
                name: "mock-cheap".to_string(),
                prompt_per_1k: 0.0005,
                completion_per_1k: 0.0015,
            },
            default: ModelSpec {
                name: "mock-default".to_string(),
                prompt_per_1k: 0.0030,
                completion_per_1k: 0.0060,
            },
            expensive: ModelSpec {
                name: "mock-expensive".to_string(),
                prompt_per_1k: 0.0150,
                completion_per_1k: 0.0300,
            },
        }
    }
}

/// Retry backoff parameters, separated from contracts so tests can shrink them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Backoff for attempt N is `min(base * 2^(N-1), cap)` seconds.
    #[serde(default = "default_backoff_base_s")]
    pub backoff_base_s: u64,
    #[serde(default = "default_backoff_cap_s")]
    pub backoff_cap_s: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_base_s: default_backoff_base_s(),
            backoff_cap_s: default_backoff_cap_s(),
        }
    }
}

fn default_backoff_base_s() -> u64 {
    1
}

fn default_backoff_cap_s() -> u64 {
    8
}

impl RetryPolicy {
    /// Seconds to wait before retrying after failed attempt number `attempt`
    /// (1-based).
    pub fn backoff_seconds(&self, attempt: u32) -> u64 {
        let exp = attempt.saturating_sub(1).min(31);
        self.backoff_base_s
            .saturating_mul(1u64 << exp)
            .min(self.backoff_cap_s)
    }
}

/// Engine-wide settings handed to the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineSettings {
    /// Defaults applied to runs that do not override constraints.
    #[serde(default)]
    pub default_constraints: RunConstraints,
    #[serde(default)]
    pub models: ModelCatalog,
    #[serde(default)]
    pub retry: RetryPolicy,
}
