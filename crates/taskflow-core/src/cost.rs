//! Token cost estimation.
//!
//! Prices a `TokenUsage` against the model catalog's per-1k-token rates.
//! Unknown models fall back to the default tier so spend is never silently
//! dropped from the ledger.

use taskflow_types::config::{ModelCatalog, ModelSpec};
use taskflow_types::cost::{CostEstimate, TokenUsage};

#[derive(Debug, Clone)]
pub struct CostEstimator {
    catalog: ModelCatalog,
}

impl CostEstimator {
    pub fn new(catalog: ModelCatalog) -> Self {
        Self { catalog }
    }

    fn rates_for(&self, model: &str) -> &ModelSpec {
        [&self.catalog.cheap, &self.catalog.default, &self.catalog.expensive]
            .into_iter()
            .find(|spec| spec.name == model)
            .unwrap_or(&self.catalog.default)
    }

    pub fn estimate(&self, usage: &TokenUsage) -> CostEstimate {
        let rates = self.rates_for(&usage.model);
        let usd = f64::from(usage.prompt_tokens) / 1000.0 * rates.prompt_per_1k
            + f64::from(usage.completion_tokens) / 1000.0 * rates.completion_per_1k;
        CostEstimate {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens(),
            usd: round_usd(usd),
        }
    }
}

/// Round to 8 decimal places, the ledger's stored precision.
fn round_usd(usd: f64) -> f64 {
    (usd * 1e8).round() / 1e8
}
