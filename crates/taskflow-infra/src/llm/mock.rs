//! Deterministic mock gateway for local development and tests.
//!
//! Produces a fixed-shape response without network access. Token counts are
//! whitespace word counts, so cost math stays deterministic end to end.

use taskflow_core::gateway::{Generation, GenerationRequest, GatewayError, ToolGateway};
use taskflow_types::cost::TokenUsage;

/// Offline text generation backend.
#[derive(Debug)]
pub struct MockGateway;

impl MockGateway {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

fn word_count(s: &str) -> u32 {
    s.split_whitespace().count() as u32
}

impl ToolGateway for MockGateway {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GatewayError> {
        let node = request
            .metadata
            .get("node_id")
            .map(String::as_str)
            .unwrap_or("plan");
        let content = format!("Processed node={node}; prompt_len={}", request.prompt.len());

        let usage = TokenUsage {
            provider: "mock".to_string(),
            model: request.model.clone(),
            prompt_tokens: word_count(&request.prompt),
            completion_tokens: word_count(&content),
        };

        Ok(Generation { content, usage })
    }
}
