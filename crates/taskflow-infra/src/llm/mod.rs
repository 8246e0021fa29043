//! LLM gateway implementations.
//!
//! Three backends behind one `ToolGateway` surface: a deterministic mock for
//! local development and tests, plus OpenAI and Anthropic HTTP clients.
//! Provider selection happens once at startup; a missing API key for the
//! selected provider is a hard startup error, never a silent mock fallback.

pub mod anthropic;
pub mod mock;
pub mod openai;

use secrecy::SecretString;
use taskflow_core::gateway::{Generation, GenerationRequest, GatewayError, ToolGateway};
use thiserror::Error;

use anthropic::AnthropicGateway;
use mock::MockGateway;
use openai::OpenAiGateway;

/// Errors constructing a provider gateway at startup.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown LLM provider '{0}' (expected mock, openai, or anthropic)")]
    UnknownProvider(String),

    #[error("provider '{provider}' requires the {env_var} environment variable")]
    MissingApiKey {
        provider: &'static str,
        env_var: &'static str,
    },

    #[error("failed to initialize provider: {0}")]
    Init(String),
}

/// The configured gateway backend, resolved once at startup.
///
/// An enum rather than a trait object because `ToolGateway::generate`
/// returns an opaque future.
#[derive(Debug)]
pub enum ProviderGateway {
    Mock(MockGateway),
    OpenAi(OpenAiGateway),
    Anthropic(AnthropicGateway),
}

impl ToolGateway for ProviderGateway {
    fn name(&self) -> &str {
        match self {
            Self::Mock(g) => g.name(),
            Self::OpenAi(g) => g.name(),
            Self::Anthropic(g) => g.name(),
        }
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GatewayError> {
        match self {
            Self::Mock(g) => g.generate(request).await,
            Self::OpenAi(g) => g.generate(request).await,
            Self::Anthropic(g) => g.generate(request).await,
        }
    }
}

/// Build the gateway named by `provider` ("mock", "openai", "anthropic").
///
/// API keys are read from `OPENAI_API_KEY` / `ANTHROPIC_API_KEY`.
pub fn create_gateway(provider: &str) -> Result<ProviderGateway, ProviderError> {
    match provider {
        "mock" => Ok(ProviderGateway::Mock(MockGateway::new())),
        "openai" => {
            let key = require_api_key("openai", "OPENAI_API_KEY")?;
            let gateway =
                OpenAiGateway::new(key).map_err(|e| ProviderError::Init(e.to_string()))?;
            Ok(ProviderGateway::OpenAi(gateway))
        }
        "anthropic" => {
            let key = require_api_key("anthropic", "ANTHROPIC_API_KEY")?;
            let gateway =
                AnthropicGateway::new(key).map_err(|e| ProviderError::Init(e.to_string()))?;
            Ok(ProviderGateway::Anthropic(gateway))
        }
        other => Err(ProviderError::UnknownProvider(other.to_string())),
    }
}

fn require_api_key(
    provider: &'static str,
    env_var: &'static str,
) -> Result<SecretString, ProviderError> {
    match std::env::var(env_var) {
        Ok(key) if !key.trim().is_empty() => Ok(SecretString::from(key)),
        _ => Err(ProviderError::MissingApiKey { provider, env_var }),
    }
}
