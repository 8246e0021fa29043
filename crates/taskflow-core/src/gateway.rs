//! Tool gateway trait and capability enforcement.
//!
//! The gateway is the only path from the engine to external tools. Today
//! the sole capability is text generation; the contract allow-list is
//! checked before every invocation so a node can never reach a capability
//! its contract does not grant.
//!
//! Uses native async fn in traits (RPITIT, Rust 2024 edition).
//! Implementations live in taskflow-infra (mock, OpenAI, Anthropic).

use std::collections::HashMap;

use taskflow_types::cost::TokenUsage;
use taskflow_types::workflow::{NodeContract, ToolCapability};
use thiserror::Error;

/// A text generation request routed through the gateway.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Concrete model name resolved by the router.
    pub model: String,
    /// Caller context attached to provider-side logs.
    pub metadata: HashMap<String, String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            metadata: HashMap::new(),
        }
    }
}

/// A completed generation with its reported usage.
#[derive(Debug, Clone)]
pub struct Generation {
    pub content: String,
    pub usage: TokenUsage,
}

/// What went wrong inside a gateway call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorKind {
    /// Missing or rejected credentials.
    Auth,
    /// Provider asked us to slow down.
    RateLimited,
    /// The request itself was malformed.
    InvalidRequest,
    /// Provider-side or transport failure.
    Provider,
}

#[derive(Debug, Error)]
#[error("gateway error ({kind:?}): {message}")]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    pub message: String,
    /// Usage reported before the failure, if any. Still ledgered.
    pub usage: Option<TokenUsage>,
}

impl GatewayError {
    pub fn new(kind: GatewayErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Trait for tool gateway backends.
pub trait ToolGateway: Send + Sync {
    /// Human-readable gateway name (e.g. "mock", "anthropic").
    fn name(&self) -> &str;

    /// Execute a text generation call.
    fn generate(
        &self,
        request: &GenerationRequest,
    ) -> impl std::future::Future<Output = Result<Generation, GatewayError>> + Send;
}

/// Check a contract's allow-list for a required capability.
///
/// A miss is terminal for the node: the condition is static, retrying
/// cannot change it.
pub fn ensure_allowed(
    contract: &NodeContract,
    capability: ToolCapability,
) -> Result<(), ToolNotAllowed> {
    if contract.allowed_tools.contains(&capability) {
        Ok(())
    } else {
        Err(ToolNotAllowed { capability })
    }
}

#[derive(Debug, Error)]
#[error("capability {capability:?} is not in the node's allow-list")]
pub struct ToolNotAllowed {
    pub capability: ToolCapability,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_contract_allows_generate() {
        let contract = NodeContract::default();
        assert!(ensure_allowed(&contract, ToolCapability::Generate).is_ok());
    }

    #[test]
    fn empty_allow_list_blocks_generate() {
        let contract = NodeContract {
            allowed_tools: vec![],
            ..NodeContract::default()
        };
        let err = ensure_allowed(&contract, ToolCapability::Generate).unwrap_err();
        assert_eq!(err.capability, ToolCapability::Generate);
    }
}
