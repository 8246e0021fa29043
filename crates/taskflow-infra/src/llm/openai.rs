//! OpenAI gateway backed by the Chat Completions API.
//!
//! The API key is wrapped in [`secrecy::SecretString`] and is never logged
//! or included in `Debug` output.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use taskflow_core::gateway::{
    Generation, GenerationRequest, GatewayError, GatewayErrorKind, ToolGateway,
};
use taskflow_types::cost::TokenUsage;

/// OpenAI Chat Completions gateway.
#[derive(Debug)]
pub struct OpenAiGateway {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
}

impl OpenAiGateway {
    pub fn new(api_key: SecretString) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                GatewayError::new(
                    GatewayErrorKind::Provider,
                    format!("failed to build HTTP client: {e}"),
                )
            })?;

        Ok(Self {
            client,
            api_key,
            base_url: "https://api.openai.com".to_string(),
        })
    }

    /// Override the base URL (useful for testing or proxies).
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: ChatUsage,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl ToolGateway for OpenAiGateway {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GatewayError> {
        let body = ChatRequest {
            model: request.model.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content: request.prompt.clone(),
            }],
        };

        let response = self
            .client
            .post(self.url("/v1/chat/completions"))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                GatewayError::new(
                    GatewayErrorKind::Provider,
                    format!("HTTP request failed: {e}"),
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let kind = match status.as_u16() {
                401 | 403 => GatewayErrorKind::Auth,
                429 => GatewayErrorKind::RateLimited,
                400 | 404 | 422 => GatewayErrorKind::InvalidRequest,
                _ => GatewayErrorKind::Provider,
            };
            return Err(GatewayError::new(
                kind,
                format!("HTTP {status}: {error_body}"),
            ));
        }

        let chat: ChatResponse = response.json().await.map_err(|e| {
            GatewayError::new(
                GatewayErrorKind::Provider,
                format!("failed to parse response: {e}"),
            )
        })?;

        let usage = TokenUsage {
            provider: "openai".to_string(),
            model: request.model.clone(),
            prompt_tokens: chat.usage.prompt_tokens,
            completion_tokens: chat.usage.completion_tokens,
        };

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                GatewayError::new(GatewayErrorKind::Provider, "response contained no choices")
                    .with_usage(usage.clone())
            })?;

        Ok(Generation { content, usage })
    }
}
