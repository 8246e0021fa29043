//! Anthropic gateway backed by the Messages API.
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

/// Anthropic Messages API gateway.
#[derive(Debug)]
pub struct AnthropicGateway {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
}

impl AnthropicGateway {
    /// The Anthropic API version header value.
    const API_VERSION: &'static str = "2023-06-01";

    const MAX_TOKENS: u32 = 4096;

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
            base_url: "https://api.anthropic.com".to_string(),
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
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: MessagesUsage,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct MessagesUsage {
    input_tokens: u32,
    output_tokens: u32,
}

impl ToolGateway for AnthropicGateway {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GatewayError> {
        let body = MessagesRequest {
            model: request.model.clone(),
            max_tokens: Self::MAX_TOKENS,
            messages: vec![Message {
                role: "user",
                content: request.prompt.clone(),
            }],
        };

        let response = self
            .client
            .post(self.url("/v1/messages"))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", Self::API_VERSION)
            .header("content-type", "application/json")
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

        let messages: MessagesResponse = response.json().await.map_err(|e| {
            GatewayError::new(
                GatewayErrorKind::Provider,
                format!("failed to parse response: {e}"),
            )
        })?;

        let content = messages
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("");

        Ok(Generation {
            content,
            usage: TokenUsage {
                provider: "anthropic".to_string(),
                model: request.model.clone(),
                prompt_tokens: messages.usage.input_tokens,
                completion_tokens: messages.usage.output_tokens,
            },
        })
    }
}
