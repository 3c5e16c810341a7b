//! OpenAI-compatible upstream used by the relay
//!
//! The relay forwards chat requests to the engine's `/v1` API:
//! - `POST /v1/chat/completions` (streaming and non-streaming)
//! - `GET /v1/models`

use std::time::Duration;

use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{base_url, body_stream, ensure_success, ByteStream, ProviderError};

/// OpenAI-compatible chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Chat completion request
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
}

/// Chat completion response
#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
}

/// Error response from API
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// OpenAI-compatible upstream configuration
#[derive(Debug, Clone)]
pub struct OpenAICompatConfig {
    /// Engine root (the `/v1` prefix is added per request)
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for OpenAICompatConfig {
    fn default() -> Self {
        Self {
            base_url: crate::config::DEFAULT_ENGINE_URL.to_string(),
            timeout_secs: 300, // Local inference can be slow
        }
    }
}

/// OpenAI-compatible API provider
pub struct OpenAICompatProvider {
    config: OpenAICompatConfig,
    client: Client,
}

impl OpenAICompatProvider {
    /// Create a new provider with the given configuration
    pub fn new(config: OpenAICompatConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            config: OpenAICompatConfig {
                base_url: base_url(&config.base_url),
                ..config
            },
            client,
        })
    }

    /// Create provider for a local engine
    pub fn local(base_url: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new(OpenAICompatConfig {
            base_url: base_url.into(),
            ..Default::default()
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1{}", self.config.base_url, path)
    }

    async fn send_chat(
        &self,
        message: &str,
        model: &str,
        stream: bool,
    ) -> Result<Response, ProviderError> {
        let request = ChatCompletionRequest {
            model,
            messages: vec![ChatMessage::user(message)],
            stream,
        };

        let response = self
            .client
            .post(self.url("/chat/completions"))
            .json(&request)
            .send()
            .await?;

        ensure_success(response).await
    }

    /// Start a streaming completion; the body is returned unparsed.
    pub async fn chat_stream(&self, message: &str, model: &str) -> Result<ByteStream, ProviderError> {
        let response = self.send_chat(message, model, true).await?;
        Ok(body_stream(response))
    }

    /// Send a non-streaming chat completion request
    pub async fn chat(&self, message: &str, model: &str) -> Result<ChatCompletionResponse, ProviderError> {
        let response = match self.send_chat(message, model, false).await {
            Err(ProviderError::Status { status, body }) => {
                // Try to parse error response
                if let Ok(error_resp) = serde_json::from_str::<ErrorResponse>(&body) {
                    return Err(ProviderError::InvalidResponse(format!(
                        "API error: {}",
                        error_resp.error.message
                    )));
                }
                return Err(ProviderError::Status { status, body });
            }
            other => other?,
        };

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse response: {} - Body: {}", e, body))
        })
    }

    /// List available models, passed through as returned by the engine
    pub async fn list_models(&self) -> Result<Value, ProviderError> {
        let response = self.client.get(self.url("/models")).send().await?;
        Ok(ensure_success(response).await?.json().await?)
    }
}
