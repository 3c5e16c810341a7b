//! Ollama provider implementation
//!
//! Talks to the engine's native API: `/api/generate` for text and
//! `/api/tags` for the model list.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::stream::WireFormat;

use super::{base_url, body_stream, ensure_success, ByteStream, ChatBackend, ProviderError};

pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

impl OllamaProvider {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self::with_client(Client::new(), base_url, model)
    }

    pub fn with_client(client: Client, url: &str, model: &str) -> Self {
        Self {
            client,
            base_url: base_url(url),
            model: model.to_string(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, stream: bool) -> Result<reqwest::Response, ProviderError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream,
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await?;

        ensure_success(response).await
    }
}

#[async_trait]
impl ChatBackend for OllamaProvider {
    fn wire_format(&self) -> WireFormat {
        WireFormat::RawGenerate
    }

    async fn open_stream(&self, prompt: &str) -> Result<ByteStream, ProviderError> {
        tracing::debug!(model = %self.model, "Opening generate stream");
        let response = self.generate(prompt, true).await?;
        Ok(body_stream(response))
    }

    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        let response = self.generate(prompt, false).await?;
        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("generate: {}", e)))?;
        Ok(body.response)
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await?;
        let tags: TagsResponse = ensure_success(response).await?.json().await?;

        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}
