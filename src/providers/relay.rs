//! Client side of the relay server
//!
//! The relay re-streams chat completion chunks as `data: {...}` frames and
//! answers non-streaming requests as `{ choices: [{ text }] }`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::stream::WireFormat;

use super::{base_url, body_stream, ensure_success, ByteStream, ChatBackend, ProviderError};

pub struct RelayProvider {
    client: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct RelayRequest<'a> {
    message: &'a str,
}

#[derive(Debug, Deserialize)]
struct RelayCompletion {
    #[serde(default)]
    choices: Vec<RelayChoice>,
}

#[derive(Debug, Deserialize)]
struct RelayChoice {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    message: Option<RelayMessage>,
}

#[derive(Debug, Deserialize)]
struct RelayMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

impl RelayProvider {
    pub fn new(base_url: &str) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, url: &str) -> Self {
        Self {
            client,
            base_url: base_url(url),
        }
    }

    async fn post(&self, path: &str, message: &str) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&RelayRequest { message })
            .send()
            .await?;

        ensure_success(response).await
    }
}

#[async_trait]
impl ChatBackend for RelayProvider {
    fn wire_format(&self) -> WireFormat {
        WireFormat::DeltaEvents
    }

    async fn open_stream(&self, prompt: &str) -> Result<ByteStream, ProviderError> {
        tracing::debug!(relay = %self.base_url, "Opening relay stream");
        let response = self.post("/chat-stream", prompt).await?;
        Ok(body_stream(response))
    }

    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        let completion: RelayCompletion = self
            .post("/chat", prompt)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("chat: {}", e)))?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".to_string()))?;

        choice
            .text
            .or_else(|| choice.message.and_then(|m| m.content))
            .ok_or_else(|| ProviderError::InvalidResponse("Choice has no text".to_string()))
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .send()
            .await?;
        let list: ModelList = ensure_success(response).await?.json().await?;

        Ok(list.data.into_iter().map(|m| m.id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing;
    use crate::stream::decode_stream;
    use axum::{routing::{get, post}, Json, Router};
    use futures::StreamExt;
    use serde_json::{json, Value};

    async fn relay() -> String {
        testing::serve(
            Router::new()
                .route(
                    "/chat-stream",
                    post(|Json(body): Json<Value>| async move {
                        assert_eq!(body["message"], "hi");
                        "data: {\"choices\":[{\"delta\":{\"content\":\"Zdra\"}}]}\n\n\
                         data: {\"choices\":[{\"delta\":{\"content\":\"vo\"}}]}\n\n\
                         data: [DONE]\n\n"
                    }),
                )
                .route(
                    "/chat",
                    post(|| async { Json(json!({ "choices": [{ "text": "Pelmeni Talk" }] })) }),
                )
                .route(
                    "/models",
                    get(|| async { Json(json!({ "object": "list", "data": [{ "id": "qwen2.5" }] })) }),
                ),
        )
        .await
    }

    #[tokio::test]
    async fn test_open_stream_yields_delta_events() {
        let provider = RelayProvider::new(&relay().await);
        let body = provider.open_stream("hi").await.unwrap();

        let chunks: Vec<_> = decode_stream(body, provider.wire_format()).collect().await;
        let deltas: Vec<String> = chunks.into_iter().map(|c| c.unwrap().delta).collect();
        assert_eq!(deltas, vec!["Zdra", "vo"]);
    }

    #[tokio::test]
    async fn test_complete_reads_choice_text() {
        let provider = RelayProvider::new(&relay().await);
        assert_eq!(provider.complete("name it").await.unwrap(), "Pelmeni Talk");
    }

    #[tokio::test]
    async fn test_list_models() {
        let provider = RelayProvider::new(&relay().await);
        assert_eq!(provider.list_models().await.unwrap(), vec!["qwen2.5"]);
    }

    #[test]
    fn test_completion_falls_back_to_message_content() {
        let completion: RelayCompletion = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"Blini Chat"}}]}"#,
        )
        .unwrap();
        let choice = completion.choices.into_iter().next().unwrap();
        assert!(choice.text.is_none());
        assert_eq!(choice.message.unwrap().content.as_deref(), Some("Blini Chat"));
    }
}
