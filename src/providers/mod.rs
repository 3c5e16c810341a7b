//! Backend integrations
//!
//! The client reaches the model in one of two ways, fixed at construction by
//! [`EndpointMode`]: straight to the engine (`ollama`) or through the relay
//! (`relay`). The relay itself talks to the engine's OpenAI-compatible API
//! (`openai_compat`).

pub mod ollama;
pub mod openai_compat;
pub mod relay;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use reqwest::{Client, Response};
use thiserror::Error;

use crate::config::{ClientConfig, EndpointMode};
use crate::stream::{StreamError, WireFormat};

pub use ollama::OllamaProvider;
pub use openai_compat::OpenAICompatProvider;
pub use relay::RelayProvider;

/// A response body as a sequence of raw reads
pub type ByteStream = BoxStream<'static, Result<Bytes, StreamError>>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// What the transport needs from a backend
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Framing of bodies returned by [`ChatBackend::open_stream`]
    fn wire_format(&self) -> WireFormat;

    /// Start a streaming generation and hand back the raw body.
    async fn open_stream(&self, prompt: &str) -> Result<ByteStream, ProviderError>;

    /// Non-streaming generation; returns the full response text.
    async fn complete(&self, prompt: &str) -> Result<String, ProviderError>;

    /// Names of the models the backend can serve
    async fn list_models(&self) -> Result<Vec<String>, ProviderError>;
}

pub enum Provider {
    Ollama(OllamaProvider),
    Relay(RelayProvider),
}

impl Provider {
    pub fn from_config(config: &ClientConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.endpoint.timeout_secs))
            .build()?;

        match config.endpoint.mode {
            EndpointMode::Local => {
                if config.endpoint.engine_url.trim().is_empty() {
                    return Err(ProviderError::NotConfigured("engine_url".into()));
                }
                Ok(Provider::Ollama(OllamaProvider::with_client(
                    client,
                    &config.endpoint.engine_url,
                    &config.model.name,
                )))
            }
            EndpointMode::Relay => {
                if config.endpoint.relay_url.trim().is_empty() {
                    return Err(ProviderError::NotConfigured("relay_url".into()));
                }
                Ok(Provider::Relay(RelayProvider::with_client(
                    client,
                    &config.endpoint.relay_url,
                )))
            }
        }
    }
}

#[async_trait]
impl ChatBackend for Provider {
    fn wire_format(&self) -> WireFormat {
        match self {
            Provider::Ollama(p) => p.wire_format(),
            Provider::Relay(p) => p.wire_format(),
        }
    }

    async fn open_stream(&self, prompt: &str) -> Result<ByteStream, ProviderError> {
        match self {
            Provider::Ollama(p) => p.open_stream(prompt).await,
            Provider::Relay(p) => p.open_stream(prompt).await,
        }
    }

    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        match self {
            Provider::Ollama(p) => p.complete(prompt).await,
            Provider::Relay(p) => p.complete(prompt).await,
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        match self {
            Provider::Ollama(p) => p.list_models().await,
            Provider::Relay(p) => p.list_models().await,
        }
    }
}

/// Turn a non-2xx response into [`ProviderError::Status`].
pub(crate) async fn ensure_success(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Status { status, body })
}

pub(crate) fn body_stream(response: Response) -> ByteStream {
    use futures::{StreamExt, TryStreamExt};

    response.bytes_stream().map_err(StreamError::from).boxed()
}

pub(crate) fn base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-process mock engine for HTTP-level tests

    use axum::Router;
    use std::net::SocketAddr;

    /// Serve `router` on an ephemeral port and return its base URL.
    pub async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }
}
