//! Relay API routes
//!
//! Forwards chat requests to the engine's OpenAI-compatible API:
//! - `POST /chat-stream` re-streams the completion chunks unchanged; a
//!   failed upstream read ends the body with an `error` event
//! - `POST /chat` answers with `{ choices: [{ text }] }`
//! - `GET /models` passes the engine's model list through

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::providers::{OpenAICompatProvider, ProviderError};
use crate::stream::ERROR_EVENT;

/// State shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub engine: Arc<OpenAICompatProvider>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, ProviderError> {
        let engine = OpenAICompatProvider::local(config.ollama_url.clone())?;
        Ok(Self {
            config,
            engine: Arc::new(engine),
        })
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct RelayRequest {
    pub message: String,
    #[serde(default)]
    pub model: Option<String>,
}

impl RelayRequest {
    fn model<'a>(&'a self, config: &'a Config) -> &'a str {
        self.model
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(&config.default_model)
    }
}

#[derive(Debug, Serialize)]
pub struct RelayCompletion {
    pub choices: Vec<RelayChoice>,
}

#[derive(Debug, Serialize)]
pub struct RelayChoice {
    pub text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Upstream(#[from] ProviderError),
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match self {
            RelayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::Upstream(_) => StatusCode::BAD_GATEWAY,
        };
        tracing::warn!(status = %status, error = %self, "Relay request failed");
        (status, format!("Error: {}", self)).into_response()
    }
}

fn require_message(request: &RelayRequest) -> Result<(), RelayError> {
    if request.message.trim().is_empty() {
        return Err(RelayError::BadRequest("message is required".into()));
    }
    Ok(())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Closes whatever frame the upstream left open, then reports the failure
/// as an `error` event.
fn error_event(e: &impl std::fmt::Display) -> Bytes {
    let message = e.to_string().replace(['\r', '\n'], " ");
    Bytes::from(format!("\n\nevent: {}\ndata: {}\n\n", ERROR_EVENT, message))
}

async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<RelayRequest>,
) -> Result<Response, RelayError> {
    require_message(&request)?;
    let model = request.model(&state.config);
    tracing::debug!(model = %model, "Relaying streaming chat");

    let mut upstream = state.engine.chat_stream(&request.message, model).await?;

    let body = async_stream::stream! {
        while let Some(read) = upstream.next().await {
            match read {
                Ok(bytes) => yield Ok::<Bytes, Infallible>(bytes),
                Err(e) => {
                    tracing::warn!(error = %e, "Upstream stream failed");
                    yield Ok(error_event(&e));
                    break;
                }
            }
        }
    };

    Ok((
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(body),
    )
        .into_response())
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<RelayRequest>,
) -> Result<Json<RelayCompletion>, RelayError> {
    require_message(&request)?;
    let completion = state
        .engine
        .chat(&request.message, request.model(&state.config))
        .await?;

    let choices = completion
        .choices
        .into_iter()
        .map(|c| RelayChoice {
            text: c.message.content.unwrap_or_default(),
        })
        .collect();

    Ok(Json(RelayCompletion { choices }))
}

async fn models(State(state): State<AppState>) -> Result<Json<Value>, RelayError> {
    Ok(Json(state.engine.list_models().await?))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/chat-stream", post(chat_stream))
        .route("/chat", post(chat))
        .route("/models", get(models))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing;
    use crate::stream::{decode_stream, StreamError, WireFormat};
    use axum::http::Request;
    use serde_json::json;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn completions(Json(body): Json<Value>) -> Response {
        let content = format!("{}|{}", body["model"].as_str().unwrap(), body["messages"][0]["content"].as_str().unwrap());
        if body["stream"] == json!(true) {
            let frames = format!(
                "data: {}\n\ndata: [DONE]\n\n",
                json!({ "object": "chat.completion.chunk", "choices": [{ "index": 0, "delta": { "content": content } }] })
            );
            ([(header::CONTENT_TYPE, "text/event-stream")], frames).into_response()
        } else {
            Json(json!({
                "object": "chat.completion",
                "choices": [{ "index": 0, "message": { "role": "assistant", "content": content }, "finish_reason": "stop" }]
            }))
            .into_response()
        }
    }

    async fn engine_models() -> Json<Value> {
        Json(json!({ "object": "list", "data": [{ "id": "llama3.2", "object": "model" }] }))
    }

    async fn relay(engine_url: String) -> Router {
        let config = Config {
            ollama_url: engine_url,
            default_model: "llama3.2".into(),
            ..Default::default()
        };
        router().with_state(AppState::new(config).unwrap())
    }

    async fn engine() -> String {
        testing::serve(
            Router::new()
                .route("/v1/chat/completions", post(completions))
                .route("/v1/models", get(engine_models)),
        )
        .await
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = relay(engine().await).await;
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("\"status\":\"ok\""));
    }

    #[tokio::test]
    async fn test_chat_stream_relays_frames() {
        let app = relay(engine().await).await;
        let response = app
            .oneshot(post_json("/chat-stream", json!({ "message": "privet" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.starts_with("data: {"));
        assert!(body.contains("llama3.2|privet"));
        assert!(body.ends_with("data: [DONE]\n\n"));
    }

    #[tokio::test]
    async fn test_chat_stream_uses_requested_model() {
        let app = relay(engine().await).await;
        let response = app
            .oneshot(post_json("/chat-stream", json!({ "message": "hi", "model": "qwen2.5" })))
            .await
            .unwrap();
        assert!(body_text(response).await.contains("qwen2.5|hi"));
    }

    #[tokio::test]
    async fn test_chat_adapts_to_choice_text() {
        let app = relay(engine().await).await;
        let response = app
            .oneshot(post_json("/chat", json!({ "message": "name this" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body, json!({ "choices": [{ "text": "llama3.2|name this" }] }));
    }

    #[tokio::test]
    async fn test_models_passthrough() {
        let app = relay(engine().await).await;
        let response = app
            .oneshot(Request::builder().uri("/models").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["data"][0]["id"], "llama3.2");
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let app = relay(engine().await).await;
        let response = app
            .oneshot(post_json("/chat-stream", json!({ "message": "  " })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unreachable_engine_is_bad_gateway() {
        // Bind and drop to get a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let app = relay(format!("http://{}", addr)).await;
        let response = app
            .oneshot(post_json("/chat", json!({ "message": "hi" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(body_text(response).await.starts_with("Error: "));
    }

    #[tokio::test]
    async fn test_upstream_failure_mid_stream_ends_body_with_error() {
        let engine_url = testing::serve(Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                let frames = async_stream::stream! {
                    yield Ok::<_, std::io::Error>(Bytes::from_static(
                        b"data: {\"choices\":[{\"delta\":{\"content\":\"Da\"}}]}\n\n",
                    ));
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    yield Err(std::io::Error::new(std::io::ErrorKind::Other, "engine crashed"));
                };
                Body::from_stream(frames)
            }),
        ))
        .await;

        let app = relay(engine_url).await;
        let response = app
            .oneshot(post_json("/chat-stream", json!({ "message": "hi" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.starts_with("data: {"));
        assert!(body.contains("\n\nevent: error\ndata: Error reading stream"));

        // The client sees the partial reply, then a failed stream
        let reads = futures::stream::iter(vec![Ok::<_, StreamError>(Bytes::from(body))]);
        let decoded: Vec<_> = decode_stream(reads, WireFormat::DeltaEvents).collect().await;
        assert_eq!(decoded[0].as_ref().unwrap().transcript, "Da");
        assert!(matches!(decoded.last(), Some(Err(StreamError::Interrupted(_)))));
    }
}
