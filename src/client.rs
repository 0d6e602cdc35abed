//! Service trait, HTTP client implementation, and error types.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::http::{add_extra_headers, build_http_client};
use crate::model::{
    ChatRequest, ChatResponse, ConversationHistory, HealthStatus, SessionList, StreamChunk,
};
use crate::options::TransportOptions;
use crate::sse::decode_chunks;

const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Errors that can occur during client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Non-2xx response; `message` is the server-supplied `detail` when one
    /// was present.
    #[error("{message}")]
    Api { status: StatusCode, message: String },

    /// An `error` field carried inside a stream chunk.
    #[error("{0}")]
    Service(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// The chunk sequence produced by a streaming completion request.
pub type ChunkStream = BoxStream<'static, Result<StreamChunk, ClientError>>;

/// Request/response surface of the Resonance service.
///
/// [`ChatSession`](crate::session::ChatSession) talks to the service only
/// through this trait, so tests can substitute a scripted implementation.
#[async_trait]
pub trait ChatService: Send + Sync {
    /// `POST /v1/chat/completions` — one blocking completion exchange.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ClientError>;

    /// `POST /v1/chat/stream` — a streamed completion. The returned stream
    /// ends after the first terminal chunk.
    async fn chat_stream(&self, request: ChatRequest) -> Result<ChunkStream, ClientError>;

    /// `GET /v1/conversations/{id}` — server-side history for a session.
    async fn conversation(&self, session_id: &str) -> Result<ConversationHistory, ClientError>;

    /// `DELETE /v1/conversations/{id}` — clear server-side history.
    async fn delete_conversation(&self, session_id: &str) -> Result<(), ClientError>;

    /// `GET /v1/conversations` — all session ids known to the server.
    async fn list_conversations(&self) -> Result<SessionList, ClientError>;

    /// `GET /health` — service liveness and model state.
    async fn health(&self) -> Result<HealthStatus, ClientError>;
}

/// HTTP implementation of [`ChatService`] over reqwest.
pub struct HttpChatClient {
    http: reqwest::Client,
    options: TransportOptions,
}

impl HttpChatClient {
    /// Create a client from transport options.
    pub fn new(options: TransportOptions) -> Result<Self, ClientError> {
        let http = build_http_client(&options)?;
        Ok(Self { http, options })
    }

    fn url(&self, path: &str) -> String {
        let base = self
            .options
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');
        format!("{base}{path}")
    }

    async fn post_json(&self, path: &str, request: &ChatRequest) -> Result<reqwest::Response, ClientError> {
        debug!(path, session_id = %request.session_id, "issuing completion request");
        let req = self
            .http
            .post(self.url(path))
            .header(CONTENT_TYPE, "application/json");
        let response = add_extra_headers(req, &self.options.extra_headers)
            .json(request)
            .send()
            .await?;
        Self::check_status(response).await
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, ClientError> {
        let req = self.http.get(self.url(path));
        let response = add_extra_headers(req, &self.options.extra_headers)
            .send()
            .await?;
        Self::check_status(response).await
    }

    /// Map a non-2xx response to [`ClientError::Api`].
    ///
    /// The surfaced message is the server's `detail` field when present,
    /// `Unknown error` when the body is not parsable, and a generic
    /// `HTTP error {status}` otherwise.
    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(parsed) => match parsed.detail {
                Some(detail) if !detail.is_empty() => detail,
                _ => format!("HTTP error {}", status.as_u16()),
            },
            Err(_) => "Unknown error".to_string(),
        };
        Err(ClientError::Api { status, message })
    }
}

#[async_trait]
impl ChatService for HttpChatClient {
    async fn chat(&self, mut request: ChatRequest) -> Result<ChatResponse, ClientError> {
        request.stream = false;
        let response = self.post_json("/v1/chat/completions", &request).await?;
        Ok(response.json().await?)
    }

    async fn chat_stream(&self, mut request: ChatRequest) -> Result<ChunkStream, ClientError> {
        request.stream = true;
        let response = self.post_json("/v1/chat/stream", &request).await?;
        Ok(decode_chunks(response.bytes_stream()).boxed())
    }

    async fn conversation(&self, session_id: &str) -> Result<ConversationHistory, ClientError> {
        let response = self.get(&format!("/v1/conversations/{session_id}")).await?;
        Ok(response.json().await?)
    }

    async fn delete_conversation(&self, session_id: &str) -> Result<(), ClientError> {
        let req = self.http.delete(self.url(&format!("/v1/conversations/{session_id}")));
        let response = add_extra_headers(req, &self.options.extra_headers)
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn list_conversations(&self) -> Result<SessionList, ClientError> {
        let response = self.get("/v1/conversations").await?;
        Ok(response.json().await?)
    }

    async fn health(&self) -> Result<HealthStatus, ClientError> {
        let response = self.get("/health").await?;
        Ok(response.json().await?)
    }
}

/// Optional body carried by non-2xx responses.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_without_duplicate_slash() {
        let client = HttpChatClient::new(TransportOptions::new("http://localhost:8000/"))
            .expect("client");
        assert_eq!(
            client.url("/v1/conversations"),
            "http://localhost:8000/v1/conversations"
        );
    }

    #[test]
    fn url_falls_back_to_default_base() {
        let client = HttpChatClient::new(TransportOptions::default()).expect("client");
        assert_eq!(client.url("/health"), "http://localhost:8000/health");
    }
}
