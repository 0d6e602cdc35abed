//! Wire-level data models for the Resonance chat API.
//!
//! Field names follow the service schemas exactly and are case-sensitive.

use chrono::{DateTime, Utc};
use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};

/// Role of the message sender.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A web-search attribution attached to an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchResult {
    pub title: String,
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// A single message in a conversation.
///
/// `content` is mutable while a streamed reply is being accumulated into it;
/// once the stream terminates the message is never touched again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<SearchResult>>,
}

impl ChatMessage {
    /// Create a user message stamped with the current time.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Some(Utc::now()),
            sources: None,
        }
    }

    /// Create an assistant message stamped with the current time.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Some(Utc::now()),
            sources: None,
        }
    }
}

/// Request body for `POST /v1/chat/completions` and `POST /v1/chat/stream`.
///
/// The service holds accumulated history server-side, so `messages` carries
/// only the newly added message(s), never the full transcript. The service
/// rejects an empty message list, hence [`NonEmpty`].
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub messages: NonEmpty<ChatMessage>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    pub stream: bool,
}

/// Token usage statistics reported by the service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct UsageStats {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Response from `POST /v1/chat/completions`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub message: ChatMessage,
    pub usage: UsageStats,
    pub model: String,

    #[serde(default)]
    pub search_performed: bool,
}

/// One decoded event from the streaming endpoint.
///
/// A chunk is *terminal* when `done` is set or `error` carries a value;
/// nothing follows a terminal chunk on the same stream.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StreamChunk {
    #[serde(default)]
    pub content: String,

    #[serde(default)]
    pub done: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageStats>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<SearchResult>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamChunk {
    /// Whether this chunk ends the stream it arrived on.
    pub fn is_terminal(&self) -> bool {
        self.done || self.error.is_some()
    }
}

/// Response from `GET /v1/conversations/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationHistory {
    pub session_id: String,
    pub messages: Vec<ChatMessage>,
    pub total_tokens: u32,

    #[serde(default)]
    pub message_count: usize,
}

/// Response from `GET /v1/conversations`.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionList {
    pub sessions: Vec<String>,
    pub count: usize,
}

/// Response from `GET /health`.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub model_loaded: bool,
    pub search_available: bool,
    pub device: String,
    pub model_name: String,
    pub version: String,
}
