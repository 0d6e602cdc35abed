//! Conversation threads and the request lifecycle around them.
//!
//! A [`ChatSession`] owns every conversation in the process, issues at most
//! one completion request at a time, folds streamed partial content into the
//! trailing assistant message of the conversation that issued the request,
//! and exposes cooperative cancellation via [`ChatSession::stop`].
//!
//! State lives behind a read/write lock and is read through cloned
//! snapshots, so a display layer may observe a partially accumulated
//! trailing message at any time. Every mutation bumps a revision published
//! on a watch channel; subscribe to it to re-render on change without
//! coupling to any particular UI.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use futures::future::{AbortHandle, Abortable};
use futures::StreamExt;
use nonempty::NonEmpty;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::client::{ChatService, ClientError};
use crate::model::{ChatMessage, ChatRequest, Role, UsageStats};
use crate::options::ModelOptions;

/// Maximum length, in characters, of a derived conversation title.
pub const TITLE_MAX_CHARS: usize = 30;

const UNTITLED: &str = "New chat";

/// One independent, ordered message log.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    fn new(id: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: UNTITLED.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Errors surfaced by session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// A request is already in flight; concurrent sends are rejected, not
    /// queued.
    #[error("a request is already in flight")]
    Busy,

    #[error(transparent)]
    Client(#[from] ClientError),
}

#[derive(Default)]
struct SessionState {
    /// Most recent first.
    conversations: Vec<Conversation>,
    active_id: Option<String>,
    busy: bool,
    /// Handle to the cancellable in-flight request. Only ever read or
    /// written together with `busy`, under the same write lock. Installing
    /// a new handle invalidates the previous one.
    abort: Option<AbortHandle>,
    last_error: Option<String>,
    last_usage: Option<UsageStats>,
}

impl SessionState {
    fn conversation_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == id)
    }

    fn contains(&self, id: &str) -> bool {
        self.conversations.iter().any(|c| c.id == id)
    }
}

/// The set of conversation threads plus the single in-flight request.
pub struct ChatSession<C> {
    service: C,
    model: ModelOptions,
    state: RwLock<SessionState>,
    revision: watch::Sender<u64>,
}

impl<C: ChatService> ChatSession<C> {
    /// Create a session over the given service with default sampling options.
    pub fn new(service: C) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            service,
            model: ModelOptions::default(),
            state: RwLock::new(SessionState::default()),
            revision,
        }
    }

    /// Replace the sampling options sent with every request.
    pub fn with_model_options(mut self, model: ModelOptions) -> Self {
        self.model = model;
        self
    }

    /// Subscribe to state changes. The receiver yields a monotonically
    /// increasing revision; any change to any conversation bumps it.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Snapshot of all conversations, most recent first.
    pub fn conversations(&self) -> Vec<Conversation> {
        self.state_read().conversations.clone()
    }

    /// Snapshot of one conversation.
    pub fn conversation(&self, id: &str) -> Option<Conversation> {
        self.state_read()
            .conversations
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }

    /// Id of the currently active conversation, if any.
    pub fn active_id(&self) -> Option<String> {
        self.state_read().active_id.clone()
    }

    /// Snapshot of the active conversation. While a stream is in flight this
    /// may show a partially accumulated trailing message.
    pub fn active_conversation(&self) -> Option<Conversation> {
        let state = self.state_read();
        let id = state.active_id.as_deref()?;
        state.conversations.iter().find(|c| c.id == id).cloned()
    }

    /// Whether a request is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.state_read().busy
    }

    /// The error recorded by the most recent failed `send`, if any.
    pub fn last_error(&self) -> Option<String> {
        self.state_read().last_error.clone()
    }

    /// Usage statistics from the most recent completed reply, if reported.
    pub fn last_usage(&self) -> Option<UsageStats> {
        self.state_read().last_usage
    }

    /// Create a new empty conversation, make it the most recent entry and
    /// the active one, and return its id.
    pub fn new_conversation(&self) -> String {
        let conversation = Conversation::new(generate_id());
        let id = conversation.id.clone();
        {
            let mut state = self.state_write();
            state.conversations.insert(0, conversation);
            state.active_id = Some(id.clone());
        }
        self.touch();
        id
    }

    /// Make `id` the active conversation. An unknown id is a silent no-op;
    /// picking from stale display state must not corrupt the session.
    pub fn select_conversation(&self, id: &str) {
        let mut state = self.state_write();
        if state.contains(id) {
            state.active_id = Some(id.to_string());
            drop(state);
            self.touch();
        } else {
            debug!(id, "select of unknown conversation ignored");
        }
    }

    /// Remove a conversation.
    ///
    /// Server-side history cleanup is best-effort: the local copy is
    /// authoritative for what the user sees, so a failed remote delete is
    /// logged and swallowed. If the deleted conversation was active, the
    /// next most recent one becomes active.
    pub async fn delete_conversation(&self, id: &str) {
        if let Err(err) = self.service.delete_conversation(id).await {
            warn!(id, %err, "remote history cleanup failed; deleting locally anyway");
        }

        {
            let mut state = self.state_write();
            state.conversations.retain(|c| c.id != id);
            if state.active_id.as_deref() == Some(id) {
                state.active_id = state.conversations.first().map(|c| c.id.clone());
            }
        }
        self.touch();
    }

    /// Cancel the in-flight request, if any, and clear the busy flag.
    /// Idempotent: with nothing in flight this is a no-op.
    pub fn stop(&self) {
        {
            let mut state = self.state_write();
            if let Some(handle) = state.abort.take() {
                debug!("aborting in-flight request");
                handle.abort();
            }
            state.busy = false;
        }
        self.touch();
    }

    /// Send a user message on the active conversation (creating one if none
    /// is active) and apply the reply to it.
    ///
    /// With `streaming` set, partial content is folded into the trailing
    /// assistant message as chunks arrive; otherwise a single exchange
    /// appends the returned message verbatim. Failures are surfaced both as
    /// the returned error and as an `Error: {reason}` assistant message in
    /// the transcript. A cancelled send keeps whatever partial content had
    /// already accumulated.
    pub async fn send(&self, text: &str, streaming: bool) -> Result<(), SessionError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        let (handle, registration) = AbortHandle::new_pair();
        let user = ChatMessage::user(text);
        let conversation_id = {
            let mut state = self.state_write();
            if state.busy {
                return Err(SessionError::Busy);
            }
            state.busy = true;
            state.abort = Some(handle);
            state.last_error = None;

            let id = match state.active_id.clone() {
                Some(id) if state.contains(&id) => id,
                _ => {
                    let conversation = Conversation::new(generate_id());
                    let id = conversation.id.clone();
                    state.conversations.insert(0, conversation);
                    state.active_id = Some(id.clone());
                    id
                }
            };

            // The user message lands before any network activity.
            if let Some(conversation) = state.conversation_mut(&id) {
                if !conversation.messages.iter().any(|m| m.role == Role::User) {
                    conversation.title = derive_title(text);
                }
                conversation.messages.push(user.clone());
                conversation.updated_at = Utc::now();
            }
            id
        };
        self.touch();

        let request = ChatRequest {
            session_id: conversation_id.clone(),
            messages: NonEmpty::new(user),
            temperature: self.model.temperature,
            max_tokens: self.model.max_tokens,
            top_p: self.model.top_p,
            stream: streaming,
        };

        // The whole reply runs under the abort registration installed above,
        // request issuance included, so stop() is observable at every
        // suspension point from here on.
        let outcome = if streaming {
            Abortable::new(self.stream_reply(&conversation_id, request), registration).await
        } else {
            Abortable::new(self.blocking_reply(&conversation_id, request), registration).await
        };
        let result = match outcome {
            Ok(result) => result,
            Err(_aborted) => {
                debug!(conversation_id = %conversation_id, "send cancelled");
                Ok(())
            }
        };

        // Unconditional finalizer: busy and the abort handle drop together
        // in one critical section, so a later send's handle can never be
        // taken here.
        {
            let mut state = self.state_write();
            state.abort = None;
            state.busy = false;
            if let Err(err) = &result {
                state.last_error = Some(err.to_string());
            }
        }
        self.touch();

        result.map_err(SessionError::from)
    }

    async fn stream_reply(
        &self,
        conversation_id: &str,
        request: ChatRequest,
    ) -> Result<(), ClientError> {
        // Placeholder slot that will receive incremental updates, installed
        // before the first byte arrives.
        {
            let mut state = self.state_write();
            if let Some(conversation) = state.conversation_mut(conversation_id) {
                conversation.messages.push(ChatMessage::assistant(String::new()));
            }
        }
        self.touch();

        let mut chunks = match self.service.chat_stream(request).await {
            Ok(chunks) => chunks,
            Err(err) => {
                self.apply_failure(conversation_id, &err.to_string());
                return Err(err);
            }
        };

        // Running total; the single source of truth for the trailing
        // message, overwritten wholesale on every chunk. An abort lands
        // between chunk applications, which leaves `total` applied as-is:
        // partial answers are preserved, not rolled back.
        let mut total = String::new();

        while let Some(next) = chunks.next().await {
            let chunk = match next {
                Ok(chunk) => chunk,
                Err(err) => {
                    self.apply_failure(conversation_id, &err.to_string());
                    return Err(err);
                }
            };

            if let Some(reason) = chunk.error {
                self.apply_failure(conversation_id, &reason);
                return Err(ClientError::Service(reason));
            }

            total.push_str(&chunk.content);
            {
                let mut state = self.state_write();
                if let Some(usage) = chunk.usage {
                    state.last_usage = Some(usage);
                }
                // Stale-update guard: the conversation takes updates only
                // while it is still the active one.
                if state.active_id.as_deref() == Some(conversation_id) {
                    if let Some(conversation) = state.conversation_mut(conversation_id) {
                        if let Some(last) = conversation.messages.last_mut() {
                            if last.role == Role::Assistant {
                                last.content = total.clone();
                                // Sources are last-non-null-wins: a later
                                // chunk omitting them never erases them.
                                if let Some(sources) =
                                    chunk.sources.filter(|s| !s.is_empty())
                                {
                                    last.sources = Some(sources);
                                }
                            }
                        }
                        conversation.updated_at = Utc::now();
                    }
                }
            }
            self.touch();

            if chunk.done {
                break;
            }
        }

        Ok(())
    }

    async fn blocking_reply(
        &self,
        conversation_id: &str,
        request: ChatRequest,
    ) -> Result<(), ClientError> {
        match self.service.chat(request).await {
            Ok(response) => {
                {
                    let mut state = self.state_write();
                    state.last_usage = Some(response.usage);
                    if state.active_id.as_deref() == Some(conversation_id) {
                        if let Some(conversation) = state.conversation_mut(conversation_id) {
                            conversation.messages.push(response.message);
                            conversation.updated_at = Utc::now();
                        }
                    }
                }
                self.touch();
                Ok(())
            }
            Err(err) => {
                self.apply_failure(conversation_id, &err.to_string());
                Err(err)
            }
        }
    }

    /// Surface a failure as part of the durable transcript rather than an
    /// ephemeral signal. An empty streaming placeholder is reused as the
    /// error slot; otherwise a fresh assistant message is appended.
    fn apply_failure(&self, conversation_id: &str, reason: &str) {
        let mut state = self.state_write();
        if state.active_id.as_deref() != Some(conversation_id) {
            return;
        }
        if let Some(conversation) = state.conversation_mut(conversation_id) {
            let text = format!("Error: {reason}");
            match conversation.messages.last_mut() {
                Some(last) if last.role == Role::Assistant && last.content.is_empty() => {
                    last.content = text;
                }
                _ => conversation.messages.push(ChatMessage::assistant(text)),
            }
            conversation.updated_at = Utc::now();
        }
        drop(state);
        self.touch();
    }

    fn touch(&self) {
        self.revision.send_modify(|r| *r = r.wrapping_add(1));
    }

    fn state_read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn state_write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Client-generated session id: time-based plus a random suffix. The service
/// accepts any string as a new or existing session key.
fn generate_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("chat-{}-{}", Utc::now().timestamp_millis(), &suffix[..8])
}

/// Derive a display title from the first user message.
fn derive_title(text: &str) -> String {
    let mut title: String = text.chars().take(TITLE_MAX_CHARS).collect();
    if text.chars().count() > TITLE_MAX_CHARS {
        title.push_str("...");
    }
    title
}
