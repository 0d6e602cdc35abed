//! # resonance-client
//!
//! An async Rust client for the Resonance chat API: streamed and blocking
//! completions, incremental decoding of the newline-delimited event stream,
//! and a session that tracks independent conversation threads with a single
//! cancellable in-flight request.
//!
//! ## Features
//! - Async-first, tokio compatible
//! - Incremental event-stream decoding tolerant of arbitrary chunk
//!   boundaries and malformed events
//! - Conversation session with streamed accumulation, stale-update
//!   guarding, and cooperative cancellation
//! - Change notification via a watch-channel revision, decoupled from any
//!   rendering technology
//!
//! ## Example
//! ```no_run
//! use resonance_client::client::HttpChatClient;
//! use resonance_client::options::{ModelOptions, TransportOptions};
//! use resonance_client::session::ChatSession;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = HttpChatClient::new(TransportOptions::new("http://localhost:8000"))?;
//!     let session = ChatSession::new(client)
//!         .with_model_options(ModelOptions::default().with_temperature(0.7));
//!
//!     session.send("Hello there!", true).await?;
//!
//!     let conversation = session.active_conversation().expect("created by send");
//!     for message in &conversation.messages {
//!         println!("{:?}: {}", message.role, message.content);
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod http;
pub mod model;
pub mod options;
pub mod session;
pub mod sse;

// Re-exports for convenience
pub use client::{ChatService, ChunkStream, ClientError, HttpChatClient};
pub use model::{ChatMessage, ChatRequest, ChatResponse, Role, StreamChunk, UsageStats};
pub use options::{ModelOptions, TransportOptions};
pub use session::{ChatSession, Conversation, SessionError};
