//! Streaming chat example against a local Resonance server.
//!
//! Run with:
//! ```bash
//! export RESONANCE_URL="http://localhost:8000"
//! cargo run --example streaming_chat
//! ```

use resonance_client::client::HttpChatClient;
use resonance_client::options::{ModelOptions, TransportOptions};
use resonance_client::session::ChatSession;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let base_url =
        std::env::var("RESONANCE_URL").unwrap_or_else(|_| "http://localhost:8000".to_string());

    let client = HttpChatClient::new(TransportOptions::new(base_url))?;
    let session = ChatSession::new(client).with_model_options(
        ModelOptions::default()
            .with_temperature(0.7)
            .with_max_tokens(256),
    );

    // Print the trailing message as it grows.
    let mut changes = session.subscribe();
    let send = session.send("Write a haiku about Rust programming.", true);
    tokio::pin!(send);

    let result = loop {
        tokio::select! {
            result = &mut send => break result,
            changed = changes.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                if let Some(conversation) = session.active_conversation() {
                    if let Some(last) = conversation.messages.last() {
                        print!("\r{}", last.content);
                        use std::io::Write;
                        std::io::stdout().flush()?;
                    }
                }
            }
        }
    };

    println!();
    if let Err(e) = result {
        eprintln!("Send failed: {}", e);
    }
    if let Some(usage) = session.last_usage() {
        println!("\n=== Usage Information ===");
        println!("Prompt tokens: {}", usage.prompt_tokens);
        println!("Completion tokens: {}", usage.completion_tokens);
        println!("Total tokens: {}", usage.total_tokens);
    }

    Ok(())
}
