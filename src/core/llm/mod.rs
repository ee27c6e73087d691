pub mod openai;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::pin::Pin;
use tokio_stream::Stream;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// Incremental completion text. An `Err` item ends the stream.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn model(&self) -> &str;

    /// Start a streaming completion. Errors before the first token (bad
    /// credentials, unreachable endpoint) are returned here; later failures
    /// arrive as `Err` items.
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<TokenStream>;
}
