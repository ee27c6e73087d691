use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{ChatMessage, LlmProvider, TokenStream};

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SseItem {
    Token(String),
    Done,
}

/// Splits a `text/event-stream` byte stream into completion tokens. Chunks
/// may end mid-line or mid-character, so raw bytes are buffered and only
/// complete lines are decoded.
#[derive(Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<SseItem> {
        self.buffer.extend_from_slice(chunk);
        let mut items = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(item) = parse_line(line.trim_end_matches(['\r', '\n'])) {
                items.push(item);
            }
        }
        items
    }
}

fn parse_line(line: &str) -> Option<SseItem> {
    let data = line.strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        return Some(SseItem::Done);
    }
    match serde_json::from_str::<CompletionChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|t| !t.is_empty())
            .map(SseItem::Token),
        Err(e) => {
            warn!("Skipping unparseable completion chunk: {}", e);
            None
        }
    }
}

/// Any endpoint speaking the OpenAI `chat/completions` streaming dialect.
pub struct OpenAiCompatibleProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(base_url: &str, api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn model(&self) -> &str {
        &self.model
    }

    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<TokenStream> {
        let res = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&CompletionRequest {
                model: &self.model,
                messages,
                stream: true,
            })
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            return Err(anyhow!(
                "LLM API error (HTTP {}): {}",
                status,
                res.text().await.unwrap_or_default()
            ));
        }

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<String>>(32);
        let mut body = res.bytes_stream();
        tokio::spawn(async move {
            let mut decoder = SseDecoder::default();
            while let Some(chunk) = body.next().await {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(anyhow!("LLM stream interrupted: {}", e))).await;
                        return;
                    }
                };
                for item in decoder.push(&bytes) {
                    match item {
                        SseItem::Token(text) => {
                            if tx.send(Ok(text)).await.is_err() {
                                return;
                            }
                        }
                        SseItem::Done => return,
                    }
                }
            }
        });

        Ok(Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx)))
    }
}
