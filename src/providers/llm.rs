//! Streaming language-model provider for OpenAI-compatible endpoints
//!
//! Works against any `/v1/chat/completions` server that supports
//! `stream: true` (llama.cpp, ollama, vLLM, the hosted APIs). Fragments are
//! yielded as they arrive; the stream ending cleanly is the reply-complete
//! signal.

use crate::config::LlmConfig;
use crate::history::ChatMessage;
use crate::providers::{LlmProvider, TextStream};
use crate::{ParleyError, Result};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

/// OpenAI-compatible streaming chat client
pub struct OpenAiChatLlm {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiChatLlm {
    /// Create a client from config
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    /// Model currently in use
    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Pull the delta text out of one SSE data payload
fn fragment_from_chunk(data: &str) -> Option<String> {
    let value: Value = serde_json::from_str(data).ok()?;
    let content = value
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()?;
    if content.is_empty() {
        None
    } else {
        Some(content.to_string())
    }
}

#[async_trait]
impl LlmProvider for OpenAiChatLlm {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<TextStream> {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        debug!("Requesting completion from model {}", self.model);
        let response = request
            .send()
            .await
            .map_err(|e| ParleyError::Llm(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ParleyError::Llm(format!(
                "Endpoint returned {}: {}",
                status, detail
            )));
        }

        let mut bytes = response.bytes_stream();
        let stream = try_stream! {
            let mut buffer = String::new();
            'outer: while let Some(chunk) = bytes.next().await {
                let chunk =
                    chunk.map_err(|e| ParleyError::Llm(format!("Stream error: {}", e)))?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);

                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        break 'outer;
                    }
                    if let Some(fragment) = fragment_from_chunk(data) {
                        yield fragment;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    fn set_model(&mut self, model: String) {
        if model.is_empty() {
            warn!("Ignoring empty model name");
            return;
        }
        debug!("Switching model from {} to {}", self.model, model);
        self.model = model;
    }
}
