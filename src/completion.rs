//! Completion client.
//!
//! [`OllamaChat`] sends a [`Prompt`] to `POST {url}/api/chat` with
//! `stream: true` and reads the newline-delimited JSON reply, handing each
//! content fragment to the caller as it arrives:
//!
//! ```text
//! ← {"message": {"role": "assistant", "content": "Pul"}, "done": false}
//! ← {"message": {"role": "assistant", "content": "sars"}, "done": false}
//! ← {"message": {"role": "assistant", "content": ""}, "done": true}
//! ```
//!
//! The client timeout covers the whole streamed response.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::CompletionConfig;
use crate::conversation::Prompt;
use crate::error::{RagError, Result};
use crate::http;

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn model_name(&self) -> &str;

    /// Generate an answer for `prompt`, streaming fragments to `on_token`.
    /// Returns the full answer text.
    async fn complete(&self, prompt: &Prompt, on_token: &mut (dyn for<'t> FnMut(&'t str) + Send)) -> Result<String>;
}

pub struct OllamaChat {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: Option<f32>,
    max_retries: u32,
    timeout: Duration,
}

impl OllamaChat {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let endpoint = format!("{}/api/chat", config.url.trim_end_matches('/'));
        let client = http::build_client(&endpoint, config.timeout())?;
        Ok(Self {
            client,
            endpoint,
            model: config.model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
            timeout: config.timeout(),
        })
    }

    fn request_body(&self, prompt: &Prompt) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = prompt
            .messages
            .iter()
            .map(|m| serde_json::json!({"role": m.role.as_str(), "content": m.content}))
            .collect();
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        });
        if let Some(t) = self.temperature {
            body["options"] = serde_json::json!({ "temperature": t });
        }
        body
    }
}

#[derive(Debug, Deserialize)]
struct StreamLine {
    #[serde(default)]
    message: Option<StreamMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamMessage {
    #[serde(default)]
    content: String,
}

/// One decoded line of the chat stream.
#[derive(Debug, PartialEq)]
enum StreamEvent {
    Token(String),
    Done(String),
}

fn parse_stream_line(endpoint: &str, line: &[u8]) -> Result<StreamEvent> {
    let parsed: StreamLine =
        serde_json::from_slice(line).map_err(|e| RagError::InvalidResponse {
            endpoint: endpoint.to_string(),
            reason: format!("bad stream line: {}", e),
        })?;
    if let Some(error) = parsed.error {
        return Err(RagError::InvalidResponse {
            endpoint: endpoint.to_string(),
            reason: error,
        });
    }
    let content = parsed.message.map(|m| m.content).unwrap_or_default();
    Ok(if parsed.done {
        StreamEvent::Done(content)
    } else {
        StreamEvent::Token(content)
    })
}

#[async_trait]
impl CompletionProvider for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &Prompt, on_token: &mut (dyn for<'t> FnMut(&'t str) + Send)) -> Result<String> {
        let body = self.request_body(prompt);
        let mut response =
            http::send_with_retry(&self.endpoint, self.timeout, self.max_retries, || {
                self.client.post(&self.endpoint).json(&body)
            })
            .await?;

        let mut answer = String::new();
        let mut pending: Vec<u8> = Vec::new();
        let mut finished = false;

        'stream: loop {
            let bytes = response
                .chunk()
                .await
                .map_err(|e| RagError::from_transport(&self.endpoint, self.timeout, e))?;
            let at_eof = bytes.is_none();
            if let Some(bytes) = bytes {
                pending.extend_from_slice(&bytes);
            } else if !pending.is_empty() {
                // Final line without a trailing newline.
                pending.push(b'\n');
            }

            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                let line = line.trim_ascii();
                if line.is_empty() {
                    continue;
                }
                match parse_stream_line(&self.endpoint, line)? {
                    StreamEvent::Token(text) => {
                        if !text.is_empty() {
                            on_token(&text);
                            answer.push_str(&text);
                        }
                    }
                    StreamEvent::Done(text) => {
                        if !text.is_empty() {
                            on_token(&text);
                            answer.push_str(&text);
                        }
                        finished = true;
                        break 'stream;
                    }
                }
            }

            if at_eof {
                break;
            }
        }

        if !finished {
            return Err(RagError::InvalidResponse {
                endpoint: self.endpoint.clone(),
                reason: "stream ended before completion".to_string(),
            });
        }
        Ok(answer)
    }
}
