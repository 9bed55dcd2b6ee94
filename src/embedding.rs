//! Embedding client.
//!
//! Defines the [`EmbeddingProvider`] trait and [`OllamaEmbedder`], which
//! calls `POST {url}/api/embed` on a local Ollama instance:
//!
//! ```text
//! → {"model": "nomic-embed-text", "input": ["text", ...]}
//! ← {"embeddings": [[0.1, ...], ...]}
//! ```
//!
//! Texts are sent in batches of `embedding.batch_size`. Transport failures
//! are classified into [`RagError::EndpointTimeout`] and
//! [`RagError::EndpointUnavailable`]; see [`crate::http`] for retries.

use async_trait::async_trait;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{RagError, Result};
use crate::http;

/// Turns texts into fixed-length vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier recorded next to every stored vector.
    fn model_name(&self) -> &str;

    /// Embed a batch of texts; one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    let mut vectors = provider.embed(&[text.to_string()]).await?;
    vectors.pop().ok_or_else(|| RagError::InvalidResponse {
        endpoint: provider.model_name().to_string(),
        reason: "empty embedding response".to_string(),
    })
}

pub struct OllamaEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    batch_size: usize,
    max_retries: u32,
    timeout: Duration,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let endpoint = format!("{}/api/embed", config.url.trim_end_matches('/'));
        let client = http::build_client(&endpoint, config.timeout())?;
        Ok(Self {
            client,
            endpoint,
            model: config.model.clone(),
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            timeout: config.timeout(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = http::send_with_retry(&self.endpoint, self.timeout, self.max_retries, || {
            self.client.post(&self.endpoint).json(&body)
        })
        .await?;

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RagError::from_transport(&self.endpoint, self.timeout, e))?;
        let vectors = parse_embed_response(&self.endpoint, &json)?;

        if vectors.len() != texts.len() {
            return Err(RagError::InvalidResponse {
                endpoint: self.endpoint.clone(),
                reason: format!("sent {} texts, got {} embeddings", texts.len(), vectors.len()),
            });
        }
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            out.extend(self.embed_batch(batch).await?);
        }
        Ok(out)
    }
}

fn parse_embed_response(endpoint: &str, json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let invalid = |reason: &str| RagError::InvalidResponse {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    };

    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| invalid("missing embeddings array"))?;

    let mut result = Vec::with_capacity(embeddings.len());
    for embedding in embeddings {
        let values = embedding
            .as_array()
            .ok_or_else(|| invalid("embedding is not an array"))?;
        let vec = values
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(|| invalid("embedding contains a non-numeric value"))?;
        if vec.is_empty() {
            return Err(invalid("embedding is empty"));
        }
        result.push(vec);
    }

    Ok(result)
}
