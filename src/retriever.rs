//! Query-time retrieval: embed the question, ask the store for neighbours.

use std::sync::Arc;
use tracing::debug;

use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::Result;
use crate::models::RetrievedChunk;
use crate::store::VectorStore;

#[derive(Clone)]
pub struct Retriever {
    store: Arc<VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl Retriever {
    pub fn new(store: Arc<VectorStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }

    /// Up to `k` chunks closest to `query`, closest first.
    ///
    /// An empty knowledge base or a blank query yields an empty list
    /// without contacting the embedding endpoint.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        if self.store.is_empty() || query.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let vector = embed_query(self.embedder.as_ref(), query).await?;
        let hits = self.store.query(&vector, k)?;
        debug!(k, hits = hits.len(), "retrieved context");

        Ok(hits
            .into_iter()
            .map(|hit| RetrievedChunk {
                chunk_id: hit.entry.chunk.id,
                text: hit.entry.chunk.text,
                distance: hit.distance,
                source: hit.entry.source,
            })
            .collect())
    }
}
