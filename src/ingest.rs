//! Ingestion pipeline orchestration.
//!
//! Coordinates loader → chunker → embedder → store for a folder or a
//! single file. Chunks whose text hash and embedding model match what the
//! store already holds keep their stored vectors, so re-ingesting an
//! unchanged folder makes no embedding calls. Per-file load failures are
//! collected in the report; endpoint failures stop the batch.
//!
//! A batch that stops early is persisted only into a store that already
//! has an `index.json` of its own, so the documents finished before the
//! failure are kept. A fresh store (first build, `--full` rebuild) writes
//! nothing on failure: no empty index appears, and an existing one is
//! left as it was.

use anyhow::Context;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

use crate::chunk::chunk_text;
use crate::config::{ChunkingConfig, Config, DocumentsConfig};
use crate::embedding::{EmbeddingProvider, OllamaEmbedder};
use crate::error::{RagError, Result};
use crate::loader::load_path;
use crate::models::{Document, IndexEntry};
use crate::store::VectorStore;

#[derive(Debug, Default)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
    /// Chunks embedded by the endpoint during this run.
    pub embedded: usize,
    /// Chunks whose stored embedding was re-used.
    pub reused: usize,
    /// Stale chunks dropped from re-ingested or deleted documents.
    pub removed: usize,
    /// Stored documents whose source file no longer exists.
    pub deleted: usize,
    pub skipped: Vec<RagError>,
}

impl IngestReport {
    pub fn print_summary(&self) {
        println!("ingest");
        println!("  documents: {}", self.documents);
        println!("  chunks: {}", self.chunks);
        println!("  embedded: {}", self.embedded);
        println!("  reused: {}", self.reused);
        if self.removed > 0 {
            println!("  stale chunks removed: {}", self.removed);
        }
        if self.deleted > 0 {
            println!("  deleted documents: {}", self.deleted);
        }
        if !self.skipped.is_empty() {
            println!("  skipped files: {}", self.skipped.len());
            for err in &self.skipped {
                println!("    {}", err);
            }
        }
    }
}

pub struct Ingestor<'a> {
    pub documents: &'a DocumentsConfig,
    pub chunking: &'a ChunkingConfig,
    pub store: &'a VectorStore,
    pub embedder: &'a dyn EmbeddingProvider,
}

impl Ingestor<'_> {
    /// Ingest every document under `path` (a folder or one file) and
    /// persist the store.
    pub async fn ingest_path(&self, path: &Path) -> Result<IngestReport> {
        self.ingest(path, false).await
    }

    /// Ingest the whole document folder. Stored documents whose source
    /// file has since been deleted are removed as well.
    pub async fn ingest_root(&self, root: &Path) -> Result<IngestReport> {
        self.ingest(root, true).await
    }

    async fn ingest(&self, path: &Path, prune: bool) -> Result<IngestReport> {
        let loaded = load_path(path, self.documents)?;
        info!(
            path = %path.display(),
            documents = loaded.documents.len(),
            skipped = loaded.skipped.len(),
            "loaded documents"
        );

        let mut report = IngestReport {
            skipped: loaded.skipped,
            ..IngestReport::default()
        };

        let mut outcome = Ok(());
        for doc in &loaded.documents {
            if let Err(e) = self.ingest_document(doc, &mut report).await {
                outcome = Err(e);
                break;
            }
        }

        match outcome {
            Ok(()) => {
                if prune {
                    self.remove_deleted(&loaded.documents, &mut report);
                }
                self.store.persist()?;
                Ok(report)
            }
            Err(e) => {
                if self.store.is_on_disk() && self.store.is_dirty() {
                    if let Err(persist_err) = self.store.persist() {
                        warn!(error = %persist_err, "could not persist partial ingest");
                    }
                }
                Err(e)
            }
        }
    }

    fn remove_deleted(&self, loaded: &[Document], report: &mut IngestReport) {
        let present: HashSet<&str> = loaded.iter().map(|d| d.id.as_str()).collect();
        for doc in self.store.documents() {
            if present.contains(doc.document_id.as_str()) || doc.source.is_file() {
                continue;
            }
            let removed = self.store.remove_document(&doc.document_id);
            info!(source = %doc.source.display(), chunks = removed, "removed deleted document");
            report.removed += removed;
            report.deleted += 1;
        }
    }

    async fn ingest_document(&self, doc: &Document, report: &mut IngestReport) -> Result<()> {
        let chunks = chunk_text(
            &doc.id,
            &doc.text,
            self.chunking.max_chars,
            self.chunking.overlap_chars,
        );

        let model = self.embedder.model_name();
        let existing: HashMap<String, IndexEntry> = self
            .store
            .entries_for_document(&doc.id)
            .into_iter()
            .map(|e| (e.chunk.id.clone(), e))
            .collect();

        let mut vectors: Vec<Option<Vec<f32>>> = Vec::with_capacity(chunks.len());
        let mut to_embed = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            match existing.get(&chunk.id) {
                Some(old) if old.chunk.hash == chunk.hash && old.model == model => {
                    vectors.push(Some(old.embedding.clone()));
                }
                _ => {
                    vectors.push(None);
                    to_embed.push(i);
                }
            }
        }

        if !to_embed.is_empty() {
            let texts: Vec<String> = to_embed.iter().map(|&i| chunks[i].text.clone()).collect();
            let fresh = self.embedder.embed(&texts).await?;
            if fresh.len() != texts.len() {
                return Err(RagError::InvalidResponse {
                    endpoint: model.to_string(),
                    reason: format!("sent {} texts, got {} embeddings", texts.len(), fresh.len()),
                });
            }
            for (&i, vector) in to_embed.iter().zip(fresh) {
                vectors[i] = Some(vector);
            }
        }

        let metadata = doc.metadata();
        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .filter_map(|(chunk, vector)| {
                vector.map(|embedding| IndexEntry {
                    chunk,
                    embedding,
                    source: metadata.clone(),
                    model: model.to_string(),
                })
            })
            .collect();

        let count = entries.len();
        let removed = self.store.replace_document(&doc.id, entries)?;

        info!(
            source = %doc.source.display(),
            chunks = count,
            embedded = to_embed.len(),
            "ingested document"
        );
        report.documents += 1;
        report.chunks += count;
        report.embedded += to_embed.len();
        report.reused += count - to_embed.len();
        report.removed += removed;
        Ok(())
    }
}

/// Run the `ingest` command: index `path` (or `documents.root`) into the
/// configured store. With `full`, a fresh index is built and replaces the
/// existing one only once the whole batch has succeeded.
pub async fn run_ingest(config: &Config, path: Option<&Path>, full: bool) -> anyhow::Result<()> {
    let store = if full {
        VectorStore::create(&config.store.path, config.store.metric)
    } else {
        VectorStore::open_or_create(&config.store.path, config.store.metric)
            .with_context(|| format!("Failed to open index at {}", config.store.path.display()))?
            .0
    };
    let embedder = OllamaEmbedder::new(&config.embedding)?;
    let ingestor = Ingestor {
        documents: &config.documents,
        chunking: &config.chunking,
        store: &store,
        embedder: &embedder,
    };
    let root = path.unwrap_or(config.documents.root.as_path());
    let outcome = match path {
        Some(path) => ingestor.ingest_path(path).await,
        None => ingestor.ingest_root(root).await,
    };
    let report = outcome.with_context(|| format!("Failed to ingest {}", root.display()))?;

    report.print_summary();
    println!("  index: {} ({} chunks)", config.store.path.display(), store.len());
    Ok(())
}
