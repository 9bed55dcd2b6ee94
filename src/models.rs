//! Core data models.
//!
//! These types flow through the pipeline: the loader produces
//! [`Document`]s, the chunker splits them into [`Chunk`]s, the store keeps
//! [`IndexEntry`] records, and the conversation manager keeps
//! [`ConversationTurn`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A loaded source document.
#[derive(Debug, Clone)]
pub struct Document {
    /// Stable id derived from the source path.
    pub id: String,
    pub source: PathBuf,
    pub title: String,
    pub content_type: String,
    pub text: String,
    pub modified_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
}

impl Document {
    pub fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            document_id: self.id.clone(),
            source: self.source.clone(),
            title: self.title.clone(),
            content_type: self.content_type.clone(),
            modified_at: self.modified_at,
        }
    }
}

/// A bounded span of a document's normalized text.
///
/// `start` and `end` are character offsets (half-open) into the
/// normalized text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
    /// SHA-256 of `text`, used to skip re-embedding unchanged chunks.
    pub hash: String,
}

/// Where a stored chunk came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub document_id: String,
    pub source: PathBuf,
    pub title: String,
    pub content_type: String,
    pub modified_at: DateTime<Utc>,
}

/// A persisted record: chunk, its embedding, and source metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
    pub source: SourceMetadata,
    pub model: String,
}

/// A retrieval hit returned to the conversation layer.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub text: String,
    pub distance: f32,
    pub source: SourceMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}
