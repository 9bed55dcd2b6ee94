//! Persisted vector store.
//!
//! Holds [`IndexEntry`] records in insertion order behind a
//! `std::sync::RwLock`: mutations (`upsert`, `replace_document`,
//! `remove_document`, `persist`) take the write lock, lookups (`query`,
//! `get`, `stats`) take the read lock. Query is brute-force over all
//! entries with the [`DistanceMetric`] fixed at construction.
//!
//! # On-disk format
//!
//! A single JSON document, `index.json`, inside the index directory:
//!
//! ```text
//! { "version": 1, "metric": "cosine", "dims": 768, "entries": [ ... ] }
//! ```
//!
//! [`VectorStore::persist`] writes `index.json.tmp`, flushes and fsyncs it,
//! then renames it over `index.json`, so the live file is always either the
//! previous or the new snapshot. [`VectorStore::load`] validates the file
//! structurally and reports [`RagError::StoreCorruption`] instead of
//! repairing anything.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use crate::error::{RagError, Result};
use crate::models::{IndexEntry, SourceMetadata};

pub const INDEX_FILE: &str = "index.json";
const FORMAT_VERSION: u32 = 1;

/// Distance used to rank entries. Smaller is closer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// `1 - cosine_similarity`, in `[0, 2]`.
    #[default]
    Cosine,
    Euclidean,
}

impl DistanceMetric {
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Cosine => 1.0 - cosine_similarity(a, b),
            DistanceMetric::Euclidean => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
        }
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-magnitude vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// A query hit.
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub entry: IndexEntry,
    pub distance: f32,
}

#[derive(Debug, Clone)]
pub struct StoreStats {
    pub entries: usize,
    pub documents: usize,
    pub dims: Option<usize>,
    pub model: Option<String>,
    pub metric: DistanceMetric,
}

#[derive(Serialize)]
struct IndexFileRef<'a> {
    version: u32,
    metric: DistanceMetric,
    dims: Option<usize>,
    entries: &'a [IndexEntry],
}

#[derive(Deserialize)]
struct IndexFile {
    version: u32,
    metric: DistanceMetric,
    dims: Option<usize>,
    entries: Vec<IndexEntry>,
}

#[derive(Debug, Default)]
struct StoreState {
    /// Insertion order; replaced entries keep their slot.
    entries: Vec<IndexEntry>,
    positions: HashMap<String, usize>,
    dims: Option<usize>,
    dirty: bool,
    /// Whether `index.json` holds a snapshot of this store, i.e. it was
    /// loaded from disk or has been persisted at least once.
    on_disk: bool,
}

impl StoreState {
    fn reindex(&mut self) {
        self.positions = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.chunk.id.clone(), i))
            .collect();
    }

    /// Check every vector against the store's dimensionality (or fix it
    /// from the first vector when the store has none yet).
    fn check_dims(&self, entries: &[IndexEntry]) -> Result<Option<usize>> {
        let mut dims = self.dims;
        for entry in entries {
            let actual = entry.embedding.len();
            match dims {
                Some(expected) if expected != actual => {
                    return Err(RagError::DimensionMismatch { expected, actual });
                }
                None if actual == 0 => {
                    return Err(RagError::DimensionMismatch {
                        expected: 1,
                        actual: 0,
                    });
                }
                None => dims = Some(actual),
                _ => {}
            }
        }
        Ok(dims)
    }

    fn insert_all(&mut self, entries: Vec<IndexEntry>) -> usize {
        let mut added = 0;
        for entry in entries {
            match self.positions.get(&entry.chunk.id) {
                Some(&pos) => self.entries[pos] = entry,
                None => {
                    self.positions
                        .insert(entry.chunk.id.clone(), self.entries.len());
                    self.entries.push(entry);
                    added += 1;
                }
            }
        }
        self.dirty = true;
        added
    }
}

pub struct VectorStore {
    dir: Option<PathBuf>,
    metric: DistanceMetric,
    state: RwLock<StoreState>,
}

impl VectorStore {
    /// An empty store with no backing directory; `persist` is a no-op.
    pub fn in_memory(metric: DistanceMetric) -> Self {
        Self {
            dir: None,
            metric,
            state: RwLock::new(StoreState::default()),
        }
    }

    /// An empty store that persists into `dir`. Nothing is written until
    /// [`persist`](Self::persist).
    pub fn create(dir: impl Into<PathBuf>, metric: DistanceMetric) -> Self {
        Self {
            dir: Some(dir.into()),
            metric,
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Whether `dir` holds a persisted index.
    pub fn exists(dir: &Path) -> bool {
        dir.join(INDEX_FILE).is_file()
    }

    /// Load and validate the index persisted in `dir`.
    pub fn load(dir: impl Into<PathBuf>, metric: DistanceMetric) -> Result<Self> {
        let dir = dir.into();
        let path = dir.join(INDEX_FILE);
        let file = File::open(&path)?;
        let parsed: IndexFile = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            RagError::StoreCorruption(format!("{} is not a valid index: {}", path.display(), e))
        })?;

        let state = validate(parsed, metric)?;
        info!(
            path = %path.display(),
            entries = state.entries.len(),
            dims = ?state.dims,
            "loaded vector store"
        );

        Ok(Self {
            dir: Some(dir),
            metric,
            state: RwLock::new(state),
        })
    }

    /// Load the index in `dir` if present, otherwise start empty.
    /// The flag reports whether an index was found.
    pub fn open_or_create(dir: impl Into<PathBuf>, metric: DistanceMetric) -> Result<(Self, bool)> {
        let dir = dir.into();
        if Self::exists(&dir) {
            Ok((Self::load(dir, metric)?, true))
        } else {
            Ok((Self::create(dir, metric), false))
        }
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    pub fn dims(&self) -> Option<usize> {
        self.read().dims
    }

    /// Whether there are changes not yet persisted.
    pub fn is_dirty(&self) -> bool {
        self.read().dirty
    }

    /// Whether this store was loaded from, or has already written, its
    /// `index.json`. A fresh store that has never been persisted is not.
    pub fn is_on_disk(&self) -> bool {
        self.read().on_disk
    }

    /// Add entries, replacing any entry with the same chunk id in place.
    /// Returns the number of new entries. All-or-nothing: a dimension
    /// mismatch anywhere leaves the store untouched.
    pub fn upsert(&self, entries: Vec<IndexEntry>) -> Result<usize> {
        let mut state = self.write();
        state.dims = state.check_dims(&entries)?;
        Ok(state.insert_all(entries))
    }

    /// Upsert `entries` for `document_id` and drop that document's entries
    /// that are not among them. Returns the number of stale entries removed.
    pub fn replace_document(&self, document_id: &str, entries: Vec<IndexEntry>) -> Result<usize> {
        let mut state = self.write();
        state.dims = state.check_dims(&entries)?;

        let keep: HashSet<&str> = entries.iter().map(|e| e.chunk.id.as_str()).collect();
        let before = state.entries.len();
        state
            .entries
            .retain(|e| e.chunk.document_id != document_id || keep.contains(e.chunk.id.as_str()));
        let removed = before - state.entries.len();
        if removed > 0 {
            state.reindex();
        }

        state.insert_all(entries);
        Ok(removed)
    }

    pub fn remove_document(&self, document_id: &str) -> usize {
        let mut state = self.write();
        let before = state.entries.len();
        state.entries.retain(|e| e.chunk.document_id != document_id);
        let removed = before - state.entries.len();
        if removed > 0 {
            state.reindex();
            state.dirty = true;
        }
        removed
    }

    pub fn get(&self, chunk_id: &str) -> Option<IndexEntry> {
        let state = self.read();
        state
            .positions
            .get(chunk_id)
            .map(|&pos| state.entries[pos].clone())
    }

    /// Source metadata of every stored document, in insertion order.
    pub fn documents(&self) -> Vec<SourceMetadata> {
        let state = self.read();
        let mut seen = HashSet::new();
        state
            .entries
            .iter()
            .filter(|e| seen.insert(e.chunk.document_id.as_str()))
            .map(|e| e.source.clone())
            .collect()
    }

    pub fn entries_for_document(&self, document_id: &str) -> Vec<IndexEntry> {
        self.read()
            .entries
            .iter()
            .filter(|e| e.chunk.document_id == document_id)
            .cloned()
            .collect()
    }

    /// The `k` entries closest to `vector`, closest first. Equal distances
    /// keep insertion order.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredEntry>> {
        let state = self.read();
        if state.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if let Some(expected) = state.dims {
            if expected != vector.len() {
                return Err(RagError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }

        let mut scored: Vec<(f32, usize)> = state
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (self.metric.distance(vector, &e.embedding), i))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(distance, i)| ScoredEntry {
                entry: state.entries[i].clone(),
                distance,
            })
            .collect())
    }

    pub fn stats(&self) -> StoreStats {
        let state = self.read();
        let documents: HashSet<&str> = state
            .entries
            .iter()
            .map(|e| e.chunk.document_id.as_str())
            .collect();
        StoreStats {
            entries: state.entries.len(),
            documents: documents.len(),
            dims: state.dims,
            model: state.entries.first().map(|e| e.model.clone()),
            metric: self.metric,
        }
    }

    /// Write the current snapshot to disk atomically.
    pub fn persist(&self) -> Result<()> {
        let Some(dir) = self.dir.as_deref() else {
            return Ok(());
        };
        let mut state = self.write();

        std::fs::create_dir_all(dir)?;
        let live = dir.join(INDEX_FILE);
        let tmp = dir.join(format!("{}.tmp", INDEX_FILE));

        let snapshot = IndexFileRef {
            version: FORMAT_VERSION,
            metric: self.metric,
            dims: state.dims,
            entries: &state.entries,
        };
        if let Err(e) = write_snapshot(&tmp, &snapshot) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }
        std::fs::rename(&tmp, &live)?;

        state.dirty = false;
        state.on_disk = true;
        debug!(path = %live.display(), entries = state.entries.len(), "persisted vector store");
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn write_snapshot(path: &Path, snapshot: &IndexFileRef<'_>) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, snapshot)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

fn validate(file: IndexFile, metric: DistanceMetric) -> Result<StoreState> {
    if file.version != FORMAT_VERSION {
        return Err(RagError::StoreCorruption(format!(
            "unsupported index format version {} (expected {})",
            file.version, FORMAT_VERSION
        )));
    }
    if file.metric != metric {
        return Err(RagError::StoreCorruption(format!(
            "index was built with the {} metric but {} is configured",
            file.metric.as_str(),
            metric.as_str()
        )));
    }

    match file.dims {
        Some(0) => {
            return Err(RagError::StoreCorruption(
                "header declares zero-length embeddings".to_string(),
            ))
        }
        None if !file.entries.is_empty() => {
            return Err(RagError::StoreCorruption(
                "entries present but header has no dimensionality".to_string(),
            ))
        }
        _ => {}
    }

    let mut seen = HashSet::new();
    for (i, entry) in file.entries.iter().enumerate() {
        if let Some(dims) = file.dims {
            if entry.embedding.len() != dims {
                return Err(RagError::StoreCorruption(format!(
                    "entry {} has a {}-dimensional embedding, header says {}",
                    i,
                    entry.embedding.len(),
                    dims
                )));
            }
        }
        if entry.embedding.iter().any(|v| !v.is_finite()) {
            return Err(RagError::StoreCorruption(format!(
                "entry {} has a non-finite embedding value",
                i
            )));
        }
        if !seen.insert(entry.chunk.id.as_str()) {
            return Err(RagError::StoreCorruption(format!(
                "duplicate chunk id {}",
                entry.chunk.id
            )));
        }
        let span = entry.chunk.end.checked_sub(entry.chunk.start);
        if span != Some(entry.chunk.text.chars().count()) {
            return Err(RagError::StoreCorruption(format!(
                "entry {} has offsets [{}, {}) that do not match its text",
                i, entry.chunk.start, entry.chunk.end
            )));
        }
    }

    let mut state = StoreState {
        entries: file.entries,
        positions: HashMap::new(),
        dims: file.dims,
        dirty: false,
        on_disk: true,
    };
    state.reindex();
    Ok(state)
}
