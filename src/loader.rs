//! Document loader.
//!
//! Walks a folder (or takes a single file), picks a text handler for each
//! file by extension, and produces one [`Document`] per readable file.
//! Files that cannot be read, are too large, or have no handler are
//! skipped and collected as [`RagError::Ingestion`] in the
//! [`LoadReport`]; only an unreadable root fails the whole load.

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::{DirEntry, WalkDir};

use crate::chunk::normalize_text;
use crate::config::DocumentsConfig;
use crate::error::{RagError, Result};
use crate::extract::{content_type_for, extract_text};
use crate::models::Document;

/// Directories never descended into.
const PRUNED_DIRS: &[&str] = &[".git", "target", "node_modules"];

/// Outcome of loading a folder: the documents read and the files skipped.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub documents: Vec<Document>,
    pub skipped: Vec<RagError>,
}

/// Load every matching file under `root`, or `root` itself if it is a file.
pub fn load_path(root: &Path, config: &DocumentsConfig) -> Result<LoadReport> {
    let meta = std::fs::metadata(root).map_err(|e| RagError::ingestion(root, e))?;

    let mut report = LoadReport::default();
    if meta.is_file() {
        match load_file(root, config.max_file_bytes) {
            Ok(doc) => report.documents.push(doc),
            Err(e) => report.skipped.push(e),
        }
        return Ok(report);
    }

    let include_set = build_globset(&config.include_globs).map_err(|e| RagError::ingestion(root, e))?;
    let exclude_set = build_globset(&config.exclude_globs).map_err(|e| RagError::ingestion(root, e))?;

    // Read the root eagerly so an unreadable directory fails the load
    // instead of surfacing as a single skipped entry.
    std::fs::read_dir(root).map_err(|e| RagError::ingestion(root, e))?;

    let walker = WalkDir::new(root)
        .follow_links(config.follow_symlinks)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_pruned_dir(e));
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                warn!(path = %path.display(), error = %e, "skipping unreadable entry");
                report.skipped.push(RagError::ingestion(path, e));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy();

        if exclude_set.is_match(rel_str.as_ref()) || !include_set.is_match(rel_str.as_ref()) {
            debug!(path = %rel_str, "filtered by globs");
            continue;
        }

        match load_file(path, config.max_file_bytes) {
            Ok(doc) => report.documents.push(doc),
            Err(e) => {
                warn!(error = %e, "skipping file");
                report.skipped.push(e);
            }
        }
    }

    report.documents.sort_by(|a, b| a.source.cmp(&b.source));
    Ok(report)
}

fn is_pruned_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && PRUNED_DIRS.iter().any(|name| entry.file_name() == *name)
}

/// Read and extract a single file.
pub fn load_file(path: &Path, max_bytes: u64) -> Result<Document> {
    let content_type =
        content_type_for(path).ok_or_else(|| RagError::ingestion(path, "no text handler for this file type"))?;

    let metadata = std::fs::metadata(path).map_err(|e| RagError::ingestion(path, e))?;
    if metadata.len() > max_bytes {
        return Err(RagError::ingestion(
            path,
            format!("file is {} bytes, limit is {}", metadata.len(), max_bytes),
        ));
    }

    let bytes = std::fs::read(path).map_err(|e| RagError::ingestion(path, e))?;
    let raw = extract_text(&bytes, content_type).map_err(|e| RagError::ingestion(path, e))?;

    let modified_at: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| DateTime::<Utc>::from(std::time::SystemTime::UNIX_EPOCH));

    let title = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok(Document {
        id: document_id(path),
        source: path.to_path_buf(),
        title,
        content_type: content_type.to_string(),
        text: normalize_text(&raw),
        modified_at,
        ingested_at: Utc::now(),
    })
}

/// Stable document id: UUIDv5 of the canonical path (or the path as given
/// when it cannot be canonicalized).
pub fn document_id(path: &Path) -> String {
    let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    Uuid::new_v5(&Uuid::NAMESPACE_URL, canonical.to_string_lossy().as_bytes()).to_string()
}

fn build_globset(patterns: &[String]) -> std::result::Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    builder.build()
}
