//! Sliding-window text chunker.
//!
//! Splits a document's normalized text into [`Chunk`]s of at most
//! `max_chars` characters, each overlapping the previous one by
//! `overlap_chars`. Windows start at `0, step, 2·step, …` where
//! `step = max_chars - overlap_chars`; the last window always ends at the
//! end of the text, so consecutive chunks cover the whole text with no gap.
//!
//! Offsets and lengths are counted in Unicode scalar values, never bytes,
//! so a window never splits a multi-byte character.
//!
//! Chunk ids are UUIDv5 values derived from the document id and chunk
//! index, so re-chunking an unchanged document yields the same ids.
//!
//! # Example
//!
//! ```rust
//! use astrobot::chunk::chunk_text;
//!
//! let text = "a".repeat(1000);
//! let chunks = chunk_text("doc-1", &text, 300, 50);
//! let spans: Vec<_> = chunks.iter().map(|c| (c.start, c.end)).collect();
//! assert_eq!(spans, vec![(0, 300), (250, 550), (500, 800), (750, 1000)]);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Normalize raw extracted text before chunking.
///
/// Line endings become `\n`; byte-order marks and NUL characters are
/// dropped.
pub fn normalize_text(raw: &str) -> String {
    raw.replace("\r\n", "\n")
        .replace('\r', "\n")
        .chars()
        .filter(|c| *c != '\u{feff}' && *c != '\0')
        .collect()
}

/// Split `text` into overlapping windows.
///
/// `text` is expected to be normalized already (see [`normalize_text`]).
/// Whitespace-only text produces no chunks.
///
/// # Panics
///
/// Panics if `overlap_chars >= max_chars`; configuration validation
/// rejects such settings before they reach the chunker.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    max_chars: usize,
    overlap_chars: usize,
) -> Vec<Chunk> {
    assert!(
        overlap_chars < max_chars,
        "overlap_chars must be smaller than max_chars"
    );

    if text.trim().is_empty() {
        return Vec::new();
    }

    // Byte offset of every char, plus the end of the string.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let len = boundaries.len() - 1;
    let step = max_chars - overlap_chars;

    let mut chunks = Vec::with_capacity(len / step + 1);
    let mut start = 0;
    loop {
        let end = (start + max_chars).min(len);
        let piece = &text[boundaries[start]..boundaries[end]];
        chunks.push(make_chunk(document_id, chunks.len(), start, end, piece));
        if end == len {
            break;
        }
        start += step;
    }

    chunks
}

/// Deterministic chunk id for a document/index pair.
pub fn chunk_id(document_id: &str, index: usize) -> String {
    let name = format!("{}#{}", document_id, index);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

pub fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn make_chunk(document_id: &str, index: usize, start: usize, end: usize, text: &str) -> Chunk {
    Chunk {
        id: chunk_id(document_id, index),
        document_id: document_id.to_string(),
        chunk_index: index,
        start,
        end,
        text: text.to_string(),
        hash: text_hash(text),
    }
}
