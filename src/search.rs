//! Retrieval inspection (`astrobot search`).
//!
//! Runs the same retrieval the chat loop uses and prints the matching
//! chunks with their distances, closest first.

use anyhow::{bail, Result};
use std::sync::Arc;

use crate::chat::check_index_model;
use crate::config::Config;
use crate::embedding::OllamaEmbedder;
use crate::models::RetrievedChunk;
use crate::retriever::Retriever;
use crate::store::VectorStore;

/// Excerpt length printed per result, in characters.
const EXCERPT_CHARS: usize = 500;

pub async fn run_search(config: &Config, query: &str, limit: Option<usize>) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let (store, found) = VectorStore::open_or_create(&config.store.path, config.store.metric)?;
    if !found {
        bail!(
            "No index at {}. Run `astrobot ingest` first.",
            config.store.path.display()
        );
    }
    check_index_model(&store, &config.embedding.model)?;

    let embedder = OllamaEmbedder::new(&config.embedding)?;
    let retriever = Retriever::new(Arc::new(store), Arc::new(embedder));
    let k = limit.unwrap_or(config.retrieval.top_k);
    let results = retriever.retrieve(query, k).await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, result) in results.iter().enumerate() {
        print_result(i, result);
    }
    Ok(())
}

fn print_result(i: usize, result: &RetrievedChunk) {
    println!(
        "{}. [{:.4}] {}",
        i + 1,
        result.distance,
        result.source.title
    );
    println!("    source: {}", result.source.source.display());
    println!(
        "    modified: {}",
        result.source.modified_at.format("%Y-%m-%d")
    );
    println!("    excerpt: \"{}\"", excerpt(&result.text, EXCERPT_CHARS));
    println!("    id: {}", result.chunk_id);
    println!();
}

/// First `max_chars` characters of `text` on one line.
fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    match flat.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &flat[..cut]),
        None => flat.to_string(),
    }
}
