//! Index statistics (`astrobot stats`).
//!
//! A quick summary of what's indexed: entry and document counts, vector
//! dimensionality, embedding model, and the size of the index file.

use anyhow::Result;

use crate::config::Config;
use crate::store::{VectorStore, INDEX_FILE};

pub fn run_stats(config: &Config) -> Result<()> {
    let (store, found) = VectorStore::open_or_create(&config.store.path, config.store.metric)?;
    let stats = store.stats();

    let index_path = config.store.path.join(INDEX_FILE);
    let size = std::fs::metadata(&index_path).map(|m| m.len()).unwrap_or(0);

    println!("Astro Bot Index Stats");
    println!("=====================");
    println!();
    println!("  Index:       {}", index_path.display());
    if !found {
        println!("  (not built yet; run `astrobot ingest`)");
        println!();
        return Ok(());
    }
    println!("  Size:        {}", format_bytes(size));
    println!();
    println!("  Documents:   {}", stats.documents);
    println!("  Chunks:      {}", stats.entries);
    println!(
        "  Dimensions:  {}",
        stats.dims.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string())
    );
    println!("  Model:       {}", stats.model.as_deref().unwrap_or("-"));
    println!("  Metric:      {}", stats.metric.as_str());
    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
