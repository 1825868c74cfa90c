//! Corpus statistics.
//!
//! A quick summary of what's indexed: document and passage counts, vector
//! coverage, the embedding model the index was built with, and a
//! per-format breakdown. Used by `mm stats` and `GET /stats`.

use anyhow::Result;

use crate::engine::Engine;

pub async fn run_stats(engine: &Engine, json: bool) -> Result<()> {
    let stats = engine.stats().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let db_path = &engine.config().db.path;
    let db_size = std::fs::metadata(db_path).map(|m| m.len()).unwrap_or(0);
    let s = &stats.store;

    println!("MarketMuse Corpus Stats");
    println!("=======================");
    println!();
    println!("  Database:    {}", db_path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Documents:   {}", s.documents);
    println!("  Passages:    {}", s.passages);
    println!(
        "  Indexed:     {} / {} ({}%)",
        s.vectors,
        s.passages,
        if s.passages > 0 {
            (s.vectors * 100) / s.passages
        } else {
            0
        }
    );
    println!("  Metric:      {}", s.metric);
    match &stats.index_meta {
        Some(meta) => println!("  Index model: {} ({} dims)", meta.model, meta.dims),
        None => println!("  Index model: (empty index)"),
    }
    println!("  Embedder:    {}", stats.embedding_model);
    println!("  Generator:   {}", stats.generation_model);
    if stats.reindex_required {
        println!();
        println!("  The configured embedder differs from the index; run `mm reindex`.");
    }

    if !s.by_format.is_empty() {
        println!();
        println!("  By format:");
        println!("  {:<10} {:>6}", "FORMAT", "DOCS");
        println!("  {}", "-".repeat(17));
        for (format, count) in &s.by_format {
            println!("  {:<10} {:>6}", format, count);
        }
    }
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
