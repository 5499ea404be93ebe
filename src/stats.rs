//! Database statistics: what is stored and how well it is connected.
//!
//! Used by `hrag stats` to confirm that loads and reconciliation did what
//! was expected before running queries.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);
    let stats = store.stats().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Hybrid RAG — Database Stats");
    println!("===========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Passages:    {}", stats.passages);
    println!(
        "  Embedded:    {} / {} ({}%)",
        stats.vectors,
        stats.passages,
        percent(stats.vectors, stats.passages)
    );
    println!("  Triples:     {}", stats.triples);
    println!("  Entities:    {}", stats.entities);
    println!();

    store.pool().close().await;
    Ok(())
}

fn percent(part: i64, total: i64) -> i64 {
    if total > 0 {
        (part * 100) / total
    } else {
        0
    }
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
