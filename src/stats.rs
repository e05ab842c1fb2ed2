//! Database statistics overview.
//!
//! A quick summary of what the store holds: product counts, sellable
//! coverage, and the per-vertical breakdown. Used by `oforge stats` to
//! confirm ingests landed.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::store::ProductStore;

pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = ProductStore::new(pool.clone(), config.pricing.validity_days);

    let now = chrono::Utc::now().timestamp();
    let stats = store.stats(now).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("offerforge — Database Stats");
    println!("===========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Products:    {}", stats.total);
    println!(
        "  Sellable:    {} / {} ({}%)",
        stats.sellable,
        stats.total,
        if stats.total > 0 {
            (stats.sellable * 100) / stats.total
        } else {
            0
        }
    );

    if !stats.by_vertical.is_empty() {
        println!();
        println!("  By vertical:");
        println!("  {:<24} {:>8}", "VERTICAL", "PRODUCTS");
        println!("  {}", "-".repeat(34));
        for (vertical, count) in &stats.by_vertical {
            println!("  {:<24} {:>8}", vertical, count);
        }
    }

    if !stats.by_taxonomy.is_empty() {
        println!();
        println!("  By taxonomy:");
        println!("  {:<24} {:>8}", "TAXONOMY", "PRODUCTS");
        println!("  {}", "-".repeat(34));
        for (taxonomy_id, count) in &stats.by_taxonomy {
            println!("  {:<24} {:>8}", taxonomy_id, count);
        }
    }

    println!();
    pool.close().await;
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
