//! Fragment ingestion from NDJSON files.
//!
//! Reads one fragment per line, runs each through the aggregation chain,
//! and hands the results to the indexation queues. Used by `oforge ingest`.

use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::warn;

use crate::aggregator::{AggregationService, MergeOutcome};
use crate::config::Config;
use crate::db;
use crate::indexation::IndexationService;
use crate::models::{Fragment, IndexationItem};
use crate::store::ProductStore;

/// Counters printed at the end of a run.
#[derive(Debug, Default)]
struct IngestSummary {
    read: usize,
    merged_full: usize,
    merged_partial: usize,
    rejected: usize,
    malformed: usize,
}

pub async fn run_ingest(
    config: &Config,
    file: &Path,
    dry_run: bool,
    limit: Option<usize>,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = ProductStore::new(pool.clone(), config.pricing.validity_days);
    let aggregator = AggregationService::new(config)?;
    let indexation = if dry_run {
        None
    } else {
        Some(IndexationService::start(store.clone(), &config.indexation))
    };

    let reader = BufReader::new(
        std::fs::File::open(file)
            .with_context(|| format!("Failed to open fragment file: {}", file.display()))?,
    );

    let mut summary = IngestSummary::default();
    let now = chrono::Utc::now().timestamp();

    for (lineno, line) in reader.lines().enumerate() {
        if let Some(limit) = limit {
            if summary.read >= limit {
                break;
            }
        }
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        summary.read += 1;

        let fragment: Fragment = match serde_json::from_str(&line) {
            Ok(fragment) => fragment,
            Err(e) => {
                warn!(line = lineno + 1, error = %e, "malformed fragment skipped");
                summary.malformed += 1;
                continue;
            }
        };

        match aggregator.merge(&fragment, &store, now).await? {
            MergeOutcome::Merged(item) => {
                match &item {
                    IndexationItem::Full(_) => summary.merged_full += 1,
                    IndexationItem::Partial(_) => summary.merged_partial += 1,
                }
                if let Some(indexation) = &indexation {
                    indexation.enqueue(item).await?;
                }
            }
            MergeOutcome::Rejected(e) => {
                crate::aggregator::warn_rejection(&fragment, &e);
                summary.rejected += 1;
            }
        }
    }

    let written = match indexation {
        Some(indexation) => indexation.shutdown().await?.written,
        None => 0,
    };

    println!("Ingest complete.");
    println!("  Fragments read:     {}", summary.read);
    println!("  Full merges:        {}", summary.merged_full);
    println!("  Partial merges:     {}", summary.merged_partial);
    println!("  Rejected:           {}", summary.rejected);
    println!("  Malformed:          {}", summary.malformed);
    if dry_run {
        println!("  (dry run — nothing written)");
    } else {
        println!("  Items indexed:      {}", written);
    }

    pool.close().await;
    Ok(())
}
