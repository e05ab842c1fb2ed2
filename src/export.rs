//! Product export as NDJSON.
//!
//! Dumps products matching the given filters, one JSON document per line,
//! to a file or stdout. Backs `oforge export`.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::db;
use crate::resources::MediaFilter;
use crate::store::{ProductFilter, ProductStore};

pub async fn run_export(
    config: &Config,
    vertical: Option<String>,
    taxonomy_id: Option<u32>,
    category: Option<String>,
    sellable: bool,
    output: Option<&Path>,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = ProductStore::new(pool.clone(), config.pricing.validity_days);
    let media = MediaFilter::new(&config.media.protected_patterns)?;

    let filter = ProductFilter {
        vertical,
        taxonomy_id,
        category,
        sellable,
    };
    let now = chrono::Utc::now().timestamp();
    let products = store.list(&filter, now).await?;
    pool.close().await;

    let count = products.len();
    let mut out: Box<dyn Write> = match output {
        Some(path) => Box::new(
            std::fs::File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?,
        ),
        None => Box::new(std::io::stdout().lock()),
    };

    for mut product in products {
        product.resources.retain(|url, _| !media.is_protected(url));
        serde_json::to_writer(&mut out, &product)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;

    if let Some(path) = output {
        println!("Exported {} products to {}", count, path.display());
    }
    Ok(())
}
