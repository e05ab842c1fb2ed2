//! Product retrieval by barcode.
//!
//! Fetches stored products and prints them for `oforge get` and
//! `oforge get-many`. Protected media URLs are filtered out before
//! anything is shown.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::db;
use crate::models::Product;
use crate::resources::MediaFilter;
use crate::store::ProductStore;

/// The stored document with protected resources removed. The stored row
/// keeps them; only the output is redacted.
fn redact(mut product: Product, media: &MediaFilter) -> Product {
    product.resources.retain(|url, _| !media.is_protected(url));
    product
}

pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = ProductStore::new(pool.clone(), config.pricing.validity_days);
    let media = MediaFilter::new(&config.media.protected_patterns)?;

    let product = store.get_by_id(id).await?;
    pool.close().await;

    let Some(product) = product else {
        bail!("product not found: {}", id);
    };

    println!("Product {}", product.id);
    println!("  Type:         {:?}", product.gtin_info.barcode_type);
    if let Some(country) = &product.gtin_info.country {
        println!("  Country:      {}", country);
    }
    if let Some(brand) = product.brand() {
        println!("  Brand:        {}", brand);
    }
    if let Some(model) = product.model() {
        println!("  Model:        {}", model);
    }
    if let Some(vertical) = &product.vertical {
        println!("  Vertical:     {}", vertical);
    }
    if let Some(taxonomy_id) = product.taxonomy_id {
        println!("  Taxonomy:     {}", taxonomy_id);
    }
    println!("  Offers:       {}", product.offers_count);
    if let Some(min) = &product.price.min_price {
        println!(
            "  Best price:   {} {} ({})",
            min.price, min.currency, min.datasource
        );
    }
    println!("  Last change:  {}", format_ts_iso(product.last_change));
    println!();
    println!("{}", serde_json::to_string_pretty(&redact(product, &media))?);
    Ok(())
}

/// Print several products as NDJSON, one document per line. Unknown ids
/// are skipped.
pub async fn run_get_many(config: &Config, ids: &[String]) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = ProductStore::new(pool.clone(), config.pricing.validity_days);
    let media = MediaFilter::new(&config.media.protected_patterns)?;

    let products = store.multi_get(ids).await?;
    pool.close().await;

    for product in products {
        println!("{}", serde_json::to_string(&redact(product, &media))?);
    }
    Ok(())
}

pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
