use anyhow::Result;

use crate::config::Config;
use crate::db;

/// Create the product table and its filter indexes.
///
/// The product itself lives in the `document` JSON column; the other
/// columns are extracted copies of the fields queries filter and sort on.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            vertical TEXT,
            taxonomy_id INTEGER,
            offers_count INTEGER NOT NULL DEFAULT 0,
            min_price_ts INTEGER,
            created_at INTEGER NOT NULL,
            last_change INTEGER NOT NULL,
            document TEXT NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_products_vertical ON products(vertical)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_products_taxonomy ON products(taxonomy_id)")
        .execute(&pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_products_last_change ON products(last_change DESC)",
    )
    .execute(&pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_products_sellable ON products(min_price_ts, offers_count)",
    )
    .execute(&pool)
    .await?;

    pool.close().await;
    Ok(())
}
