//! Product document store.
//!
//! Products are persisted as one JSON document per row, with the handful
//! of fields queries filter on copied into plain columns. Full snapshots
//! replace the whole document; partial patches rewrite individual fields
//! in place with `json_set` so a price tick does not rewrite megabytes of
//! attribute state.

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePool;
use sqlx::{QueryBuilder, Row};
use tracing::warn;

use crate::models::{PartialProductUpdate, Product};

const DAY_SECONDS: i64 = 86_400;

/// Patchable document fields and their extracted columns.
const PATCHABLE_FIELDS: &[&str] = &["price", "offers_count", "last_change"];

#[derive(Clone)]
pub struct ProductStore {
    pool: SqlitePool,
    /// Offers older than this many days no longer count as sellable.
    validity_days: u32,
}

/// Filters for listing and exporting products.
#[derive(Debug, Default, Clone)]
pub struct ProductFilter {
    pub vertical: Option<String>,
    pub taxonomy_id: Option<u32>,
    /// Raw category string, matched against every category any datasource
    /// reported for the product.
    pub category: Option<String>,
    pub sellable: bool,
}

#[derive(Debug)]
pub struct StoreStats {
    pub total: i64,
    pub sellable: i64,
    pub by_vertical: Vec<(String, i64)>,
    pub by_taxonomy: Vec<(u32, i64)>,
}

impl ProductStore {
    pub fn new(pool: SqlitePool, validity_days: u32) -> Self {
        Self {
            pool,
            validity_days,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// The one definition of "sellable": a recent cheapest offer and at
    /// least one live offer.
    fn push_sellable(&self, builder: &mut QueryBuilder<'_, sqlx::Sqlite>, now: i64) {
        let cutoff = now - self.validity_days as i64 * DAY_SECONDS;
        builder
            .push(" AND min_price_ts >= ")
            .push_bind(cutoff)
            .push(" AND offers_count > 0");
    }

    // ═══════════════════════════════════════════════════════════════════
    // Writes
    // ═══════════════════════════════════════════════════════════════════

    /// Replace each product's row wholesale.
    pub async fn bulk_upsert(&self, products: &[Product]) -> Result<()> {
        if products.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for product in products {
            let document = serde_json::to_string(product)
                .with_context(|| format!("Failed to serialize product {}", product.id))?;
            let min_price_ts = product.price.min_price.as_ref().map(|o| o.timestamp);
            sqlx::query(
                r#"
                INSERT INTO products
                    (id, vertical, taxonomy_id, offers_count, min_price_ts,
                     created_at, last_change, document)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    vertical = excluded.vertical,
                    taxonomy_id = excluded.taxonomy_id,
                    offers_count = excluded.offers_count,
                    min_price_ts = excluded.min_price_ts,
                    last_change = excluded.last_change,
                    document = excluded.document
                "#,
            )
            .bind(&product.id)
            .bind(&product.vertical)
            .bind(product.taxonomy_id)
            .bind(product.offers_count)
            .bind(min_price_ts)
            .bind(product.created_at)
            .bind(product.last_change)
            .bind(document)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Patch changed fields into existing documents. Unknown field names
    /// are skipped with a warning; a patch for a missing product is a
    /// no-op.
    pub async fn bulk_patch(&self, updates: &[PartialProductUpdate]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for update in updates {
            let fields: Vec<(&str, String)> = update
                .changes
                .iter()
                .filter_map(|(name, value)| {
                    let Some(field) = PATCHABLE_FIELDS.iter().find(|f| *f == name) else {
                        warn!(product = %update.id, field = %name, "unknown patch field skipped");
                        return None;
                    };
                    Some((*field, value.to_string()))
                })
                .collect();
            if fields.is_empty() {
                continue;
            }

            let mut sql = String::from("UPDATE products SET document = json_set(document");
            for (name, _) in &fields {
                sql.push_str(&format!(", '$.{}', json(?)", name));
            }
            sql.push(')');
            if update.changes.contains_key("offers_count") {
                sql.push_str(", offers_count = ?");
            }
            if update.changes.contains_key("last_change") {
                sql.push_str(", last_change = ?");
            }
            if update.changes.contains_key("price") {
                sql.push_str(", min_price_ts = ?");
            }
            sql.push_str(" WHERE id = ?");

            let mut query = sqlx::query(&sql);
            for (_, json) in &fields {
                query = query.bind(json);
            }
            if let Some(count) = update.changes.get("offers_count") {
                query = query.bind(count.as_i64());
            }
            if let Some(ts) = update.changes.get("last_change") {
                query = query.bind(ts.as_i64());
            }
            if let Some(price) = update.changes.get("price") {
                let min_price_ts = price
                    .pointer("/min_price/timestamp")
                    .and_then(|v| v.as_i64());
                query = query.bind(min_price_ts);
            }
            query = query.bind(&update.id);
            query.execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Reads
    // ═══════════════════════════════════════════════════════════════════

    pub async fn get_by_id(&self, id: &str) -> Result<Option<Product>> {
        let row = sqlx::query("SELECT document FROM products WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| parse_document(&r.get::<String, _>(0))).transpose()
    }

    pub async fn multi_get(&self, ids: &[String]) -> Result<Vec<Product>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder =
            QueryBuilder::new("SELECT document FROM products WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(") ORDER BY id");
        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|r| parse_document(&r.get::<String, _>(0)))
            .collect()
    }

    /// Stream-free listing for export. Filters combine with AND.
    pub async fn list(&self, filter: &ProductFilter, now: i64) -> Result<Vec<Product>> {
        let mut builder = QueryBuilder::new("SELECT document FROM products WHERE 1=1");
        if let Some(vertical) = &filter.vertical {
            builder.push(" AND vertical = ").push_bind(vertical);
        }
        if let Some(taxonomy_id) = filter.taxonomy_id {
            builder.push(" AND taxonomy_id = ").push_bind(taxonomy_id);
        }
        if let Some(category) = &filter.category {
            builder
                .push(
                    " AND EXISTS (SELECT 1 FROM json_each(document, '$.datasource_categories') \
                     WHERE json_each.value = ",
                )
                .push_bind(category)
                .push(")");
        }
        if filter.sellable {
            self.push_sellable(&mut builder, now);
        }
        builder.push(" ORDER BY id");
        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|r| parse_document(&r.get::<String, _>(0)))
            .collect()
    }

    pub async fn count_all(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn count_sellable(&self, now: i64) -> Result<i64> {
        let mut builder = QueryBuilder::new("SELECT COUNT(*) FROM products WHERE 1=1");
        self.push_sellable(&mut builder, now);
        let count: i64 = builder.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count)
    }

    pub async fn count_by_taxonomy(&self) -> Result<Vec<(u32, i64)>> {
        let rows = sqlx::query(
            "SELECT taxonomy_id, COUNT(*) FROM products WHERE taxonomy_id IS NOT NULL \
             GROUP BY taxonomy_id ORDER BY COUNT(*) DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get::<u32, _>(0), r.get::<i64, _>(1)))
            .collect())
    }

    pub async fn stats(&self, now: i64) -> Result<StoreStats> {
        let total = self.count_all().await?;
        let sellable = self.count_sellable(now).await?;
        let rows = sqlx::query(
            "SELECT COALESCE(vertical, '(none)'), COUNT(*) FROM products \
             GROUP BY vertical ORDER BY COUNT(*) DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        let by_vertical = rows
            .iter()
            .map(|r| (r.get::<String, _>(0), r.get::<i64, _>(1)))
            .collect();
        let by_taxonomy = self.count_by_taxonomy().await?;
        Ok(StoreStats {
            total,
            sellable,
            by_vertical,
            by_taxonomy,
        })
    }
}

fn parse_document(document: &str) -> Result<Product> {
    serde_json::from_str(document).context("Failed to parse stored product document")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, DbConfig};
    use crate::models::{BarcodeType, Condition, GtinInfo, Offer};
    use std::collections::BTreeMap;

    const NOW: i64 = 1_700_000_000;

    async fn test_store() -> (tempfile::TempDir, ProductStore) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            db: DbConfig {
                path: dir.path().join("products.db"),
            },
            pricing: Default::default(),
            indexation: Default::default(),
            media: Default::default(),
            attributes: Default::default(),
            taxonomy: Default::default(),
            verticals: Vec::new(),
        };
        crate::migrate::run_migrations(&config).await.unwrap();
        let pool = crate::db::connect(&config).await.unwrap();
        (dir, ProductStore::new(pool, 7))
    }

    fn product(id: &str) -> Product {
        Product::new(
            id.to_string(),
            GtinInfo {
                barcode_type: BarcodeType::Gtin13,
                country: None,
            },
            NOW,
        )
    }

    fn offer(price: f64, timestamp: i64) -> Offer {
        Offer {
            price,
            currency: "EUR".to_string(),
            condition: Condition::New,
            datasource: "shop1".to_string(),
            url: "https://shop1.example/p".to_string(),
            timestamp,
        }
    }

    #[tokio::test]
    async fn test_upsert_roundtrip() {
        let (_dir, store) = test_store().await;
        let mut p = product("4006381333931");
        p.vertical = Some("tv".to_string());
        store.bulk_upsert(&[p]).await.unwrap();

        let loaded = store.get_by_id("4006381333931").await.unwrap().unwrap();
        assert_eq!(loaded.vertical.as_deref(), Some("tv"));
        assert!(store.get_by_id("0000000000000").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_patch_updates_document_and_columns() {
        let (_dir, store) = test_store().await;
        let p = product("4006381333931");
        store.bulk_upsert(&[p.clone()]).await.unwrap();

        let mut price = crate::models::AggregatedPrices::default();
        price.offers.push(offer(9.5, NOW));
        price.min_price = Some(offer(9.5, NOW));
        let mut changes = BTreeMap::new();
        changes.insert("price".to_string(), serde_json::to_value(&price).unwrap());
        changes.insert("offers_count".to_string(), serde_json::json!(1));
        changes.insert("last_change".to_string(), serde_json::json!(NOW + 10));
        store
            .bulk_patch(&[PartialProductUpdate {
                id: "4006381333931".to_string(),
                changes,
            }])
            .await
            .unwrap();

        let loaded = store.get_by_id("4006381333931").await.unwrap().unwrap();
        assert_eq!(loaded.offers_count, 1);
        assert_eq!(loaded.last_change, NOW + 10);
        assert_eq!(loaded.price.min_price.as_ref().unwrap().price, 9.5);
        // The attribute state from the original document survives a patch.
        assert_eq!(loaded.created_at, NOW);
        assert_eq!(store.count_sellable(NOW + 10).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sellable_requires_recent_offer() {
        let (_dir, store) = test_store().await;
        let mut fresh = product("4006381333931");
        fresh.offers_count = 1;
        fresh.price.offers.push(offer(10.0, NOW));
        fresh.price.min_price = Some(offer(10.0, NOW));
        let mut stale = product("9780306406157");
        stale.offers_count = 1;
        stale.price.min_price = Some(offer(10.0, NOW - 30 * DAY_SECONDS));
        let unpriced = product("0036000291452");
        store.bulk_upsert(&[fresh, stale, unpriced]).await.unwrap();

        assert_eq!(store.count_all().await.unwrap(), 3);
        assert_eq!(store.count_sellable(NOW).await.unwrap(), 1);

        let sellable = store
            .list(
                &ProductFilter {
                    sellable: true,
                    ..Default::default()
                },
                NOW,
            )
            .await
            .unwrap();
        assert_eq!(sellable.len(), 1);
        assert_eq!(sellable[0].id, "4006381333931");
    }

    #[tokio::test]
    async fn test_list_filters_by_vertical() {
        let (_dir, store) = test_store().await;
        let mut tv = product("4006381333931");
        tv.vertical = Some("tv".to_string());
        let mut washer = product("9780306406157");
        washer.vertical = Some("washer".to_string());
        store.bulk_upsert(&[tv, washer]).await.unwrap();

        let tvs = store
            .list(
                &ProductFilter {
                    vertical: Some("tv".to_string()),
                    ..Default::default()
                },
                NOW,
            )
            .await
            .unwrap();
        assert_eq!(tvs.len(), 1);
        assert_eq!(tvs[0].id, "4006381333931");
    }

    #[tokio::test]
    async fn test_list_filters_by_category() {
        let (_dir, store) = test_store().await;
        let mut tv = product("4006381333931");
        tv.datasource_categories.insert("Televisions".to_string());
        store.bulk_upsert(&[tv, product("9780306406157")]).await.unwrap();

        let found = store
            .list(
                &ProductFilter {
                    category: Some("Televisions".to_string()),
                    ..Default::default()
                },
                NOW,
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "4006381333931");
    }

    #[tokio::test]
    async fn test_multi_get_skips_missing() {
        let (_dir, store) = test_store().await;
        store.bulk_upsert(&[product("4006381333931")]).await.unwrap();
        let found = store
            .multi_get(&["4006381333931".to_string(), "0000000000000".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_stats_groups_by_vertical() {
        let (_dir, store) = test_store().await;
        let mut tv = product("4006381333931");
        tv.vertical = Some("tv".to_string());
        store.bulk_upsert(&[tv, product("9780306406157")]).await.unwrap();
        let stats = store.stats(NOW).await.unwrap();
        assert_eq!(stats.total, 2);
        assert!(stats.by_vertical.iter().any(|(v, n)| v == "tv" && *n == 1));
    }
}
