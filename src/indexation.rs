//! Queued, batched product indexation.
//!
//! Two bounded queues feed the store: full snapshots and partial patches.
//! Fixed worker pools drain them in batches, flushing when a batch fills
//! or when the pause timer expires, whichever comes first. A full queue
//! pushes back on producers instead of dropping items; a failed batch is
//! logged and dropped so one poisoned product cannot wedge the pipeline.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info};

use crate::config::IndexationConfig;
use crate::models::{IndexationItem, PartialProductUpdate, Product};
use crate::store::ProductStore;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

pub struct IndexationService {
    full_tx: mpsc::Sender<Box<Product>>,
    partial_tx: mpsc::Sender<PartialProductUpdate>,
    workers: Vec<JoinHandle<u64>>,
}

#[derive(Debug, Default)]
pub struct IndexationSummary {
    /// Items written across both queues.
    pub written: u64,
}

impl IndexationService {
    /// Spawn the worker pools. Workers run until the service shuts down.
    pub fn start(store: ProductStore, cfg: &IndexationConfig) -> Self {
        let (full_tx, full_rx) = mpsc::channel::<Box<Product>>(cfg.queue_size);
        let (partial_tx, partial_rx) =
            mpsc::channel::<PartialProductUpdate>(cfg.partial_queue_size);
        let full_rx = Arc::new(Mutex::new(full_rx));
        let partial_rx = Arc::new(Mutex::new(partial_rx));
        let pause = Duration::from_millis(cfg.pause_ms);

        let mut workers = Vec::new();
        for _ in 0..cfg.workers {
            let store = store.clone();
            let rx = Arc::clone(&full_rx);
            let bulk_size = cfg.bulk_size;
            workers.push(tokio::spawn(async move {
                let mut written = 0u64;
                while let Some(batch) = next_batch(&rx, bulk_size, pause).await {
                    let size = batch.len();
                    let products: Vec<Product> = batch.into_iter().map(|b| *b).collect();
                    match store.bulk_upsert(&products).await {
                        Ok(()) => {
                            written += size as u64;
                            debug!(size, "indexed full batch");
                        }
                        Err(e) => error!(size, error = %e, "full batch dropped"),
                    }
                }
                written
            }));
        }
        for _ in 0..cfg.partial_workers {
            let store = store.clone();
            let rx = Arc::clone(&partial_rx);
            let bulk_size = cfg.partial_bulk_size;
            workers.push(tokio::spawn(async move {
                let mut written = 0u64;
                while let Some(batch) = next_batch(&rx, bulk_size, pause).await {
                    let size = batch.len();
                    match store.bulk_patch(&batch).await {
                        Ok(()) => {
                            written += size as u64;
                            debug!(size, "indexed partial batch");
                        }
                        Err(e) => error!(size, error = %e, "partial batch dropped"),
                    }
                }
                written
            }));
        }

        Self {
            full_tx,
            partial_tx,
            workers,
        }
    }

    /// Queue one item for indexation. Blocks when the target queue is
    /// full.
    pub async fn enqueue(&self, item: IndexationItem) -> Result<()> {
        match item {
            IndexationItem::Full(product) => self
                .full_tx
                .send(product)
                .await
                .map_err(|_| anyhow::anyhow!("full indexation queue closed")),
            IndexationItem::Partial(update) => self
                .partial_tx
                .send(update)
                .await
                .map_err(|_| anyhow::anyhow!("partial indexation queue closed")),
        }
    }

    /// Close the queues and wait for the workers to drain them. A worker
    /// that does not finish within the grace period is abandoned.
    pub async fn shutdown(self) -> Result<IndexationSummary> {
        drop(self.full_tx);
        drop(self.partial_tx);
        let mut summary = IndexationSummary::default();
        for worker in self.workers {
            match tokio::time::timeout(SHUTDOWN_GRACE, worker).await {
                Ok(written) => summary.written += written?,
                Err(_) => error!("indexation worker did not drain in time"),
            }
        }
        info!(written = summary.written, "indexation drained");
        Ok(summary)
    }
}

/// Pull the next batch off a shared receiver. Waits for the first item,
/// then fills up to `max` until the pause deadline. `None` once the queue
/// is closed and empty.
async fn next_batch<T>(
    rx: &Mutex<mpsc::Receiver<T>>,
    max: usize,
    pause: Duration,
) -> Option<Vec<T>> {
    let mut rx = rx.lock().await;
    let first = rx.recv().await?;
    let mut batch = vec![first];
    let deadline = Instant::now() + pause;
    while batch.len() < max {
        match timeout_at(deadline, rx.recv()).await {
            Ok(Some(item)) => batch.push(item),
            // Queue closed; flush what we have.
            Ok(None) => break,
            // Pause expired.
            Err(_) => break,
        }
    }
    Some(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, DbConfig};
    use crate::models::{AggregatedPrices, BarcodeType, GtinInfo};
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

    fn small_config() -> IndexationConfig {
        IndexationConfig {
            queue_size: 16,
            partial_queue_size: 16,
            workers: 2,
            partial_workers: 1,
            bulk_size: 4,
            partial_bulk_size: 4,
            pause_ms: 20,
        }
    }

    #[tokio::test]
    async fn test_full_items_written_on_shutdown() {
        let (_dir, store) = test_store().await;
        let service = IndexationService::start(store.clone(), &small_config());
        for id in ["4006381333931", "9780306406157", "0036000291452"] {
            service
                .enqueue(IndexationItem::Full(Box::new(product(id))))
                .await
                .unwrap();
        }
        let summary = service.shutdown().await.unwrap();
        assert_eq!(summary.written, 3);
        assert_eq!(store.count_all().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_partial_patch_applied() {
        let (_dir, store) = test_store().await;
        store.bulk_upsert(&[product("4006381333931")]).await.unwrap();

        let service = IndexationService::start(store.clone(), &small_config());
        let mut changes = BTreeMap::new();
        changes.insert(
            "price".to_string(),
            serde_json::to_value(AggregatedPrices::default()).unwrap(),
        );
        changes.insert("offers_count".to_string(), serde_json::json!(5));
        changes.insert("last_change".to_string(), serde_json::json!(NOW + 1));
        service
            .enqueue(IndexationItem::Partial(PartialProductUpdate {
                id: "4006381333931".to_string(),
                changes,
            }))
            .await
            .unwrap();
        service.shutdown().await.unwrap();

        let loaded = store.get_by_id("4006381333931").await.unwrap().unwrap();
        assert_eq!(loaded.offers_count, 5);
        assert_eq!(loaded.last_change, NOW + 1);
    }

    #[tokio::test]
    async fn test_pause_flushes_partial_batch() {
        let (_dir, store) = test_store().await;
        let service = IndexationService::start(store.clone(), &small_config());
        // One item, far below bulk_size; the pause timer must flush it.
        service
            .enqueue(IndexationItem::Full(Box::new(product("4006381333931"))))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.count_all().await.unwrap(), 1);
        service.shutdown().await.unwrap();
    }
}
