//! Fragment aggregation.
//!
//! The aggregator resolves a fragment's identity, loads or creates the
//! matching product, and runs the merge chain over it: attributes, prices,
//! resources, classification. Merges for the same product are serialized
//! through sharded keyed locks so two fragments naming the same barcode
//! never interleave.

use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use anyhow::Result;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::attributes::{merge_fragment_attributes, AttributeIndexer};
use crate::barcode;
use crate::config::Config;
use crate::models::{
    Fragment, GtinInfo, IndexationItem, PartialProductUpdate, Product,
};
use crate::prices::{consolidate, merge_fragment_price};
use crate::resources::merge_fragment_resources;
use crate::store::ProductStore;
use crate::taxonomy::{classify_product, TaxonomyService, VerticalMatcher};

/// Why a fragment never became a product.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("fragment carries no GTIN")]
    MissingGtin,
    #[error(transparent)]
    Barcode(#[from] barcode::BarcodeError),
}

/// What one merge produced.
#[derive(Debug)]
pub enum MergeOutcome {
    /// The fragment was folded in; the item goes to the indexation queues.
    Merged(IndexationItem),
    /// The fragment could not be tied to a product and was skipped.
    Rejected(IdentityError),
}

/// Validate the fragment's barcode into a canonical id plus family info.
pub fn resolve_identity(fragment: &Fragment) -> Result<(String, GtinInfo), IdentityError> {
    let raw = fragment.gtin().ok_or(IdentityError::MissingGtin)?;
    let (id, barcode_type) = barcode::resolve(raw)?;
    let country = barcode::country(&id, barcode_type).map(str::to_string);
    Ok((
        id,
        GtinInfo {
            barcode_type,
            country,
        },
    ))
}

// ═══════════════════════════════════════════════════════════════════════
// Keyed locks
// ═══════════════════════════════════════════════════════════════════════

/// Fixed pool of mutexes addressed by key hash. Two distinct products may
/// share a shard; the same product always maps to the same shard.
pub struct KeyedLocks {
    shards: Vec<Mutex<()>>,
}

impl KeyedLocks {
    pub fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    pub async fn lock(&self, key: &str) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let shard = (hasher.finish() as usize) % self.shards.len();
        self.shards[shard].lock().await
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Aggregation service
// ═══════════════════════════════════════════════════════════════════════

pub struct AggregationService {
    indexer: AttributeIndexer,
    matcher: VerticalMatcher,
    taxonomy: TaxonomyService,
    pricing: crate::config::PricingConfig,
    locks: KeyedLocks,
    /// Products merged during this run. Indexation writes are queued, so a
    /// later fragment for the same barcode must read the merged state from
    /// here rather than the store.
    buffer: std::sync::Mutex<std::collections::HashMap<String, Product>>,
}

/// Which parts of the product one fragment touched.
#[derive(Debug, Default)]
struct AppliedChanges {
    attributes: bool,
    resources: bool,
    classification: bool,
    price: bool,
}

impl AppliedChanges {
    fn any(&self) -> bool {
        self.attributes || self.resources || self.classification || self.price
    }

    /// Price-only merges can be shipped as a document patch instead of a
    /// full snapshot.
    fn price_only(&self) -> bool {
        self.price && !self.attributes && !self.resources && !self.classification
    }
}

impl AggregationService {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            indexer: AttributeIndexer::new(&config.attributes),
            matcher: VerticalMatcher::new(&config.verticals),
            taxonomy: TaxonomyService::from_config(&config.taxonomy)?,
            pricing: config.pricing.clone(),
            locks: KeyedLocks::new(64),
            buffer: std::sync::Mutex::new(std::collections::HashMap::new()),
        })
    }

    /// Merge one fragment. Holds the product's keyed lock across the
    /// read-modify-write so concurrent fragments for the same barcode
    /// serialize.
    pub async fn merge(
        &self,
        fragment: &Fragment,
        store: &ProductStore,
        now: i64,
    ) -> Result<MergeOutcome> {
        let (id, gtin_info) = match resolve_identity(fragment) {
            Ok(resolved) => resolved,
            Err(e) => {
                debug!(datasource = %fragment.datasource, url = %fragment.url, error = %e, "fragment rejected");
                return Ok(MergeOutcome::Rejected(e));
            }
        };

        let _guard = self.locks.lock(&id).await;

        let buffered = {
            let buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            buffer.get(&id).cloned()
        };
        // Patches only target rows known to exist; a product seen for the
        // first time this run always ships as a full snapshot, even when a
        // later fragment of the run only touches its price.
        let (mut product, in_store) = match buffered {
            Some(existing) => (existing, false),
            None => match store.get_by_id(&id).await? {
                Some(existing) => (existing, true),
                None => (Product::new(id, gtin_info, now), false),
            },
        };

        let changes = self.apply(&mut product, fragment, now);
        if changes.any() {
            product.last_change = now;
        }

        let item = if in_store && changes.price_only() {
            IndexationItem::Partial(price_patch(&product))
        } else {
            IndexationItem::Full(Box::new(product.clone()))
        };
        {
            let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            buffer.insert(product.id.clone(), product);
        }
        Ok(MergeOutcome::Merged(item))
    }

    /// The merge chain itself, free of any storage concern. Order is fixed:
    /// attributes feed classification, prices feed the patch decision.
    fn apply(&self, product: &mut Product, fragment: &Fragment, now: i64) -> AppliedChanges {
        let mut changes = AppliedChanges::default();

        let attrs_before = section(&(
            &product.attributes,
            &product.alternative_ids,
            &product.alternative_models,
        ));
        merge_fragment_attributes(product, fragment, &self.indexer);
        changes.attributes = section(&(
            &product.attributes,
            &product.alternative_ids,
            &product.alternative_models,
        )) != attrs_before;

        let offers_before = product.price.offers.clone();
        merge_fragment_price(product, fragment);
        let consolidated = consolidate(product, now, &self.pricing);
        changes.price = consolidated || product.price.offers != offers_before;

        let resources_before = section(&product.resources);
        merge_fragment_resources(product, fragment);
        changes.resources = section(&product.resources) != resources_before;

        let class_before = section(&(
            &product.categories_by_datasource,
            &product.vertical,
            product.taxonomy_id,
            product.excluded,
        ));
        classify_product(
            product,
            &fragment.datasource,
            fragment.category.as_deref(),
            &self.matcher,
            &self.taxonomy,
        );
        // Coverage check: a vertical can require indexed attributes; a
        // product missing one is flagged, never dropped.
        let excluded = match &product.vertical {
            Some(vertical) => self
                .matcher
                .required_attributes(vertical)
                .iter()
                .any(|key| !product.attributes.indexed.contains_key(key)),
            None => false,
        };
        product.excluded = excluded;

        changes.classification = section(&(
            &product.categories_by_datasource,
            &product.vertical,
            product.taxonomy_id,
            product.excluded,
        )) != class_before;

        if changes.any() {
            debug!(
                product = %product.id,
                datasource = %fragment.datasource,
                attributes = changes.attributes,
                price = changes.price,
                resources = changes.resources,
                classification = changes.classification,
                "fragment merged"
            );
        }
        changes
    }
}

fn section<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// The changed-fields patch for a price-only merge.
fn price_patch(product: &Product) -> PartialProductUpdate {
    let mut changes = BTreeMap::new();
    changes.insert("price".to_string(), section(&product.price));
    changes.insert(
        "offers_count".to_string(),
        Value::from(product.offers_count),
    );
    changes.insert("last_change".to_string(), Value::from(product.last_change));
    PartialProductUpdate {
        id: product.id.clone(),
        changes,
    }
}

/// Log a rejection at the level the caller's context deserves.
pub fn warn_rejection(fragment: &Fragment, error: &IdentityError) {
    warn!(
        datasource = %fragment.datasource,
        url = %fragment.url,
        fragment = %fragment.dedup_hash(),
        error = %error,
        "fragment rejected"
    );
}
