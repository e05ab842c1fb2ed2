//! Core data models used throughout offerforge.
//!
//! These types represent the fragments, products, offers, and resources that
//! flow through the aggregation and indexation pipeline. Products are stored
//! as JSON documents, so everything here derives `Serialize`/`Deserialize`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identity-defining attribute keys, as opposed to descriptive attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReferentialKey {
    Brand,
    Model,
    Gtin,
}

/// Commercial condition of an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Condition {
    New,
    Occasion,
}

/// Detected barcode family of a validated product id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BarcodeType {
    Gtin8,
    Gtin12,
    Gtin13,
    Gtin14,
    Isbn13,
}

pub const TREND_STABLE: i8 = 0;
pub const TREND_INCREASE: i8 = 1;
pub const TREND_DECREASE: i8 = -1;

// ═══════════════════════════════════════════════════════════════════════
// Fragment — one source's raw observation of a product
// ═══════════════════════════════════════════════════════════════════════

/// A raw key/value attribute as observed by one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentAttribute {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub language: Option<String>,
}

/// A priced offer carried by a fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentPrice {
    pub price: f64,
    pub currency: String,
    #[serde(default = "default_condition")]
    pub condition: Condition,
}

fn default_condition() -> Condition {
    Condition::New
}

/// A media resource reference carried by a fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentResource {
    pub url: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub hard_tags: Vec<String>,
}

/// One source observation of a product. Immutable once built; discarded
/// after the merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    /// Page or feed entry this observation came from.
    pub url: String,
    /// Name of the datasource that produced the observation.
    pub datasource: String,
    /// Raw category string, as the source spells it.
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub attributes: Vec<FragmentAttribute>,
    #[serde(default)]
    pub price: Option<FragmentPrice>,
    #[serde(default)]
    pub resources: Vec<FragmentResource>,
    /// Referential key/value pairs (BRAND, MODEL, GTIN).
    #[serde(default)]
    pub referential: BTreeMap<ReferentialKey, String>,
    /// Observation time, epoch seconds.
    pub timestamp: i64,
}

impl Fragment {
    /// The raw barcode-like value this fragment names, if any.
    pub fn gtin(&self) -> Option<&str> {
        self.referential
            .get(&ReferentialKey::Gtin)
            .map(String::as_str)
    }

    /// Stable content hash, used to correlate re-observations in logs.
    pub fn dedup_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.datasource.as_bytes());
        hasher.update(self.url.as_bytes());
        if let Some(gtin) = self.gtin() {
            hasher.update(gtin.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Attributes — conflict groups and projections
// ═══════════════════════════════════════════════════════════════════════

/// One source's contribution to an attribute value group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourcedValue {
    pub datasource: String,
    pub raw_value: String,
    #[serde(default)]
    pub language: Option<String>,
}

/// Per-attribute aggregate: a curated value plus the conflict groups that
/// back it. Groups are keyed by distinct value; each group holds the set of
/// sources that contributed that value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatedAttribute {
    pub name: String,
    /// Elected value (most contributing sources; lexical order breaks ties).
    pub value: Option<String>,
    /// value -> contributing sources.
    pub sources: BTreeMap<String, BTreeSet<SourcedValue>>,
}

impl AggregatedAttribute {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Record one source's observation of this attribute. A source only ever
    /// holds one live contribution: its previous tuple, whatever group it
    /// sat in, is replaced.
    pub fn record(&mut self, datasource: &str, value: &str, language: Option<&str>) {
        for group in self.sources.values_mut() {
            group.retain(|s| s.datasource != datasource);
        }
        self.sources.retain(|_, group| !group.is_empty());

        self.sources
            .entry(value.to_string())
            .or_default()
            .insert(SourcedValue {
                datasource: datasource.to_string(),
                raw_value: value.to_string(),
                language: language.map(str::to_string),
            });

        self.value = self.elect();
    }

    /// Elect the curated value: most contributors wins, lexical order of the
    /// value breaks ties deterministically.
    pub fn elect(&self) -> Option<String> {
        self.sources
            .iter()
            .max_by(|a, b| a.1.len().cmp(&b.1.len()).then(b.0.cmp(a.0)))
            .map(|(value, _)| value.clone())
    }

    /// Number of distinct values seen across sources.
    pub fn distinct_values(&self) -> usize {
        self.sources.len()
    }

    /// Total number of contributing sources, across all value groups.
    pub fn sources_count(&self) -> usize {
        self.sources.values().map(BTreeSet::len).sum()
    }

    pub fn has_conflicts(&self) -> bool {
        self.distinct_values() > 1
    }
}

/// Search-optimized, typed projection of a curated attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedAttribute {
    pub value: String,
    #[serde(default)]
    pub numeric: Option<f64>,
    #[serde(default)]
    pub boolean: Option<bool>,
}

impl IndexedAttribute {
    pub fn new(cleaned: &str) -> Self {
        let numeric = cleaned.trim().replace(',', ".").parse::<f64>().ok();
        Self {
            value: cleaned.to_string(),
            numeric,
            boolean: parse_bool(cleaned),
        }
    }
}

/// Loose boolean detection over common spellings.
fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "oui" | "y" | "1" => Some(true),
        "false" | "no" | "non" | "n" | "0" => Some(false),
        _ => None,
    }
}

/// All attribute state carried by a product.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Attributes {
    /// Attribute name -> aggregate with conflict groups.
    pub aggregated: BTreeMap<String, AggregatedAttribute>,
    /// BRAND / MODEL / GTIN.
    pub referential: BTreeMap<ReferentialKey, String>,
    /// Indexed key -> cleaned, typed value.
    pub indexed: BTreeMap<String, IndexedAttribute>,
}

// ═══════════════════════════════════════════════════════════════════════
// Prices
// ═══════════════════════════════════════════════════════════════════════

/// A live offer from one source for one condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub price: f64,
    pub currency: String,
    pub condition: Condition,
    pub datasource: String,
    pub url: String,
    /// Observation time, epoch seconds.
    pub timestamp: i64,
}

/// One row of a per-condition price history series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceHistoryEntry {
    pub price: f64,
    pub timestamp: i64,
}

/// The product's whole price state: live offers, cheapest pointer, bounded
/// per-condition history, and trend flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatedPrices {
    pub offers: Vec<Offer>,
    pub min_price: Option<Offer>,
    /// Condition -> history rows, timestamps non-decreasing, prices never 0.
    #[serde(default)]
    pub histories: BTreeMap<Condition, Vec<PriceHistoryEntry>>,
    /// Condition -> -1 / 0 / 1 (decrease / stable / increase).
    #[serde(default)]
    pub trends: BTreeMap<Condition, i8>,
    /// Conditions for which at least one live offer exists.
    #[serde(default)]
    pub conditions: BTreeSet<Condition>,
}

impl AggregatedPrices {
    /// The cheapest live offer for one condition.
    pub fn min_for(&self, condition: Condition) -> Option<&Offer> {
        self.offers
            .iter()
            .filter(|o| o.condition == condition)
            .min_by(|a, b| a.price.total_cmp(&b.price))
    }

    pub fn history(&self, condition: Condition) -> &[PriceHistoryEntry] {
        self.histories
            .get(&condition)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Resources
// ═══════════════════════════════════════════════════════════════════════

/// A media resource attached to a product, keyed by its absolute URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductResource {
    pub url: String,
    pub tags: BTreeSet<String>,
    pub hard_tags: BTreeSet<String>,
    pub datasource: String,
    pub timestamp: i64,
}

// ═══════════════════════════════════════════════════════════════════════
// Product — the durable aggregate
// ═══════════════════════════════════════════════════════════════════════

/// Barcode family metadata derived at identity resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtinInfo {
    pub barcode_type: BarcodeType,
    /// Manufacturer country derived from the GS1 prefix; GTIN families only.
    #[serde(default)]
    pub country: Option<String>,
}

/// The canonical product record, one per validated barcode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    /// Canonical barcode. Assigned once, never changed by fragments.
    pub id: String,
    pub gtin_info: GtinInfo,
    /// Secondary identifiers seen across fragments.
    #[serde(default)]
    pub alternative_ids: BTreeSet<String>,
    /// Alternate model spellings feeding MODEL election.
    #[serde(default)]
    pub alternative_models: BTreeSet<String>,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub price: AggregatedPrices,
    #[serde(default)]
    pub offers_count: u32,
    /// Absolute URL -> resource.
    #[serde(default)]
    pub resources: BTreeMap<String, ProductResource>,
    /// Datasource -> last raw category that datasource reported.
    #[serde(default)]
    pub categories_by_datasource: BTreeMap<String, String>,
    /// Distinct raw category strings accumulated across fragments.
    #[serde(default)]
    pub datasource_categories: BTreeSet<String>,
    #[serde(default)]
    pub taxonomy_id: Option<u32>,
    #[serde(default)]
    pub vertical: Option<String>,
    /// Set when mandatory attributes for the vertical are missing.
    #[serde(default)]
    pub excluded: bool,
    pub created_at: i64,
    pub last_change: i64,
}

impl Product {
    pub fn new(id: String, gtin_info: GtinInfo, now: i64) -> Self {
        Self {
            id,
            gtin_info,
            alternative_ids: BTreeSet::new(),
            alternative_models: BTreeSet::new(),
            attributes: Attributes::default(),
            price: AggregatedPrices::default(),
            offers_count: 0,
            resources: BTreeMap::new(),
            categories_by_datasource: BTreeMap::new(),
            datasource_categories: BTreeSet::new(),
            taxonomy_id: None,
            vertical: None,
            excluded: false,
            created_at: now,
            last_change: now,
        }
    }

    /// The elected MODEL referential value, if any.
    pub fn model(&self) -> Option<&str> {
        self.attributes
            .referential
            .get(&ReferentialKey::Model)
            .map(String::as_str)
    }

    pub fn brand(&self) -> Option<&str> {
        self.attributes
            .referential
            .get(&ReferentialKey::Brand)
            .map(String::as_str)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Indexation hand-off
// ═══════════════════════════════════════════════════════════════════════

/// Changed-fields holder for the partial-patch queue. Keys are flat field
/// paths over the stored document (`offers_count`, `price`, `last_change`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialProductUpdate {
    pub id: String,
    pub changes: BTreeMap<String, serde_json::Value>,
}

/// What a merge produced for the indexation layer.
#[derive(Debug, Clone)]
pub enum IndexationItem {
    /// Full snapshot replace.
    Full(Box<Product>),
    /// Document patch of the changed fields only.
    Partial(PartialProductUpdate),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_replaces_same_source() {
        let mut attr = AggregatedAttribute::new("COLOR");
        attr.record("shop1", "red", None);
        attr.record("shop1", "blue", None);
        assert_eq!(attr.distinct_values(), 1);
        assert_eq!(attr.sources_count(), 1);
        assert_eq!(attr.value.as_deref(), Some("blue"));
    }

    #[test]
    fn test_conflict_accounting() {
        let mut attr = AggregatedAttribute::new("COLOR");
        attr.record("shop1", "red", None);
        attr.record("shop2", "red", None);
        attr.record("shop3", "blue", None);
        assert_eq!(attr.distinct_values(), 2);
        assert_eq!(attr.sources_count(), 3);
        assert!(attr.has_conflicts());
        assert_eq!(attr.value.as_deref(), Some("red"));
    }

    #[test]
    fn test_election_tie_break_is_lexical() {
        let mut attr = AggregatedAttribute::new("COLOR");
        attr.record("shop1", "blue", None);
        attr.record("shop2", "red", None);
        assert_eq!(attr.value.as_deref(), Some("blue"));
    }

    #[test]
    fn test_dedup_hash_is_stable() {
        let fragment = Fragment {
            url: "https://shop1.example/p".to_string(),
            datasource: "shop1".to_string(),
            category: None,
            attributes: Vec::new(),
            price: None,
            resources: Vec::new(),
            referential: BTreeMap::new(),
            timestamp: 1_700_000_000,
        };
        assert_eq!(fragment.dedup_hash(), fragment.clone().dedup_hash());
        let mut other = fragment.clone();
        other.datasource = "shop2".to_string();
        assert_ne!(fragment.dedup_hash(), other.dedup_hash());
    }

    #[test]
    fn test_indexed_attribute_typing() {
        let num = IndexedAttribute::new("1,5");
        assert_eq!(num.numeric, Some(1.5));
        let yes = IndexedAttribute::new("Oui");
        assert_eq!(yes.boolean, Some(true));
        let no = IndexedAttribute::new("0");
        assert_eq!(no.boolean, Some(false));
        let plain = IndexedAttribute::new("OLED");
        assert_eq!(plain.numeric, None);
        assert_eq!(plain.boolean, None);
    }
}
