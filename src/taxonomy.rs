//! Category taxonomy and vertical matching.
//!
//! Datasources report free-form category strings. Two classifiers run over
//! them: a taxonomy resolver that maps category tokens onto numbered nodes
//! of a reference tree (deepest node wins), and a vertical matcher that
//! assigns the product to a configured vertical from per-datasource
//! category lists.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use tracing::warn;

use crate::config::{TaxonomyConfig, VerticalConfig};
use crate::models::Product;

// ═══════════════════════════════════════════════════════════════════════
// Taxonomy tree
// ═══════════════════════════════════════════════════════════════════════

pub struct TaxonomyService {
    /// Lowercased leaf segment -> node ids carrying that segment.
    by_segment: BTreeMap<String, Vec<u32>>,
    /// Node id -> depth in the tree.
    depths: BTreeMap<u32, usize>,
}

impl TaxonomyService {
    /// Build from inline nodes plus an optional node file. File lines are
    /// `id;Segment > Segment > Segment`; blank lines and `#` comments are
    /// skipped.
    pub fn from_config(cfg: &TaxonomyConfig) -> Result<Self> {
        let mut service = Self {
            by_segment: BTreeMap::new(),
            depths: BTreeMap::new(),
        };
        for node in &cfg.nodes {
            service.add_node(node.id, &node.path);
        }
        if let Some(path) = &cfg.file {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read taxonomy file: {}", path.display()))?;
            for (lineno, line) in content.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let (id, path) = line
                    .split_once(';')
                    .with_context(|| format!("taxonomy line {} has no ';'", lineno + 1))?;
                let id: u32 = id
                    .trim()
                    .parse()
                    .with_context(|| format!("taxonomy line {} has a bad id", lineno + 1))?;
                service.add_node(id, path);
            }
        }
        Ok(service)
    }

    fn add_node(&mut self, id: u32, path: &str) {
        let segments: Vec<&str> = path.split('>').map(str::trim).collect();
        self.depths.insert(id, segments.len());
        // Only the leaf segment names the node; parent segments name the
        // parent nodes.
        if let Some(leaf) = segments.last() {
            self.by_segment
                .entry(leaf.to_lowercase())
                .or_default()
                .push(id);
        }
    }

    /// Node ids whose leaf segment appears in the raw category string.
    pub fn resolve(&self, category: &str) -> Vec<u32> {
        let mut ids = Vec::new();
        for token in category.split(['>', '/', '|', ',']) {
            let token = token.trim().to_lowercase();
            if token.is_empty() {
                continue;
            }
            if let Some(found) = self.by_segment.get(&token) {
                ids.extend_from_slice(found);
            }
        }
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Most specific candidate: greatest depth, smallest id on equal depth.
    pub fn select_deepest(&self, ids: &[u32]) -> Option<u32> {
        ids.iter()
            .copied()
            .max_by(|a, b| {
                let da = self.depths.get(a).copied().unwrap_or(0);
                let db = self.depths.get(b).copied().unwrap_or(0);
                da.cmp(&db).then(b.cmp(a))
            })
    }

    /// Deepest taxonomy node matched by any of the given categories.
    pub fn classify(&self, categories: impl Iterator<Item = impl AsRef<str>>) -> Option<u32> {
        let mut ids = Vec::new();
        for category in categories {
            ids.extend(self.resolve(category.as_ref()));
        }
        ids.sort_unstable();
        ids.dedup();
        self.select_deepest(&ids)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Vertical matching
// ═══════════════════════════════════════════════════════════════════════

pub struct VerticalMatcher {
    verticals: Vec<VerticalConfig>,
}

impl VerticalMatcher {
    pub fn new(verticals: &[VerticalConfig]) -> Self {
        Self {
            verticals: verticals.to_vec(),
        }
    }

    /// The vertical the accumulated categories map to, if any. Every
    /// datasource's category is checked against that datasource's list and
    /// the shared "all" list; an excluding token in any category vetoes
    /// the vertical entirely. The lookup runs over the whole map, so lost
    /// or contradicting evidence can clear an earlier assignment.
    pub fn vertical_for(
        &self,
        categories_by_datasource: &BTreeMap<String, String>,
    ) -> Option<&str> {
        let lowered: Vec<(&str, String)> = categories_by_datasource
            .iter()
            .map(|(ds, c)| (ds.as_str(), c.to_lowercase()))
            .collect();
        for vertical in &self.verticals {
            if lowered.iter().any(|(_, category)| {
                vertical
                    .excluding_tokens
                    .iter()
                    .any(|t| category.contains(&t.to_lowercase()))
            }) {
                continue;
            }
            let matched = lowered.iter().any(|(datasource, category)| {
                let matches = |key: &str| {
                    vertical
                        .matching_categories
                        .get(key)
                        .map(|cats| cats.iter().any(|c| &c.to_lowercase() == category))
                        .unwrap_or(false)
                };
                matches(datasource) || matches("all")
            });

            if matched {
                return Some(vertical.id.as_str());
            }
        }
        None
    }

    pub fn taxonomy_for(&self, vertical_id: &str) -> Option<u32> {
        self.verticals
            .iter()
            .find(|v| v.id == vertical_id)
            .and_then(|v| v.taxonomy_id)
    }

    /// Indexed attribute keys products of this vertical must carry.
    pub fn required_attributes(&self, vertical_id: &str) -> &[String] {
        self.verticals
            .iter()
            .find(|v| v.id == vertical_id)
            .map(|v| v.required_attributes.as_slice())
            .unwrap_or(&[])
    }
}

/// Fold one fragment's category into the product and refresh its
/// classification.
pub fn classify_product(
    product: &mut Product,
    datasource: &str,
    category: Option<&str>,
    matcher: &VerticalMatcher,
    taxonomy: &TaxonomyService,
) {
    if let Some(category) = category.map(str::trim).filter(|c| !c.is_empty()) {
        product
            .categories_by_datasource
            .insert(datasource.to_string(), category.to_string());
    }
    // A datasource correcting its category replaces its old entry, so the
    // distinct set is rebuilt from the live map instead of accumulating.
    product.datasource_categories = product
        .categories_by_datasource
        .values()
        .cloned()
        .collect();

    if product.categories_by_datasource.is_empty() {
        product.vertical = None;
        product.taxonomy_id = None;
        return;
    }

    let vertical = matcher.vertical_for(&product.categories_by_datasource);
    if let (Some(current), Some(next)) = (&product.vertical, vertical) {
        if current != next {
            warn!(
                product = %product.id,
                old = %current,
                new = %next,
                %datasource,
                "vertical reassigned"
            );
        }
    }
    product.vertical = vertical.map(str::to_string);

    product.taxonomy_id = product
        .vertical
        .as_deref()
        .and_then(|v| matcher.taxonomy_for(v))
        .or_else(|| taxonomy.classify(product.datasource_categories.iter()));
}
