use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub indexation: IndexationConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub attributes: AttributesConfig,
    #[serde(default)]
    pub taxonomy: TaxonomyConfig,
    #[serde(default)]
    pub verticals: Vec<VerticalConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PricingConfig {
    /// Offers older than this are dropped during consolidation.
    #[serde(default = "default_validity_days")]
    pub validity_days: u32,
    /// Hard cap on how far back price history is kept.
    #[serde(default = "default_history_max_age_days")]
    pub history_max_age_days: u32,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            validity_days: default_validity_days(),
            history_max_age_days: default_history_max_age_days(),
        }
    }
}

fn default_validity_days() -> u32 {
    7
}
fn default_history_max_age_days() -> u32 {
    730
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexationConfig {
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    #[serde(default = "default_queue_size")]
    pub partial_queue_size: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_workers")]
    pub partial_workers: usize,
    #[serde(default = "default_bulk_size")]
    pub bulk_size: usize,
    #[serde(default = "default_bulk_size")]
    pub partial_bulk_size: usize,
    /// How long a worker waits for a batch to fill before flushing anyway.
    #[serde(default = "default_pause_ms")]
    pub pause_ms: u64,
}

impl Default for IndexationConfig {
    fn default() -> Self {
        Self {
            queue_size: default_queue_size(),
            partial_queue_size: default_queue_size(),
            workers: default_workers(),
            partial_workers: default_workers(),
            bulk_size: default_bulk_size(),
            partial_bulk_size: default_bulk_size(),
            pause_ms: default_pause_ms(),
        }
    }
}

fn default_queue_size() -> usize {
    5000
}
fn default_workers() -> usize {
    2
}
fn default_bulk_size() -> usize {
    200
}
fn default_pause_ms() -> u64 {
    4000
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MediaConfig {
    /// Regex patterns for media URLs that must not be served back out.
    #[serde(default)]
    pub protected_patterns: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AttributesConfig {
    /// Indexation rules, keyed by the indexed attribute name they feed.
    #[serde(default)]
    pub index: Vec<IndexRuleConfig>,
    /// Attribute and referential values longer than this are skipped.
    #[serde(default = "default_max_value_length")]
    pub max_value_length: usize,
}

impl Default for AttributesConfig {
    fn default() -> Self {
        Self {
            index: Vec::new(),
            max_value_length: default_max_value_length(),
        }
    }
}

fn default_max_value_length() -> usize {
    1000
}

/// One rule mapping raw source attributes onto a typed indexed attribute.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexRuleConfig {
    /// Name of the resulting indexed attribute.
    pub key: String,
    /// Source attribute names (already normalized) that feed this key.
    pub synonyms: Vec<String>,
    #[serde(default)]
    pub lower_case: bool,
    #[serde(default)]
    pub upper_case: bool,
    #[serde(default = "default_true")]
    pub trim: bool,
    /// Tokens removed from the value wherever they appear.
    #[serde(default)]
    pub delete_tokens: Vec<String>,
    /// Strip any parenthesized trailer, "4K (Ultra HD)" becomes "4K".
    #[serde(default)]
    pub remove_parenthesis: bool,
    /// Fixed raw-value to canonical-value substitutions, applied first.
    #[serde(default)]
    pub mappings: BTreeMap<String, String>,
    /// When set, the cleaned value must equal one of these tokens exactly
    /// or the attribute is not indexed.
    #[serde(default)]
    pub token_match: Vec<String>,
    /// Named parser applied after the textual cleanups.
    #[serde(default)]
    pub parser: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TaxonomyConfig {
    /// Optional CSV file of taxonomy nodes (id, depth, path segments).
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Inline nodes, mostly for tests and small deployments.
    #[serde(default)]
    pub nodes: Vec<TaxonomyNodeConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TaxonomyNodeConfig {
    pub id: u32,
    /// Full path, segments separated by " > ".
    pub path: String,
}

/// A vertical groups products of one kind (TVs, washing machines, ...)
/// and is matched from the categories datasources report.
#[derive(Debug, Deserialize, Clone)]
pub struct VerticalConfig {
    pub id: String,
    /// Category paths that match this vertical, per datasource. The
    /// special key "all" applies to any datasource.
    #[serde(default)]
    pub matching_categories: BTreeMap<String, Vec<String>>,
    /// A category containing any of these tokens never matches.
    #[serde(default)]
    pub excluding_tokens: Vec<String>,
    /// Google taxonomy id products of this vertical map to.
    #[serde(default)]
    pub taxonomy_id: Option<u32>,
    /// Indexed attribute keys a product of this vertical must carry.
    /// Products missing one are flagged excluded, not deleted.
    #[serde(default)]
    pub required_attributes: Vec<String>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.pricing.validity_days == 0 {
        anyhow::bail!("pricing.validity_days must be > 0");
    }

    if config.indexation.bulk_size == 0 || config.indexation.partial_bulk_size == 0 {
        anyhow::bail!("indexation bulk sizes must be > 0");
    }
    if config.indexation.workers == 0 || config.indexation.partial_workers == 0 {
        anyhow::bail!("indexation worker counts must be > 0");
    }
    if config.indexation.queue_size == 0 || config.indexation.partial_queue_size == 0 {
        anyhow::bail!("indexation queue sizes must be > 0");
    }

    for pattern in &config.media.protected_patterns {
        regex::Regex::new(pattern)
            .with_context(|| format!("Invalid media.protected_patterns entry: {}", pattern))?;
    }

    if config.attributes.max_value_length == 0 {
        anyhow::bail!("attributes.max_value_length must be > 0");
    }

    for rule in &config.attributes.index {
        if rule.key.trim().is_empty() {
            anyhow::bail!("attributes.index rule with empty key");
        }
        if rule.synonyms.is_empty() {
            anyhow::bail!("attributes.index rule '{}' has no synonyms", rule.key);
        }
        if rule.lower_case && rule.upper_case {
            anyhow::bail!(
                "attributes.index rule '{}' sets both lower_case and upper_case",
                rule.key
            );
        }
        if let Some(parser) = &rule.parser {
            if !crate::attributes::parser_exists(parser) {
                anyhow::bail!(
                    "attributes.index rule '{}' references unknown parser '{}'",
                    rule.key,
                    parser
                );
            }
        }
    }

    let mut seen = std::collections::BTreeSet::new();
    for vertical in &config.verticals {
        if !seen.insert(&vertical.id) {
            anyhow::bail!("duplicate vertical id '{}'", vertical.id);
        }
    }

    Ok(config)
}
