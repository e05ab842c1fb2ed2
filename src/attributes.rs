//! Attribute aggregation and indexed projection.
//!
//! Raw fragment attributes are normalized and fed into per-attribute
//! conflict groups on the product. A configurable rule set then projects
//! curated values onto a small, typed indexed map used for filtering.
//! Referential attributes (BRAND, MODEL, GTIN) bypass the conflict groups
//! and follow their own replacement rules.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

use crate::barcode::same_gtin;
use crate::config::{AttributesConfig, IndexRuleConfig};
use crate::models::{AggregatedAttribute, Fragment, IndexedAttribute, Product, ReferentialKey};

// ═══════════════════════════════════════════════════════════════════════
// Name normalization
// ═══════════════════════════════════════════════════════════════════════

/// Canonical attribute name: uppercased, whitespace collapsed, trailing
/// separator punctuation dropped ("Screen size :" and "SCREEN SIZE" are the
/// same attribute).
pub fn normalize_name(raw: &str) -> String {
    let trimmed = raw
        .trim()
        .trim_end_matches([':', ';', '.', '-', ' '])
        .to_uppercase();
    trimmed.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ═══════════════════════════════════════════════════════════════════════
// Parser registry
// ═══════════════════════════════════════════════════════════════════════

/// A named, pure value parser. Returns the canonical value or an error
/// message; errors leave the attribute unindexed for this round.
type Parser = fn(&str) -> Result<String, String>;

const PARSERS: &[(&str, Parser)] = &[
    ("numeric", parse_numeric),
    ("boolean", parse_boolean),
    ("energy_class", parse_energy_class),
];

pub fn parser_exists(name: &str) -> bool {
    PARSERS.iter().any(|(n, _)| *n == name)
}

fn lookup_parser(name: &str) -> Option<Parser> {
    PARSERS.iter().find(|(n, _)| *n == name).map(|(_, p)| *p)
}

/// Extract the first decimal number from the value ("54 cm" -> "54",
/// "1,5 GHz" -> "1.5").
fn parse_numeric(value: &str) -> Result<String, String> {
    static NUM: OnceLock<Regex> = OnceLock::new();
    let re = NUM.get_or_init(|| Regex::new(r"\d+(?:[.,]\d+)?").unwrap());
    let m = re
        .find(value)
        .ok_or_else(|| format!("no number in '{}'", value))?;
    let normalized = m.as_str().replace(',', ".");
    normalized
        .parse::<f64>()
        .map_err(|e| format!("unparseable number '{}': {}", m.as_str(), e))?;
    Ok(normalized)
}

/// Normalize the usual yes/no spellings to "true"/"false".
fn parse_boolean(value: &str) -> Result<String, String> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "oui" | "y" | "1" => Ok("true".to_string()),
        "false" | "no" | "non" | "n" | "0" => Ok("false".to_string()),
        other => Err(format!("not a boolean: '{}'", other)),
    }
}

/// EU energy labels: A to G with optional pluses ("A++" is valid, "H" is
/// not).
fn parse_energy_class(value: &str) -> Result<String, String> {
    let cleaned = value.trim().to_uppercase().replace(' ', "");
    static CLASS: OnceLock<Regex> = OnceLock::new();
    let re = CLASS.get_or_init(|| Regex::new(r"^[A-G]\+{0,3}$").unwrap());
    if re.is_match(&cleaned) {
        Ok(cleaned)
    } else {
        Err(format!("not an energy class: '{}'", value))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Indexer — projects curated values through configured rules
// ═══════════════════════════════════════════════════════════════════════

pub struct AttributeIndexer {
    rules: Vec<IndexRuleConfig>,
    /// Normalized synonym -> index into `rules`.
    by_synonym: BTreeMap<String, usize>,
    /// Values longer than this never enter the aggregate.
    max_value_length: usize,
}

impl AttributeIndexer {
    pub fn new(cfg: &AttributesConfig) -> Self {
        let rules = &cfg.index;
        let mut by_synonym = BTreeMap::new();
        for (i, rule) in rules.iter().enumerate() {
            for synonym in &rule.synonyms {
                let key = normalize_name(synonym);
                if let Some(prev) = by_synonym.insert(key.clone(), i) {
                    warn!(
                        synonym = %key,
                        kept = %rules[prev].key,
                        ignored = %rule.key,
                        "synonym claimed by two index rules, first rule wins"
                    );
                    by_synonym.insert(key, prev);
                }
            }
        }
        Self {
            rules: rules.to_vec(),
            by_synonym,
            max_value_length: cfg.max_value_length,
        }
    }

    fn rule_for(&self, normalized_name: &str) -> Option<&IndexRuleConfig> {
        self.by_synonym
            .get(normalized_name)
            .map(|&i| &self.rules[i])
    }

    /// Re-project every rule-covered attribute from its curated value into
    /// the indexed map. Runs after the conflict groups are updated, so a
    /// re-election on an existing attribute is reflected immediately.
    pub fn reindex(&self, product: &mut Product) {
        let mut next: BTreeMap<String, IndexedAttribute> = BTreeMap::new();
        for (name, aggregated) in &product.attributes.aggregated {
            let Some(rule) = self.rule_for(name) else {
                continue;
            };
            let Some(curated) = &aggregated.value else {
                continue;
            };
            let Some(cleaned) = self.clean(rule, curated) else {
                continue;
            };
            if let Some(existing) = next.get(&rule.key) {
                if existing.value != cleaned {
                    warn!(
                        key = %rule.key,
                        kept = %existing.value,
                        dropped = %cleaned,
                        "two attributes feed the same indexed key, first wins"
                    );
                }
                continue;
            }
            next.insert(rule.key.clone(), IndexedAttribute::new(&cleaned));
        }
        product.attributes.indexed = next;
    }

    /// Apply the rule's textual cleanups and parser. `None` means the value
    /// does not index this round.
    fn clean(&self, rule: &IndexRuleConfig, raw: &str) -> Option<String> {
        let mut value = rule
            .mappings
            .get(raw)
            .cloned()
            .unwrap_or_else(|| raw.to_string());

        if rule.remove_parenthesis {
            static PAREN: OnceLock<Regex> = OnceLock::new();
            let re = PAREN.get_or_init(|| Regex::new(r"\s*\([^)]*\)").unwrap());
            value = re.replace_all(&value, "").into_owned();
        }
        for token in &rule.delete_tokens {
            value = value.replace(token.as_str(), "");
        }
        if rule.trim {
            value = value.trim().to_string();
        }
        if rule.lower_case {
            value = value.to_lowercase();
        } else if rule.upper_case {
            value = value.to_uppercase();
        }

        if !rule.token_match.is_empty() && !rule.token_match.iter().any(|t| t == &value) {
            warn!(key = %rule.key, value = %value, "value outside allowed tokens, not indexed");
            return None;
        }

        if let Some(parser_name) = &rule.parser {
            // Validated at config load, so the parser is always present.
            let parser = lookup_parser(parser_name)?;
            match parser(&value) {
                Ok(parsed) => value = parsed,
                Err(reason) => {
                    warn!(key = %rule.key, %reason, "parser rejected value, not indexed");
                    return None;
                }
            }
        }

        if value.is_empty() {
            return None;
        }
        Some(value)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Fragment merge
// ═══════════════════════════════════════════════════════════════════════

/// Merge one fragment's attributes into the product, then refresh the
/// indexed projection.
pub fn merge_fragment_attributes(
    product: &mut Product,
    fragment: &Fragment,
    indexer: &AttributeIndexer,
) {
    for attr in &fragment.attributes {
        let name = normalize_name(&attr.name);
        let value = attr.value.trim();
        if name.is_empty() || value.is_empty() {
            continue;
        }
        if value.len() > indexer.max_value_length {
            warn!(attribute = %name, len = value.len(), "oversized attribute value skipped");
            continue;
        }
        product
            .attributes
            .aggregated
            .entry(name.clone())
            .or_insert_with(|| AggregatedAttribute::new(&name))
            .record(&fragment.datasource, value, attr.language.as_deref());
    }

    for (key, value) in &fragment.referential {
        if value.len() > indexer.max_value_length {
            warn!(key = ?key, len = value.len(), "oversized referential value skipped");
            continue;
        }
        merge_referential(product, *key, value, &fragment.datasource);
    }

    indexer.reindex(product);
}

/// Referential attributes have fixed semantics instead of conflict groups.
fn merge_referential(product: &mut Product, key: ReferentialKey, raw: &str, datasource: &str) {
    let value = raw.trim();
    if value.is_empty() {
        return;
    }
    match key {
        ReferentialKey::Gtin => {
            // Identity is frozen at creation. A different numeric value is a
            // source error; an equivalent spelling is kept as an alternate.
            if value != product.id {
                if same_gtin(value, &product.id) {
                    product.alternative_ids.insert(value.to_string());
                } else {
                    warn!(
                        product = %product.id,
                        offered = %value,
                        %datasource,
                        "datasource offered a conflicting GTIN, ignored"
                    );
                }
            }
        }
        ReferentialKey::Model => {
            // Sources sometimes list several spellings in one value.
            for spelling in value.split(['/', '|']) {
                let model = spelling.trim().to_uppercase();
                if !model.is_empty() {
                    product.alternative_models.insert(model);
                }
            }
            elect_model(product);
        }
        ReferentialKey::Brand => {
            let brand = value.to_uppercase();
            let previous = product
                .attributes
                .referential
                .insert(ReferentialKey::Brand, brand.clone());
            if let Some(prev) = previous {
                if prev != brand {
                    warn!(
                        product = %product.id,
                        old = %prev,
                        new = %brand,
                        %datasource,
                        "brand replaced"
                    );
                }
            }
            // Every observed spelling stays available as an alternate.
            product
                .attributes
                .aggregated
                .entry("BRAND".to_string())
                .or_insert_with(|| AggregatedAttribute::new("BRAND"))
                .record(datasource, &brand, None);
        }
    }
}

/// The canonical MODEL is the shortest spelling seen so far. Sources pad
/// models with color or pack suffixes; the shortest form is the common
/// stem. Ties break on lexical order via the set iteration.
fn elect_model(product: &mut Product) {
    let Some(shortest) = product
        .alternative_models
        .iter()
        .min_by_key(|m| m.len())
        .cloned()
    else {
        return;
    };
    product
        .attributes
        .referential
        .insert(ReferentialKey::Model, shortest);
}
