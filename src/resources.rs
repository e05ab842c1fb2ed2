//! Media resource merge.
//!
//! Resources are keyed by absolute URL. Fragment URLs arrive in various
//! shapes (protocol-relative, root-relative, absolute) and are normalized
//! against the fragment's own page URL before merging. Protected URLs are
//! never deleted from the stored product; they are filtered out at read
//! time so a pattern change applies retroactively.

use anyhow::{Context, Result};
use regex::Regex;
use tracing::warn;
use url::Url;

use crate::models::{Fragment, Product, ProductResource};

/// Absolute form of a resource URL found on `base`.
///
/// `//cdn.example.com/x.jpg` gets the https scheme; `/img/x.jpg` resolves
/// against the page origin. Anything that still does not parse is rejected.
pub fn normalize_url(raw: &str, base: &str) -> Result<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        anyhow::bail!("empty resource url");
    }
    let candidate = if raw.starts_with("//") {
        format!("https:{}", raw)
    } else {
        raw.to_string()
    };
    match Url::parse(&candidate) {
        Ok(url) => Ok(url.to_string()),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = Url::parse(base)
                .with_context(|| format!("fragment url is not absolute: {}", base))?;
            let joined = base
                .join(&candidate)
                .with_context(|| format!("cannot resolve resource url: {}", raw))?;
            Ok(joined.to_string())
        }
        Err(e) => Err(e).with_context(|| format!("invalid resource url: {}", raw)),
    }
}

/// Merge the fragment's resources into the product. An already-known URL is
/// smart-updated: the new observation's tag sets replace the old ones and
/// the observation metadata refreshes.
pub fn merge_fragment_resources(product: &mut Product, fragment: &Fragment) {
    for resource in &fragment.resources {
        let url = match normalize_url(&resource.url, &fragment.url) {
            Ok(url) => url,
            Err(e) => {
                warn!(product = %product.id, error = %e, "skipping resource");
                continue;
            }
        };
        match product.resources.get_mut(&url) {
            Some(existing) => {
                existing.tags = resource.tags.iter().cloned().collect();
                existing.hard_tags = resource.hard_tags.iter().cloned().collect();
                existing.datasource = fragment.datasource.clone();
                existing.timestamp = fragment.timestamp;
            }
            None => {
                product.resources.insert(
                    url.clone(),
                    ProductResource {
                        url,
                        tags: resource.tags.iter().cloned().collect(),
                        hard_tags: resource.hard_tags.iter().cloned().collect(),
                        datasource: fragment.datasource.clone(),
                        timestamp: fragment.timestamp,
                    },
                );
            }
        }
    }
}

/// Read-time filter for resource URLs that must not be served out.
pub struct MediaFilter {
    protected: Vec<Regex>,
}

impl MediaFilter {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let protected = patterns
            .iter()
            .map(|p| {
                Regex::new(p).with_context(|| format!("invalid protected media pattern: {}", p))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { protected })
    }

    pub fn is_protected(&self, url: &str) -> bool {
        self.protected.iter().any(|re| re.is_match(url))
    }

    /// The product's resources minus protected URLs, in key order.
    pub fn visible<'a>(&self, product: &'a Product) -> Vec<&'a ProductResource> {
        product
            .resources
            .values()
            .filter(|r| !self.is_protected(&r.url))
            .collect()
    }
}
