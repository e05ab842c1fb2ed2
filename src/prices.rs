//! Price merge and consolidation.
//!
//! Each fragment contributes at most one live offer per datasource and
//! condition. Consolidation is a pure pass over the product's price state:
//! it drops stale and zero-priced offers, recomputes the cheapest pointer,
//! and maintains the per-condition history and trend flags. Running it
//! twice with the same clock changes nothing.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::config::PricingConfig;
use crate::models::{
    AggregatedPrices, Condition, Fragment, Offer, PriceHistoryEntry, Product, TREND_DECREASE,
    TREND_INCREASE, TREND_STABLE,
};

const DAY_SECONDS: i64 = 86_400;

/// Fold the fragment's offer into the product. The datasource's previous
/// offer for the same condition is replaced, not stacked.
pub fn merge_fragment_price(product: &mut Product, fragment: &Fragment) {
    let Some(price) = &fragment.price else {
        return;
    };
    let offer = Offer {
        price: price.price,
        currency: price.currency.clone(),
        condition: price.condition,
        datasource: fragment.datasource.clone(),
        url: fragment.url.clone(),
        timestamp: fragment.timestamp,
    };
    product
        .price
        .offers
        .retain(|o| !(o.datasource == offer.datasource && o.condition == offer.condition));
    product.price.offers.push(offer);
}

/// Recompute the whole derived price state. Returns true when anything
/// observable changed.
pub fn consolidate(product: &mut Product, now: i64, cfg: &PricingConfig) -> bool {
    let before = snapshot(&product.price, product.offers_count);

    let validity_cutoff = now - cfg.validity_days as i64 * DAY_SECONDS;
    let history_cutoff = now - cfg.history_max_age_days as i64 * DAY_SECONDS;

    let offers = std::mem::take(&mut product.price.offers);
    let kept = offers.len();
    product.price.offers = dedup_cheapest(
        offers
            .into_iter()
            .filter(|o| o.price > 0.0)
            .filter(|o| o.timestamp >= validity_cutoff)
            .collect(),
    );
    if product.price.offers.len() != kept {
        debug!(
            product = %product.id,
            dropped = kept - product.price.offers.len(),
            "dropped stale or duplicate offers"
        );
    }

    product.price.min_price = product
        .price
        .offers
        .iter()
        .min_by(|a, b| a.price.total_cmp(&b.price))
        .cloned();

    product.price.conditions = product
        .price
        .offers
        .iter()
        .map(|o| o.condition)
        .collect::<BTreeSet<_>>();

    for condition in [Condition::New, Condition::Occasion] {
        roll_history(&mut product.price, condition, now, history_cutoff);
    }

    product.offers_count = product.price.offers.len() as u32;

    before != snapshot(&product.price, product.offers_count)
}

/// Keep the cheaper offer when a datasource reports the same condition
/// twice.
fn dedup_cheapest(offers: Vec<Offer>) -> Vec<Offer> {
    let mut best: BTreeMap<(String, Condition), Offer> = BTreeMap::new();
    for offer in offers {
        let key = (offer.datasource.clone(), offer.condition);
        match best.get(&key) {
            Some(existing) if existing.price <= offer.price => {}
            _ => {
                best.insert(key, offer);
            }
        }
    }
    best.into_values().collect()
}

/// Append a history row when the condition's cheapest price moved; refresh
/// the last row's timestamp when it did not. Rows beyond the retention
/// window fall off the front.
fn roll_history(prices: &mut AggregatedPrices, condition: Condition, now: i64, cutoff: i64) {
    let current = prices.min_for(condition).map(|o| o.price);
    let history = prices.histories.entry(condition).or_default();

    if let Some(price) = current {
        match history.last_mut() {
            Some(last) if last.price == price => last.timestamp = now,
            _ => history.push(PriceHistoryEntry {
                price,
                timestamp: now,
            }),
        }
    }
    history.retain(|e| e.timestamp >= cutoff && e.price > 0.0);

    let trend = match history.len() {
        0 | 1 => TREND_STABLE,
        n => {
            let prev = history[n - 2].price;
            let last = history[n - 1].price;
            if last > prev {
                TREND_INCREASE
            } else if last < prev {
                TREND_DECREASE
            } else {
                TREND_STABLE
            }
        }
    };

    if history.is_empty() {
        prices.histories.remove(&condition);
        prices.trends.remove(&condition);
    } else {
        prices.trends.insert(condition, trend);
    }
}

/// Cheap structural fingerprint of the price state, for change detection.
fn snapshot(prices: &AggregatedPrices, offers_count: u32) -> String {
    // Serialization of these types cannot fail.
    serde_json::to_string(&(prices, offers_count)).unwrap_or_default()
}
