//! Run-wide merge of harvested records.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::models::{Product, TriState};

/// Normalize a product URL into the dedup key.
///
/// Click-tracking redirects that carry the destination in a `url=` parameter
/// are unwrapped. Anything that is not `http(s)` yields `None`.
pub fn canonical_link(raw: &str, keep_query: bool) -> Option<String> {
    let mut link = raw.trim().to_string();

    if let Some(target) = redirect_target(&link) {
        link = target;
    }

    let lower = link.to_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return None;
    }

    if let Some(pos) = link.find('#') {
        link.truncate(pos);
    }
    if !keep_query {
        if let Some(pos) = link.find('?') {
            link.truncate(pos);
        }
    }
    while link.ends_with('/') && !link.ends_with("://") {
        link.pop();
    }

    let has_host = link.splitn(2, "://").nth(1).map(|rest| !rest.is_empty()).unwrap_or(false);
    has_host.then_some(link)
}

fn redirect_target(link: &str) -> Option<String> {
    let (_, query) = link.split_once('?')?;
    let query = query.split('#').next().unwrap_or_default();
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "url")
        .and_then(|(_, value)| urlencoding::decode(value).ok())
        .map(|decoded| decoded.into_owned())
        .filter(|decoded| decoded.starts_with("http"))
}

/// Drop records without a link, then keep the first record per link.
///
/// Later duplicates are discarded whole, never merged into the survivor.
pub fn aggregate(products: impl IntoIterator<Item = Product>) -> Vec<Product> {
    let mut seen = HashSet::new();
    products
        .into_iter()
        .filter(|p| !p.canonical_link.is_empty())
        .filter(|p| seen.insert(p.canonical_link.clone()))
        .collect()
}

/// Tallies over a final catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Statistics {
    pub total_products: usize,
    pub by_site: BTreeMap<String, usize>,
    pub by_model: BTreeMap<String, usize>,
    pub with_price: usize,
    pub with_image: usize,
    pub with_disc_reader: usize,
    pub without_disc_reader: usize,
    pub with_controllers: usize,
    pub with_games: usize,
    pub by_color: BTreeMap<String, usize>,
    pub by_storage: BTreeMap<String, usize>,
}

impl Statistics {
    pub fn from_products(products: &[Product]) -> Self {
        let mut stats = Statistics {
            total_products: products.len(),
            ..Default::default()
        };

        for p in products {
            *stats.by_site.entry(p.source_site.clone()).or_default() += 1;

            let model = match p.model_variant.label() {
                "" => "Não especificado",
                label => label,
            };
            *stats.by_model.entry(model.to_string()).or_default() += 1;

            if !p.price_cash.is_empty() {
                stats.with_price += 1;
            }
            if p.image_url.as_deref().is_some_and(|u| !u.is_empty()) {
                stats.with_image += 1;
            }
            match p.disc_reader {
                TriState::Yes => stats.with_disc_reader += 1,
                TriState::No => stats.without_disc_reader += 1,
                TriState::Unknown => {}
            }
            if p.bundled_controllers == TriState::Yes {
                stats.with_controllers += 1;
            }
            if !p.bundled_games.is_empty() {
                stats.with_games += 1;
            }
            if let Some(color) = p.color.as_ref().filter(|c| !c.is_empty()) {
                *stats.by_color.entry(color.clone()).or_default() += 1;
            }
            if !p.storage_capacity.is_empty() {
                *stats.by_storage.entry(p.storage_capacity.clone()).or_default() += 1;
            }
        }

        stats
    }
}
