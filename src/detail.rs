//! Optional product detail page visits.
//!
//! Listing cards only carry a title and a price. The detail page adds a
//! description, which feeds a second extraction pass, and a price for cards
//! that showed none.

use std::time::Duration;

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::debug;

use crate::config::SiteProfile;
use crate::driver::{soften, DriverResult, PageDriver};
use crate::extract::{clean_price, extract_attributes};
use crate::locator::Resolver;
use crate::models::Product;

static LD_JSON: Lazy<Selector> = Lazy::new(|| Selector::parse("script[type='application/ld+json']").unwrap());

/// Extract Schema.org JSON-LD blocks from HTML
pub fn extract_schema_org(html: &str) -> Vec<Value> {
    let document = Html::parse_document(html);
    document
        .select(&LD_JSON)
        .filter_map(|el| {
            let json_text = el.text().collect::<String>();
            serde_json::from_str(&json_text).ok()
        })
        .collect()
}

fn is_product(node: &Value) -> bool {
    match node.get("@type") {
        Some(Value::String(t)) => t == "Product",
        Some(Value::Array(types)) => types.iter().any(|t| t == "Product"),
        _ => false,
    }
}

fn offer_price(offers: &Value) -> Option<String> {
    match offers {
        Value::Array(list) => list.iter().find_map(offer_price),
        Value::Object(_) => match offers.get("price").or_else(|| offers.get("lowPrice"))? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        },
        _ => None,
    }
}

fn product_price(node: &Value) -> Option<String> {
    match node {
        Value::Array(items) => items.iter().find_map(product_price),
        Value::Object(_) => {
            if let Some(graph) = node.get("@graph") {
                if let Some(price) = product_price(graph) {
                    return Some(price);
                }
            }
            if is_product(node) {
                node.get("offers").and_then(offer_price)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// `Product.offers.price` from the page's JSON-LD, normalized.
pub fn json_ld_price(html: &str) -> Option<String> {
    extract_schema_org(html)
        .iter()
        .find_map(product_price)
        .map(|raw| clean_price(&raw))
        .filter(|p| !p.is_empty())
}

pub struct DetailEnricher<'a, D: PageDriver> {
    resolver: Resolver<'a, D>,
    driver: &'a D,
    profile: &'a SiteProfile,
}

impl<'a, D: PageDriver> DetailEnricher<'a, D> {
    pub fn new(driver: &'a D, profile: &'a SiteProfile, poll: Duration) -> Self {
        Self {
            resolver: Resolver::new(driver, poll),
            driver,
            profile,
        }
    }

    /// Visit the product's page and fold what it shows into the record.
    ///
    /// Returns `Ok(false)` when the page could not be loaded. Only a lost
    /// session is an error.
    pub async fn enrich(&self, product: &mut Product) -> DriverResult<bool> {
        if product.canonical_link.is_empty() {
            return Ok(false);
        }
        if soften(self.driver.navigate(&product.canonical_link))?.is_none() {
            debug!(url = %product.canonical_link, "Detail page unavailable");
            return Ok(false);
        }

        let locators = &self.profile.locators;
        if product.title.is_empty() {
            if let Some(title) = self.resolver.resolve_text(None, &locators.detail_title, |t| !t.is_empty()).await? {
                product.title = title;
            }
        }

        if product.price_cash.is_empty() {
            let shown = self
                .resolver
                .resolve_text(None, &locators.detail_price, |t| t.contains("R$"))
                .await?
                .map(|t| clean_price(&t));
            let price = match shown {
                Some(p) if !p.is_empty() => Some(p),
                _ => soften(self.driver.page_html())?.and_then(|html| json_ld_price(&html)),
            };
            if let Some(price) = price {
                product.price_cash = price;
            }
        }

        let description = self
            .resolver
            .resolve_text(None, &locators.description, |t| !t.is_empty())
            .await?;

        product.apply(extract_attributes(&product.title, description.as_deref(), &self.profile.keywords));
        Ok(true)
    }
}
