//! Harvest settings and site profiles.
//!
//! Settings come from the environment (a `.env` file is honoured by the
//! binaries). Site profiles are built in for the supported marketplaces and
//! can be overridden or extended from a JSON file.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::extract::KeywordTables;
use crate::locator::LocatorChain;
use crate::traversal::TraversalSettings;

pub const DEFAULT_MAX_PAGES: u32 = 50;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read site profiles from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid site profiles file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unknown site '{0}'")]
    UnknownSite(String),
}

/// Randomized pause bounds, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayBand {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayBand {
    pub fn new(a: u64, b: u64) -> Self {
        Self {
            min_ms: a.min(b),
            max_ms: a.max(b),
        }
    }

    pub fn fixed(ms: u64) -> Self {
        Self::new(ms, ms)
    }

    pub fn none() -> Self {
        Self::fixed(0)
    }

    pub fn sample(&self) -> Duration {
        if self.max_ms == 0 {
            return Duration::ZERO;
        }
        let ms = rand::thread_rng().gen_range(self.min_ms..=self.max_ms);
        Duration::from_millis(ms)
    }

    pub async fn pause(&self) {
        let delay = self.sample();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Run-wide settings.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub max_pages: u32,
    pub scroll_cap: u32,
    /// Wait budget for page-level locators in the built-in profiles.
    pub locator_timeout_ms: u64,
    pub interactable_timeout: Duration,
    pub transition_timeout: Duration,
    pub poll_interval: Duration,
    pub scroll_pause: Duration,
    pub page_delay: DelayBand,
    pub seed_delay: DelayBand,
    pub site_delay: DelayBand,
    pub detail_delay: DelayBand,
    /// Detail pages visited per site; 0 disables enrichment.
    pub detail_visit_limit: usize,
    pub sites: Vec<String>,
    pub site_profiles_path: Option<PathBuf>,
    pub headless: bool,
    pub output_path: PathBuf,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            max_pages: DEFAULT_MAX_PAGES,
            scroll_cap: 8,
            locator_timeout_ms: 5000,
            interactable_timeout: Duration::from_millis(25_000),
            transition_timeout: Duration::from_millis(20_000),
            poll_interval: Duration::from_millis(250),
            scroll_pause: Duration::from_millis(800),
            page_delay: DelayBand::new(2000, 4000),
            seed_delay: DelayBand::new(3000, 6000),
            site_delay: DelayBand::fixed(5000),
            detail_delay: DelayBand::new(800, 1600),
            detail_visit_limit: 0,
            sites: Vec::new(),
            site_profiles_path: None,
            headless: true,
            output_path: PathBuf::from("console_products.json"),
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Invalid {}='{}', using default", key, raw);
                default
            }
        },
        None => default,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl HarvestConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; missing or invalid values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let ms = |key: &str, default: Duration| Duration::from_millis(parse_or(&lookup, key, default.as_millis() as u64));

        let max_pages = match lookup("MAX_PAGES_PER_SITE") {
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n >= 1 => n,
                _ => {
                    warn!("MAX_PAGES_PER_SITE='{}' is not a positive integer, using {}", raw, DEFAULT_MAX_PAGES);
                    DEFAULT_MAX_PAGES
                }
            },
            None => DEFAULT_MAX_PAGES,
        };

        let headless = match lookup("HEADLESS") {
            Some(raw) => parse_bool(&raw).unwrap_or_else(|| {
                warn!("Invalid HEADLESS='{}', using default", raw);
                d.headless
            }),
            None => d.headless,
        };

        let sites = lookup("SITES")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            max_pages,
            scroll_cap: parse_or(&lookup, "SCROLL_ATTEMPT_CAP", d.scroll_cap),
            locator_timeout_ms: parse_or(&lookup, "LOCATOR_TIMEOUT_MS", d.locator_timeout_ms),
            interactable_timeout: ms("INTERACTABLE_TIMEOUT_MS", d.interactable_timeout),
            transition_timeout: ms("TRANSITION_TIMEOUT_MS", d.transition_timeout),
            poll_interval: ms("POLL_INTERVAL_MS", d.poll_interval),
            scroll_pause: ms("SCROLL_PAUSE_MS", d.scroll_pause),
            page_delay: DelayBand::new(
                parse_or(&lookup, "PAGE_DELAY_MIN_MS", d.page_delay.min_ms),
                parse_or(&lookup, "PAGE_DELAY_MAX_MS", d.page_delay.max_ms),
            ),
            seed_delay: DelayBand::new(
                parse_or(&lookup, "SEED_DELAY_MIN_MS", d.seed_delay.min_ms),
                parse_or(&lookup, "SEED_DELAY_MAX_MS", d.seed_delay.max_ms),
            ),
            site_delay: DelayBand::fixed(parse_or(&lookup, "SITE_DELAY_MS", d.site_delay.max_ms)),
            detail_delay: DelayBand::new(
                parse_or(&lookup, "DETAIL_DELAY_MIN_MS", d.detail_delay.min_ms),
                parse_or(&lookup, "DETAIL_DELAY_MAX_MS", d.detail_delay.max_ms),
            ),
            detail_visit_limit: parse_or(&lookup, "DETAIL_VISIT_LIMIT", d.detail_visit_limit),
            sites,
            site_profiles_path: lookup("SITE_PROFILES_PATH")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            headless,
            output_path: lookup("OUTPUT_PATH")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(d.output_path),
        }
    }

    pub fn traversal_settings(&self) -> TraversalSettings {
        TraversalSettings {
            max_pages: self.max_pages,
            scroll_cap: self.scroll_cap,
            interactable_timeout: self.interactable_timeout,
            transition_timeout: self.transition_timeout,
            poll_interval: self.poll_interval,
            scroll_pause: self.scroll_pause,
            page_delay: self.page_delay,
        }
    }

    /// Built-in profiles, overridden or extended by `SITE_PROFILES_PATH`,
    /// filtered by `SITES` when set.
    pub fn load_profiles(&self) -> Result<Vec<SiteProfile>, ConfigError> {
        let mut profiles = builtin_profiles(self.locator_timeout_ms);
        if let Some(path) = &self.site_profiles_path {
            for custom in load_profile_file(path)? {
                match profiles.iter_mut().find(|p| p.key == custom.key) {
                    Some(existing) => *existing = custom,
                    None => profiles.push(custom),
                }
            }
        }
        select_profiles(profiles, &self.sites)
    }
}

fn select_profiles(profiles: Vec<SiteProfile>, keys: &[String]) -> Result<Vec<SiteProfile>, ConfigError> {
    if keys.is_empty() {
        return Ok(profiles);
    }
    let mut selected = Vec::with_capacity(keys.len());
    for key in keys {
        let profile = profiles
            .iter()
            .find(|p| &p.key == key)
            .ok_or_else(|| ConfigError::UnknownSite(key.clone()))?;
        selected.push(profile.clone());
    }
    Ok(selected)
}

pub fn load_profile_file(path: &Path) -> Result<Vec<SiteProfile>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&raw)?)
}

// ============================================================================
// Site Profiles
// ============================================================================

/// Locator chains for every logical target the harvester reads.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SiteLocators {
    /// Landmark that must be visible and unobstructed before harvesting.
    pub ready: LocatorChain,
    pub consent: LocatorChain,
    pub container: LocatorChain,
    pub title: LocatorChain,
    pub link: LocatorChain,
    pub price: LocatorChain,
    pub installment: LocatorChain,
    pub image: LocatorChain,
    pub availability: LocatorChain,
    pub next_page: LocatorChain,
    // Detail page
    pub detail_title: LocatorChain,
    pub detail_price: LocatorChain,
    pub description: LocatorChain,
}

/// Regex rewrite applied to image URLs (thumbnail to full size).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageRewrite {
    pub pattern: String,
    pub replacement: String,
}

/// Everything site specific: seeds, locator tables and keyword tables.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteProfile {
    pub key: String,
    pub name: String,
    pub seeds: Vec<String>,
    #[serde(default)]
    pub locators: SiteLocators,
    /// A product link must contain every one of these fragments.
    #[serde(default)]
    pub link_must_contain: Vec<String>,
    #[serde(default)]
    pub keep_query: bool,
    #[serde(default)]
    pub image_rewrite: Option<ImageRewrite>,
    #[serde(default)]
    pub keywords: KeywordTables,
}

const CONSOLE_QUERIES: &[&str] = &[
    "ps5",
    "xbox-series-x",
    "xbox-series-s",
    "nintendo-switch",
    "nintendo-switch-2",
    "switch-2",
];

const IMAGE_SELECTORS: &[&str] = &[
    "img[src*='http']",
    "img[data-src*='http']",
    "img[data-lazy*='http']",
    "img",
    "picture img",
    "[class*='image'] img",
    "[class*='thumb'] img",
    "[class*='product'] img",
];

pub fn mercado_livre(page_timeout_ms: u64) -> SiteProfile {
    SiteProfile {
        key: "mercadolivre".to_string(),
        name: "Mercado Livre".to_string(),
        seeds: CONSOLE_QUERIES
            .iter()
            .map(|q| format!("https://lista.mercadolivre.com.br/{}", q))
            .collect(),
        locators: SiteLocators {
            ready: LocatorChain::of(
                "results",
                &["ol.ui-search-layout", ".ui-search-results", "main"],
                page_timeout_ms,
            ),
            consent: LocatorChain::of(
                "consent",
                &[
                    "button[data-testid='action:understood-button']",
                    "button.cookie-consent-banner-opt-out__action--key-accept",
                ],
                0,
            ),
            container: LocatorChain::new("container")
                .candidate(".ui-search-layout__item", page_timeout_ms)
                .candidate(".ui-search-item", 0)
                .candidate(".ui-search-results__item", 0)
                .candidate("[data-testid='product-item']", 0)
                .candidate(".ui-search-item__wrapper", 0),
            title: LocatorChain::of(
                "title",
                &[
                    "h3.poly-component__title-wrapper",
                    "a.poly-component__title",
                    ".ui-search-item__title",
                    "h2",
                    "h3",
                    "[class*='title']",
                ],
                0,
            ),
            link: LocatorChain::of(
                "link",
                &[
                    "a[href*='/p/']",
                    ".ui-search-link",
                    ".ui-search-item__title a",
                    "a[data-testid='product-link']",
                    "a",
                ],
                0,
            ),
            price: LocatorChain::of(
                "price",
                &[
                    "span.andes-money-amount__fraction",
                    ".andes-money-amount__fraction",
                    ".ui-search-price__part--medium",
                    "[class*='price']",
                ],
                0,
            ),
            installment: LocatorChain::of(
                "installment",
                &[".ui-search-price__second-line, .ui-search-installments", ".poly-price__installments"],
                0,
            ),
            image: LocatorChain::of("image", IMAGE_SELECTORS, 0),
            availability: LocatorChain::of(
                "availability",
                &[".poly-component__shipped-from", ".ui-search-item__shipping"],
                0,
            ),
            next_page: LocatorChain::new("next_page")
                .candidate("li.andes-pagination__button--next a", page_timeout_ms)
                .candidate("li.andes-pagination__button--next", 0)
                .candidate("a[title='Seguinte']", 0)
                .candidate(".andes-pagination__button--next", 0)
                .candidate("a[aria-label='Seguinte']", 0)
                .candidate(".ui-search-pagination__next", 0)
                .candidate("a[data-testid='pagination-next']", 0)
                .candidate("button[aria-label='Seguinte']", 0)
                .candidate(".andes-pagination__arrow--next", 0),
            detail_title: LocatorChain::of("detail_title", &["h1.ui-pdp-title", "h1"], page_timeout_ms),
            detail_price: LocatorChain::of(
                "detail_price",
                &[".ui-pdp-price__second-line .andes-money-amount", "[class*='price']"],
                0,
            ),
            description: LocatorChain::of(
                "description",
                &[".ui-pdp-description__content", "[class*='description']"],
                0,
            ),
        },
        link_must_contain: vec!["mercadolivre.com.br".to_string(), "/p/".to_string()],
        keep_query: false,
        image_rewrite: Some(ImageRewrite {
            pattern: r"-[A-Z]\.jpg".to_string(),
            replacement: "-O.jpg".to_string(),
        }),
        keywords: KeywordTables::default(),
    }
}

pub fn magazine_luiza(page_timeout_ms: u64) -> SiteProfile {
    SiteProfile {
        key: "magazineluiza".to_string(),
        name: "Magazine Luiza".to_string(),
        seeds: CONSOLE_QUERIES
            .iter()
            .map(|q| format!("https://www.magazineluiza.com.br/busca/{}/", q))
            .collect(),
        locators: SiteLocators {
            ready: LocatorChain::of(
                "results",
                &[
                    "ul[data-testid='list']",
                    "[data-testid='product-list']",
                    "section[data-testid='search-results']",
                    "main",
                ],
                page_timeout_ms,
            ),
            consent: LocatorChain::of(
                "consent",
                &[
                    "[data-testid='lgpd-accept-button']",
                    "button[id*='lgpd'][id*='accept']",
                    "button[aria-label*='aceitar' i]",
                    "button[aria-label*='concordo' i]",
                ],
                0,
            ),
            container: LocatorChain::new("container")
                .candidate("[data-testid='product-card-container']", page_timeout_ms)
                .candidate("[data-testid='product-card']", 0)
                .candidate("li:has(a[href*='/produto/'], a[href*='/p/'])", 0),
            title: LocatorChain::of(
                "title",
                &["[data-testid='product-title']", "h2", "[class*='title']", "a"],
                0,
            ),
            link: LocatorChain::of(
                "link",
                &["a[href*='/produto/'], a[href*='/p/']", "a[data-testid='product-card-container']", "a"],
                0,
            ),
            price: LocatorChain::of(
                "price",
                &["[data-testid='price-value']", "[data-testid='price-current']", "[class*='price']", "p"],
                0,
            ),
            installment: LocatorChain::of("installment", &["[data-testid='installment']"], 0),
            image: LocatorChain::of("image", IMAGE_SELECTORS, 0),
            availability: LocatorChain::of("availability", &["[data-testid='product-unavailable']"], 0),
            next_page: LocatorChain::new("next_page")
                .candidate("button[aria-label='Go to next page']", page_timeout_ms)
                .candidate("button[aria-label*='next']", 0)
                .candidate("button[aria-label*='próxima']", 0)
                .candidate(".pagination-next", 0)
                .candidate("[data-testid='pagination-next']", 0),
            detail_title: LocatorChain::of(
                "detail_title",
                &["[data-testid='product-title']", "h1", "[data-testid='Heading'] h1"],
                page_timeout_ms,
            ),
            detail_price: LocatorChain::of(
                "detail_price",
                &[
                    "[data-testid='price-current']",
                    "[data-testid='price-value']",
                    "[class*='price'] [data-testid*='price']",
                    "[class*='price']",
                ],
                0,
            ),
            description: LocatorChain::of(
                "description",
                &[
                    "[data-testid='description']",
                    "[class*='product-description']",
                    "section[id*='descricao']",
                ],
                0,
            ),
        },
        link_must_contain: Vec::new(),
        keep_query: false,
        image_rewrite: None,
        keywords: KeywordTables::default(),
    }
}

pub fn builtin_profiles(page_timeout_ms: u64) -> Vec<SiteProfile> {
    vec![magazine_luiza(page_timeout_ms), mercado_livre(page_timeout_ms)]
}
