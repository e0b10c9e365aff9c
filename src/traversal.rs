//! Listing traversal: one seed URL, one browsing session.
//!
//! ```text
//! Entering -> HarvestingPage(1) -> AdvancingPage(1) -> HarvestingPage(2) ...
//!          \-> Exhausted | Failed
//! ```
//!
//! Failures are absorbed at the lowest level that can handle them. A bad item
//! is skipped, a page that cannot be entered or left ends the run as
//! `Exhausted`, and only a lost session ends it as `Failed`. Products harvested
//! before the terminal state are always returned.

use std::fmt;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::catalog::canonical_link;
use crate::config::{DelayBand, SiteProfile};
use crate::driver::{soften, DriverError, DriverResult, NodeHandle, PageDriver};
use crate::extract::{clean_price, extract_attributes, extract_installment_price};
use crate::locator::{poll_until, Resolver};
use crate::models::Product;
use crate::report::SiteReport;

pub const IMAGE_ATTRIBUTES: &[&str] = &["src", "data-src", "data-lazy", "data-original", "data-lazy-src"];

static PRICE_LIKE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]+[,.][0-9]{2}").unwrap());
static PRICE_IN_TEXT: Lazy<Regex> = Lazy::new(|| Regex::new(r"R\$\s*[0-9][0-9.,]*").unwrap());

/// Minimum title length; shorter matches are badges or labels.
const MIN_TITLE_CHARS: usize = 10;

fn looks_like_title(text: &str) -> bool {
    text.chars().count() > MIN_TITLE_CHARS
}

fn looks_like_price(text: &str) -> bool {
    text.contains("R$") || PRICE_LIKE.is_match(text) || text.chars().any(|c| c.is_ascii_digit())
}

/// Timing and bounds for one traversal.
#[derive(Debug, Clone)]
pub struct TraversalSettings {
    pub max_pages: u32,
    pub scroll_cap: u32,
    pub interactable_timeout: Duration,
    pub transition_timeout: Duration,
    pub poll_interval: Duration,
    pub scroll_pause: Duration,
    pub page_delay: DelayBand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustReason {
    NoNextControl,
    TransitionTimeout,
    PageCap,
    NotInteractable,
}

impl fmt::Display for ExhaustReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ExhaustReason::NoNextControl => "no next control",
            ExhaustReason::TransitionTimeout => "page transition timed out",
            ExhaustReason::PageCap => "page cap reached",
            ExhaustReason::NotInteractable => "listing not interactable",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TraversalState {
    Entering,
    HarvestingPage(u32),
    AdvancingPage(u32),
    Exhausted(ExhaustReason),
    Failed(String),
}

impl TraversalState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TraversalState::Exhausted(_) | TraversalState::Failed(_))
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    Exhausted(ExhaustReason),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub products: Vec<Product>,
    /// Pages on which at least one item container was found.
    pub pages_harvested: u32,
    pub terminal: Terminal,
}

/// Transient state of one listing traversal.
#[derive(Debug, Clone)]
pub struct PaginationState {
    pub current_page: u32,
    pub max_pages: u32,
    pub last_seen_item_count: usize,
    pub sentinel: Option<NodeHandle>,
}

impl PaginationState {
    pub fn new(max_pages: u32) -> Self {
        Self {
            current_page: 1,
            max_pages: max_pages.max(1),
            last_seen_item_count: 0,
            sentinel: None,
        }
    }

    pub fn at_cap(&self) -> bool {
        self.current_page >= self.max_pages
    }

    fn advanced(&mut self) {
        self.current_page += 1;
        self.sentinel = None;
        self.last_seen_item_count = 0;
    }
}

enum Advance {
    Moved,
    NoControl,
    TimedOut,
}

pub struct TraversalEngine<'a, D: PageDriver> {
    resolver: Resolver<'a, D>,
    driver: &'a D,
    profile: &'a SiteProfile,
    settings: &'a TraversalSettings,
    report: &'a SiteReport<'a>,
    image_rewrite: Option<(Regex, String)>,
}

impl<'a, D: PageDriver> TraversalEngine<'a, D> {
    pub fn new(driver: &'a D, profile: &'a SiteProfile, settings: &'a TraversalSettings, report: &'a SiteReport<'a>) -> Self {
        let image_rewrite = profile.image_rewrite.as_ref().and_then(|rw| match Regex::new(&rw.pattern) {
            Ok(re) => Some((re, rw.replacement.clone())),
            Err(e) => {
                warn!(site = %profile.name, "Ignoring invalid image rewrite pattern: {}", e);
                None
            }
        });

        Self {
            resolver: Resolver::new(driver, settings.poll_interval),
            driver,
            profile,
            settings,
            report,
            image_rewrite,
        }
    }

    /// Traverse the listing at `seed_url` until a terminal state.
    pub async fn run(&self, seed_url: &str) -> RunOutcome {
        let mut pagination = PaginationState::new(self.settings.max_pages);
        let mut products = Vec::new();
        let mut pages_harvested = 0;
        let mut state = TraversalState::Entering;

        // Entering, then one harvest and one advance per page.
        let step_limit = 1 + 2 * pagination.max_pages as usize;
        let mut steps = 0;

        while !state.is_terminal() {
            if steps == step_limit {
                state = TraversalState::Exhausted(ExhaustReason::PageCap);
                break;
            }
            steps += 1;

            state = match state {
                TraversalState::Entering => match self.enter(seed_url).await {
                    Ok(true) => TraversalState::HarvestingPage(1),
                    Ok(false) => {
                        self.report.page_failed(1, &ExhaustReason::NotInteractable.to_string());
                        TraversalState::Exhausted(ExhaustReason::NotInteractable)
                    }
                    Err(e) => TraversalState::Failed(e.to_string()),
                },
                TraversalState::HarvestingPage(n) => match self.harvest_page(n, seed_url, &mut pagination).await {
                    Ok(Some(mut page_products)) => {
                        pages_harvested += 1;
                        self.report.page_harvested(n, page_products.len());
                        products.append(&mut page_products);
                        TraversalState::AdvancingPage(n)
                    }
                    // Page-level failure, already reported: still try the next page.
                    Ok(None) => TraversalState::AdvancingPage(n),
                    Err(e) => TraversalState::Failed(e.to_string()),
                },
                TraversalState::AdvancingPage(n) => {
                    if pagination.at_cap() {
                        TraversalState::Exhausted(ExhaustReason::PageCap)
                    } else {
                        match self.advance(&mut pagination).await {
                            Ok(Advance::Moved) => {
                                self.settings.page_delay.pause().await;
                                TraversalState::HarvestingPage(n + 1)
                            }
                            Ok(Advance::NoControl) => TraversalState::Exhausted(ExhaustReason::NoNextControl),
                            Ok(Advance::TimedOut) => TraversalState::Exhausted(ExhaustReason::TransitionTimeout),
                            Err(e) => TraversalState::Failed(e.to_string()),
                        }
                    }
                }
                terminal => terminal,
            };
        }

        let terminal = match state {
            TraversalState::Failed(reason) => {
                self.report.session_failed(&reason);
                Terminal::Failed(reason)
            }
            TraversalState::Exhausted(reason) => {
                self.report.exhausted(pagination.current_page, &reason.to_string());
                Terminal::Exhausted(reason)
            }
            _ => Terminal::Exhausted(ExhaustReason::PageCap),
        };

        RunOutcome {
            products,
            pages_harvested,
            terminal,
        }
    }

    /// Load the seed, clear consent overlays and wait for an unobstructed listing.
    async fn enter(&self, seed_url: &str) -> DriverResult<bool> {
        if soften(self.driver.navigate(seed_url))?.is_none() {
            warn!(site = %self.report.site(), url = seed_url, "Navigation failed");
            return Ok(false);
        }

        self.dismiss_consent().await?;

        let locators = &self.profile.locators;
        if locators.ready.is_empty() {
            return Ok(true);
        }
        self.resolver
            .wait_until_interactable(&locators.ready, self.settings.interactable_timeout)
            .await
    }

    /// Best effort: click the first visible consent button, if any.
    async fn dismiss_consent(&self) -> DriverResult<()> {
        let clicked = self
            .resolver
            .resolve_any_with(None, &self.profile.locators.consent, |driver, node| {
                if driver.is_actionable(node)? {
                    driver.click(node)?;
                    Ok(Some(()))
                } else {
                    Ok(None)
                }
            })
            .await?;
        if clicked.is_some() {
            self.report.consent_dismissed();
            sleep(Duration::from_millis(200)).await;
        }
        Ok(())
    }

    /// Scroll until the container count holds across two scrolls or the cap is hit.
    async fn settle_lazy_load(&self, pagination: &mut PaginationState) -> DriverResult<()> {
        let containers = &self.profile.locators.container;
        let mut last = self.resolver.count_now(containers)?;

        for attempt in 0..self.settings.scroll_cap {
            soften(self.driver.scroll_to_bottom())?;
            if !self.settings.scroll_pause.is_zero() {
                sleep(self.settings.scroll_pause).await;
            }

            let count = self.resolver.count_now(containers)?;
            debug!(attempt, count, "Lazy-load scroll");
            if count == last {
                break;
            }
            last = count;
        }

        pagination.last_seen_item_count = last;
        Ok(())
    }

    /// `Ok(None)` when the page shows no item containers.
    async fn harvest_page(
        &self,
        page: u32,
        seed_url: &str,
        pagination: &mut PaginationState,
    ) -> DriverResult<Option<Vec<Product>>> {
        self.settle_lazy_load(pagination).await?;

        let containers = self
            .resolver
            .resolve(None, &self.profile.locators.container)
            .await?
            .into_nodes();
        if containers.is_empty() {
            self.report.page_failed(page, "no item containers");
            return Ok(None);
        }
        info!(site = %self.report.site(), page, containers = containers.len(), "Harvesting page");

        let mut products = Vec::with_capacity(containers.len());
        for (i, container) in containers.iter().enumerate() {
            match self.extract_item(container, seed_url).await {
                Ok(Some(product)) => products.push(product),
                Ok(None) => self.report.item_skipped(page, &format!("item {} has no title", i + 1)),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => self.report.item_skipped(page, &format!("item {}: {}", i + 1, e)),
            }
        }
        Ok(Some(products))
    }

    /// Read one container into a product. `Ok(None)` when it carries no title.
    pub async fn extract_item(&self, container: &NodeHandle, seed_url: &str) -> DriverResult<Option<Product>> {
        let locators = &self.profile.locators;
        let scope = Some(container);
        let mut product = Product::new(&self.profile.name, seed_url);

        let mut raw_link = self
            .resolver
            .resolve_attribute(scope, &locators.link, &["href"], |v| !v.is_empty())
            .await?;
        if raw_link.is_none() {
            // The container itself may be the anchor.
            raw_link = soften(self.driver.attribute(container, "href"))?.flatten();
        }
        if let Some(link) = raw_link.as_deref().and_then(|raw| canonical_link(raw, self.profile.keep_query)) {
            if self.profile.link_must_contain.iter().all(|frag| link.contains(frag.as_str())) {
                product.canonical_link = link;
            }
        }

        let mut title = self.resolver.resolve_text(scope, &locators.title, looks_like_title).await?;
        if title.is_none() {
            title = self.resolver.resolve_text(scope, &locators.link, |t| !t.is_empty()).await?;
        }
        let Some(title) = title else {
            return Ok(None);
        };
        product.title = title;

        match self.resolver.resolve_text(scope, &locators.price, looks_like_price).await? {
            Some(price) => product.price_cash = clean_price(&price),
            None => {
                let text = self.driver.text(container)?;
                if let Some(m) = PRICE_IN_TEXT.find(&text) {
                    product.price_cash = clean_price(m.as_str());
                }
            }
        }

        product.price_installment = self
            .resolver
            .resolve_text(scope, &locators.installment, |t| t.chars().any(|c| c.is_ascii_digit()))
            .await?
            .and_then(|text| extract_installment_price(&text));

        product.image_url = self.image_url(container).await?;

        product.availability = self
            .resolver
            .resolve_text(scope, &locators.availability, |t| !t.is_empty())
            .await?;

        product.apply(extract_attributes(&product.title, None, &self.profile.keywords));
        Ok(Some(product))
    }

    async fn image_url(&self, container: &NodeHandle) -> DriverResult<Option<String>> {
        let url = self
            .resolver
            .resolve_attribute(Some(container), &self.profile.locators.image, IMAGE_ATTRIBUTES, |v| {
                v.starts_with("http")
            })
            .await?;

        Ok(url.map(|u| match &self.image_rewrite {
            Some((re, replacement)) => re.replace_all(&u, replacement.as_str()).into_owned(),
            None => u,
        }))
    }

    /// Activate the next-page control and wait for the listing to change.
    async fn advance(&self, pagination: &mut PaginationState) -> DriverResult<Advance> {
        pagination.sentinel = self.resolver.first_now(&self.profile.locators.container)?;
        let before_url = self.driver.current_url().unwrap_or_default();

        let clicked = self
            .resolver
            .resolve_any_with(None, &self.profile.locators.next_page, |driver, node| {
                if !driver.is_actionable(node)? {
                    return Ok(None);
                }
                driver.click(node)?;
                Ok(Some(()))
            })
            .await?;
        if clicked.is_none() {
            info!(site = %self.report.site(), page = pagination.current_page, "No enabled next-page control");
            return Ok(Advance::NoControl);
        }

        let sentinel = pagination.sentinel.clone();
        let moved = poll_until(self.settings.transition_timeout, self.settings.poll_interval, || {
            if let Some(node) = &sentinel {
                match self.driver.is_attached(node) {
                    Ok(false) | Err(DriverError::Detached(_)) => return Ok(true),
                    Err(e) if e.is_fatal() => return Err(e),
                    _ => {}
                }
            }
            let url = self.driver.current_url()?;
            Ok(url != before_url && self.driver.ready_state()? == "complete")
        })
        .await?;

        if !moved {
            warn!(site = %self.report.site(), page = pagination.current_page, "Page transition timed out");
            return Ok(Advance::TimedOut);
        }
        pagination.advanced();
        Ok(Advance::Moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteLocators;
    use crate::extract::KeywordTables;
    use crate::fake_driver::{product_card, FakeDriver, FakeNode, FakePage};
    use crate::locator::LocatorChain;
    use crate::models::{ModelVariant, TriState};
    use crate::report::RunReporter;
    use proptest::prelude::*;

    fn profile() -> SiteProfile {
        SiteProfile {
            key: "shop".to_string(),
            name: "Test Shop".to_string(),
            seeds: vec![url(0)],
            locators: SiteLocators {
                ready: LocatorChain::of("ready", &["main"], 0),
                consent: LocatorChain::of("consent", &["#lgpd-accept"], 0),
                container: LocatorChain::of("container", &[".card"], 0),
                title: LocatorChain::of("title", &["h2"], 0),
                link: LocatorChain::of("link", &["a"], 0),
                price: LocatorChain::of("price", &[".price"], 0),
                installment: LocatorChain::of("installment", &[".installments"], 0),
                image: LocatorChain::of("image", &["img"], 0),
                availability: LocatorChain::of("availability", &[".stock"], 0),
                next_page: LocatorChain::of("next", &["a.next-disabled-first", "a.next"], 0),
                ..Default::default()
            },
            link_must_contain: Vec::new(),
            keep_query: false,
            image_rewrite: None,
            keywords: KeywordTables::default(),
        }
    }

    fn settings(max_pages: u32) -> TraversalSettings {
        TraversalSettings {
            max_pages,
            scroll_cap: 8,
            interactable_timeout: Duration::from_millis(30),
            transition_timeout: Duration::from_millis(30),
            poll_interval: Duration::from_millis(5),
            scroll_pause: Duration::ZERO,
            page_delay: DelayBand::none(),
        }
    }

    fn url(page: usize) -> String {
        format!("https://shop.test/busca/ps5?page={}", page + 1)
    }

    /// Listing page `index` with `items` cards and a next link to `next`.
    fn listing(index: usize, items: usize, next: Option<usize>) -> FakePage {
        let cards = (0..items)
            .map(|i| {
                product_card(
                    &format!("Console PS5 Slim 1TB Branco item {}-{}", index, i),
                    &format!("https://shop.test/produto/{}-{}/", index, i),
                    "R$ 3.799,90",
                )
            })
            .collect();
        let mut page = FakePage::new(&url(index)).with("main", vec![FakeNode::new("")]).with(".card", cards);
        if let Some(next) = next {
            page = page.with("a.next", vec![FakeNode::new("Seguinte").goto(next)]);
        }
        page
    }

    fn chain_of_pages(n: usize) -> Vec<FakePage> {
        (0..n).map(|i| listing(i, 3, (i + 1 < n).then_some(i + 1))).collect()
    }

    async fn run(driver: &FakeDriver, profile: &SiteProfile, settings: &TraversalSettings) -> RunOutcome {
        let run = RunReporter::new();
        let report = run.for_site(&profile.name);
        TraversalEngine::new(driver, profile, settings, &report).run(&url(0)).await
    }

    #[tokio::test]
    async fn test_walks_every_page_until_no_next_control() {
        let driver = FakeDriver::new(chain_of_pages(3));
        let outcome = run(&driver, &profile(), &settings(50)).await;

        assert_eq!(outcome.pages_harvested, 3);
        assert_eq!(outcome.products.len(), 9);
        assert_eq!(outcome.terminal, Terminal::Exhausted(ExhaustReason::NoNextControl));
        assert_eq!(outcome.products[0].canonical_link, "https://shop.test/produto/0-0");
        assert_eq!(outcome.products[8].source_url, url(0));
    }

    #[tokio::test]
    async fn test_page_cap_forces_exhaustion() {
        let driver = FakeDriver::new(chain_of_pages(5));
        let outcome = run(&driver, &profile(), &settings(2)).await;

        assert_eq!(outcome.pages_harvested, 2);
        assert_eq!(outcome.terminal, Terminal::Exhausted(ExhaustReason::PageCap));
        assert_eq!(driver.clicks(), 1);
    }

    #[tokio::test]
    async fn test_disabled_next_controls_are_skipped() {
        let mut pages = chain_of_pages(2);
        pages[0] = pages[0].clone().with(
            "a.next-disabled-first",
            vec![
                FakeNode::new("Seguinte").attr("class", "andes-pagination__button--disabled").goto(1),
                FakeNode::new("Seguinte").attr("aria-disabled", "true").goto(1),
                FakeNode::new("Seguinte").hidden().goto(1),
            ],
        );
        let driver = FakeDriver::new(pages);
        let outcome = run(&driver, &profile(), &settings(50)).await;

        // Falls through to the enabled `a.next` candidate.
        assert_eq!(outcome.pages_harvested, 2);
        assert_eq!(driver.clicks(), 1);
    }

    #[tokio::test]
    async fn test_only_disabled_control_means_exhausted() {
        let page = listing(0, 2, None).with("a.next", vec![FakeNode::new("Seguinte").disabled().goto(0)]);
        let driver = FakeDriver::new(vec![page]);
        let outcome = run(&driver, &profile(), &settings(50)).await;

        assert_eq!(outcome.pages_harvested, 1);
        assert_eq!(outcome.products.len(), 2);
        assert_eq!(outcome.terminal, Terminal::Exhausted(ExhaustReason::NoNextControl));
        assert_eq!(driver.clicks(), 0);
    }

    #[tokio::test]
    async fn test_dead_next_control_times_out() {
        let page = listing(0, 2, None).with("a.next", vec![FakeNode::new("Seguinte")]);
        let driver = FakeDriver::new(vec![page]);
        let outcome = run(&driver, &profile(), &settings(50)).await;

        assert_eq!(outcome.terminal, Terminal::Exhausted(ExhaustReason::TransitionTimeout));
        assert_eq!(outcome.products.len(), 2);
    }

    #[tokio::test]
    async fn test_overlay_blocks_entry() {
        let page = listing(0, 2, None).overlay();
        let driver = FakeDriver::new(vec![page]);
        let outcome = run(&driver, &profile(), &settings(50)).await;

        assert_eq!(outcome.pages_harvested, 0);
        assert!(outcome.products.is_empty());
        assert_eq!(outcome.terminal, Terminal::Exhausted(ExhaustReason::NotInteractable));
    }

    #[tokio::test]
    async fn test_consent_button_clears_overlay() {
        let page = listing(0, 2, None)
            .overlay()
            .with("#lgpd-accept", vec![FakeNode::new("Aceitar").dismisses_overlay()]);
        let driver = FakeDriver::new(vec![page]);
        let outcome = run(&driver, &profile(), &settings(50)).await;

        assert_eq!(outcome.pages_harvested, 1);
        assert_eq!(outcome.products.len(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_seed_is_page_failure() {
        let driver = FakeDriver::new(Vec::new());
        let outcome = run(&driver, &profile(), &settings(50)).await;
        assert_eq!(outcome.terminal, Terminal::Exhausted(ExhaustReason::NotInteractable));
    }

    #[tokio::test]
    async fn test_broken_item_is_skipped() {
        let page = FakePage::new(&url(0)).with("main", vec![FakeNode::new("")]).with(
            ".card",
            vec![
                product_card("Console Xbox Series X 1TB", "https://shop.test/produto/x/", "R$ 4.199,00"),
                FakeNode::new("").child("h2", FakeNode::new("Console PS5 quebrado").broken()),
                FakeNode::new("").child(".price", FakeNode::new("R$ 10,00")),
                product_card("Nintendo Switch 2 Mario Kart World", "https://shop.test/produto/s2/", "R$ 4.499,90"),
            ],
        );
        let driver = FakeDriver::new(vec![page]);
        let outcome = run(&driver, &profile(), &settings(50)).await;

        let titles: Vec<_> = outcome.products.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["Console Xbox Series X 1TB", "Nintendo Switch 2 Mario Kart World"]);
        assert_eq!(outcome.products[0].price_cash, "4199.00");
    }

    #[tokio::test]
    async fn test_session_loss_keeps_earlier_pages() {
        let mut pages = chain_of_pages(3);
        pages[1] = pages[1].clone().loses_session();
        let driver = FakeDriver::new(pages);
        let outcome = run(&driver, &profile(), &settings(50)).await;

        assert!(matches!(outcome.terminal, Terminal::Failed(_)));
        assert_eq!(outcome.pages_harvested, 1);
        assert_eq!(outcome.products.len(), 3);
    }

    #[tokio::test]
    async fn test_lazy_items_are_revealed_by_scrolling() {
        let cards = (0..6)
            .map(|i| {
                product_card(&format!("Console PS5 Pro 2TB lote {}", i), &format!("https://shop.test/produto/{}", i), "R$ 6.999,00")
                    .after_scrolls(i / 2)
            })
            .collect();
        let page = FakePage::new(&url(0)).with("main", vec![FakeNode::new("")]).with(".card", cards);
        let driver = FakeDriver::new(vec![page]);
        let outcome = run(&driver, &profile(), &settings(50)).await;

        assert_eq!(outcome.products.len(), 6);
        assert!(driver.scrolls() <= 8);
        assert!(outcome.products.iter().all(|p| p.model_variant == ModelVariant::Pro));
    }

    #[tokio::test]
    async fn test_scroll_cap_bounds_endless_lazy_load() {
        let cards = (0..40)
            .map(|i| product_card(&format!("Console PS5 Slim edição {}", i), &format!("https://shop.test/produto/{}", i), "R$ 1,00").after_scrolls(i))
            .collect();
        let page = FakePage::new(&url(0)).with("main", vec![FakeNode::new("")]).with(".card", cards);
        let driver = FakeDriver::new(vec![page]);
        let outcome = run(&driver, &profile(), &settings(50)).await;

        assert_eq!(driver.scrolls(), 8);
        assert_eq!(outcome.products.len(), 9);
    }

    #[tokio::test]
    async fn test_item_fields_are_extracted() {
        let card = product_card(
            "PS5 Slim Digital Edition 1TB Branco com Controle DualSense - Horizon Forbidden West",
            "https://click.shop.test/redirect?url=https%3A%2F%2Fshop.test%2Fproduto%2Fps5%2F%3Fref%3Dads",
            "R$ 3.799,90",
        )
        .child(".installments", FakeNode::new("em 10x R$ 379,99 sem juros"))
        .child("img", FakeNode::new("").attr("data-src", "https://img.test/ps5-I.jpg"))
        .child(".stock", FakeNode::new("Chegará grátis amanhã"));
        let page = FakePage::new(&url(0)).with("main", vec![FakeNode::new("")]).with(".card", vec![card]);
        let driver = FakeDriver::new(vec![page]);

        let mut profile = profile();
        profile.image_rewrite = Some(crate::config::ImageRewrite {
            pattern: r"-[A-Z]\.jpg".to_string(),
            replacement: "-O.jpg".to_string(),
        });
        let outcome = run(&driver, &profile, &settings(50)).await;
        let p = &outcome.products[0];

        assert_eq!(p.canonical_link, "https://shop.test/produto/ps5");
        assert_eq!(p.price_cash, "3799.90");
        assert_eq!(p.price_installment.as_deref(), Some("379.99"));
        assert_eq!(p.image_url.as_deref(), Some("https://img.test/ps5-O.jpg"));
        assert_eq!(p.availability.as_deref(), Some("Chegará grátis amanhã"));
        assert_eq!(p.model_variant, ModelVariant::Slim);
        assert_eq!(p.storage_capacity, "1 TB");
        assert_eq!(p.color.as_deref(), Some("Branco"));
        assert_eq!(p.bundled_controllers, TriState::Yes);
        assert_eq!(p.bundled_games, vec!["Horizon Forbidden West"]);
        assert_eq!(p.source_site, "Test Shop");
    }

    #[tokio::test]
    async fn test_links_failing_site_filter_are_blanked() {
        let page = FakePage::new(&url(0)).with("main", vec![FakeNode::new("")]).with(
            ".card",
            vec![
                product_card("Console PS5 Standard 825GB", "https://shop.test/p/ps5", "R$ 3.500,00"),
                product_card("Console PS5 anúncio patrocinado", "https://ads.test/banner", "R$ 3.500,00"),
            ],
        );
        let driver = FakeDriver::new(vec![page]);
        let mut profile = profile();
        profile.link_must_contain = vec!["shop.test".to_string(), "/p/".to_string()];
        let outcome = run(&driver, &profile, &settings(50)).await;

        assert_eq!(outcome.products[0].canonical_link, "https://shop.test/p/ps5");
        assert!(outcome.products[1].canonical_link.is_empty());
    }

    #[tokio::test]
    async fn test_empty_page_still_advances() {
        let pages = vec![listing(0, 1, Some(1)), listing(1, 0, Some(2)), listing(2, 1, None)];
        let driver = FakeDriver::new(pages);
        let outcome = run(&driver, &profile(), &settings(50)).await;

        assert_eq!(outcome.products.len(), 2);
        assert_eq!(outcome.products[1].canonical_link, "https://shop.test/produto/2-0");
        assert_eq!(outcome.pages_harvested, 2);
        assert_eq!(driver.clicks(), 2);
        assert_eq!(outcome.terminal, Terminal::Exhausted(ExhaustReason::NoNextControl));
    }

    #[tokio::test]
    async fn test_url_change_waits_for_complete_ready_state() {
        // No containers on the first page, so only the URL and readyState signal the transition.
        let pages = vec![listing(0, 0, Some(1)), listing(1, 2, None).ready_state("loading")];
        let driver = FakeDriver::new(pages);
        let outcome = run(&driver, &profile(), &settings(50)).await;

        assert_eq!(outcome.terminal, Terminal::Exhausted(ExhaustReason::TransitionTimeout));
        assert_eq!(outcome.pages_harvested, 0);
        assert!(outcome.products.is_empty());
    }

    #[tokio::test]
    async fn test_title_and_link_fallbacks() {
        let page = FakePage::new(&url(0)).with("main", vec![FakeNode::new("")]).with(
            ".card",
            vec![
                FakeNode::new("")
                    .child("a", FakeNode::new("Console PS5 Slim 1TB Branco").attr("href", "https://shop.test/produto/1/")),
                FakeNode::new("")
                    .attr("href", "https://shop.test/produto/2/")
                    .child("h2", FakeNode::new("Console Xbox Series S 512GB")),
            ],
        );
        let driver = FakeDriver::new(vec![page]);
        let outcome = run(&driver, &profile(), &settings(50)).await;

        assert_eq!(outcome.products[0].title, "Console PS5 Slim 1TB Branco");
        assert_eq!(outcome.products[0].canonical_link, "https://shop.test/produto/1");
        assert_eq!(outcome.products[1].canonical_link, "https://shop.test/produto/2");
    }

    #[test]
    fn test_pagination_state_cap() {
        let mut state = PaginationState::new(2);
        state.sentinel = Some(NodeHandle::new("7"));
        assert!(!state.at_cap());
        state.advanced();
        assert!(state.at_cap());
        assert!(state.sentinel.is_none());
        assert_eq!(PaginationState::new(0).max_pages, 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn test_traversal_terminates_within_cap(pages in 1usize..6, cap in 1u32..6, loop_back in any::<bool>()) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
            let mut listing_pages = chain_of_pages(pages);
            if loop_back {
                // Last page links back to the first: pagination loop.
                let last = pages - 1;
                listing_pages[last] = listing(last, 3, Some(0));
            }
            let driver = FakeDriver::new(listing_pages);
            let outcome = rt.block_on(run(&driver, &profile(), &settings(cap)));

            prop_assert!(outcome.pages_harvested <= cap);
            prop_assert!(matches!(outcome.terminal, Terminal::Exhausted(_)));
            if loop_back {
                prop_assert_eq!(outcome.pages_harvested, cap);
            } else {
                prop_assert_eq!(outcome.pages_harvested, cap.min(pages as u32));
            }
        }
    }
}
