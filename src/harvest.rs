//! Sequential orchestration across sites and seed URLs.
//!
//! Each site gets its own browsing session, opened through a
//! [`SessionFactory`] and dropped (closing the browser) when the site is done.
//! A lost session ends that site only; the remaining sites still run.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{HarvestConfig, SiteProfile};
use crate::detail::DetailEnricher;
use crate::driver::PageDriver;
use crate::models::Product;
use crate::report::{RunReporter, SiteReport};
use crate::traversal::{Terminal, TraversalEngine};

/// Opens one browsing session per site.
pub trait SessionFactory {
    type Driver: PageDriver;

    fn open(&mut self, profile: &SiteProfile) -> anyhow::Result<Self::Driver>;
}

impl<T: SessionFactory + ?Sized> SessionFactory for &mut T {
    type Driver = T::Driver;

    fn open(&mut self, profile: &SiteProfile) -> anyhow::Result<Self::Driver> {
        (**self).open(profile)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SiteSummary {
    pub site: String,
    pub seeds_visited: usize,
    pub pages_harvested: u32,
    pub products: usize,
    pub details_enriched: usize,
    pub session_error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct HarvestReport {
    /// Every record in harvest order, duplicates included.
    pub products: Vec<Product>,
    pub sites: Vec<SiteSummary>,
}

pub struct Harvester<'a, F: SessionFactory> {
    factory: F,
    config: &'a HarvestConfig,
    reporter: &'a RunReporter,
}

impl<'a, F: SessionFactory> Harvester<'a, F> {
    pub fn new(factory: F, config: &'a HarvestConfig, reporter: &'a RunReporter) -> Self {
        Self {
            factory,
            config,
            reporter,
        }
    }

    pub async fn run(&mut self, profiles: &[SiteProfile]) -> HarvestReport {
        let mut report = HarvestReport::default();

        for (i, profile) in profiles.iter().enumerate() {
            let (mut products, summary) = self.harvest_site(profile).await;
            report.products.append(&mut products);
            report.sites.push(summary);

            if i + 1 < profiles.len() {
                self.config.site_delay.pause().await;
            }
        }

        info!(
            run_id = %self.reporter.run_id(),
            sites = report.sites.len(),
            products = report.products.len(),
            "Harvest finished"
        );
        report
    }

    async fn harvest_site(&mut self, profile: &SiteProfile) -> (Vec<Product>, SiteSummary) {
        let site = self.reporter.for_site(&profile.name);
        site.site_started();
        let mut summary = SiteSummary {
            site: profile.name.clone(),
            ..Default::default()
        };

        let driver = match self.factory.open(profile) {
            Ok(driver) => driver,
            Err(e) => {
                let reason = format!("could not open session: {:#}", e);
                site.session_failed(&reason);
                summary.session_error = Some(reason);
                site.site_finished(0);
                return (Vec::new(), summary);
            }
        };

        let settings = self.config.traversal_settings();
        let mut products = Vec::new();
        {
            let engine = TraversalEngine::new(&driver, profile, &settings, &site);
            for (i, seed) in profile.seeds.iter().enumerate() {
                site.seed_started(seed);
                let mut outcome = engine.run(seed).await;
                summary.seeds_visited += 1;
                summary.pages_harvested += outcome.pages_harvested;
                products.append(&mut outcome.products);

                if let Terminal::Failed(reason) = outcome.terminal {
                    warn!(site = %profile.name, url = %seed, "Abandoning site after session failure");
                    summary.session_error = Some(reason);
                    break;
                }
                if i + 1 < profile.seeds.len() {
                    self.config.seed_delay.pause().await;
                }
            }
        }

        if summary.session_error.is_none() && self.config.detail_visit_limit > 0 {
            let enriched = self.enrich_details(&driver, profile, &site, &mut products, &mut summary).await;
            summary.details_enriched = enriched;
        }

        // Closes the session before the next site starts.
        drop(driver);

        summary.products = products.len();
        site.site_finished(products.len());
        (products, summary)
    }

    async fn enrich_details(
        &self,
        driver: &F::Driver,
        profile: &SiteProfile,
        site: &SiteReport<'_>,
        products: &mut [Product],
        summary: &mut SiteSummary,
    ) -> usize {
        let enricher = DetailEnricher::new(driver, profile, self.config.poll_interval);
        let mut visited = HashSet::new();
        let mut enriched = 0;

        for product in products.iter_mut() {
            if visited.len() >= self.config.detail_visit_limit {
                break;
            }
            if product.canonical_link.is_empty() || !visited.insert(product.canonical_link.clone()) {
                continue;
            }
            if visited.len() > 1 {
                self.config.detail_delay.pause().await;
            }

            match enricher.enrich(product).await {
                Ok(ok) => {
                    site.detail_visited(&product.canonical_link, ok);
                    if ok {
                        enriched += 1;
                    }
                }
                Err(e) => {
                    site.session_failed(&e.to_string());
                    summary.session_error = Some(e.to_string());
                    break;
                }
            }
        }
        enriched
    }
}
