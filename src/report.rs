//! Run-scoped reporting.
//!
//! A `RunReporter` lives for one harvest invocation. Components receive a
//! `SiteReport` bound to the site they work on; every event goes to `tracing`
//! and is kept for the end-of-run summary.

use std::cell::RefCell;

use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    SiteStarted { site: String },
    SeedStarted { site: String, url: String },
    PageHarvested { site: String, page: u32, items: usize },
    ItemSkipped { site: String, page: u32, reason: String },
    ConsentDismissed { site: String },
    PageFailed { site: String, page: u32, reason: String },
    Exhausted { site: String, page: u32, reason: String },
    SessionFailed { site: String, reason: String },
    DetailVisited { site: String, url: String, enriched: bool },
    SiteFinished { site: String, products: usize },
}

#[derive(Debug)]
pub struct RunReporter {
    run_id: Uuid,
    events: RefCell<Vec<RunEvent>>,
}

impl Default for RunReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl RunReporter {
    pub fn new() -> Self {
        let run_id = Uuid::new_v4();
        info!(%run_id, "Harvest run started");
        Self {
            run_id,
            events: RefCell::new(Vec::new()),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn for_site(&self, site: &str) -> SiteReport<'_> {
        SiteReport {
            run: self,
            site: site.to_string(),
        }
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events.borrow().clone()
    }

    fn record(&self, event: RunEvent) {
        self.events.borrow_mut().push(event);
    }

    /// Number of recorded session failures.
    pub fn session_failures(&self) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|e| matches!(e, RunEvent::SessionFailed { .. }))
            .count()
    }
}

/// Reporter view bound to one site.
#[derive(Debug)]
pub struct SiteReport<'a> {
    run: &'a RunReporter,
    site: String,
}

impl SiteReport<'_> {
    pub fn site(&self) -> &str {
        &self.site
    }

    pub fn site_started(&self) {
        info!(run_id = %self.run.run_id, site = %self.site, "Site started");
        self.run.record(RunEvent::SiteStarted { site: self.site.clone() });
    }

    pub fn seed_started(&self, url: &str) {
        info!(run_id = %self.run.run_id, site = %self.site, url, "Processing seed URL");
        self.run.record(RunEvent::SeedStarted {
            site: self.site.clone(),
            url: url.to_string(),
        });
    }

    pub fn consent_dismissed(&self) {
        debug!(site = %self.site, "Consent overlay dismissed");
        self.run.record(RunEvent::ConsentDismissed { site: self.site.clone() });
    }

    pub fn page_harvested(&self, page: u32, items: usize) {
        info!(run_id = %self.run.run_id, site = %self.site, page, items, "Page harvested");
        self.run.record(RunEvent::PageHarvested {
            site: self.site.clone(),
            page,
            items,
        });
    }

    pub fn item_skipped(&self, page: u32, reason: &str) {
        debug!(site = %self.site, page, reason, "Item skipped");
        self.run.record(RunEvent::ItemSkipped {
            site: self.site.clone(),
            page,
            reason: reason.to_string(),
        });
    }

    pub fn page_failed(&self, page: u32, reason: &str) {
        warn!(run_id = %self.run.run_id, site = %self.site, page, reason, "Page failed");
        self.run.record(RunEvent::PageFailed {
            site: self.site.clone(),
            page,
            reason: reason.to_string(),
        });
    }

    pub fn exhausted(&self, page: u32, reason: &str) {
        info!(run_id = %self.run.run_id, site = %self.site, page, reason, "Traversal exhausted");
        self.run.record(RunEvent::Exhausted {
            site: self.site.clone(),
            page,
            reason: reason.to_string(),
        });
    }

    pub fn session_failed(&self, reason: &str) {
        error!(run_id = %self.run.run_id, site = %self.site, reason, "Browsing session failed");
        self.run.record(RunEvent::SessionFailed {
            site: self.site.clone(),
            reason: reason.to_string(),
        });
    }

    pub fn detail_visited(&self, url: &str, enriched: bool) {
        debug!(site = %self.site, url, enriched, "Detail page visited");
        self.run.record(RunEvent::DetailVisited {
            site: self.site.clone(),
            url: url.to_string(),
            enriched,
        });
    }

    pub fn site_finished(&self, products: usize) {
        info!(run_id = %self.run.run_id, site = %self.site, products, "Site finished");
        self.run.record(RunEvent::SiteFinished {
            site: self.site.clone(),
            products,
        });
    }
}
