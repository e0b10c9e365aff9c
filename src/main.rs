use std::fs;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dotenv::dotenv;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use console_harvester::catalog::{aggregate, Statistics};
use console_harvester::chrome::ChromeLauncher;
use console_harvester::config::HarvestConfig;
use console_harvester::harvest::{Harvester, SiteSummary};
use console_harvester::models::Product;
use console_harvester::report::{RunEvent, RunReporter};

#[derive(Serialize)]
struct CatalogFile {
    run_id: Uuid,
    generated_at: DateTime<Utc>,
    statistics: Statistics,
    sites: Vec<SiteSummary>,
    events: Vec<RunEvent>,
    products: Vec<Product>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = HarvestConfig::from_env();
    let profiles = config.load_profiles().context("loading site profiles")?;
    info!(
        sites = ?profiles.iter().map(|p| p.key.as_str()).collect::<Vec<_>>(),
        max_pages = config.max_pages,
        headless = config.headless,
        "Starting console harvest"
    );

    let reporter = RunReporter::new();
    let launcher = ChromeLauncher {
        headless: config.headless,
    };
    let report = Harvester::new(launcher, &config, &reporter).run(&profiles).await;

    let collected = report.products.len();
    let products = aggregate(report.products);
    let statistics = Statistics::from_products(&products);
    info!(
        collected,
        unique = products.len(),
        with_price = statistics.with_price,
        "Catalog aggregated"
    );
    if products.is_empty() {
        warn!("No products were harvested");
    }

    let file = CatalogFile {
        run_id: reporter.run_id(),
        generated_at: Utc::now(),
        statistics,
        sites: report.sites,
        events: reporter.events(),
        products,
    };
    let json = serde_json::to_string_pretty(&file)?;
    fs::write(&config.output_path, json)
        .with_context(|| format!("writing {}", config.output_path.display()))?;

    info!(path = %config.output_path.display(), "Catalog written");
    Ok(())
}
