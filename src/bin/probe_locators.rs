//! Live check of a site profile's locator tables.
//!
//! Usage: `probe_locators <site-key> [url]`. Opens the first seed (or `url`),
//! then reports, for every logical target, how many nodes each fallback
//! candidate matches and the text of the first match.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use dotenv::dotenv;
use tokio::time::sleep;

use console_harvester::chrome::ChromeDriver;
use console_harvester::config::{HarvestConfig, SiteProfile};
use console_harvester::driver::{DriverError, PageDriver};
use console_harvester::locator::LocatorChain;

const TEXT_PREVIEW: usize = 80;

fn targets(profile: &SiteProfile) -> Vec<&LocatorChain> {
    let l = &profile.locators;
    vec![
        &l.ready,
        &l.consent,
        &l.container,
        &l.title,
        &l.link,
        &l.price,
        &l.installment,
        &l.image,
        &l.availability,
        &l.next_page,
        &l.detail_title,
        &l.detail_price,
        &l.description,
    ]
}

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > TEXT_PREVIEW {
        format!("{}…", flat.chars().take(TEXT_PREVIEW).collect::<String>())
    } else {
        flat
    }
}

fn probe_chain(driver: &ChromeDriver, chain: &LocatorChain) -> Result<()> {
    if chain.is_empty() {
        println!("  {:<14} (no candidates)", chain.target);
        return Ok(());
    }
    println!("  {}", chain.target);
    for candidate in &chain.candidates {
        match driver.query_all(None, &candidate.selector) {
            Ok(nodes) => {
                let first = match nodes.first() {
                    Some(node) => driver.text(node).map(|t| preview(&t)).unwrap_or_default(),
                    None => String::new(),
                };
                println!("    {:>4}  {}  {}", nodes.len(), candidate.selector, first);
            }
            Err(e @ DriverError::SessionLost(_)) => return Err(e.into()),
            Err(e) => println!("     err  {}  {}", candidate.selector, e),
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let Some(key) = args.next() else {
        bail!("usage: probe_locators <site-key> [url]");
    };

    let config = HarvestConfig {
        sites: vec![key.clone()],
        ..HarvestConfig::from_env()
    };
    let profile = config
        .load_profiles()?
        .into_iter()
        .next()
        .with_context(|| format!("no profile for '{}'", key))?;
    let url = match args.next().or_else(|| profile.seeds.first().cloned()) {
        Some(url) => url,
        None => bail!("profile '{}' has no seeds; pass a url", key),
    };

    println!("🔎 Probing {} at {}", profile.name, url);
    let driver = ChromeDriver::launch(config.headless)?;
    driver.navigate(&url)?;
    sleep(Duration::from_secs(3)).await;
    driver.scroll_to_bottom()?;
    sleep(config.scroll_pause).await;

    let webdriver = driver.tab().evaluate("String(navigator.webdriver)", false)?;
    let timezone = driver
        .tab()
        .evaluate("Intl.DateTimeFormat().resolvedOptions().timeZone", false)?;
    println!("navigator.webdriver: {:?}", webdriver.value);
    println!("Timezone: {:?}", timezone.value);
    println!("Landed on: {}", driver.current_url()?);

    for chain in targets(&profile) {
        probe_chain(&driver, chain)?;
    }
    Ok(())
}
