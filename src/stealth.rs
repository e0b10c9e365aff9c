//! Basic fingerprint reduction for the Chrome session.
//!
//! Hides the automation flag, mocks the `chrome` runtime object headless
//! builds lack, and aligns languages, locale and timezone with the Brazilian
//! storefronts being harvested. Nothing here tries to defeat active bot
//! challenges.

use std::sync::Arc;

use anyhow::Result;
use headless_chrome::protocol::cdp::Emulation::{SetLocaleOverride, SetTimezoneOverride};
use headless_chrome::protocol::cdp::Page::AddScriptToEvaluateOnNewDocument;
use headless_chrome::Tab;
use once_cell::sync::Lazy;
use rand::seq::SliceRandom;

pub const TIMEZONE: &str = "America/Sao_Paulo";
pub const LOCALE: &str = "pt-BR";

static USER_AGENTS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36 Edg/123.0.0.0",
    ]
});

const FALLBACK_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36";

/// A desktop Chromium user agent, picked at random per session.
pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(FALLBACK_USER_AGENT)
}

/// Runs before any page script via `Page.addScriptToEvaluateOnNewDocument`.
pub fn get_stealth_script() -> String {
    r#"
        // navigator.webdriver
        Object.defineProperty(navigator, 'webdriver', {
            get: () => undefined,
        });

        // Headless builds ship without window.chrome
        if (!window.chrome) {
            window.chrome = {
                runtime: {
                    connect: function() {
                        return {
                            onMessage: { addListener: function() {}, removeListener: function() {} },
                            postMessage: function() {},
                            disconnect: function() {}
                        };
                    },
                    sendMessage: function() {},
                    onMessage: { addListener: function() {}, removeListener: function() {} }
                },
                app: { isInstalled: false },
                csi: function() {},
                loadTimes: function() { return {}; }
            };
        }

        Object.defineProperty(navigator, 'languages', {
            get: () => ['pt-BR', 'pt', 'en-US', 'en'],
        });

        Object.defineProperty(navigator, 'plugins', {
            get: () => {
                const pdf = {
                    0: { type: "application/x-google-chrome-pdf", suffixes: "pdf", description: "Portable Document Format" },
                    description: "Portable Document Format",
                    filename: "internal-pdf-viewer",
                    length: 1,
                    name: "Chrome PDF Plugin"
                };
                const p = [pdf, pdf, pdf];
                Object.setPrototypeOf(p, PluginArray.prototype);
                return p;
            }
        });

        const originalQuery = window.navigator.permissions.query;
        window.navigator.permissions.query = (parameters) => (
            parameters.name === 'notifications' ?
            Promise.resolve({ state: Notification.permission }) :
            originalQuery(parameters)
        );
    "#
    .to_string()
}

/// Apply fingerprint overrides (Timezone, Locale)
pub fn apply_stealth_settings(tab: &Arc<Tab>, timezone_id: &str, locale: &str) -> Result<()> {
    tab.call_method(SetTimezoneOverride {
        timezone_id: timezone_id.to_string(),
    })?;

    tab.call_method(SetLocaleOverride {
        locale: Some(locale.to_string()),
    })?;

    Ok(())
}

/// Inject the stealth script and the locale overrides into a fresh tab.
pub fn harden_tab(tab: &Arc<Tab>) -> Result<()> {
    tab.enable_debugger()?;
    tab.call_method(AddScriptToEvaluateOnNewDocument {
        source: get_stealth_script(),
        world_name: None,
        include_command_line_api: None,
        run_immediately: None,
    })?;

    if let Err(e) = apply_stealth_settings(tab, TIMEZONE, LOCALE) {
        tracing::warn!("Failed to apply locale overrides: {}", e);
    }
    Ok(())
}
