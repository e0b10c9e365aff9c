//! Headless Chrome implementation of [`PageDriver`].
//!
//! Elements are addressed by tagging them with a `data-harvest-node`
//! attribute. Tags embed a per-document token, so a handle taken before a
//! navigation or a re-render no longer resolves afterwards, which is exactly
//! the staleness signal pagination waits for.

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::SiteProfile;
use crate::driver::{DriverError, DriverResult, NodeHandle, PageDriver};
use crate::harvest::SessionFactory;
use crate::stealth;

const PRELUDE: &str = r#"
    if (!window.__harvestDoc) {
        window.__harvestDoc = Math.random().toString(36).slice(2);
        window.__harvestSeq = 0;
    }
    const __doc = window.__harvestDoc;
    const __node = (id) => {
        const el = document.querySelector('[data-harvest-node="' + id + '"]');
        if (!el || !el.isConnected) {
            const e = new Error('node ' + id + ' is detached');
            e.name = 'Detached';
            throw e;
        }
        return el;
    };
    const __tag = (el) => {
        let id = el.getAttribute('data-harvest-node');
        if (!id || !id.startsWith(__doc + '-')) {
            window.__harvestSeq += 1;
            id = __doc + '-' + window.__harvestSeq;
            el.setAttribute('data-harvest-node', id);
        }
        return id;
    };
"#;

const QUERY_ALL: &str = r#"
    const root = args.scope ? __node(args.scope) : document;
    return Array.from(root.querySelectorAll(args.selector)).map(__tag);
"#;

const TEXT: &str = r#"
    const el = __node(args.id);
    return (el.innerText || el.textContent || '');
"#;

const ATTRIBUTE: &str = r#"
    const el = __node(args.id);
    if ((args.name === 'href' || args.name === 'src') && typeof el[args.name] === 'string' && el[args.name]) {
        return el[args.name];
    }
    return el.getAttribute(args.name);
"#;

const IS_ATTACHED: &str = r#"
    const el = document.querySelector('[data-harvest-node="' + args.id + '"]');
    return !!(el && el.isConnected);
"#;

const IS_ACTIONABLE: &str = r#"
    const el = __node(args.id);
    const style = window.getComputedStyle(el);
    const rect = el.getBoundingClientRect();
    const displayed = style.display !== 'none' && style.visibility !== 'hidden' && (rect.width > 0 || rect.height > 0);
    const cls = (el.getAttribute('class') || '').toLowerCase();
    return displayed && !el.disabled && !cls.includes('disabled') && el.getAttribute('aria-disabled') !== 'true';
"#;

// Hit-test at the element's centre must land on the element or a descendant.
const IS_UNOBSTRUCTED: &str = r#"
    const el = __node(args.id);
    el.scrollIntoView({ block: 'center', inline: 'center' });
    const r = el.getBoundingClientRect();
    if (r.width === 0 || r.height === 0) return false;
    let hit = document.elementFromPoint(r.left + r.width / 2, r.top + r.height / 2);
    while (hit) {
        if (hit === el) return true;
        hit = hit.parentElement;
    }
    return false;
"#;

const CLICK: &str = r#"
    const el = __node(args.id);
    el.scrollIntoView({ block: 'center' });
    el.click();
    return true;
"#;

fn wrap(body: &str, args: &Value) -> String {
    format!(
        "(() => {{ {PRELUDE} const args = {args}; try {{ const ok = (() => {{ {body} }})(); \
         return JSON.stringify({{ ok: ok === undefined ? null : ok }}); }} catch (e) {{ \
         return JSON.stringify({{ err: String((e && e.message) || e), kind: (e && e.name) || 'Error' }}); }} }})()"
    )
}

/// Map a CDP transport failure onto the driver taxonomy.
fn classify(err: anyhow::Error) -> DriverError {
    let message = format!("{:#}", err);
    let lower = message.to_lowercase();
    let lost = (lower.contains("connection") && lower.contains("closed"))
        || lower.contains("target closed")
        || lower.contains("no such target")
        || lower.contains("session closed")
        || lower.contains("browser has been closed");
    if lost {
        DriverError::SessionLost(message)
    } else {
        DriverError::Script(message)
    }
}

fn reply<T: DeserializeOwned>(raw: Value) -> DriverResult<T> {
    let text = match raw {
        Value::String(s) => s,
        other => return Err(DriverError::Script(format!("unexpected script result: {}", other))),
    };
    let parsed: Value = serde_json::from_str(&text).map_err(|e| DriverError::Script(e.to_string()))?;

    if let Some(err) = parsed.get("err") {
        let message = err.as_str().unwrap_or_default().to_string();
        return Err(match parsed.get("kind").and_then(Value::as_str) {
            Some("SyntaxError") => DriverError::InvalidLocator(message),
            Some("Detached") => DriverError::Detached(message),
            _ => DriverError::Script(message),
        });
    }
    serde_json::from_value(parsed.get("ok").cloned().unwrap_or(Value::Null)).map_err(|e| DriverError::Script(e.to_string()))
}

/// One browser process with one tab. Dropping it closes both.
pub struct ChromeDriver {
    // Kept alive for the tab; the process is killed on drop.
    _browser: Browser,
    tab: Arc<Tab>,
}

impl ChromeDriver {
    pub fn launch(headless: bool) -> Result<Self> {
        let user_agent = stealth::random_user_agent();
        info!("Launching Chrome (headless: {}) with User-Agent: {}", headless, user_agent);

        let ua_arg = format!("--user-agent={}", user_agent);
        let mut args = vec![
            OsStr::new("--disable-blink-features=AutomationControlled"),
            OsStr::new("--no-sandbox"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new("--disable-infobars"),
            OsStr::new("--window-position=0,0"),
            OsStr::new("--lang=pt-BR"),
            OsStr::new(&ua_arg),
        ];
        if headless {
            args.push(OsStr::new("--headless=new"));
        }

        let browser = Browser::new(LaunchOptions {
            headless: false, // Use new headless mode via args
            window_size: Some((1920, 1080)),
            args,
            idle_browser_timeout: Duration::from_secs(300),
            ..Default::default()
        })?;

        let tab = browser.new_tab()?;
        tab.set_default_timeout(Duration::from_secs(30));
        stealth::harden_tab(&tab)?;

        Ok(Self { _browser: browser, tab })
    }

    /// The underlying tab, for diagnostics that need raw CDP access.
    pub fn tab(&self) -> &Arc<Tab> {
        &self.tab
    }

    fn call<T: DeserializeOwned>(&self, body: &str, args: Value) -> DriverResult<T> {
        let script = wrap(body, &args);
        let result = self.tab.evaluate(&script, false).map_err(classify)?;
        reply(result.value.unwrap_or(Value::Null))
    }

    fn eval_string(&self, expression: &str) -> DriverResult<String> {
        let result = self.tab.evaluate(expression, false).map_err(classify)?;
        match result.value {
            Some(Value::String(s)) => Ok(s),
            other => Err(DriverError::Script(format!("expected a string from '{}', got {:?}", expression, other))),
        }
    }
}

impl Drop for ChromeDriver {
    fn drop(&mut self) {
        if let Err(e) = self.tab.close(false) {
            debug!("Tab close failed: {}", e);
        }
    }
}

impl PageDriver for ChromeDriver {
    fn navigate(&self, url: &str) -> DriverResult<()> {
        debug!(url, "Navigating");
        self.tab
            .navigate_to(url)
            .and_then(|tab| tab.wait_until_navigated())
            .map(|_| ())
            .map_err(|e| match classify(e) {
                DriverError::Script(message) => DriverError::Navigation(message),
                other => other,
            })
    }

    fn current_url(&self) -> DriverResult<String> {
        self.eval_string("window.location.href")
    }

    fn ready_state(&self) -> DriverResult<String> {
        self.eval_string("document.readyState")
    }

    fn page_html(&self) -> DriverResult<String> {
        self.eval_string("document.documentElement.outerHTML")
    }

    fn query_all(&self, scope: Option<&NodeHandle>, selector: &str) -> DriverResult<Vec<NodeHandle>> {
        let ids: Vec<String> = self.call(QUERY_ALL, json!({ "scope": scope.map(|s| s.id()), "selector": selector }))?;
        Ok(ids.into_iter().map(NodeHandle::new).collect())
    }

    fn text(&self, node: &NodeHandle) -> DriverResult<String> {
        self.call(TEXT, json!({ "id": node.id() }))
    }

    fn attribute(&self, node: &NodeHandle, name: &str) -> DriverResult<Option<String>> {
        self.call(ATTRIBUTE, json!({ "id": node.id(), "name": name }))
    }

    fn is_attached(&self, node: &NodeHandle) -> DriverResult<bool> {
        self.call(IS_ATTACHED, json!({ "id": node.id() }))
    }

    fn is_actionable(&self, node: &NodeHandle) -> DriverResult<bool> {
        self.call(IS_ACTIONABLE, json!({ "id": node.id() }))
    }

    fn is_unobstructed(&self, node: &NodeHandle) -> DriverResult<bool> {
        self.call(IS_UNOBSTRUCTED, json!({ "id": node.id() }))
    }

    fn click(&self, node: &NodeHandle) -> DriverResult<()> {
        let _: bool = self.call(CLICK, json!({ "id": node.id() }))?;
        Ok(())
    }

    fn scroll_to_bottom(&self) -> DriverResult<()> {
        self.tab
            .evaluate("window.scrollTo(0, document.body.scrollHeight);", false)
            .map(|_| ())
            .map_err(classify)
    }
}

/// Opens a fresh Chrome per site.
pub struct ChromeLauncher {
    pub headless: bool,
}

impl SessionFactory for ChromeLauncher {
    type Driver = ChromeDriver;

    fn open(&mut self, profile: &SiteProfile) -> Result<ChromeDriver> {
        info!(site = %profile.name, "Opening browsing session");
        ChromeDriver::launch(self.headless)
    }
}
