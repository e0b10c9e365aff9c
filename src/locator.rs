//! Fallback-chain element location.
//!
//! A logical target ("product container", "next page") is described by an
//! ordered list of candidate selectors, each with its own wait budget. The
//! first candidate that yields an element wins. Exhausting the chain is an
//! ordinary [`Resolution`], not an error: only a lost session escapes.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::driver::{DriverError, DriverResult, NodeHandle, PageDriver};

/// One locator expression and how long to wait for it to match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub selector: String,
    #[serde(default)]
    pub timeout_ms: u64,
}

impl Candidate {
    pub fn new(selector: &str, timeout_ms: u64) -> Self {
        Self {
            selector: selector.to_string(),
            timeout_ms,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Ordered candidates for one logical target.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LocatorChain {
    pub target: String,
    pub candidates: Vec<Candidate>,
}

impl LocatorChain {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            candidates: Vec::new(),
        }
    }

    /// Chain where every selector shares the same wait budget.
    pub fn of(target: &str, selectors: &[&str], timeout_ms: u64) -> Self {
        Self {
            target: target.to_string(),
            candidates: selectors.iter().map(|s| Candidate::new(s, timeout_ms)).collect(),
        }
    }

    pub fn candidate(mut self, selector: &str, timeout_ms: u64) -> Self {
        self.candidates.push(Candidate::new(selector, timeout_ms));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Outcome of resolving a chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Matches of the first successful candidate, in document order.
    Found(Vec<NodeHandle>),
    /// Every candidate was checked without waiting and none matched.
    NotFound,
    /// At least one candidate was polled for its full timeout.
    TimedOut,
}

impl Resolution {
    pub fn first(&self) -> Option<&NodeHandle> {
        match self {
            Resolution::Found(nodes) => nodes.first(),
            _ => None,
        }
    }

    pub fn into_nodes(self) -> Vec<NodeHandle> {
        match self {
            Resolution::Found(nodes) => nodes,
            _ => Vec::new(),
        }
    }
}

/// Poll `check` until it reports `true` or `timeout` elapses.
///
/// `check` runs at least once. Non-fatal driver errors count as "not yet".
pub async fn poll_until<F>(timeout: Duration, poll: Duration, mut check: F) -> DriverResult<bool>
where
    F: FnMut() -> DriverResult<bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        match check() {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => debug!("Poll check failed: {}", e),
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(false);
        }
        sleep(poll.min(deadline - now)).await;
    }
}

/// Resolves locator chains against one driver.
pub struct Resolver<'a, D: PageDriver> {
    driver: &'a D,
    poll: Duration,
}

impl<'a, D: PageDriver> Resolver<'a, D> {
    pub fn new(driver: &'a D, poll: Duration) -> Self {
        Self { driver, poll }
    }

    /// Wait for a single candidate. `Ok(None)` with `waited == true` means the
    /// candidate timed out, `waited == false` means it was skipped or missed
    /// on its only check.
    async fn await_candidate(
        &self,
        scope: Option<&NodeHandle>,
        candidate: &Candidate,
        waited: &mut bool,
    ) -> DriverResult<Option<Vec<NodeHandle>>> {
        let deadline = Instant::now() + candidate.timeout();
        loop {
            match self.driver.query_all(scope, &candidate.selector) {
                Ok(nodes) if !nodes.is_empty() => return Ok(Some(nodes)),
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(DriverError::InvalidLocator(sel)) => {
                    debug!("Skipping invalid locator '{}'", sel);
                    return Ok(None);
                }
                // Detached scope: the candidate can never match.
                Err(DriverError::Detached(_)) => return Ok(None),
                Err(e) => debug!("Query '{}' failed: {}", candidate.selector, e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            *waited = true;
            sleep(self.poll.min(deadline - now)).await;
        }
    }

    /// Try each candidate in order; the first one with at least one match wins.
    pub async fn resolve(&self, scope: Option<&NodeHandle>, chain: &LocatorChain) -> DriverResult<Resolution> {
        let mut waited = false;
        for candidate in &chain.candidates {
            if let Some(nodes) = self.await_candidate(scope, candidate, &mut waited).await? {
                debug!(target_name = %chain.target, selector = %candidate.selector, matches = nodes.len(), "Locator matched");
                return Ok(Resolution::Found(nodes));
            }
        }
        Ok(if waited { Resolution::TimedOut } else { Resolution::NotFound })
    }

    /// First element of the first successful candidate.
    pub async fn resolve_one(&self, scope: Option<&NodeHandle>, chain: &LocatorChain) -> DriverResult<Option<NodeHandle>> {
        Ok(self.resolve(scope, chain).await?.first().cloned())
    }

    /// Walk the chain, offering `accept` only the first match of each
    /// candidate. A rejected first match falls through to the next candidate.
    pub async fn resolve_first_with<T, F>(
        &self,
        scope: Option<&NodeHandle>,
        chain: &LocatorChain,
        accept: F,
    ) -> DriverResult<Option<T>>
    where
        F: FnMut(&D, &NodeHandle) -> DriverResult<Option<T>>,
    {
        self.walk(scope, chain, 1, accept).await
    }

    /// Walk the chain, offering `accept` every match of every candidate until
    /// it returns a value. For targets where some matches are expected to be
    /// unusable: disabled pagination controls, hidden consent buttons,
    /// placeholder images.
    pub async fn resolve_any_with<T, F>(
        &self,
        scope: Option<&NodeHandle>,
        chain: &LocatorChain,
        accept: F,
    ) -> DriverResult<Option<T>>
    where
        F: FnMut(&D, &NodeHandle) -> DriverResult<Option<T>>,
    {
        self.walk(scope, chain, usize::MAX, accept).await
    }

    async fn walk<T, F>(
        &self,
        scope: Option<&NodeHandle>,
        chain: &LocatorChain,
        per_candidate: usize,
        mut accept: F,
    ) -> DriverResult<Option<T>>
    where
        F: FnMut(&D, &NodeHandle) -> DriverResult<Option<T>>,
    {
        let mut waited = false;
        for candidate in &chain.candidates {
            let Some(nodes) = self.await_candidate(scope, candidate, &mut waited).await? else {
                continue;
            };
            for node in nodes.iter().take(per_candidate) {
                match accept(self.driver, node) {
                    Ok(Some(value)) => return Ok(Some(value)),
                    Ok(None) => {}
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => debug!("Rejected match for '{}': {}", candidate.selector, e),
                }
            }
        }
        Ok(None)
    }

    /// Trimmed text of the first element of the first candidate whose text
    /// passes `accept`.
    pub async fn resolve_text<P>(
        &self,
        scope: Option<&NodeHandle>,
        chain: &LocatorChain,
        accept: P,
    ) -> DriverResult<Option<String>>
    where
        P: Fn(&str) -> bool,
    {
        self.resolve_first_with(scope, chain, |driver, node| {
            let text = driver.text(node)?;
            let text = text.trim();
            Ok(accept(text).then(|| text.to_string()))
        })
        .await
    }

    /// First trimmed value among `attributes`, in order, that passes
    /// `accept`. Every match of the chain is tried.
    pub async fn resolve_attribute<P>(
        &self,
        scope: Option<&NodeHandle>,
        chain: &LocatorChain,
        attributes: &[&str],
        accept: P,
    ) -> DriverResult<Option<String>>
    where
        P: Fn(&str) -> bool,
    {
        self.resolve_any_with(scope, chain, |driver, node| {
            for name in attributes {
                match driver.attribute(node, name) {
                    Ok(Some(value)) if accept(value.trim()) => return Ok(Some(value.trim().to_string())),
                    Ok(_) => {}
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => debug!("Attribute '{}' unreadable: {}", name, e),
                }
            }
            Ok(None)
        })
        .await
    }

    /// Number of matches of the first candidate that matches right now.
    pub fn count_now(&self, chain: &LocatorChain) -> DriverResult<usize> {
        for candidate in &chain.candidates {
            match self.driver.query_all(None, &candidate.selector) {
                Ok(nodes) if !nodes.is_empty() => return Ok(nodes.len()),
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(_) => {}
            }
        }
        Ok(0)
    }

    /// First current match of the chain, without waiting.
    pub fn first_now(&self, chain: &LocatorChain) -> DriverResult<Option<NodeHandle>> {
        for candidate in &chain.candidates {
            match self.driver.query_all(None, &candidate.selector) {
                Ok(nodes) if !nodes.is_empty() => return Ok(nodes.into_iter().next()),
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(_) => {}
            }
        }
        Ok(None)
    }

    /// Poll until the first match of `chain` is displayed and not covered
    /// by an overlay.
    pub async fn wait_until_interactable(&self, chain: &LocatorChain, timeout: Duration) -> DriverResult<bool> {
        poll_until(timeout, self.poll, || match self.first_now(chain)? {
            Some(node) => self.driver.is_unobstructed(&node),
            None => Ok(false),
        })
        .await
    }
}
