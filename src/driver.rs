//! The seam between the harvesting logic and a rendered page.
//!
//! Everything that reads or pokes the DOM goes through [`PageDriver`]. The
//! headless Chrome implementation lives in `chrome.rs`; tests drive the same
//! code against an in-memory page model.

use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Opaque reference to an element found on the current document.
///
/// A handle outlives the element it names: once the document re-renders or
/// navigates, [`PageDriver::is_attached`] reports `false` for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeHandle(String);

impl NodeHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors raised by a page driver.
///
/// Only [`DriverError::SessionLost`] is fatal; everything else is a local miss
/// the caller is expected to absorb.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DriverError {
    #[error("Browsing session lost: {0}")]
    SessionLost(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Invalid locator expression: {0}")]
    InvalidLocator(String),

    #[error("Element detached from document: {0}")]
    Detached(String),

    #[error("Script evaluation failed: {0}")]
    Script(String),
}

impl DriverError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, DriverError::SessionLost(_))
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Turn a recoverable driver failure into `None`, keeping only fatal errors.
pub fn soften<T>(result: DriverResult<T>) -> DriverResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            debug!("Recovered from driver error: {}", e);
            Ok(None)
        }
    }
}

/// Read-mostly access to one browsing session.
///
/// Methods take `&self`: a session is a single shared resource, owned by one
/// traversal run at a time.
pub trait PageDriver {
    /// Load `url` in the session's tab.
    fn navigate(&self, url: &str) -> DriverResult<()>;

    fn current_url(&self) -> DriverResult<String>;

    /// `document.readyState` of the current document.
    fn ready_state(&self) -> DriverResult<String>;

    /// Serialized DOM of the current document.
    fn page_html(&self) -> DriverResult<String>;

    /// All elements matching `selector`, in document order, searched inside
    /// `scope` when given.
    fn query_all(&self, scope: Option<&NodeHandle>, selector: &str) -> DriverResult<Vec<NodeHandle>>;

    /// Rendered text of the element.
    fn text(&self, node: &NodeHandle) -> DriverResult<String>;

    /// Attribute value; for URL-bearing properties (`href`, `src`) the
    /// resolved absolute value.
    fn attribute(&self, node: &NodeHandle, name: &str) -> DriverResult<Option<String>>;

    /// Whether the element is still part of the live document.
    fn is_attached(&self, node: &NodeHandle) -> DriverResult<bool>;

    /// Displayed, enabled and not marked disabled.
    fn is_actionable(&self, node: &NodeHandle) -> DriverResult<bool>;

    /// Displayed, scrolled into view, and the hit-test at its visual centre
    /// lands on the element itself or a descendant (no overlay on top).
    fn is_unobstructed(&self, node: &NodeHandle) -> DriverResult<bool>;

    fn click(&self, node: &NodeHandle) -> DriverResult<()>;

    fn scroll_to_bottom(&self) -> DriverResult<()>;
}
