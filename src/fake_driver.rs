//! In-memory page model implementing `PageDriver` for unit tests.
//!
//! Selectors are matched literally against the keys a page was built with.
//! Handles are registry indices tagged with the document generation, so a
//! handle goes stale as soon as a click or navigation replaces the document.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use crate::driver::{DriverError, DriverResult, NodeHandle, PageDriver};

#[derive(Debug, Clone, Default)]
pub struct FakeNode {
    pub text: String,
    pub attrs: HashMap<String, String>,
    pub children: HashMap<String, Vec<FakeNode>>,
    pub hidden: bool,
    pub disabled: bool,
    /// Scroll count after which the node appears (lazy loading).
    pub visible_after_scrolls: usize,
    /// Page index a click moves to.
    pub goto: Option<usize>,
    pub dismisses_overlay: bool,
    pub broken: bool,
}

impl FakeNode {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Default::default()
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn child(mut self, selector: &str, node: FakeNode) -> Self {
        self.children.entry(selector.to_string()).or_default().push(node);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn after_scrolls(mut self, scrolls: usize) -> Self {
        self.visible_after_scrolls = scrolls;
        self
    }

    pub fn goto(mut self, page: usize) -> Self {
        self.goto = Some(page);
        self
    }

    pub fn dismisses_overlay(mut self) -> Self {
        self.dismisses_overlay = true;
        self
    }

    pub fn broken(mut self) -> Self {
        self.broken = true;
        self
    }

    fn marked_disabled(&self) -> bool {
        let class_disabled = self
            .attrs
            .get("class")
            .map(|c| c.split_whitespace().any(|cls| cls.contains("disabled")))
            .unwrap_or(false);
        let aria_disabled = self.attrs.get("aria-disabled").map(|v| v == "true").unwrap_or(false);
        self.disabled || class_disabled || aria_disabled
    }
}

/// A listing card with the title, link and price children the test profile expects.
pub fn product_card(title: &str, href: &str, price: &str) -> FakeNode {
    FakeNode::new(title)
        .child("h2", FakeNode::new(title))
        .child("a", FakeNode::new(title).attr("href", href))
        .child(".price", FakeNode::new(price))
}

#[derive(Debug, Clone, Default)]
pub struct FakePage {
    pub url: String,
    pub html: String,
    pub ready_state: String,
    pub nodes: HashMap<String, Vec<FakeNode>>,
    pub overlay: bool,
    pub loses_session: bool,
    scrolls: usize,
}

impl FakePage {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ready_state: "complete".to_string(),
            ..Default::default()
        }
    }

    pub fn with(mut self, selector: &str, nodes: Vec<FakeNode>) -> Self {
        self.nodes.entry(selector.to_string()).or_default().extend(nodes);
        self
    }

    pub fn html(mut self, html: &str) -> Self {
        self.html = html.to_string();
        self
    }

    pub fn overlay(mut self) -> Self {
        self.overlay = true;
        self
    }

    pub fn ready_state(mut self, state: &str) -> Self {
        self.ready_state = state.to_string();
        self
    }

    /// Every driver call fails fatally once this page is current.
    pub fn loses_session(mut self) -> Self {
        self.loses_session = true;
        self
    }
}

#[derive(Debug, Clone)]
struct Entry {
    generation: u64,
    page: usize,
    path: Vec<(String, usize)>,
}

#[derive(Debug, Default)]
pub struct FakeDriver {
    pages: RefCell<Vec<FakePage>>,
    current: Cell<Option<usize>>,
    generation: Cell<u64>,
    registry: RefCell<Vec<Entry>>,
    navigations: RefCell<Vec<String>>,
    clicks: Cell<usize>,
}

impl FakeDriver {
    pub fn new(pages: Vec<FakePage>) -> Self {
        Self {
            pages: RefCell::new(pages),
            ..Default::default()
        }
    }

    /// Driver already showing `page` without a navigation.
    pub fn showing(pages: Vec<FakePage>, page: usize) -> Self {
        let driver = Self::new(pages);
        driver.current.set(Some(page));
        driver
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.borrow().clone()
    }

    pub fn clicks(&self) -> usize {
        self.clicks.get()
    }

    pub fn scrolls(&self) -> usize {
        self.current
            .get()
            .map(|i| self.pages.borrow()[i].scrolls)
            .unwrap_or(0)
    }

    fn check_session(&self) -> DriverResult<()> {
        if let Some(i) = self.current.get() {
            if self.pages.borrow()[i].loses_session {
                return Err(DriverError::SessionLost("target closed".into()));
            }
        }
        Ok(())
    }

    fn current_index(&self) -> DriverResult<usize> {
        self.check_session()?;
        self.current
            .get()
            .ok_or_else(|| DriverError::Navigation("no document loaded".into()))
    }

    fn show(&self, page: usize) {
        self.current.set(Some(page));
        self.generation.set(self.generation.get() + 1);
    }

    fn entry(&self, node: &NodeHandle) -> DriverResult<Entry> {
        let idx: usize = node
            .id()
            .parse()
            .map_err(|_| DriverError::Detached(node.id().to_string()))?;
        self.registry
            .borrow()
            .get(idx)
            .cloned()
            .ok_or_else(|| DriverError::Detached(node.id().to_string()))
    }

    fn live_entry(&self, node: &NodeHandle) -> DriverResult<Entry> {
        let page = self.current_index()?;
        let entry = self.entry(node)?;
        if entry.generation != self.generation.get() || entry.page != page {
            return Err(DriverError::Detached(node.id().to_string()));
        }
        Ok(entry)
    }

    fn with_node<T>(&self, node: &NodeHandle, f: impl FnOnce(&FakeNode, &FakePage) -> T) -> DriverResult<T> {
        let entry = self.live_entry(node)?;
        let pages = self.pages.borrow();
        let page = &pages[entry.page];
        let mut list = page.nodes.get(&entry.path[0].0);
        let mut found: Option<&FakeNode> = None;
        for (depth, (selector, index)) in entry.path.iter().enumerate() {
            if depth > 0 {
                list = found.and_then(|n| n.children.get(selector));
            }
            found = list.and_then(|l| l.get(*index));
        }
        let found = found.ok_or_else(|| DriverError::Detached(node.id().to_string()))?;
        Ok(f(found, page))
    }

    fn register(&self, page: usize, path: Vec<(String, usize)>) -> NodeHandle {
        let mut registry = self.registry.borrow_mut();
        registry.push(Entry {
            generation: self.generation.get(),
            page,
            path,
        });
        NodeHandle::new((registry.len() - 1).to_string())
    }
}

impl PageDriver for FakeDriver {
    fn navigate(&self, url: &str) -> DriverResult<()> {
        self.check_session()?;
        self.navigations.borrow_mut().push(url.to_string());
        let target = self.pages.borrow().iter().position(|p| p.url == url);
        match target {
            Some(i) => {
                self.show(i);
                self.check_session()
            }
            None => Err(DriverError::Navigation(format!("net::ERR_NAME_NOT_RESOLVED at {url}"))),
        }
    }

    fn current_url(&self) -> DriverResult<String> {
        let i = self.current_index()?;
        Ok(self.pages.borrow()[i].url.clone())
    }

    fn ready_state(&self) -> DriverResult<String> {
        let i = self.current_index()?;
        Ok(self.pages.borrow()[i].ready_state.clone())
    }

    fn page_html(&self) -> DriverResult<String> {
        let i = self.current_index()?;
        Ok(self.pages.borrow()[i].html.clone())
    }

    fn query_all(&self, scope: Option<&NodeHandle>, selector: &str) -> DriverResult<Vec<NodeHandle>> {
        let page = self.current_index()?;
        if selector.starts_with('!') {
            return Err(DriverError::InvalidLocator(selector.to_string()));
        }

        let (base, visible): (Vec<(String, usize)>, Vec<usize>) = match scope {
            None => {
                let pages = self.pages.borrow();
                let p = &pages[page];
                let visible = p
                    .nodes
                    .get(selector)
                    .map(|nodes| {
                        nodes
                            .iter()
                            .enumerate()
                            .filter(|(_, n)| n.visible_after_scrolls <= p.scrolls)
                            .map(|(i, _)| i)
                            .collect()
                    })
                    .unwrap_or_default();
                (Vec::new(), visible)
            }
            Some(handle) => {
                let entry = self.live_entry(handle)?;
                let visible = self.with_node(handle, |n, _| {
                    n.children
                        .get(selector)
                        .map(|c| (0..c.len()).collect::<Vec<_>>())
                        .unwrap_or_default()
                })?;
                (entry.path, visible)
            }
        };

        Ok(visible
            .into_iter()
            .map(|i| {
                let mut path = base.clone();
                path.push((selector.to_string(), i));
                self.register(page, path)
            })
            .collect())
    }

    fn text(&self, node: &NodeHandle) -> DriverResult<String> {
        self.with_node(node, |n, _| {
            if n.broken {
                Err(DriverError::Script("Cannot read properties of null".into()))
            } else {
                Ok(n.text.clone())
            }
        })?
    }

    fn attribute(&self, node: &NodeHandle, name: &str) -> DriverResult<Option<String>> {
        self.with_node(node, |n, _| n.attrs.get(name).cloned())
    }

    fn is_attached(&self, node: &NodeHandle) -> DriverResult<bool> {
        match self.live_entry(node) {
            Ok(_) => Ok(true),
            Err(DriverError::Detached(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn is_actionable(&self, node: &NodeHandle) -> DriverResult<bool> {
        self.with_node(node, |n, _| !n.hidden && !n.marked_disabled())
    }

    fn is_unobstructed(&self, node: &NodeHandle) -> DriverResult<bool> {
        self.with_node(node, |n, p| !n.hidden && !p.overlay)
    }

    fn click(&self, node: &NodeHandle) -> DriverResult<()> {
        let (goto, dismisses) = self.with_node(node, |n, _| (n.goto, n.dismisses_overlay))?;
        self.clicks.set(self.clicks.get() + 1);
        if dismisses {
            let i = self.current_index()?;
            self.pages.borrow_mut()[i].overlay = false;
        }
        if let Some(target) = goto {
            self.show(target);
        }
        Ok(())
    }

    fn scroll_to_bottom(&self) -> DriverResult<()> {
        let i = self.current_index()?;
        self.pages.borrow_mut()[i].scrolls += 1;
        Ok(())
    }
}
