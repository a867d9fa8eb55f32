//! Document-query capability
//!
//! The selection, assembly and pagination logic only ever talk to a page
//! through these traits. `HtmlDocument` implements them over a parsed
//! `scraper::Html` snapshot; a live host can implement them over its own DOM.

use scraper::node::Element;
use scraper::{ElementRef, Html, Selector};

use crate::error::DomError;

pub use ego_tree::NodeId;

/// Where a query is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope<N> {
    /// The whole document
    Document,
    /// Descendants of one element (the element itself excluded)
    Within(N),
}

/// Queries a host page can answer.
pub trait DocumentQuery {
    /// Handle to one element of the document
    type Node: Copy + Eq + std::fmt::Debug;

    fn query_first(&self, selector: &str, scope: Scope<Self::Node>)
        -> Result<Option<Self::Node>, DomError>;

    fn query_all(&self, selector: &str, scope: Scope<Self::Node>)
        -> Result<Vec<Self::Node>, DomError>;

    fn element_at_point(&self, x: f64, y: f64) -> Option<Self::Node>;

    /// Concatenated text of the element and its descendants, untrimmed
    fn text_content_of(&self, node: Self::Node) -> String;

    /// Inclusive containment, like `Node.contains`
    fn contains(&self, ancestor: Self::Node, node: Self::Node) -> bool;

    fn click(&mut self, node: Self::Node) -> Result<(), DomError>;
}

/// Read access to an element's own markup, needed to synthesize selectors.
pub trait ElementInspect: DocumentQuery {
    /// Lowercase tag name
    fn tag_name(&self, node: Self::Node) -> String;

    fn attribute(&self, node: Self::Node, name: &str) -> Option<String>;

    /// Class tokens in document order
    fn class_list(&self, node: Self::Node) -> Vec<String>;

    fn parent_element(&self, node: Self::Node) -> Option<Self::Node>;

    fn child_elements(&self, node: Self::Node) -> Vec<Self::Node>;

    /// `<body>`, `<html>`, or an element with no parent element
    fn is_document_boundary(&self, node: Self::Node) -> bool {
        let tag = self.tag_name(node);
        tag == "body" || tag == "html" || self.parent_element(node).is_none()
    }
}

/// Axis-aligned box in page coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }

    fn area(&self) -> f64 {
        self.width * self.height
    }
}

/// Parsed HTML snapshot.
///
/// Static markup has no layout, so hit testing only sees elements given a
/// box through [`HtmlDocument::set_layout_box`]. Clicks are recorded rather
/// than dispatched; the host decides what a click means (see `replay`).
pub struct HtmlDocument {
    html: Html,
    layout: Vec<(NodeId, Rect)>,
    clicks: Vec<NodeId>,
}

impl HtmlDocument {
    pub fn parse(source: &str) -> Self {
        Self {
            html: Html::parse_document(source),
            layout: Vec::new(),
            clicks: Vec::new(),
        }
    }

    /// First element matching `selector` anywhere in the document
    pub fn find(&self, selector: &str) -> Option<NodeId> {
        self.query_first(selector, Scope::Document).ok().flatten()
    }

    pub fn set_layout_box(&mut self, node: NodeId, rect: Rect) {
        self.layout.retain(|(id, _)| *id != node);
        self.layout.push((node, rect));
    }

    /// Elements clicked so far, oldest first
    pub fn clicked(&self) -> &[NodeId] {
        &self.clicks
    }

    pub fn take_clicks(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.clicks)
    }

    fn element(&self, node: NodeId) -> Option<ElementRef<'_>> {
        self.html.tree.get(node).and_then(ElementRef::wrap)
    }

    fn element_value(&self, node: NodeId) -> Option<&Element> {
        self.element(node).map(|el| el.value())
    }
}

fn parse_selector(selector: &str) -> Result<Selector, DomError> {
    Selector::parse(selector).map_err(|e| DomError::InvalidSelector {
        selector: selector.to_string(),
        reason: format!("{e:?}"),
    })
}

impl DocumentQuery for HtmlDocument {
    type Node = NodeId;

    fn query_first(&self, selector: &str, scope: Scope<NodeId>) -> Result<Option<NodeId>, DomError> {
        let parsed = parse_selector(selector)?;
        match scope {
            Scope::Document => Ok(self.html.select(&parsed).next().map(|el| el.id())),
            Scope::Within(root) => {
                let root = self.element(root).ok_or(DomError::Detached)?;
                Ok(root.select(&parsed).next().map(|el| el.id()))
            }
        }
    }

    fn query_all(&self, selector: &str, scope: Scope<NodeId>) -> Result<Vec<NodeId>, DomError> {
        let parsed = parse_selector(selector)?;
        match scope {
            Scope::Document => Ok(self.html.select(&parsed).map(|el| el.id()).collect()),
            Scope::Within(root) => {
                let root = self.element(root).ok_or(DomError::Detached)?;
                Ok(root.select(&parsed).map(|el| el.id()).collect())
            }
        }
    }

    fn element_at_point(&self, x: f64, y: f64) -> Option<NodeId> {
        // Innermost box wins; on equal area the later (usually deeper) entry
        self.layout
            .iter()
            .filter(|(_, rect)| rect.contains(x, y))
            .fold(None::<(NodeId, Rect)>, |best, (id, rect)| match best {
                Some((_, b)) if b.area() < rect.area() => best,
                _ => Some((*id, *rect)),
            })
            .map(|(id, _)| id)
    }

    fn text_content_of(&self, node: NodeId) -> String {
        self.element(node)
            .map(|el| el.text().collect::<String>())
            .unwrap_or_default()
    }

    fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        if ancestor == node {
            return self.element(node).is_some();
        }
        match self.html.tree.get(node) {
            Some(node_ref) => node_ref.ancestors().any(|a| a.id() == ancestor),
            None => false,
        }
    }

    fn click(&mut self, node: NodeId) -> Result<(), DomError> {
        if self.element(node).is_none() {
            return Err(DomError::Detached);
        }
        self.clicks.push(node);
        Ok(())
    }
}

impl ElementInspect for HtmlDocument {
    fn tag_name(&self, node: NodeId) -> String {
        self.element_value(node)
            .map(|el| el.name().to_ascii_lowercase())
            .unwrap_or_default()
    }

    fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        self.element_value(node)?.attr(name).map(String::from)
    }

    fn class_list(&self, node: NodeId) -> Vec<String> {
        self.element_value(node)
            .map(|el| el.classes().map(String::from).collect())
            .unwrap_or_default()
    }

    fn parent_element(&self, node: NodeId) -> Option<NodeId> {
        self.element(node)?
            .parent()
            .and_then(ElementRef::wrap)
            .map(|el| el.id())
    }

    fn child_elements(&self, node: NodeId) -> Vec<NodeId> {
        match self.element(node) {
            Some(el) => el.children().filter_map(ElementRef::wrap).map(|c| c.id()).collect(),
            None => Vec::new(),
        }
    }
}
