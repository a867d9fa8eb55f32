//! Selector synthesis
//!
//! Turns a clicked element into a CSS selector that finds the same logical
//! element again on later loads of structurally similar pages. Candidates are
//! tried from most to least change-resistant:
//!
//! 1. `#id`
//! 2. a class token unique within the scope
//! 3. `tag[attr="value"]` for a known test-hook / labelling attribute
//! 4. a structural `a > b > c` path, shortest unique suffix first, capped in depth

use tracing::{debug, warn};

use crate::dom::{ElementInspect, Scope};
use crate::error::SynthesisError;

/// Attributes tried, in order, by the attribute step
pub const SPECIFIC_ATTRIBUTES: [&str; 6] = [
    "data-id",
    "data-test-id",
    "data-testid",
    "name",
    "title",
    "aria-label",
];

/// Tags that say little on their own and get a position and class appended
const GENERIC_TAGS: [&str; 7] = ["div", "span", "p", "a", "li", "ul", "ol"];

/// State classes that come and go with interaction
const VOLATILE_CLASSES: [&str; 8] = [
    "active", "selected", "hover", "focus", "hidden", "visible", "disabled", "enabled",
];

pub const DEFAULT_MAX_DEPTH: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct SelectorSynthesizer {
    max_depth: usize,
}

impl Default for SelectorSynthesizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl SelectorSynthesizer {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth: max_depth.max(1),
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Synthesize a selector for `element`, returning an empty string when
    /// `scope` does not contain it.
    ///
    /// Callers must treat a selector that matches zero or several elements as
    /// a soft failure: the structural fallback is best effort.
    pub fn synthesize<D: ElementInspect>(
        &self,
        dom: &D,
        element: D::Node,
        scope: Scope<D::Node>,
    ) -> String {
        match self.try_synthesize(dom, element, scope) {
            Ok(selector) => selector,
            Err(e) => {
                warn!("Selector synthesis failed: {}", e);
                String::new()
            }
        }
    }

    pub fn try_synthesize<D: ElementInspect>(
        &self,
        dom: &D,
        element: D::Node,
        scope: Scope<D::Node>,
    ) -> Result<String, SynthesisError> {
        if let Scope::Within(root) = scope {
            if root == element || !dom.contains(root, element) {
                return Err(SynthesisError::InvalidScope);
            }
        }

        if let Some(id) = dom.attribute(element, "id").filter(|id| !id.is_empty()) {
            return Ok(format!("#{}", css_escape(&id)));
        }

        for class in dom.class_list(element) {
            let candidate = format!(".{}", css_escape(&class));
            if is_unique(dom, &candidate, scope) {
                return Ok(candidate);
            }
        }

        let tag = dom.tag_name(element);
        for attr in SPECIFIC_ATTRIBUTES {
            if let Some(value) = dom.attribute(element, attr) {
                let candidate = format!("{}[{}=\"{}\"]", tag, attr, escape_attr_value(&value));
                if is_unique(dom, &candidate, scope) {
                    return Ok(candidate);
                }
            }
        }

        Ok(self.structural_path(dom, element, scope))
    }

    fn structural_path<D: ElementInspect>(
        &self,
        dom: &D,
        element: D::Node,
        scope: Scope<D::Node>,
    ) -> String {
        let mut path: Vec<String> = Vec::new();
        let mut current = Some(element);

        while let Some(node) = current {
            let at_boundary = match scope {
                Scope::Document => dom.is_document_boundary(node),
                Scope::Within(root) => node == root,
            };
            if at_boundary {
                break;
            }

            path.insert(0, path_segment(dom, node));

            let candidate = path.join(" > ");
            if is_unique(dom, &candidate, scope) {
                return candidate;
            }

            current = dom.parent_element(node);
        }

        if path.len() > self.max_depth {
            let excess = path.len() - self.max_depth;
            path.drain(..excess);
        }

        let selector = path.join(" > ");
        debug!("No unique selector found, falling back to '{}'", selector);
        selector
    }
}

/// One level of a structural path: the tag, plus a same-tag position and a
/// stable class for generic tags.
fn path_segment<D: ElementInspect>(dom: &D, node: D::Node) -> String {
    let tag = dom.tag_name(node);
    let mut segment = tag.clone();

    if !GENERIC_TAGS.contains(&tag.as_str()) {
        return segment;
    }
    let Some(parent) = dom.parent_element(node) else {
        return segment;
    };

    let same_tag: Vec<D::Node> = dom
        .child_elements(parent)
        .into_iter()
        .filter(|sibling| dom.tag_name(*sibling) == tag)
        .collect();
    if same_tag.len() > 1 {
        if let Some(index) = same_tag.iter().position(|sibling| *sibling == node) {
            segment.push_str(&format!(":nth-of-type({})", index + 1));
        }
    }

    if let Some(class) = dom
        .class_list(node)
        .into_iter()
        .find(|class| !VOLATILE_CLASSES.contains(&class.as_str()))
    {
        segment.push('.');
        segment.push_str(&css_escape(&class));
    }

    segment
}

fn is_unique<D: ElementInspect>(dom: &D, selector: &str, scope: Scope<D::Node>) -> bool {
    matches!(dom.query_all(selector, scope), Ok(found) if found.len() == 1)
}

/// Escape an identifier for use in a selector, following CSSOM `CSS.escape`.
pub fn css_escape(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let mut out = String::with_capacity(value.len());

    for (i, &c) in chars.iter().enumerate() {
        let code = c as u32;
        if c == '\0' {
            out.push('\u{FFFD}');
        } else if (0x01..=0x1F).contains(&code)
            || code == 0x7F
            || (i == 0 && c.is_ascii_digit())
            || (i == 1 && c.is_ascii_digit() && chars[0] == '-')
        {
            out.push_str(&format!("\\{:x} ", code));
        } else if i == 0 && c == '-' && chars.len() == 1 {
            out.push_str("\\-");
        } else if code >= 0x80 || c == '-' || c == '_' || c.is_ascii_alphanumeric() {
            out.push(c);
        } else {
            out.push('\\');
            out.push(c);
        }
    }

    out
}

fn escape_attr_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
