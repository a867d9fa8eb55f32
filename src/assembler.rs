//! Record assembly
//!
//! Applies a rule set to one document snapshot. `Single` rules become fields
//! shared by every record; each `Multiple` rule yields one field per container
//! and the lists are zipped by position, so lists of different lengths still
//! line up from the top.

use tracing::{debug, warn};

use crate::dom::{DocumentQuery, Scope};
use crate::rules::{ExtractionRecord, Rule, RuleKind};

/// Records returned by a preview
pub const PREVIEW_LIMIT: usize = 5;

/// One field produced by one rule
type Field = (String, String);

/// Extract all records `rules` describe from `dom`.
pub fn assemble<D: DocumentQuery>(rules: &[Rule], dom: &D) -> Vec<ExtractionRecord> {
    let mut lists: Vec<Vec<Field>> = Vec::new();
    for rule in rules.iter().filter(|r| r.kind == RuleKind::Multiple) {
        let list = extract_list(rule, dom);
        if !list.is_empty() {
            lists.push(list);
        }
    }

    let mut base = ExtractionRecord::new();
    for rule in rules.iter().filter(|r| r.kind == RuleKind::Single) {
        if let Some((key, value)) = extract_field(rule, dom) {
            base.insert(key, value);
        }
    }

    let records = zip_join(base, &lists);
    debug!("Assembled {} records from {} rules", records.len(), rules.len());
    records
}

/// Same as [`assemble`], keeping only the first `limit` records.
pub fn preview<D: DocumentQuery>(rules: &[Rule], dom: &D, limit: usize) -> Vec<ExtractionRecord> {
    let mut records = assemble(rules, dom);
    records.truncate(limit);
    records
}

/// Positional merge: record `i` is `base` plus element `i` of every list long enough.
fn zip_join(base: ExtractionRecord, lists: &[Vec<Field>]) -> Vec<ExtractionRecord> {
    let max_len = lists.iter().map(Vec::len).max().unwrap_or(0);
    if max_len == 0 {
        return if base.is_empty() { Vec::new() } else { vec![base] };
    }

    (0..max_len)
        .map(|i| {
            let mut record = base.clone();
            for list in lists {
                if let Some((key, value)) = list.get(i) {
                    record.insert(key.clone(), value.clone());
                }
            }
            record
        })
        .collect()
}

fn extract_field<D: DocumentQuery>(rule: &Rule, dom: &D) -> Option<Field> {
    let element = match dom.query_first(&rule.selector, Scope::Document) {
        Ok(Some(element)) => element,
        Ok(None) => {
            warn!("Element not found for selector: {}", rule.selector);
            return None;
        }
        Err(e) => {
            warn!("Skipping rule '{}': {}", rule.name, e);
            return None;
        }
    };

    let value = trimmed_text(dom, element);
    let key = field_key(rule, dom, Scope::Document);
    Some((key, value))
}

fn extract_list<D: DocumentQuery>(rule: &Rule, dom: &D) -> Vec<Field> {
    let containers = match dom.query_all(&rule.selector, Scope::Document) {
        Ok(containers) => containers,
        Err(e) => {
            warn!("Skipping rule '{}': {}", rule.name, e);
            return Vec::new();
        }
    };
    if containers.is_empty() {
        warn!("No containers found for selector: {}", rule.selector);
        return Vec::new();
    }

    containers
        .into_iter()
        .filter_map(|container| {
            // Relative selectors only ever run inside their own container
            let scope = Scope::Within(container);
            let value = match rule.relative_selector() {
                Some(relative) => match dom.query_first(relative, scope) {
                    Ok(Some(element)) => trimmed_text(dom, element),
                    Ok(None) => return None,
                    Err(e) => {
                        warn!("Skipping container for rule '{}': {}", rule.name, e);
                        return None;
                    }
                },
                None => trimmed_text(dom, container),
            };
            Some((field_key(rule, dom, scope), value))
        })
        .collect()
}

/// Field name: typed key, else text of the key element, else the rule name
fn field_key<D: DocumentQuery>(rule: &Rule, dom: &D, scope: Scope<D::Node>) -> String {
    if let Some(key) = rule.manual_key() {
        return key.to_string();
    }

    if let Some(selector) = rule.key_selector() {
        match dom.query_first(selector, scope) {
            Ok(Some(element)) => {
                let text = trimmed_text(dom, element);
                if !text.is_empty() {
                    return text;
                }
            }
            Ok(None) => debug!("Key element not found for selector: {}", selector),
            Err(e) => warn!("Invalid key selector for rule '{}': {}", rule.name, e),
        }
    }

    rule.name.clone()
}

fn trimmed_text<D: DocumentQuery>(dom: &D, node: D::Node) -> String {
    dom.text_content_of(node).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::HtmlDocument;

    const CATALOG: &str = r#"
    <html>
    <body>
        <h1 class="site">Book Shop</h1>
        <div class="category"><span class="label">Category</span> <b>Fiction</b></div>
        <ul>
            <li class="title-box"><a>Dune</a></li>
            <li class="title-box"><a>Emma</a></li>
            <li class="title-box"><a>Ulysses</a></li>
        </ul>
        <div class="prices">
            <p class="price-box"><em>Price</em><span>9.99</span></p>
            <p class="price-box"><em>Price</em><span>4.50</span></p>
        </div>
        <a id="next" href="/page/2">Next</a>
    </body>
    </html>
    "#;

    fn field(record: &ExtractionRecord, key: &str) -> Option<String> {
        record.get(key).cloned()
    }

    #[test]
    fn test_zip_join_pads_short_lists() {
        let doc = HtmlDocument::parse(CATALOG);
        let rules = vec![
            Rule::multiple("title", ".title-box", Some("a")),
            Rule::multiple("price", ".price-box", Some("span")),
            Rule::single("site", ".site"),
            Rule::next_button("#next"),
        ];

        let records = assemble(&rules, &doc);
        assert_eq!(records.len(), 3);

        assert_eq!(field(&records[0], "title").as_deref(), Some("Dune"));
        assert_eq!(field(&records[0], "price").as_deref(), Some("9.99"));
        assert_eq!(field(&records[0], "site").as_deref(), Some("Book Shop"));

        assert_eq!(field(&records[1], "title").as_deref(), Some("Emma"));
        assert_eq!(field(&records[1], "price").as_deref(), Some("4.50"));

        assert_eq!(records[2].len(), 2);
        assert_eq!(field(&records[2], "title").as_deref(), Some("Ulysses"));
        assert_eq!(field(&records[2], "site").as_deref(), Some("Book Shop"));
        assert_eq!(field(&records[2], "price"), None);
    }

    #[test]
    fn test_single_only_yields_at_most_one_record() {
        let doc = HtmlDocument::parse(CATALOG);
        let rules = vec![
            Rule::single("site", ".site"),
            Rule::single("missing", ".does-not-exist"),
        ];
        let records = assemble(&rules, &doc);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].len(), 1);

        let rules = vec![Rule::single("missing", ".does-not-exist")];
        assert!(assemble(&rules, &doc).is_empty());
        assert!(assemble(&[], &doc).is_empty());
    }

    #[test]
    fn test_key_resolution_order() {
        let doc = HtmlDocument::parse(CATALOG);

        let from_element = Rule::single("category", ".category b").with_key_selector(".category .label");
        let typed = Rule::single("category", ".category b")
            .with_key_selector(".category .label")
            .with_manual_key("genre");
        let fallback = Rule::single("category", ".category b").with_key_selector(".nope");

        let records = assemble(&[from_element], &doc);
        assert_eq!(field(&records[0], "Category").as_deref(), Some("Fiction"));

        let records = assemble(&[typed], &doc);
        assert_eq!(field(&records[0], "genre").as_deref(), Some("Fiction"));

        let records = assemble(&[fallback], &doc);
        assert_eq!(field(&records[0], "category").as_deref(), Some("Fiction"));
    }

    #[test]
    fn test_list_key_is_scoped_to_container() {
        let doc = HtmlDocument::parse(CATALOG);
        // "em" exists in every container; "h1" only outside them
        let scoped = Rule::multiple("price", ".price-box", Some("span")).with_key_selector("em");
        let outside = Rule::multiple("price", ".price-box", Some("span")).with_key_selector("h1");

        let records = assemble(&[scoped], &doc);
        assert_eq!(records.len(), 2);
        assert_eq!(field(&records[1], "Price").as_deref(), Some("4.50"));

        let records = assemble(&[outside], &doc);
        assert_eq!(field(&records[0], "price").as_deref(), Some("9.99"));
        assert_eq!(field(&records[0], "Book Shop"), None);
    }

    #[test]
    fn test_container_text_without_relative_selector() {
        let doc = HtmlDocument::parse(CATALOG);
        let rules = vec![Rule::multiple("title", ".title-box", None)];
        let records = assemble(&rules, &doc);
        let titles: Vec<_> = records.iter().filter_map(|r| field(r, "title")).collect();
        assert_eq!(titles, vec!["Dune", "Emma", "Ulysses"]);
    }

    #[test]
    fn test_containers_without_value_are_skipped() {
        let html = r#"
        <html><body>
            <div class="row"><span class="v">1</span></div>
            <div class="row"></div>
            <div class="row"><span class="v">3</span></div>
        </body></html>
        "#;
        let doc = HtmlDocument::parse(html);
        let rules = vec![Rule::multiple("v", ".row", Some(".v"))];
        let values: Vec<_> = assemble(&rules, &doc)
            .iter()
            .filter_map(|r| field(r, "v"))
            .collect();
        assert_eq!(values, vec!["1", "3"]);
    }

    #[test]
    fn test_later_fields_overwrite_on_key_collision() {
        let doc = HtmlDocument::parse(CATALOG);
        let rules = vec![
            Rule::single("name", ".site"),
            Rule::multiple("name", ".title-box", Some("a")),
        ];
        let records = assemble(&rules, &doc);
        assert_eq!(records.len(), 3);
        assert_eq!(field(&records[0], "name").as_deref(), Some("Dune"));
    }

    #[test]
    fn test_invalid_selector_is_a_miss() {
        let doc = HtmlDocument::parse(CATALOG);
        let rules = vec![
            Rule::multiple("broken", "li[", None),
            Rule::single("site", ".site"),
        ];
        let records = assemble(&rules, &doc);
        assert_eq!(records.len(), 1);
        assert_eq!(field(&records[0], "site").as_deref(), Some("Book Shop"));
    }

    #[test]
    fn test_preview_truncates() {
        let rows: String = (0..8).map(|i| format!("<p class=\"row\">{i}</p>")).collect();
        let doc = HtmlDocument::parse(&format!("<html><body>{rows}</body></html>"));
        let rules = vec![Rule::multiple("n", ".row", None)];

        assert_eq!(assemble(&rules, &doc).len(), 8);
        let previewed = preview(&rules, &doc, PREVIEW_LIMIT);
        assert_eq!(previewed.len(), 5);
        assert_eq!(field(&previewed[4], "n").as_deref(), Some("4"));
    }
}
