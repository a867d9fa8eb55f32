//! Extraction rules and records

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AutomationError;

/// One extracted record: field name to value
pub type ExtractionRecord = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// One field read from the first match of `selector`
    Single,
    /// One field per repeated container matched by `selector`
    Multiple,
    /// The pagination control
    NextButton,
}

/// User-authored description of where a field lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: RuleKind,
    pub name: String,
    /// Target element, or the repeated container for `Multiple`
    pub selector: String,
    /// Value element inside each container (`Multiple` only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_selector: Option<String>,
    /// Element whose text names the field; scoped to the container for `Multiple`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_selector: Option<String>,
    /// Typed field name, preferred over `key_selector`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_key: Option<String>,
}

impl Rule {
    /// Empty draft of the given kind with a fresh id
    pub fn draft(kind: RuleKind) -> Self {
        Self {
            id: new_rule_id(),
            kind,
            name: String::new(),
            selector: String::new(),
            relative_selector: None,
            key_selector: None,
            manual_key: None,
        }
    }

    pub fn single(name: &str, selector: &str) -> Self {
        Self {
            name: name.to_string(),
            selector: selector.to_string(),
            ..Self::draft(RuleKind::Single)
        }
    }

    pub fn multiple(name: &str, container: &str, relative: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            selector: container.to_string(),
            relative_selector: relative.map(String::from),
            ..Self::draft(RuleKind::Multiple)
        }
    }

    pub fn next_button(selector: &str) -> Self {
        Self {
            name: "Next button".to_string(),
            selector: selector.to_string(),
            ..Self::draft(RuleKind::NextButton)
        }
    }

    pub fn with_key_selector(mut self, selector: &str) -> Self {
        self.key_selector = Some(selector.to_string());
        self
    }

    pub fn with_manual_key(mut self, key: &str) -> Self {
        self.manual_key = Some(key.to_string());
        self
    }

    pub fn relative_selector(&self) -> Option<&str> {
        non_empty(self.relative_selector.as_deref())
    }

    pub fn key_selector(&self) -> Option<&str> {
        non_empty(self.key_selector.as_deref())
    }

    pub fn manual_key(&self) -> Option<&str> {
        non_empty(self.manual_key.as_deref().map(str::trim))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

pub fn new_rule_id() -> String {
    format!("rule_{}", Uuid::new_v4().simple())
}

/// Ordered rule collection holding at most one next-button rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from stored rules; of several next-button rules only the last survives
    pub fn from_rules(rules: Vec<Rule>) -> Self {
        let mut set = Self::new();
        for rule in rules {
            set.add(rule);
        }
        set
    }

    /// Append a rule, replacing any previous next-button rule when it is one
    pub fn add(&mut self, mut rule: Rule) {
        if rule.id.is_empty() {
            rule.id = new_rule_id();
        }
        if rule.kind == RuleKind::NextButton {
            self.rules.retain(|r| r.kind != RuleKind::NextButton);
        }
        self.rules.push(rule);
    }

    pub fn remove(&mut self, id: &str) -> Option<Rule> {
        let index = self.rules.iter().position(|r| r.id == id)?;
        Some(self.rules.remove(index))
    }

    pub fn next_button(&self) -> Option<&Rule> {
        self.rules.iter().find(|r| r.kind == RuleKind::NextButton)
    }

    pub fn as_slice(&self) -> &[Rule] {
        &self.rules
    }

    pub fn into_vec(self) -> Vec<Rule> {
        self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Check that `rules` can drive a crawl, returning the pagination rule
pub fn validate_for_run(rules: &[Rule]) -> Result<&Rule, AutomationError> {
    if rules.is_empty() {
        return Err(AutomationError::NoRules);
    }
    let mut next_buttons = rules.iter().filter(|r| r.kind == RuleKind::NextButton);
    let first = next_buttons.next().ok_or(AutomationError::MissingNextButton)?;
    let extra = next_buttons.count();
    if extra > 0 {
        return Err(AutomationError::MultipleNextButtons { count: extra + 1 });
    }
    Ok(first)
}
