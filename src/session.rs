//! Interactive rule selection
//!
//! A `SelectionSession` walks the user through the clicks that define one
//! rule:
//!
//! | kind          | steps                                |
//! |---------------|--------------------------------------|
//! | `Multiple`    | container → value → key → name       |
//! | `Single`      | value → key → name                   |
//! | `NextButton`  | value → name                         |
//!
//! The key step accepts either a click or a typed key. Rejected input leaves
//! the session where it was. The overlay is torn down when the session is
//! dropped, whether it completed or was cancelled.

use tracing::debug;

use crate::dom::{ElementInspect, Scope};
use crate::error::SelectionError;
use crate::rules::{Rule, RuleKind};
use crate::selector::SelectorSynthesizer;

/// Name suggested for pagination rules
pub const NEXT_BUTTON_NAME: &str = "Next button";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStep {
    Container,
    Value,
    Key,
    Name,
    Done,
}

/// What the overlay should ask the user for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    PickContainer,
    PickValue { inside_container: bool },
    PickNextButton,
    PickKey { inside_container: bool },
    NameRule { suggested: String },
}

/// Visual affordances of a selection, provided by the host page.
pub trait SelectionOverlay<N> {
    fn show_prompt(&mut self, prompt: &Prompt);

    /// Element under the pointer, or `None` to hide the hover box
    fn hover(&mut self, element: Option<N>);

    /// Keep `element` highlighted until teardown
    fn mark(&mut self, element: N);

    fn reject(&mut self, error: &SelectionError);

    /// Remove every affordance and stop capturing input
    fn teardown(&mut self);
}

pub struct SelectionSession<N, O>
where
    N: Copy + Eq,
    O: SelectionOverlay<N>,
{
    kind: RuleKind,
    step: SelectionStep,
    container: Option<N>,
    draft: Rule,
    synthesizer: SelectorSynthesizer,
    overlay: O,
}

impl<N, O> SelectionSession<N, O>
where
    N: Copy + Eq,
    O: SelectionOverlay<N>,
{
    pub fn begin(kind: RuleKind, synthesizer: SelectorSynthesizer, mut overlay: O) -> Self {
        let (step, prompt) = match kind {
            RuleKind::Multiple => (SelectionStep::Container, Prompt::PickContainer),
            RuleKind::Single => (SelectionStep::Value, Prompt::PickValue { inside_container: false }),
            RuleKind::NextButton => (SelectionStep::Value, Prompt::PickNextButton),
        };
        overlay.show_prompt(&prompt);
        debug!("Selection started for {:?} rule", kind);

        Self {
            kind,
            step,
            container: None,
            draft: Rule::draft(kind),
            synthesizer,
            overlay,
        }
    }

    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    pub fn step(&self) -> SelectionStep {
        self.step
    }

    pub fn container(&self) -> Option<N> {
        self.container
    }

    pub fn draft(&self) -> &Rule {
        &self.draft
    }

    pub fn overlay(&self) -> &O {
        &self.overlay
    }

    pub fn pointer_moved<D: ElementInspect<Node = N>>(&mut self, dom: &D, x: f64, y: f64) {
        self.overlay.hover(dom.element_at_point(x, y));
    }

    pub fn click_at<D: ElementInspect<Node = N>>(
        &mut self,
        dom: &D,
        x: f64,
        y: f64,
    ) -> Result<SelectionStep, SelectionError> {
        match dom.element_at_point(x, y) {
            Some(element) => self.click(dom, element),
            None => self.rejected(SelectionError::NothingUnderPointer),
        }
    }

    /// Consume one element click for the current step.
    pub fn click<D: ElementInspect<Node = N>>(
        &mut self,
        dom: &D,
        element: N,
    ) -> Result<SelectionStep, SelectionError> {
        match self.step {
            SelectionStep::Container => {
                let selector = self.synthesizer.synthesize(dom, element, Scope::Document);
                if selector.is_empty() {
                    return self.rejected(SelectionError::SynthesisFailed);
                }
                self.draft.selector = selector;
                self.container = Some(element);
                self.overlay.mark(element);
                self.advance(SelectionStep::Value, Prompt::PickValue { inside_container: true })
            }
            SelectionStep::Value => {
                let selector = self.scoped_selector(dom, element)?;
                match self.container {
                    Some(_) => self.draft.relative_selector = Some(selector),
                    None => self.draft.selector = selector,
                }
                if self.kind == RuleKind::NextButton {
                    let suggested = NEXT_BUTTON_NAME.to_string();
                    self.advance(SelectionStep::Name, Prompt::NameRule { suggested })
                } else {
                    let inside_container = self.container.is_some();
                    self.advance(SelectionStep::Key, Prompt::PickKey { inside_container })
                }
            }
            SelectionStep::Key => {
                let selector = self.scoped_selector(dom, element)?;
                self.draft.key_selector = Some(selector);
                self.advance(SelectionStep::Name, Prompt::NameRule { suggested: String::new() })
            }
            step @ (SelectionStep::Name | SelectionStep::Done) => {
                self.rejected(SelectionError::UnexpectedInput { step })
            }
        }
    }

    /// Type the field name instead of clicking a key element.
    pub fn use_manual_key(&mut self, key: &str) -> Result<SelectionStep, SelectionError> {
        if self.step != SelectionStep::Key {
            return self.rejected(SelectionError::UnexpectedInput { step: self.step });
        }
        let key = key.trim();
        if key.is_empty() {
            return self.rejected(SelectionError::EmptyInput { field: "field name" });
        }
        self.draft.manual_key = Some(key.to_string());
        let suggested = key.to_string();
        self.advance(SelectionStep::Name, Prompt::NameRule { suggested })
    }

    /// Name the rule and finish. The caller drops the session afterwards.
    pub fn submit_name(&mut self, name: &str) -> Result<Rule, SelectionError> {
        if self.step != SelectionStep::Name {
            return self.rejected(SelectionError::UnexpectedInput { step: self.step });
        }
        let name = name.trim();
        if name.is_empty() {
            return self.rejected(SelectionError::EmptyInput { field: "rule name" });
        }
        self.draft.name = name.to_string();
        self.step = SelectionStep::Done;
        debug!("Selection complete: {:?}", self.draft);
        Ok(self.draft.clone())
    }

    /// Selector for a value or key element: relative to the container when
    /// there is one, absolute otherwise.
    fn scoped_selector<D: ElementInspect<Node = N>>(
        &mut self,
        dom: &D,
        element: N,
    ) -> Result<String, SelectionError> {
        let scope = match self.container {
            Some(container) => {
                if container == element || !dom.contains(container, element) {
                    return self.rejected(SelectionError::OutsideContainer);
                }
                Scope::Within(container)
            }
            None => Scope::Document,
        };

        let selector = self.synthesizer.synthesize(dom, element, scope);
        if selector.is_empty() {
            return self.rejected(SelectionError::SynthesisFailed);
        }
        Ok(selector)
    }

    fn advance(&mut self, step: SelectionStep, prompt: Prompt) -> Result<SelectionStep, SelectionError> {
        self.step = step;
        self.overlay.show_prompt(&prompt);
        Ok(step)
    }

    fn rejected<T>(&mut self, error: SelectionError) -> Result<T, SelectionError> {
        debug!("Selection input rejected at {:?}: {}", self.step, error);
        self.overlay.reject(&error);
        Err(error)
    }
}

impl<N, O> Drop for SelectionSession<N, O>
where
    N: Copy + Eq,
    O: SelectionOverlay<N>,
{
    fn drop(&mut self) {
        self.overlay.teardown();
    }
}
