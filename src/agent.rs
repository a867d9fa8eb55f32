//! Page-context agent
//!
//! Lives next to one page's document. Answers coordinator requests against
//! it and owns the selection session, if any. A navigation drops the session
//! (tearing its overlay down) before the new document is installed.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::assembler::{assemble, preview, PREVIEW_LIMIT};
use crate::dom::{DocumentQuery, ElementInspect, Scope};
use crate::error::SelectionError;
use crate::messages::{AgentNotification, AgentRequest, PageId};
use crate::rules::RuleKind;
use crate::selector::SelectorSynthesizer;
use crate::session::{SelectionOverlay, SelectionSession, SelectionStep};

pub struct PageAgent<D, O, F>
where
    D: ElementInspect,
    O: SelectionOverlay<D::Node>,
    F: FnMut() -> O,
{
    page: PageId,
    url: Option<String>,
    document: D,
    synthesizer: SelectorSynthesizer,
    preview_limit: usize,
    overlays: F,
    session: Option<SelectionSession<D::Node, O>>,
    notifications: mpsc::UnboundedSender<AgentNotification>,
}

impl<D, O, F> PageAgent<D, O, F>
where
    D: ElementInspect,
    O: SelectionOverlay<D::Node>,
    F: FnMut() -> O,
{
    /// `overlays` builds a fresh overlay for every selection session.
    pub fn new(
        page: PageId,
        document: D,
        overlays: F,
        notifications: mpsc::UnboundedSender<AgentNotification>,
    ) -> Self {
        Self {
            page,
            url: None,
            document,
            synthesizer: SelectorSynthesizer::default(),
            preview_limit: PREVIEW_LIMIT,
            overlays,
            session: None,
            notifications,
        }
    }

    pub fn with_synthesizer(mut self, synthesizer: SelectorSynthesizer) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    pub fn with_preview_limit(mut self, limit: usize) -> Self {
        self.preview_limit = limit;
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn page(&self) -> &PageId {
        &self.page
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn document(&self) -> &D {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut D {
        &mut self.document
    }

    pub fn is_selecting(&self) -> bool {
        self.session.is_some()
    }

    pub fn selection_step(&self) -> Option<SelectionStep> {
        self.session.as_ref().map(|s| s.step())
    }

    pub fn handle(&mut self, request: AgentRequest) {
        match request {
            AgentRequest::Ping => self.notify(AgentNotification::Pong),
            AgentRequest::Extract { rules } => {
                let records = assemble(&rules, &self.document);
                self.notify(AgentNotification::Extracted { records });
            }
            AgentRequest::ClickNext { selector } => self.click_next(&selector),
            AgentRequest::BeginSelection { kind } => self.begin_selection(kind),
            AgentRequest::Preview { rules } => {
                let records = preview(&rules, &self.document, self.preview_limit);
                self.notify(AgentNotification::PreviewResult { records });
            }
        }
    }

    /// Replace the document after a navigation and announce the load.
    pub fn load_page(&mut self, document: D, url: Option<String>) {
        if self.session.take().is_some() {
            debug!("Navigation ended the selection in progress");
        }
        self.document = document;
        self.url = url.clone();
        self.notify(AgentNotification::PageLoaded {
            page: self.page.clone(),
            url,
        });
    }

    /// Start a selection, abandoning any previous one.
    pub fn begin_selection(&mut self, kind: RuleKind) {
        self.session = None;
        let overlay = (self.overlays)();
        self.session = Some(SelectionSession::begin(kind, self.synthesizer, overlay));
    }

    pub fn cancel_selection(&mut self) {
        if self.session.take().is_some() {
            debug!("Selection cancelled");
        }
    }

    pub fn pointer_moved(&mut self, x: f64, y: f64) {
        if let Some(session) = self.session.as_mut() {
            session.pointer_moved(&self.document, x, y);
        }
    }

    pub fn click_at(&mut self, x: f64, y: f64) -> Result<SelectionStep, SelectionError> {
        let session = self.session.as_mut().ok_or(SelectionError::NotSelecting)?;
        session.click_at(&self.document, x, y)
    }

    pub fn click_element(&mut self, element: D::Node) -> Result<SelectionStep, SelectionError> {
        let session = self.session.as_mut().ok_or(SelectionError::NotSelecting)?;
        session.click(&self.document, element)
    }

    pub fn use_manual_key(&mut self, key: &str) -> Result<SelectionStep, SelectionError> {
        let session = self.session.as_mut().ok_or(SelectionError::NotSelecting)?;
        session.use_manual_key(key)
    }

    /// Finish the selection and hand the rule to the coordinator.
    pub fn submit_name(&mut self, name: &str) -> Result<(), SelectionError> {
        let session = self.session.as_mut().ok_or(SelectionError::NotSelecting)?;
        let rule = session.submit_name(name)?;
        self.session = None;
        info!("Created {:?} rule '{}'", rule.kind, rule.name);
        self.notify(AgentNotification::SelectionComplete { rule });
        Ok(())
    }

    fn click_next(&mut self, selector: &str) {
        let target = match self.document.query_first(selector, Scope::Document) {
            Ok(target) => target,
            Err(e) => {
                warn!("Invalid next button selector: {}", e);
                None
            }
        };

        let clicked = match target {
            Some(element) => match self.document.click(element) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Could not click next button: {}", e);
                    false
                }
            },
            None => false,
        };

        if clicked {
            debug!("Clicked next button {}", selector);
        } else {
            info!("Next button not found: {}", selector);
            self.notify(AgentNotification::NextNotFound);
        }
    }

    fn notify(&self, notification: AgentNotification) {
        if self.notifications.send(notification).is_err() {
            debug!("Coordinator is gone, dropping notification");
        }
    }
}
