//! Coordinator
//!
//! Owns the rule set, the pagination controller and persistence. UI requests
//! and agent notifications are dispatched one at a time; the controller's
//! continuations come back through the same loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::automation::{
    AutomationState, AutomationStatus, ContinuationDue, PageChannel, PaginationController,
    DEFAULT_DELAY_MS,
};
use crate::export::Export;
use crate::messages::{AgentNotification, AgentRequest, PageId, UiEvent, UiRequest};
use crate::rules::{ExtractionRecord, RuleSet};
use crate::store::{restore_state, StateStore};

pub struct Coordinator<C: PageChannel + Clone> {
    rules: RuleSet,
    controller: PaginationController<C>,
    wakeups: mpsc::UnboundedReceiver<ContinuationDue>,
    agent: C,
    store: Arc<dyn StateStore>,
    ui: mpsc::UnboundedSender<UiEvent>,
    page: PageId,
    page_url: Option<String>,
    default_delay_ms: u64,
    published: Option<(AutomationStatus, Option<String>)>,
}

impl<C: PageChannel + Clone> Coordinator<C> {
    /// Restore rules and state from `store` for the page `page`.
    pub fn new(
        store: Arc<dyn StateStore>,
        agent: C,
        ui: mpsc::UnboundedSender<UiEvent>,
        page: PageId,
    ) -> Self {
        let rules = match store.load_rules() {
            Ok(rules) => RuleSet::from_rules(rules),
            Err(e) => {
                error!("Error loading rules: {}", e);
                RuleSet::new()
            }
        };
        let state = restore_state(store.as_ref(), AutomationState::default());
        let (controller, wakeups) = PaginationController::new(state, agent.clone(), store.clone());

        Self {
            rules,
            controller,
            wakeups,
            agent,
            store,
            ui,
            page,
            page_url: None,
            default_delay_ms: DEFAULT_DELAY_MS,
            published: None,
        }
    }

    /// Delay used when a start request carries none
    pub fn with_default_delay(mut self, delay_ms: u64) -> Self {
        if delay_ms > 0 {
            self.default_delay_ms = delay_ms;
        }
        self
    }

    pub fn with_page_url(mut self, url: impl Into<String>) -> Self {
        self.page_url = Some(url.into());
        self
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn state(&self) -> &AutomationState {
        self.controller.state()
    }

    pub fn records(&self) -> &[ExtractionRecord] {
        self.controller.records()
    }

    /// Serve until the UI side hangs up.
    pub async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<UiRequest>,
        mut notifications: mpsc::UnboundedReceiver<AgentNotification>,
    ) {
        info!("Coordinator started for page {}", self.page);
        self.publish_rules();
        self.publish_status();

        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => self.handle_ui(request),
                    None => break,
                },
                Some(notification) = notifications.recv() => self.handle_agent(notification),
                Some(due) = self.wakeups.recv() => {
                    self.controller.on_continuation_due(due);
                    self.publish_status();
                }
            }
        }
        info!("Coordinator stopped");
    }

    pub fn handle_ui(&mut self, request: UiRequest) {
        debug!("UI request: {:?}", request);
        match request {
            UiRequest::StartAutomation { delay_ms } => self.start(delay_ms),
            UiRequest::PauseAutomation => {
                if let Err(e) = self.controller.pause() {
                    self.report(e.to_string());
                }
            }
            UiRequest::StopAutomation => {
                if let Err(e) = self.controller.stop() {
                    self.report(e.to_string());
                }
            }
            UiRequest::SetDelay { delay_ms } => {
                let delay_ms = if delay_ms == 0 { self.default_delay_ms } else { delay_ms };
                self.controller.set_delay(delay_ms);
            }
            UiRequest::BeginSelection { kind } => {
                if let Err(e) = self.agent.send(AgentRequest::BeginSelection { kind }) {
                    warn!("Cannot begin selection: {}", e);
                }
            }
            UiRequest::DeleteRule { id } => {
                if self.rules.remove(&id).is_some() {
                    info!("Deleted rule {}", id);
                    self.save_rules();
                    self.publish_rules();
                } else {
                    debug!("No rule with id {}", id);
                }
            }
            UiRequest::RequestPreview => {
                let rules = self.rules.as_slice().to_vec();
                if let Err(e) = self.agent.send(AgentRequest::Preview { rules }) {
                    debug!("Preview not delivered: {}", e);
                }
            }
            UiRequest::RequestDownload => self.download(),
        }
        self.publish_status();
    }

    pub fn handle_agent(&mut self, notification: AgentNotification) {
        match notification {
            AgentNotification::Pong => debug!("Agent is alive"),
            AgentNotification::Extracted { records } => self.controller.on_extracted(records),
            AgentNotification::NextNotFound => self.controller.on_next_not_found(),
            AgentNotification::SelectionComplete { rule } => {
                info!("Saving {:?} rule '{}'", rule.kind, rule.name);
                self.rules.add(rule);
                self.save_rules();
                self.publish_rules();
            }
            AgentNotification::PreviewResult { records } => {
                self.send_ui(UiEvent::Preview { records });
            }
            AgentNotification::PageLoaded { page, url } => {
                if page == self.page && url.is_some() {
                    self.page_url = url.clone();
                }
                self.controller.on_page_loaded(&page, url);
            }
        }
        self.publish_status();
    }

    fn start(&mut self, delay_ms: Option<u64>) {
        // The run uses the rules as persisted
        match self.store.load_rules() {
            Ok(rules) => self.rules = RuleSet::from_rules(rules),
            Err(e) => error!("Error loading rules: {}", e),
        }

        let delay_ms = match delay_ms {
            Some(0) => self.default_delay_ms,
            Some(delay_ms) => delay_ms,
            None => self.controller.state().delay_ms,
        };
        let result = self.controller.start(
            self.rules.as_slice(),
            delay_ms,
            self.page.clone(),
            self.page_url.clone(),
        );
        if let Err(e) = result {
            self.report(e.to_string());
        }
    }

    fn download(&mut self) {
        match Export::new(self.controller.records()).and_then(|export| export.render()) {
            Ok((file_name, contents)) => {
                info!("Prepared {} for download", file_name);
                self.send_ui(UiEvent::Download { file_name, contents });
            }
            Err(e) => self.report(e.to_string()),
        }
    }

    fn save_rules(&self) {
        if let Err(e) = self.store.save_rules(self.rules.as_slice()) {
            error!("Error saving rules: {}", e);
        }
    }

    fn publish_rules(&self) {
        self.send_ui(UiEvent::RulesChanged {
            rules: self.rules.as_slice().to_vec(),
        });
    }

    /// Send a status update when status or URL changed since the last one
    fn publish_status(&mut self) {
        let state = self.controller.state();
        let current = (state.status, state.current_url.clone());
        if self.published.as_ref() == Some(&current) {
            return;
        }
        self.send_ui(UiEvent::StatusUpdate {
            status: current.0,
            current_url: current.1.clone(),
        });
        self.published = Some(current);
    }

    fn report(&self, message: String) {
        warn!("{}", message);
        self.send_ui(UiEvent::Error { message });
    }

    fn send_ui(&self, event: UiEvent) {
        if self.ui.send(event).is_err() {
            debug!("UI is gone, dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::rules::{Rule, RuleKind};
    use crate::store::MemoryStore;

    struct Harness {
        coordinator: Coordinator<mpsc::UnboundedSender<AgentRequest>>,
        agent: mpsc::UnboundedReceiver<AgentRequest>,
        ui: mpsc::UnboundedReceiver<UiEvent>,
        store: Arc<MemoryStore>,
    }

    fn harness(rules: Vec<Rule>) -> Harness {
        let store = Arc::new(MemoryStore::with_rules(rules));
        let (agent_tx, agent) = mpsc::unbounded_channel();
        let (ui_tx, ui) = mpsc::unbounded_channel();
        let coordinator = Coordinator::new(store.clone(), agent_tx, ui_tx, PageId::new("tab-1"))
            .with_page_url("https://shop.test/1");
        Harness {
            coordinator,
            agent,
            ui,
            store,
        }
    }

    fn drain(ui: &mut mpsc::UnboundedReceiver<UiEvent>) -> Vec<UiEvent> {
        let mut events = Vec::new();
        while let Ok(event) = ui.try_recv() {
            events.push(event);
        }
        events
    }

    fn statuses(events: &[UiEvent]) -> Vec<AutomationStatus> {
        events
            .iter()
            .filter_map(|e| match e {
                UiEvent::StatusUpdate { status, .. } => Some(*status),
                _ => None,
            })
            .collect()
    }

    fn crawl_rules() -> Vec<Rule> {
        vec![Rule::single("title", "h1"), Rule::next_button("a.next")]
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_without_next_button_reports_error() {
        let mut h = harness(vec![Rule::single("title", "h1")]);
        h.coordinator.handle_ui(UiRequest::StartAutomation { delay_ms: None });

        let events = drain(&mut h.ui);
        assert!(events.iter().any(|e| matches!(
            e,
            UiEvent::Error { message } if message.contains("next-button")
        )));
        assert_eq!(h.coordinator.state().status, AutomationStatus::Idle);
        assert!(h.agent.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_uses_persisted_rules_and_delay() {
        let mut h = harness(Vec::new());
        h.store.save_rules(&crawl_rules()).unwrap();

        h.coordinator.handle_ui(UiRequest::StartAutomation { delay_ms: Some(0) });
        assert_eq!(h.coordinator.state().status, AutomationStatus::Running);
        assert_eq!(h.coordinator.state().delay_ms, DEFAULT_DELAY_MS);
        assert_eq!(h.coordinator.state().current_url.as_deref(), Some("https://shop.test/1"));
        assert_eq!(h.coordinator.rules().len(), 2);

        match h.agent.try_recv().unwrap() {
            AgentRequest::Extract { rules } => assert_eq!(rules.len(), 2),
            other => panic!("unexpected request {:?}", other),
        }
        assert_eq!(statuses(&drain(&mut h.ui)), vec![AutomationStatus::Running]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_selection_complete_saves_rule() {
        let mut h = harness(vec![Rule::next_button("a.old")]);
        h.coordinator.handle_ui(UiRequest::BeginSelection { kind: RuleKind::NextButton });
        assert_eq!(
            h.agent.try_recv().unwrap(),
            AgentRequest::BeginSelection { kind: RuleKind::NextButton }
        );

        h.coordinator.handle_agent(AgentNotification::SelectionComplete {
            rule: Rule::next_button("a.new"),
        });
        let stored = h.store.load_rules().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].selector, "a.new");
        assert!(drain(&mut h.ui)
            .iter()
            .any(|e| matches!(e, UiEvent::RulesChanged { rules } if rules.len() == 1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_rule() {
        let mut h = harness(crawl_rules());
        let id = h.coordinator.rules().as_slice()[0].id.clone();

        h.coordinator.handle_ui(UiRequest::DeleteRule { id });
        assert_eq!(h.coordinator.rules().len(), 1);
        assert_eq!(h.store.load_rules().unwrap().len(), 1);

        h.coordinator.handle_ui(UiRequest::DeleteRule { id: "rule_missing".into() });
        assert_eq!(h.coordinator.rules().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_preview_is_forwarded_both_ways() {
        let mut h = harness(crawl_rules());
        h.coordinator.handle_ui(UiRequest::RequestPreview);
        assert!(matches!(h.agent.try_recv().unwrap(), AgentRequest::Preview { rules } if rules.len() == 2));

        let records = vec![ExtractionRecord::from([("title".to_string(), "A".to_string())])];
        h.coordinator.handle_agent(AgentNotification::PreviewResult { records: records.clone() });
        assert!(drain(&mut h.ui).contains(&UiEvent::Preview { records }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_preview_without_agent_is_silent() {
        let mut h = harness(crawl_rules());
        drop(h.agent);
        h.coordinator.handle_ui(UiRequest::RequestPreview);
        assert!(!drain(&mut h.ui).iter().any(|e| matches!(e, UiEvent::Error { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_download() {
        let mut h = harness(crawl_rules());
        h.coordinator.handle_ui(UiRequest::RequestDownload);
        assert!(drain(&mut h.ui)
            .iter()
            .any(|e| matches!(e, UiEvent::Error { message } if message == "No data available for download")));

        h.coordinator.handle_ui(UiRequest::StartAutomation { delay_ms: Some(50) });
        h.coordinator.handle_agent(AgentNotification::Extracted {
            records: vec![ExtractionRecord::from([("title".to_string(), "A".to_string())])],
        });
        h.coordinator.handle_ui(UiRequest::PauseAutomation);
        h.coordinator.handle_ui(UiRequest::RequestDownload);

        let download = drain(&mut h.ui).into_iter().find_map(|e| match e {
            UiEvent::Download { file_name, contents } => Some((file_name, contents)),
            _ => None,
        });
        let (file_name, contents) = download.unwrap();
        assert!(file_name.starts_with("scraped_data_"));
        let parsed: Vec<ExtractionRecord> = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_drives_pagination() {
        let h = harness(crawl_rules());
        let Harness {
            coordinator,
            mut agent,
            mut ui,
            ..
        } = h;
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let (note_tx, note_rx) = mpsc::unbounded_channel();

        let page_side = async move {
            ui_tx.send(UiRequest::StartAutomation { delay_ms: Some(200) }).unwrap();
            assert!(matches!(agent.recv().await, Some(AgentRequest::Extract { .. })));

            note_tx
                .send(AgentNotification::Extracted { records: vec![ExtractionRecord::new()] })
                .unwrap();
            let started = tokio::time::Instant::now();
            assert_eq!(
                agent.recv().await,
                Some(AgentRequest::ClickNext { selector: "a.next".into() })
            );
            assert!(started.elapsed() >= Duration::from_millis(200));

            note_tx.send(AgentNotification::NextNotFound).unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(ui_tx);
        };

        tokio::join!(coordinator.run(ui_rx, note_rx), page_side);

        let statuses = statuses(&drain(&mut ui));
        assert_eq!(
            statuses,
            vec![AutomationStatus::Idle, AutomationStatus::Running, AutomationStatus::Idle]
        );
    }
}
