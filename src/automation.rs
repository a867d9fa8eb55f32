//! Pagination automation
//!
//! `PaginationController` sequences a crawl: extract the current page, wait
//! `delay_ms`, click the next button, and extract again once the tracked page
//! reports a fresh load.
//!
//! ```text
//!            start                      pause
//!   idle ───────────► running ───────────────► paused
//!    ▲  ◄─────────────  │  ▲ ◄─────────────────  │
//!    │  stop/not found  │  └──────── start ──────┘
//!    └───────────────── stop ────────────────────┘
//! ```
//!
//! At most one delayed continuation is pending, and only while running;
//! leaving `running` aborts it. A next button that cannot be found, or a
//! click that cannot be delivered to the page, ends the run. There is no
//! retry.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{AutomationError, DeliveryError};
use crate::messages::{AgentRequest, PageId};
use crate::rules::{validate_for_run, ExtractionRecord, Rule, RuleKind};
use crate::store::StateStore;

pub const DEFAULT_DELAY_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutomationStatus {
    #[default]
    Idle,
    Running,
    Paused,
}

/// Process-wide crawl state, persisted after every change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationState {
    pub status: AutomationStatus,
    #[serde(default)]
    pub current_page: Option<PageId>,
    #[serde(default)]
    pub current_url: Option<String>,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_delay_ms() -> u64 {
    DEFAULT_DELAY_MS
}

impl Default for AutomationState {
    fn default() -> Self {
        Self {
            status: AutomationStatus::Idle,
            current_page: None,
            current_url: None,
            delay_ms: DEFAULT_DELAY_MS,
        }
    }
}

impl AutomationState {
    /// The same state, idle
    pub fn normalized(self) -> Self {
        Self {
            status: AutomationStatus::Idle,
            ..self
        }
    }
}

/// Delivery of requests to the page-context agent.
pub trait PageChannel: Send {
    fn send(&self, request: AgentRequest) -> Result<(), DeliveryError>;
}

impl PageChannel for mpsc::UnboundedSender<AgentRequest> {
    fn send(&self, request: AgentRequest) -> Result<(), DeliveryError> {
        mpsc::UnboundedSender::send(self, request).map_err(|_| DeliveryError::Disconnected)
    }
}

/// Raised when a scheduled delay elapses; feed it back to
/// [`PaginationController::on_continuation_due`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContinuationDue {
    pub generation: u64,
}

struct Continuation {
    generation: u64,
    handle: JoinHandle<()>,
}

pub struct PaginationController<C: PageChannel> {
    state: AutomationState,
    rules: Vec<Rule>,
    records: Vec<ExtractionRecord>,
    pending: Option<Continuation>,
    generation: u64,
    channel: C,
    store: Arc<dyn StateStore>,
    wakeups: mpsc::UnboundedSender<ContinuationDue>,
}

impl<C: PageChannel> PaginationController<C> {
    /// Create a controller around restored `state`. The receiver yields
    /// continuations as their delays elapse.
    pub fn new(
        state: AutomationState,
        channel: C,
        store: Arc<dyn StateStore>,
    ) -> (Self, mpsc::UnboundedReceiver<ContinuationDue>) {
        let (wakeups, wakeup_rx) = mpsc::unbounded_channel();
        let controller = Self {
            state,
            rules: Vec::new(),
            records: Vec::new(),
            pending: None,
            generation: 0,
            channel,
            store,
            wakeups,
        };
        (controller, wakeup_rx)
    }

    pub fn state(&self) -> &AutomationState {
        &self.state
    }

    pub fn status(&self) -> AutomationStatus {
        self.state.status
    }

    /// Records accumulated since the last start
    pub fn records(&self) -> &[ExtractionRecord] {
        &self.records
    }

    pub fn has_pending_continuation(&self) -> bool {
        self.pending.is_some()
    }

    /// Begin a crawl on `page`, extracting it immediately.
    pub fn start(
        &mut self,
        rules: &[Rule],
        delay_ms: u64,
        page: PageId,
        url: Option<String>,
    ) -> Result<(), AutomationError> {
        if self.state.status == AutomationStatus::Running {
            return Err(AutomationError::InvalidTransition {
                from: self.state.status,
                action: "start",
            });
        }
        validate_for_run(rules)?;

        info!("Starting automation on {} with delay {}ms", page, delay_ms);
        self.cancel_pending();
        self.records.clear();
        self.rules = rules.to_vec();
        self.state.status = AutomationStatus::Running;
        self.state.delay_ms = delay_ms;
        self.state.current_page = Some(page);
        self.state.current_url = url;
        self.persist();

        self.request_extraction();
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), AutomationError> {
        if self.state.status != AutomationStatus::Running {
            return Err(AutomationError::InvalidTransition {
                from: self.state.status,
                action: "pause",
            });
        }
        info!("Pausing automation");
        self.cancel_pending();
        self.state.status = AutomationStatus::Paused;
        self.persist();
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), AutomationError> {
        if self.state.status == AutomationStatus::Idle {
            return Err(AutomationError::InvalidTransition {
                from: self.state.status,
                action: "stop",
            });
        }
        info!("Stopping automation");
        self.go_idle();
        Ok(())
    }

    /// Change the delay used by the next scheduled continuation
    pub fn set_delay(&mut self, delay_ms: u64) {
        self.state.delay_ms = delay_ms;
        self.persist();
    }

    /// Records for the current page arrived.
    pub fn on_extracted(&mut self, records: Vec<ExtractionRecord>) {
        if self.state.status != AutomationStatus::Running {
            debug!(
                "Discarding {} records extracted while {:?}",
                records.len(),
                self.state.status
            );
            return;
        }

        info!("Extracted {} records", records.len());
        self.records.extend(records);

        if self.pending.is_some() {
            debug!("Continuation already pending, not scheduling another");
            return;
        }
        self.schedule_continuation();
    }

    pub fn on_continuation_due(&mut self, due: ContinuationDue) {
        let current = self.pending.as_ref().map(|c| c.generation);
        if current != Some(due.generation) {
            debug!("Ignoring stale continuation {}", due.generation);
            return;
        }
        self.pending = None;

        if self.state.status != AutomationStatus::Running {
            return;
        }
        self.click_next();
    }

    /// A page finished loading; only the tracked page restarts the cycle.
    pub fn on_page_loaded(&mut self, page: &PageId, url: Option<String>) {
        if self.state.status != AutomationStatus::Running {
            return;
        }
        if self.state.current_page.as_ref() != Some(page) {
            debug!("Ignoring load of untracked page {}", page);
            return;
        }

        debug!("Tracked page {} loaded", page);
        if url.is_some() {
            self.state.current_url = url;
        }
        self.persist();
        self.request_extraction();
    }

    /// The next button is gone (or unreachable): the crawl is over.
    pub fn on_next_not_found(&mut self) {
        if self.state.status == AutomationStatus::Idle {
            debug!("Next button not found while idle, ignoring");
            return;
        }
        info!("Next button not found, stopping automation");
        self.go_idle();
    }

    fn request_extraction(&mut self) {
        let request = AgentRequest::Extract {
            rules: self.rules.clone(),
        };
        if let Err(e) = self.channel.send(request) {
            warn!("Could not request extraction: {}", e);
            self.go_idle();
        }
    }

    fn click_next(&mut self) {
        let Some(rule) = self.rules.iter().find(|r| r.kind == RuleKind::NextButton) else {
            error!("Next button rule not found");
            self.on_next_not_found();
            return;
        };

        let request = AgentRequest::ClickNext {
            selector: rule.selector.clone(),
        };
        // An unreachable page counts as a missing button
        if let Err(e) = self.channel.send(request) {
            warn!("Could not deliver click to the page: {}", e);
            self.on_next_not_found();
        }
    }

    fn schedule_continuation(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        let delay = Duration::from_millis(self.state.delay_ms);
        let wakeups = self.wakeups.clone();

        debug!("Clicking next in {:?}", delay);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = wakeups.send(ContinuationDue { generation });
        });
        self.pending = Some(Continuation { generation, handle });
    }

    fn cancel_pending(&mut self) {
        if let Some(continuation) = self.pending.take() {
            continuation.handle.abort();
        }
    }

    fn go_idle(&mut self) {
        self.cancel_pending();
        self.state.status = AutomationStatus::Idle;
        self.persist();
    }

    fn persist(&self) {
        if let Err(e) = self.store.save_state(&self.state) {
            error!("Error saving automation state: {}", e);
        }
    }
}

impl<C: PageChannel> Drop for PaginationController<C> {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}
