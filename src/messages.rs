//! Messages exchanged between contexts
//!
//! One closed enum per direction. Requests and notifications are tagged with
//! `"action"`, UI events with `"event"`, matching the JSON the extension
//! contexts already exchange.

use serde::{Deserialize, Serialize};

use crate::automation::AutomationStatus;
use crate::rules::{ExtractionRecord, Rule, RuleKind};

/// Identifies the page (tab) a crawl is bound to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(pub String);

impl PageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Coordinator → page agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum AgentRequest {
    Ping,
    Extract { rules: Vec<Rule> },
    ClickNext { selector: String },
    BeginSelection { kind: RuleKind },
    Preview { rules: Vec<Rule> },
}

/// Page agent → coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum AgentNotification {
    Pong,
    Extracted { records: Vec<ExtractionRecord> },
    NextNotFound,
    SelectionComplete { rule: Rule },
    PreviewResult { records: Vec<ExtractionRecord> },
    PageLoaded { page: PageId, url: Option<String> },
}

/// UI → coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum UiRequest {
    StartAutomation {
        #[serde(default, rename = "delay")]
        delay_ms: Option<u64>,
    },
    PauseAutomation,
    StopAutomation,
    SetDelay {
        #[serde(rename = "delay")]
        delay_ms: u64,
    },
    BeginSelection { kind: RuleKind },
    DeleteRule { id: String },
    RequestPreview,
    RequestDownload,
}

/// Coordinator → UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum UiEvent {
    StatusUpdate {
        status: AutomationStatus,
        #[serde(rename = "currentUrl")]
        current_url: Option<String>,
    },
    RulesChanged { rules: Vec<Rule> },
    Preview { records: Vec<ExtractionRecord> },
    Download {
        #[serde(rename = "fileName")]
        file_name: String,
        contents: String,
    },
    Error { message: String },
}
