//! Offline replay
//!
//! Stands in for the browser when pages are saved HTML files. The host
//! feeds coordinator requests to a `PageAgent`; when the agent clicks a next
//! button whose `href` names another local file, that file is loaded as the
//! new page.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use crate::agent::PageAgent;
use crate::assembler::assemble;
use crate::automation::AutomationStatus;
use crate::coordinator::Coordinator;
use crate::dom::{ElementInspect, HtmlDocument, NodeId};
use crate::error::{ReplayError, SelectionError};
use crate::messages::{AgentNotification, AgentRequest, PageId, UiEvent, UiRequest};
use crate::rules::{ExtractionRecord, Rule};
use crate::session::{Prompt, SelectionOverlay};

/// Page identifier used for replayed crawls
pub const REPLAY_PAGE: &str = "replay";

/// Overlay for hosts with no screen
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessOverlay;

impl<N: std::fmt::Debug> SelectionOverlay<N> for HeadlessOverlay {
    fn show_prompt(&mut self, prompt: &Prompt) {
        debug!("Prompt: {:?}", prompt);
    }

    fn hover(&mut self, _element: Option<N>) {}

    fn mark(&mut self, element: N) {
        debug!("Marked {:?}", element);
    }

    fn reject(&mut self, error: &SelectionError) {
        debug!("Rejected: {}", error);
    }

    fn teardown(&mut self) {}
}

pub fn file_url(path: &Path) -> Result<Url, ReplayError> {
    let absolute = fs::canonicalize(path).map_err(|source| ReplayError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Url::from_file_path(&absolute).map_err(|_| ReplayError::NotAFile(absolute.display().to_string()))
}

pub fn load_document(url: &Url) -> Result<HtmlDocument, ReplayError> {
    let path = url
        .to_file_path()
        .map_err(|_| ReplayError::NotAFile(url.to_string()))?;
    let source = fs::read_to_string(&path).map_err(|source| ReplayError::Io { path, source })?;
    Ok(HtmlDocument::parse(&source))
}

/// Target of a clicked link, resolved against the page it sits on
pub fn resolve_link(document: &HtmlDocument, element: NodeId, base: &Url) -> Option<Url> {
    let href = document.attribute(element, "href")?;
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }

    let mut target = base.join(href).ok()?;
    target.set_fragment(None);
    (target.scheme() == "file").then_some(target)
}

/// Assemble records from each saved page in turn.
pub fn extract_files(rules: &[Rule], paths: &[PathBuf]) -> Result<Vec<ExtractionRecord>, ReplayError> {
    let mut records = Vec::new();
    for path in paths {
        let source = fs::read_to_string(path).map_err(|source| ReplayError::Io {
            path: path.clone(),
            source,
        })?;
        let page = assemble(rules, &HtmlDocument::parse(&source));
        info!("{}: {} records", path.display(), page.len());
        records.extend(page);
    }
    Ok(records)
}

pub struct ReplayHost<O, F>
where
    O: SelectionOverlay<NodeId>,
    F: FnMut() -> O,
{
    agent: PageAgent<HtmlDocument, O, F>,
    notifications: mpsc::UnboundedSender<AgentNotification>,
    current: Url,
    pages_loaded: usize,
    max_pages: usize,
}

impl<O, F> ReplayHost<O, F>
where
    O: SelectionOverlay<NodeId>,
    F: FnMut() -> O,
{
    /// Load `start` as the first page.
    pub fn open(
        start: &Path,
        overlays: F,
        notifications: mpsc::UnboundedSender<AgentNotification>,
        max_pages: usize,
    ) -> Result<Self, ReplayError> {
        let current = file_url(start)?;
        let document = load_document(&current)?;
        let agent = PageAgent::new(
            PageId::new(REPLAY_PAGE),
            document,
            overlays,
            notifications.clone(),
        )
        .with_url(current.as_str());

        Ok(Self {
            agent,
            notifications,
            current,
            pages_loaded: 1,
            max_pages,
        })
    }

    pub fn current_url(&self) -> &Url {
        &self.current
    }

    pub fn pages_loaded(&self) -> usize {
        self.pages_loaded
    }

    pub fn agent_mut(&mut self) -> &mut PageAgent<HtmlDocument, O, F> {
        &mut self.agent
    }

    /// Serve requests until the coordinator hangs up.
    pub async fn serve(mut self, mut requests: mpsc::UnboundedReceiver<AgentRequest>) {
        while let Some(request) = requests.recv().await {
            self.handle(request);
        }
        debug!("Replay host done after {} pages", self.pages_loaded);
    }

    pub fn handle(&mut self, request: AgentRequest) {
        let navigates = matches!(request, AgentRequest::ClickNext { .. });
        self.agent.handle(request);
        if navigates {
            self.follow_click();
        }
    }

    fn follow_click(&mut self) {
        // No click means the agent already reported the button missing
        let Some(clicked) = self.agent.document_mut().take_clicks().pop() else {
            return;
        };

        if self.pages_loaded >= self.max_pages {
            warn!("Reached the limit of {} pages", self.max_pages);
            self.next_not_found();
            return;
        }

        let Some(next) = resolve_link(self.agent.document(), clicked, &self.current) else {
            warn!("Next button on {} does not link to a local page", self.current);
            self.next_not_found();
            return;
        };

        match load_document(&next) {
            Ok(document) => {
                self.pages_loaded += 1;
                info!("Page {}: {}", self.pages_loaded, next);
                self.current = next.clone();
                self.agent.load_page(document, Some(next.into()));
            }
            Err(e) => {
                warn!("Could not load next page: {}", e);
                self.next_not_found();
            }
        }
    }

    fn next_not_found(&self) {
        let _ = self.notifications.send(AgentNotification::NextNotFound);
    }
}

/// Crawl saved pages from `start` with the rules held by `store`, returning
/// every record collected.
pub async fn crawl(
    store: Arc<dyn crate::store::StateStore>,
    start: &Path,
    delay_ms: u64,
    max_pages: usize,
) -> Result<Vec<ExtractionRecord>, ReplayError> {
    let (agent_tx, agent_rx) = mpsc::unbounded_channel();
    let (note_tx, note_rx) = mpsc::unbounded_channel();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let (request_tx, request_rx) = mpsc::unbounded_channel();

    let host = ReplayHost::open(start, || HeadlessOverlay, note_tx, max_pages)?;
    let coordinator = Coordinator::new(store, agent_tx, event_tx, PageId::new(REPLAY_PAGE))
        .with_page_url(host.current_url().as_str());

    let driver = async move {
        let outcome = drive(&request_tx, &mut event_rx, delay_ms).await;
        drop(request_tx);
        outcome
    };

    let ((), (), outcome) = tokio::join!(
        coordinator.run(request_rx, note_rx),
        host.serve(agent_rx),
        driver
    );
    outcome
}

/// Start the run, wait for it to end, then ask for the download.
async fn drive(
    requests: &mpsc::UnboundedSender<UiRequest>,
    events: &mut mpsc::UnboundedReceiver<UiEvent>,
    delay_ms: u64,
) -> Result<Vec<ExtractionRecord>, ReplayError> {
    requests
        .send(UiRequest::StartAutomation {
            delay_ms: Some(delay_ms),
        })
        .map_err(|_| ReplayError::Interrupted)?;

    let mut started = false;
    while let Some(event) = events.recv().await {
        match event {
            UiEvent::StatusUpdate {
                status: AutomationStatus::Running,
                ..
            } => started = true,
            UiEvent::StatusUpdate {
                status: AutomationStatus::Idle,
                ..
            } if started => {
                requests
                    .send(UiRequest::RequestDownload)
                    .map_err(|_| ReplayError::Interrupted)?;
            }
            UiEvent::Error { message } if !started => return Err(ReplayError::Rejected(message)),
            UiEvent::Error { message } => {
                info!("{}", message);
                return Ok(Vec::new());
            }
            UiEvent::Download { contents, .. } => return Ok(serde_json::from_str(&contents)?),
            _ => {}
        }
    }
    Err(ReplayError::Interrupted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::DocumentQuery;
    use crate::store::{MemoryStore, StateStore};

    fn page(items: &[&str], next: Option<&str>) -> String {
        let items: String = items
            .iter()
            .map(|i| format!("<div class=\"item\">{i}</div>"))
            .collect();
        let next = next
            .map(|href| format!("<a class=\"next\" href=\"{href}\">Next</a>"))
            .unwrap_or_default();
        format!("<html><body><h1>Catalog</h1>{items}{next}</body></html>")
    }

    fn rules() -> Vec<Rule> {
        vec![
            Rule::single("site", "h1"),
            Rule::multiple("item", ".item", None),
            Rule::next_button("a.next"),
        ]
    }

    fn items(records: &[ExtractionRecord]) -> Vec<String> {
        records.iter().filter_map(|r| r.get("item").cloned()).collect()
    }

    #[test]
    fn test_resolve_link() {
        let html = r##"<html><body>
            <a id="rel" href="page2.html#top">2</a>
            <a id="frag" href="#top">top</a>
            <a id="js" href="javascript:void(0)">js</a>
            <a id="web" href="https://example.com/3">web</a>
            <a id="none">none</a>
        </body></html>"##;
        let doc = HtmlDocument::parse(html);
        let base = Url::parse("file:///site/page1.html").unwrap();
        let link = |id: &str| resolve_link(&doc, doc.find(id).unwrap(), &base);

        assert_eq!(link("#rel").map(String::from).as_deref(), Some("file:///site/page2.html"));
        assert_eq!(link("#frag"), None);
        assert_eq!(link("#js"), None);
        assert_eq!(link("#web"), None);
        assert_eq!(link("#none"), None);
    }

    #[test]
    fn test_extract_files() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.html");
        let second = dir.path().join("b.html");
        fs::write(&first, page(&["A", "B"], None)).unwrap();
        fs::write(&second, page(&["C"], None)).unwrap();

        let records = extract_files(&rules(), &[first, second]).unwrap();
        assert_eq!(items(&records), vec!["A", "B", "C"]);
        assert!(records.iter().all(|r| r["site"] == "Catalog"));

        let missing = extract_files(&rules(), &[dir.path().join("nope.html")]);
        assert!(matches!(missing, Err(ReplayError::Io { .. })));
    }

    #[test]
    fn test_host_follows_clicked_link() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("page1.html"), page(&["A"], Some("page2.html"))).unwrap();
        fs::write(dir.path().join("page2.html"), page(&["B"], None)).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut host = ReplayHost::open(&dir.path().join("page1.html"), || HeadlessOverlay, tx, 10).unwrap();

        host.handle(AgentRequest::ClickNext { selector: "a.next".into() });
        assert!(host.current_url().path().ends_with("page2.html"));
        assert_eq!(host.pages_loaded(), 2);
        assert!(matches!(rx.try_recv().unwrap(), AgentNotification::PageLoaded { .. }));
        assert!(host.agent_mut().document().find(".next").is_none());
        assert_eq!(
            host.agent_mut().document().query_all(".item", crate::dom::Scope::Document).unwrap().len(),
            1
        );

        host.handle(AgentRequest::ClickNext { selector: "a.next".into() });
        assert_eq!(rx.try_recv().unwrap(), AgentNotification::NextNotFound);
    }

    #[test]
    fn test_broken_link_counts_as_not_found() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("page1.html"), page(&["A"], Some("missing.html"))).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut host = ReplayHost::open(&dir.path().join("page1.html"), || HeadlessOverlay, tx, 10).unwrap();
        host.handle(AgentRequest::ClickNext { selector: "a.next".into() });
        assert_eq!(rx.try_recv().unwrap(), AgentNotification::NextNotFound);
        assert_eq!(host.pages_loaded(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crawl_collects_every_page() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("page1.html"), page(&["A", "B"], Some("page2.html"))).unwrap();
        fs::write(dir.path().join("page2.html"), page(&["C"], Some("page3.html"))).unwrap();
        fs::write(dir.path().join("page3.html"), page(&["D"], None)).unwrap();

        let store = Arc::new(MemoryStore::with_rules(rules()));
        let records = crawl(store.clone(), &dir.path().join("page1.html"), 100, 10)
            .await
            .unwrap();

        assert_eq!(items(&records), vec!["A", "B", "C", "D"]);
        let state = store.load_state().unwrap().unwrap();
        assert_eq!(state.status, AutomationStatus::Idle);
        assert!(state.current_url.unwrap().ends_with("page3.html"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_crawl_stops_at_page_limit() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("loop.html"), page(&["X"], Some("loop.html"))).unwrap();

        let store = Arc::new(MemoryStore::with_rules(rules()));
        let records = crawl(store, &dir.path().join("loop.html"), 100, 3).await.unwrap();
        assert_eq!(items(&records), vec!["X", "X", "X"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crawl_without_next_rule_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("page1.html"), page(&["A"], None)).unwrap();

        let store = Arc::new(MemoryStore::with_rules(vec![Rule::single("site", "h1")]));
        let result = crawl(store, &dir.path().join("page1.html"), 100, 10).await;
        assert!(matches!(result, Err(ReplayError::Rejected(_))));
    }
}
