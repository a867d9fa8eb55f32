//! Visual scraper
//!
//! Point-and-click extraction rules for HTML pages:
//! - Selector synthesis for clicked elements (`#id`, unique class, test-hook
//!   attribute, structural path)
//! - Record assembly with positional zip-join of repeated lists
//! - A step-by-step selection session that builds one rule from clicks
//! - Paginated crawling driven by a next-button rule
//! - Offline replay over saved HTML and a C ABI for native hosts

pub mod agent;
pub mod assembler;
pub mod automation;
pub mod config;
pub mod coordinator;
pub mod dom;
pub mod error;
pub mod export;
pub mod ffi;
pub mod messages;
pub mod replay;
pub mod rules;
pub mod selector;
pub mod session;
pub mod store;

pub use agent::PageAgent;
pub use assembler::{assemble, preview, PREVIEW_LIMIT};
pub use automation::{AutomationState, AutomationStatus, PaginationController};
pub use config::ScraperConfig;
pub use coordinator::Coordinator;
pub use dom::{DocumentQuery, ElementInspect, HtmlDocument, Scope};
pub use error::*;
pub use ffi::*;
pub use rules::{ExtractionRecord, Rule, RuleKind, RuleSet};
pub use selector::{css_escape, SelectorSynthesizer};
pub use session::{SelectionOverlay, SelectionSession};
pub use store::{JsonFileStore, MemoryStore, StateStore};
