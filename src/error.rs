//! Error types
//!
//! Every failure in this crate is recoverable: a miss degrades to an omitted
//! field, a rejected click leaves the selection where it was, and a broken
//! crawl ends in `idle`. These enums carry enough context to log or surface
//! that outcome.

use std::path::PathBuf;

use thiserror::Error;

use crate::automation::AutomationStatus;
use crate::session::SelectionStep;

/// Failures of the document-query capability
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomError {
    /// Selector string could not be parsed
    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    /// Node handle does not refer to an element of this document
    #[error("Node is not an element of this document")]
    Detached,
}

/// Failures of selector synthesis
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SynthesisError {
    /// Relative synthesis was asked for an element its scope does not contain
    #[error("Scope does not contain the target element")]
    InvalidScope,
}

/// Rejected input during an interactive selection
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("Select an element inside the container")]
    OutsideContainer,

    #[error("No element under the pointer")]
    NothingUnderPointer,

    #[error("Input not accepted while at the {step:?} step")]
    UnexpectedInput { step: SelectionStep },

    #[error("Enter a {field}")]
    EmptyInput { field: &'static str },

    #[error("Could not build a selector for the clicked element")]
    SynthesisFailed,

    #[error("No selection in progress")]
    NotSelecting,
}

/// Validation and transition failures of the pagination controller
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AutomationError {
    #[error("No extraction rules defined. Add at least one rule before starting.")]
    NoRules,

    #[error("No next-button rule defined. Add a pagination rule before starting.")]
    MissingNextButton,

    #[error("{count} next-button rules defined; exactly one is required")]
    MultipleNextButtons { count: usize },

    #[error("Cannot {action} while {from:?}")]
    InvalidTransition {
        from: AutomationStatus,
        action: &'static str,
    },
}

/// The page-context agent could not be reached
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Page agent is not connected")]
    Disconnected,
}

/// Persistence failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stored data is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage lock poisoned")]
    Poisoned,
}

/// Export failures
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("No data available for download")]
    NoData,

    #[error("Failed to write export: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize records: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration loading failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },
}

/// Failures of the offline replay host
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is not a local file")]
    NotAFile(String),

    /// The coordinator refused to start the crawl
    #[error("Crawl rejected: {0}")]
    Rejected(String),

    #[error("Crawl ended before producing a result")]
    Interrupted,

    #[error("Exported records are not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
