//! Rule and automation-state persistence

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{debug, error};

use crate::automation::AutomationState;
use crate::error::StoreError;
use crate::rules::Rule;

const RULES_FILE: &str = "scraping_rules.json";
const STATE_FILE: &str = "automation_state.json";

/// Backing storage owned by the coordinator.
pub trait StateStore: Send + Sync {
    fn load_rules(&self) -> Result<Vec<Rule>, StoreError>;

    fn save_rules(&self, rules: &[Rule]) -> Result<(), StoreError>;

    /// State exactly as persisted; use [`restore_state`] to bring it back into service
    fn load_state(&self) -> Result<Option<AutomationState>, StoreError>;

    fn save_state(&self, state: &AutomationState) -> Result<(), StoreError>;
}

/// Load the persisted automation state with its status forced to idle.
///
/// A run is never resumed across a reload; missing or unreadable state falls
/// back to `fallback`.
pub fn restore_state(store: &dyn StateStore, fallback: AutomationState) -> AutomationState {
    match store.load_state() {
        Ok(Some(state)) => state.normalized(),
        Ok(None) => fallback.normalized(),
        Err(e) => {
            error!("Error loading automation state: {}", e);
            fallback.normalized()
        }
    }
}

/// In-process store, lost on exit
#[derive(Debug, Default)]
pub struct MemoryStore {
    rules: RwLock<Vec<Rule>>,
    state: RwLock<Option<AutomationState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: Vec<Rule>) -> Self {
        Self {
            rules: RwLock::new(rules),
            state: RwLock::new(None),
        }
    }
}

impl StateStore for MemoryStore {
    fn load_rules(&self) -> Result<Vec<Rule>, StoreError> {
        self.rules.read().map(|r| r.clone()).map_err(|_| StoreError::Poisoned)
    }

    fn save_rules(&self, rules: &[Rule]) -> Result<(), StoreError> {
        let mut guard = self.rules.write().map_err(|_| StoreError::Poisoned)?;
        *guard = rules.to_vec();
        Ok(())
    }

    fn load_state(&self) -> Result<Option<AutomationState>, StoreError> {
        self.state.read().map(|s| s.clone()).map_err(|_| StoreError::Poisoned)
    }

    fn save_state(&self, state: &AutomationState) -> Result<(), StoreError> {
        let mut guard = self.state.write().map_err(|_| StoreError::Poisoned)?;
        *guard = Some(state.clone());
        Ok(())
    }
}

/// JSON files in one directory
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read<T: serde::de::DeserializeOwned>(&self, file: &str) -> Result<Option<T>, StoreError> {
        let path = self.dir.join(file);
        if !path.exists() {
            debug!("{} not found, nothing to load", path.display());
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn write<T: serde::Serialize + ?Sized>(&self, file: &str, value: &T) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string_pretty(value)?;
        fs::write(self.dir.join(file), content)?;
        Ok(())
    }
}

impl StateStore for JsonFileStore {
    fn load_rules(&self) -> Result<Vec<Rule>, StoreError> {
        Ok(self.read(RULES_FILE)?.unwrap_or_default())
    }

    fn save_rules(&self, rules: &[Rule]) -> Result<(), StoreError> {
        self.write(RULES_FILE, rules)
    }

    fn load_state(&self) -> Result<Option<AutomationState>, StoreError> {
        self.read(STATE_FILE)
    }

    fn save_state(&self, state: &AutomationState) -> Result<(), StoreError> {
        self.write(STATE_FILE, state)
    }
}
