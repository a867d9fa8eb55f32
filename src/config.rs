//! Configuration
//!
//! Values are resolved in this order, later winning:
//! 1. built-in defaults
//! 2. `visual-scraper.toml` (or the file given explicitly)
//! 3. `VISUAL_SCRAPER_*` environment variables

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::assembler::PREVIEW_LIMIT;
use crate::automation::DEFAULT_DELAY_MS;
use crate::error::ConfigError;
use crate::selector::DEFAULT_MAX_DEPTH;

pub const DEFAULT_CONFIG_FILE: &str = "visual-scraper.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScraperConfig {
    #[serde(default)]
    pub automation: AutomationConfig,
    #[serde(default)]
    pub selector: SelectorConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationConfig {
    /// Wait between an extraction and the next-button click
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// Levels a structural fallback path may climb
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewConfig {
    #[serde(default = "default_preview_limit")]
    pub limit: usize,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            limit: default_preview_limit(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding persisted rules and automation state
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_export_dir")]
    pub dir: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            dir: default_export_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Pages an offline crawl may visit before giving up
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
        }
    }
}

fn default_delay_ms() -> u64 {
    DEFAULT_DELAY_MS
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_preview_limit() -> usize {
    PREVIEW_LIMIT
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("exports")
}

fn default_max_pages() -> usize {
    100
}

impl ScraperConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Load `path`, or `visual-scraper.toml` when present, then apply the
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_toml_file(DEFAULT_CONFIG_FILE)?
            }
            None => {
                debug!("No {} found, using defaults", DEFAULT_CONFIG_FILE);
                Self::default()
            }
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("VISUAL_SCRAPER_DELAY_MS") {
            self.automation.delay_ms = parse_env("VISUAL_SCRAPER_DELAY_MS", value)?;
        }
        if let Some(value) = lookup("VISUAL_SCRAPER_MAX_PAGES") {
            self.replay.max_pages = parse_env("VISUAL_SCRAPER_MAX_PAGES", value)?;
        }
        if let Some(dir) = lookup("VISUAL_SCRAPER_STORAGE_DIR") {
            self.storage.dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("VISUAL_SCRAPER_EXPORT_DIR") {
            self.export.dir = PathBuf::from(dir);
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { key, value })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = ScraperConfig::default();
        assert_eq!(config.automation.delay_ms, 1000);
        assert_eq!(config.selector.max_depth, 4);
        assert_eq!(config.preview.limit, 5);
        assert_eq!(config.storage.dir, PathBuf::from("data"));
        assert_eq!(config.replay.max_pages, 100);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ScraperConfig::from_toml_str(
            r#"
            [automation]
            delay_ms = 2500

            [export]
            dir = "/tmp/out"
            "#,
        )
        .unwrap();
        assert_eq!(config.automation.delay_ms, 2500);
        assert_eq!(config.export.dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.selector.max_depth, 4);
    }

    #[test]
    fn test_invalid_toml() {
        let result = ScraperConfig::from_toml_str("[automation]\ndelay_ms = \"soon\"");
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("VISUAL_SCRAPER_DELAY_MS", "300"),
            ("VISUAL_SCRAPER_STORAGE_DIR", "state"),
        ]);
        let mut config = ScraperConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.automation.delay_ms, 300);
        assert_eq!(config.storage.dir, PathBuf::from("state"));
        assert_eq!(config.export.dir, PathBuf::from("exports"));

        let err = ScraperConfig::default()
            .apply_overrides(|key| (key == "VISUAL_SCRAPER_MAX_PAGES").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidEnv { key: "VISUAL_SCRAPER_MAX_PAGES", .. }
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scraper.toml");
        fs::write(&path, "[replay]\nmax_pages = 3\n").unwrap();
        let config = ScraperConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.replay.max_pages, 3);
    }
}
