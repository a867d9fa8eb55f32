//! JSON export of accumulated records

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::ExportError;
use crate::rules::ExtractionRecord;

/// `scraped_data_<ISO-8601 time with ':' and '.' as '-'>.json`
pub fn export_file_name(at: DateTime<Utc>) -> String {
    format!("scraped_data_{}.json", at.format("%Y-%m-%dT%H-%M-%S-%3fZ"))
}

/// A non-empty batch of records ready to be saved
#[derive(Debug)]
pub struct Export<'a> {
    records: &'a [ExtractionRecord],
    created_at: DateTime<Utc>,
}

impl<'a> Export<'a> {
    pub fn new(records: &'a [ExtractionRecord]) -> Result<Self, ExportError> {
        if records.is_empty() {
            return Err(ExportError::NoData);
        }
        Ok(Self {
            records,
            created_at: Utc::now(),
        })
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    pub fn file_name(&self) -> String {
        export_file_name(self.created_at)
    }

    pub fn to_json(&self) -> Result<String, ExportError> {
        Ok(serde_json::to_string_pretty(self.records)?)
    }

    /// File name and contents
    pub fn render(&self) -> Result<(String, String), ExportError> {
        Ok((self.file_name(), self.to_json()?))
    }

    /// Write into `dir`, creating it if needed, and return the file's path.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, ExportError> {
        let (file_name, contents) = self.render()?;
        fs::create_dir_all(dir)?;
        let path = dir.join(file_name);
        fs::write(&path, contents)?;
        info!("Exported {} records to {}", self.records.len(), path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(title: &str, price: &str) -> ExtractionRecord {
        ExtractionRecord::from([
            ("title".to_string(), title.to_string()),
            ("price".to_string(), price.to_string()),
        ])
    }

    #[test]
    fn test_file_name_replaces_separators() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
            + chrono::Duration::milliseconds(42);
        assert_eq!(export_file_name(at), "scraped_data_2024-03-09T14-05-07-042Z.json");
    }

    #[test]
    fn test_empty_export_is_refused() {
        assert!(matches!(Export::new(&[]), Err(ExportError::NoData)));
    }

    #[test]
    fn test_write_to_directory() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![record("Dune", "9.99"), record("Emma", "4.50")];
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let path = Export::new(&records)
            .unwrap()
            .created_at(at)
            .write_to(&dir.path().join("out"))
            .unwrap();
        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some("scraped_data_2024-01-01T00-00-00-000Z.json")
        );

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("\n  {"));
        let parsed: Vec<ExtractionRecord> = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed, records);
    }
}
