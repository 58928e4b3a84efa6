//! Pluggable data sources producing review queues.
//!
//! A source is selected by the tagged [`SourceParams`] variant and built
//! through [`create_source`]; the trait object then follows a strict
//! configure → count → load lifecycle. Per-item failures during a load are
//! logged and skipped; only a load that yields zero usable pairs fails.

pub mod filesystem;
pub mod spreadsheet;
pub mod sqlite;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, DataSourceError};
use crate::models::CodePair;

pub use filesystem::FilesystemSource;
pub use spreadsheet::SpreadsheetSource;
pub use sqlite::SqliteSource;

/// Tagged parameters selecting and configuring a data source.
///
/// Serialized into the session snapshot so a resumed session knows how its
/// queue was produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceParams {
    /// Generated and (optionally) expected code files under two roots,
    /// matched by relative path with the extension stripped.
    Filesystem {
        generated_dir: PathBuf,
        expected_dir: Option<PathBuf>,
    },
    /// Rows of a SQLite table.
    RelationalTable {
        database: PathBuf,
        table: String,
        identifier_column: String,
        generated_column: String,
        expected_column: Option<String>,
    },
    /// Rows of an `.xlsx`/`.xls` sheet or a `.csv` file.
    Spreadsheet {
        file: PathBuf,
        /// Sheet name; first sheet when omitted. Ignored for CSV.
        sheet: Option<String>,
        identifier_column: String,
        generated_column: String,
        expected_column: Option<String>,
    },
}

impl SourceParams {
    /// Tag string used in logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            SourceParams::Filesystem { .. } => "filesystem",
            SourceParams::RelationalTable { .. } => "relational_table",
            SourceParams::Spreadsheet { .. } => "spreadsheet",
        }
    }
}

/// Common contract over the source variants.
///
/// `configure` validates paths/connection/columns without loading content
/// and must not partially mutate the source on failure. `get_total_count`
/// reports the number of available pairs before sampling. `load_data`
/// samples uniformly without replacement and yields pairs whose
/// identifiers are stable across repeated loads of the same underlying
/// data.
pub trait DataSource: Send {
    fn configure(&mut self, params: &SourceParams) -> Result<(), ConfigError>;

    fn get_total_count(&self) -> Result<usize, DataSourceError>;

    fn load_data(&mut self, sample_percentage: f64) -> Result<Vec<CodePair>, DataSourceError>;
}

/// Builds an unconfigured source for the params' variant.
pub fn create_source(params: &SourceParams) -> Box<dyn DataSource> {
    match params {
        SourceParams::Filesystem { .. } => Box::new(FilesystemSource::new()),
        SourceParams::RelationalTable { .. } => Box::new(SqliteSource::new()),
        SourceParams::Spreadsheet { .. } => Box::new(SpreadsheetSource::new()),
    }
}

/// Builds and configures a source in one step.
pub fn connect(params: &SourceParams) -> Result<Box<dyn DataSource>, ConfigError> {
    let mut source = create_source(params);
    source.configure(params)?;
    Ok(source)
}

pub(crate) fn validate_sample_percentage(pct: f64) -> Result<(), DataSourceError> {
    if pct > 0.0 && pct <= 100.0 {
        Ok(())
    } else {
        Err(DataSourceError::InvalidSamplePercentage(pct))
    }
}

/// Uniform sample without replacement, floor rounding with a minimum of
/// one item; the survivors keep their original relative order.
pub(crate) fn sample_items<T>(items: Vec<T>, pct: f64) -> Vec<T> {
    if pct >= 100.0 || items.is_empty() {
        return items;
    }
    let keep = ((items.len() as f64 * pct / 100.0).floor() as usize).max(1);
    let mut indices: Vec<usize> =
        rand::seq::index::sample(&mut rand::rng(), items.len(), keep).into_vec();
    indices.sort_unstable();

    let mut survivors = Vec::with_capacity(keep);
    let mut wanted = indices.into_iter().peekable();
    for (index, item) in items.into_iter().enumerate() {
        match wanted.peek() {
            Some(&next) if next == index => {
                wanted.next();
                survivors.push(item);
            }
            _ => {}
        }
    }
    survivors
}

/// Reads a text file as UTF-8, falling back to a permissive single-byte
/// (Latin-1) decode before giving up on the item.
pub(crate) fn read_text_with_fallback(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(err) => {
            warn!(path = %path.display(), "not valid UTF-8, decoding as Latin-1");
            Ok(err.into_bytes().iter().map(|&b| b as char).collect())
        }
    }
}

/// Turns a relative path (extension already stripped) into an identifier
/// that is stable, filesystem-safe, and report-safe.
pub(crate) fn sanitize_identifier(relative: &Path) -> String {
    let raw = relative.to_string_lossy();
    let cleaned: String = raw
        .chars()
        .map(|c| if c == '/' || c == '\\' || c == ' ' { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        .collect();
    if cleaned.is_empty() {
        format!("item_{:x}", raw.len())
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampling_half_of_ten_keeps_exactly_five() {
        let items: Vec<u32> = (0..10).collect();
        let sampled = sample_items(items, 50.0);
        assert_eq!(sampled.len(), 5);
        // No replacement and original order preserved.
        let mut sorted = sampled.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 5);
        assert_eq!(sampled, sorted);
    }

    #[test]
    fn sampling_floors_but_never_returns_zero() {
        assert_eq!(sample_items(vec![1, 2, 3], 50.0).len(), 1);
        assert_eq!(sample_items(vec![1, 2, 3], 1.0).len(), 1);
        assert_eq!(sample_items(vec![1, 2, 3], 100.0).len(), 3);
    }

    #[test]
    fn sample_percentage_bounds() {
        assert!(validate_sample_percentage(0.0).is_err());
        assert!(validate_sample_percentage(-3.0).is_err());
        assert!(validate_sample_percentage(100.5).is_err());
        assert!(validate_sample_percentage(100.0).is_ok());
        assert!(validate_sample_percentage(0.5).is_ok());
    }

    #[test]
    fn identifiers_are_sanitized_for_paths() {
        assert_eq!(sanitize_identifier(Path::new("dir/sub dir/a")), "dir_sub_dir_a");
        assert_eq!(sanitize_identifier(Path::new("weird*name?")), "weirdname");
    }

    #[test]
    fn latin1_fallback_decodes_non_utf8() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("latin1.py");
        std::fs::write(&path, [b'c', b'a', b'f', 0xe9]).unwrap();
        let text = read_text_with_fallback(&path).unwrap();
        assert_eq!(text, "café");
    }
}
