//! SQLite-backed data source.
//!
//! Validates the table and columns against `sqlite_master` and
//! `pragma_table_info` before accepting the configuration, then loads rows
//! with a per-row skip policy: an empty identifier or empty generated cell
//! is logged and dropped, never aborts the load.

use std::path::PathBuf;
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info, warn};

use crate::error::{ConfigError, DataSourceError};
use crate::models::{CodePair, SourceInfo};
use crate::sources::{sample_items, validate_sample_percentage, DataSource, SourceParams};

const MAX_CONNECT_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
struct TableConfig {
    database: PathBuf,
    table: String,
    identifier_column: String,
    generated_column: String,
    expected_column: Option<String>,
}

/// Data source over one table of a SQLite database.
pub struct SqliteSource {
    config: Option<TableConfig>,
    total_count: Option<usize>,
}

impl SqliteSource {
    pub fn new() -> Self {
        Self { config: None, total_count: None }
    }

    fn table_config(&self) -> Result<&TableConfig, DataSourceError> {
        self.config.as_ref().ok_or(DataSourceError::NotConfigured)
    }

    /// Opens the database read-only, retrying with backoff on transient
    /// failures (busy database, slow network filesystem).
    fn open(database: &PathBuf) -> Result<Connection, rusqlite::Error> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let mut last_err = None;
        for attempt in 1..=MAX_CONNECT_ATTEMPTS {
            match Connection::open_with_flags(database, flags) {
                Ok(conn) => {
                    conn.busy_timeout(Duration::from_secs(5))?;
                    return Ok(conn);
                }
                Err(err) => {
                    warn!(
                        attempt,
                        database = %database.display(),
                        error = %err,
                        "database open failed"
                    );
                    last_err = Some(err);
                    if attempt < MAX_CONNECT_ATTEMPTS {
                        std::thread::sleep(RETRY_BASE_DELAY * attempt);
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| rusqlite::Error::InvalidQuery))
    }

    fn row_to_pair(config: &TableConfig, row: &rusqlite::Row<'_>) -> Option<CodePair> {
        let identifier = value_to_string(row.get::<_, rusqlite::types::Value>(0).ok()?)?;
        let generated_code = value_to_string(row.get::<_, rusqlite::types::Value>(1).ok()?)?;
        let expected_code = if config.expected_column.is_some() {
            row.get::<_, rusqlite::types::Value>(2).ok().and_then(value_to_string)
        } else {
            None
        };

        let mut source_info = SourceInfo::new();
        source_info.insert("source_type".into(), "relational_table".into());
        source_info.insert(
            "database".into(),
            config.database.to_string_lossy().into_owned().into(),
        );
        source_info.insert("table".into(), config.table.clone().into());

        Some(CodePair { identifier, expected_code, generated_code, source_info })
    }
}

impl Default for SqliteSource {
    fn default() -> Self {
        Self::new()
    }
}

impl DataSource for SqliteSource {
    fn configure(&mut self, params: &SourceParams) -> Result<(), ConfigError> {
        let SourceParams::RelationalTable {
            database,
            table,
            identifier_column,
            generated_column,
            expected_column,
        } = params
        else {
            return Err(ConfigError::WrongParams {
                expected: "relational_table",
                actual: params.kind(),
            });
        };

        if !database.exists() {
            return Err(ConfigError::PathNotFound(database.clone()));
        }
        let conn = Self::open(database)?;

        let table_exists: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if table_exists.is_none() {
            return Err(ConfigError::TableNotFound(table.clone()));
        }

        let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
        let columns: Vec<String> = stmt
            .query_map([table.as_str()], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;

        let mut required = vec![identifier_column, generated_column];
        if let Some(column) = expected_column {
            required.push(column);
        }
        for column in required {
            if !columns.iter().any(|c| c == column) {
                return Err(ConfigError::ColumnNotFound {
                    column: column.clone(),
                    location: format!("table {table}"),
                });
            }
        }

        info!(
            database = %database.display(),
            table = %table,
            "relational source configured"
        );
        self.config = Some(TableConfig {
            database: database.clone(),
            table: table.clone(),
            identifier_column: identifier_column.clone(),
            generated_column: generated_column.clone(),
            expected_column: expected_column.clone(),
        });
        self.total_count = None;
        Ok(())
    }

    fn get_total_count(&self) -> Result<usize, DataSourceError> {
        let config = self.table_config()?;
        if let Some(count) = self.total_count {
            return Ok(count);
        }
        let conn = Self::open(&config.database)?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM \"{}\"", escape_identifier(&config.table)),
            [],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }

    fn load_data(&mut self, sample_percentage: f64) -> Result<Vec<CodePair>, DataSourceError> {
        validate_sample_percentage(sample_percentage)?;
        let config = self.table_config()?.clone();
        let conn = Self::open(&config.database)?;

        let mut select = format!(
            "SELECT \"{}\", \"{}\"",
            escape_identifier(&config.identifier_column),
            escape_identifier(&config.generated_column),
        );
        if let Some(column) = &config.expected_column {
            select.push_str(&format!(", \"{}\"", escape_identifier(column)));
        }
        select.push_str(&format!(
            " FROM \"{}\" ORDER BY \"{}\"",
            escape_identifier(&config.table),
            escape_identifier(&config.identifier_column),
        ));

        let mut stmt = conn.prepare(&select)?;
        let mut rows = stmt.query([])?;
        let mut pairs = Vec::new();
        let mut skipped = 0usize;
        while let Some(row) = rows.next()? {
            match Self::row_to_pair(&config, row) {
                Some(pair) if pair.validate().is_ok() => pairs.push(pair),
                Some(pair) => {
                    skipped += 1;
                    warn!(identifier = %pair.identifier, "skipping row with unusable identifier");
                }
                None => {
                    skipped += 1;
                    debug!("skipping row with empty identifier or generated cell");
                }
            }
        }
        if pairs.is_empty() {
            return Err(DataSourceError::NoUsableItems);
        }

        self.total_count = Some(pairs.len() + skipped);
        let loaded = sample_items(pairs, sample_percentage);
        info!(loaded = loaded.len(), skipped, table = %config.table, "table load complete");
        Ok(loaded)
    }
}

fn escape_identifier(name: &str) -> String {
    name.replace('"', "\"\"")
}

/// Renders a SQLite value as the string the reviewer will see; `None` for
/// NULL or empty cells.
fn value_to_string(value: rusqlite::types::Value) -> Option<String> {
    use rusqlite::types::Value;
    let text = match value {
        Value::Null => return None,
        Value::Text(text) => text,
        Value::Integer(n) => n.to_string(),
        Value::Real(x) => x.to_string(),
        Value::Blob(_) => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_db(dir: &std::path::Path) -> PathBuf {
        let path = dir.join("pairs.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE results (
                case_id   TEXT PRIMARY KEY,
                generated TEXT,
                expected  TEXT
            );
            INSERT INTO results VALUES ('case-1', 'fn a() {}', 'fn a() { body(); }');
            INSERT INTO results VALUES ('case-2', 'fn b() {}', NULL);
            INSERT INTO results VALUES ('case-3', '', 'orphan expected');
            INSERT INTO results VALUES ('', 'no identifier', NULL);",
        )
        .unwrap();
        path
    }

    fn params(database: PathBuf, expected: bool) -> SourceParams {
        SourceParams::RelationalTable {
            database,
            table: "results".into(),
            identifier_column: "case_id".into(),
            generated_column: "generated".into(),
            expected_column: expected.then(|| "expected".into()),
        }
    }

    #[test]
    fn loads_rows_and_skips_unusable_ones() {
        let dir = tempfile::TempDir::new().unwrap();
        let database = seeded_db(dir.path());

        let mut source = SqliteSource::new();
        source.configure(&params(database, true)).unwrap();
        let pairs = source.load_data(100.0).unwrap();

        // case-3 (empty generated) and the empty-identifier row are skipped.
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].identifier, "case-1");
        assert_eq!(pairs[0].expected_code.as_deref(), Some("fn a() { body(); }"));
        assert_eq!(pairs[1].identifier, "case-2");
        assert_eq!(pairs[1].expected_code, None);
    }

    #[test]
    fn expected_column_is_optional() {
        let dir = tempfile::TempDir::new().unwrap();
        let database = seeded_db(dir.path());

        let mut source = SqliteSource::new();
        source.configure(&params(database, false)).unwrap();
        let pairs = source.load_data(100.0).unwrap();
        assert!(pairs.iter().all(|p| p.expected_code.is_none()));
    }

    #[test]
    fn missing_column_is_rejected_without_configuring() {
        let dir = tempfile::TempDir::new().unwrap();
        let database = seeded_db(dir.path());

        let mut source = SqliteSource::new();
        let err = source
            .configure(&SourceParams::RelationalTable {
                database,
                table: "results".into(),
                identifier_column: "nonexistent".into(),
                generated_column: "generated".into(),
                expected_column: None,
            })
            .unwrap_err();
        assert!(matches!(err, ConfigError::ColumnNotFound { .. }));
        assert!(matches!(source.get_total_count(), Err(DataSourceError::NotConfigured)));
    }

    #[test]
    fn missing_table_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let database = seeded_db(dir.path());

        let mut source = SqliteSource::new();
        let err = source
            .configure(&SourceParams::RelationalTable {
                database,
                table: "absent".into(),
                identifier_column: "case_id".into(),
                generated_column: "generated".into(),
                expected_column: None,
            })
            .unwrap_err();
        assert!(matches!(err, ConfigError::TableNotFound(_)));
    }

    #[test]
    fn count_reports_all_rows_before_sampling() {
        let dir = tempfile::TempDir::new().unwrap();
        let database = seeded_db(dir.path());

        let mut source = SqliteSource::new();
        source.configure(&params(database, true)).unwrap();
        assert_eq!(source.get_total_count().unwrap(), 4);
    }
}
