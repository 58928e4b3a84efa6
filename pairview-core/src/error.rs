//! Error types for the review engine.
//!
//! Each boundary gets its own enum so callers can match on exactly the
//! failures that boundary can produce: source configuration, bulk loading,
//! diff input validation, snapshot persistence, report output, and the
//! session state machine itself.

use std::path::PathBuf;

use thiserror::Error;

/// Invalid data-source parameters. Recoverable: the caller may re-prompt
/// and call `configure` again.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The params variant does not match the source it was handed to.
    #[error("expected {expected} parameters, got {actual}")]
    WrongParams {
        expected: &'static str,
        actual: &'static str,
    },

    /// A configured path does not exist.
    #[error("path does not exist: {0}")]
    PathNotFound(PathBuf),

    /// A configured path exists but is not a directory.
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Unsupported spreadsheet extension.
    #[error("unsupported spreadsheet format: {0} (expected .xlsx, .xls or .csv)")]
    UnsupportedFormat(PathBuf),

    /// The named table is absent from the database.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// The named sheet is absent from the workbook.
    #[error("sheet not found: {0}")]
    SheetNotFound(String),

    /// A required column is absent from the table or header row.
    #[error("column {column:?} not found in {location}")]
    ColumnNotFound { column: String, location: String },

    /// No code pairs were discovered during configuration.
    #[error("no code pairs found under the configured source")]
    NoPairsFound,

    /// Database error while validating the configuration.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Workbook error while validating the configuration.
    #[error("spreadsheet error: {0}")]
    Spreadsheet(String),

    /// Delimited-file error while validating the configuration.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error while validating the configuration.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure while loading code pairs. Per-item failures are logged and
/// skipped inside `load_data`; this type covers the whole-load failures.
#[derive(Error, Debug)]
pub enum DataSourceError {
    /// `load_data` or `get_total_count` called before a successful `configure`.
    #[error("data source is not configured")]
    NotConfigured,

    /// Sample percentage outside the half-open interval (0, 100].
    #[error("sample percentage must be in (0, 100], got {0}")]
    InvalidSamplePercentage(f64),

    /// Every candidate item failed to load.
    #[error("no usable code pairs could be loaded")]
    NoUsableItems,

    /// Database error during loading.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Workbook error during loading.
    #[error("spreadsheet error: {0}")]
    Spreadsheet(String),

    /// Delimited-file error during loading.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error during loading.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Malformed input handed to the differ. Fatal to that one computation,
/// never to the session.
#[derive(Error, Debug)]
#[error("invalid diff input: {0}")]
pub struct InvalidInputError(pub String);

/// Failure writing the durable session snapshot. Fatal to the current
/// `submit`/`undo` call; in-memory state is rolled back so the call can
/// be retried.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failure at the report-sink boundary.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// `remove_last` called on a sink with no rows.
    #[error("report is empty, nothing to retract")]
    Empty,
}

/// Why a persisted snapshot was rejected. Recoverable: the caller may
/// discard the snapshot and start a fresh session instead of crashing.
#[derive(Error, Debug)]
pub enum CorruptedSessionError {
    /// The snapshot's format-version tag is newer or older than this
    /// engine understands.
    #[error("unsupported snapshot format version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// The snapshot bytes do not parse as a snapshot envelope.
    #[error("snapshot does not parse: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The snapshot parsed but violates a session invariant
    /// (queue/completed overlap, duplicate identifiers, bad counts).
    #[error("snapshot violates session invariants: {0}")]
    IntegrityViolation(String),
}

/// Errors surfaced by the session state machine.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Another process holds the single-writer lock for this session.
    /// Fatal to this process, not to the session.
    #[error("session {session_id} is locked by another process")]
    Locked { session_id: String },

    /// No snapshot exists for the requested session id.
    #[error("session not found: {session_id}")]
    NotFound { session_id: String },

    /// The persisted snapshot was rejected; discard-and-restart is the
    /// supported recovery path.
    #[error("corrupted session snapshot: {0}")]
    Corrupted(#[from] CorruptedSessionError),

    /// An operation was called in a phase that does not permit it.
    #[error("operation requires phase {required}, session is {actual}")]
    InvalidPhase {
        required: &'static str,
        actual: &'static str,
    },

    /// `submit` called with nothing left to review.
    #[error("pending queue is empty")]
    EmptyQueue,

    /// Invalid session configuration (empty experiment name, bad sample
    /// percentage).
    #[error("invalid session config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    DataSource(#[from] DataSourceError),

    #[error(transparent)]
    InvalidInput(#[from] InvalidInputError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
