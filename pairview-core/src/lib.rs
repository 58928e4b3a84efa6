//! pairview-core — resumable review engine for expected/generated code pairs.
//!
//! The engine loads code pairs from pluggable sources (folders, SQLite
//! tables, spreadsheets), walks a reviewer through them one at a time with
//! cached diffs, and emits immutable review records. Progress is persisted
//! to an atomically-replaced snapshot after every transition, so a killed
//! process resumes exactly where it stopped, and undo stays consistent
//! with both the durable queue and the report output.
//!
//! The crate is UI-agnostic: a driver (CLI prompt loop, GUI controller)
//! calls [`SessionManager::next`], renders the pair and its diff, and
//! feeds the verdict back through [`SessionManager::submit`].

pub mod cache;
pub mod config;
pub mod content;
pub mod differ;
pub mod error;
pub mod manager;
pub mod models;
pub mod perf;
pub mod report;
pub mod sources;
pub mod store;
pub mod sweeper;

pub use cache::{CacheStats, ContentCache};
pub use config::EngineConfig;
pub use content::{ChunkedProcessor, LazyContentLoader};
pub use differ::{CodeDiffer, DiffLine, DiffLineTag, DiffResult};
pub use error::{
    ConfigError, CorruptedSessionError, DataSourceError, InvalidInputError, PersistenceError,
    ReportError, SessionError,
};
pub use manager::{SessionManager, SessionPhase};
pub use models::{
    CodePair, OutputFormat, Progress, ReviewResult, SessionConfig, SessionState, Verdict,
};
pub use perf::PerformanceMonitor;
pub use report::{CsvReportSink, ReportSink};
pub use sources::{connect, create_source, DataSource, SourceParams};
pub use store::{SessionInfo, SessionStore, SNAPSHOT_FORMAT_VERSION};
pub use sweeper::CacheSweeper;
