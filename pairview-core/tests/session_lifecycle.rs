//! Integration test for the full session lifecycle.
//!
//! Exercises: start_session, next/current_diff, submit, undo, interruption
//! (drop without finalize), resume_session, single-writer locking,
//! corrupted-snapshot recovery, and report output.

use std::path::PathBuf;
use std::sync::Arc;

use pairview_core::error::{ConfigError, DataSourceError, ReportError, SessionError};
use pairview_core::models::SourceInfo;
use pairview_core::report::ReportSink;
use pairview_core::sources::DataSource;
use pairview_core::{
    CodePair, CsvReportSink, EngineConfig, OutputFormat, PerformanceMonitor, ReviewResult,
    SessionConfig, SessionManager, SessionPhase, SourceParams, Verdict,
};

struct StubSource {
    pairs: Vec<CodePair>,
}

impl StubSource {
    fn with_pairs(count: usize) -> Self {
        let pairs = (0..count)
            .map(|n| CodePair {
                identifier: format!("case-{n}"),
                expected_code: Some(format!("fn handler() {{ step_{n}(); }}\n")),
                generated_code: format!("fn handler() {{\n    step_{n}();\n}}\n"),
                source_info: SourceInfo::new(),
            })
            .collect();
        Self { pairs }
    }
}

impl DataSource for StubSource {
    fn configure(&mut self, _params: &SourceParams) -> Result<(), ConfigError> {
        Ok(())
    }

    fn get_total_count(&self) -> Result<usize, DataSourceError> {
        Ok(self.pairs.len())
    }

    fn load_data(&mut self, _sample_percentage: f64) -> Result<Vec<CodePair>, DataSourceError> {
        Ok(self.pairs.clone())
    }
}

/// Sink whose append always fails, for exercising the persist-then-report
/// ordering.
struct FailingSink;

impl ReportSink for FailingSink {
    fn append(&mut self, _result: &ReviewResult) -> Result<(), ReportError> {
        Err(ReportError::Empty)
    }
    fn remove_last(&mut self) -> Result<(), ReportError> {
        Ok(())
    }
    fn finalize(&mut self) -> Result<Option<PathBuf>, ReportError> {
        Ok(None)
    }
}

fn engine_config(root: &std::path::Path) -> EngineConfig {
    EngineConfig {
        sessions_dir: root.join("sessions"),
        reports_dir: root.join("reports"),
        ..EngineConfig::default()
    }
}

fn session_config() -> SessionConfig {
    SessionConfig {
        experiment_name: "lifecycle".to_owned(),
        source: SourceParams::Filesystem { generated_dir: "unused".into(), expected_dir: None },
        sample_percentage: 100.0,
        output_format: OutputFormat::Csv,
    }
}

fn manager_with_csv_sink(config: &EngineConfig, session_id: &str) -> SessionManager {
    let sink = CsvReportSink::create(&config.reports_dir, session_id, OutputFormat::Csv).unwrap();
    SessionManager::new(config, Box::new(sink), Arc::new(PerformanceMonitor::new())).unwrap()
}

fn assert_partition_invariant(manager: &SessionManager, total: usize) {
    let state = manager.state().expect("session state present");
    assert_eq!(
        state.pending_queue.len() + state.completed.len(),
        total,
        "pending + completed must equal the loaded total at every observable point"
    );
    state.validate_integrity().expect("invariants hold");
}

#[test]
fn full_session_lifecycle() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = engine_config(dir.path());
    let mut manager = manager_with_csv_sink(&config, "report");
    let mut source = StubSource::with_pairs(3);

    let session_id = manager.start_session(session_config(), &mut source).unwrap();
    assert_eq!(manager.phase(), SessionPhase::Reviewing);
    assert_partition_invariant(&manager, 3);

    // Peeking is idempotent and exposes the diff lazily.
    assert_eq!(manager.next().unwrap().identifier, "case-0");
    assert_eq!(manager.next().unwrap().identifier, "case-0");
    let diff = manager.current_diff().unwrap().unwrap();
    assert!(diff.unified.contains("-fn handler() { step_0(); }"));

    // Submit, then undo restores the exact pre-submit picture.
    let result = manager.submit(Verdict::Success, "matches intent").unwrap();
    assert_eq!(result.review_id, 1);
    assert!(result.elapsed_seconds >= 0.0);
    assert_partition_invariant(&manager, 3);
    assert_eq!(manager.progress().unwrap().completed_count, 1);

    assert!(manager.undo().unwrap());
    assert_partition_invariant(&manager, 3);
    assert_eq!(manager.progress().unwrap().completed_count, 0);
    assert_eq!(manager.next().unwrap().identifier, "case-0");

    // Undo beyond the completed list is a no-op signal, not an error.
    assert!(!manager.undo().unwrap());
    assert_partition_invariant(&manager, 3);

    // Review the first pair again; review ids are not inflated by the undo.
    let result = manager.submit(Verdict::PartialSuccess, "close").unwrap();
    assert_eq!(result.review_id, 1);

    // Simulate a kill: drop the manager without finalizing. The snapshot
    // on disk must reflect the completed submit.
    drop(manager);

    let mut resumed = manager_with_csv_sink(&config, "report");
    resumed.resume_session(&session_id).unwrap();
    assert_eq!(resumed.phase(), SessionPhase::Reviewing);
    assert_partition_invariant(&resumed, 3);
    assert_eq!(resumed.progress().unwrap().completed_count, 1);
    assert_eq!(resumed.next().unwrap().identifier, "case-1");

    // Finish the queue.
    resumed.submit(Verdict::FailureNoChange, "").unwrap();
    assert_eq!(resumed.phase(), SessionPhase::Reviewing);
    resumed.submit(Verdict::InvalidCode, "does not parse").unwrap();
    assert_eq!(resumed.phase(), SessionPhase::Completed);
    assert!(resumed.next().is_none());
    assert_partition_invariant(&resumed, 3);

    // Undo still works from Completed, then redo to finish again.
    assert!(resumed.undo().unwrap());
    assert_eq!(resumed.phase(), SessionPhase::Reviewing);
    resumed.submit(Verdict::InvalidCode, "does not parse").unwrap();
    assert_eq!(resumed.phase(), SessionPhase::Completed);

    let report_path = resumed.finalize().unwrap().expect("report path");
    let mut reader = csv::Reader::from_path(&report_path).unwrap();
    let rows: Vec<_> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 3);
    assert_eq!(&rows[0][0], "1");
    assert_eq!(&rows[0][1], "case-0");
    assert_eq!(&rows[2][0], "3");
    assert_eq!(&rows[2][4], "Invalid Code");

    // A completed, finalized session leaves no snapshot behind.
    let fresh = manager_with_csv_sink(&config, "gone");
    assert!(matches!(
        fresh.store().load(&session_id),
        Err(SessionError::NotFound { .. })
    ));
}

#[test]
fn resume_is_rejected_while_another_process_holds_the_lock() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = engine_config(dir.path());

    let mut first = manager_with_csv_sink(&config, "first");
    let mut source = StubSource::with_pairs(2);
    let session_id = first.start_session(session_config(), &mut source).unwrap();

    let mut second = manager_with_csv_sink(&config, "second");
    assert!(matches!(
        second.resume_session(&session_id),
        Err(SessionError::Locked { .. })
    ));

    // Releasing the first manager frees the session.
    drop(first);
    second.resume_session(&session_id).unwrap();
    assert_eq!(second.phase(), SessionPhase::Reviewing);
}

#[test]
fn corrupted_snapshot_offers_discard_and_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = engine_config(dir.path());

    let mut manager = manager_with_csv_sink(&config, "report");
    let mut source = StubSource::with_pairs(1);
    let session_id = manager.start_session(session_config(), &mut source).unwrap();
    drop(manager);

    let snapshot = config.sessions_dir.join(format!("{session_id}.json"));
    std::fs::write(&snapshot, b"{\"truncated").unwrap();

    let mut manager = manager_with_csv_sink(&config, "report2");
    assert!(matches!(
        manager.resume_session(&session_id),
        Err(SessionError::Corrupted(_))
    ));

    // The advertised recovery path: discard, then start a new session.
    manager.discard_session(&session_id).unwrap();
    assert!(!snapshot.exists());
    let mut source = StubSource::with_pairs(1);
    manager.start_session(session_config(), &mut source).unwrap();
    assert_eq!(manager.phase(), SessionPhase::Reviewing);
}

#[test]
fn report_failure_after_persist_never_loses_the_verdict() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = engine_config(dir.path());

    let mut manager = SessionManager::new(
        &config,
        Box::new(FailingSink),
        Arc::new(PerformanceMonitor::new()),
    )
    .unwrap();
    let mut source = StubSource::with_pairs(1);
    let session_id = manager.start_session(session_config(), &mut source).unwrap();

    // The sink rejects the append, so submit surfaces an error...
    assert!(manager.submit(Verdict::Success, "").is_err());
    drop(manager);

    // ...but the persisted snapshot already owns the completed review.
    let mut resumed = manager_with_csv_sink(&config, "rebuilt");
    resumed.resume_session(&session_id).unwrap();
    assert_eq!(resumed.phase(), SessionPhase::Completed);
    assert_eq!(resumed.progress().unwrap().completed_count, 1);
}
