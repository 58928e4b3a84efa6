//! Report sink: where completed reviews are forwarded.
//!
//! The engine only requires the three-operation contract; the shipped
//! implementation writes delimited text. Rows are buffered in memory and
//! the whole file is rewritten atomically (temp + rename) on every append
//! and retraction, so `remove_last` never has to edit a file in place and
//! a crash can never leave a half-written report.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::ReportError;
use crate::models::{OutputFormat, ReviewResult};

/// External collaborator receiving the stream of review records.
pub trait ReportSink: Send {
    /// Appends one record. Exactly one append per successful submit.
    fn append(&mut self, result: &ReviewResult) -> Result<(), ReportError>;

    /// Retracts the most recently appended record (undo).
    fn remove_last(&mut self) -> Result<(), ReportError>;

    /// Flushes everything and returns the report location, if any.
    fn finalize(&mut self) -> Result<Option<PathBuf>, ReportError>;
}

/// Delimited-text sink (CSV or TSV per [`OutputFormat`]).
pub struct CsvReportSink {
    path: PathBuf,
    delimiter: u8,
    rows: Vec<ReviewResult>,
}

impl CsvReportSink {
    /// Creates a sink writing `<session_id>.<ext>` under `dir`. The file
    /// itself is only created on the first append.
    pub fn create(dir: &Path, session_id: &str, format: OutputFormat) -> Result<Self, ReportError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{session_id}.{}", format.extension()));
        Ok(Self { path, delimiter: format.delimiter(), rows: Vec::new() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_all(&self) -> Result<(), ReportError> {
        let temp_path = self.path.with_extension("tmp");
        {
            let file = std::fs::File::create(&temp_path)?;
            let mut writer = csv::WriterBuilder::new()
                .delimiter(self.delimiter)
                .from_writer(file);
            writer.write_record([
                "review_id",
                "source_identifier",
                "experiment_name",
                "timestamp_utc",
                "verdict",
                "comment",
                "elapsed_seconds",
                "expected_code",
                "generated_code",
                "diff",
            ])?;
            for row in &self.rows {
                let review_id = row.review_id.to_string();
                let timestamp = row.timestamp_utc.to_rfc3339();
                let verdict = row.verdict.to_string();
                let elapsed = format!("{:.3}", row.elapsed_seconds);
                writer.write_record([
                    review_id.as_str(),
                    row.source_identifier.as_str(),
                    row.experiment_name.as_str(),
                    timestamp.as_str(),
                    verdict.as_str(),
                    row.comment.as_str(),
                    elapsed.as_str(),
                    row.expected_code.as_deref().unwrap_or(""),
                    row.generated_code.as_str(),
                    row.diff.as_str(),
                ])?;
            }
            writer.flush()?;
        }
        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

impl ReportSink for CsvReportSink {
    fn append(&mut self, result: &ReviewResult) -> Result<(), ReportError> {
        self.rows.push(result.clone());
        if let Err(err) = self.write_all() {
            self.rows.pop();
            return Err(err);
        }
        debug!(review_id = result.review_id, rows = self.rows.len(), "report row appended");
        Ok(())
    }

    fn remove_last(&mut self) -> Result<(), ReportError> {
        let Some(removed) = self.rows.pop() else {
            return Err(ReportError::Empty);
        };
        if let Err(err) = self.write_all() {
            self.rows.push(removed);
            return Err(err);
        }
        debug!(rows = self.rows.len(), "report row retracted");
        Ok(())
    }

    fn finalize(&mut self) -> Result<Option<PathBuf>, ReportError> {
        self.write_all()?;
        info!(path = %self.path.display(), rows = self.rows.len(), "report finalized");
        Ok(Some(self.path.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SourceInfo, Verdict};
    use chrono::Utc;

    fn result(review_id: u64, identifier: &str) -> ReviewResult {
        ReviewResult {
            review_id,
            source_identifier: identifier.to_owned(),
            experiment_name: "exp".to_owned(),
            timestamp_utc: Utc::now(),
            verdict: Verdict::Success,
            comment: "looks, right".to_owned(),
            elapsed_seconds: 1.25,
            expected_code: Some("a\n".to_owned()),
            generated_code: "b\n".to_owned(),
            diff: "--- expected\n+++ generated\n@@ -1,1 +1,1 @@\n-a\n+b\n".to_owned(),
            source_info: SourceInfo::new(),
        }
    }

    #[test]
    fn append_then_retract_round_trips_the_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut sink = CsvReportSink::create(dir.path(), "s1", OutputFormat::Csv).unwrap();

        sink.append(&result(1, "a")).unwrap();
        sink.append(&result(2, "b")).unwrap();
        sink.remove_last().unwrap();
        let path = sink.finalize().unwrap().unwrap();

        let mut reader = csv::Reader::from_path(path).unwrap();
        let rows: Vec<_> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][1], "a");
        assert_eq!(&rows[0][4], "Success");
        // Embedded commas and newlines survive the format.
        assert_eq!(&rows[0][5], "looks, right");
        assert!(rows[0][9].contains("+b"));
    }

    #[test]
    fn retracting_an_empty_report_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut sink = CsvReportSink::create(dir.path(), "s1", OutputFormat::Csv).unwrap();
        assert!(matches!(sink.remove_last(), Err(ReportError::Empty)));
    }
}
