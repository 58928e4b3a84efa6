//! Core data types shared across the engine.
//!
//! Everything here serializes with serde: these types make up the durable
//! session snapshot, so field changes must be accompanied by a bump of
//! `store::SNAPSHOT_FORMAT_VERSION`.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sources::SourceParams;

/// Opaque per-pair metadata recorded by the data source that produced it.
///
/// BTreeMap rather than HashMap so snapshots serialize with a stable key
/// order.
pub type SourceInfo = BTreeMap<String, serde_json::Value>;

/// One unit of review: an expected/generated code snippet pair with a
/// stable identifier.
///
/// Created by a [`DataSource`](crate::sources::DataSource) at load time and
/// immutable afterwards. `identifier` must survive save/resume and repeated
/// loads of the same underlying data (a relative file path, a table key).
/// `generated_code` is always present; `expected_code` is `None` when the
/// source has no ground truth for this item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodePair {
    pub identifier: String,
    pub expected_code: Option<String>,
    pub generated_code: String,
    pub source_info: SourceInfo,
}

impl CodePair {
    /// Returns `Err` with a reason when the pair cannot enter a queue:
    /// empty identifier, or an identifier with characters that would not
    /// survive being used in file names and report rows.
    pub fn validate(&self) -> Result<(), String> {
        if self.identifier.is_empty() {
            return Err("identifier is empty".to_owned());
        }
        if !self
            .identifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            return Err(format!("identifier {:?} contains unsafe characters", self.identifier));
        }
        Ok(())
    }
}

/// The reviewer's classification of a code pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Success,
    FailureNoChange,
    InvalidCode,
    WrongVulnerability,
    PartialSuccess,
    /// Free-form classification typed by the reviewer.
    Custom(String),
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Success => f.write_str("Success"),
            Verdict::FailureNoChange => f.write_str("Failure - No Change"),
            Verdict::InvalidCode => f.write_str("Invalid Code"),
            Verdict::WrongVulnerability => f.write_str("Wrong Vulnerability"),
            Verdict::PartialSuccess => f.write_str("Partial Success"),
            Verdict::Custom(label) => write!(f, "Custom: {label}"),
        }
    }
}

/// The immutable record of one completed review.
///
/// Appended to [`SessionState::completed`] and forwarded to the report
/// sink. Never mutated; removed only by undo, which pops the most recent
/// record. `review_id` values of later records are never renumbered.
///
/// `source_info` is carried along so undo can reconstruct the original
/// [`CodePair`] without loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewResult {
    pub review_id: u64,
    pub source_identifier: String,
    pub experiment_name: String,
    pub timestamp_utc: DateTime<Utc>,
    pub verdict: Verdict,
    pub comment: String,
    pub elapsed_seconds: f64,
    pub expected_code: Option<String>,
    pub generated_code: String,
    pub diff: String,
    pub source_info: SourceInfo,
}

impl ReviewResult {
    /// Rebuilds the reviewed pair for re-enqueueing during undo.
    pub fn reconstruct_pair(&self) -> CodePair {
        CodePair {
            identifier: self.source_identifier.clone(),
            expected_code: self.expected_code.clone(),
            generated_code: self.generated_code.clone(),
            source_info: self.source_info.clone(),
        }
    }
}

/// Output format for the shipped report sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Csv,
    Tsv,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Tsv => "tsv",
        }
    }

    pub fn delimiter(self) -> u8 {
        match self {
            OutputFormat::Csv => b',',
            OutputFormat::Tsv => b'\t',
        }
    }
}

/// Immutable configuration of a review session, fixed at session creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub experiment_name: String,
    /// Tagged parameters selecting and configuring the data source.
    pub source: SourceParams,
    /// Percentage of available pairs to sample, in (0, 100].
    pub sample_percentage: f64,
    pub output_format: OutputFormat,
}

impl SessionConfig {
    /// Checks the fields the engine relies on before a session starts.
    pub fn validate(&self) -> Result<(), String> {
        if self.experiment_name.trim().is_empty() {
            return Err("experiment_name is empty".to_owned());
        }
        if !(self.sample_percentage > 0.0 && self.sample_percentage <= 100.0) {
            return Err(format!(
                "sample_percentage must be in (0, 100], got {}",
                self.sample_percentage
            ));
        }
        Ok(())
    }
}

/// Progress of a session, derived for UI display.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub completed_count: usize,
    pub total_count: usize,
    pub percent: f64,
}

/// The serializable snapshot of a review session.
///
/// Invariant: `pending_queue` and the pairs referenced by `completed`
/// partition the originally loaded set — no duplicates, no pair in both.
/// Mutated only by the session manager on submit/undo and written to
/// durable storage after every mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub config: SessionConfig,
    pub created_at: DateTime<Utc>,
    /// Head (front) is the next pair to review.
    pub pending_queue: VecDeque<CodePair>,
    pub completed: Vec<ReviewResult>,
}

impl SessionState {
    pub fn new(session_id: String, config: SessionConfig, pairs: Vec<CodePair>) -> Self {
        Self {
            session_id,
            config,
            created_at: Utc::now(),
            pending_queue: pairs.into(),
            completed: Vec::new(),
        }
    }

    /// Completed plus pending: the size of the originally loaded set.
    pub fn total_reviews(&self) -> usize {
        self.pending_queue.len() + self.completed.len()
    }

    pub fn progress(&self) -> Progress {
        let completed_count = self.completed.len();
        let total_count = self.total_reviews();
        let percent = if total_count == 0 {
            100.0
        } else {
            completed_count as f64 / total_count as f64 * 100.0
        };
        Progress { completed_count, total_count, percent }
    }

    /// Validates the queue/completed partition invariant.
    ///
    /// Returns a human-readable reason on the first violation found:
    /// duplicate identifiers within either collection, or an identifier
    /// present in both.
    pub fn validate_integrity(&self) -> Result<(), String> {
        if self.session_id.is_empty() {
            return Err("session_id is empty".to_owned());
        }
        let mut pending: HashSet<&str> = HashSet::with_capacity(self.pending_queue.len());
        for pair in &self.pending_queue {
            pair.validate()?;
            if !pending.insert(pair.identifier.as_str()) {
                return Err(format!("duplicate identifier in pending queue: {}", pair.identifier));
            }
        }
        let mut completed: HashSet<&str> = HashSet::with_capacity(self.completed.len());
        for (index, result) in self.completed.iter().enumerate() {
            if result.review_id != index as u64 + 1 {
                return Err(format!(
                    "review_id {} at position {} breaks the monotone sequence",
                    result.review_id, index
                ));
            }
            if !completed.insert(result.source_identifier.as_str()) {
                return Err(format!(
                    "duplicate identifier in completed reviews: {}",
                    result.source_identifier
                ));
            }
            if pending.contains(result.source_identifier.as_str()) {
                return Err(format!(
                    "identifier {} is both pending and completed",
                    result.source_identifier
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(id: &str) -> CodePair {
        CodePair {
            identifier: id.to_owned(),
            expected_code: None,
            generated_code: "x = 1\n".to_owned(),
            source_info: SourceInfo::new(),
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            experiment_name: "exp".to_owned(),
            source: SourceParams::Filesystem {
                generated_dir: "gen".into(),
                expected_dir: None,
            },
            sample_percentage: 100.0,
            output_format: OutputFormat::Csv,
        }
    }

    #[test]
    fn progress_counts_completed_and_pending() {
        let mut state = SessionState::new("s1".into(), config(), vec![pair("a"), pair("b")]);
        assert_eq!(state.progress().total_count, 2);
        assert_eq!(state.progress().completed_count, 0);

        let popped = state.pending_queue.pop_front().unwrap();
        state.completed.push(ReviewResult {
            review_id: 1,
            source_identifier: popped.identifier,
            experiment_name: "exp".into(),
            timestamp_utc: Utc::now(),
            verdict: Verdict::Success,
            comment: String::new(),
            elapsed_seconds: 0.5,
            expected_code: popped.expected_code,
            generated_code: popped.generated_code,
            diff: String::new(),
            source_info: SourceInfo::new(),
        });
        let progress = state.progress();
        assert_eq!(progress.completed_count, 1);
        assert_eq!(progress.total_count, 2);
        assert!((progress.percent - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn integrity_rejects_identifier_in_both_collections() {
        let mut state = SessionState::new("s1".into(), config(), vec![pair("a")]);
        state.completed.push(ReviewResult {
            review_id: 1,
            source_identifier: "a".into(),
            experiment_name: "exp".into(),
            timestamp_utc: Utc::now(),
            verdict: Verdict::Success,
            comment: String::new(),
            elapsed_seconds: 0.0,
            expected_code: None,
            generated_code: String::new(),
            diff: String::new(),
            source_info: SourceInfo::new(),
        });
        assert!(state.validate_integrity().is_err());
    }

    #[test]
    fn config_rejects_out_of_range_sampling() {
        let mut cfg = config();
        cfg.sample_percentage = 0.0;
        assert!(cfg.validate().is_err());
        cfg.sample_percentage = 100.1;
        assert!(cfg.validate().is_err());
        cfg.sample_percentage = 0.1;
        assert!(cfg.validate().is_ok());
    }
}
