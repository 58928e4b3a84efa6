//! Session orchestration: the review-loop state machine.
//!
//! One manager drives one session at a time through
//! `Created → Loading → Reviewing ⇄ Paused → Completed`, with `Error`
//! reserved for unrecoverable load/startup failures. The driving caller
//! (CLI prompt loop, GUI controller) owns the cadence: `next()` to peek,
//! `submit()`/`undo()` to advance, `finalize()` to close out.
//!
//! Write ordering on every mutation: the new state is persisted to the
//! snapshot store first, then the record is forwarded to the report sink.
//! A persistence failure rolls the in-memory state back and surfaces an
//! error, so a retried call cannot lose a verdict or duplicate a
//! review id, and no report row can exist without its persisted record.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::cache::ContentCache;
use crate::config::EngineConfig;
use crate::differ::{CodeDiffer, DiffResult};
use crate::error::SessionError;
use crate::models::{CodePair, Progress, ReviewResult, SessionConfig, SessionState, Verdict};
use crate::perf::PerformanceMonitor;
use crate::report::ReportSink;
use crate::sources::{sanitize_identifier, DataSource};
use crate::store::{SessionLock, SessionStore};

/// Where the state machine currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No session attached; `start_session`/`resume_session` accepted.
    Created,
    /// Inside `start_session`, between load and first persist.
    Loading,
    /// Head pair exposed; `submit`/`undo`/`pause` accepted.
    Reviewing,
    /// Parked by the driver; only `resume` accepted.
    Paused,
    /// Queue drained; `next()` returns `None`, `undo` still works.
    Completed,
    /// Startup failed; the manager must be discarded or restarted.
    Error,
}

impl SessionPhase {
    pub fn name(self) -> &'static str {
        match self {
            SessionPhase::Created => "created",
            SessionPhase::Loading => "loading",
            SessionPhase::Reviewing => "reviewing",
            SessionPhase::Paused => "paused",
            SessionPhase::Completed => "completed",
            SessionPhase::Error => "error",
        }
    }
}

/// Orchestrates a review session over a data source, a snapshot store,
/// and a report sink.
pub struct SessionManager {
    store: SessionStore,
    differ: CodeDiffer,
    diff_cache: Arc<ContentCache<DiffResult>>,
    monitor: Arc<PerformanceMonitor>,
    sink: Box<dyn ReportSink>,
    phase: SessionPhase,
    state: Option<SessionState>,
    lock: Option<SessionLock>,
    /// Set when the head pair is first exposed; cleared on submit/undo.
    review_started: Option<Instant>,
}

impl SessionManager {
    pub fn new(
        config: &EngineConfig,
        sink: Box<dyn ReportSink>,
        monitor: Arc<PerformanceMonitor>,
    ) -> Result<Self, SessionError> {
        let store = SessionStore::new(&config.sessions_dir)?;
        let diff_cache = Arc::new(ContentCache::new(
            config.cache_max_entries,
            config.cache_max_bytes,
        ));
        let differ = CodeDiffer::new(Arc::clone(&diff_cache), Arc::clone(&monitor))
            .with_large_threshold(config.large_diff_threshold);
        Ok(Self {
            store,
            differ,
            diff_cache,
            monitor,
            sink,
            phase: SessionPhase::Created,
            state: None,
            lock: None,
            review_started: None,
        })
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn session_id(&self) -> Option<&str> {
        self.state.as_ref().map(|s| s.session_id.as_str())
    }

    pub fn state(&self) -> Option<&SessionState> {
        self.state.as_ref()
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Shared handle to the diff cache, for a background sweeper.
    pub fn diff_cache(&self) -> Arc<ContentCache<DiffResult>> {
        Arc::clone(&self.diff_cache)
    }

    /// Starts a new session: loads pairs from `source`, seeds the state,
    /// persists the first snapshot, and enters `Reviewing`.
    ///
    /// # Errors
    ///
    /// A load or persistence failure moves the machine to `Error` and
    /// surfaces the cause; the caller should build a fresh manager (or fix
    /// the source) before retrying.
    pub fn start_session(
        &mut self,
        config: SessionConfig,
        source: &mut dyn DataSource,
    ) -> Result<String, SessionError> {
        self.require_phase(SessionPhase::Created, "start_session")?;
        config.validate().map_err(SessionError::InvalidConfig)?;

        self.phase = SessionPhase::Loading;
        let loaded = {
            let _timer = self.monitor.start("load_data");
            let total = source.get_total_count();
            match source.load_data(config.sample_percentage) {
                Ok(pairs) => {
                    info!(
                        available = total.as_ref().map(|n| *n as i64).unwrap_or(-1),
                        loaded = pairs.len(),
                        sample_percentage = config.sample_percentage,
                        "data source load complete"
                    );
                    pairs
                }
                Err(err) => {
                    error!(error = %err, "data source load failed");
                    self.phase = SessionPhase::Error;
                    return Err(err.into());
                }
            }
        };

        let session_id = format!(
            "{}_{}_{}",
            sanitize_identifier(std::path::Path::new(&config.experiment_name)),
            Utc::now().format("%Y%m%d_%H%M%S"),
            &uuid::Uuid::new_v4().simple().to_string()[..8],
        );

        let state = SessionState::new(session_id.clone(), config, loaded);
        if let Err(reason) = state.validate_integrity() {
            self.phase = SessionPhase::Error;
            return Err(SessionError::InvalidConfig(format!(
                "loaded data is not reviewable: {reason}"
            )));
        }

        let lock = match self.store.acquire_lock(&session_id) {
            Ok(lock) => lock,
            Err(err) => {
                self.phase = SessionPhase::Error;
                return Err(err);
            }
        };
        if let Err(err) = self.store.save(&state) {
            self.phase = SessionPhase::Error;
            return Err(err.into());
        }

        info!(session_id = %session_id, pairs = state.pending_queue.len(), "session started");
        self.state = Some(state);
        self.lock = Some(lock);
        self.phase = SessionPhase::Reviewing;
        self.review_started = None;
        Ok(session_id)
    }

    /// Resumes a persisted session under the single-writer lock.
    ///
    /// The report sink is rebuilt by replaying every completed record, so
    /// the report reflects the snapshot even if the previous process died
    /// between a persist and its sink append.
    ///
    /// # Errors
    ///
    /// [`SessionError::Locked`] when another process holds the session;
    /// [`SessionError::Corrupted`] when the snapshot is rejected — the
    /// caller may then `discard_session` and start fresh.
    pub fn resume_session(&mut self, session_id: &str) -> Result<(), SessionError> {
        self.require_phase(SessionPhase::Created, "resume_session")?;

        let lock = self.store.acquire_lock(session_id)?;
        let state = self.store.load(session_id)?;

        for result in &state.completed {
            self.sink.append(result)?;
        }

        self.phase = if state.pending_queue.is_empty() {
            SessionPhase::Completed
        } else {
            SessionPhase::Reviewing
        };
        info!(
            session_id,
            phase = self.phase.name(),
            completed = state.completed.len(),
            pending = state.pending_queue.len(),
            "session resumed"
        );
        self.state = Some(state);
        self.lock = Some(lock);
        self.review_started = None;
        Ok(())
    }

    /// Deletes a snapshot that could not be resumed. The explicit
    /// discard-and-start-fresh path for corrupted sessions.
    pub fn discard_session(&self, session_id: &str) -> Result<(), SessionError> {
        warn!(session_id, "discarding session snapshot");
        self.store.delete(session_id)?;
        Ok(())
    }

    /// Peeks at the next pair to review without consuming it. Idempotent;
    /// `None` once the session is `Completed` (or not `Reviewing`).
    pub fn next(&mut self) -> Option<&CodePair> {
        if self.phase != SessionPhase::Reviewing {
            return None;
        }
        let head = self.state.as_ref()?.pending_queue.front();
        if head.is_some() && self.review_started.is_none() {
            self.review_started = Some(Instant::now());
        }
        head
    }

    /// Diff of the current head pair, computed lazily and served from
    /// cache on repeated calls.
    pub fn current_diff(&self) -> Result<Option<Arc<DiffResult>>, SessionError> {
        if self.phase != SessionPhase::Reviewing {
            return Ok(None);
        }
        let Some(pair) = self.state.as_ref().and_then(|s| s.pending_queue.front()) else {
            return Ok(None);
        };
        let diff = self
            .differ
            .compute(pair.expected_code.as_deref(), &pair.generated_code)?;
        Ok(Some(diff))
    }

    /// Applies a verdict to the head pair: pops it, appends an immutable
    /// [`ReviewResult`], persists the snapshot, then forwards the record
    /// to the report sink. Transitions to `Completed` when the queue
    /// empties.
    ///
    /// # Errors
    ///
    /// On persistence failure the pop and append are rolled back and the
    /// same call can be retried without data loss or a duplicated
    /// review id. A sink failure after a successful persist is surfaced
    /// too; the snapshot remains the source of truth and `finalize` can
    /// rebuild the report from it.
    pub fn submit(&mut self, verdict: Verdict, comment: &str) -> Result<ReviewResult, SessionError> {
        self.require_phase(SessionPhase::Reviewing, "submit")?;
        let Some(state) = self.state.as_mut() else {
            return Err(SessionError::EmptyQueue);
        };
        let Some(pair) = state.pending_queue.front().cloned() else {
            return Err(SessionError::EmptyQueue);
        };

        let diff = self
            .differ
            .compute(pair.expected_code.as_deref(), &pair.generated_code)?;
        let elapsed_seconds = self
            .review_started
            .map(|started| started.elapsed().as_secs_f64())
            .unwrap_or(0.0);

        let result = ReviewResult {
            review_id: state.completed.len() as u64 + 1,
            source_identifier: pair.identifier.clone(),
            experiment_name: state.config.experiment_name.clone(),
            timestamp_utc: Utc::now(),
            verdict,
            comment: comment.to_owned(),
            elapsed_seconds,
            expected_code: pair.expected_code.clone(),
            generated_code: pair.generated_code.clone(),
            diff: diff.unified.clone(),
            source_info: pair.source_info.clone(),
        };

        state.pending_queue.pop_front();
        state.completed.push(result.clone());

        if let Err(err) = self.store.save(state) {
            // Roll back so the verdict can be retried.
            state.completed.pop();
            state.pending_queue.push_front(pair);
            error!(error = %err, "snapshot write failed, submit rolled back");
            return Err(err.into());
        }

        let queue_empty = state.pending_queue.is_empty();
        if let Err(err) = self.sink.append(&result) {
            error!(error = %err, review_id = result.review_id, "report append failed");
            if queue_empty {
                self.phase = SessionPhase::Completed;
            }
            self.review_started = None;
            return Err(err.into());
        }

        if queue_empty {
            info!(session_id = %state.session_id, "queue drained, session complete");
            self.phase = SessionPhase::Completed;
        }
        self.review_started = None;
        Ok(result)
    }

    /// Reverses the most recent submit: pops the last record, re-enqueues
    /// its pair at the head, persists, and retracts the sink's last row.
    /// Returns `Ok(false)` with no effect when there is nothing to undo.
    pub fn undo(&mut self) -> Result<bool, SessionError> {
        if !matches!(self.phase, SessionPhase::Reviewing | SessionPhase::Completed) {
            return Err(SessionError::InvalidPhase {
                required: "reviewing or completed",
                actual: self.phase.name(),
            });
        }
        let Some(state) = self.state.as_mut() else {
            return Ok(false);
        };
        let Some(result) = state.completed.pop() else {
            return Ok(false);
        };

        state.pending_queue.push_front(result.reconstruct_pair());
        if let Err(err) = self.store.save(state) {
            state.pending_queue.pop_front();
            state.completed.push(result);
            error!(error = %err, "snapshot write failed, undo rolled back");
            return Err(err.into());
        }

        if let Err(err) = self.sink.remove_last() {
            error!(error = %err, "report retraction failed");
            self.phase = SessionPhase::Reviewing;
            self.review_started = None;
            return Err(err.into());
        }

        info!(review_id = result.review_id, "review undone");
        self.phase = SessionPhase::Reviewing;
        self.review_started = None;
        Ok(true)
    }

    pub fn can_undo(&self) -> bool {
        matches!(self.phase, SessionPhase::Reviewing | SessionPhase::Completed)
            && self.state.as_ref().is_some_and(|s| !s.completed.is_empty())
    }

    /// Parks the session: `submit`/`undo`/`next` refuse until `resume`.
    /// The snapshot is already current (every mutation persists), so
    /// pausing writes nothing.
    pub fn pause(&mut self) -> Result<(), SessionError> {
        self.require_phase(SessionPhase::Reviewing, "pause")?;
        self.phase = SessionPhase::Paused;
        self.review_started = None;
        Ok(())
    }

    /// Returns from `Paused` to `Reviewing`.
    pub fn resume(&mut self) -> Result<(), SessionError> {
        self.require_phase(SessionPhase::Paused, "resume")?;
        self.phase = SessionPhase::Reviewing;
        Ok(())
    }

    pub fn progress(&self) -> Option<Progress> {
        self.state.as_ref().map(SessionState::progress)
    }

    /// Closes out the session: finalizes the report, flushes timing
    /// metrics, deletes the snapshot of a completed session (an
    /// unfinished one stays resumable), and releases the lock.
    pub fn finalize(&mut self) -> Result<Option<PathBuf>, SessionError> {
        let report_path = self.sink.finalize()?;
        self.monitor.flush();

        if self.phase == SessionPhase::Completed {
            if let Some(state) = &self.state {
                self.store.delete(&state.session_id)?;
            }
        }
        let stats = self.diff_cache.stats();
        info!(
            cache_hits = stats.hits,
            cache_misses = stats.misses,
            cache_evictions = stats.evictions,
            "session finalized"
        );

        self.state = None;
        self.lock = None;
        self.review_started = None;
        self.phase = SessionPhase::Created;
        Ok(report_path)
    }

    fn require_phase(&self, required: SessionPhase, op: &'static str) -> Result<(), SessionError> {
        if self.phase == required {
            Ok(())
        } else {
            warn!(op, required = required.name(), actual = self.phase.name(), "phase violation");
            Err(SessionError::InvalidPhase {
                required: required.name(),
                actual: self.phase.name(),
            })
        }
    }
}
