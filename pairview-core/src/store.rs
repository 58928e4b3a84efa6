//! Durable session snapshots.
//!
//! One JSON file per session under the sessions directory, wrapped in a
//! versioned envelope and replaced atomically (write temp, fsync, rename)
//! so an interrupted process always leaves either the previous or the next
//! snapshot on disk, never a partial one. A sibling `.lock` file carries an
//! exclusive advisory lock enforcing one reviewing process per session.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{CorruptedSessionError, PersistenceError, SessionError};
use crate::models::{Progress, SessionState};

/// Bump on any change to the snapshot schema. Snapshots with a different
/// version are rejected as corrupted rather than guessed at.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct SnapshotEnvelope {
    format_version: u32,
    saved_at: DateTime<Utc>,
    state: SessionState,
}

/// Header-level facts about a stored session, readable without resuming it.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: String,
    pub experiment_name: String,
    pub created_at: DateTime<Utc>,
    pub saved_at: DateTime<Utc>,
    pub progress: Progress,
}

/// Exclusive hold on one session's lock file. Released (and the lock file
/// removed) on drop.
pub struct SessionLock {
    file: File,
    path: PathBuf,
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        if let Err(err) = fs2::FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %err, "failed to unlock session");
        }
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Filesystem-backed store for session snapshots and locks.
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn snapshot_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }

    fn lock_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.lock"))
    }

    /// Acquires the single-writer lock for `session_id`.
    ///
    /// # Errors
    ///
    /// [`SessionError::Locked`] when another process already holds it.
    pub fn acquire_lock(&self, session_id: &str) -> Result<SessionLock, SessionError> {
        let path = self.lock_path(session_id);
        let file = OpenOptions::new().create(true).write(true).open(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(session_id, "session lock acquired");
                Ok(SessionLock { file, path })
            }
            Err(_) => Err(SessionError::Locked { session_id: session_id.to_owned() }),
        }
    }

    /// Writes the snapshot atomically: serialize to `<id>.json.tmp`, fsync,
    /// rename over `<id>.json`.
    pub fn save(&self, state: &SessionState) -> Result<(), PersistenceError> {
        let envelope = SnapshotEnvelope {
            format_version: SNAPSHOT_FORMAT_VERSION,
            saved_at: Utc::now(),
            state: state.clone(),
        };
        let bytes = serde_json::to_vec(&envelope)?;

        let final_path = self.snapshot_path(&state.session_id);
        let temp_path = self.dir.join(format!("{}.json.tmp", state.session_id));
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        if let Err(err) = std::fs::rename(&temp_path, &final_path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(err.into());
        }
        debug!(
            session_id = %state.session_id,
            pending = state.pending_queue.len(),
            completed = state.completed.len(),
            "snapshot saved"
        );
        Ok(())
    }

    /// Loads and validates a snapshot.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotFound`] when no snapshot exists;
    /// [`SessionError::Corrupted`] when the envelope does not parse, the
    /// format version is unsupported, or the state violates its invariants.
    pub fn load(&self, session_id: &str) -> Result<SessionState, SessionError> {
        let path = self.snapshot_path(session_id);
        if !path.exists() {
            return Err(SessionError::NotFound { session_id: session_id.to_owned() });
        }
        let bytes = std::fs::read(&path)?;
        let envelope: SnapshotEnvelope = serde_json::from_slice(&bytes)
            .map_err(CorruptedSessionError::Malformed)?;
        if envelope.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(CorruptedSessionError::UnsupportedVersion {
                found: envelope.format_version,
                supported: SNAPSHOT_FORMAT_VERSION,
            }
            .into());
        }
        envelope
            .state
            .validate_integrity()
            .map_err(CorruptedSessionError::IntegrityViolation)?;
        info!(
            session_id,
            pending = envelope.state.pending_queue.len(),
            completed = envelope.state.completed.len(),
            "snapshot loaded"
        );
        Ok(envelope.state)
    }

    /// Removes a session's snapshot (for finalize, or for discarding a
    /// corrupted one). Missing files are fine.
    pub fn delete(&self, session_id: &str) -> Result<(), PersistenceError> {
        match std::fs::remove_file(self.snapshot_path(session_id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Session ids with a snapshot on disk, newest first.
    pub fn list_sessions(&self) -> Vec<String> {
        let mut entries: Vec<(std::time::SystemTime, String)> = Vec::new();
        let Ok(dir) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        for entry in dir.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            entries.push((modified, stem.to_owned()));
        }
        entries.sort_by(|a, b| b.0.cmp(&a.0));
        entries.into_iter().map(|(_, id)| id).collect()
    }

    /// Reads a stored session's header without resuming it. `None` when
    /// the snapshot is missing or does not parse — corrupted entries still
    /// show up in `list_sessions` so a caller can offer deletion.
    pub fn session_info(&self, session_id: &str) -> Option<SessionInfo> {
        let bytes = std::fs::read(self.snapshot_path(session_id)).ok()?;
        let envelope: SnapshotEnvelope = serde_json::from_slice(&bytes).ok()?;
        Some(SessionInfo {
            session_id: envelope.state.session_id.clone(),
            experiment_name: envelope.state.config.experiment_name.clone(),
            created_at: envelope.state.created_at,
            saved_at: envelope.saved_at,
            progress: envelope.state.progress(),
        })
    }

    /// Deletes snapshots not saved within the last `days` days, plus any
    /// orphaned temp and lock files. Returns how many snapshots were
    /// removed. Housekeeping only — never called from the review loop.
    pub fn cleanup_old_sessions(&self, days: u64) -> usize {
        let cutoff = std::time::SystemTime::now()
            - std::time::Duration::from_secs(days.saturating_mul(24 * 60 * 60));
        let mut removed = 0usize;
        let Ok(dir) = std::fs::read_dir(&self.dir) else {
            return 0;
        };
        for entry in dir.flatten() {
            let path = entry.path();
            let extension = path.extension().and_then(|e| e.to_str());
            let stale = entry
                .metadata()
                .and_then(|m| m.modified())
                .map(|modified| modified < cutoff)
                .unwrap_or(false);
            if !stale {
                continue;
            }
            match extension {
                Some("json") => {
                    if std::fs::remove_file(&path).is_ok() {
                        removed += 1;
                        info!(path = %path.display(), "removed stale session snapshot");
                    }
                }
                Some("tmp") | Some("lock") => {
                    let _ = std::fs::remove_file(&path);
                }
                _ => {}
            }
        }
        removed
    }
}
