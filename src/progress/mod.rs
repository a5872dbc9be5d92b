//! Durable progress tracking.
//!
//! The snapshot file is the ground truth for resume: every mutation rewrites
//! it atomically, so a crash at any point restarts from the last persisted
//! state and the pending work set is reconstructed by set-difference against
//! the discovered universe.

mod live;
mod snapshot;

pub use snapshot::{
    BookStats, Checkpoint, CurrentActivity, Performance, SCHEMA_VERSION, SessionInfo,
    SessionStatus, SkillStats, Snapshot,
};

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::fsio;

/// Errors raised while persisting or loading progress state.
#[derive(Debug, Error)]
pub enum ProgressError {
    /// Snapshot file unreadable or unwritable.
    #[error("progress file I/O error at {path}: {source}")]
    Io {
        /// The file involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Snapshot file exists but cannot be parsed even as a legacy shape.
    #[error("unreadable progress snapshot at {path}: {source}")]
    Corrupt {
        /// The offending file.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}

/// Thread-safe owner of the progress snapshot file.
///
/// All mutation goes through the internal mutex; each mutating method bumps
/// the `last_update` timestamp, recomputes the derived statistics and
/// persists the snapshot (plus the live stats text file) before returning.
#[derive(Debug)]
pub struct ProgressTracker {
    path: PathBuf,
    live_path: Option<PathBuf>,
    state: Mutex<Snapshot>,
}

impl ProgressTracker {
    /// Opens (or creates) the tracker at `path`.
    ///
    /// An existing snapshot is loaded and migrated when it predates the
    /// current schema; `live_path`, when given, receives the human-readable
    /// stats block on every mutation.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::Corrupt`] when an existing file cannot be
    /// parsed at all, and [`ProgressError::Io`] on read failure.
    #[instrument(level = "debug")]
    pub fn open(path: &Path, live_path: Option<&Path>) -> Result<Self, ProgressError> {
        let snapshot = match std::fs::read_to_string(path) {
            Ok(text) => snapshot::load_or_migrate(&text).map_err(|source| {
                ProgressError::Corrupt {
                    path: path.to_path_buf(),
                    source,
                }
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Snapshot::new(),
            Err(source) => {
                return Err(ProgressError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        debug!(
            completed = snapshot.completed_items.len(),
            failed = snapshot.failed_items.len(),
            "opened progress tracker"
        );

        Ok(Self {
            path: path.to_path_buf(),
            live_path: live_path.map(Path::to_path_buf),
            state: Mutex::new(snapshot),
        })
    }

    /// Starts (or restarts) a session with the given totals.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError`] when the snapshot cannot be persisted.
    pub fn start_session(&self, total_skills: u64, total_books: u64) -> Result<(), ProgressError> {
        self.mutate(|s| {
            s.session.status = SessionStatus::InProgress;
            s.session.start_time = Utc::now();
            s.skill_stats.total = total_skills;
            s.book_stats.total = total_books;
        })
    }

    /// Marks the session paused.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError`] when the snapshot cannot be persisted.
    pub fn pause_session(&self) -> Result<(), ProgressError> {
        self.mutate(|s| s.session.status = SessionStatus::Paused)
    }

    /// Resumes a paused session.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError`] when the snapshot cannot be persisted.
    pub fn resume_session(&self) -> Result<(), ProgressError> {
        self.mutate(|s| s.session.status = SessionStatus::InProgress)
    }

    /// Marks the session completed.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError`] when the snapshot cannot be persisted.
    pub fn complete_session(&self) -> Result<(), ProgressError> {
        self.mutate(|s| {
            s.session.status = SessionStatus::Completed;
            s.current = CurrentActivity::default();
        })
    }

    /// Marks the session failed.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError`] when the snapshot cannot be persisted.
    pub fn fail_session(&self) -> Result<(), ProgressError> {
        self.mutate(|s| s.session.status = SessionStatus::Failed)
    }

    /// Replaces the pending skills list (names already completed are left
    /// out).
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError`] when the snapshot cannot be persisted.
    pub fn set_pending_skills(&self, skills: &[String]) -> Result<(), ProgressError> {
        self.mutate(|s| {
            s.skills_pending = skills
                .iter()
                .filter(|name| !s.skills_completed.contains(*name))
                .cloned()
                .collect();
        })
    }

    /// Updates the skill currently being processed.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError`] when the snapshot cannot be persisted.
    pub fn update_current_skill(
        &self,
        name: &str,
        current: u64,
        total: u64,
    ) -> Result<(), ProgressError> {
        self.mutate(|s| {
            s.current.skill = Some(name.to_string());
            s.current.skill_progress = format!("{current}/{total}");
        })
    }

    /// Updates the item currently being processed.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError`] when the snapshot cannot be persisted.
    pub fn update_current_item(&self, title: &str, id: &str) -> Result<(), ProgressError> {
        self.mutate(|s| {
            s.current.item_title = Some(title.to_string());
            s.current.item_id = Some(id.to_string());
        })
    }

    /// Records a completed book. A previous failure of the same id is
    /// cleared.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError`] when the snapshot cannot be persisted.
    pub fn mark_completed(&self, id: &str) -> Result<(), ProgressError> {
        self.mutate(|s| {
            s.completed_items.insert(id.to_string());
            s.failed_items.remove(id);
            s.book_stats.downloaded = s.completed_items.len() as u64;
            s.book_stats.failed = s.failed_items.len() as u64;
        })
    }

    /// Records a failed book with its last error.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError`] when the snapshot cannot be persisted.
    pub fn mark_failed(&self, id: &str, error: &str) -> Result<(), ProgressError> {
        self.mutate(|s| {
            s.failed_items.insert(id.to_string(), error.to_string());
            s.book_stats.failed = s.failed_items.len() as u64;
        })
    }

    /// Moves a skill from pending to completed.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError`] when the snapshot cannot be persisted.
    pub fn mark_skill_completed(&self, name: &str) -> Result<(), ProgressError> {
        self.mutate(|s| {
            if !s.skills_completed.iter().any(|n| n == name) {
                s.skills_completed.push(name.to_string());
            }
            s.skills_pending.retain(|n| n != name);
            s.skill_stats.completed = s.skills_completed.len() as u64;
            if s.current.skill.as_deref() == Some(name) {
                s.current.skill = None;
            }
        })
    }

    /// Records a skill-level failure; the run continues with other skills.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError`] when the snapshot cannot be persisted.
    pub fn mark_skill_failed(&self, name: &str, error: &str) -> Result<(), ProgressError> {
        self.mutate(|s| {
            s.skills_failed.insert(name.to_string(), error.to_string());
            s.skills_pending.retain(|n| n != name);
            s.skill_stats.failed = s.skills_failed.len() as u64;
        })
    }

    /// Records a skill skipped by policy (e.g. too broad).
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError`] when the snapshot cannot be persisted.
    pub fn mark_skill_skipped(&self, name: &str) -> Result<(), ProgressError> {
        self.mutate(|s| {
            if !s.skills_skipped.iter().any(|n| n == name) {
                s.skills_skipped.push(name.to_string());
            }
            s.skills_pending.retain(|n| n != name);
            s.skill_stats.skipped = s.skills_skipped.len() as u64;
        })
    }

    /// Adds newly discovered books to the running total.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError`] when the snapshot cannot be persisted.
    pub fn record_discovered_books(&self, count: u64) -> Result<(), ProgressError> {
        self.mutate(|s| s.book_stats.total += count)
    }

    /// Snapshots the current counters into the bounded checkpoint ring.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError`] when the snapshot cannot be persisted.
    pub fn create_checkpoint(&self) -> Result<(), ProgressError> {
        self.mutate(|s| {
            s.checkpoints.push(Checkpoint {
                timestamp: Utc::now(),
                completed_items: s.completed_items.len() as u64,
                completed_skills: s.skills_completed.len() as u64,
                failed_items: s.failed_items.len() as u64,
            });
            let overflow = s.checkpoints.len().saturating_sub(snapshot::CHECKPOINT_KEEP);
            if overflow > 0 {
                s.checkpoints.drain(..overflow);
            }
        })
    }

    /// Returns a copy of the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.lock().clone()
    }

    /// Returns the completed identifiers.
    #[must_use]
    pub fn completed_items(&self) -> BTreeSet<String> {
        self.lock().completed_items.clone()
    }

    /// The pending work set: `universe` minus everything already completed.
    /// Order of `universe` is preserved.
    #[must_use]
    pub fn pending_work(&self, universe: &[String]) -> Vec<String> {
        let state = self.lock();
        universe
            .iter()
            .filter(|id| !state.completed_items.contains(*id))
            .cloned()
            .collect()
    }

    fn mutate(&self, apply: impl FnOnce(&mut Snapshot)) -> Result<(), ProgressError> {
        let mut state = self.lock();
        apply(&mut state);
        state.session.last_update = Utc::now();
        state.recompute_performance();
        self.persist(&state)
    }

    fn persist(&self, state: &MutexGuard<'_, Snapshot>) -> Result<(), ProgressError> {
        fsio::write_json_atomic(&self.path, &**state).map_err(|source| ProgressError::Io {
            path: self.path.clone(),
            source,
        })?;
        if let Some(live_path) = &self.live_path {
            let text = live::render(state);
            fsio::write_atomic(live_path, text.as_bytes()).map_err(|source| ProgressError::Io {
                path: live_path.clone(),
                source,
            })?;
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Snapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tracker(dir: &TempDir) -> ProgressTracker {
        ProgressTracker::open(&dir.path().join("progress.json"), None).unwrap()
    }

    #[test]
    fn test_new_tracker_starts_initialized() {
        let dir = TempDir::new().unwrap();
        let t = tracker(&dir);
        assert_eq!(t.snapshot().session.status, SessionStatus::Initialized);
    }

    #[test]
    fn test_start_session_sets_totals_and_status() {
        let dir = TempDir::new().unwrap();
        let t = tracker(&dir);
        t.start_session(3, 120).unwrap();

        let s = t.snapshot();
        assert_eq!(s.session.status, SessionStatus::InProgress);
        assert_eq!(s.skill_stats.total, 3);
        assert_eq!(s.book_stats.total, 120);
    }

    #[test]
    fn test_mark_completed_clears_previous_failure() {
        let dir = TempDir::new().unwrap();
        let t = tracker(&dir);
        t.mark_failed("9781", "timeout").unwrap();
        assert_eq!(t.snapshot().book_stats.failed, 1);

        t.mark_completed("9781").unwrap();

        let s = t.snapshot();
        assert!(s.completed_items.contains("9781"));
        assert!(s.failed_items.is_empty());
        assert_eq!(s.book_stats.failed, 0);
        assert_eq!(s.book_stats.downloaded, 1);
    }

    #[test]
    fn test_mark_completed_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let t = tracker(&dir);
        t.mark_completed("a").unwrap();
        t.mark_completed("a").unwrap();
        assert_eq!(t.snapshot().book_stats.downloaded, 1);
    }

    #[test]
    fn test_every_mutation_persists_to_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        let t = ProgressTracker::open(&path, None).unwrap();

        t.mark_completed("42").unwrap();

        let on_disk: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(
            on_disk["completed_items"]
                .as_array()
                .unwrap()
                .iter()
                .any(|v| v == "42")
        );
    }

    #[test]
    fn test_reload_after_crash_restores_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        {
            let t = ProgressTracker::open(&path, None).unwrap();
            t.start_session(1, 20).unwrap();
            for i in 0..7 {
                t.mark_completed(&format!("book-{i}")).unwrap();
            }
            // Dropped without complete_session: simulates a crash
        }

        let reopened = ProgressTracker::open(&path, None).unwrap();
        assert_eq!(reopened.completed_items().len(), 7);

        let universe: Vec<String> = (0..20).map(|i| format!("book-{i}")).collect();
        let pending = reopened.pending_work(&universe);
        assert_eq!(pending.len(), 13);
        assert!(!pending.contains(&"book-0".to_string()));
    }

    #[test]
    fn test_skill_lifecycle() {
        let dir = TempDir::new().unwrap();
        let t = tracker(&dir);
        t.set_pending_skills(&["A".into(), "B".into()]).unwrap();
        t.mark_skill_completed("A").unwrap();

        let s = t.snapshot();
        assert_eq!(s.skills_pending, vec!["B".to_string()]);
        assert_eq!(s.skills_completed, vec!["A".to_string()]);
        assert_eq!(s.skill_stats.completed, 1);
    }

    #[test]
    fn test_skill_skipped_tracked() {
        let dir = TempDir::new().unwrap();
        let t = tracker(&dir);
        t.mark_skill_skipped("Business").unwrap();

        let s = t.snapshot();
        assert!(s.skills_skipped.contains(&"Business".to_string()));
        assert_eq!(s.skill_stats.skipped, 1);
    }

    #[test]
    fn test_checkpoint_ring_keeps_last_ten() {
        let dir = TempDir::new().unwrap();
        let t = tracker(&dir);
        for i in 0..15 {
            t.mark_completed(&format!("b{i}")).unwrap();
            t.create_checkpoint().unwrap();
        }

        let s = t.snapshot();
        assert_eq!(s.checkpoints.len(), 10);
        // The oldest surviving checkpoint is the 6th created
        assert_eq!(s.checkpoints[0].completed_items, 6);
        assert_eq!(s.checkpoints[9].completed_items, 15);
    }

    #[test]
    fn test_live_stats_file_written_on_mutation() {
        let dir = TempDir::new().unwrap();
        let live = dir.path().join("live.txt");
        let t = ProgressTracker::open(&dir.path().join("p.json"), Some(&live)).unwrap();

        t.start_session(2, 10).unwrap();
        t.update_current_skill("Rust", 0, 10).unwrap();

        let text = std::fs::read_to_string(&live).unwrap();
        assert!(text.contains("Rust"));
        assert!(text.contains("Total Books: 10"));
    }

    #[test]
    fn test_corrupt_snapshot_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, "}{ not json").unwrap();
        let result = ProgressTracker::open(&path, None);
        assert!(matches!(result, Err(ProgressError::Corrupt { .. })));
    }
}
