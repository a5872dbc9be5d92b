//! The versioned progress snapshot and its legacy migration.
//!
//! The snapshot carries a `schema_version` tag. Version 1 was a flat file
//! with `downloaded` (list) and `failed` (map); loading one migrates it into
//! the current shape. Unknown top-level fields are preserved across rewrites
//! so a newer tool's snapshot survives being touched by an older one.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Current snapshot schema version.
pub const SCHEMA_VERSION: u32 = 2;

/// Checkpoints kept in the bounded ring.
pub(super) const CHECKPOINT_KEEP: usize = 10;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created but not started.
    Initialized,
    /// Actively processing.
    InProgress,
    /// Paused by the operator.
    Paused,
    /// Finished normally.
    Completed,
    /// Aborted by a fatal error.
    Failed,
}

/// Session identity and lifecycle timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Random identifier distinguishing runs in logs.
    pub session_id: String,
    /// When the session started.
    pub start_time: DateTime<Utc>,
    /// When the snapshot was last mutated.
    pub last_update: DateTime<Utc>,
    /// Lifecycle state.
    pub status: SessionStatus,
}

/// Skill-level counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillStats {
    /// Skills in this run.
    pub total: u64,
    /// Completed skills.
    pub completed: u64,
    /// Failed skills.
    pub failed: u64,
    /// Skipped skills (too broad, already discovered).
    pub skipped: u64,
}

/// Book-level counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookStats {
    /// Books known to this run.
    pub total: u64,
    /// Books downloaded.
    pub downloaded: u64,
    /// Books currently failed.
    pub failed: u64,
    /// Books skipped (already on disk).
    pub skipped: u64,
}

/// Derived timing statistics, recomputed on every mutation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Performance {
    /// Seconds since the session started.
    pub elapsed_seconds: u64,
    /// Completed items per minute.
    pub average_items_per_minute: f64,
    /// Estimated minutes remaining, when the rate is known.
    pub estimated_minutes_remaining: Option<u64>,
    /// Wall-clock estimate of completion.
    pub expected_completion: Option<DateTime<Utc>>,
}

/// What the engine is working on right now.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentActivity {
    /// Skill being processed.
    pub skill: Option<String>,
    /// Progress within the skill, rendered as `current/total`.
    pub skill_progress: String,
    /// Title of the current book.
    pub item_title: Option<String>,
    /// Identifier of the current book.
    pub item_id: Option<String>,
}

impl Default for CurrentActivity {
    fn default() -> Self {
        Self {
            skill: None,
            skill_progress: "0/0".to_string(),
            item_title: None,
            item_id: None,
        }
    }
}

/// One entry of the bounded checkpoint ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// When the checkpoint was taken.
    pub timestamp: DateTime<Utc>,
    /// Completed items at that moment.
    pub completed_items: u64,
    /// Completed skills at that moment.
    pub completed_skills: u64,
    /// Failed items at that moment.
    pub failed_items: u64,
}

/// The full durable progress state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Schema tag; see [`SCHEMA_VERSION`].
    pub schema_version: u32,
    /// Session identity and lifecycle.
    pub session: SessionInfo,
    /// Skill counters.
    #[serde(default)]
    pub skill_stats: SkillStats,
    /// Book counters.
    #[serde(default)]
    pub book_stats: BookStats,
    /// Derived timing statistics.
    #[serde(default)]
    pub performance: Performance,
    /// Current focus.
    #[serde(default)]
    pub current: CurrentActivity,
    /// Identifiers of completed books.
    #[serde(default)]
    pub completed_items: BTreeSet<String>,
    /// Failed book identifier to last error string.
    #[serde(default)]
    pub failed_items: BTreeMap<String, String>,
    /// Failed skill name to error string.
    #[serde(default)]
    pub skills_failed: BTreeMap<String, String>,
    /// Completed skills in completion order.
    #[serde(default)]
    pub skills_completed: Vec<String>,
    /// Skills not yet processed.
    #[serde(default)]
    pub skills_pending: Vec<String>,
    /// Skills skipped by policy.
    #[serde(default)]
    pub skills_skipped: Vec<String>,
    /// Bounded checkpoint ring (last [`CHECKPOINT_KEEP`]).
    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
    /// Fields written by other schema generations, preserved verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Snapshot {
    /// Creates a fresh snapshot.
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION,
            session: SessionInfo {
                session_id: uuid::Uuid::new_v4().to_string(),
                start_time: now,
                last_update: now,
                status: SessionStatus::Initialized,
            },
            skill_stats: SkillStats::default(),
            book_stats: BookStats::default(),
            performance: Performance::default(),
            current: CurrentActivity::default(),
            completed_items: BTreeSet::new(),
            failed_items: BTreeMap::new(),
            skills_failed: BTreeMap::new(),
            skills_completed: Vec::new(),
            skills_pending: Vec::new(),
            skills_skipped: Vec::new(),
            checkpoints: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Recomputes elapsed time, rate and ETA from the counters.
    pub fn recompute_performance(&mut self) {
        let now = Utc::now();
        let elapsed = (now - self.session.start_time).num_seconds().max(0) as u64;
        self.performance.elapsed_seconds = elapsed;

        let completed = self.completed_items.len() as u64;
        if elapsed > 0 && completed > 0 {
            let per_minute = completed as f64 / (elapsed as f64 / 60.0);
            self.performance.average_items_per_minute = (per_minute * 100.0).round() / 100.0;

            let remaining = self.book_stats.total.saturating_sub(completed);
            if per_minute > 0.0 {
                let minutes = (remaining as f64 / per_minute).round() as i64;
                self.performance.estimated_minutes_remaining = Some(minutes.max(0) as u64);
                self.performance.expected_completion = Some(now + Duration::minutes(minutes));
            }
        } else {
            self.performance.estimated_minutes_remaining = None;
            self.performance.expected_completion = None;
        }
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses snapshot text, migrating legacy shapes when needed.
///
/// # Errors
///
/// Returns the underlying parse error when the text is not JSON or matches
/// no known generation.
pub(super) fn load_or_migrate(text: &str) -> Result<Snapshot, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(text)?;

    let version = value
        .get("schema_version")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(1);

    if version >= 2 {
        return serde_json::from_value(value);
    }

    Ok(migrate_v1(&value))
}

/// Migrates the legacy flat shape: `downloaded` (list of ids), `failed`
/// (id to error map), `timestamp` (epoch seconds).
fn migrate_v1(value: &serde_json::Value) -> Snapshot {
    let mut snapshot = Snapshot::new();

    if let Some(downloaded) = value.get("downloaded").and_then(|v| v.as_array()) {
        snapshot.completed_items = downloaded
            .iter()
            .filter_map(|v| v.as_str())
            .map(ToString::to_string)
            .collect();
        snapshot.book_stats.downloaded = snapshot.completed_items.len() as u64;
    }

    if let Some(failed) = value.get("failed").and_then(|v| v.as_object()) {
        snapshot.failed_items = failed
            .iter()
            .map(|(k, v)| {
                (
                    k.clone(),
                    v.as_str().map_or_else(|| v.to_string(), ToString::to_string),
                )
            })
            .collect();
        snapshot.book_stats.failed = snapshot.failed_items.len() as u64;
    }

    if let Some(timestamp) = value.get("timestamp").and_then(serde_json::Value::as_f64)
        && let Some(when) = DateTime::<Utc>::from_timestamp(timestamp as i64, 0)
    {
        snapshot.session.last_update = when;
    }

    snapshot
}
