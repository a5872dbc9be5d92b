//! Per-skill discovery: pagination, filtering, deduplication and the
//! per-skill result files.
//!
//! For each skill the controller drives the search adapter through every
//! topic variant and page, runs items through the filter pipeline, and
//! persists the kept books atomically. Skills fan out over a small worker
//! pool; all workers share the one HTTP client and cookie store. One
//! skill's failure never aborts the run.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::client::{Failure, FetchError, RetryDecision, RetryPolicy, classify_error};
use crate::config::EngineConfig;
use crate::events::EventBus;
use crate::fsio;
use crate::paths;
use crate::progress::{ProgressError, ProgressTracker};
use crate::search::{
    BookRecord, FilterConfig, FilterPipeline, SearchAdapter, TopicTarget, topic_candidates,
};
use crate::skills::{Skill, SkillList};

const COMPONENT: &str = "discovery";

/// Extra pages fetched beyond the estimate, to absorb filter losses.
const PAGE_SLACK: u32 = 2;

/// Errors that fail a single skill's discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The platform does not know the topic at all.
    #[error("topic not found: {topic}")]
    TopicNotFound {
        /// The topic that returned 404.
        topic: String,
    },

    /// Remote failure that survived the retry policy.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Result file could not be written.
    #[error("failed to write result file {path}: {source}")]
    Io {
        /// The file involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Progress snapshot could not be persisted.
    #[error(transparent)]
    Progress(#[from] ProgressError),
}

/// Options for one discovery run.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOptions {
    /// Re-discover skills whose result file already exists.
    pub update: bool,
    /// List what would be discovered without issuing requests.
    pub dry_run: bool,
    /// Case-insensitive substring filters on skill names.
    pub skill_filter: Vec<String>,
}

/// Per-skill result file shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillResultFile {
    /// The skill name as the catalog spells it.
    pub skill_name: String,
    /// Epoch seconds of the discovery pass.
    pub discovery_timestamp: f64,
    /// Number of kept books.
    pub total_books: u64,
    /// The kept books in discovery order.
    pub books: Vec<BookRecord>,
}

/// Outcome of one skill's discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SkillOutcome {
    Discovered { kept: u64 },
    AlreadyDiscovered,
    TooBroad,
    Failed(String),
}

/// Aggregate result of a discovery run.
#[derive(Debug, Clone, Default)]
pub struct DiscoverySummary {
    /// Skills processed (any outcome).
    pub skills_processed: u64,
    /// Skills that produced a result file.
    pub successful_skills: u64,
    /// Skills skipped because a result file already existed.
    pub already_discovered: u64,
    /// Total books written across all result files.
    pub total_books_discovered: u64,
    /// Sum of expected counts over processed skills.
    pub total_books_expected: u64,
    /// Skills skipped as too broad.
    pub skipped_skills: Vec<String>,
    /// Skill name to error for failed skills.
    pub failed_skills: BTreeMap<String, String>,
}

/// Drives discovery across the skill list.
pub struct DiscoveryController {
    adapter: SearchAdapter,
    filter: FilterPipeline,
    retry: RetryPolicy,
    config: EngineConfig,
    events: Arc<EventBus>,
    tracker: Arc<ProgressTracker>,
}

impl DiscoveryController {
    /// Creates a controller over a shared adapter, tracker and event bus.
    ///
    /// Strict topic matching follows the skill list mode: counted lists are
    /// strict, facet lists are lenient.
    #[must_use]
    pub fn new(
        adapter: SearchAdapter,
        config: EngineConfig,
        strict: bool,
        events: Arc<EventBus>,
        tracker: Arc<ProgressTracker>,
    ) -> Self {
        let filter = FilterPipeline::new(FilterConfig {
            strict,
            short_title_min: config.short_title_min,
            no_isbn_title_min: config.no_isbn_title_min,
            base_url: config.base_url.clone(),
        });
        let retry = RetryPolicy::with_max_attempts(config.max_retries.max(1));
        Self {
            adapter,
            filter,
            retry,
            config,
            events,
            tracker,
        }
    }

    /// Runs discovery over every skill in the list.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError`] when the progress snapshot cannot be
    /// persisted; individual skill failures are recorded in the summary and
    /// do not abort the run.
    #[instrument(skip(self, skills), fields(skills = skills.skills.len()))]
    pub async fn run(
        &self,
        skills: &SkillList,
        options: &DiscoveryOptions,
    ) -> Result<DiscoverySummary, ProgressError> {
        let arranged = skills
            .clone()
            .filtered(&options.skill_filter)
            .arranged(&self.config.exclude_skills, &self.config.priority_skills);

        if options.dry_run {
            for skill in &arranged.skills {
                self.events.info(
                    COMPONENT,
                    format!(
                        "would discover '{}' (expected: {})",
                        skill.name,
                        skill
                            .expected
                            .map_or_else(|| "unknown".to_string(), |n| n.to_string())
                    ),
                );
            }
            return Ok(DiscoverySummary {
                skills_processed: arranged.skills.len() as u64,
                ..DiscoverySummary::default()
            });
        }

        self.tracker
            .start_session(arranged.skills.len() as u64, 0)?;
        let names: Vec<String> = arranged.skills.iter().map(|s| s.name.clone()).collect();
        self.tracker.set_pending_skills(&names)?;

        self.events.info(
            COMPONENT,
            format!(
                "starting discovery for {} skills ({} workers)",
                arranged.skills.len(),
                self.config.workers.max(1)
            ),
        );

        let lenient = arranged.lenient;
        let catalog = &arranged.catalog;
        let update = options.update;
        let outcomes: Vec<(Skill, SkillOutcome)> =
            futures_util::stream::iter(arranged.skills.clone().into_iter().map(|skill| {
                async move {
                    let outcome = self.discover_skill(&skill, lenient, catalog, update).await;
                    tokio::time::sleep(Duration::from_millis(self.config.skill_delay_ms)).await;
                    (skill, outcome)
                }
            }))
            .buffer_unordered(self.config.workers.max(1))
            .collect()
            .await;

        let mut summary = DiscoverySummary::default();
        for (skill, outcome) in outcomes {
            summary.skills_processed += 1;
            summary.total_books_expected += skill.expected.unwrap_or(0);
            match outcome {
                SkillOutcome::Discovered { kept } => {
                    summary.successful_skills += 1;
                    summary.total_books_discovered += kept;
                }
                SkillOutcome::AlreadyDiscovered => summary.already_discovered += 1,
                SkillOutcome::TooBroad => summary.skipped_skills.push(skill.name.clone()),
                SkillOutcome::Failed(error) => {
                    summary.failed_skills.insert(skill.name.clone(), error);
                }
            }
        }

        self.tracker.complete_session()?;
        self.events.info(
            COMPONENT,
            format!(
                "discovery finished: {} ok, {} failed, {} too broad, {} already on disk, {} books",
                summary.successful_skills,
                summary.failed_skills.len(),
                summary.skipped_skills.len(),
                summary.already_discovered,
                summary.total_books_discovered
            ),
        );

        Ok(summary)
    }

    /// Discovers one skill; every outcome is also pushed into the tracker.
    async fn discover_skill(
        &self,
        skill: &Skill,
        lenient: bool,
        catalog: &[String],
        update: bool,
    ) -> SkillOutcome {
        let result_path = self.result_path(&skill.name);

        if result_path.exists() && !update {
            self.events.info(
                COMPONENT,
                format!("'{}' already discovered, skipping (use --update)", skill.name),
            );
            return SkillOutcome::AlreadyDiscovered;
        }

        if let Some(expected) = skill.expected
            && expected > self.config.too_broad_cap
        {
            self.events.info(
                COMPONENT,
                format!(
                    "skipped (too broad): '{}' expects {expected} books (cap {})",
                    skill.name, self.config.too_broad_cap
                ),
            );
            let _ = self.tracker.mark_skill_skipped(&skill.name);
            return SkillOutcome::TooBroad;
        }

        match self.collect_books(skill, lenient, catalog).await {
            Ok(books) => {
                let kept = books.len() as u64;
                if let Err(err) = self.write_result_file(&result_path, &skill.name, books) {
                    let message = err.to_string();
                    self.events.error(COMPONENT, format!("'{}': {message}", skill.name));
                    let _ = self.tracker.mark_skill_failed(&skill.name, &message);
                    return SkillOutcome::Failed(message);
                }
                let _ = self.tracker.record_discovered_books(kept);
                let _ = self.tracker.mark_skill_completed(&skill.name);

                let diff_note = skill.expected.map_or(String::new(), |expected| {
                    format!(" (expected {expected}, diff {:+})", kept as i64 - expected as i64)
                });
                self.events.info(
                    COMPONENT,
                    format!("'{}': kept {kept} books{diff_note}", skill.name),
                );
                SkillOutcome::Discovered { kept }
            }
            Err(err) => {
                let message = err.to_string();
                self.events
                    .error(COMPONENT, format!("'{}' failed: {message}", skill.name));
                let _ = self.tracker.mark_skill_failed(&skill.name, &message);
                SkillOutcome::Failed(message)
            }
        }
    }

    /// Paginates every topic variant of a skill through the filter pipeline.
    async fn collect_books(
        &self,
        skill: &Skill,
        lenient: bool,
        catalog: &[String],
    ) -> Result<Vec<BookRecord>, DiscoveryError> {
        let target = TopicTarget::new(&skill.name);
        let candidates = topic_candidates(&skill.name, lenient, &self.config.alias_table, catalog);

        let page_cap = self.page_cap(skill.expected);
        let mut seen: HashSet<String> = HashSet::new();
        let mut kept: Vec<BookRecord> = Vec::new();
        let mut rejected: BTreeMap<&'static str, u64> = BTreeMap::new();
        let mut primary_not_found = false;

        for (candidate_index, topic) in candidates.iter().enumerate() {
            let mut page: u32 = 1;
            loop {
                let fetched = match self.fetch_page_with_retry(topic, page).await {
                    Ok(fetched) => fetched,
                    Err(FetchError::Status { status: 404, .. }) => {
                        debug!(topic, "topic unknown to the catalog");
                        if candidate_index == 0 {
                            primary_not_found = true;
                        }
                        break;
                    }
                    Err(err) => return Err(err.into()),
                };

                if fetched.items.is_empty() {
                    debug!(topic, page, "empty page, stopping pagination");
                    break;
                }

                for item in &fetched.items {
                    match self.filter.check(item, &target, &seen) {
                        Ok(record) => {
                            seen.insert(record.id.clone());
                            kept.push(record);
                        }
                        Err(reason) => {
                            *rejected.entry(reason.label()).or_insert(0) += 1;
                            self.events.debug(
                                COMPONENT,
                                format!("rejected ({}): {}", reason.label(), item.title),
                            );
                        }
                    }
                }

                let target_reached = skill
                    .expected
                    .is_some_and(|expected| kept.len() as u64 >= expected);
                if target_reached || !fetched.has_next || page >= page_cap {
                    break;
                }

                page += 1;
                tokio::time::sleep(Duration::from_millis(self.config.request_delay_ms)).await;
            }
        }

        if kept.is_empty() && primary_not_found {
            return Err(DiscoveryError::TopicNotFound {
                topic: skill.name.clone(),
            });
        }

        if !rejected.is_empty() {
            let detail: Vec<String> = rejected
                .iter()
                .map(|(reason, count)| format!("{reason}={count}"))
                .collect();
            self.events.debug(
                COMPONENT,
                format!("'{}' filtered: {}", skill.name, detail.join(" ")),
            );
        }

        Ok(kept)
    }

    /// One page fetch wrapped in the retry policy.
    async fn fetch_page_with_retry(
        &self,
        topic: &str,
        page: u32,
    ) -> Result<crate::search::SearchPage, FetchError> {
        let mut attempt: u32 = 1;
        loop {
            match self
                .adapter
                .fetch_page(topic, page, self.config.page_size)
                .await
            {
                Ok(fetched) => return Ok(fetched),
                Err(err) => {
                    let failure = classify_error(&err);
                    // 404 of a topic is permanent and handled by the caller.
                    if failure == Failure::Permanent {
                        return Err(err);
                    }
                    match self.retry.should_retry(failure, attempt) {
                        RetryDecision::Retry { delay, attempt: next } => {
                            self.events.warning(
                                COMPONENT,
                                format!(
                                    "transient failure on '{topic}' page {page} \
                                     (attempt {attempt}): {err}; retrying"
                                ),
                            );
                            tokio::time::sleep(delay).await;
                            attempt = next;
                        }
                        RetryDecision::DoNotRetry { .. } => return Err(err),
                    }
                }
            }
        }
    }

    fn page_cap(&self, expected: Option<u64>) -> u32 {
        match expected {
            Some(expected) => {
                let pages = expected.div_ceil(u64::from(self.config.page_size)) as u32 + PAGE_SLACK;
                pages.min(self.config.max_pages_per_skill).max(1)
            }
            None => self.config.max_pages_per_skill,
        }
    }

    fn result_path(&self, skill_name: &str) -> PathBuf {
        self.config
            .book_ids_dir
            .join(format!("{}_books.json", paths::skill_file_stem(skill_name)))
    }

    fn write_result_file(
        &self,
        path: &Path,
        skill_name: &str,
        books: Vec<BookRecord>,
    ) -> Result<(), DiscoveryError> {
        let file = SkillResultFile {
            skill_name: skill_name.to_string(),
            discovery_timestamp: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
            total_books: books.len() as u64,
            books,
        };
        fsio::write_json_atomic(path, &file).map_err(|source| DiscoveryError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Reads a per-skill result file.
///
/// # Errors
///
/// Returns an [`std::io::Error`] when the file is missing or not valid for
/// the schema.
pub fn read_result_file(path: &Path) -> std::io::Result<SkillResultFile> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(std::io::Error::other)
}
