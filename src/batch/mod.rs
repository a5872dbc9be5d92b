//! The resumable download controller.
//!
//! Iterates the per-skill result files produced by discovery, invokes the
//! EPUB builder per book, and writes every outcome through the progress
//! tracker. One long-lived session serves the whole run: the service
//! revokes authentication aggressively when it sees several fresh sessions
//! racing, so no component ever builds its own client.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::auth::{CookieError, CookieStore};
use crate::client::{ApiClient, AuthStatus, FetchError};
use crate::config::EngineConfig;
use crate::discovery::{SkillResultFile, read_result_file};
use crate::epub::{EpubBuilder, EpubError, Variant};
use crate::events::EventBus;
use crate::paths;
use crate::progress::{ProgressError, ProgressTracker};
use crate::search::BookRecord;

const COMPONENT: &str = "batch";

/// Skills between automatic progress checkpoints.
const CHECKPOINT_EVERY_SKILLS: u64 = 10;

#[allow(clippy::unwrap_used)]
static BOOK_ID_IN_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/book/(\d+)/").unwrap());

/// Errors that abort a whole download run.
#[derive(Debug, Error)]
pub enum BatchError {
    /// No discovery output to work from.
    #[error("no per-skill result files found in {dir}: run `skillshelf discover` first")]
    NoWork {
        /// The directory that was scanned.
        dir: PathBuf,
    },

    /// The session cookies were rejected by the platform.
    #[error("credential error: {detail}")]
    Credential {
        /// What the auth probe reported.
        detail: String,
    },

    /// Cookie bundle could not be loaded or persisted.
    #[error(transparent)]
    Cookie(#[from] CookieError),

    /// Progress snapshot could not be persisted.
    #[error(transparent)]
    Progress(#[from] ProgressError),

    /// Result files could not be read.
    #[error("failed to read result files in {dir}: {source}")]
    Io {
        /// The directory involved.
        dir: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Options for one download run.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Case-insensitive substring filters on skill names.
    pub skill_filter: Vec<String>,
    /// Per-skill cap on books, overriding the config when set.
    pub max_books: Option<usize>,
    /// Variants to build per book.
    pub variants: Vec<Variant>,
    /// Rebuild even when the `.epub` already exists.
    pub force: bool,
    /// Cookie persistence cadence, overriding the config when set.
    pub token_save_interval: Option<u32>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            skill_filter: Vec::new(),
            max_books: None,
            variants: vec![Variant::Enhanced],
            force: false,
            token_save_interval: None,
        }
    }
}

/// Aggregate result of a download run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Skills processed.
    pub skills_processed: u64,
    /// Books in the work list.
    pub books_total: u64,
    /// Books downloaded this run.
    pub books_downloaded: u64,
    /// Books skipped because their `.epub` already existed.
    pub books_skipped: u64,
    /// Books that failed this run.
    pub books_failed: u64,
    /// Failed identifier to first error line.
    pub failed: BTreeMap<String, String>,
    /// Whether the run stopped on an interrupt.
    pub interrupted: bool,
}

/// Drives the download phase over the discovered work list.
pub struct DownloadController {
    client: Arc<ApiClient>,
    builder: EpubBuilder,
    tracker: Arc<ProgressTracker>,
    events: Arc<EventBus>,
    config: EngineConfig,
    cancel: Arc<AtomicBool>,
}

impl DownloadController {
    /// Creates a controller over the shared session, tracker and event bus.
    #[must_use]
    pub fn new(
        client: Arc<ApiClient>,
        config: EngineConfig,
        events: Arc<EventBus>,
        tracker: Arc<ProgressTracker>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        let builder = EpubBuilder::new(
            Arc::clone(&client),
            config.base_url.clone(),
            Arc::clone(&events),
            Arc::clone(&cancel),
        );
        Self {
            client,
            builder,
            tracker,
            events,
            config,
            cancel,
        }
    }

    /// Runs the download phase.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError`] for configuration and credential problems and
    /// for persistence failures. Per-book failures are recorded in the
    /// summary and the run continues.
    #[instrument(skip(self, options))]
    pub async fn run(&self, options: &DownloadOptions) -> Result<RunSummary, BatchError> {
        self.check_credentials().await?;

        let work = self.load_work_lists(&options.skill_filter)?;
        if work.is_empty() {
            return Err(BatchError::NoWork {
                dir: self.config.book_ids_dir.clone(),
            });
        }

        let per_skill_cap = options
            .max_books
            .unwrap_or(self.config.max_books_per_skill)
            .max(1);
        let token_save_interval = options
            .token_save_interval
            .unwrap_or(self.config.token_save_interval)
            .max(1);

        let total_books: u64 = work
            .iter()
            .map(|file| file.books.len().min(per_skill_cap) as u64)
            .sum();

        self.tracker
            .start_session(work.len() as u64, total_books)?;
        let names: Vec<String> = work.iter().map(|w| w.skill_name.clone()).collect();
        self.tracker.set_pending_skills(&names)?;

        self.events.info(
            COMPONENT,
            format!(
                "starting download: {} skills, {total_books} books, variants {:?}",
                work.len(),
                options.variants
            ),
        );

        let mut summary = RunSummary {
            books_total: total_books,
            ..RunSummary::default()
        };
        let mut completed_since_save: u32 = 0;

        'skills: for (skill_index, file) in work.iter().enumerate() {
            let skill_dir = self.config.books_dir.join(paths::skill_dir_name(&file.skill_name));
            std::fs::create_dir_all(&skill_dir).map_err(|source| BatchError::Io {
                dir: skill_dir.clone(),
                source,
            })?;

            let books: Vec<&BookRecord> = file.books.iter().take(per_skill_cap).collect();
            self.tracker
                .update_current_skill(&file.skill_name, 0, books.len() as u64)?;
            self.events.info(
                COMPONENT,
                format!("skill '{}': {} books", file.skill_name, books.len()),
            );

            for (book_index, book) in books.iter().enumerate() {
                if self.cancel.load(Ordering::SeqCst) {
                    summary.interrupted = true;
                    break 'skills;
                }

                let book_id = extract_book_id(&book.id);
                self.tracker.update_current_item(&book.title, &book_id)?;
                self.tracker.update_current_skill(
                    &file.skill_name,
                    book_index as u64,
                    books.len() as u64,
                )?;

                if !options.force && epub_exists(&skill_dir, &book_id, &options.variants) {
                    debug!(book_id, "epub already on disk, skipping");
                    self.tracker.mark_completed(&book_id)?;
                    summary.books_skipped += 1;
                    continue;
                }

                match self
                    .builder
                    .build(&book_id, &skill_dir, &options.variants)
                    .await
                {
                    Ok(output) => {
                        self.tracker.mark_completed(&book_id)?;
                        summary.books_downloaded += 1;
                        completed_since_save += 1;
                        debug!(book_id, epubs = output.epub_paths.len(), "book complete");

                        if completed_since_save >= token_save_interval {
                            self.client.cookies().persist(&self.config.cookie_file)?;
                            self.events.debug(
                                COMPONENT,
                                "persisted session cookies (token freshness)",
                            );
                            completed_since_save = 0;
                        }
                    }
                    Err(EpubError::Cancelled { .. }) => {
                        summary.interrupted = true;
                        break 'skills;
                    }
                    Err(err) => {
                        let message = err.to_string();
                        self.events.error(
                            COMPONENT,
                            format!("book {book_id} ('{}') failed: {message}", book.title),
                        );
                        self.tracker.mark_failed(&book_id, &message)?;
                        summary.failed.insert(book_id, first_line(&message));
                        summary.books_failed += 1;
                    }
                }

                if book_index + 1 < books.len() {
                    tokio::time::sleep(Duration::from_millis(self.config.download_delay_ms)).await;
                }
            }

            self.tracker.mark_skill_completed(&file.skill_name)?;
            summary.skills_processed += 1;

            if (skill_index as u64 + 1) % CHECKPOINT_EVERY_SKILLS == 0 {
                self.tracker.create_checkpoint()?;
            }
        }

        // Freshest tokens always land on disk, interrupt or not.
        self.client.cookies().persist(&self.config.cookie_file)?;

        if summary.interrupted {
            self.tracker.pause_session()?;
            self.events.warning(COMPONENT, "run interrupted; progress saved for resume");
        } else {
            self.tracker.complete_session()?;
        }

        self.emit_summary(&summary);
        Ok(summary)
    }

    async fn check_credentials(&self) -> Result<(), BatchError> {
        let profile_url = format!("{}/profile/", self.config.base_url);
        match self.client.check_auth(&profile_url).await {
            Ok(AuthStatus::Valid) => Ok(()),
            Ok(AuthStatus::LoggedOut) => Err(BatchError::Credential {
                detail: "session cookies rejected (redirected to login); \
                         export fresh cookies from your browser"
                    .to_string(),
            }),
            Ok(AuthStatus::Expired) => Err(BatchError::Credential {
                detail: "account subscription is expired".to_string(),
            }),
            Err(FetchError::Status { status, .. }) => Err(BatchError::Credential {
                detail: format!("auth probe returned HTTP {status}"),
            }),
            Err(err) => Err(BatchError::Credential {
                detail: format!("auth probe failed: {err}"),
            }),
        }
    }

    /// Loads every `*_books.json`, applies filters and ordering.
    fn load_work_lists(&self, skill_filter: &[String]) -> Result<Vec<SkillResultFile>, BatchError> {
        let dir = &self.config.book_ids_dir;
        let entries = std::fs::read_dir(dir).map_err(|source| BatchError::Io {
            dir: dir.clone(),
            source,
        })?;

        let mut paths_found: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with("_books.json"))
            })
            .collect();
        paths_found.sort();

        let lowered: Vec<String> = skill_filter.iter().map(|f| f.to_lowercase()).collect();
        let mut work: Vec<SkillResultFile> = Vec::new();
        for path in paths_found {
            let file = read_result_file(&path).map_err(|source| BatchError::Io {
                dir: path.clone(),
                source,
            })?;
            if self.config.exclude_skills.contains(&file.skill_name) {
                continue;
            }
            if !lowered.is_empty() {
                let name = file.skill_name.to_lowercase();
                if !lowered.iter().any(|f| name.contains(f)) {
                    continue;
                }
            }
            if file.books.is_empty() {
                debug!(skill = %file.skill_name, "empty result file, skipping");
                continue;
            }
            work.push(file);
        }

        // Priority skills first, input order otherwise.
        let priority = &self.config.priority_skills;
        if !priority.is_empty() {
            let (first, rest): (Vec<SkillResultFile>, Vec<SkillResultFile>) = work
                .into_iter()
                .partition(|file| priority.contains(&file.skill_name));
            work = first.into_iter().chain(rest).collect();
        }

        Ok(work)
    }

    fn emit_summary(&self, summary: &RunSummary) {
        self.events.info(
            COMPONENT,
            format!(
                "download finished: {} downloaded, {} skipped, {} failed of {} total",
                summary.books_downloaded,
                summary.books_skipped,
                summary.books_failed,
                summary.books_total
            ),
        );
        for (id, error) in &summary.failed {
            self.events.error(COMPONENT, format!("failed {id}: {error}"));
        }
    }
}

/// Extracts the numeric book identifier from the forms the result files
/// carry: a bare id, or an API URL like `.../api/v1/book/<id>/`.
#[must_use]
pub fn extract_book_id(raw: &str) -> String {
    if raw.starts_with("http") {
        if let Some(capture) = BOOK_ID_IN_URL.captures(raw) {
            return capture[1].to_string();
        }
        if let Some(segment) = raw
            .split('/')
            .filter(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
            .next_back()
        {
            return segment.to_string();
        }
    }
    raw.to_string()
}

/// Whether every requested variant's `.epub` already exists for `book_id`
/// under `skill_dir`.
#[must_use]
pub fn epub_exists(skill_dir: &Path, book_id: &str, variants: &[Variant]) -> bool {
    let marker = format!("({book_id})");
    let Ok(entries) = std::fs::read_dir(skill_dir) else {
        return false;
    };

    let mut has_standard = false;
    let mut has_kindle = false;
    for entry in entries.filter_map(Result::ok) {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.contains(&marker) || !entry.path().is_dir() {
            continue;
        }
        let Ok(files) = std::fs::read_dir(entry.path()) else {
            continue;
        };
        for file in files.filter_map(Result::ok) {
            let filename = file.file_name().to_string_lossy().into_owned();
            if filename.ends_with(".epub") {
                if filename.contains(" (Kindle)") {
                    has_kindle = true;
                } else {
                    has_standard = true;
                }
            }
        }
    }

    variants.iter().all(|variant| {
        if variant.is_kindle() {
            has_kindle
        } else {
            has_standard
        }
    })
}

fn first_line(message: &str) -> String {
    message.lines().next().unwrap_or(message).to_string()
}
