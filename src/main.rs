//! CLI entry point for the skillshelf tool.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use skillshelf_core::{
    ApiClient, CookieStore, DiscoveryController, DiscoveryOptions, DownloadController,
    DownloadOptions, EngineConfig, Event, EventBus, EventSink, Level, LogSink, ProgressTracker,
    SearchAdapter, skills, variants_for_format,
};

mod cli;

use cli::{Args, Command};

/// Exit code for an interrupted run, per shell convention (128 + SIGINT).
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // The config decides where the rotating log file lives, so it loads
    // before the subscriber is installed.
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("error: {error:#}");
            return ExitCode::FAILURE;
        }
    };

    // Dropping the guard on exit flushes buffered log lines.
    let _log_guard = init_tracing(&args, &config);

    debug!(?args, "CLI arguments parsed");

    match run(args, config).await {
        Ok(Outcome::Done) => ExitCode::SUCCESS,
        Ok(Outcome::Interrupted) => ExitCode::from(EXIT_INTERRUPTED),
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &Args) -> Result<EngineConfig> {
    match &args.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

/// Installs the tracing subscriber: one layer to standard output and one to
/// a daily-rolling log file, both behind the verbosity filter.
fn init_tracing(args: &Args, config: &EngineConfig) -> tracing_appender::non_blocking::WorkerGuard {
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    let log_dir = config
        .log_file
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let log_name = config
        .log_file
        .file_name()
        .map_or_else(|| std::ffi::OsString::from("skillshelf.log"), ToOwned::to_owned);
    let _ = std::fs::create_dir_all(log_dir);
    let file_appender = tracing_appender::rolling::daily(log_dir, log_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    guard
}

enum Outcome {
    Done,
    Interrupted,
}

async fn run(args: Args, config: EngineConfig) -> Result<Outcome> {
    let cancel = Arc::new(AtomicBool::new(false));
    spawn_interrupt_handler(Arc::clone(&cancel));

    match args.command {
        Command::Discover {
            skills: skill_filter,
            workers,
            max_pages,
            update,
            dry_run,
        } => {
            let mut config = config;
            if let Some(workers) = workers {
                config.workers = usize::from(workers);
            }
            if let Some(max_pages) = max_pages {
                config.max_pages_per_skill = max_pages;
            }

            discover(config, skill_filter, update, dry_run, args.quiet).await
        }
        Command::Download {
            skills: skill_filter,
            max_books,
            format,
            force,
            token_save_interval,
        } => {
            let options = DownloadOptions {
                skill_filter,
                max_books,
                variants: variants_for_format(&format),
                force,
                token_save_interval,
            };
            download(config, options, cancel, args.quiet).await
        }
    }
}

async fn discover(
    config: EngineConfig,
    skill_filter: Vec<String>,
    update: bool,
    dry_run: bool,
    quiet: bool,
) -> Result<Outcome> {
    let skill_list = skills::load_skills(&config.skills_file)?;

    // The v2 search endpoint serves anonymous queries; run with whatever
    // bundle is on disk and fall back to an empty one.
    let cookies = match CookieStore::load(&config.cookie_file) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            debug!(error = %err, "no cookie bundle, discovering anonymously");
            Arc::new(CookieStore::empty())
        }
    };

    let client = Arc::new(ApiClient::new(
        cookies,
        config.connect_timeout_secs,
        config.read_timeout_secs,
    ));
    let adapter = SearchAdapter::new(Arc::clone(&client), config.base_url.clone(), config.search_api);

    let events = Arc::new(build_event_bus(quiet));
    let tracker = Arc::new(ProgressTracker::open(&config.progress_file, None)?);

    let strict = !skill_list.lenient;
    let controller = DiscoveryController::new(
        adapter,
        config,
        strict,
        Arc::clone(&events),
        tracker,
    );

    let options = DiscoveryOptions {
        update,
        dry_run,
        skill_filter,
    };
    let summary = controller.run(&skill_list, &options).await?;

    info!(
        discovered = summary.total_books_discovered,
        successful = summary.successful_skills,
        failed = summary.failed_skills.len(),
        too_broad = summary.skipped_skills.len(),
        "discovery run complete"
    );
    for (skill, error) in &summary.failed_skills {
        info!(skill = %skill, error = %error, "skill failed");
    }

    Ok(Outcome::Done)
}

async fn download(
    config: EngineConfig,
    options: DownloadOptions,
    cancel: Arc<AtomicBool>,
    quiet: bool,
) -> Result<Outcome> {
    let cookies = Arc::new(
        CookieStore::load(&config.cookie_file).context("download requires session cookies")?,
    );
    let client = Arc::new(ApiClient::new(
        cookies,
        config.connect_timeout_secs,
        config.read_timeout_secs,
    ));

    let events = Arc::new(build_event_bus(quiet));
    let tracker = Arc::new(ProgressTracker::open(
        &config.progress_file,
        Some(&config.live_stats_file),
    )?);

    let controller = DownloadController::new(
        client,
        config,
        Arc::clone(&events),
        tracker,
        Arc::clone(&cancel),
    );

    let summary = controller.run(&options).await?;

    info!(
        downloaded = summary.books_downloaded,
        skipped = summary.books_skipped,
        failed = summary.books_failed,
        total = summary.books_total,
        "download run complete"
    );
    for (id, error) in &summary.failed {
        info!(id = %id, error = %error, "book failed");
    }

    if summary.interrupted {
        return Ok(Outcome::Interrupted);
    }
    Ok(Outcome::Done)
}

fn build_event_bus(quiet: bool) -> EventBus {
    let mut bus = EventBus::new();
    bus.register(Arc::new(LogSink));
    if !quiet {
        bus.register(Arc::new(SpinnerSink::new()));
    }
    bus
}

fn spawn_interrupt_handler(cancel: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, finishing the current unit");
            cancel.store(true, Ordering::SeqCst);
        }
    });
}

/// Event sink that keeps a terminal spinner updated with the latest
/// info-level message.
struct SpinnerSink {
    spinner: ProgressBar,
}

impl SpinnerSink {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(120));
        Self { spinner }
    }
}

impl EventSink for SpinnerSink {
    fn emit(&self, event: &Event) {
        if event.level >= Level::Info {
            self.spinner
                .set_message(format!("[{}] {}", event.component, event.message));
        }
    }
}
