//! Chapter asset downloads: stylesheets, images and the cover.
//!
//! Assets download sequentially through the shared session. Every file is
//! skipped when it already exists on disk, which is what makes the working
//! tree restartable. A failed asset is a warning, never a book failure.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use super::EpubError;
use super::meta::BookMeta;
use crate::client::ApiClient;
use crate::events::EventBus;

const COMPONENT: &str = "epub";

/// Attempts per image before giving up.
const IMAGE_ATTEMPTS: u32 = 3;

/// Minimum byte size for an acceptable high-resolution cover.
const COVER_MIN_BYTES: usize = 10 * 1024;

/// Downloads every collected stylesheet once, numbering files by first-seen
/// order (`Style00.css`, `Style01.css`, ...). Existing files are skipped, so
/// the numbering is stable across resumed runs as long as the chapter fetch
/// order is stable.
///
/// Returns the stylesheet filenames present after the pass.
///
/// # Errors
///
/// Returns [`EpubError::Io`] only when the styles directory itself cannot be
/// read; individual download failures are warnings.
#[instrument(level = "debug", skip_all, fields(count = urls.len()))]
pub async fn download_stylesheets(
    client: &Arc<ApiClient>,
    urls: &[String],
    styles_dir: &Path,
    events: &EventBus,
) -> Result<Vec<String>, EpubError> {
    for (index, url) in urls.iter().enumerate() {
        let filename = format!("Style{index:02}.css");
        let path = styles_dir.join(&filename);
        if path.exists() {
            debug!(file = %filename, "stylesheet already on disk");
            continue;
        }
        match client.get_bytes(url).await {
            Ok(bytes) => {
                std::fs::write(&path, bytes).map_err(|source| EpubError::io(&path, source))?;
                debug!(file = %filename, "stylesheet downloaded");
            }
            Err(err) => {
                events.warning(COMPONENT, format!("failed to fetch stylesheet {url}: {err}"));
            }
        }
    }

    list_files(styles_dir)
}

/// Downloads every collected image once by basename, with bounded retry.
/// Existing files are skipped.
///
/// Returns the image filenames present after the pass.
///
/// # Errors
///
/// Returns [`EpubError::Io`] only when the images directory itself cannot be
/// read; individual download failures are warnings.
#[instrument(level = "debug", skip_all, fields(count = urls.len()))]
pub async fn download_images(
    client: &Arc<ApiClient>,
    urls: &[String],
    images_dir: &Path,
    events: &EventBus,
) -> Result<Vec<String>, EpubError> {
    for url in urls {
        let basename = url.rsplit('/').next().unwrap_or(url);
        let path = images_dir.join(basename);
        if path.exists() {
            debug!(file = %basename, "image already on disk");
            continue;
        }

        let mut delay = Duration::from_millis(500);
        let mut fetched = false;
        for attempt in 1..=IMAGE_ATTEMPTS {
            match client.download_to_file(url, &path).await {
                Ok(_) => {
                    fetched = true;
                    break;
                }
                Err(err) if attempt < IMAGE_ATTEMPTS => {
                    debug!(
                        image = %basename,
                        attempt,
                        error = %err,
                        "image fetch failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(err) => {
                    events.warning(
                        COMPONENT,
                        format!("failed to fetch image {basename} after {IMAGE_ATTEMPTS} attempts: {err}"),
                    );
                }
            }
        }
        if !fetched && path.exists() {
            // A partial file from an aborted stream must not satisfy the
            // skip-if-exists check on the next run.
            let _ = std::fs::remove_file(&path);
        }
    }

    list_files(images_dir)
}

/// Fetches the metadata cover through a short list of high-resolution URL
/// rewrites, accepting the first body larger than [`COVER_MIN_BYTES`].
///
/// Returns the stored filename, or `None` when no candidate qualifies.
#[instrument(level = "debug", skip(client, meta))]
pub async fn obtain_cover(
    client: &Arc<ApiClient>,
    meta: &BookMeta,
    images_dir: &Path,
) -> Option<String> {
    let cover_url = meta.cover_url.as_deref()?;
    let filename = cover_filename(cover_url, &meta.book_id);
    let path = images_dir.join(&filename);
    if path.exists() {
        return Some(filename);
    }

    for candidate in cover_candidates(cover_url) {
        match client.get_bytes(&candidate).await {
            Ok(bytes) if bytes.len() > COVER_MIN_BYTES => {
                if std::fs::write(&path, &bytes).is_ok() {
                    debug!(file = %filename, bytes = bytes.len(), "cover stored");
                    return Some(filename);
                }
            }
            Ok(bytes) => {
                debug!(url = %candidate, bytes = bytes.len(), "cover candidate too small");
            }
            Err(err) => {
                debug!(url = %candidate, error = %err, "cover candidate failed");
            }
        }
    }

    warn!(book = %meta.book_id, "no usable cover image found");
    None
}

/// High-resolution rewrites tried in order, ending with the original URL.
fn cover_candidates(url: &str) -> Vec<String> {
    let mut candidates = Vec::new();
    for (from, to) in [("200w", "800w"), ("400w", "800w"), ("/small/", "/large/")] {
        if url.contains(from) {
            let rewritten = url.replace(from, to);
            if !candidates.contains(&rewritten) {
                candidates.push(rewritten);
            }
        }
    }
    candidates.push(url.to_string());
    candidates
}

fn cover_filename(url: &str, book_id: &str) -> String {
    let basename = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .rsplit('/')
        .next()
        .unwrap_or("");
    if basename.contains('.') {
        basename.to_string()
    } else {
        format!("cover_{book_id}.jpg")
    }
}

fn list_files(dir: &Path) -> Result<Vec<String>, EpubError> {
    let mut files: Vec<String> = std::fs::read_dir(dir)
        .map_err(|source| EpubError::io(dir, source))?
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    files.sort();
    Ok(files)
}
