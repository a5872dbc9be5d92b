//! Orchestrates the assembly of one book into its EPUB variants.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tracing::{debug, instrument, warn};

use super::chapters::{self, ChapterMeta};
use super::content::{self, RewriteContext};
use super::meta::{self, BookMeta};
use super::{EpubError, Variant, assets, package, writer};
use crate::client::ApiClient;
use crate::events::EventBus;
use crate::paths;

const COMPONENT: &str = "epub";

/// Builds one book at a time into a restartable working tree and packages
/// the requested variants.
pub struct EpubBuilder {
    client: Arc<ApiClient>,
    base_url: String,
    events: Arc<EventBus>,
    cancel: Arc<AtomicBool>,
}

/// What one build produced.
#[derive(Debug)]
pub struct BuildOutput {
    /// Normalized metadata used for naming.
    pub meta: BookMeta,
    /// The working tree directory.
    pub book_dir: PathBuf,
    /// One packaged `.epub` per requested variant.
    pub epub_paths: Vec<PathBuf>,
}

impl EpubBuilder {
    /// Creates a builder over the shared session.
    ///
    /// `cancel` is polled between chapters so an interrupt abandons the
    /// in-flight book cleanly instead of mid-write.
    #[must_use]
    pub fn new(
        client: Arc<ApiClient>,
        base_url: impl Into<String>,
        events: Arc<EventBus>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            events,
            cancel,
        }
    }

    /// Assembles `book_id` under `skill_dir` and packages `variants`.
    ///
    /// The working tree is reused across runs: chapters, stylesheets and
    /// images already on disk are not refetched.
    ///
    /// # Errors
    ///
    /// Returns [`EpubError`] when metadata or the chapter index cannot be
    /// fetched, on cancellation, and on packaging failure. Individual
    /// chapter or asset failures degrade the book instead of failing it.
    #[instrument(skip(self, skill_dir, variants))]
    pub async fn build(
        &self,
        book_id: &str,
        skill_dir: &Path,
        variants: &[Variant],
    ) -> Result<BuildOutput, EpubError> {
        self.check_cancelled(book_id)?;

        let book_meta = meta::fetch_metadata(&self.client, &self.base_url, book_id).await?;
        self.events.info(
            COMPONENT,
            format!("building '{}' ({book_id})", book_meta.title),
        );

        let chapter_index =
            chapters::fetch_chapter_index(&self.client, &self.base_url, book_id).await?;

        let book_dir = skill_dir.join(paths::book_dir_name(&book_meta.title, book_id));
        let oebps = book_dir.join("OEBPS");
        let images_dir = oebps.join("Images");
        let styles_dir = oebps.join("Styles");
        for dir in [&oebps, &images_dir, &styles_dir] {
            std::fs::create_dir_all(dir).map_err(|source| EpubError::io(dir, source))?;
        }
        meta::save_metadata(&book_meta, &book_dir)?;

        let fetched = self
            .fetch_chapters(book_id, &chapter_index, &oebps)
            .await?;

        assets::download_stylesheets(&self.client, &fetched.stylesheet_urls, &styles_dir, &self.events)
            .await?;
        let image_files =
            assets::download_images(&self.client, &fetched.image_urls, &images_dir, &self.events)
                .await?;

        // Inline cover first; fall back to the metadata cover URL.
        let cover_image = match fetched.cover_image {
            Some(name) if image_files.contains(&name) => Some(name),
            _ => assets::obtain_cover(&self.client, &book_meta, &images_dir).await,
        };

        let toc = chapters::fetch_toc(&self.client, &self.base_url, book_id).await;

        self.write_navigation(
            &book_meta,
            &book_dir,
            &fetched.written,
            toc.as_deref(),
            cover_image.as_deref(),
            variants,
        )?;

        let mut epub_paths = Vec::new();
        for &variant in variants {
            let opf = package::build_content_opf(
                &book_meta,
                &fetched.written,
                &list_dir(&styles_dir)?,
                &list_dir(&images_dir)?,
                cover_image.as_deref(),
                variant,
                Utc::now(),
            );
            write_file(&oebps.join("content.opf"), opf.as_bytes())?;

            let epub_name = paths::epub_file_name(
                &book_meta.title,
                &book_meta.authors_joined(),
                variant.is_kindle(),
            );
            let epub_path = book_dir.join(epub_name);
            writer::package_tree(&book_dir, &epub_path)?;
            self.events.info(
                COMPONENT,
                format!("packaged {}", epub_path.display()),
            );
            epub_paths.push(epub_path);
        }

        Ok(BuildOutput {
            meta: book_meta,
            book_dir,
            epub_paths,
        })
    }

    /// Fetches and rewrites every chapter that is not already on disk.
    async fn fetch_chapters(
        &self,
        book_id: &str,
        chapter_index: &[ChapterMeta],
        oebps: &Path,
    ) -> Result<FetchedContent, EpubError> {
        let mut written: Vec<ChapterMeta> = Vec::new();
        let mut stylesheet_urls: Vec<String> = Vec::new();
        let mut image_urls: Vec<String> = Vec::new();
        let mut cover_image: Option<String> = None;

        for (index, chapter) in chapter_index.iter().enumerate() {
            self.check_cancelled(book_id)?;

            let ctx = RewriteContext {
                book_id: book_id.to_string(),
                page_base: chapter.content.clone(),
                asset_base: content::resolve_asset_base(chapter, &self.base_url, book_id),
                first_chapter: index == 0,
            };

            // Declared assets are known without fetching the markup, which
            // keeps resumed runs complete even when every chapter is cached.
            for url in content::resolve_declared_images(chapter, &ctx) {
                if !image_urls.contains(&url) {
                    image_urls.push(url);
                }
            }

            let xhtml_path = oebps.join(chapter.xhtml_name());
            if xhtml_path.exists() {
                debug!(chapter = %chapter.filename, "chapter already on disk");
                written.push(chapter.clone());
                continue;
            }

            let raw = match self.client.get_text(&chapter.content).await {
                Ok(raw) => raw,
                Err(err) => {
                    self.events.warning(
                        COMPONENT,
                        format!("failed to fetch chapter '{}': {err}", chapter.title),
                    );
                    continue;
                }
            };

            let extract = match content::process_chapter_html(&raw, &chapter.filename, &ctx) {
                Ok(extract) => extract,
                Err(err) => {
                    self.events.warning(
                        COMPONENT,
                        format!("failed to process chapter '{}': {err}", chapter.title),
                    );
                    continue;
                }
            };

            let mut first_sheet_index = None;
            for url in &extract.stylesheet_urls {
                let position = stylesheet_urls.iter().position(|u| u == url);
                let position = position.unwrap_or_else(|| {
                    stylesheet_urls.push(url.clone());
                    stylesheet_urls.len() - 1
                });
                first_sheet_index.get_or_insert(position);
            }
            if cover_image.is_none() {
                cover_image = extract.cover_image.clone();
            }

            let css_href =
                first_sheet_index.map(|index| format!("Styles/Style{index:02}.css"));
            let document = package::chapter_document(
                &chapter.title,
                &extract.inline_css,
                css_href.as_deref(),
                &extract.body,
            );
            write_file(&xhtml_path, document.as_bytes())?;
            debug!(chapter = %chapter.filename, "chapter written");
            written.push(chapter.clone());
        }

        if written.is_empty() {
            return Err(EpubError::NoChapters {
                book_id: book_id.to_string(),
            });
        }

        Ok(FetchedContent {
            written,
            stylesheet_urls,
            image_urls,
            cover_image,
        })
    }

    /// Writes the shared navigation artifacts and the variant stylesheets.
    fn write_navigation(
        &self,
        book_meta: &BookMeta,
        book_dir: &Path,
        written: &[ChapterMeta],
        toc: Option<&[chapters::TocEntry]>,
        cover_image: Option<&str>,
        variants: &[Variant],
    ) -> Result<(), EpubError> {
        let oebps = book_dir.join("OEBPS");

        let meta_inf = book_dir.join("META-INF");
        std::fs::create_dir_all(&meta_inf).map_err(|source| EpubError::io(&meta_inf, source))?;
        write_file(
            &meta_inf.join("container.xml"),
            package::CONTAINER_XML.as_bytes(),
        )?;
        write_file(&book_dir.join("mimetype"), package::MIMETYPE.as_bytes())?;

        write_file(
            &oebps.join("toc.ncx"),
            package::build_toc_ncx(book_meta, toc, written).as_bytes(),
        )?;

        if variants.iter().any(|v| v.epub3()) {
            write_file(
                &oebps.join("nav.xhtml"),
                package::build_nav_xhtml(written).as_bytes(),
            )?;
        }

        if let Some(cover) = cover_image {
            write_file(
                &oebps.join("cover.xhtml"),
                package::build_cover_xhtml(cover).as_bytes(),
            )?;
        }

        // Both variant stylesheets land before any packaging pass so the
        // directory listing is identical for every variant's manifest.
        for &variant in variants {
            write_file(
                &oebps.join("Styles").join(variant.css_name()),
                package::variant_css(variant).as_bytes(),
            )?;
        }

        Ok(())
    }

    fn check_cancelled(&self, book_id: &str) -> Result<(), EpubError> {
        if self.cancel.load(Ordering::SeqCst) {
            warn!(book_id, "build cancelled");
            return Err(EpubError::Cancelled {
                book_id: book_id.to_string(),
            });
        }
        Ok(())
    }
}

struct FetchedContent {
    written: Vec<ChapterMeta>,
    stylesheet_urls: Vec<String>,
    image_urls: Vec<String>,
    cover_image: Option<String>,
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), EpubError> {
    std::fs::write(path, bytes).map_err(|source| EpubError::io(path, source))
}

fn list_dir(dir: &Path) -> Result<Vec<String>, EpubError> {
    let mut files: Vec<String> = std::fs::read_dir(dir)
        .map_err(|source| EpubError::io(dir, source))?
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    files.sort();
    Ok(files)
}
