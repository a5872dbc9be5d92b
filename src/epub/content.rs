//! Chapter HTML visitor: collect stylesheet and image references, rewrite
//! links for the package layout, and detect an inline cover image.
//!
//! The visitor streams each chapter through `lol_html` once, then re-encodes
//! the rewritten markup through `quick-xml` so the emitted documents are
//! well-formed XHTML.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex, PoisonError};

use lol_html::html_content::ContentType;
use lol_html::{HtmlRewriter, Settings, element};
use quick_xml::events::Event;
use quick_xml::{Reader, Writer};
use tracing::debug;
use url::Url;

use super::EpubError;
use super::chapters::ChapterMeta;

/// Extensions treated as image references during link rewriting.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];

/// Relative-path markers that always denote image assets.
const IMAGE_PATH_MARKERS: &[&str] = &["cover", "images", "graphics"];

/// Everything the visitor learned from one chapter.
#[derive(Debug, Default)]
pub struct ChapterExtract {
    /// Rewritten body markup, XHTML-safe.
    pub body: String,
    /// CSS text lifted from `<style data-template>` blocks.
    pub inline_css: Vec<String>,
    /// Resolved stylesheet URLs referenced by the chapter.
    pub stylesheet_urls: Vec<String>,
    /// Basename of an inline cover image, when detected.
    pub cover_image: Option<String>,
}

/// Per-chapter rewriting context.
#[derive(Debug, Clone)]
pub struct RewriteContext {
    /// The book identifier, used to unwrap absolute self-links.
    pub book_id: String,
    /// Base URL that relative stylesheet hrefs resolve against.
    pub page_base: String,
    /// Resolved asset base for the chapter's image references.
    pub asset_base: String,
    /// Cover detection only applies to the first chapter.
    pub first_chapter: bool,
}

/// Resolves the asset base URL for a chapter, switching to the v2 asset
/// scheme when the chapter content itself is served by the v2 API.
#[must_use]
pub fn resolve_asset_base(chapter: &ChapterMeta, base_url: &str, book_id: &str) -> String {
    if chapter.content.contains("/v2/") {
        format!("{base_url}/api/v2/epubs/urn:orm:book:{book_id}/files")
    } else {
        chapter.asset_base_url.clone()
    }
}

/// Resolves one declared image reference against the chapter's asset base.
#[must_use]
pub fn resolve_image_url(image: &str, ctx: &RewriteContext) -> String {
    if ctx.asset_base.contains("/api/v2/") {
        format!("{}/{}", ctx.asset_base.trim_end_matches('/'), image)
    } else if let Ok(base) = Url::parse(&ctx.asset_base)
        && let Ok(joined) = base.join(image)
    {
        joined.to_string()
    } else {
        image.to_string()
    }
}

/// Rewrites one outbound link for the package layout.
///
/// Relative image-ish links collapse to `Images/<basename>`, intra-book
/// `.html` links become `.xhtml`, absolute links that reference this book's
/// identifier are unwrapped and rewritten recursively, and everything else
/// (including `mailto:`) passes through untouched.
#[must_use]
pub fn rewrite_link(link: &str, book_id: &str) -> String {
    if link.is_empty() || link.starts_with("mailto:") {
        return link.to_string();
    }

    let is_absolute = Url::parse(link).is_ok_and(|u| u.has_host());
    if is_absolute {
        if !book_id.is_empty()
            && let Some(idx) = link.find(book_id)
        {
            let remainder = &link[idx + book_id.len()..];
            let remainder = remainder.trim_start_matches('/');
            return rewrite_link(remainder, book_id);
        }
        return link.to_string();
    }

    let lowered = link.to_lowercase();
    if IMAGE_PATH_MARKERS.iter().any(|m| lowered.contains(m)) || is_image_link(&lowered) {
        let basename = link.rsplit('/').next().unwrap_or(link);
        return format!("Images/{basename}");
    }

    link.replace(".html", ".xhtml")
}

fn is_image_link(link: &str) -> bool {
    let path = link.split(['?', '#']).next().unwrap_or(link);
    path.rsplit('.')
        .next()
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext))
}

/// Runs the visitor over one chapter document.
///
/// # Errors
///
/// Returns [`EpubError::ContentMissing`] when neither the content container
/// id nor its class fallback appears in the document.
#[allow(clippy::too_many_lines)]
pub fn process_chapter_html(
    raw_html: &str,
    chapter_name: &str,
    ctx: &RewriteContext,
) -> Result<ChapterExtract, EpubError> {
    let output = Arc::new(Mutex::new(String::new()));
    let inline_css = Arc::new(Mutex::new(Vec::<String>::new()));
    let stylesheets = Arc::new(Mutex::new(Vec::<String>::new()));
    let cover = Arc::new(Mutex::new(None::<String>));
    let container_found = Arc::new(Mutex::new(false));

    let output_sink = Arc::clone(&output);
    let css_handle = Arc::clone(&inline_css);
    let sheet_handle = Arc::clone(&stylesheets);
    let cover_handle = Arc::clone(&cover);
    let container_id = Arc::clone(&container_found);
    let container_class = Arc::clone(&container_found);

    let page_base = ctx.page_base.clone();
    let book_id = ctx.book_id.clone();
    let link_book_id = ctx.book_id.clone();
    let first_chapter = ctx.first_chapter;

    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![
                element!("div#sbo-rt-content", move |_el| {
                    *container_id.lock().unwrap_or_else(PoisonError::into_inner) = true;
                    Ok(())
                }),
                element!("div.sbo-rt-content", move |_el| {
                    *container_class.lock().unwrap_or_else(PoisonError::into_inner) = true;
                    Ok(())
                }),
                element!("link[rel='stylesheet']", move |el| {
                    if let Some(href) = el.get_attribute("href") {
                        let resolved = if href.starts_with("//") {
                            format!("https:{href}")
                        } else if let Ok(base) = Url::parse(&page_base)
                            && let Ok(joined) = base.join(&href)
                        {
                            joined.to_string()
                        } else {
                            href
                        };
                        let mut sheets =
                            sheet_handle.lock().unwrap_or_else(PoisonError::into_inner);
                        if !sheets.contains(&resolved) {
                            sheets.push(resolved);
                        }
                    }
                    el.remove();
                    Ok(())
                }),
                element!("style[data-template]", move |el| {
                    if let Some(css) = el.get_attribute("data-template")
                        && !css.trim().is_empty()
                    {
                        css_handle
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(css);
                    }
                    el.remove();
                    Ok(())
                }),
                element!("a[href]", move |el| {
                    if let Some(href) = el.get_attribute("href") {
                        el.set_attribute("href", &rewrite_link(&href, &link_book_id))?;
                    }
                    Ok(())
                }),
                element!("img", move |el| {
                    if let Some(src) = el.get_attribute("src") {
                        if first_chapter {
                            let class = el.get_attribute("class").unwrap_or_default();
                            if src.to_lowercase().contains("cover")
                                || class.to_lowercase().contains("cover")
                            {
                                let basename =
                                    src.rsplit('/').next().unwrap_or(&src).to_string();
                                cover_handle
                                    .lock()
                                    .unwrap_or_else(PoisonError::into_inner)
                                    .replace(basename);
                            }
                        }
                        el.set_attribute("src", &rewrite_link(&src, &book_id))?;
                    }

                    // Rebuild as a self-closing tag for XHTML output.
                    let mut tag = String::from("<img");
                    for attr in el.attributes() {
                        tag.push_str(&format!(
                            " {}=\"{}\"",
                            attr.name(),
                            attr.value().replace('"', "&quot;")
                        ));
                    }
                    tag.push_str(" />");
                    el.replace(&tag, ContentType::Html);
                    Ok(())
                }),
                element!("br", |el| {
                    el.replace("<br />", ContentType::Html);
                    Ok(())
                }),
                element!("hr", |el| {
                    el.replace("<hr />", ContentType::Html);
                    Ok(())
                }),
            ],
            ..Settings::default()
        },
        |chunk: &[u8]| {
            output_sink
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_str(&String::from_utf8_lossy(chunk));
        },
    );

    let rewrite_failed = |err: lol_html::errors::RewritingError| EpubError::ContentMissing {
        chapter: format!("{chapter_name} (rewrite failed: {err})"),
    };
    rewriter
        .write(raw_html.as_bytes())
        .map_err(rewrite_failed)?;
    rewriter.end().map_err(rewrite_failed)?;

    if !*container_found.lock().unwrap_or_else(PoisonError::into_inner) {
        return Err(EpubError::ContentMissing {
            chapter: chapter_name.to_string(),
        });
    }

    let rewritten = output
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    let body = extract_body(&rewritten);
    let body = match re_encode_xhtml(&body) {
        Ok(encoded) => encoded,
        Err(err) => {
            debug!(chapter = chapter_name, error = %err, "XHTML re-encode failed, keeping raw markup");
            body
        }
    };

    Ok(ChapterExtract {
        body,
        inline_css: take(&inline_css),
        stylesheet_urls: take(&stylesheets),
        cover_image: cover.lock().unwrap_or_else(PoisonError::into_inner).clone(),
    })
}

fn take(collected: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
    std::mem::take(&mut *collected.lock().unwrap_or_else(PoisonError::into_inner))
}

/// Extracts the inner markup of `<body>`; documents without a body pass
/// through whole.
fn extract_body(document: &str) -> String {
    let Some(open) = document.find("<body") else {
        return document.to_string();
    };
    let Some(start) = document[open..].find('>').map(|i| open + i + 1) else {
        return document.to_string();
    };
    let end = document.rfind("</body>").unwrap_or(document.len());
    if end <= start {
        return document.to_string();
    }
    document[start..end].to_string()
}

/// Re-encodes an HTML fragment as well-formed XML by streaming it through
/// quick-xml.
fn re_encode_xhtml(fragment: &str) -> Result<String, quick_xml::Error> {
    let wrapped = format!("<root>{fragment}</root>");
    let mut reader = Reader::from_str(&wrapped);
    let config = reader.config_mut();
    config.trim_text(false);
    config.expand_empty_elements = false;

    let mut writer = Writer::new(Cursor::new(Vec::new()));
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"root" => {}
            Ok(Event::End(e)) if e.name().as_ref() == b"root" => {}
            Ok(Event::Eof) => break,
            Ok(event) => writer.write_event(event)?,
            Err(err) => return Err(err.into()),
        }
    }

    let bytes = writer.into_inner().into_inner();
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Maps declared chapter-index references (images, stylesheets) to resolved
/// URLs keyed by their package basename.
#[must_use]
pub fn resolve_declared_images(chapter: &ChapterMeta, ctx: &RewriteContext) -> Vec<String> {
    let mut seen: HashMap<String, ()> = HashMap::new();
    let mut resolved = Vec::new();
    for image in &chapter.images {
        let url = resolve_image_url(image, ctx);
        if seen.insert(url.clone(), ()).is_none() {
            resolved.push(url);
        }
    }
    resolved
}
