//! Chapter index and table-of-contents retrieval.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, instrument};

use super::EpubError;
use crate::client::ApiClient;

/// One chapter as the index endpoint describes it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChapterMeta {
    /// Chapter title.
    pub title: String,
    /// Internal filename (`.html` on the wire, `.xhtml` in the package).
    pub filename: String,
    /// URL of the chapter HTML.
    pub content: String,
    /// Base URL that relative asset references resolve against.
    pub asset_base_url: String,
    /// Image references declared by the index.
    pub images: Vec<String>,
    /// Stylesheet references declared by the index.
    pub stylesheets: Vec<String>,
    /// Site-wide stylesheet references.
    pub site_styles: Vec<String>,
}

impl ChapterMeta {
    /// The package-internal filename, always `.xhtml`.
    #[must_use]
    pub fn xhtml_name(&self) -> String {
        self.filename.replace(".html", ".xhtml")
    }

    /// Whether this chapter is the cover page.
    #[must_use]
    pub fn is_cover(&self) -> bool {
        let filename = self.filename.to_lowercase();
        let title = self.title.to_lowercase();
        filename.contains("cover") || title.contains("cover")
    }
}

/// One node of the table-of-contents tree.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TocEntry {
    /// Display label.
    pub label: String,
    /// Target document href.
    pub href: String,
    /// Fragment within the target document.
    pub fragment: String,
    /// Stable id of the entry.
    pub id: String,
    /// Nesting depth as the service reports it.
    pub depth: u32,
    /// Child entries.
    pub children: Vec<TocEntry>,
}

#[derive(Deserialize)]
struct ChapterPage {
    #[serde(default)]
    results: Vec<ChapterMeta>,
    #[serde(default)]
    next: Option<serde_json::Value>,
}

/// Fetches the full chapter index, following pagination until the `next`
/// link runs out. Cover-named chapters are moved to the head of the list.
///
/// # Errors
///
/// Returns [`EpubError::NoChapters`] when the index is empty and
/// [`EpubError::Fetch`] on transport failure. Both abort the book.
#[instrument(level = "debug", skip(client))]
pub async fn fetch_chapter_index(
    client: &Arc<ApiClient>,
    base_url: &str,
    book_id: &str,
) -> Result<Vec<ChapterMeta>, EpubError> {
    let mut chapters: Vec<ChapterMeta> = Vec::new();
    let mut page: u32 = 1;

    loop {
        let url = format!("{base_url}/api/v1/book/{book_id}/chapter/?page={page}");
        let fetched: ChapterPage = client.get_json(&url).await?;
        let has_next = fetched.next.as_ref().is_some_and(|v| !v.is_null());
        chapters.extend(fetched.results);
        if !has_next {
            break;
        }
        page += 1;
    }

    if chapters.is_empty() {
        return Err(EpubError::NoChapters {
            book_id: book_id.to_string(),
        });
    }

    // Cover chapters read first regardless of index position.
    let (mut covers, rest): (Vec<ChapterMeta>, Vec<ChapterMeta>) =
        chapters.into_iter().partition(ChapterMeta::is_cover);
    covers.extend(rest);

    debug!(chapters = covers.len(), "fetched chapter index");
    Ok(covers)
}

/// Fetches the table-of-contents tree. A missing or malformed TOC is not
/// fatal; navigation falls back to the flat chapter list.
#[instrument(level = "debug", skip(client))]
pub async fn fetch_toc(
    client: &Arc<ApiClient>,
    base_url: &str,
    book_id: &str,
) -> Option<Vec<TocEntry>> {
    let url = format!("{base_url}/api/v1/book/{book_id}/toc/");
    match client.get_json::<Vec<TocEntry>>(&url).await {
        Ok(entries) if !entries.is_empty() => Some(entries),
        Ok(_) => None,
        Err(err) => {
            debug!(error = %err, "TOC unavailable, using flat chapter list");
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::auth::CookieStore;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> Arc<ApiClient> {
        Arc::new(ApiClient::new(Arc::new(CookieStore::empty()), 10, 30))
    }

    fn chapter(title: &str, filename: &str) -> serde_json::Value {
        serde_json::json!({
            "title": title,
            "filename": filename,
            "content": format!("https://example.com/api/v1/book/1/chapter-content/{filename}"),
            "asset_base_url": "https://example.com/library/",
            "images": [],
            "stylesheets": [],
        })
    }

    #[tokio::test]
    async fn test_single_page_index_stops_after_one_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/book/42/chapter/"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [chapter("Intro", "ch01.html")],
                "next": null
            })))
            .expect(1)
            .mount(&server)
            .await;

        let chapters = fetch_chapter_index(&client(), &server.uri(), "42")
            .await
            .unwrap();
        assert_eq!(chapters.len(), 1);
    }

    #[tokio::test]
    async fn test_pagination_follows_next_link() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/book/42/chapter/"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [chapter("One", "ch01.html")],
                "next": "https://example.com/api/v1/book/42/chapter/?page=2"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/book/42/chapter/"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [chapter("Two", "ch02.html")],
                "next": null
            })))
            .mount(&server)
            .await;

        let chapters = fetch_chapter_index(&client(), &server.uri(), "42")
            .await
            .unwrap();
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[1].filename, "ch02.html");
    }

    #[tokio::test]
    async fn test_cover_chapter_moves_to_head() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/book/42/chapter/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    chapter("Preface", "pref.html"),
                    chapter("Cover", "cover.html"),
                    chapter("One", "ch01.html"),
                ],
                "next": null
            })))
            .mount(&server)
            .await;

        let chapters = fetch_chapter_index(&client(), &server.uri(), "42")
            .await
            .unwrap();
        assert_eq!(chapters[0].filename, "cover.html");
    }

    #[tokio::test]
    async fn test_empty_index_is_no_chapters_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/book/42/chapter/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [],
                "next": null
            })))
            .mount(&server)
            .await;

        let result = fetch_chapter_index(&client(), &server.uri(), "42").await;
        assert!(matches!(result, Err(EpubError::NoChapters { .. })));
    }

    #[tokio::test]
    async fn test_toc_failure_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/book/42/toc/"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        assert!(fetch_toc(&client(), &server.uri(), "42").await.is_none());
    }

    #[tokio::test]
    async fn test_toc_tree_parses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/book/42/toc/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "label": "Part One",
                    "href": "part01.html",
                    "fragment": "",
                    "id": "part01",
                    "depth": 1,
                    "children": [
                        {"label": "Chapter 1", "href": "ch01.html", "fragment": "sec1",
                         "id": "ch01", "depth": 2, "children": []}
                    ]
                }
            ])))
            .mount(&server)
            .await;

        let toc = fetch_toc(&client(), &server.uri(), "42").await.unwrap();
        assert_eq!(toc.len(), 1);
        assert_eq!(toc[0].children.len(), 1);
        assert_eq!(toc[0].children[0].fragment, "sec1");
    }

    #[test]
    fn test_xhtml_name() {
        let chapter = ChapterMeta {
            filename: "ch01.html".to_string(),
            ..ChapterMeta::default()
        };
        assert_eq!(chapter.xhtml_name(), "ch01.xhtml");
    }

    #[test]
    fn test_is_cover_by_title() {
        let chapter = ChapterMeta {
            title: "Cover Page".to_string(),
            filename: "front.html".to_string(),
            ..ChapterMeta::default()
        };
        assert!(chapter.is_cover());
    }
}
