//! Book metadata: fetch, normalize, persist.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::EpubError;
use crate::client::ApiClient;
use crate::fsio;

/// Normalized book metadata. Missing catalog fields default to `n/a`; the
/// ISBN defaults to the book identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookMeta {
    /// The platform book identifier.
    pub book_id: String,
    /// Display title.
    pub title: String,
    /// Author names in catalog order.
    pub authors: Vec<String>,
    /// Publisher names joined with `, `.
    pub publisher: String,
    /// ISBN, falling back to the identifier.
    pub isbn: String,
    /// Description with markup stripped.
    pub description: String,
    /// Subject names.
    pub subjects: Vec<String>,
    /// Rights statement.
    pub rights: String,
    /// Issue date as the catalog reports it.
    pub issued: String,
    /// Cover image URL, when the catalog carries one.
    pub cover_url: Option<String>,
    /// Public web URL of the book.
    pub web_url: String,
}

impl BookMeta {
    /// Authors joined with `, ` for filenames and navigation documents.
    #[must_use]
    pub fn authors_joined(&self) -> String {
        if self.authors.is_empty() {
            "n/a".to_string()
        } else {
            self.authors.join(", ")
        }
    }
}

/// Fetches and normalizes the metadata document for `book_id`.
///
/// # Errors
///
/// Returns [`EpubError::Api`] when the service answers with its single-key
/// error shape (book unknown or session expired), and [`EpubError::Fetch`]
/// on transport failure. Both abort the book.
#[instrument(level = "debug", skip(client))]
pub async fn fetch_metadata(
    client: &Arc<ApiClient>,
    base_url: &str,
    book_id: &str,
) -> Result<BookMeta, EpubError> {
    let url = format!("{base_url}/api/v1/book/{book_id}/");
    let value: serde_json::Value = client.get_json(&url).await?;

    // A bare {"detail": "..."} body is the service's error envelope.
    if let Some(object) = value.as_object()
        && object.len() == 1
        && let Some(detail) = object.get("detail")
    {
        return Err(EpubError::Api {
            book_id: book_id.to_string(),
            detail: detail.as_str().unwrap_or("unknown error").to_string(),
        });
    }

    let meta = normalize(book_id, &value);
    debug!(title = %meta.title, authors = meta.authors.len(), "fetched metadata");
    Ok(meta)
}

/// Normalizes a raw metadata document.
#[must_use]
pub fn normalize(book_id: &str, value: &serde_json::Value) -> BookMeta {
    let text = |key: &str| -> String {
        value
            .get(key)
            .and_then(serde_json::Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or("n/a")
            .to_string()
    };

    let names = |key: &str| -> Vec<String> {
        value
            .get(key)
            .and_then(serde_json::Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        entry
                            .get("name")
                            .and_then(serde_json::Value::as_str)
                            .or_else(|| entry.as_str())
                    })
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };

    let isbn = value
        .get("isbn")
        .and_then(serde_json::Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(book_id)
        .to_string();

    let publishers = names("publishers");
    let publisher = if publishers.is_empty() {
        "n/a".to_string()
    } else {
        publishers.join(", ")
    };

    let cover_url = value
        .get("cover")
        .and_then(serde_json::Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(ToString::to_string);

    BookMeta {
        book_id: book_id.to_string(),
        title: text("title"),
        authors: names("authors"),
        publisher,
        isbn,
        description: strip_markup(&text("description")),
        subjects: names("subjects"),
        rights: text("rights"),
        issued: text("issued"),
        cover_url,
        web_url: text("web_url"),
    }
}

/// Persists the normalized metadata next to the working tree so a resumed
/// build does not refetch it just to name files.
///
/// # Errors
///
/// Returns [`EpubError::Io`] on write failure.
pub fn save_metadata(meta: &BookMeta, book_dir: &Path) -> Result<(), EpubError> {
    let path = book_dir.join("metadata.json");
    fsio::write_json_atomic(&path, meta).map_err(|source| EpubError::io(path, source))
}

/// Loads previously saved metadata from a working tree.
#[must_use]
pub fn load_metadata(book_dir: &Path) -> Option<BookMeta> {
    let text = std::fs::read_to_string(book_dir.join("metadata.json")).ok()?;
    serde_json::from_str(&text).ok()
}

/// Drops markup tags and collapses whitespace in a description string.
fn strip_markup(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for ch in input.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> serde_json::Value {
        serde_json::json!({
            "title": "Fluent Python",
            "authors": [{"name": "Luciano Ramalho"}],
            "publishers": [{"name": "O'Reilly Media, Inc."}],
            "isbn": "9781492056348",
            "description": "<p>A <b>hands-on</b> guide.</p>",
            "subjects": [{"name": "Python"}],
            "rights": "Copyright Luciano Ramalho",
            "issued": "2022-03-31",
            "cover": "https://example.com/covers/fluent.jpg",
            "web_url": "https://example.com/library/view/fluent-python/9781492056348/"
        })
    }

    #[test]
    fn test_normalize_full_document() {
        let meta = normalize("9781492056348", &sample());
        assert_eq!(meta.title, "Fluent Python");
        assert_eq!(meta.authors, vec!["Luciano Ramalho"]);
        assert_eq!(meta.publisher, "O'Reilly Media, Inc.");
        assert_eq!(meta.isbn, "9781492056348");
        assert_eq!(meta.description, "A hands-on guide.");
        assert_eq!(meta.subjects, vec!["Python"]);
        assert_eq!(meta.cover_url.as_deref(), Some("https://example.com/covers/fluent.jpg"));
    }

    #[test]
    fn test_normalize_missing_fields_default_to_na() {
        let meta = normalize("12345", &serde_json::json!({}));
        assert_eq!(meta.title, "n/a");
        assert_eq!(meta.publisher, "n/a");
        assert_eq!(meta.rights, "n/a");
        assert_eq!(meta.issued, "n/a");
        assert!(meta.authors.is_empty());
        assert!(meta.cover_url.is_none());
    }

    #[test]
    fn test_normalize_isbn_defaults_to_book_id() {
        let meta = normalize("12345", &serde_json::json!({"title": "T"}));
        assert_eq!(meta.isbn, "12345");
    }

    #[test]
    fn test_normalize_accepts_plain_string_authors() {
        let meta = normalize(
            "1",
            &serde_json::json!({"authors": ["Jane Doe", {"name": "John Roe"}]}),
        );
        assert_eq!(meta.authors, vec!["Jane Doe", "John Roe"]);
    }

    #[test]
    fn test_authors_joined_empty_is_na() {
        let meta = normalize("1", &serde_json::json!({}));
        assert_eq!(meta.authors_joined(), "n/a");
    }

    #[test]
    fn test_strip_markup() {
        assert_eq!(strip_markup("<p>Hello <b>world</b></p>"), "Hello world");
        assert_eq!(strip_markup("plain text"), "plain text");
        assert_eq!(strip_markup("a\n\n  b"), "a b");
    }

    #[test]
    fn test_save_and_load_metadata() {
        let dir = tempfile::TempDir::new().unwrap();
        let meta = normalize("9781492056348", &sample());
        save_metadata(&meta, dir.path()).unwrap();

        let loaded = load_metadata(dir.path()).unwrap();
        assert_eq!(loaded.title, meta.title);
        assert_eq!(loaded.isbn, meta.isbn);
    }
}
