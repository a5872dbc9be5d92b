//! Search adapter over the platform's two catalog endpoints.
//!
//! The platform exposes a v1 search (`/api/v1/search`, one-indexed pages)
//! and a v2 search (`/api/v2/search/`, zero-indexed pages with a `next`
//! link and a `total` hint). The adapter hides the differences behind one
//! `fetch_page` operation that always takes one-indexed pages.

mod filter;
mod variants;

pub use filter::{BookRecord, FilterConfig, FilterPipeline, RejectReason, TopicTarget};
pub use variants::{mechanical_variants, topic_candidates};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::client::{ApiClient, FetchError};

/// Which generation of the search endpoint to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchApi {
    /// `/api/v1/search?q=...&page=...&rows=...` (one-indexed pages).
    V1,
    /// `/api/v2/search/?query=*&topics=...&limit=...&page=...` (zero-indexed).
    V2,
}

/// A subject/topic tag as the search API returns it: either a bare string or
/// an object with a `name` field, depending on the endpoint generation.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SubjectRef {
    /// Plain string form.
    Name(String),
    /// Object form.
    Object {
        /// The tag name.
        name: String,
    },
}

impl SubjectRef {
    /// The tag name regardless of wire shape.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) | Self::Object { name } => name,
        }
    }
}

/// One raw item from a search results page, before filtering.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawSearchItem {
    /// Opaque archive identifier (v2).
    pub archive_id: Option<String>,
    /// ISBN-like identifier, when present.
    pub isbn: Option<String>,
    /// Platform resource name fallback identifier.
    pub ourn: Option<String>,
    /// Display title.
    pub title: String,
    /// Content format tag ("book", "video", ...).
    pub format: String,
    /// Alternate format field some responses carry instead.
    pub content_format: String,
    /// Language tag ("en", "en-US", "fr", or empty).
    pub language: String,
    /// Subject tags (v1 shape).
    pub subjects: Vec<SubjectRef>,
    /// Topic tags (v2 shape).
    pub topics: Vec<SubjectRef>,
    /// Canonical reference URL.
    pub url: Option<String>,
}

impl RawSearchItem {
    /// Whether the item carries a usable ISBN (not empty, not a null marker).
    #[must_use]
    pub fn has_isbn(&self) -> bool {
        self.isbn.as_deref().is_some_and(|isbn| {
            let trimmed = isbn.trim();
            !trimmed.is_empty() && !matches!(trimmed.to_lowercase().as_str(), "n/a" | "none" | "null")
        })
    }

    /// The stable identifier used downstream: an ISBN-like digit string when
    /// available, else the archive id, else the platform resource name.
    #[must_use]
    pub fn stable_id(&self) -> Option<String> {
        if self.has_isbn()
            && let Some(isbn) = self.isbn.as_deref()
            && isbn.trim().chars().all(|c| c.is_ascii_digit())
        {
            return Some(isbn.trim().to_string());
        }
        if let Some(archive_id) = self.archive_id.as_deref()
            && !archive_id.trim().is_empty()
        {
            return Some(archive_id.trim().to_string());
        }
        if self.has_isbn()
            && let Some(isbn) = self.isbn.as_deref()
        {
            return Some(isbn.trim().to_string());
        }
        self.ourn
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
    }

    /// All declared subject/topic names.
    #[must_use]
    pub fn tag_names(&self) -> Vec<&str> {
        self.subjects
            .iter()
            .chain(self.topics.iter())
            .map(SubjectRef::name)
            .collect()
    }
}

/// One page of normalized search results.
#[derive(Debug, Clone)]
pub struct SearchPage {
    /// Raw items to run through the filter pipeline.
    pub items: Vec<RawSearchItem>,
    /// Whether the endpoint advertises a further page.
    pub has_next: bool,
    /// Total result count hint, when the endpoint provides one.
    pub total_hint: Option<u64>,
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    results: Vec<RawSearchItem>,
    #[serde(default)]
    next: Option<serde_json::Value>,
    #[serde(default)]
    total: Option<u64>,
}

/// Adapter translating `(topic, page)` pairs into catalog requests.
#[derive(Debug, Clone)]
pub struct SearchAdapter {
    client: Arc<ApiClient>,
    base_url: String,
    api: SearchApi,
}

impl SearchAdapter {
    /// Creates an adapter for the given endpoint generation.
    #[must_use]
    pub fn new(client: Arc<ApiClient>, base_url: impl Into<String>, api: SearchApi) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api,
        }
    }

    /// Fetches one page of results for a topic.
    ///
    /// `page` is always one-indexed; the adapter converts for the
    /// zero-indexed v2 endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Status`] with the original code on 404 (topic
    /// unknown - permanent), 429 and 5xx (transient - callers back off).
    #[instrument(level = "debug", skip(self))]
    pub async fn fetch_page(
        &self,
        topic: &str,
        page: u32,
        page_size: u32,
    ) -> Result<SearchPage, FetchError> {
        debug_assert!(page >= 1, "pages are one-indexed at the adapter boundary");
        let url = self.page_url(topic, page, page_size);
        let wire: WireResponse = self.client.get_json(&url).await?;

        let has_next = match self.api {
            SearchApi::V2 => wire.next.as_ref().is_some_and(|v| !v.is_null()),
            SearchApi::V1 => match (wire.total, wire.next.as_ref()) {
                // Some v1 deployments carry a next link too; trust it first.
                (_, Some(next)) if !next.is_null() => true,
                (Some(total), _) => u64::from(page) * u64::from(page_size) < total,
                (None, _) => wire.results.len() as u64 == u64::from(page_size),
            },
        };

        debug!(
            topic,
            page,
            items = wire.results.len(),
            has_next,
            "fetched search page"
        );

        Ok(SearchPage {
            items: wire.results,
            has_next,
            total_hint: wire.total,
        })
    }

    fn page_url(&self, topic: &str, page: u32, page_size: u32) -> String {
        let encoded = urlencoding::encode(topic);
        match self.api {
            SearchApi::V1 => format!(
                "{}/api/v1/search?q={encoded}&page={page}&rows={page_size}",
                self.base_url
            ),
            SearchApi::V2 => format!(
                "{}/api/v2/search/?query=*&topics={encoded}&limit={page_size}&page={}",
                self.base_url,
                page - 1
            ),
        }
    }
}
