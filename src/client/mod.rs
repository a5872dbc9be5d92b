//! Authenticated HTTP client for the e-book platform.
//!
//! One logical session backs the whole run: every request shares the same
//! cookie bundle and default headers, and every response's `Set-Cookie`
//! headers are fed back into the [`CookieStore`](crate::auth::CookieStore)
//! before the next request goes out. The service aggressively revokes tokens
//! when it sees several fresh sessions racing, so components receive a
//! shared `Arc<ApiClient>` and never build their own.

mod error;
mod retry;

pub use error::FetchError;
pub use retry::{DEFAULT_MAX_RETRIES, Failure, RetryDecision, RetryPolicy, classify_error};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, COOKIE, RETRY_AFTER, SET_COOKIE};
use reqwest::{Client, redirect};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use crate::auth::CookieStore;

/// Browser-like User-Agent sent on every request.
///
/// The platform serves different (and sometimes broken) content to clients
/// that identify as tools, so the session presents as a desktop browser.
pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/141.0.0.0 Safari/537.36";

const ACCEPT_HEADER: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,application/json;q=0.9,image/webp,*/*;q=0.8";

/// Result of probing the authenticated profile page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStatus {
    /// Session cookies are accepted.
    Valid,
    /// The service redirected to a login page: cookies are stale or missing.
    LoggedOut,
    /// The account is recognized but the subscription has lapsed.
    Expired,
}

/// HTTP client bound to a shared cookie store.
///
/// Cloning is cheap; all clones share the same connection pool and cookie
/// bundle.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    http_no_redirect: Client,
    cookies: Arc<CookieStore>,
}

impl ApiClient {
    /// Creates a client with the given timeouts over a shared cookie store.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new(cookies: Arc<CookieStore>, connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        let base = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .timeout(Duration::from_secs(read_timeout_secs))
            .gzip(true)
            .user_agent(USER_AGENT);

        let http = base
            .build()
            .expect("failed to build HTTP client with static configuration");

        // Redirects must stay observable for the auth probe: a 302 to the
        // login page is the signal that the session is dead.
        let http_no_redirect = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .timeout(Duration::from_secs(read_timeout_secs))
            .gzip(true)
            .user_agent(USER_AGENT)
            .redirect(redirect::Policy::none())
            .build()
            .expect("failed to build HTTP client with static configuration");

        Self {
            http,
            http_no_redirect,
            cookies,
        }
    }

    /// Returns the shared cookie store.
    #[must_use]
    pub fn cookies(&self) -> &Arc<CookieStore> {
        &self.cookies
    }

    /// Issues an authenticated GET and returns the raw response.
    ///
    /// All `Set-Cookie` headers are applied to the cookie store before the
    /// response is handed back; non-success statuses become
    /// [`FetchError::Status`].
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on network failure, timeout or error status.
    #[instrument(level = "debug", skip(self))]
    pub async fn get(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        self.get_inner(&self.http, url).await
    }

    /// Fetches a URL and deserializes the JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Decode`] when the body is not valid JSON for
    /// `T`, in addition to the transport errors of [`get`](Self::get).
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let response = self.get(url).await?;
        let text = response
            .text()
            .await
            .map_err(|source| FetchError::network(url, source))?;
        serde_json::from_str(&text).map_err(|source| FetchError::decode(url, source))
    }

    /// Fetches a URL and returns the body as text.
    ///
    /// # Errors
    ///
    /// Returns the transport errors of [`get`](Self::get).
    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let response = self.get(url).await?;
        response
            .text()
            .await
            .map_err(|source| FetchError::network(url, source))
    }

    /// Fetches a URL and returns the body as bytes.
    ///
    /// # Errors
    ///
    /// Returns the transport errors of [`get`](Self::get).
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.get(url).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|source| FetchError::network(url, source))?;
        Ok(bytes.to_vec())
    }

    /// Streams a binary payload to `path`.
    ///
    /// Partial files are removed on stream failure so a retry starts clean.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Io`] on filesystem failure in addition to the
    /// transport errors of [`get`](Self::get).
    #[instrument(level = "debug", skip(self))]
    pub async fn download_to_file(&self, url: &str, path: &Path) -> Result<u64, FetchError> {
        let response = self.get(url).await?;

        let file = tokio::fs::File::create(path)
            .await
            .map_err(|source| FetchError::io(path, source))?;
        let mut writer = tokio::io::BufWriter::new(file);
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        use tokio::io::AsyncWriteExt;
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(source) => {
                    drop(writer);
                    let _ = tokio::fs::remove_file(path).await;
                    return Err(FetchError::network(url, source));
                }
            };
            if let Err(source) = writer.write_all(&chunk).await {
                drop(writer);
                let _ = tokio::fs::remove_file(path).await;
                return Err(FetchError::io(path, source));
            }
            written += chunk.len() as u64;
        }

        writer
            .flush()
            .await
            .map_err(|source| FetchError::io(path, source))?;
        debug!(bytes = written, path = %path.display(), "download complete");
        Ok(written)
    }

    /// Probes the profile page without following redirects and classifies the
    /// session state.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] when the probe itself cannot be issued.
    #[instrument(level = "debug", skip(self))]
    pub async fn check_auth(&self, profile_url: &str) -> Result<AuthStatus, FetchError> {
        let request = self
            .http_no_redirect
            .get(profile_url)
            .header(ACCEPT, ACCEPT_HEADER)
            .header(COOKIE, self.cookies.cookie_header());

        let response = request.send().await.map_err(|source| {
            if source.is_timeout() {
                FetchError::timeout(profile_url)
            } else {
                FetchError::network(profile_url, source)
            }
        })?;

        self.absorb_cookies(&response);

        let status = response.status();
        if status.is_redirection() {
            return Ok(AuthStatus::LoggedOut);
        }
        if !status.is_success() {
            return Err(FetchError::status(profile_url, status.as_u16(), None));
        }

        let body = response
            .text()
            .await
            .map_err(|source| FetchError::network(profile_url, source))?;
        if body.contains("\"user_type\":\"Expired\"") {
            warn!("account subscription is expired");
            return Ok(AuthStatus::Expired);
        }
        Ok(AuthStatus::Valid)
    }

    async fn get_inner(
        &self,
        client: &Client,
        url: &str,
    ) -> Result<reqwest::Response, FetchError> {
        if url::Url::parse(url).is_err() {
            return Err(FetchError::invalid_url(url));
        }

        let response = client
            .get(url)
            .header(ACCEPT, ACCEPT_HEADER)
            .header(COOKIE, self.cookies.cookie_header())
            .send()
            .await
            .map_err(|source| {
                if source.is_timeout() {
                    FetchError::timeout(url)
                } else {
                    FetchError::network(url, source)
                }
            })?;

        self.absorb_cookies(&response);

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string);
            return Err(FetchError::status(url, status.as_u16(), retry_after));
        }

        Ok(response)
    }

    /// Feeds every `Set-Cookie` header of `response` to the store, exactly
    /// once per response.
    fn absorb_cookies(&self, response: &reqwest::Response) {
        for value in response.headers().get_all(SET_COOKIE) {
            if let Ok(header) = value.to_str() {
                self.cookies.apply_set_cookie(header);
            } else {
                debug!("skipping non-UTF8 Set-Cookie header");
            }
        }
    }
}
