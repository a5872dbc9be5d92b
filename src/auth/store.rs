//! Cookie bundle persistence and live updates.
//!
//! The bundle is a flat JSON object of cookie name to value. The service
//! rotates its session tokens on nearly every response, so the store applies
//! `Set-Cookie` headers as they arrive and the download controller persists
//! the bundle on a cadence; a crash loses at most a few books' worth of
//! token freshness.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use crate::fsio;

/// Errors that can occur while loading or persisting the cookie bundle.
#[derive(Debug, thiserror::Error)]
pub enum CookieError {
    /// No cookie bundle on disk.
    #[error(
        "no credentials found at {path}: export cookies from a logged-in \
         browser session and save them as a JSON object of name to value"
    )]
    Missing {
        /// The path that was checked.
        path: PathBuf,
    },

    /// The bundle exists but is not a JSON object of strings.
    #[error("malformed cookie bundle at {path}: {source}")]
    Malformed {
        /// The offending file.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// I/O error reading or writing the bundle.
    #[error("cookie bundle I/O error at {path}: {source}")]
    Io {
        /// The file involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

struct Inner {
    cookies: BTreeMap<String, String>,
    updated_at: DateTime<Utc>,
}

/// Thread-safe cookie bundle.
///
/// Shared as `Arc<CookieStore>` between the HTTP client and both
/// controllers; all mutation goes through the internal mutex so concurrent
/// discovery workers never interleave partial updates.
pub struct CookieStore {
    inner: Mutex<Inner>,
}

// Custom Debug that never prints cookie values.
impl fmt::Debug for CookieStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("CookieStore")
            .field("names", &inner.cookies.keys().collect::<Vec<_>>())
            .field("updated_at", &inner.updated_at)
            .finish()
    }
}

impl CookieStore {
    /// Creates an empty store (used by tests and dry runs).
    #[must_use]
    pub fn empty() -> Self {
        Self {
            inner: Mutex::new(Inner {
                cookies: BTreeMap::new(),
                updated_at: Utc::now(),
            }),
        }
    }

    /// Loads the bundle from disk.
    ///
    /// # Errors
    ///
    /// Returns [`CookieError::Missing`] when the file does not exist and
    /// [`CookieError::Malformed`] when it is not a JSON string map. Both are
    /// configuration errors: the run cannot start without credentials.
    #[instrument(level = "debug")]
    pub fn load(path: &Path) -> Result<Self, CookieError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                return Err(CookieError::Missing {
                    path: path.to_path_buf(),
                });
            }
            Err(source) => {
                return Err(CookieError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let cookies: BTreeMap<String, String> =
            serde_json::from_str(&text).map_err(|source| CookieError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;

        debug!(count = cookies.len(), "loaded cookie bundle");
        Ok(Self {
            inner: Mutex::new(Inner {
                cookies,
                updated_at: Utc::now(),
            }),
        })
    }

    /// Persists the bundle atomically (temp file in the same directory, then
    /// rename), so a crash mid-write never corrupts the credentials.
    ///
    /// # Errors
    ///
    /// Returns [`CookieError::Io`] on write failure.
    #[instrument(level = "debug", skip(self))]
    pub fn persist(&self, path: &Path) -> Result<(), CookieError> {
        let snapshot = self.snapshot();
        fsio::write_json_atomic(path, &snapshot).map_err(|source| CookieError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(count = snapshot.len(), "persisted cookie bundle");
        Ok(())
    }

    /// Applies one `Set-Cookie` header value to the bundle.
    ///
    /// Only the leading `name=value` pair is used; attributes are tolerated
    /// but not stored. The service emits a non-standard fractional `Max-Age`
    /// (e.g. `Max-Age=3599.92`), which is accepted; a zero or negative
    /// `Max-Age` deletes the cookie. Anything unparseable is ignored.
    pub fn apply_set_cookie(&self, header: &str) {
        let mut segments = header.split(';');
        let Some(pair) = segments.next() else {
            return;
        };
        let Some((name, value)) = pair.split_once('=') else {
            debug!("ignoring Set-Cookie without name=value pair");
            return;
        };
        let name = name.trim();
        if name.is_empty() {
            debug!("ignoring Set-Cookie with empty name");
            return;
        }

        let mut expired = false;
        for attr in segments {
            if let Some((key, raw)) = attr.split_once('=')
                && key.trim().eq_ignore_ascii_case("max-age")
            {
                // Fractional values are non-standard but the service sends
                // them; parse as float so they are not silently dropped.
                match raw.trim().parse::<f64>() {
                    Ok(age) if age <= 0.0 => expired = true,
                    Ok(_) => {}
                    Err(_) => debug!(name, "unparseable Max-Age attribute, keeping cookie"),
                }
            }
        }

        let mut inner = self.lock();
        if expired {
            if inner.cookies.remove(name).is_some() {
                debug!(name, "removed expired cookie");
            }
        } else {
            inner.cookies.insert(name.to_string(), value.trim().to_string());
            debug!(name, "updated cookie");
        }
        inner.updated_at = Utc::now();
    }

    /// Renders the bundle as a single `Cookie` request header value.
    #[must_use]
    pub fn cookie_header(&self) -> String {
        let inner = self.lock();
        inner
            .cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Returns a copy of the current bundle.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.lock().cookies.clone()
    }

    /// Cookie names currently in the bundle (values are never exposed in bulk
    /// except through [`snapshot`](Self::snapshot) for persistence).
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.lock().cookies.keys().cloned().collect()
    }

    /// Number of cookies in the bundle.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().cookies.len()
    }

    /// Whether the bundle is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().cookies.is_empty()
    }

    /// Timestamp of the last mutation.
    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.lock().updated_at
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means another thread panicked mid-update; the
        // map itself is always in a consistent state.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for CookieStore {
    fn default() -> Self {
        Self::empty()
    }
}
