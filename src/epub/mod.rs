//! EPUB assembly for one book at a time.
//!
//! The builder owns an intermediate directory tree
//! (`<title> (<id>)/OEBPS/{Images,Styles}`) that is fully restartable:
//! re-running on the same tree only fetches what is missing. Packaging then
//! emits one `.epub` per requested variant from the same tree.

mod assets;
mod builder;
mod chapters;
mod content;
mod meta;
mod package;
mod writer;

pub use builder::EpubBuilder;
pub use chapters::{ChapterMeta, TocEntry};
pub use content::{ChapterExtract, RewriteContext, rewrite_link};
pub use meta::BookMeta;

use std::path::PathBuf;

use thiserror::Error;

use crate::client::FetchError;

/// Output variants. `Legacy` is an EPUB 2 package; `Enhanced` and `Kindle`
/// are EPUB 3 packages differing in stylesheet and packaging name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// EPUB 2 package shape, standard stylesheet.
    Legacy,
    /// EPUB 3 package shape, standard stylesheet.
    Enhanced,
    /// EPUB 3 package shape, Kindle-optimized stylesheet.
    Kindle,
}

impl Variant {
    /// Whether this variant emits the EPUB 3 package shape.
    #[must_use]
    pub fn epub3(self) -> bool {
        !matches!(self, Self::Legacy)
    }

    /// Whether this variant uses the Kindle stylesheet and filename suffix.
    #[must_use]
    pub fn is_kindle(self) -> bool {
        matches!(self, Self::Kindle)
    }

    /// The stylesheet filename written into `Styles/`.
    #[must_use]
    pub fn css_name(self) -> &'static str {
        if self.is_kindle() {
            "kindle-style.css"
        } else {
            "standard-style.css"
        }
    }
}

/// Maps the CLI `--format` value to the variants to build.
#[must_use]
pub fn variants_for_format(format: &str) -> Vec<Variant> {
    match format.to_lowercase().as_str() {
        "legacy" => vec![Variant::Legacy],
        "kindle" => vec![Variant::Kindle],
        "dual" => vec![Variant::Enhanced, Variant::Kindle],
        _ => vec![Variant::Enhanced],
    }
}

/// Errors that abort a single book's assembly.
///
/// Asset-level failures (one chapter, one stylesheet, one image) are not
/// errors: they are logged and the book proceeds with best-effort content.
#[derive(Debug, Error)]
pub enum EpubError {
    /// Transport failure on a required document (metadata, chapter index).
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The API answered with its single-key error shape.
    #[error("API error for book {book_id}: {detail}")]
    Api {
        /// The book involved.
        book_id: String,
        /// The `detail` string the service returned.
        detail: String,
    },

    /// The chapter index came back empty.
    #[error("no chapters returned for book {book_id}")]
    NoChapters {
        /// The book involved.
        book_id: String,
    },

    /// A chapter document had no recognizable content container.
    #[error("content container not found in chapter {chapter}")]
    ContentMissing {
        /// The chapter filename.
        chapter: String,
    },

    /// Filesystem failure in the working tree.
    #[error("IO error at {path}: {source}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// ZIP-level packaging failure.
    #[error("failed to package {path}: {detail}")]
    Packaging {
        /// The archive being written.
        path: PathBuf,
        /// What went wrong.
        detail: String,
    },

    /// The run was cancelled between chapters.
    #[error("cancelled while building book {book_id}")]
    Cancelled {
        /// The book involved.
        book_id: String,
    },
}

impl EpubError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variants_for_format() {
        assert_eq!(variants_for_format("legacy"), vec![Variant::Legacy]);
        assert_eq!(variants_for_format("enhanced"), vec![Variant::Enhanced]);
        assert_eq!(variants_for_format("kindle"), vec![Variant::Kindle]);
        assert_eq!(
            variants_for_format("dual"),
            vec![Variant::Enhanced, Variant::Kindle]
        );
        assert_eq!(variants_for_format("DUAL").len(), 2);
        // Unknown values fall back to the enhanced package
        assert_eq!(variants_for_format("other"), vec![Variant::Enhanced]);
    }

    #[test]
    fn test_variant_properties() {
        assert!(!Variant::Legacy.epub3());
        assert!(Variant::Enhanced.epub3());
        assert!(Variant::Kindle.epub3());
        assert!(Variant::Kindle.is_kindle());
        assert_eq!(Variant::Kindle.css_name(), "kindle-style.css");
        assert_eq!(Variant::Enhanced.css_name(), "standard-style.css");
    }
}
