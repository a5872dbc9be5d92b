//! The ordered validation pipeline that decides whether a raw search item is
//! a keepable book.
//!
//! The catalog mixes real books with videos, courses, loose chapters and
//! other fragments under the same topic index. Each stage rejects one class
//! of noise; an item that survives every stage leaves as a [`BookRecord`]
//! with a non-empty identifier and a title of minimum length. The pipeline
//! is pure: the same input always produces the same verdict.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{RawSearchItem, variants::mechanical_variants};

/// Numbered sub-unit markers: "chapter 3:", "part iv:", "section 12:", ...
#[allow(clippy::unwrap_used)]
static SUBUNIT_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(chapter|part|section|lesson|unit)\s+(\d+|[ivxlc]+)\s*:").unwrap()
});

/// Titles rejected outright when they are nothing but a front/back-matter
/// unit name.
const UNIT_TITLES: &[&str] = &[
    "appendix",
    "glossary",
    "index",
    "bibliography",
    "preface",
    "foreword",
    "introduction",
    "conclusion",
    "summary",
    "wrap-up",
    "closing thoughts",
    "acknowledgments",
];

/// Title prefixes that mark a sub-unit rather than a book.
const UNIT_PREFIXES: &[&str] = &["chapter ", "section ", "lesson ", "unit ", "module "];

/// Keywords that disqualify an item without an ISBN from being kept.
const NON_BOOK_KEYWORDS: &[&str] = &[
    "chapter",
    "part",
    "section",
    "lesson",
    "unit",
    "module",
    "video",
    "course",
    "tutorial",
    "workshop",
    "webinar",
    "audiobook",
    "exam ref",
    "certification",
    "study guide",
    "practice test",
];

/// Why an item was dropped, tagged by the stage that dropped it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RejectReason {
    /// Stage 1: format tag is video/course/audiobook.
    Format,
    /// Stage 2: non-English language tag.
    Language,
    /// Stage 3: title too short.
    ShortTitle,
    /// Stage 4: chapter/section-like title.
    ChapterLike,
    /// Stage 5: numeric-only or trivially numbered title.
    NumericTitle,
    /// Stage 6: no ISBN and the title does not look like a book.
    NoIsbn,
    /// Stage 7: declared topics do not mention the target skill.
    TopicMismatch,
    /// Stage 8: identifier already kept for this topic.
    Duplicate,
    /// No usable identifier at all.
    NoIdentifier,
}

impl RejectReason {
    /// Stable label used in events and counters.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Format => "format",
            Self::Language => "language",
            Self::ShortTitle => "short_title",
            Self::ChapterLike => "chapter_like",
            Self::NumericTitle => "numeric_title",
            Self::NoIsbn => "no_isbn",
            Self::TopicMismatch => "topic_mismatch",
            Self::Duplicate => "duplicate",
            Self::NoIdentifier => "no_identifier",
        }
    }
}

/// A book that survived the pipeline. This is the record written into the
/// per-skill result files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookRecord {
    /// Display title.
    pub title: String,
    /// Stable identifier (ISBN-like digit string when available).
    pub id: String,
    /// Canonical reference URL.
    pub url: String,
    /// ISBN, falling back to the identifier when the catalog has none.
    pub isbn: String,
    /// Format tag as reported by the catalog.
    pub format: String,
}

/// The skill a discovery pass is matching against.
#[derive(Debug, Clone)]
pub struct TopicTarget {
    needles: Vec<String>,
}

impl TopicTarget {
    /// Builds the match target from a skill name: the name itself plus its
    /// mechanical separator variants, lower-cased.
    #[must_use]
    pub fn new(skill_name: &str) -> Self {
        let mut needles = vec![skill_name.to_lowercase()];
        for variant in mechanical_variants(skill_name) {
            let lowered = variant.to_lowercase();
            if !needles.contains(&lowered) {
                needles.push(lowered);
            }
        }
        Self { needles }
    }

    fn matches_tag(&self, tag: &str) -> bool {
        let tag = tag.to_lowercase();
        self.needles.iter().any(|needle| tag.contains(needle))
    }
}

/// Pipeline thresholds and mode.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Strict mode enables the topic-match stage.
    pub strict: bool,
    /// Titles shorter than this need an ISBN to survive stage 3.
    pub short_title_min: usize,
    /// Titles without any ISBN must be at least this long (stage 6).
    pub no_isbn_title_min: usize,
    /// Base URL used for the fallback reference URL of kept records.
    pub base_url: String,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            strict: true,
            short_title_min: 10,
            no_isbn_title_min: 15,
            base_url: "https://learning.oreilly.com".to_string(),
        }
    }
}

/// The ordered filter pipeline.
#[derive(Debug, Clone)]
pub struct FilterPipeline {
    config: FilterConfig,
}

impl FilterPipeline {
    /// Creates a pipeline with the given thresholds.
    #[must_use]
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    /// Runs one item through every stage.
    ///
    /// `seen` holds the identifiers already kept for the current topic; the
    /// caller inserts the returned record's id after accepting it.
    ///
    /// # Errors
    ///
    /// Returns the [`RejectReason`] of the first stage that dropped the item.
    pub fn check(
        &self,
        item: &RawSearchItem,
        target: &TopicTarget,
        seen: &HashSet<String>,
    ) -> Result<BookRecord, RejectReason> {
        let title = item.title.trim();
        let title_lower = title.to_lowercase();

        // Stage 1: format
        let format = item.format.to_lowercase();
        let content_format = item.content_format.to_lowercase();
        let format_ok = |f: &str| matches!(f, "book" | "ebook" | "");
        if !format_ok(&format) && !format_ok(&content_format) {
            return Err(RejectReason::Format);
        }

        // Stage 2: language (empty or en*)
        let language = item.language.to_lowercase();
        if !(language.is_empty() || language.starts_with("en")) {
            return Err(RejectReason::Language);
        }

        // Stage 3: title minimum length
        if title.len() < 5 {
            return Err(RejectReason::ShortTitle);
        }
        if title.len() < self.config.short_title_min && !item.has_isbn() {
            return Err(RejectReason::ShortTitle);
        }

        // Stage 4: chapter-like title
        if SUBUNIT_MARKER.is_match(&title_lower)
            || UNIT_TITLES.contains(&title_lower.as_str())
            || UNIT_PREFIXES.iter().any(|p| title_lower.starts_with(p))
        {
            return Err(RejectReason::ChapterLike);
        }

        // Stage 5: numeric-only / trivially numbered. Any digit-led title of
        // three words or fewer is a numbered fragment ("1. Introduction",
        // "20 Tips"), with or without the period.
        if title.len() <= 5 && title.chars().all(|c| c.is_ascii_digit()) {
            return Err(RejectReason::NumericTitle);
        }
        if title.starts_with(|c: char| c.is_ascii_digit())
            && title.split_whitespace().count() <= 3
        {
            return Err(RejectReason::NumericTitle);
        }

        // Stage 6: ISBN present, or title long enough to be a book
        if !item.has_isbn() {
            let keyword_hit = NON_BOOK_KEYWORDS
                .iter()
                .any(|keyword| title_lower.contains(keyword));
            if keyword_hit || title.len() < self.config.no_isbn_title_min {
                return Err(RejectReason::NoIsbn);
            }
        }

        // Stage 7: topic match (strict mode only, and only when the item
        // declares any tags at all)
        if self.config.strict {
            let tags = item.tag_names();
            if !tags.is_empty() && !tags.iter().any(|tag| target.matches_tag(tag)) {
                return Err(RejectReason::TopicMismatch);
            }
        }

        let id = item.stable_id().ok_or(RejectReason::NoIdentifier)?;

        // Stage 8: duplicate within this topic's accumulator
        if seen.contains(&id) {
            return Err(RejectReason::Duplicate);
        }

        let isbn = if item.has_isbn() {
            item.isbn.as_deref().unwrap_or(&id).trim().to_string()
        } else {
            id.clone()
        };
        let url = item
            .url
            .clone()
            .unwrap_or_else(|| format!("{}/api/v1/book/{id}/", self.config.base_url));

        Ok(BookRecord {
            title: title.to_string(),
            id,
            url,
            isbn,
            format: if item.format.is_empty() {
                "book".to_string()
            } else {
                item.format.clone()
            },
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn pipeline(strict: bool) -> FilterPipeline {
        FilterPipeline::new(FilterConfig {
            strict,
            ..FilterConfig::default()
        })
    }

    fn target() -> TopicTarget {
        TopicTarget::new("Machine Learning")
    }

    fn book(title: &str) -> RawSearchItem {
        serde_json::from_value(serde_json::json!({
            "archive_id": "arch-1",
            "isbn": "9781492052593",
            "title": title,
            "format": "book",
            "language": "en",
        }))
        .unwrap()
    }

    fn check(item: &RawSearchItem) -> Result<BookRecord, RejectReason> {
        pipeline(false).check(item, &target(), &HashSet::new())
    }

    #[test]
    fn test_keeps_a_plain_book() {
        let record = check(&book("Hands-On Machine Learning")).unwrap();
        assert_eq!(record.id, "9781492052593");
        assert_eq!(record.isbn, "9781492052593");
        assert!(record.title.len() >= 5);
    }

    #[test]
    fn test_stage1_rejects_videos_courses_audiobooks() {
        for format in ["video", "course", "audiobook"] {
            let mut item = book("Some Valid Long Title");
            item.format = format.to_string();
            item.content_format = format.to_string();
            assert_eq!(check(&item).unwrap_err(), RejectReason::Format, "{format}");
        }
    }

    #[test]
    fn test_stage1_empty_format_kept() {
        let mut item = book("Some Valid Long Title");
        item.format = String::new();
        assert!(check(&item).is_ok());
    }

    #[test]
    fn test_stage2_language_boundaries() {
        let mut item = book("Some Valid Long Title");
        item.language = String::new();
        assert!(check(&item).is_ok(), "empty language is kept");

        item.language = "en-US".to_string();
        assert!(check(&item).is_ok(), "en-US is kept");

        item.language = "fr".to_string();
        assert_eq!(check(&item).unwrap_err(), RejectReason::Language);
    }

    #[test]
    fn test_stage3_very_short_title_rejected_even_with_isbn() {
        assert_eq!(check(&book("Git")).unwrap_err(), RejectReason::ShortTitle);
    }

    #[test]
    fn test_stage3_short_title_without_isbn_rejected() {
        let mut item = book("Short one");
        item.isbn = None;
        assert!(item.title.len() < 10);
        assert_eq!(check(&item).unwrap_err(), RejectReason::ShortTitle);
    }

    #[test]
    fn test_stage3_short_title_with_isbn_kept() {
        // >= 5 chars and a valid ISBN survives the length stages
        let item = book("K8s Ops");
        assert!(check(&item).is_ok());
    }

    #[test]
    fn test_stage4_rejects_numbered_chapter() {
        let item = book("Chapter 3: The Compiler");
        assert_eq!(check(&item).unwrap_err(), RejectReason::ChapterLike);
    }

    #[test]
    fn test_stage4_rejects_roman_numeral_part() {
        let item = book("Part IV: Advanced Topics");
        assert_eq!(check(&item).unwrap_err(), RejectReason::ChapterLike);
    }

    #[test]
    fn test_stage4_rejects_exact_unit_titles() {
        for title in ["Appendix", "Glossary", "Index", "Preface", "Foreword", "Conclusion"] {
            assert_eq!(
                check(&book(title)).unwrap_err(),
                RejectReason::ChapterLike,
                "{title}"
            );
        }
    }

    #[test]
    fn test_stage4_unit_word_inside_real_title_kept() {
        // "Introduction" as an exact title is a chapter; inside a longer
        // title it is a book.
        assert!(check(&book("An Introduction to Statistical Learning")).is_ok());
    }

    #[test]
    fn test_stage4_rejects_starts_with_unit_prefix() {
        for title in ["Chapter One Basics", "Lesson 2 Variables", "Module 7 Review"] {
            assert_eq!(
                check(&book(title)).unwrap_err(),
                RejectReason::ChapterLike,
                "{title}"
            );
        }
    }

    #[test]
    fn test_stage5_rejects_numbered_item() {
        let item = book("1. Introduction");
        assert_eq!(check(&item).unwrap_err(), RejectReason::NumericTitle);
    }

    #[test]
    fn test_stage5_rejects_short_digit_led_titles_without_period() {
        for title in ["20 Tips", "2022 Report", "3 Little Pigs."] {
            assert_eq!(
                check(&book(title)).unwrap_err(),
                RejectReason::NumericTitle,
                "{title}"
            );
        }
    }

    #[test]
    fn test_stage5_keeps_titles_leading_with_a_number() {
        // Longer numbered titles are real books
        assert!(check(&book("97 Things Every Programmer Should Know")).is_ok());
    }

    #[test]
    fn test_stage6_no_isbn_long_title_kept() {
        let mut item = book("Designing Data-Intensive Applications");
        item.isbn = None;
        let record = check(&item).unwrap();
        // ISBN falls back to the identifier
        assert_eq!(record.isbn, record.id);
    }

    #[test]
    fn test_stage6_no_isbn_keyword_rejected() {
        let mut item = book("Advanced Video Masterclass Collection");
        item.isbn = None;
        assert_eq!(check(&item).unwrap_err(), RejectReason::NoIsbn);
    }

    #[test]
    fn test_stage7_topic_mismatch_in_strict_mode() {
        let mut item = book("Gardening for Beginners and Experts");
        item.topics = vec![super::super::SubjectRef::Name("Gardening".to_string())];
        let result = pipeline(true).check(&item, &target(), &HashSet::new());
        assert_eq!(result.unwrap_err(), RejectReason::TopicMismatch);
    }

    #[test]
    fn test_stage7_topic_match_passes() {
        let mut item = book("Hands-On Machine Learning");
        item.topics = vec![super::super::SubjectRef::Object {
            name: "Machine Learning".to_string(),
        }];
        assert!(pipeline(true).check(&item, &target(), &HashSet::new()).is_ok());
    }

    #[test]
    fn test_stage7_skipped_without_declared_tags() {
        let item = book("Hands-On Machine Learning");
        assert!(item.tag_names().is_empty());
        assert!(pipeline(true).check(&item, &target(), &HashSet::new()).is_ok());
    }

    #[test]
    fn test_stage7_skipped_in_lenient_mode() {
        let mut item = book("Gardening for Beginners and Experts");
        item.topics = vec![super::super::SubjectRef::Name("Gardening".to_string())];
        assert!(pipeline(false).check(&item, &target(), &HashSet::new()).is_ok());
    }

    #[test]
    fn test_stage8_duplicate_rejected() {
        let item = book("Hands-On Machine Learning");
        let mut seen = HashSet::new();
        seen.insert("9781492052593".to_string());
        let result = pipeline(false).check(&item, &target(), &seen);
        assert_eq!(result.unwrap_err(), RejectReason::Duplicate);
    }

    #[test]
    fn test_no_identifier_rejected() {
        let item: RawSearchItem = serde_json::from_value(serde_json::json!({
            "title": "A Perfectly Fine Book Title",
            "format": "book",
            "isbn": "n/a"
        }))
        .unwrap();
        assert_eq!(check(&item).unwrap_err(), RejectReason::NoIdentifier);
    }

    #[test]
    fn test_pipeline_is_idempotent_over_accepted_set() {
        let items = vec![
            book("Hands-On Machine Learning"),
            book("Chapter 3: The Compiler"),
            book("Fluent Python Essentials"),
        ];
        let pipe = pipeline(false);

        let mut seen = HashSet::new();
        let mut accepted = Vec::new();
        for item in &items {
            if let Ok(record) = pipe.check(item, &target(), &seen) {
                seen.insert(record.id.clone());
                accepted.push((item.clone(), record));
            }
        }

        // Re-filtering the accepted originals (fresh accumulator) keeps them all
        let mut seen2 = HashSet::new();
        for (item, record) in &accepted {
            let again = pipe.check(item, &target(), &seen2).unwrap();
            assert_eq!(&again, record);
            seen2.insert(again.id);
        }
    }

    #[test]
    fn test_fallback_url_built_from_base() {
        let mut item = book("Hands-On Machine Learning");
        item.url = None;
        let record = check(&item).unwrap();
        assert!(record.url.ends_with("/api/v1/book/9781492052593/"));
    }
}
