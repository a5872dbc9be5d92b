//! Filesystem name rules shared by every component that writes paths.
//!
//! A single sanitizer with one closed set of forbidden characters keeps the
//! discovery output, the book working trees and the final `.epub` filenames
//! consistent with each other: a book that was checked for existence under one
//! spelling is always written back under the same spelling.

/// Characters that never survive into a directory or file name.
const FORBIDDEN: &[char] = &[
    '~', '#', '%', '&', '*', '{', '}', '\\', '<', '>', '?', '/', '`', '\'', '"', '|', '+', ':',
];

/// Acronyms kept fully upper-case when building skill directory names.
const ACRONYMS: &[&str] = &[
    "AI", "ML", "API", "UI", "UX", "SQL", "CSS", "HTML", "JS", "AWS", "GCP",
];

/// Words kept lower-case inside a skill directory name (unless leading).
const MINOR_WORDS: &[&str] = &["and", "or", "of", "the", "in", "on", "at", "to", "for"];

/// Sanitizes a book title into a directory/file-safe form.
///
/// Colon handling follows the platform rules: a colon past column 15 marks a
/// subtitle and everything after it is dropped; on Windows an early colon
/// becomes a comma (`:` is illegal there); any remaining forbidden character
/// becomes an underscore.
#[must_use]
pub fn sanitize_title(title: &str) -> String {
    let mut name = title.to_string();

    if let Some(idx) = name.find(':') {
        if idx > 15 {
            name.truncate(idx);
        } else if cfg!(windows) {
            name = name.replace(':', ",");
        }
    }

    name = name
        .chars()
        .map(|ch| if FORBIDDEN.contains(&ch) { '_' } else { ch })
        .collect();

    name.trim().to_string()
}

/// Builds the per-book directory name: `<sanitized title> (<id>)`.
#[must_use]
pub fn book_dir_name(title: &str, book_id: &str) -> String {
    format!("{} ({book_id})", sanitize_title(title))
}

/// Builds the final `.epub` filename: `<title> - <authors>[ (Kindle)].epub`.
///
/// Author lists are joined with `, ` by the caller; the whole stem goes
/// through the shared sanitizer so both variants land next to each other.
#[must_use]
pub fn epub_file_name(title: &str, authors: &str, kindle: bool) -> String {
    let stem = sanitize_title(&format!("{title} - {authors}"));
    if kindle {
        format!("{stem} (Kindle).epub")
    } else {
        format!("{stem}.epub")
    }
}

/// Converts a skill name into its library directory form: PascalCase words
/// separated by spaces, known acronyms upper-cased, minor words lower-cased.
///
/// `"machine learning"` becomes `"Machine Learning"`, `"ai engineering"`
/// becomes `"AI Engineering"`.
#[must_use]
pub fn skill_dir_name(skill: &str) -> String {
    let cleaned: String = skill
        .trim()
        .chars()
        .map(|ch| {
            if matches!(ch, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') {
                ' '
            } else {
                ch
            }
        })
        .collect();

    let words: Vec<&str> = cleaned
        .split(['_', '-', ' '])
        .filter(|w| !w.is_empty())
        .collect();

    let mut out: Vec<String> = Vec::with_capacity(words.len());
    for word in words {
        let upper = word.to_uppercase();
        if ACRONYMS.contains(&upper.as_str()) {
            out.push(upper);
        } else if !out.is_empty() && MINOR_WORDS.contains(&word.to_lowercase().as_str()) {
            out.push(word.to_lowercase());
        } else {
            out.push(capitalize(word));
        }
    }

    out.join(" ")
}

/// Converts a skill name into its result-file stem: lower-case, underscores,
/// no repeated separators. `"Machine Learning"` becomes `"machine_learning"`.
#[must_use]
pub fn skill_file_stem(skill: &str) -> String {
    let mut stem = skill.trim().to_lowercase().replace(' ', "_");
    for ch in [
        '/', '\\', ':', '*', '?', '"', '<', '>', '|', '&', '-', '(', ')', '.', ',',
    ] {
        stem = stem.replace(ch, "_");
    }
    while stem.contains("__") {
        stem = stem.replace("__", "_");
    }
    stem.trim_matches('_').to_string()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_title_drops_subtitle_after_late_colon() {
        let sanitized = sanitize_title("Programming Rust, 2nd Edition: Fast, Safe Systems");
        assert_eq!(sanitized, "Programming Rust, 2nd Edition");
    }

    #[test]
    fn test_sanitize_title_early_colon_not_truncated() {
        // Colon at position <= 15 is not a subtitle marker
        let sanitized = sanitize_title("Go: The Basics");
        assert!(!sanitized.is_empty());
        assert!(sanitized.starts_with("Go"));
        assert!(!sanitized.contains(':'), "colon must not survive: {sanitized}");
    }

    #[test]
    fn test_sanitize_title_replaces_forbidden_characters() {
        let sanitized = sanitize_title("C/C++ <embedded> {tips}");
        assert!(!sanitized.contains('/'));
        assert!(!sanitized.contains('<'));
        assert!(!sanitized.contains('{'));
        assert!(!sanitized.contains('+'));
        assert!(sanitized.contains('_'));
    }

    #[test]
    fn test_sanitize_title_plain_title_unchanged() {
        assert_eq!(sanitize_title("Designing Data-Intensive Applications"),
            "Designing Data-Intensive Applications");
    }

    #[test]
    fn test_book_dir_name_appends_id() {
        assert_eq!(
            book_dir_name("Fluent Python", "9781492056348"),
            "Fluent Python (9781492056348)"
        );
    }

    #[test]
    fn test_epub_file_name_standard_and_kindle() {
        assert_eq!(
            epub_file_name("Fluent Python", "Luciano Ramalho", false),
            "Fluent Python - Luciano Ramalho.epub"
        );
        assert_eq!(
            epub_file_name("Fluent Python", "Luciano Ramalho", true),
            "Fluent Python - Luciano Ramalho (Kindle).epub"
        );
    }

    #[test]
    fn test_skill_dir_name_pascal_case_with_spaces() {
        assert_eq!(skill_dir_name("machine learning"), "Machine Learning");
        assert_eq!(skill_dir_name("software_architecture"), "Software Architecture");
    }

    #[test]
    fn test_skill_dir_name_acronyms_upper_cased() {
        assert_eq!(skill_dir_name("ai engineering"), "AI Engineering");
        assert_eq!(skill_dir_name("sql tuning"), "SQL Tuning");
    }

    #[test]
    fn test_skill_dir_name_minor_words_lower_cased() {
        assert_eq!(
            skill_dir_name("internet of things"),
            "Internet of Things"
        );
        // Leading minor word is still capitalized
        assert_eq!(skill_dir_name("the cloud"), "The Cloud");
    }

    #[test]
    fn test_skill_dir_name_strips_path_separators() {
        let name = skill_dir_name("CI/CD pipelines");
        assert!(!name.contains('/'));
    }

    #[test]
    fn test_skill_file_stem_lowercase_underscores() {
        assert_eq!(skill_file_stem("Machine Learning"), "machine_learning");
        assert_eq!(skill_file_stem("C++ & Rust"), "c_rust");
        assert_eq!(skill_file_stem("Web APIs"), "web_apis");
    }

    #[test]
    fn test_skill_file_stem_collapses_separator_runs() {
        assert_eq!(skill_file_stem("AI - for (Every) Day"), "ai_for_every_day");
    }
}
