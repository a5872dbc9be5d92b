//! Topic query variants.
//!
//! The catalog indexes the same subject under several spellings. Discovery
//! always queries the skill name itself; in lenient mode it also tries a
//! small set of mechanically-derived rewrites, configured aliases, and
//! catalog entries that share a meaningful token with the skill.

use std::collections::BTreeMap;

/// Upper bound on candidates queried per skill, to keep request volume sane.
const MAX_CANDIDATES: usize = 5;

/// Mechanical separator rewrites of a skill name: spaces to hyphens,
/// underscores and pluses. Single-word names produce no variants.
#[must_use]
pub fn mechanical_variants(name: &str) -> Vec<String> {
    let trimmed = name.trim();
    if !trimmed.contains(' ') {
        return Vec::new();
    }
    let mut variants = Vec::new();
    for separator in ["-", "_", "+"] {
        let rewritten = trimmed.split_whitespace().collect::<Vec<_>>().join(separator);
        if rewritten != trimmed && !variants.contains(&rewritten) {
            variants.push(rewritten);
        }
    }
    variants
}

/// Builds the ordered list of topic names to query for one skill.
///
/// The exact skill name always comes first. In lenient mode the alias table
/// and the catalog contribute further candidates; the list is capped at
/// [`MAX_CANDIDATES`].
#[must_use]
pub fn topic_candidates(
    skill_name: &str,
    lenient: bool,
    aliases: &BTreeMap<String, Vec<String>>,
    catalog: &[String],
) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();
    let mut push = |name: &str| {
        let trimmed = name.trim();
        if !trimmed.is_empty() && !candidates.iter().any(|c| c == trimmed) {
            candidates.push(trimmed.to_string());
        }
    };

    push(skill_name);

    if lenient {
        if let Some(alias_list) = aliases.get(skill_name.trim()) {
            for alias in alias_list {
                push(alias);
            }
        }

        // Catalog entries sharing a meaningful (3+ char) token with the skill
        let skill_lower = skill_name.to_lowercase().replace(['&', '/'], " ");
        let tokens: Vec<&str> = skill_lower
            .split_whitespace()
            .filter(|t| t.len() >= 3)
            .collect();
        for entry in catalog {
            if entry.trim().eq_ignore_ascii_case(skill_name.trim()) {
                continue;
            }
            let entry_lower = entry.to_lowercase();
            let shares_token = tokens.iter().any(|t| entry_lower.contains(t))
                || entry_lower
                    .split_whitespace()
                    .any(|w| w.len() >= 3 && skill_lower.contains(w));
            if shares_token {
                push(entry);
            }
        }
    }

    candidates.truncate(MAX_CANDIDATES);
    candidates
}
