//! Skill list loading.
//!
//! Two input formats are accepted and auto-detected:
//!
//! 1. A counted list: `{"skills": [{"title": "Python", "books": 666}, ...]}`.
//!    Expected counts bound pagination and drive the too-broad skip rule;
//!    discovery runs in strict topic-matching mode.
//! 2. A facets map: `{"python": "Python", ...}`. No counts are available, so
//!    discovery runs in lenient mode with alias and catalog matching.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, instrument};

/// Errors raised while loading the skills file.
#[derive(Debug, Error)]
pub enum SkillsError {
    /// Skills file missing.
    #[error("skills file not found: {path} (provide a skills list to discover)")]
    Missing {
        /// The path that was checked.
        path: PathBuf,
    },

    /// Skills file unreadable.
    #[error("failed to read skills file {path}: {source}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Neither of the two known formats.
    #[error("unrecognized skills file format in {path}")]
    UnknownFormat {
        /// The offending file.
        path: PathBuf,
    },

    /// Not valid JSON at all.
    #[error("invalid JSON in skills file {path}: {source}")]
    Invalid {
        /// The offending file.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}

/// One topic keyword the platform indexes books under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skill {
    /// The skill name as the catalog spells it.
    pub name: String,
    /// Expected book count, when the input format carries one.
    pub expected: Option<u64>,
}

/// The loaded skill list plus the matching mode it implies.
#[derive(Debug, Clone)]
pub struct SkillList {
    /// Skills in input order.
    pub skills: Vec<Skill>,
    /// Lenient mode: no expected counts, broader topic matching.
    pub lenient: bool,
    /// Every known skill name, for catalog-based variant matching.
    pub catalog: Vec<String>,
}

#[derive(Deserialize)]
struct CountedEntry {
    title: String,
    #[serde(default)]
    books: Option<u64>,
}

#[derive(Deserialize)]
struct CountedFile {
    skills: Vec<CountedEntry>,
}

/// Loads and auto-detects the skills file format.
///
/// # Errors
///
/// Returns [`SkillsError::Missing`] when the file does not exist,
/// [`SkillsError::Invalid`] when it is not JSON, and
/// [`SkillsError::UnknownFormat`] when the JSON matches neither format.
#[instrument(level = "debug")]
pub fn load_skills(path: &Path) -> Result<SkillList, SkillsError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
            return Err(SkillsError::Missing {
                path: path.to_path_buf(),
            });
        }
        Err(source) => {
            return Err(SkillsError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let value: serde_json::Value =
        serde_json::from_str(&text).map_err(|source| SkillsError::Invalid {
            path: path.to_path_buf(),
            source,
        })?;

    // Counted format first: an object with a "skills" array.
    if value.get("skills").is_some_and(serde_json::Value::is_array) {
        let parsed: CountedFile =
            serde_json::from_value(value).map_err(|source| SkillsError::Invalid {
                path: path.to_path_buf(),
                source,
            })?;
        let skills: Vec<Skill> = parsed
            .skills
            .into_iter()
            .filter(|entry| !entry.title.trim().is_empty())
            .map(|entry| Skill {
                name: entry.title,
                expected: entry.books,
            })
            .collect();
        let catalog = skills.iter().map(|s| s.name.clone()).collect();
        let total: u64 = skills.iter().filter_map(|s| s.expected).sum();
        info!(
            skills = skills.len(),
            expected_books = total,
            "loaded counted skills list (strict mode)"
        );
        return Ok(SkillList {
            skills,
            lenient: false,
            catalog,
        });
    }

    // Facets format: a flat object of string values.
    if let Some(map) = value.as_object()
        && !map.is_empty()
        && map.values().all(serde_json::Value::is_string)
    {
        let skills: Vec<Skill> = map
            .values()
            .filter_map(|v| v.as_str())
            .filter(|name| !name.trim().is_empty())
            .map(|name| Skill {
                name: name.to_string(),
                expected: None,
            })
            .collect();
        let catalog = skills.iter().map(|s| s.name.clone()).collect();
        info!(
            skills = skills.len(),
            "loaded facets skills list (lenient mode, no expected counts)"
        );
        return Ok(SkillList {
            skills,
            lenient: true,
            catalog,
        });
    }

    Err(SkillsError::UnknownFormat {
        path: path.to_path_buf(),
    })
}

impl SkillList {
    /// Keeps only skills whose name contains one of `filters`
    /// (case-insensitive). An empty filter list keeps everything.
    #[must_use]
    pub fn filtered(mut self, filters: &[String]) -> Self {
        if filters.is_empty() {
            return self;
        }
        let lowered: Vec<String> = filters.iter().map(|f| f.to_lowercase()).collect();
        self.skills.retain(|skill| {
            let name = skill.name.to_lowercase();
            lowered.iter().any(|f| name.contains(f))
        });
        self
    }

    /// Removes skills named in `excluded` and reorders so that `priority`
    /// skills come first (both exact-name matches, input order preserved
    /// within each group).
    #[must_use]
    pub fn arranged(mut self, excluded: &[String], priority: &[String]) -> Self {
        self.skills.retain(|s| !excluded.contains(&s.name));
        if !priority.is_empty() {
            let (first, rest): (Vec<Skill>, Vec<Skill>) = self
                .skills
                .into_iter()
                .partition(|s| priority.contains(&s.name));
            self.skills = first.into_iter().chain(rest).collect();
        }
        self
    }
}
