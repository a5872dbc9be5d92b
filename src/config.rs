//! Engine configuration with serde defaults.
//!
//! Every tunable named in the component designs lives here: endpoint shape,
//! pagination bounds, delays, retry counts, filter thresholds, the alias
//! table and the output layout. A config file overrides the defaults field
//! by field; CLI flags override the file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::search::SearchApi;

/// Errors raised while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file missing or unreadable.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid JSON for this schema.
    #[error("invalid config file {path}: {source}")]
    Invalid {
        /// Path that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

/// Full engine configuration.
///
/// All fields have defaults, so an empty JSON object is a valid config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base URL of the e-book platform.
    pub base_url: String,
    /// Which search endpoint generation to use.
    pub search_api: SearchApi,
    /// Results requested per search page.
    pub page_size: u32,
    /// Absolute cap on pages fetched per topic.
    pub max_pages_per_skill: u32,
    /// Skills whose expected book count exceeds this are skipped as too broad.
    pub too_broad_cap: u64,
    /// Concurrent discovery workers.
    pub workers: usize,
    /// Delay between search requests within a topic, in milliseconds.
    pub request_delay_ms: u64,
    /// Delay between skills during discovery, in milliseconds.
    pub skill_delay_ms: u64,
    /// Delay between book downloads, in milliseconds.
    pub download_delay_ms: u64,
    /// HTTP connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// HTTP read timeout in seconds.
    pub read_timeout_secs: u64,
    /// Retry attempts for transient remote failures.
    pub max_retries: u32,
    /// Titles shorter than this need an ISBN-like identifier to survive.
    pub short_title_min: usize,
    /// Titles without any ISBN must be at least this long to survive.
    pub no_isbn_title_min: usize,
    /// Topic alias table applied in lenient mode.
    pub alias_table: BTreeMap<String, Vec<String>>,
    /// Skills excluded from every run.
    pub exclude_skills: Vec<String>,
    /// Skills processed before all others.
    pub priority_skills: Vec<String>,
    /// Directory holding the per-skill result files.
    pub book_ids_dir: PathBuf,
    /// Root of the EPUB library output.
    pub books_dir: PathBuf,
    /// Progress snapshot file.
    pub progress_file: PathBuf,
    /// Live stats text file (overwritten on every mutation, for `tail -f`).
    pub live_stats_file: PathBuf,
    /// Rotating log file (daily rotation, date suffix appended).
    pub log_file: PathBuf,
    /// Cookie bundle file (JSON object of name to value).
    pub cookie_file: PathBuf,
    /// Skills input file.
    pub skills_file: PathBuf,
    /// Persist the cookie bundle after this many completed books.
    pub token_save_interval: u32,
    /// Cap on books downloaded per skill.
    pub max_books_per_skill: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "https://learning.oreilly.com".to_string(),
            search_api: SearchApi::V2,
            page_size: 100,
            max_pages_per_skill: 100,
            too_broad_cap: 500,
            workers: 3,
            request_delay_ms: 300,
            skill_delay_ms: 1_000,
            download_delay_ms: 1_000,
            connect_timeout_secs: 10,
            read_timeout_secs: 30,
            max_retries: 3,
            short_title_min: 10,
            no_isbn_title_min: 15,
            alias_table: default_alias_table(),
            exclude_skills: Vec::new(),
            priority_skills: Vec::new(),
            book_ids_dir: PathBuf::from("book_ids"),
            books_dir: PathBuf::from("books"),
            progress_file: PathBuf::from("output/progress.json"),
            live_stats_file: PathBuf::from("output/download_progress_live.txt"),
            log_file: PathBuf::from("output/skillshelf.log"),
            cookie_file: PathBuf::from("cookies.json"),
            skills_file: PathBuf::from("skills.json"),
            token_save_interval: 5,
            max_books_per_skill: 1_000,
        }
    }
}

impl EngineConfig {
    /// Loads a configuration file, layering it over the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the file cannot be read and
    /// [`ConfigError::Invalid`] when it does not parse.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Invalid {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Known topic aliases the catalog spells differently across surfaces.
///
/// These are seeds, not an exhaustive mapping; config files may extend or
/// replace the table.
fn default_alias_table() -> BTreeMap<String, Vec<String>> {
    let mut table = BTreeMap::new();
    table.insert("ChatGPT".to_string(), vec!["GPT".to_string()]);
    table.insert("GPT".to_string(), vec!["ChatGPT".to_string()]);
    table.insert(
        "Web APIs".to_string(),
        vec![
            "RESTful API".to_string(),
            "Application Programming Interface (API)".to_string(),
            "API".to_string(),
        ],
    );
    table.insert(
        "RESTful API".to_string(),
        vec![
            "Web APIs".to_string(),
            "API".to_string(),
            "Application Programming Interface (API)".to_string(),
        ],
    );
    table.insert(
        "Application Programming Interface (API)".to_string(),
        vec![
            "API".to_string(),
            "RESTful API".to_string(),
            "Web APIs".to_string(),
        ],
    );
    table.insert(
        "AI for Every Day".to_string(),
        vec![
            "AI & ML".to_string(),
            "Artificial Intelligence (AI)".to_string(),
        ],
    );
    table
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_values() {
        let config = EngineConfig::default();
        assert_eq!(config.page_size, 100);
        assert_eq!(config.too_broad_cap, 500);
        assert_eq!(config.workers, 3);
        assert_eq!(config.token_save_interval, 5);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.connect_timeout_secs, 10);
        assert_eq!(config.read_timeout_secs, 30);
        assert_eq!(config.search_api, SearchApi::V2);
        assert_eq!(config.log_file, PathBuf::from("output/skillshelf.log"));
    }

    #[test]
    fn test_empty_config_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{}").unwrap();

        let config = EngineConfig::from_file(&path).unwrap();

        assert_eq!(config.page_size, EngineConfig::default().page_size);
    }

    #[test]
    fn test_partial_config_file_overrides_named_fields_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"workers": 5, "too_broad_cap": 250}"#).unwrap();

        let config = EngineConfig::from_file(&path).unwrap();

        assert_eq!(config.workers, 5);
        assert_eq!(config.too_broad_cap, 250);
        assert_eq!(config.page_size, 100);
    }

    #[test]
    fn test_missing_config_file_is_io_error() {
        let result = EngineConfig::from_file(Path::new("/nonexistent/config.json"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_invalid_config_file_is_invalid_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();

        let result = EngineConfig::from_file(&path);
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_alias_table_seeded_with_known_pairs() {
        let config = EngineConfig::default();
        assert!(config.alias_table.contains_key("ChatGPT"));
        assert!(
            config.alias_table["Web APIs"]
                .iter()
                .any(|a| a == "RESTful API")
        );
    }
}
