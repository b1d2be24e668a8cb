//! Engine Configuration
//!
//! Configuration is loaded from multiple sources with precedence:
//! 1. Environment variables (MEMGATE_*)
//! 2. Config file (`MEMGATE_CONFIG`, else `<config dir>/config.toml`)
//! 3. Default values

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Engine configuration options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Path to the SQLite database file
    pub database_path: PathBuf,

    /// Trivial filter configuration
    pub filter: FilterConfig,

    /// Reviewer panel configuration
    pub review: ReviewConfig,

    /// Consensus and quality gate configuration
    pub quality: QualityConfig,

    /// Retrieval configuration
    pub retrieval: RetrievalConfig,

    /// Host hook configuration
    pub hooks: HookConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            filter: FilterConfig::default(),
            review: ReviewConfig::default(),
            quality: QualityConfig::default(),
            retrieval: RetrievalConfig::default(),
            hooks: HookConfig::default(),
        }
    }
}

/// Trivial filter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Minimum trimmed length in characters (default: 10)
    pub min_length: usize,

    /// Extra filler phrases rejected in addition to the built-in ones
    pub extra_patterns: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_length: 10,
            extra_patterns: Vec::new(),
        }
    }
}

/// Reviewer panel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Per-reviewer timeout in milliseconds (default: 450)
    pub reviewer_timeout_ms: u64,

    /// Deadline for the whole panel in milliseconds (default: 500)
    pub deadline_ms: u64,

    /// External command reviewers; empty selects the built-in panel
    pub commands: Vec<CommandReviewerConfig>,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            reviewer_timeout_ms: 450,
            deadline_ms: 500,
            commands: Vec::new(),
        }
    }
}

/// An external program acting as a reviewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReviewerConfig {
    /// Reviewer name recorded in provenance
    pub name: String,

    /// Program to execute
    pub program: String,

    /// Arguments passed to the program
    #[serde(default)]
    pub args: Vec<String>,
}

/// Consensus and quality gate configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Minimum consensus score on the 0–10 scale (default: 4.0)
    pub threshold: f64,

    /// Successful reviews required (default: 2, tolerating one failure of three)
    pub min_reviews: usize,

    /// Gate on the confidence-weighted average instead of the plain mean
    pub weighted: bool,

    /// Reject when reviewers disagree more than this variance
    pub max_variance: Option<f64>,

    /// Similarity at or above which new content counts as a duplicate (default: 0.9)
    pub duplicate_similarity: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            threshold: 4.0,
            min_reviews: 2,
            weighted: false,
            max_variance: None,
            duplicate_similarity: 0.9,
        }
    }
}

/// Retrieval configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Candidates scoring below this are dropped (default: 0.3)
    pub min_relevance: f64,

    /// Age at which the recency signal halves, in days (default: 7)
    pub recency_half_life_days: f64,

    /// Maximum ranked candidates passed to the allocator (default: 200)
    pub candidate_limit: usize,

    /// Similarity at or above which a candidate is redundant (default: 0.9)
    pub dedup_similarity: f64,

    /// Score bonus for entries sharing a context key/value with the query (default: 0.1)
    pub context_bonus: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            min_relevance: 0.3,
            recency_half_life_days: 7.0,
            candidate_limit: 200,
            dedup_similarity: 0.9,
            context_bonus: 0.1,
        }
    }
}

/// Host hook configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    /// Master switch for store/retrieve hooks (default: true)
    pub enabled: bool,

    /// Token budget for injected context (default: 2000)
    pub default_token_budget: usize,

    /// Takes precedence over `default_token_budget` when set
    pub token_budget_override: Option<usize>,

    /// Cluster injected entries by memory type (default: true)
    pub group_by_type: bool,

    /// Render confidence and source next to each entry (default: false)
    pub include_metadata: bool,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_token_budget: 2000,
            token_budget_override: None,
            group_by_type: true,
            include_metadata: false,
        }
    }
}

impl HookConfig {
    /// Budget actually applied to injected context.
    pub fn effective_token_budget(&self) -> usize {
        self.token_budget_override.unwrap_or(self.default_token_budget)
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "memgate", "memgate")
}

fn default_database_path() -> PathBuf {
    project_dirs()
        .map(|d| d.data_dir().join("memory.db"))
        .unwrap_or_else(|| PathBuf::from("memory.db"))
}

/// Default config file location.
pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|d| d.config_dir().join("config.toml"))
}

impl EngineConfig {
    /// Load configuration from file and environment, then validate.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("MEMGATE_CONFIG")
            .ok()
            .map(PathBuf::from)
            .or_else(default_config_path);

        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content)?;
        debug!(path = %path.display(), "loaded engine config");
        Ok(config)
    }

    /// Parse TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `MEMGATE_*` overrides using `lookup` to read variables.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("MEMGATE_DATABASE_PATH") {
            self.database_path = PathBuf::from(path);
        }

        if let Some(enabled) = lookup("MEMGATE_ENABLED") {
            self.hooks.enabled = match enabled.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(ConfigError::invalid("MEMGATE_ENABLED", format!("not a boolean: {}", other)));
                }
            };
        }

        if let Some(budget) = lookup("MEMGATE_TOKEN_BUDGET") {
            let budget = budget
                .trim()
                .parse::<usize>()
                .map_err(|e| ConfigError::invalid("MEMGATE_TOKEN_BUDGET", e.to_string()))?;
            self.hooks.token_budget_override = Some(budget);
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=10.0).contains(&self.quality.threshold) {
            return Err(ConfigError::invalid("quality.threshold", "must be between 0 and 10"));
        }

        if self.quality.min_reviews == 0 {
            return Err(ConfigError::invalid("quality.min_reviews", "must be greater than 0"));
        }

        if let Some(max_variance) = self.quality.max_variance {
            if max_variance.is_nan() || max_variance < 0.0 {
                return Err(ConfigError::invalid("quality.max_variance", "must not be negative"));
            }
        }

        for (field, value) in [
            ("quality.duplicate_similarity", self.quality.duplicate_similarity),
            ("retrieval.dedup_similarity", self.retrieval.dedup_similarity),
        ] {
            if value.is_nan() || value <= 0.0 || value > 1.0 {
                return Err(ConfigError::invalid(field, "must be in (0, 1]"));
            }
        }

        if !(0.0..=1.0).contains(&self.retrieval.min_relevance) {
            return Err(ConfigError::invalid("retrieval.min_relevance", "must be between 0 and 1"));
        }

        if !(0.0..=1.0).contains(&self.retrieval.context_bonus) {
            return Err(ConfigError::invalid("retrieval.context_bonus", "must be between 0 and 1"));
        }

        let half_life = self.retrieval.recency_half_life_days;
        if half_life.is_nan() || half_life <= 0.0 {
            return Err(ConfigError::invalid(
                "retrieval.recency_half_life_days",
                "must be greater than 0",
            ));
        }

        if self.review.reviewer_timeout_ms == 0 || self.review.deadline_ms == 0 {
            return Err(ConfigError::invalid("review", "timeouts must be greater than 0"));
        }

        if self.review.reviewer_timeout_ms > self.review.deadline_ms {
            return Err(ConfigError::invalid(
                "review.reviewer_timeout_ms",
                "must not exceed review.deadline_ms",
            ));
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<ConfigError> for memgate_core::Error {
    fn from(err: ConfigError) -> Self {
        memgate_core::Error::Config(err.to_string())
    }
}
