//! Built-in rule-based reviewers.
//!
//! Each reviewer looks at the candidate from a different angle so that the
//! panel average is not dominated by one signal:
//!
//! - [`PatternAnalyzer`]: actionable and technical content
//! - [`GeneralPatternExtractor`]: reusable rules versus one-off chatter
//! - [`HistoricalContextChecker`]: novelty against what is already stored

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use memgate_core::text::{normalize, significant_words, similarity};
use memgate_core::{MemoryStore, MemoryType, SearchFilter};
use serde_json::json;

use super::{ReviewError, ReviewRequest, Reviewer};

/// Keyword groups used by the rule-based reviewers.
struct ReviewKeywords {
    actionable: Vec<&'static str>,
    general: Vec<&'static str>,
    transient: Vec<&'static str>,
}

impl Default for ReviewKeywords {
    fn default() -> Self {
        Self {
            actionable: vec![
                "fix", "fixed", "use", "run", "avoid", "instead", "because", "requires",
                "configure", "install", "deploy", "workaround", "gotcha", "bug", "error",
                "important", "remember", "steps", "command", "set", "enable", "disable",
            ],
            general: vec![
                "always", "never", "whenever", "every", "must", "should", "rule", "convention",
                "prefer", "by default", "in general", "policy", "standard", "best practice",
                "make sure", "don t",
            ],
            transient: vec![
                "right now", "currently", "today", "just now", "i think", "maybe", "lol",
                "for now", "this time", "brb", "wip", "not sure",
            ],
        }
    }
}

/// Lowercase words separated by single spaces and padded at both ends, so
/// phrases can be matched on word boundaries with `contains`.
fn padded_words(text: &str) -> String {
    let words: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    format!(" {} ", words.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn count_phrases(padded: &str, phrases: &[&str]) -> usize {
    phrases
        .iter()
        .filter(|p| padded.contains(&format!(" {} ", p)))
        .count()
}

fn has_code_markers(content: &str) -> bool {
    const MARKERS: &[&str] = &["`", "::", "()", "--", "=>", "->", "/", "=", ".rs", ".toml", ".json"];
    MARKERS.iter().any(|m| content.contains(m))
        || content
            .split_whitespace()
            .any(|w| w.contains('_') && w.chars().any(char::is_alphabetic))
}

fn verdict(score: i64, reasoning: String, confidence: f64) -> serde_json::Value {
    json!({
        "importance_score": score.clamp(0, 10),
        "reasoning": reasoning,
        "confidence": confidence,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Pattern Analyzer
// ─────────────────────────────────────────────────────────────────────────────

/// Rewards actionable, technical content.
pub struct PatternAnalyzer {
    keywords: ReviewKeywords,
}

impl PatternAnalyzer {
    pub const NAME: &'static str = "pattern-analyzer";

    pub fn new() -> Self {
        Self {
            keywords: ReviewKeywords::default(),
        }
    }

    fn assess(&self, request: &ReviewRequest) -> (i64, String) {
        let padded = padded_words(&request.content);
        let actionable = count_phrases(&padded, &self.keywords.actionable);
        let technical = has_code_markers(&request.content);
        let length = request.content.trim().chars().count();

        let mut score = 1 + actionable.min(4) as i64;
        if technical {
            score += 2;
        }
        if length >= 40 {
            score += 1;
        }
        if length >= 160 {
            score += 1;
        }
        if matches!(request.memory_type, MemoryType::Procedural | MemoryType::Semantic) {
            score += 1;
        }

        let reasoning = format!(
            "{} actionable signal(s), {} technical references, {} chars of {} content",
            actionable,
            if technical { "with" } else { "no" },
            length,
            request.memory_type
        );
        (score, reasoning)
    }
}

impl Default for PatternAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reviewer for PatternAnalyzer {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn review(&self, request: &ReviewRequest) -> Result<serde_json::Value, ReviewError> {
        let (score, reasoning) = self.assess(request);
        Ok(verdict(score, reasoning, 0.7))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// General Pattern Extractor
// ─────────────────────────────────────────────────────────────────────────────

/// Rewards reusable rules and penalizes conversational, time-bound remarks.
pub struct GeneralPatternExtractor {
    keywords: ReviewKeywords,
}

impl GeneralPatternExtractor {
    pub const NAME: &'static str = "general-pattern-extractor";

    pub fn new() -> Self {
        Self {
            keywords: ReviewKeywords::default(),
        }
    }

    fn assess(&self, request: &ReviewRequest) -> (i64, String) {
        let padded = padded_words(&request.content);
        let general = count_phrases(&padded, &self.keywords.general);
        let mut transient = count_phrases(&padded, &self.keywords.transient);
        if request.content.trim_end().ends_with('?') {
            transient += 1;
        }

        let type_adjustment = match request.memory_type {
            MemoryType::Semantic | MemoryType::Procedural => 1,
            MemoryType::Prospective => 0,
            MemoryType::Episodic | MemoryType::Working => -1,
        };

        let score = 4 + 2 * general.min(3) as i64 - 2 * transient.min(2) as i64 + type_adjustment;
        let reasoning = format!(
            "{} generalizable cue(s), {} transient cue(s) for {} memory",
            general, transient, request.memory_type
        );
        (score, reasoning)
    }
}

impl Default for GeneralPatternExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reviewer for GeneralPatternExtractor {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn review(&self, request: &ReviewRequest) -> Result<serde_json::Value, ReviewError> {
        let (score, reasoning) = self.assess(request);
        Ok(verdict(score, reasoning, 0.6))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Historical Context Checker
// ─────────────────────────────────────────────────────────────────────────────

/// Scores novelty against related entries already in the store.
pub struct HistoricalContextChecker {
    store: Arc<dyn MemoryStore>,
}

impl HistoricalContextChecker {
    pub const NAME: &'static str = "historical-context-checker";

    /// Keywords used to look up related history.
    const MAX_KEYWORDS: usize = 8;
    const CANDIDATE_LIMIT: usize = 50;

    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }

    fn lookup_keywords(content: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut words: Vec<String> = significant_words(content)
            .into_iter()
            .filter(|w| w.len() >= 3 && seen.insert(w.clone()))
            .collect();
        words.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        words.truncate(Self::MAX_KEYWORDS);
        words
    }
}

#[async_trait]
impl Reviewer for HistoricalContextChecker {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn review(&self, request: &ReviewRequest) -> Result<serde_json::Value, ReviewError> {
        let keywords = Self::lookup_keywords(&request.content);
        if keywords.is_empty() {
            return Ok(verdict(4, "nothing to compare against history".into(), 0.4));
        }

        let filter = SearchFilter {
            keywords,
            limit: Some(Self::CANDIDATE_LIMIT),
            ..Default::default()
        };
        let related = self.store.search(&filter).map_err(anyhow::Error::from)?;

        if related.is_empty() {
            return Ok(verdict(7, "no related memories stored yet".into(), 0.5));
        }

        let normalized = normalize(&request.content);
        let closest = related
            .iter()
            .map(|e| similarity(&normalized, &e.content))
            .fold(0.0_f64, f64::max);
        let novelty = 1.0 - closest;
        let score = (1.0 + 6.0 * novelty).round() as i64;

        let reasoning = format!(
            "{} related memories, closest similarity {:.2}",
            related.len(),
            closest
        );
        Ok(verdict(score, reasoning, 0.8))
    }
}

/// The three built-in reviewers, in name order.
pub fn default_panel(store: Arc<dyn MemoryStore>) -> Vec<Arc<dyn Reviewer>> {
    vec![
        Arc::new(GeneralPatternExtractor::new()),
        Arc::new(HistoricalContextChecker::new(store)),
        Arc::new(PatternAnalyzer::new()),
    ]
}
