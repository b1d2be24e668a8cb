//! Relevance scoring for retrieval candidates.
//!
//! Scores are purely lexical. Query and content are reduced to stemmed terms
//! (see [`memgate_core::text`]); terms sharing a five-character prefix count
//! as the same word family, so "authenticate" finds "authentication". There
//! are no synonyms: "input sanitization" does not match "validation".
//!
//! ```text
//! lexical  = 1.0                           if the query's term sequence occurs in the content
//!          = matched query terms / terms   otherwise
//! score    = lexical * (0.7 + 0.15 * recency + 0.15 * type_weight)   (0 when lexical = 0)
//! recency  = 0.5 ^ (age_days / half_life_days)
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use memgate_core::text::{normalize, terms, terms_match};
use memgate_core::{MemoryEntry, MemoryType};

use crate::config::RetrievalConfig;

const LEXICAL_WEIGHT: f64 = 0.7;
const RECENCY_WEIGHT: f64 = 0.15;
const TYPE_WEIGHT: f64 = 0.15;

/// Recency assumed for entries without a timestamp.
const UNKNOWN_RECENCY: f64 = 0.5;
/// Type weight assumed when the memory type is unknown.
const UNKNOWN_TYPE_WEIGHT: f64 = 0.8;

/// A query reduced to the form the scorer compares against.
#[derive(Debug, Clone, Default)]
pub struct ScoringQuery {
    terms: Vec<String>,
    phrase: String,
    context: BTreeMap<String, String>,
}

impl ScoringQuery {
    pub fn new(query_text: &str) -> Self {
        let sequence = terms(query_text);
        let phrase = padded(&sequence);
        let mut distinct = sequence;
        distinct.sort();
        distinct.dedup();
        Self {
            terms: distinct,
            phrase,
            context: BTreeMap::new(),
        }
    }

    pub fn with_context(mut self, context: BTreeMap<String, String>) -> Self {
        self.context = context;
        self
    }

    /// Whether the query has any searchable terms.
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Distinct stemmed query terms.
    pub fn terms(&self) -> &[String] {
        &self.terms
    }
}

fn padded(terms: &[String]) -> String {
    format!(" {} ", terms.join(" "))
}

#[derive(Debug, Clone)]
pub struct RelevanceScorer {
    half_life_days: f64,
    context_bonus: f64,
}

impl Default for RelevanceScorer {
    fn default() -> Self {
        Self::new(&RetrievalConfig::default())
    }
}

impl RelevanceScorer {
    pub fn new(config: &RetrievalConfig) -> Self {
        Self {
            half_life_days: config.recency_half_life_days,
            context_bonus: config.context_bonus,
        }
    }

    /// Relevance of `content` to `query_text` in `[0, 1]`, as of now.
    pub fn score(
        &self,
        query_text: &str,
        content: &str,
        memory_type: Option<MemoryType>,
        timestamp: Option<DateTime<Utc>>,
    ) -> f64 {
        self.score_at(query_text, content, memory_type, timestamp, Utc::now())
    }

    /// [`RelevanceScorer::score`] with an explicit clock.
    pub fn score_at(
        &self,
        query_text: &str,
        content: &str,
        memory_type: Option<MemoryType>,
        timestamp: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> f64 {
        let query = ScoringQuery::new(query_text);
        self.combine(lexical(&query, content), memory_type, timestamp, now)
    }

    /// Score a stored entry, including the context bonus.
    pub fn score_entry(&self, query: &ScoringQuery, entry: &MemoryEntry, now: DateTime<Utc>) -> f64 {
        let base = self.combine(
            lexical(query, &entry.content),
            Some(entry.memory_type),
            Some(entry.timestamp),
            now,
        );
        if base == 0.0 {
            return 0.0;
        }

        let shares_context = query
            .context
            .iter()
            .any(|(k, v)| entry.context.get(k) == Some(v));
        if shares_context {
            (base + self.context_bonus).min(1.0)
        } else {
            base
        }
    }

    fn combine(
        &self,
        lexical: f64,
        memory_type: Option<MemoryType>,
        timestamp: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> f64 {
        if lexical <= 0.0 {
            return 0.0;
        }
        let recency = timestamp.map_or(UNKNOWN_RECENCY, |ts| self.recency(ts, now));
        let type_weight = memory_type.map_or(UNKNOWN_TYPE_WEIGHT, |t| t.priority_weight());

        let score = lexical * (LEXICAL_WEIGHT + RECENCY_WEIGHT * recency + TYPE_WEIGHT * type_weight);
        score.clamp(0.0, 1.0)
    }

    /// Exponential decay by age; timestamps in the future count as brand new.
    fn recency(&self, timestamp: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        let age_ms = (now - timestamp).num_milliseconds();
        if age_ms <= 0 {
            return 1.0;
        }
        let age_days = age_ms as f64 / 86_400_000.0;
        0.5_f64.powf(age_days / self.half_life_days)
    }
}

/// Lexical overlap of `query` with `content` in `[0, 1]`.
fn lexical(query: &ScoringQuery, content: &str) -> f64 {
    if query.is_empty() {
        return 0.0;
    }
    let content_terms = terms(&normalize(content));
    if content_terms.is_empty() {
        return 0.0;
    }

    if padded(&content_terms).contains(&query.phrase) {
        return 1.0;
    }

    let matched = query
        .terms
        .iter()
        .filter(|q| content_terms.iter().any(|c| terms_match(q, c)))
        .count();
    matched as f64 / query.terms.len() as f64
}
