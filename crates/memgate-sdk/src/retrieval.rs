//! Retrieval pipeline: fetch, score, pack, format.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use memgate_core::{Error, MemoryEntry, MemoryStore, MemoryType, Result, SearchFilter, TimeRange};
use tracing::{debug, warn};

use crate::allocator::{rank, ScoredEntry, TokenBudgetAllocator};
use crate::config::RetrievalConfig;
use crate::formatter::ContextFormatter;
use crate::relevance::{RelevanceScorer, ScoringQuery};

/// Retrieve path latency target.
const RETRIEVE_TARGET: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalQuery {
    pub query_text: String,
    /// Empty means all types.
    pub memory_types: Vec<MemoryType>,
    pub token_budget: usize,
    pub time_range: Option<TimeRange>,
    /// Entries sharing any of these key/value pairs are boosted.
    pub context: BTreeMap<String, String>,
}

impl RetrievalQuery {
    /// Fails with `InvalidInput` on blank query text.
    pub fn new(query_text: impl Into<String>, token_budget: usize) -> Result<Self> {
        let query_text = query_text.into();
        if query_text.trim().is_empty() {
            return Err(Error::invalid_input("query_text must not be empty"));
        }
        Ok(Self {
            query_text,
            memory_types: Vec::new(),
            token_budget,
            time_range: None,
            context: BTreeMap::new(),
        })
    }

    pub fn with_types(mut self, memory_types: impl IntoIterator<Item = MemoryType>) -> Self {
        self.memory_types = memory_types.into_iter().collect();
        self
    }

    pub fn with_time_range(mut self, time_range: TimeRange) -> Self {
        self.time_range = Some(time_range);
        self
    }

    pub fn with_context(mut self, context: BTreeMap<String, String>) -> Self {
        self.context = context;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalResult {
    /// Selected entries, most relevant first.
    pub entries: Vec<MemoryEntry>,
    /// Never exceeds `token_budget`.
    pub total_tokens: usize,
    /// Token cost per entry ID.
    pub token_counts: HashMap<String, usize>,
    /// Relevance per entry ID.
    pub scores: HashMap<String, f64>,
    pub candidates_considered: usize,
    pub token_budget: usize,
    /// Set when the store could not be read; `entries` is then empty.
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl RetrievalResult {
    fn empty(token_budget: usize) -> Self {
        Self {
            token_budget,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Format the entries for injection.
    pub fn render(&self, group_by_type: bool, include_metadata: bool) -> String {
        ContextFormatter::format(&self.entries, group_by_type, include_metadata)
    }
}

pub struct RetrievalPipeline {
    store: Arc<dyn MemoryStore>,
    scorer: RelevanceScorer,
    allocator: TokenBudgetAllocator,
    min_relevance: f64,
    candidate_limit: usize,
}

impl RetrievalPipeline {
    pub fn new(store: Arc<dyn MemoryStore>, config: &RetrievalConfig) -> Self {
        Self {
            store,
            scorer: RelevanceScorer::new(config),
            allocator: TokenBudgetAllocator::new(config.dedup_similarity),
            min_relevance: config.min_relevance,
            candidate_limit: config.candidate_limit,
        }
    }

    /// Most relevant memories that fit the query's token budget.
    ///
    /// Storage failures are absorbed: the result is empty with `error` set.
    pub fn retrieve_relevant(&self, query: &RetrievalQuery) -> RetrievalResult {
        let started = Instant::now();
        let mut result = self.run(query);
        result.elapsed = started.elapsed();

        let elapsed_ms = result.elapsed.as_millis() as u64;
        debug!(
            returned = result.entries.len(),
            candidates = result.candidates_considered,
            total_tokens = result.total_tokens,
            token_budget = result.token_budget,
            elapsed_ms,
            "retrieval finished"
        );
        if result.elapsed > RETRIEVE_TARGET {
            warn!(elapsed_ms, "retrieve exceeded latency target");
        }
        result
    }

    fn run(&self, query: &RetrievalQuery) -> RetrievalResult {
        let mut result = RetrievalResult::empty(query.token_budget);
        if query.token_budget == 0 {
            return result;
        }

        let scoring = ScoringQuery::new(&query.query_text).with_context(query.context.clone());
        if scoring.is_empty() {
            return result;
        }

        // Unlimited: the store orders by recency, the cut happens after ranking
        let filter = SearchFilter {
            memory_types: query.memory_types.clone(),
            time_range: query.time_range,
            keywords: keyword_prefixes(scoring.terms()),
            ..Default::default()
        };

        let candidates = match self.store.search(&filter) {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(error = %e, "candidate fetch failed, returning empty context");
                result.error = Some(e.to_string());
                return result;
            }
        };
        result.candidates_considered = candidates.len();

        let now = Utc::now();
        let mut scored: Vec<ScoredEntry> = candidates
            .into_iter()
            .filter_map(|entry| {
                let score = self.scorer.score_entry(&scoring, &entry, now);
                (score >= self.min_relevance && score > 0.0).then_some(ScoredEntry { entry, score })
            })
            .collect();
        rank(&mut scored);
        scored.truncate(self.candidate_limit);

        let allocation = self.allocator.allocate(scored, query.token_budget);
        result.total_tokens = allocation.total_tokens;
        result.token_counts = allocation.token_counts;
        for selected in allocation.entries {
            result.scores.insert(selected.entry.id.clone(), selected.score);
            result.entries.push(selected.entry);
        }
        result
    }
}

/// Substrings used to narrow the store search.
///
/// Stemmed terms are cut to the shared-prefix length so that the substring
/// search finds every word family the scorer would accept. A short term's
/// trailing `y` is dropped since it may stand for `ies` in the content.
fn keyword_prefixes(terms: &[String]) -> Vec<String> {
    let mut prefixes: Vec<String> = terms
        .iter()
        .map(|t| {
            let prefix: String = t.chars().take(5).collect();
            if prefix.len() == t.len() && prefix.len() >= 3 && prefix.ends_with('y') {
                prefix[..prefix.len() - 1].to_string()
            } else {
                prefix
            }
        })
        .collect();
    prefixes.sort();
    prefixes.dedup();
    prefixes
}
