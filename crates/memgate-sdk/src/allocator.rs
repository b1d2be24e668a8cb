//! Greedy token budget packing.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use memgate_core::text::{estimate_tokens, jaccard, normalize, term_pairs};
use memgate_core::MemoryEntry;

/// A retrieval candidate with its relevance.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntry {
    pub entry: MemoryEntry,
    pub score: f64,
}

impl ScoredEntry {
    /// Estimated token cost of injecting this entry.
    pub fn tokens(&self) -> usize {
        estimate_tokens(&self.entry.content)
    }
}

/// Relevance descending, then newest first, then ID for a total order.
pub fn rank(candidates: &mut [ScoredEntry]) {
    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.entry.timestamp.cmp(&a.entry.timestamp))
            .then_with(|| a.entry.id.cmp(&b.entry.id))
    });
}

/// Entries chosen for a budget.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Allocation {
    /// Selected entries in rank order.
    pub entries: Vec<ScoredEntry>,
    pub total_tokens: usize,
    /// Token cost per selected entry ID.
    pub token_counts: HashMap<String, usize>,
    pub budget: usize,
    pub skipped_over_budget: usize,
    pub skipped_duplicates: usize,
}

#[derive(Debug, Clone)]
pub struct TokenBudgetAllocator {
    dedup_similarity: f64,
}

impl Default for TokenBudgetAllocator {
    fn default() -> Self {
        Self { dedup_similarity: 0.9 }
    }
}

impl TokenBudgetAllocator {
    pub fn new(dedup_similarity: f64) -> Self {
        Self { dedup_similarity }
    }

    /// Pack candidates into `budget` tokens, highest ranked first.
    ///
    /// A candidate that does not fit is skipped and packing continues with
    /// smaller ones. Candidates near-identical to an already selected entry
    /// are skipped even when they fit.
    pub fn allocate(&self, mut candidates: Vec<ScoredEntry>, budget: usize) -> Allocation {
        let mut allocation = Allocation {
            budget,
            ..Default::default()
        };
        if budget == 0 {
            return allocation;
        }

        rank(&mut candidates);
        let mut selected_text: Vec<(String, HashSet<String>)> = Vec::new();

        for candidate in candidates {
            if allocation.total_tokens >= budget {
                allocation.skipped_over_budget += 1;
                continue;
            }

            let tokens = candidate.tokens();
            if allocation.total_tokens + tokens > budget {
                allocation.skipped_over_budget += 1;
                continue;
            }

            let normalized = normalize(&candidate.entry.content);
            let terms = term_pairs(&candidate.entry.content);
            let redundant = selected_text
                .iter()
                .any(|(n, t)| *n == normalized || jaccard(t, &terms) >= self.dedup_similarity);
            if redundant {
                allocation.skipped_duplicates += 1;
                continue;
            }

            allocation.total_tokens += tokens;
            allocation.token_counts.insert(candidate.entry.id.clone(), tokens);
            selected_text.push((normalized, terms));
            allocation.entries.push(candidate);
        }

        allocation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use memgate_core::{MemoryType, NewMemoryEntry};

    fn candidate(id: &str, content: &str, score: f64, age_days: i64) -> ScoredEntry {
        ScoredEntry {
            entry: NewMemoryEntry::new(content, MemoryType::Semantic)
                .unwrap()
                .with_timestamp(Utc::now() - Duration::days(age_days))
                .into_entry(id.to_string()),
            score,
        }
    }

    #[test]
    fn test_zero_budget_is_empty() {
        let allocation = TokenBudgetAllocator::default()
            .allocate(vec![candidate("a", "Short entry about deploys", 0.9, 0)], 0);
        assert!(allocation.entries.is_empty());
        assert_eq!(allocation.total_tokens, 0);
    }

    #[test]
    fn test_never_exceeds_budget_and_skips_large_entries() {
        let large = "x".repeat(400);
        let allocation = TokenBudgetAllocator::default().allocate(
            vec![
                candidate("big", &large, 0.95, 0),
                candidate("small-1", "Service A talks to Service B over gRPC", 0.9, 0),
                candidate("small-2", "The billing job runs at 02:00 UTC", 0.8, 0),
            ],
            30,
        );

        let ids: Vec<&str> = allocation.entries.iter().map(|e| e.entry.id.as_str()).collect();
        assert_eq!(ids, vec!["small-1", "small-2"]);
        assert!(allocation.total_tokens <= 30);
        assert_eq!(allocation.skipped_over_budget, 1);
        assert_eq!(allocation.token_counts["small-1"], 10);
    }

    #[test]
    fn test_ties_prefer_recent() {
        let allocation = TokenBudgetAllocator::default().allocate(
            vec![
                candidate("old", "Use the staging VPN profile", 0.8, 10),
                candidate("new", "Cache keys are prefixed by tenant", 0.8, 1),
            ],
            100,
        );
        assert_eq!(allocation.entries[0].entry.id, "new");
    }

    #[test]
    fn test_near_duplicates_are_skipped() {
        let allocation = TokenBudgetAllocator::default().allocate(
            vec![
                candidate("a", "Restart the ingest worker after config changes", 0.9, 0),
                candidate("b", "restart the ingest worker after config changes!", 0.85, 0),
                candidate("c", "Ingest worker logs go to /var/log/ingest", 0.7, 0),
            ],
            1000,
        );
        let ids: Vec<&str> = allocation.entries.iter().map(|e| e.entry.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(allocation.skipped_duplicates, 1);
    }

    #[test]
    fn test_reordered_content_is_not_redundant() {
        let allocation = TokenBudgetAllocator::default().allocate(
            vec![
                candidate("a", "Deploy the backend before the frontend", 0.9, 0),
                candidate("b", "Deploy the frontend before the backend", 0.8, 0),
            ],
            1000,
        );
        assert_eq!(allocation.entries.len(), 2);
        assert_eq!(allocation.skipped_duplicates, 0);
    }
}
