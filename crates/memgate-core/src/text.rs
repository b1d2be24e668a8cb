//! Text utilities shared by the filter, scorer, allocator and stores.
//!
//! Everything here is lexical: terms are lowercase alphanumeric runs with
//! stopwords removed and a light suffix-stripping stemmer applied.

use std::collections::HashSet;

/// Words that carry no topical signal.
const STOPWORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "am", "an", "and", "any", "are", "as", "at", "be",
    "been", "before", "being", "but", "by", "can", "could", "did", "do", "does", "doing", "for",
    "from", "had", "has", "have", "he", "her", "here", "him", "his", "how", "i", "if", "in",
    "into", "is", "it", "its", "just", "me", "more", "most", "my", "of", "on", "once", "only",
    "or", "other", "our", "out", "over", "own", "she", "so", "some", "such", "than", "that",
    "the", "their", "them", "then", "there", "these", "they", "this", "those", "through", "to",
    "too", "under", "until", "up", "us", "very", "was", "we", "were", "what", "when", "where",
    "which", "while", "who", "whom", "why", "will", "with", "would", "you", "your",
];

/// Minimum shared prefix for two terms to count as the same word family.
const PREFIX_MATCH_LEN: usize = 5;

/// Lowercase and collapse all whitespace runs to single spaces.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercase alphanumeric words of at least two characters, stopwords removed.
///
/// Words are returned unstemmed so they can be used for substring search.
pub fn significant_words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 2 && !STOPWORDS.contains(w))
        .map(String::from)
        .collect()
}

/// Stemmed terms in document order.
pub fn terms(text: &str) -> Vec<String> {
    significant_words(text).iter().map(|w| stem(w)).collect()
}

/// Distinct stemmed terms.
pub fn term_set(text: &str) -> HashSet<String> {
    terms(text).into_iter().collect()
}

/// Strip common English inflections.
pub fn stem(word: &str) -> String {
    let len = word.len();
    if !word.is_ascii() || len <= 3 {
        return word.to_string();
    }

    if let Some(base) = word.strip_suffix("ies") {
        if base.len() >= 2 {
            return format!("{}y", base);
        }
    }
    if let Some(base) = word.strip_suffix("es") {
        if ["s", "x", "z", "ch", "sh"].iter().any(|s| base.ends_with(s)) && base.len() >= 2 {
            return base.to_string();
        }
    }
    for suffix in ["ing", "ed"] {
        if let Some(base) = word.strip_suffix(suffix) {
            if base.len() >= 3 {
                return base.to_string();
            }
        }
    }
    if let Some(base) = word.strip_suffix('s') {
        if !base.ends_with('s') && base.len() >= 3 {
            return base.to_string();
        }
    }

    word.to_string()
}

/// Whether two stemmed terms refer to the same word family.
///
/// Equal terms match; otherwise both terms must be long enough and share a
/// [`PREFIX_MATCH_LEN`] prefix (`authenticate` / `authentication`).
pub fn terms_match(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    if a.len() < PREFIX_MATCH_LEN || b.len() < PREFIX_MATCH_LEN || !a.is_ascii() || !b.is_ascii() {
        return false;
    }
    a.as_bytes()[..PREFIX_MATCH_LEN] == b.as_bytes()[..PREFIX_MATCH_LEN]
}

/// Jaccard similarity of two term sets.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

/// Content similarity in `[0, 1]`: 1.0 for normalized-identical text,
/// otherwise the Jaccard similarity of the stemmed term sets.
pub fn similarity(a: &str, b: &str) -> f64 {
    if normalize(a) == normalize(b) {
        return 1.0;
    }
    jaccard(&term_set(a), &term_set(b))
}

/// Adjacent stemmed term pairs, so word order counts. A single-term text
/// yields the term itself.
pub fn term_pairs(text: &str) -> HashSet<String> {
    let terms = terms(text);
    if terms.len() < 2 {
        return terms.into_iter().collect();
    }
    terms.windows(2).map(|w| format!("{} {}", w[0], w[1])).collect()
}

/// Order-sensitive similarity in `[0, 1]`: 1.0 for normalized-identical
/// text, otherwise the Jaccard similarity of the adjacent term pairs.
///
/// Reordering words that changes meaning ("backend before frontend" vs
/// "frontend before backend") scores low here but 1.0 under [`similarity`].
pub fn sequence_similarity(a: &str, b: &str) -> f64 {
    if normalize(a) == normalize(b) {
        return 1.0;
    }
    jaccard(&term_pairs(a), &term_pairs(b))
}

/// Estimate token count from text (~4 chars per token heuristic).
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}
