//! Trivial content filter.
//!
//! A cheap, reviewer-free check run before anything else in the storage
//! pipeline. Rejects content that is too short, has no alphanumeric text,
//! or is made up entirely of conversational filler ("ok thanks!").

use memgate_core::text::normalize;

use crate::config::FilterConfig;

/// Words that never carry memorable information on their own.
const FILLER_WORDS: &[&str] = &[
    "alright", "awesome", "bye", "cheers", "cool", "good", "got", "great", "hello", "hey", "hi",
    "it", "k", "lol", "morning", "nice", "no", "nope", "np", "ok", "okay", "perfect", "please",
    "sounds", "sure", "thank", "thanks", "thx", "ty", "yeah", "yep", "yes", "you",
];

/// Pure pre-rejection filter.
#[derive(Debug, Clone)]
pub struct TrivialFilter {
    min_length: usize,
    extra_patterns: Vec<String>,
}

impl Default for TrivialFilter {
    fn default() -> Self {
        Self::new(&FilterConfig::default())
    }
}

impl TrivialFilter {
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            min_length: config.min_length,
            extra_patterns: config
                .extra_patterns
                .iter()
                .map(|p| strip_punctuation(&normalize(p)))
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Whether `content` is not worth sending to reviewers.
    pub fn is_trivial(&self, content: &str) -> bool {
        let trimmed = content.trim();
        if trimmed.chars().count() < self.min_length {
            return true;
        }

        if !trimmed.chars().any(char::is_alphanumeric) {
            return true;
        }

        let normalized = strip_punctuation(&normalize(trimmed));
        if self.extra_patterns.iter().any(|p| *p == normalized) {
            return true;
        }

        normalized
            .split_whitespace()
            .all(|word| FILLER_WORDS.contains(&word))
    }
}

/// Drop everything but alphanumerics and spaces.
fn strip_punctuation(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_content_is_trivial() {
        let filter = TrivialFilter::default();
        assert!(filter.is_trivial(""));
        assert!(filter.is_trivial("   fix   "));
        assert!(filter.is_trivial("---------------"));
    }

    #[test]
    fn test_filler_is_trivial() {
        let filter = TrivialFilter::default();
        assert!(filter.is_trivial("ok thanks!!"));
        assert!(filter.is_trivial("Thank you, sounds good."));
        assert!(filter.is_trivial("hey hey hey hey"));
    }

    #[test]
    fn test_substantive_content_passes() {
        let filter = TrivialFilter::default();
        assert!(!filter.is_trivial("Use `cargo nextest run` instead of cargo test in CI"));
        assert!(!filter.is_trivial("Thanks to the retry fix, the flaky auth test now passes"));
    }

    #[test]
    fn test_extra_patterns() {
        let filter = TrivialFilter::new(&FilterConfig {
            min_length: 5,
            extra_patterns: vec!["Let me check.".into()],
        });
        assert!(filter.is_trivial("let me   check"));
        assert!(!filter.is_trivial("let me check the deploy logs for errors"));
    }
}
