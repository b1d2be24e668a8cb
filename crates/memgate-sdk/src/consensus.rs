//! Consensus over reviewer verdicts.

use memgate_core::AgentReview;
use serde::{Deserialize, Serialize};

/// Aggregate of a set of reviews.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    /// Plain mean of the scores.
    pub average_score: f64,
    /// Confidence-weighted mean; equals `average_score` when all
    /// confidences are zero.
    pub weighted_average: f64,
    /// Population variance of the scores.
    pub score_variance: f64,
    pub review_count: usize,
    pub min_reviews: usize,
    /// Whether [`ConsensusResult::score`] reports the weighted mean.
    pub weighted: bool,
}

impl ConsensusResult {
    /// Enough reviews were collected for the result to mean anything.
    pub fn is_valid(&self) -> bool {
        self.review_count >= self.min_reviews && self.review_count > 0
    }

    /// The score used for gating.
    pub fn score(&self) -> f64 {
        if self.weighted {
            self.weighted_average
        } else {
            self.average_score
        }
    }

    pub fn meets_threshold(&self, threshold: f64) -> bool {
        self.score() >= threshold
    }
}

/// Builds [`ConsensusResult`]s.
#[derive(Debug, Clone, Copy)]
pub struct ConsensusBuilder {
    min_reviews: usize,
    weighted: bool,
}

impl Default for ConsensusBuilder {
    fn default() -> Self {
        Self {
            min_reviews: 3,
            weighted: false,
        }
    }
}

impl ConsensusBuilder {
    pub fn new(min_reviews: usize) -> Self {
        Self {
            min_reviews,
            ..Default::default()
        }
    }

    pub fn weighted(mut self, weighted: bool) -> Self {
        self.weighted = weighted;
        self
    }

    pub fn build(&self, reviews: &[AgentReview]) -> ConsensusResult {
        let mut result = ConsensusResult {
            average_score: 0.0,
            weighted_average: 0.0,
            score_variance: 0.0,
            review_count: reviews.len(),
            min_reviews: self.min_reviews,
            weighted: self.weighted,
        };
        if reviews.is_empty() {
            return result;
        }

        let n = reviews.len() as f64;
        let mean = reviews.iter().map(|r| f64::from(r.importance_score)).sum::<f64>() / n;

        let total_weight: f64 = reviews.iter().map(|r| r.confidence).sum();
        let weighted = if total_weight > 0.0 {
            reviews
                .iter()
                .map(|r| f64::from(r.importance_score) * r.confidence)
                .sum::<f64>()
                / total_weight
        } else {
            mean
        };

        let variance = reviews
            .iter()
            .map(|r| (f64::from(r.importance_score) - mean).powi(2))
            .sum::<f64>()
            / n;

        result.average_score = mean;
        result.weighted_average = weighted;
        result.score_variance = variance;
        result
    }
}

/// Aggregate `reviews` with the given minimum.
pub fn build_consensus(reviews: &[AgentReview], min_reviews: usize) -> ConsensusResult {
    ConsensusBuilder::new(min_reviews).build(reviews)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review(score: i64, confidence: f64) -> AgentReview {
        AgentReview::new(format!("r{}", score), score, "because", confidence).unwrap()
    }

    #[test]
    fn test_weighted_average_favors_confident_reviews() {
        let result = build_consensus(&[review(8, 1.0), review(4, 0.5)], 2);
        assert_eq!(result.average_score, 6.0);
        assert!(result.weighted_average > 6.0);
        assert!((result.weighted_average - 20.0 / 3.0).abs() < 1e-9);
        assert_eq!(result.score_variance, 4.0);
    }

    #[test]
    fn test_validity_depends_on_review_count() {
        assert!(!build_consensus(&[review(9, 1.0)], 3).is_valid());
        assert!(build_consensus(&[review(9, 1.0), review(7, 1.0), review(5, 1.0)], 3).is_valid());
        assert!(!build_consensus(&[], 0).is_valid());
    }

    #[test]
    fn test_zero_confidence_falls_back_to_mean() {
        let result = build_consensus(&[review(2, 0.0), review(6, 0.0)], 2);
        assert_eq!(result.weighted_average, 4.0);
    }

    #[test]
    fn test_threshold_uses_selected_average() {
        let reviews = [review(8, 1.0), review(4, 0.5), review(3, 0.1)];
        let plain = ConsensusBuilder::new(3).build(&reviews);
        let weighted = ConsensusBuilder::new(3).weighted(true).build(&reviews);

        assert!(!plain.meets_threshold(6.0));
        assert!(weighted.meets_threshold(6.0));
    }
}
