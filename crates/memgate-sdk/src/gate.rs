//! Quality gate: the single store/reject decision after review.

use serde::{Deserialize, Serialize};

use crate::config::QualityConfig;
use crate::consensus::ConsensusResult;

/// Why the gate refused a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateRejection {
    /// Too few successful reviews to decide.
    InsufficientEvidence,
    /// Consensus too low, or reviewers disagreed beyond the variance limit.
    BelowThreshold,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QualityGate {
    pub threshold: f64,
    pub min_reviews: usize,
    pub max_variance: Option<f64>,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self {
            threshold: 4.0,
            min_reviews: 3,
            max_variance: None,
        }
    }
}

impl QualityGate {
    pub fn new(config: &QualityConfig) -> Self {
        Self {
            threshold: config.threshold,
            min_reviews: config.min_reviews,
            max_variance: config.max_variance,
        }
    }

    /// Check the consensus against every gate condition.
    pub fn evaluate(&self, consensus: &ConsensusResult) -> Result<(), GateRejection> {
        if consensus.review_count < self.min_reviews || !consensus.is_valid() {
            return Err(GateRejection::InsufficientEvidence);
        }
        if !consensus.meets_threshold(self.threshold) {
            return Err(GateRejection::BelowThreshold);
        }
        if self
            .max_variance
            .is_some_and(|max| consensus.score_variance > max)
        {
            return Err(GateRejection::BelowThreshold);
        }
        Ok(())
    }

    pub fn should_store(&self, consensus: &ConsensusResult) -> bool {
        self.evaluate(consensus).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::build_consensus;
    use memgate_core::AgentReview;

    fn reviews(scores: &[i64]) -> Vec<AgentReview> {
        scores
            .iter()
            .enumerate()
            .map(|(i, s)| AgentReview::new(format!("r{}", i), *s, "reason", 1.0).unwrap())
            .collect()
    }

    #[test]
    fn test_gate_threshold_boundary() {
        let gate = QualityGate::default();
        assert!(gate.should_store(&build_consensus(&reviews(&[4, 4, 4]), 3)));
        assert_eq!(
            gate.evaluate(&build_consensus(&reviews(&[4, 4, 3]), 3)),
            Err(GateRejection::BelowThreshold)
        );
    }

    #[test]
    fn test_gate_requires_enough_reviews() {
        let gate = QualityGate::default();
        assert_eq!(
            gate.evaluate(&build_consensus(&reviews(&[10, 10]), 2)),
            Err(GateRejection::InsufficientEvidence)
        );
        assert_eq!(
            gate.evaluate(&build_consensus(&[], 3)),
            Err(GateRejection::InsufficientEvidence)
        );
    }

    #[test]
    fn test_gate_variance_limit() {
        let gate = QualityGate {
            max_variance: Some(4.0),
            ..Default::default()
        };
        assert!(gate.should_store(&build_consensus(&reviews(&[6, 7, 8]), 3)));
        assert_eq!(
            gate.evaluate(&build_consensus(&reviews(&[0, 10, 10]), 3)),
            Err(GateRejection::BelowThreshold)
        );
    }
}
