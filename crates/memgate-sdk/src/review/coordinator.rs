//! Concurrent review fan-out.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use memgate_core::{AgentReview, MemoryType};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::{parse_verdict, ReviewError, ReviewRequest, Reviewer};
use crate::config::ReviewConfig;

/// A reviewer whose verdict was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewFailure {
    pub reviewer_name: String,
    pub reason: String,
}

/// Outcome of one panel run.
#[derive(Debug, Clone, Default)]
pub struct ReviewReport {
    /// Valid verdicts, sorted by reviewer name.
    pub reviews: Vec<AgentReview>,
    pub failures: Vec<ReviewFailure>,
    pub elapsed: Duration,
    /// Whether the panel deadline cut off in-flight reviewers.
    pub deadline_exceeded: bool,
}

/// Dispatches one request to every reviewer at once and collects whatever
/// finishes before the deadline.
pub struct ReviewCoordinator {
    reviewers: Vec<Arc<dyn Reviewer>>,
    reviewer_timeout: Duration,
    deadline: Duration,
}

impl ReviewCoordinator {
    /// Create a coordinator with timeouts taken from config.
    pub fn new(reviewers: Vec<Arc<dyn Reviewer>>, config: &ReviewConfig) -> Self {
        Self::with_timeouts(
            reviewers,
            Duration::from_millis(config.reviewer_timeout_ms),
            Duration::from_millis(config.deadline_ms),
        )
    }

    pub fn with_timeouts(
        reviewers: Vec<Arc<dyn Reviewer>>,
        reviewer_timeout: Duration,
        deadline: Duration,
    ) -> Self {
        Self {
            reviewers,
            reviewer_timeout,
            deadline,
        }
    }

    /// Size of the panel.
    pub fn reviewer_count(&self) -> usize {
        self.reviewers.len()
    }

    /// Score `content` with every reviewer; failed reviewers are omitted.
    ///
    /// An empty list means no reviewer succeeded, which callers must treat
    /// as insufficient evidence rather than a verdict.
    pub async fn review_importance(
        &self,
        content: &str,
        memory_type: MemoryType,
        context: Option<&BTreeMap<String, String>>,
    ) -> Vec<AgentReview> {
        let request = ReviewRequest::new(content, memory_type).with_context(context.cloned().unwrap_or_default());
        self.review(request).await.reviews
    }

    /// Run the panel and report successes, failures and timing.
    pub async fn review(&self, request: ReviewRequest) -> ReviewReport {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.deadline;
        let request = Arc::new(request);

        let mut tasks = JoinSet::new();
        let mut in_flight = HashMap::new();

        for reviewer in &self.reviewers {
            let reviewer = Arc::clone(reviewer);
            let request = Arc::clone(&request);
            let timeout = self.reviewer_timeout;
            let name = reviewer.name().to_string();

            let handle = tasks.spawn(async move {
                match tokio::time::timeout(timeout, reviewer.review(&request)).await {
                    Ok(Ok(raw)) => parse_verdict(reviewer.name(), raw),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(ReviewError::Timeout(timeout)),
                }
            });
            in_flight.insert(handle.id(), name);
        }

        let mut report = ReviewReport::default();

        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next_with_id()).await {
                Ok(Some(Ok((id, outcome)))) => {
                    let name = in_flight.remove(&id).unwrap_or_default();
                    match outcome {
                        Ok(review) => {
                            debug!(reviewer = %name, score = review.importance_score, "review received");
                            report.reviews.push(review);
                        }
                        Err(error) => {
                            warn!(reviewer = %name, error = %error, "review discarded");
                            report.failures.push(ReviewFailure {
                                reviewer_name: name,
                                reason: error.to_string(),
                            });
                        }
                    }
                }
                Ok(Some(Err(join_error))) => {
                    let name = in_flight.remove(&join_error.id()).unwrap_or_default();
                    warn!(reviewer = %name, error = %join_error, "reviewer task panicked");
                    report.failures.push(ReviewFailure {
                        reviewer_name: name,
                        reason: join_error.to_string(),
                    });
                }
                Ok(None) => break,
                Err(_) => {
                    tasks.abort_all();
                    report.deadline_exceeded = true;
                    warn!(
                        pending = in_flight.len(),
                        deadline_ms = self.deadline.as_millis() as u64,
                        "review deadline exceeded, using partial results"
                    );
                    for (_, name) in in_flight.drain() {
                        report.failures.push(ReviewFailure {
                            reviewer_name: name,
                            reason: ReviewError::Abandoned.to_string(),
                        });
                    }
                    break;
                }
            }
        }

        // Aggregation must not depend on completion order
        report.reviews.sort_by(|a, b| a.reviewer_name.cmp(&b.reviewer_name));
        report.failures.sort_by(|a, b| a.reviewer_name.cmp(&b.reviewer_name));
        report.elapsed = started.elapsed();

        debug!(
            succeeded = report.reviews.len(),
            failed = report.failures.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "review panel finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::testing::{FailingReviewer, MalformedReviewer, StaticReviewer};
    use serde_json::json;

    fn panel(reviewers: Vec<Arc<dyn Reviewer>>) -> ReviewCoordinator {
        ReviewCoordinator::with_timeouts(reviewers, Duration::from_millis(300), Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_reviewers_run_concurrently() {
        let coordinator = panel(vec![
            Arc::new(StaticReviewer::new("a", 6).with_delay(Duration::from_millis(100))),
            Arc::new(StaticReviewer::new("b", 7).with_delay(Duration::from_millis(100))),
            Arc::new(StaticReviewer::new("c", 8).with_delay(Duration::from_millis(100))),
        ]);

        let started = Instant::now();
        let reviews = coordinator
            .review_importance("Use feature flags for risky rollouts", MemoryType::Procedural, None)
            .await;
        let elapsed = started.elapsed();

        assert_eq!(reviews.len(), 3);
        assert!(elapsed < Duration::from_millis(200), "took {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_failed_and_malformed_reviews_are_dropped() {
        let coordinator = panel(vec![
            Arc::new(StaticReviewer::new("good", 8)),
            Arc::new(FailingReviewer::new("broken")),
            Arc::new(MalformedReviewer::new("sloppy", json!({"reasoning": "forgot the score"}))),
        ]);

        let report = coordinator
            .review(ReviewRequest::new("Cache invalidation uses Redis pub/sub", MemoryType::Semantic))
            .await;

        assert_eq!(report.reviews.len(), 1);
        assert_eq!(report.reviews[0].reviewer_name, "good");
        let failed: Vec<&str> = report.failures.iter().map(|f| f.reviewer_name.as_str()).collect();
        assert_eq!(failed, vec!["broken", "sloppy"]);
        assert!(!report.deadline_exceeded);
    }

    #[tokio::test]
    async fn test_slow_reviewer_times_out() {
        let coordinator = ReviewCoordinator::with_timeouts(
            vec![
                Arc::new(StaticReviewer::new("fast", 5)),
                Arc::new(StaticReviewer::new("slow", 9).with_delay(Duration::from_secs(5))),
            ],
            Duration::from_millis(50),
            Duration::from_millis(500),
        );

        let started = Instant::now();
        let report = coordinator
            .review(ReviewRequest::new("Staging DB is reset nightly", MemoryType::Semantic))
            .await;

        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(report.reviews.len(), 1);
        assert!(report.failures[0].reason.contains("timed out"));
    }

    #[tokio::test]
    async fn test_deadline_returns_partial_results() {
        let coordinator = ReviewCoordinator::with_timeouts(
            vec![
                Arc::new(StaticReviewer::new("quick", 6).with_delay(Duration::from_millis(10))),
                Arc::new(StaticReviewer::new("stuck", 6).with_delay(Duration::from_secs(5))),
            ],
            Duration::from_secs(10),
            Duration::from_millis(100),
        );

        let started = Instant::now();
        let report = coordinator
            .review(ReviewRequest::new("Releases are cut every other Tuesday", MemoryType::Semantic))
            .await;

        assert!(started.elapsed() < Duration::from_millis(300));
        assert!(report.deadline_exceeded);
        assert_eq!(report.reviews.len(), 1);
        assert_eq!(report.failures, vec![ReviewFailure {
            reviewer_name: "stuck".into(),
            reason: ReviewError::Abandoned.to_string(),
        }]);
    }

    #[tokio::test]
    async fn test_all_reviewers_failing_yields_empty() {
        let coordinator = panel(vec![
            Arc::new(FailingReviewer::new("x")),
            Arc::new(FailingReviewer::new("y")),
        ]);
        let reviews = coordinator
            .review_importance("The VPN drops every 8 hours", MemoryType::Semantic, None)
            .await;
        assert!(reviews.is_empty());
    }

    #[tokio::test]
    async fn test_reviews_sorted_regardless_of_finish_order() {
        let coordinator = panel(vec![
            Arc::new(StaticReviewer::new("zeta", 4)),
            Arc::new(StaticReviewer::new("alpha", 9).with_delay(Duration::from_millis(40))),
        ]);
        let reviews = coordinator
            .review_importance("Never force-push to main", MemoryType::Semantic, None)
            .await;
        let names: Vec<&str> = reviews.iter().map(|r| r.reviewer_name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
