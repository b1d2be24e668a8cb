//! Reviewer panel
//!
//! Candidate memories are scored by a panel of independent reviewers. Each
//! reviewer is an opaque oracle behind the [`Reviewer`] trait; its raw JSON
//! answer is validated by [`parse_verdict`] before it may contribute to
//! consensus.
//!
//! ```text
//!              ┌──────────────────────┐
//!   content ──▶│  ReviewCoordinator   │── deadline ──▶ ReviewReport
//!              └──┬────────┬────────┬─┘
//!                 ▼        ▼        ▼
//!            pattern   general   historical      (concurrent, per-reviewer timeout)
//! ```

mod command;
mod coordinator;
mod heuristic;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use command::CommandReviewer;
pub use coordinator::{ReviewCoordinator, ReviewFailure, ReviewReport};
pub use heuristic::{default_panel, GeneralPatternExtractor, HistoricalContextChecker, PatternAnalyzer};

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use memgate_core::{AgentReview, MemoryType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What every reviewer is asked to judge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewRequest {
    pub content: String,
    pub memory_type: MemoryType,
    pub context: BTreeMap<String, String>,
}

impl ReviewRequest {
    pub fn new(content: impl Into<String>, memory_type: MemoryType) -> Self {
        Self {
            content: content.into(),
            memory_type,
            context: BTreeMap::new(),
        }
    }

    pub fn with_context(mut self, context: BTreeMap<String, String>) -> Self {
        self.context = context;
        self
    }
}

/// Why a single review was discarded.
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("reviewer timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("malformed review: {0}")]
    Malformed(String),

    #[error("reviewer failed: {0:#}")]
    Failed(#[from] anyhow::Error),

    #[error("abandoned at panel deadline")]
    Abandoned,
}

/// A scoring oracle.
///
/// Implementations return the raw verdict payload; the coordinator owns
/// validation so that a misbehaving reviewer can never inject a bad score.
#[async_trait]
pub trait Reviewer: Send + Sync {
    /// Stable identifier recorded in provenance.
    fn name(&self) -> &str;

    /// Judge the request, returning `{importance_score, reasoning, confidence?}`.
    async fn review(&self, request: &ReviewRequest) -> Result<serde_json::Value, ReviewError>;
}

#[derive(Deserialize)]
struct VerdictPayload {
    importance_score: i64,
    reasoning: String,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Strictly parse a raw reviewer payload.
///
/// Missing or ill-typed `importance_score`/`reasoning`, blank reasoning, or
/// out-of-range values yield [`ReviewError::Malformed`]. A missing
/// `confidence` defaults to 1.0.
pub fn parse_verdict(reviewer_name: &str, raw: serde_json::Value) -> Result<AgentReview, ReviewError> {
    let payload: VerdictPayload =
        serde_json::from_value(raw).map_err(|e| ReviewError::Malformed(e.to_string()))?;

    if payload.reasoning.trim().is_empty() {
        return Err(ReviewError::Malformed("reasoning is empty".into()));
    }

    AgentReview::new(
        reviewer_name,
        payload.importance_score,
        payload.reasoning,
        payload.confidence.unwrap_or(1.0),
    )
    .map_err(|e| ReviewError::Malformed(e.to_string()))
}
