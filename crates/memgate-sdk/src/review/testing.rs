//! Deterministic reviewer doubles for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{ReviewError, ReviewRequest, Reviewer};

/// Always answers with the same score, optionally after a delay.
#[derive(Debug, Clone)]
pub struct StaticReviewer {
    name: String,
    score: i64,
    confidence: Option<f64>,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl StaticReviewer {
    pub fn new(name: impl Into<String>, score: i64) -> Self {
        Self {
            name: name.into(),
            score,
            confidence: None,
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of times `review` has been invoked, shared across clones.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Reviewer for StaticReviewer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn review(&self, _request: &ReviewRequest) -> Result<serde_json::Value, ReviewError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let mut verdict = json!({
            "importance_score": self.score,
            "reasoning": format!("{} scored {}", self.name, self.score),
        });
        if let Some(confidence) = self.confidence {
            verdict["confidence"] = json!(confidence);
        }
        Ok(verdict)
    }
}

/// Always errors.
#[derive(Debug, Clone)]
pub struct FailingReviewer {
    name: String,
}

impl FailingReviewer {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Reviewer for FailingReviewer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn review(&self, _request: &ReviewRequest) -> Result<serde_json::Value, ReviewError> {
        Err(anyhow::anyhow!("{} is unavailable", self.name).into())
    }
}

/// Returns a fixed payload verbatim, usually one that fails validation.
#[derive(Debug, Clone)]
pub struct MalformedReviewer {
    name: String,
    payload: serde_json::Value,
}

impl MalformedReviewer {
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

#[async_trait]
impl Reviewer for MalformedReviewer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn review(&self, _request: &ReviewRequest) -> Result<serde_json::Value, ReviewError> {
        Ok(self.payload.clone())
    }
}
