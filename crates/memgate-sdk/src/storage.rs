//! Storage pipeline: filter, dedupe, review, gate, persist.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use memgate_core::text::{sequence_similarity, significant_words};
use memgate_core::types::TASK_ID_KEY;
use memgate_core::{
    AgentReview, Error, MemoryEntry, MemoryStore, MemoryType, NewMemoryEntry, Result, SearchFilter,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::consensus::{ConsensusBuilder, ConsensusResult};
use crate::filter::TrivialFilter;
use crate::gate::{GateRejection, QualityGate};
use crate::review::{ReviewCoordinator, ReviewRequest, Reviewer};

/// Store path latency target.
const STORE_TARGET: Duration = Duration::from_millis(500);

/// Keywords used to find near-duplicate candidates.
const DUPLICATE_KEYWORDS: usize = 12;
const DUPLICATE_CANDIDATES: usize = 50;

/// A candidate memory submitted for review.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageRequest {
    pub content: String,
    pub memory_type: MemoryType,
    pub context: BTreeMap<String, String>,
    /// Caller metadata, persisted alongside review provenance.
    pub metadata: Map<String, Value>,
    pub source: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl StorageRequest {
    pub fn new(content: impl Into<String>, memory_type: MemoryType) -> Self {
        Self {
            content: content.into(),
            memory_type,
            context: BTreeMap::new(),
            metadata: Map::new(),
            source: None,
            timestamp: None,
        }
    }

    pub fn with_context(mut self, context: BTreeMap<String, String>) -> Self {
        self.context = context;
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Why a memory was not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    TrivialFilter,
    Duplicate,
    BelowThreshold,
    InsufficientEvidence,
    StorageError,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::TrivialFilter => "trivial_filter",
            RejectionReason::Duplicate => "duplicate",
            RejectionReason::BelowThreshold => "below_threshold",
            RejectionReason::InsufficientEvidence => "insufficient_evidence",
            RejectionReason::StorageError => "storage_error",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<GateRejection> for RejectionReason {
    fn from(rejection: GateRejection) -> Self {
        match rejection {
            GateRejection::InsufficientEvidence => RejectionReason::InsufficientEvidence,
            GateRejection::BelowThreshold => RejectionReason::BelowThreshold,
        }
    }
}

/// Outcome of [`StoragePipeline::store_with_review`].
#[derive(Debug, Clone, PartialEq)]
pub struct StorageResult {
    pub stored: bool,
    /// New entry ID when stored; the existing entry's ID for duplicates.
    pub memory_id: Option<String>,
    pub rejection_reason: Option<RejectionReason>,
    pub consensus: Option<ConsensusResult>,
    pub reviews: Vec<AgentReview>,
    /// Set for `storage_error`.
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl StorageResult {
    fn rejected(reason: RejectionReason) -> Self {
        Self {
            stored: false,
            memory_id: None,
            rejection_reason: Some(reason),
            consensus: None,
            reviews: Vec::new(),
            error: None,
            elapsed: Duration::ZERO,
        }
    }

    fn duplicate_of(existing_id: String) -> Self {
        Self {
            memory_id: Some(existing_id),
            ..Self::rejected(RejectionReason::Duplicate)
        }
    }

    fn storage_error(err: &Error) -> Self {
        Self {
            error: Some(err.to_string()),
            ..Self::rejected(RejectionReason::StorageError)
        }
    }
}

/// Orchestrates the store path.
pub struct StoragePipeline {
    store: Arc<dyn MemoryStore>,
    coordinator: ReviewCoordinator,
    filter: TrivialFilter,
    consensus: ConsensusBuilder,
    gate: QualityGate,
    duplicate_similarity: f64,
    /// Serializes the duplicate re-check with the insert.
    write_lock: Mutex<()>,
}

impl StoragePipeline {
    pub fn new(store: Arc<dyn MemoryStore>, reviewers: Vec<Arc<dyn Reviewer>>, config: &EngineConfig) -> Self {
        Self {
            store,
            coordinator: ReviewCoordinator::new(reviewers, &config.review),
            filter: TrivialFilter::new(&config.filter),
            consensus: ConsensusBuilder::new(config.quality.min_reviews).weighted(config.quality.weighted),
            gate: QualityGate::new(&config.quality),
            duplicate_similarity: config.quality.duplicate_similarity,
            write_lock: Mutex::new(()),
        }
    }

    /// Review `request` and persist it if the panel agrees it is worth keeping.
    ///
    /// Only blank content is an error; every other outcome, including
    /// persistence failures, is reported in the returned [`StorageResult`].
    pub async fn store_with_review(&self, request: StorageRequest) -> Result<StorageResult> {
        let started = Instant::now();
        if request.content.trim().is_empty() {
            return Err(Error::invalid_input("content must not be empty"));
        }

        let mut result = self.run(request).await;
        result.elapsed = started.elapsed();

        let elapsed_ms = result.elapsed.as_millis() as u64;
        match (&result.memory_id, result.rejection_reason) {
            (Some(id), None) => info!(memory_id = %id, elapsed_ms, "memory stored"),
            (_, Some(reason)) => debug!(reason = %reason, elapsed_ms, "memory not stored"),
            (None, None) => {}
        }
        if result.elapsed > STORE_TARGET {
            warn!(elapsed_ms, "store exceeded latency target");
        }
        Ok(result)
    }

    async fn run(&self, request: StorageRequest) -> StorageResult {
        if self.filter.is_trivial(&request.content) {
            return StorageResult::rejected(RejectionReason::TrivialFilter);
        }

        match self.find_duplicate(&request) {
            Ok(Some(existing)) => return StorageResult::duplicate_of(existing.id),
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "duplicate check failed");
                return StorageResult::storage_error(&e);
            }
        }

        let report = self
            .coordinator
            .review(ReviewRequest::new(request.content.clone(), request.memory_type).with_context(request.context.clone()))
            .await;
        let consensus = self.consensus.build(&report.reviews);

        if let Err(rejection) = self.gate.evaluate(&consensus) {
            debug!(
                score = consensus.score(),
                reviews = consensus.review_count,
                variance = consensus.score_variance,
                ?rejection,
                "quality gate rejected memory"
            );
            return StorageResult {
                consensus: Some(consensus),
                reviews: report.reviews,
                ..StorageResult::rejected(rejection.into())
            };
        }

        let persisted = self.persist(request, &report.reviews, &consensus).await;
        match persisted {
            Ok(Persisted::Inserted(id)) => StorageResult {
                stored: true,
                memory_id: Some(id),
                rejection_reason: None,
                consensus: Some(consensus),
                reviews: report.reviews,
                error: None,
                elapsed: Duration::ZERO,
            },
            Ok(Persisted::Duplicate(existing_id)) => StorageResult {
                consensus: Some(consensus),
                reviews: report.reviews,
                ..StorageResult::duplicate_of(existing_id)
            },
            Err(e) => {
                warn!(error = %e, "failed to persist accepted memory");
                StorageResult {
                    consensus: Some(consensus),
                    reviews: report.reviews,
                    ..StorageResult::storage_error(&e)
                }
            }
        }
    }

    async fn persist(
        &self,
        request: StorageRequest,
        reviews: &[AgentReview],
        consensus: &ConsensusResult,
    ) -> Result<Persisted> {
        let _guard = self.write_lock.lock().await;

        // Another store may have landed the same content while we were reviewing
        if let Some(existing) = self.find_duplicate(&request)? {
            return Ok(Persisted::Duplicate(existing.id));
        }

        let metadata = provenance(&request, reviews, consensus);
        let mut entry = NewMemoryEntry::new(request.content, request.memory_type)?
            .with_context(request.context)
            .with_metadata(metadata);
        if let Some(timestamp) = request.timestamp {
            entry = entry.with_timestamp(timestamp);
        }

        self.store.insert(entry).map(Persisted::Inserted)
    }

    /// Exact hash match first, then a keyword-narrowed similarity scan.
    ///
    /// Only entries of the request's memory type count; working memory must
    /// also belong to the same task.
    fn find_duplicate(&self, request: &StorageRequest) -> Result<Option<MemoryEntry>> {
        let task_id = match request.memory_type {
            MemoryType::Working => request.context.get(TASK_ID_KEY).map(String::as_str),
            _ => None,
        };
        let in_scope = |entry: &MemoryEntry| {
            entry.memory_type == request.memory_type
                && (request.memory_type != MemoryType::Working || entry.task_id() == task_id)
        };
        let scope = SearchFilter {
            memory_types: vec![request.memory_type],
            context: task_id
                .map(|t| BTreeMap::from([(TASK_ID_KEY.to_string(), t.to_string())]))
                .unwrap_or_default(),
            ..Default::default()
        };

        let exact = self.store.search(&SearchFilter {
            content_hash: Some(memgate_core::hashing::content_hash(&request.content)),
            ..scope.clone()
        })?;
        if let Some(existing) = exact.into_iter().find(|e| in_scope(e)) {
            return Ok(Some(existing));
        }

        let mut seen = HashSet::new();
        let keywords: Vec<String> = significant_words(&request.content)
            .into_iter()
            .filter(|w| seen.insert(w.clone()))
            .take(DUPLICATE_KEYWORDS)
            .collect();
        if keywords.is_empty() {
            return Ok(None);
        }

        let candidates = self.store.search(&SearchFilter {
            keywords,
            limit: Some(DUPLICATE_CANDIDATES),
            ..scope
        })?;

        Ok(candidates.into_iter().find(|c| {
            in_scope(c) && sequence_similarity(&request.content, &c.content) >= self.duplicate_similarity
        }))
    }
}

enum Persisted {
    Inserted(String),
    Duplicate(String),
}

/// Metadata recorded with every stored entry.
fn provenance(request: &StorageRequest, reviews: &[AgentReview], consensus: &ConsensusResult) -> Map<String, Value> {
    let mut metadata = request.metadata.clone();

    let mean_confidence = if reviews.is_empty() {
        0.0
    } else {
        reviews.iter().map(|r| r.confidence).sum::<f64>() / reviews.len() as f64
    };

    metadata.insert(
        "reviews".into(),
        Value::Array(
            reviews
                .iter()
                .map(|r| {
                    json!({
                        "reviewer": r.reviewer_name,
                        "importance_score": r.importance_score,
                        "reasoning": r.reasoning,
                        "confidence": r.confidence,
                    })
                })
                .collect(),
        ),
    );
    metadata.insert(
        "consensus".into(),
        json!({
            "average_score": consensus.average_score,
            "weighted_average": consensus.weighted_average,
            "score_variance": consensus.score_variance,
            "review_count": consensus.review_count,
        }),
    );
    metadata.insert("confidence".into(), json!(mean_confidence));
    if let Some(source) = &request.source {
        metadata.insert("source".into(), json!(source));
    }
    if let Some(task_id) = request.context.get(memgate_core::types::TASK_ID_KEY) {
        metadata.insert(memgate_core::types::TASK_ID_KEY.into(), json!(task_id));
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::testing::{FailingReviewer, StaticReviewer};
    use memgate_core::{DeleteFilter, InMemoryStore, MemoryStats};

    fn panel(scores: &[i64]) -> Vec<Arc<dyn Reviewer>> {
        scores
            .iter()
            .enumerate()
            .map(|(i, s)| Arc::new(StaticReviewer::new(format!("reviewer-{}", i), *s)) as Arc<dyn Reviewer>)
            .collect()
    }

    fn pipeline(store: Arc<dyn MemoryStore>, reviewers: Vec<Arc<dyn Reviewer>>) -> StoragePipeline {
        StoragePipeline::new(store, reviewers, &EngineConfig::default())
    }

    /// Store whose writes always fail.
    struct FailingStore {
        inner: InMemoryStore,
    }

    impl MemoryStore for FailingStore {
        fn insert(&self, _entry: NewMemoryEntry) -> Result<String> {
            Err(Error::Other(anyhow::anyhow!("disk full")))
        }
        fn get_by_id(&self, id: &str) -> Result<Option<MemoryEntry>> {
            self.inner.get_by_id(id)
        }
        fn search(&self, filter: &SearchFilter) -> Result<Vec<MemoryEntry>> {
            self.inner.search(filter)
        }
        fn find_by_hash(&self, hash: &str) -> Result<Option<MemoryEntry>> {
            self.inner.find_by_hash(hash)
        }
        fn delete_where(&self, filter: &DeleteFilter) -> Result<usize> {
            self.inner.delete_where(filter)
        }
        fn stats(&self) -> Result<MemoryStats> {
            self.inner.stats()
        }
    }

    #[tokio::test]
    async fn test_accepted_memory_is_stored_with_provenance() {
        let store = Arc::new(InMemoryStore::new());
        let pipeline = pipeline(store.clone(), panel(&[6, 7, 8]));

        let mut context = BTreeMap::new();
        context.insert("task_id".to_string(), "task-42".to_string());
        let result = pipeline
            .store_with_review(
                StorageRequest::new("Run database migrations before restarting the API", MemoryType::Procedural)
                    .with_context(context)
                    .with_source("session-7"),
            )
            .await
            .unwrap();

        assert!(result.stored);
        assert_eq!(result.rejection_reason, None);
        assert_eq!(result.reviews.len(), 3);

        let entry = store.get_by_id(result.memory_id.as_deref().unwrap()).unwrap().unwrap();
        assert_eq!(entry.metadata["reviews"].as_array().unwrap().len(), 3);
        assert_eq!(entry.metadata["reviews"][0]["reasoning"], "reviewer-0 scored 6");
        assert_eq!(entry.metadata["consensus"]["average_score"], 7.0);
        assert_eq!(entry.metadata["source"], "session-7");
        assert_eq!(entry.metadata["task_id"], "task-42");
    }

    #[tokio::test]
    async fn test_blank_content_is_invalid_input() {
        let pipeline = pipeline(Arc::new(InMemoryStore::new()), panel(&[8, 8, 8]));
        let err = pipeline
            .store_with_review(StorageRequest::new("   ", MemoryType::Semantic))
            .await
            .unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[tokio::test]
    async fn test_trivial_content_skips_reviewers() {
        let reviewer = StaticReviewer::new("counter", 9);
        let pipeline = pipeline(Arc::new(InMemoryStore::new()), vec![Arc::new(reviewer.clone())]);

        let result = pipeline
            .store_with_review(StorageRequest::new("ok thanks!", MemoryType::Episodic))
            .await
            .unwrap();

        assert!(!result.stored);
        assert_eq!(result.rejection_reason, Some(RejectionReason::TrivialFilter));
        assert_eq!(reviewer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_identical_content_is_duplicate() {
        let store = Arc::new(InMemoryStore::new());
        let pipeline = pipeline(store.clone(), panel(&[7, 7, 7]));
        let content = "The staging cluster uses spot instances";

        let first = pipeline
            .store_with_review(StorageRequest::new(content, MemoryType::Semantic))
            .await
            .unwrap();
        let second = pipeline
            .store_with_review(StorageRequest::new(content, MemoryType::Semantic))
            .await
            .unwrap();
        let near = pipeline
            .store_with_review(StorageRequest::new("  the STAGING cluster uses spot instances ", MemoryType::Semantic))
            .await
            .unwrap();

        assert!(first.stored);
        assert_eq!(second.rejection_reason, Some(RejectionReason::Duplicate));
        assert_eq!(second.memory_id, first.memory_id);
        assert_eq!(near.rejection_reason, Some(RejectionReason::Duplicate));
        assert_eq!(store.stats().unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_working_memory_duplicates_are_task_scoped() {
        let store = Arc::new(InMemoryStore::new());
        let pipeline = pipeline(store.clone(), panel(&[7, 7, 7]));
        let content = "Bisecting the flaky login test on the release branch";
        let task = |id: &str| BTreeMap::from([(TASK_ID_KEY.to_string(), id.to_string())]);

        let first = pipeline
            .store_with_review(StorageRequest::new(content, MemoryType::Working).with_context(task("task-1")))
            .await
            .unwrap();
        let second = pipeline
            .store_with_review(StorageRequest::new(content, MemoryType::Working).with_context(task("task-2")))
            .await
            .unwrap();
        let repeat = pipeline
            .store_with_review(StorageRequest::new(content, MemoryType::Working).with_context(task("task-2")))
            .await
            .unwrap();
        let episodic = pipeline
            .store_with_review(StorageRequest::new(content, MemoryType::Episodic))
            .await
            .unwrap();

        assert!(first.stored);
        assert!(second.stored);
        assert_ne!(second.memory_id, first.memory_id);
        assert_eq!(repeat.rejection_reason, Some(RejectionReason::Duplicate));
        assert_eq!(repeat.memory_id, second.memory_id);
        assert!(episodic.stored);

        assert_eq!(store.delete_where(&DeleteFilter::Task("task-1".into())).unwrap(), 1);
        let remaining = store.get_by_id(second.memory_id.as_deref().unwrap()).unwrap().unwrap();
        assert_eq!(remaining.task_id(), Some("task-2"));
        assert_eq!(store.stats().unwrap().total, 2);
    }

    #[tokio::test]
    async fn test_reordered_content_with_new_meaning_is_stored() {
        let store = Arc::new(InMemoryStore::new());
        let pipeline = pipeline(store.clone(), panel(&[7, 7, 7]));

        let backend_first = pipeline
            .store_with_review(StorageRequest::new("Deploy the backend before the frontend", MemoryType::Procedural))
            .await
            .unwrap();
        let frontend_first = pipeline
            .store_with_review(StorageRequest::new("Deploy the frontend before the backend", MemoryType::Procedural))
            .await
            .unwrap();

        assert!(backend_first.stored);
        assert!(frontend_first.stored);
        assert_ne!(frontend_first.memory_id, backend_first.memory_id);
        assert_eq!(store.stats().unwrap().total, 2);
    }

    #[tokio::test]
    async fn test_concurrent_identical_stores_yield_one_entry() {
        let store = Arc::new(InMemoryStore::new());
        let pipeline = Arc::new(pipeline(store.clone(), panel(&[7, 7, 7])));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let pipeline = Arc::clone(&pipeline);
            handles.push(tokio::spawn(async move {
                pipeline
                    .store_with_review(StorageRequest::new("Feature flags live in LaunchDarkly", MemoryType::Semantic))
                    .await
                    .unwrap()
            }));
        }

        let mut stored = 0;
        for handle in handles {
            if handle.await.unwrap().stored {
                stored += 1;
            }
        }
        assert_eq!(stored, 1);
        assert_eq!(store.stats().unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_threshold_decides_storage() {
        let low = pipeline(Arc::new(InMemoryStore::new()), panel(&[3, 4, 4]));
        let result = low
            .store_with_review(StorageRequest::new("Lunch is at noon on Fridays", MemoryType::Episodic))
            .await
            .unwrap();
        assert_eq!(result.rejection_reason, Some(RejectionReason::BelowThreshold));
        assert!(result.consensus.unwrap().average_score < 4.0);

        let high = pipeline(Arc::new(InMemoryStore::new()), panel(&[4, 4, 4]));
        let result = high
            .store_with_review(StorageRequest::new("Lunch is at noon on Fridays", MemoryType::Episodic))
            .await
            .unwrap();
        assert!(result.stored);
    }

    #[tokio::test]
    async fn test_all_reviewers_failing_is_insufficient_evidence() {
        let pipeline = pipeline(
            Arc::new(InMemoryStore::new()),
            vec![
                Arc::new(FailingReviewer::new("a")),
                Arc::new(FailingReviewer::new("b")),
                Arc::new(StaticReviewer::new("c", 10)),
            ],
        );
        let result = pipeline
            .store_with_review(StorageRequest::new("Use pnpm instead of npm in this repo", MemoryType::Procedural))
            .await
            .unwrap();
        assert!(!result.stored);
        assert_eq!(result.rejection_reason, Some(RejectionReason::InsufficientEvidence));
    }

    #[tokio::test]
    async fn test_persistence_failure_is_storage_error() {
        let pipeline = pipeline(
            Arc::new(FailingStore { inner: InMemoryStore::new() }),
            panel(&[9, 9, 9]),
        );
        let result = pipeline
            .store_with_review(StorageRequest::new("Secrets are stored in Vault under kv/app", MemoryType::Semantic))
            .await
            .unwrap();

        assert!(!result.stored);
        assert_eq!(result.memory_id, None);
        assert_eq!(result.rejection_reason, Some(RejectionReason::StorageError));
        assert!(result.error.unwrap().contains("disk full"));
    }

    #[test]
    fn test_rejection_reason_names() {
        assert_eq!(RejectionReason::InsufficientEvidence.as_str(), "insufficient_evidence");
        assert_eq!(
            serde_json::to_string(&RejectionReason::TrivialFilter).unwrap(),
            "\"trivial_filter\""
        );
    }
}
