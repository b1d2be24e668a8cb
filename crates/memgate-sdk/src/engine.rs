//! Main engine entry point
//!
//! Ties the storage and retrieval pipelines to one store and exposes the
//! operations host lifecycle events call into.

use std::sync::Arc;

use memgate_core::{
    DeleteFilter, Error, MemoryEntry, MemoryStats, MemoryStore, MemoryType, Result, SqliteMemoryStore,
};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::retrieval::{RetrievalPipeline, RetrievalQuery, RetrievalResult};
use crate::review::{default_panel, CommandReviewer, Reviewer};
use crate::storage::{StoragePipeline, StorageRequest, StorageResult};

/// memgate engine - main entry point
///
/// # Example
///
/// ```rust,no_run
/// use memgate_core::MemoryType;
/// use memgate_sdk::{EngineConfig, MemoryEngine, StorageRequest};
///
/// async fn example() -> memgate_core::Result<()> {
///     let engine = MemoryEngine::open(EngineConfig::load()?)?;
///
///     engine
///         .store(StorageRequest::new(
///             "Run migrations before restarting the API",
///             MemoryType::Procedural,
///         ))
///         .await?;
///
///     let context = engine.inject_context("how do I restart the API?")?;
///     println!("{}", context);
///     Ok(())
/// }
/// ```
pub struct MemoryEngine {
    config: EngineConfig,
    store: Arc<dyn MemoryStore>,
    storage: StoragePipeline,
    retrieval: RetrievalPipeline,
}

impl MemoryEngine {
    /// Create an engine over an injected store and reviewer panel.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration validation fails.
    pub fn new(
        store: Arc<dyn MemoryStore>,
        reviewers: Vec<Arc<dyn Reviewer>>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;

        let storage = StoragePipeline::new(store.clone(), reviewers, &config);
        let retrieval = RetrievalPipeline::new(store.clone(), &config.retrieval);

        Ok(Self {
            config,
            store,
            storage,
            retrieval,
        })
    }

    /// Open the SQLite store at `config.database_path` with the configured
    /// reviewers, or the built-in panel when none are configured.
    pub fn open(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let store: Arc<dyn MemoryStore> = Arc::new(SqliteMemoryStore::open(&config.database_path)?);

        let reviewers: Vec<Arc<dyn Reviewer>> = if config.review.commands.is_empty() {
            default_panel(store.clone())
        } else {
            config
                .review
                .commands
                .iter()
                .map(|c| Arc::new(CommandReviewer::new(c)) as Arc<dyn Reviewer>)
                .collect()
        };

        info!(
            path = %config.database_path.display(),
            reviewers = reviewers.len(),
            "memory engine opened"
        );
        Self::new(store, reviewers, config)
    }

    /// Get the engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get the underlying store
    pub fn store_handle(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    pub fn is_enabled(&self) -> bool {
        self.config.hooks.enabled
    }

    /// Turn the host hooks on or off.
    pub fn set_enabled(&mut self, enabled: bool) {
        debug!(enabled, "memory hooks toggled");
        self.config.hooks.enabled = enabled;
    }

    /// Override the injected-context budget; `None` restores the default.
    pub fn set_token_budget_override(&mut self, budget: Option<usize>) {
        self.config.hooks.token_budget_override = budget;
    }

    /// Budget used by [`MemoryEngine::retrieve`] and [`MemoryEngine::inject_context`].
    pub fn token_budget(&self) -> usize {
        self.config.hooks.effective_token_budget()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Host hooks
    // ─────────────────────────────────────────────────────────────────────────

    /// Hook entry for storing a memory.
    ///
    /// Returns the stored entry's ID, or the existing ID when the content is
    /// a duplicate. `None` when the hooks are disabled or the memory was
    /// rejected.
    pub async fn store(&self, request: StorageRequest) -> Result<Option<String>> {
        if !self.is_enabled() {
            return Ok(None);
        }
        let result = self.store_with_review(request).await?;
        Ok(result.memory_id)
    }

    /// Hook entry for retrieving memories within the hook token budget.
    pub fn retrieve(&self, query_text: &str) -> Result<Vec<MemoryEntry>> {
        let query = RetrievalQuery::new(query_text, self.token_budget())?;
        if !self.is_enabled() {
            return Ok(Vec::new());
        }
        Ok(self.retrieve_relevant(&query).entries)
    }

    /// Rendered context block for `query_text`, empty when disabled or when
    /// nothing relevant fits the budget.
    pub fn inject_context(&self, query_text: &str) -> Result<String> {
        let query = RetrievalQuery::new(query_text, self.token_budget())?;
        if !self.is_enabled() {
            return Ok(String::new());
        }
        let result = self.retrieve_relevant(&query);
        Ok(result.render(self.config.hooks.group_by_type, self.config.hooks.include_metadata))
    }

    /// Remove every working memory.
    pub fn clear_working_memory(&self) -> Result<usize> {
        let removed = self
            .store
            .delete_where(&DeleteFilter::MemoryType(MemoryType::Working))?;
        info!(removed, "working memory cleared");
        Ok(removed)
    }

    /// Remove every memory.
    pub fn clear_all(&self) -> Result<usize> {
        let removed = self.store.delete_where(&DeleteFilter::All)?;
        info!(removed, "all memories cleared");
        Ok(removed)
    }

    /// Drop the working memories scoped to `task_id`.
    pub fn mark_task_complete(&self, task_id: &str) -> Result<usize> {
        if task_id.trim().is_empty() {
            return Err(Error::invalid_input("task_id must not be empty"));
        }
        let removed = self.store.delete_where(&DeleteFilter::Task(task_id.to_string()))?;
        info!(task_id, removed, "task working memory cleared");
        Ok(removed)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pipelines
    // ─────────────────────────────────────────────────────────────────────────

    /// Run the full review pipeline regardless of the hook switch.
    pub async fn store_with_review(&self, request: StorageRequest) -> Result<StorageResult> {
        self.storage.store_with_review(request).await
    }

    /// Budgeted retrieval regardless of the hook switch.
    pub fn retrieve_relevant(&self, query: &RetrievalQuery) -> RetrievalResult {
        self.retrieval.retrieve_relevant(query)
    }

    pub fn stats(&self) -> Result<MemoryStats> {
        self.store.stats()
    }
}
