//! memgate SDK - Reviewed Memory Storage and Budgeted Retrieval
//!
//! Everything the engine does on top of `memgate-core`:
//!
//! # Storage path
//!
//! - **filter** - Cheap trivial-content pre-rejection
//! - **review** - Reviewer trait, concurrent coordinator, built-in and command reviewers
//! - **consensus** - Score aggregation (mean, confidence-weighted mean, variance)
//! - **gate** - Store/reject decision
//! - **storage** - The full store pipeline with duplicate detection and provenance
//!
//! # Retrieval path
//!
//! - **relevance** - Lexical relevance with recency and type priority
//! - **allocator** - Greedy token budget packing with deduplication
//! - **retrieval** - Candidate fetch, scoring and packing
//! - **formatter** - Markdown context rendering
//!
//! # Example
//!
//! ```rust,no_run
//! use memgate_core::MemoryType;
//! use memgate_sdk::{EngineConfig, MemoryEngine, RetrievalQuery, StorageRequest};
//!
//! async fn example() -> memgate_core::Result<()> {
//!     memgate_sdk::telemetry::init_tracing(false);
//!     let engine = MemoryEngine::open(EngineConfig::default())?;
//!
//!     let result = engine
//!         .store_with_review(StorageRequest::new(
//!             "Use `cargo nextest` in CI; plain cargo test times out",
//!             MemoryType::Procedural,
//!         ))
//!         .await?;
//!     println!("stored: {}", result.stored);
//!
//!     let context = engine.retrieve_relevant(&RetrievalQuery::new("CI test timeouts", 500)?);
//!     println!("{}", context.render(true, false));
//!     Ok(())
//! }
//! ```

pub mod allocator;
pub mod config;
pub mod consensus;
pub mod engine;
pub mod filter;
pub mod formatter;
pub mod gate;
pub mod relevance;
pub mod retrieval;
pub mod review;
pub mod storage;
pub mod telemetry;

// Re-export commonly used types
pub use allocator::{Allocation, ScoredEntry, TokenBudgetAllocator};
pub use config::{ConfigError, EngineConfig};
pub use consensus::{build_consensus, ConsensusBuilder, ConsensusResult};
pub use engine::MemoryEngine;
pub use filter::TrivialFilter;
pub use formatter::ContextFormatter;
pub use gate::{GateRejection, QualityGate};
pub use relevance::RelevanceScorer;
pub use retrieval::{RetrievalPipeline, RetrievalQuery, RetrievalResult};
pub use review::{ReviewCoordinator, ReviewError, ReviewReport, ReviewRequest, Reviewer};
pub use storage::{RejectionReason, StoragePipeline, StorageRequest, StorageResult};
