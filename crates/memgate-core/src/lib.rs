//! memgate-core - Core library for memgate
//!
//! This crate provides the pieces shared by every memgate component:
//!
//! - **types**: memory entities, reviewer verdicts, search/delete filters
//! - **store**: the `MemoryStore` persistence trait plus SQLite and in-memory backends
//! - **text**: tokenization, similarity and token estimation helpers
//! - **hashing**: content hashing for duplicate detection
//! - **error**: the crate-wide error type

pub mod error;
pub mod hashing;
pub mod store;
pub mod text;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result};
pub use store::{InMemoryStore, MemoryStore, SqliteMemoryStore};
pub use types::{
    AgentReview, DeleteFilter, MemoryEntry, MemoryStats, MemoryType, NewMemoryEntry,
    SearchFilter, TimeRange,
};
