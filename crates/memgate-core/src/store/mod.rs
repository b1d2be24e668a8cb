//! Persistence layer for memory entries.
//!
//! The engine talks to storage only through [`MemoryStore`], so any backend
//! honoring the contract can be injected:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 MemoryStore                  │
//! │   insert · get_by_id · search · delete_where │
//! └──────────────┬───────────────────┬───────────┘
//!                │                   │
//!      ┌─────────▼────────┐ ┌────────▼─────────┐
//!      │ SqliteMemoryStore│ │  InMemoryStore   │
//!      │ Mutex<Connection>│ │ RwLock<Vec<..>>  │
//!      └──────────────────┘ └──────────────────┘
//! ```

mod memory;
pub mod migrations;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteMemoryStore;

use crate::error::Result;
use crate::types::{DeleteFilter, MemoryEntry, MemoryStats, NewMemoryEntry, SearchFilter};

/// Core trait for memory persistence.
///
/// Writes (`insert`, `delete_where`) must be serialized per store instance.
/// There is no update operation; entries are immutable.
pub trait MemoryStore: Send + Sync {
    /// Persist an entry and return its newly assigned ID.
    fn insert(&self, entry: NewMemoryEntry) -> Result<String>;

    /// Retrieve a memory entry by ID.
    fn get_by_id(&self, id: &str) -> Result<Option<MemoryEntry>>;

    /// Entries matching the filter, newest first.
    fn search(&self, filter: &SearchFilter) -> Result<Vec<MemoryEntry>>;

    /// Find an entry by content hash (for deduplication).
    fn find_by_hash(&self, content_hash: &str) -> Result<Option<MemoryEntry>>;

    /// Delete every matching entry, returning how many were removed.
    fn delete_where(&self, filter: &DeleteFilter) -> Result<usize>;

    /// Get memory statistics.
    fn stats(&self) -> Result<MemoryStats>;
}
