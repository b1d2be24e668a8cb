//! In-process memory store.

use std::sync::RwLock;

use uuid::Uuid;

use super::MemoryStore;
use crate::error::{Error, Result};
use crate::types::{DeleteFilter, MemoryEntry, MemoryStats, NewMemoryEntry, SearchFilter};

/// Volatile store backed by a vector behind a read/write lock.
///
/// Reads proceed concurrently; writes take the exclusive lock.
#[derive(Default)]
pub struct InMemoryStore {
    entries: RwLock<Vec<MemoryEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryStore for InMemoryStore {
    fn insert(&self, entry: NewMemoryEntry) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let mut entries = self.entries.write().map_err(|_| Error::LockPoisoned)?;
        entries.push(entry.into_entry(id.clone()));
        Ok(id)
    }

    fn get_by_id(&self, id: &str) -> Result<Option<MemoryEntry>> {
        let entries = self.entries.read().map_err(|_| Error::LockPoisoned)?;
        Ok(entries.iter().find(|e| e.id == id).cloned())
    }

    fn search(&self, filter: &SearchFilter) -> Result<Vec<MemoryEntry>> {
        let entries = self.entries.read().map_err(|_| Error::LockPoisoned)?;
        let mut matching: Vec<MemoryEntry> =
            entries.iter().filter(|e| filter.matches(e)).cloned().collect();
        drop(entries);

        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }
        Ok(matching)
    }

    fn find_by_hash(&self, content_hash: &str) -> Result<Option<MemoryEntry>> {
        let entries = self.entries.read().map_err(|_| Error::LockPoisoned)?;
        Ok(entries
            .iter()
            .filter(|e| e.content_hash == content_hash)
            .min_by_key(|e| e.timestamp)
            .cloned())
    }

    fn delete_where(&self, filter: &DeleteFilter) -> Result<usize> {
        let mut entries = self.entries.write().map_err(|_| Error::LockPoisoned)?;
        let before = entries.len();
        entries.retain(|e| !filter.matches(e));
        Ok(before - entries.len())
    }

    fn stats(&self) -> Result<MemoryStats> {
        let entries = self.entries.read().map_err(|_| Error::LockPoisoned)?;
        let mut stats = MemoryStats {
            total: entries.len(),
            ..Default::default()
        };
        for entry in entries.iter() {
            *stats.count_by_type.entry(entry.memory_type).or_insert(0) += 1;
        }
        Ok(stats)
    }
}
