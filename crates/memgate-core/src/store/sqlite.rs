//! SQLite-backed memory store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::DateTime;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

use super::migrations::run_migrations;
use super::MemoryStore;
use crate::error::{Error, Result};
use crate::types::{
    DeleteFilter, MemoryEntry, MemoryStats, MemoryType, NewMemoryEntry, SearchFilter, TASK_ID_KEY,
};

const SELECT_COLUMNS: &str =
    "SELECT id, content, memory_type, content_hash, metadata_json, context_json, created_at FROM memory_entries";

/// Memory store persisting entries to SQLite.
///
/// Thread-safe via internal Mutex. All operations acquire the lock, so
/// writes against one store instance never interleave.
pub struct SqliteMemoryStore {
    conn: Mutex<Connection>,
}

impl SqliteMemoryStore {
    /// Open (or create) a database file and run migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        // WAL lets readers proceed while a write is in progress
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        debug!(path = %path.display(), "opened memory database");
        Self::from_connection(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::LockPoisoned)
    }

    fn map_entry(row: &Row) -> rusqlite::Result<MemoryEntry> {
        let memory_type: String = row.get(2)?;
        let metadata_json: String = row.get(4)?;
        let context_json: String = row.get(5)?;

        Ok(MemoryEntry {
            id: row.get(0)?,
            content: row.get(1)?,
            memory_type: memory_type
                .parse::<MemoryType>()
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, e.into()))?,
            content_hash: row.get(3)?,
            metadata: serde_json::from_str(&metadata_json)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?,
            context: serde_json::from_str(&context_json)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?,
            timestamp: DateTime::from_timestamp_millis(row.get::<_, i64>(6)?).unwrap_or_default(),
        })
    }
}

/// Escape `%`, `_` and the escape char itself for a LIKE pattern.
fn like_pattern(keyword: &str) -> String {
    let escaped = keyword
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

impl MemoryStore for SqliteMemoryStore {
    fn insert(&self, entry: NewMemoryEntry) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let task_id = entry.context.get(TASK_ID_KEY).cloned();
        let metadata_json = serde_json::to_string(&entry.metadata)?;
        let context_json = serde_json::to_string(&entry.context)?;
        // LIKE only folds ASCII, so keyword search runs against this instead
        let search_text = entry.content.to_lowercase();

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO memory_entries (id, content, memory_type, content_hash, search_text, task_id, metadata_json, context_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                &id,
                &entry.content,
                entry.memory_type.as_str(),
                &entry.content_hash,
                &search_text,
                &task_id,
                &metadata_json,
                &context_json,
                entry.timestamp.timestamp_millis(),
            ],
        )?;

        debug!(id = %id, memory_type = %entry.memory_type, "inserted memory entry");
        Ok(id)
    }

    fn get_by_id(&self, id: &str) -> Result<Option<MemoryEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT_COLUMNS))?;
        Ok(stmt.query_row(params![id], Self::map_entry).optional()?)
    }

    fn search(&self, filter: &SearchFilter) -> Result<Vec<MemoryEntry>> {
        let mut sql = format!("{} WHERE 1=1", SELECT_COLUMNS);
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if !filter.memory_types.is_empty() {
            let placeholders: Vec<&str> = filter.memory_types.iter().map(|_| "?").collect();
            sql.push_str(&format!(" AND memory_type IN ({})", placeholders.join(",")));
            for t in &filter.memory_types {
                params_vec.push(Box::new(t.as_str().to_string()));
            }
        }

        if let Some(range) = &filter.time_range {
            if let Some(start) = range.start {
                sql.push_str(" AND created_at >= ?");
                params_vec.push(Box::new(start.timestamp_millis()));
            }
            if let Some(end) = range.end {
                sql.push_str(" AND created_at <= ?");
                params_vec.push(Box::new(end.timestamp_millis()));
            }
        }

        if let Some(hash) = &filter.content_hash {
            sql.push_str(" AND content_hash = ?");
            params_vec.push(Box::new(hash.clone()));
        }

        if !filter.keywords.is_empty() {
            let clauses: Vec<&str> = filter
                .keywords
                .iter()
                .map(|_| "search_text LIKE ? ESCAPE '\\'")
                .collect();
            sql.push_str(&format!(" AND ({})", clauses.join(" OR ")));
            for keyword in &filter.keywords {
                params_vec.push(Box::new(like_pattern(&keyword.to_lowercase())));
            }
        }

        sql.push_str(" ORDER BY created_at DESC, id ASC");

        // Context is matched after decoding, so the limit moves to Rust too
        let limit_in_sql = filter.context.is_empty();
        if let (true, Some(limit)) = (limit_in_sql, filter.limit) {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let conn = self.conn()?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(param_refs.as_slice(), Self::map_entry)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        if limit_in_sql {
            return Ok(entries);
        }

        let matching = entries.into_iter().filter(|e| {
            filter
                .context
                .iter()
                .all(|(k, v)| e.context.get(k) == Some(v))
        });
        Ok(match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    fn find_by_hash(&self, content_hash: &str) -> Result<Option<MemoryEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE content_hash = ?1 ORDER BY created_at ASC LIMIT 1",
            SELECT_COLUMNS
        ))?;
        Ok(stmt.query_row(params![content_hash], Self::map_entry).optional()?)
    }

    fn delete_where(&self, filter: &DeleteFilter) -> Result<usize> {
        let conn = self.conn()?;
        let deleted = match filter {
            DeleteFilter::All => conn.execute("DELETE FROM memory_entries", [])?,
            DeleteFilter::MemoryType(t) => conn.execute(
                "DELETE FROM memory_entries WHERE memory_type = ?1",
                params![t.as_str()],
            )?,
            DeleteFilter::Task(task_id) => conn.execute(
                "DELETE FROM memory_entries WHERE memory_type = ?1 AND task_id = ?2",
                params![MemoryType::Working.as_str(), task_id],
            )?,
        };

        debug!(?filter, deleted, "deleted memory entries");
        Ok(deleted)
    }

    fn stats(&self) -> Result<MemoryStats> {
        let conn = self.conn()?;
        let mut stats = MemoryStats::default();

        let mut stmt =
            conn.prepare("SELECT memory_type, COUNT(*) FROM memory_entries GROUP BY memory_type")?;
        let rows = stmt.query_map([], |row| {
            let memory_type: String = row.get(0)?;
            let memory_type = memory_type
                .parse::<MemoryType>()
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, e.into()))?;
            Ok((memory_type, row.get::<_, i64>(1)?))
        })?;

        for row in rows {
            let (memory_type, count) = row?;
            let count = count as usize;
            stats.total += count;
            stats.count_by_type.insert(memory_type, count);
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimeRange;
    use chrono::{Duration, Utc};
    use std::collections::BTreeMap;

    fn entry(content: &str, memory_type: MemoryType) -> NewMemoryEntry {
        NewMemoryEntry::new(content, memory_type).unwrap()
    }

    #[test]
    fn test_insert_and_get() {
        let store = SqliteMemoryStore::open_in_memory().unwrap();

        let mut metadata = serde_json::Map::new();
        metadata.insert("source".into(), "terminal".into());
        let id = store
            .insert(entry("Run migrations with `make db-migrate`", MemoryType::Procedural).with_metadata(metadata))
            .unwrap();

        let fetched = store.get_by_id(&id).unwrap().unwrap();
        assert_eq!(fetched.id, id);
        assert_eq!(fetched.memory_type, MemoryType::Procedural);
        assert_eq!(fetched.metadata["source"], "terminal");
        assert!(store.get_by_id("missing").unwrap().is_none());
    }

    #[test]
    fn test_search_filters() {
        let store = SqliteMemoryStore::open_in_memory().unwrap();
        let now = Utc::now();

        store
            .insert(entry("JWT tokens expire after one hour", MemoryType::Semantic).with_timestamp(now))
            .unwrap();
        store
            .insert(
                entry("Deployed the auth service on Monday", MemoryType::Episodic)
                    .with_timestamp(now - Duration::days(10)),
            )
            .unwrap();
        store
            .insert(entry("100% of the_cache keys are hashed", MemoryType::Semantic))
            .unwrap();

        let semantic = store
            .search(&SearchFilter {
                memory_types: vec![MemoryType::Semantic],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(semantic.len(), 2);

        let recent = store
            .search(&SearchFilter {
                time_range: Some(TimeRange::new(Some(now - Duration::days(1)), None)),
                ..Default::default()
            })
            .unwrap();
        assert!(recent.iter().all(|e| e.memory_type == MemoryType::Semantic));

        let keyword = store
            .search(&SearchFilter {
                keywords: vec!["AUTH".into()],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(keyword.len(), 1);
        assert_eq!(keyword[0].memory_type, MemoryType::Episodic);

        // LIKE wildcards in keywords are literal
        let literal = store
            .search(&SearchFilter {
                keywords: vec!["the_cache".into()],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(literal.len(), 1);
        let literal = store
            .search(&SearchFilter {
                keywords: vec!["%".into()],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(literal.len(), 1);
    }

    #[test]
    fn test_search_orders_newest_first_and_limits() {
        let store = SqliteMemoryStore::open_in_memory().unwrap();
        let now = Utc::now();
        for days in [3, 1, 2] {
            store
                .insert(entry(&format!("note from {} days ago", days), MemoryType::Episodic)
                    .with_timestamp(now - Duration::days(days)))
                .unwrap();
        }

        let results = store
            .search(&SearchFilter {
                limit: Some(2),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].content.contains("1 days"));
        assert!(results[1].content.contains("2 days"));
    }

    #[test]
    fn test_delete_task_scoped_working_memory() {
        let store = SqliteMemoryStore::open_in_memory().unwrap();
        let mut task_a = BTreeMap::new();
        task_a.insert(TASK_ID_KEY.to_string(), "task-a".to_string());
        let mut task_b = BTreeMap::new();
        task_b.insert(TASK_ID_KEY.to_string(), "task-b".to_string());

        store.insert(entry("editing src/auth.rs", MemoryType::Working).with_context(task_a.clone())).unwrap();
        store.insert(entry("editing src/db.rs", MemoryType::Working).with_context(task_b)).unwrap();
        store.insert(entry("auth uses argon2", MemoryType::Semantic).with_context(task_a.clone())).unwrap();

        let scoped = store
            .search(&SearchFilter {
                context: task_a,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(scoped.len(), 2);

        assert_eq!(store.delete_where(&DeleteFilter::Task("task-a".into())).unwrap(), 1);
        assert_eq!(store.delete_where(&DeleteFilter::MemoryType(MemoryType::Working)).unwrap(), 1);

        let stats = store.stats().unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.count_by_type.get(&MemoryType::Semantic), Some(&1));

        assert_eq!(store.delete_where(&DeleteFilter::All).unwrap(), 1);
        assert_eq!(store.stats().unwrap().total, 0);
    }

    #[test]
    fn test_find_by_hash() {
        let store = SqliteMemoryStore::open_in_memory().unwrap();
        let new = entry("Prefer rustls over openssl", MemoryType::Semantic);
        let hash = new.content_hash.clone();
        let id = store.insert(new).unwrap();

        let found = store.find_by_hash(&hash).unwrap().unwrap();
        assert_eq!(found.id, id);
        assert!(store.find_by_hash("deadbeef").unwrap().is_none());
    }

    #[test]
    fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("memory.db");

        let id = {
            let store = SqliteMemoryStore::open(&path).unwrap();
            store.insert(entry("Staging runs on port 8443", MemoryType::Semantic)).unwrap()
        };

        let reopened = SqliteMemoryStore::open(&path).unwrap();
        let fetched = reopened.get_by_id(&id).unwrap().unwrap();
        assert_eq!(fetched.content, "Staging runs on port 8443");
    }

    #[test]
    fn test_keyword_search_folds_unicode_case() {
        let sqlite = SqliteMemoryStore::open_in_memory().unwrap();
        let memory = crate::store::InMemoryStore::new();
        for store in [&sqlite as &dyn MemoryStore, &memory] {
            store
                .insert(entry("ÜBERSICHT dashboards are regenerated hourly", MemoryType::Semantic))
                .unwrap();
        }

        let filter = SearchFilter {
            keywords: vec!["übersicht".into()],
            ..Default::default()
        };
        assert_eq!(sqlite.search(&filter).unwrap().len(), 1);
        assert_eq!(memory.search(&filter).unwrap().len(), 1);

        let upper = SearchFilter {
            keywords: vec!["DASHBOARDS".into()],
            ..Default::default()
        };
        assert_eq!(sqlite.search(&upper).unwrap().len(), 1);
        assert_eq!(memory.search(&upper).unwrap().len(), 1);
    }

    #[test]
    fn test_search_by_content_hash_and_type() {
        let store = SqliteMemoryStore::open_in_memory().unwrap();
        let working = entry("Rebuild the search index", MemoryType::Working);
        let hash = working.content_hash.clone();
        store.insert(working).unwrap();
        let procedural = store.insert(entry("rebuild the  search index", MemoryType::Procedural)).unwrap();

        let found = store
            .search(&SearchFilter {
                memory_types: vec![MemoryType::Procedural],
                content_hash: Some(hash),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, procedural);
    }

    #[test]
    fn test_stats_rejects_unknown_memory_type() {
        let store = SqliteMemoryStore::open_in_memory().unwrap();
        store
            .conn()
            .unwrap()
            .execute(
                "INSERT INTO memory_entries (id, content, memory_type, content_hash, search_text, created_at)
                 VALUES ('bad', 'legacy row', 'long_term', 'h', 'legacy row', 0)",
                [],
            )
            .unwrap();

        let err = store.stats().unwrap_err();
        assert!(matches!(err, Error::Database(rusqlite::Error::FromSqlConversionFailure(..))));
    }
}
