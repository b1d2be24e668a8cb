//! Shared types for memgate.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hashing::content_hash;

/// Context key linking an entry to a task.
pub const TASK_ID_KEY: &str = "task_id";

/// Highest importance score a reviewer may give.
pub const MAX_IMPORTANCE_SCORE: u8 = 10;

// ─────────────────────────────────────────────────────────────────────────────
// Memory Types
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of memory, each with its own retrieval priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// A recorded event or conversation turn.
    Episodic,
    /// A general fact or rule.
    Semantic,
    /// A reusable how-to.
    Procedural,
    /// A deferred intention or reminder.
    Prospective,
    /// Scoped to an active task; cleared when the task completes.
    Working,
}

impl MemoryType {
    /// All five variants, in declaration order.
    pub const ALL: [MemoryType; 5] = [
        MemoryType::Episodic,
        MemoryType::Semantic,
        MemoryType::Procedural,
        MemoryType::Prospective,
        MemoryType::Working,
    ];

    /// Convert to string for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Episodic => "episodic",
            MemoryType::Semantic => "semantic",
            MemoryType::Procedural => "procedural",
            MemoryType::Prospective => "prospective",
            MemoryType::Working => "working",
        }
    }

    /// Retrieval priority weight.
    /// Durable knowledge (procedures, facts) outranks one-off events.
    pub fn priority_weight(&self) -> f64 {
        match self {
            MemoryType::Procedural => 1.0,
            MemoryType::Semantic => 0.9,
            MemoryType::Prospective => 0.75,
            MemoryType::Working => 0.7,
            MemoryType::Episodic => 0.6,
        }
    }

    /// Capitalized label used when rendering context.
    pub fn label(&self) -> &'static str {
        match self {
            MemoryType::Episodic => "Episodic",
            MemoryType::Semantic => "Semantic",
            MemoryType::Procedural => "Procedural",
            MemoryType::Prospective => "Prospective",
            MemoryType::Working => "Working",
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MemoryType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "episodic" => Ok(MemoryType::Episodic),
            "semantic" => Ok(MemoryType::Semantic),
            "procedural" => Ok(MemoryType::Procedural),
            "prospective" => Ok(MemoryType::Prospective),
            "working" => Ok(MemoryType::Working),
            _ => Err(format!("Invalid memory type: {}", s)),
        }
    }
}

/// A persisted memory. Never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    pub id: String,
    pub content: String,
    pub memory_type: MemoryType,
    pub timestamp: DateTime<Utc>,
    pub content_hash: String,
    /// Open metadata: confidence, source, reviewer scores, task linkage.
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Scoping map, e.g. `task_id`.
    pub context: BTreeMap<String, String>,
}

impl MemoryEntry {
    /// Task this entry is scoped to, if any.
    pub fn task_id(&self) -> Option<&str> {
        self.context.get(TASK_ID_KEY).map(String::as_str)
    }
}

/// Input for persisting a new memory entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMemoryEntry {
    pub content: String,
    pub memory_type: MemoryType,
    pub timestamp: DateTime<Utc>,
    pub content_hash: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub context: BTreeMap<String, String>,
}

impl NewMemoryEntry {
    /// Build a new entry stamped with the current time.
    ///
    /// Fails with [`Error::InvalidInput`] when `content` is blank.
    pub fn new(content: impl Into<String>, memory_type: MemoryType) -> Result<Self> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(Error::invalid_input("memory content must not be empty"));
        }
        Ok(Self {
            content_hash: content_hash(&content),
            content,
            memory_type,
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
            context: BTreeMap::new(),
        })
    }

    /// Override the creation time.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Attach a scoping context.
    pub fn with_context(mut self, context: BTreeMap<String, String>) -> Self {
        self.context = context;
        self
    }

    /// Materialize as a stored entry under `id`.
    pub fn into_entry(self, id: String) -> MemoryEntry {
        MemoryEntry {
            id,
            content: self.content,
            memory_type: self.memory_type,
            timestamp: self.timestamp,
            content_hash: self.content_hash,
            metadata: self.metadata,
            context: self.context,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Review Types
// ─────────────────────────────────────────────────────────────────────────────

/// One reviewer's verdict on a candidate memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentReview {
    pub reviewer_name: String,
    /// 0–10 inclusive.
    pub importance_score: u8,
    pub reasoning: String,
    /// 0.0–1.0 inclusive.
    pub confidence: f64,
}

impl AgentReview {
    /// Create a review, rejecting out-of-range scores or confidence.
    pub fn new(
        reviewer_name: impl Into<String>,
        importance_score: i64,
        reasoning: impl Into<String>,
        confidence: f64,
    ) -> Result<Self> {
        if !(0..=i64::from(MAX_IMPORTANCE_SCORE)).contains(&importance_score) {
            return Err(Error::invalid_input(format!(
                "importance_score must be within 0..={}, got {}",
                MAX_IMPORTANCE_SCORE, importance_score
            )));
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(Error::invalid_input(format!(
                "confidence must be within 0.0..=1.0, got {}",
                confidence
            )));
        }
        Ok(Self {
            reviewer_name: reviewer_name.into(),
            importance_score: importance_score as u8,
            reasoning: reasoning.into(),
            confidence,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Query Types
// ─────────────────────────────────────────────────────────────────────────────

/// Inclusive time bounds; an open side is unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    /// Whether `ts` falls within the bounds.
    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        self.start.is_none_or(|s| *ts >= s) && self.end.is_none_or(|e| *ts <= e)
    }
}

/// Filter criteria for searching memory entries
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Only these types; empty means all.
    pub memory_types: Vec<MemoryType>,
    pub time_range: Option<TimeRange>,
    /// Case-insensitive substrings; an entry matches if it contains any.
    pub keywords: Vec<String>,
    /// Exact key/value matches against the entry context.
    pub context: BTreeMap<String, String>,
    /// Only entries with this normalized-content hash.
    pub content_hash: Option<String>,
    pub limit: Option<usize>,
}

impl SearchFilter {
    /// Whether `entry` satisfies every criterion except `limit`.
    pub fn matches(&self, entry: &MemoryEntry) -> bool {
        if !self.memory_types.is_empty() && !self.memory_types.contains(&entry.memory_type) {
            return false;
        }
        if let Some(range) = &self.time_range {
            if !range.contains(&entry.timestamp) {
                return false;
            }
        }
        if let Some(hash) = &self.content_hash {
            if entry.content_hash != *hash {
                return false;
            }
        }
        if !self.keywords.is_empty() {
            let content = entry.content.to_lowercase();
            if !self.keywords.iter().any(|k| content.contains(&k.to_lowercase())) {
                return false;
            }
        }
        self.context
            .iter()
            .all(|(k, v)| entry.context.get(k) == Some(v))
    }
}

/// Predicate for bulk deletion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteFilter {
    /// Every entry.
    All,
    /// Every entry of one type.
    MemoryType(MemoryType),
    /// Working entries whose context `task_id` matches.
    Task(String),
}

impl DeleteFilter {
    pub fn matches(&self, entry: &MemoryEntry) -> bool {
        match self {
            DeleteFilter::All => true,
            DeleteFilter::MemoryType(t) => entry.memory_type == *t,
            DeleteFilter::Task(task_id) => {
                entry.memory_type == MemoryType::Working && entry.task_id() == Some(task_id.as_str())
            }
        }
    }
}

/// Statistics about stored memories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total: usize,
    pub count_by_type: HashMap<MemoryType, usize>,
}
