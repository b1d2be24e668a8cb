//! Renders retrieved memories as a context block for injection.

use std::fmt::Write;

use memgate_core::{MemoryEntry, MemoryType};

/// Display order when grouping by type.
const GROUP_ORDER: [MemoryType; 5] = [
    MemoryType::Procedural,
    MemoryType::Semantic,
    MemoryType::Prospective,
    MemoryType::Working,
    MemoryType::Episodic,
];

pub struct ContextFormatter;

impl ContextFormatter {
    /// Render `entries` as markdown.
    ///
    /// Every entry carries a visible type label. With `group_by_type`,
    /// entries of one type are emitted contiguously under a header, groups
    /// ordered by type priority and entries keeping their input order.
    pub fn format(entries: &[MemoryEntry], group_by_type: bool, include_metadata: bool) -> String {
        if entries.is_empty() {
            return String::new();
        }

        let mut out = String::from("## Relevant memories\n");

        if group_by_type {
            for memory_type in GROUP_ORDER {
                let group: Vec<&MemoryEntry> =
                    entries.iter().filter(|e| e.memory_type == memory_type).collect();
                if group.is_empty() {
                    continue;
                }
                let _ = write!(out, "\n### {}\n", memory_type.label());
                for entry in group {
                    push_entry(&mut out, entry, include_metadata);
                }
            }
        } else {
            out.push('\n');
            for entry in entries {
                push_entry(&mut out, entry, include_metadata);
            }
        }

        out
    }
}

fn push_entry(out: &mut String, entry: &MemoryEntry, include_metadata: bool) {
    let _ = write!(out, "- [{}] {}", entry.memory_type.as_str(), entry.content.trim());

    if include_metadata {
        let mut details = vec![entry.timestamp.format("%Y-%m-%d").to_string()];
        if let Some(confidence) = entry.metadata.get("confidence").and_then(|c| c.as_f64()) {
            details.push(format!("confidence {:.2}", confidence));
        }
        if let Some(source) = entry.metadata.get("source").and_then(|s| s.as_str()) {
            details.push(format!("source {}", source));
        }
        let _ = write!(out, " ({})", details.join(", "));
    }

    out.push('\n');
}
