//! Memory store database migrations
//!
//! SQL migrations are embedded as strings and executed when a store opens.

use rusqlite::Connection;

use crate::error::Result;

/// Memory entries table SQL (001)
pub const MEMORY_ENTRIES_SQL: &str = include_str!("001_memory_entries.sql");

/// Run all memory migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(MEMORY_ENTRIES_SQL)?;
    Ok(())
}
