//! SQLite schema.

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Tables for spiders and their cron tasks.
///
/// Tasks reference spiders; deleting a spider removes its tasks in the same
/// transaction (see `database::spiders::delete_cascade`).
pub const SQLITE_SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS spiders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    description TEXT,
    module_path TEXT NOT NULL DEFAULT '',
    class_name TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    language TEXT NOT NULL DEFAULT 'python',
    script_path TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    spider_id INTEGER NOT NULL REFERENCES spiders(id),
    cron_expression TEXT NOT NULL,
    description TEXT,
    job_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_spider ON tasks(spider_id);
";

/// Create all tables and indexes if missing.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(SQLITE_SCHEMA)
        .context("Failed to create spider/task tables")
}
