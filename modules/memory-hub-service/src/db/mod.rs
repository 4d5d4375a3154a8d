//! SQLite storage for the memory hub.
//!
//! One connection guarded by a mutex. Every base table that is searchable has
//! an FTS5 companion whose `rowid` equals the base row id; writes to the pair
//! always happen inside a single transaction.

pub mod tables;

use chrono::{SecondsFormat, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, Result as SqliteResult};
use std::path::Path;

pub struct Db {
    conn: Mutex<Connection>,
    path: String,
}

impl Db {
    pub fn open(path: &str) -> SqliteResult<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    if let Err(e) = std::fs::create_dir_all(parent) {
                        log::warn!(
                            "[CACHE] Could not create {}: {}",
                            parent.display(),
                            e
                        );
                    }
                }
            }
            Connection::open(path)?
        };
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Self {
            conn: Mutex::new(conn),
            path: path.to_string(),
        };
        db.create_tables()?;
        Ok(db)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    fn create_tables(&self) -> SqliteResult<()> {
        let conn = self.conn();

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS memories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content TEXT NOT NULL,
                source TEXT NOT NULL DEFAULT 'manual',
                category TEXT,
                metadata TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_memories_source ON memories(source, created_at DESC);
            CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
                content,
                source,
                category
            );",
        )?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS action_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                action_type TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                payload TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                priority INTEGER NOT NULL DEFAULT 0,
                detected_at TEXT NOT NULL,
                approved_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_action_queue_status
                ON action_queue(status, priority DESC, detected_at ASC);",
        )?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS screens (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                app_name TEXT,
                window_title TEXT,
                ocr_text TEXT,
                timestamp TEXT NOT NULL
            );
            CREATE VIRTUAL TABLE IF NOT EXISTS screens_fts USING fts5(
                ocr_text,
                app_name,
                window_title
            );

            CREATE TABLE IF NOT EXISTS browser_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL,
                title TEXT,
                domain TEXT,
                browser TEXT,
                visit_time TEXT NOT NULL
            );
            CREATE VIRTUAL TABLE IF NOT EXISTS browser_fts USING fts5(
                title,
                url,
                domain
            );

            CREATE TABLE IF NOT EXISTS git_activity (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                repo TEXT NOT NULL,
                branch TEXT,
                sha TEXT NOT NULL,
                message TEXT NOT NULL,
                files_changed TEXT,
                insertions INTEGER NOT NULL DEFAULT 0,
                deletions INTEGER NOT NULL DEFAULT 0,
                timestamp TEXT NOT NULL
            );
            CREATE VIRTUAL TABLE IF NOT EXISTS git_fts USING fts5(
                message,
                repo,
                files_changed
            );

            CREATE TABLE IF NOT EXISTS watcher_status (
                watcher_name TEXT PRIMARY KEY,
                last_run TEXT,
                last_success TEXT,
                items_captured INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                status TEXT
            );",
        )?;

        Ok(())
    }
}

/// Fixed-width UTC timestamp so lexical order matches chronological order.
pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// SQLite LIMIT value, saturating at `i64::MAX`.
pub(crate) fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
