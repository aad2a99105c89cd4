//! Schema, FTS index, triggers, and versioned migrations.
//!
//! The base schema plus migrations v1–v5 are additive and idempotent: every
//! step is guarded by an existence check, and applied versions are recorded
//! in `schema_migrations`. History rows are produced by triggers, never by
//! hand-written inserts; the delete trigger runs `AFTER DELETE` so the
//! pre-image is still visible when the snapshot is taken.

use rusqlite::{params, Connection};
use tracing::debug;

use crate::error::Result;

pub(crate) const LATEST_SCHEMA_VERSION: i64 = 5;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);
";

const BASE_SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS memories (
  id TEXT PRIMARY KEY,
  content TEXT NOT NULL,
  category TEXT NOT NULL DEFAULT 'general',
  tags TEXT NOT NULL DEFAULT '[]',
  metadata TEXT NOT NULL DEFAULT '{}',
  created_at TEXT NOT NULL DEFAULT (datetime('now')),
  updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_memories_category ON memories(category);
CREATE INDEX IF NOT EXISTS idx_memories_created_at ON memories(created_at);

CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
  content, category, tags,
  content=memories,
  content_rowid=rowid,
  tokenize='porter unicode61'
);

CREATE TRIGGER IF NOT EXISTS memories_fts_insert AFTER INSERT ON memories BEGIN
  INSERT INTO memories_fts(rowid, content, category, tags)
  VALUES (NEW.rowid, NEW.content, NEW.category, NEW.tags);
END;

CREATE TRIGGER IF NOT EXISTS memories_fts_update AFTER UPDATE ON memories BEGIN
  INSERT INTO memories_fts(memories_fts, rowid, content, category, tags)
  VALUES ('delete', OLD.rowid, OLD.content, OLD.category, OLD.tags);
  INSERT INTO memories_fts(rowid, content, category, tags)
  VALUES (NEW.rowid, NEW.content, NEW.category, NEW.tags);
END;

CREATE TRIGGER IF NOT EXISTS memories_fts_delete AFTER DELETE ON memories BEGIN
  INSERT INTO memories_fts(memories_fts, rowid, content, category, tags)
  VALUES ('delete', OLD.rowid, OLD.content, OLD.category, OLD.tags);
END;
";

const MIGRATION_V2_LINKS_SQL: &str = "
CREATE TABLE IF NOT EXISTS memory_links (
  from_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
  to_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
  relation TEXT NOT NULL DEFAULT 'related'
    CHECK (relation IN ('caused','references','supersedes','related')),
  created_at TEXT NOT NULL DEFAULT (datetime('now')),
  PRIMARY KEY (from_id, to_id)
);

CREATE INDEX IF NOT EXISTS idx_memory_links_to ON memory_links(to_id);
";

const MIGRATION_V3_HISTORY_SQL: &str = "
CREATE TABLE IF NOT EXISTS memory_history (
  history_id INTEGER PRIMARY KEY AUTOINCREMENT,
  memory_id TEXT NOT NULL,
  operation TEXT NOT NULL CHECK (operation IN ('create','update','delete')),
  content TEXT NOT NULL,
  category TEXT NOT NULL,
  tags TEXT NOT NULL,
  metadata TEXT NOT NULL,
  expires_at TEXT,
  changed_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_memory_history_memory
  ON memory_history(memory_id, changed_at DESC);
";

// v3 trigger bodies; replaced wholesale by v4 once `project` exists.
const HISTORY_TRIGGERS_V3_SQL: &str = "
CREATE TRIGGER IF NOT EXISTS memories_history_insert AFTER INSERT ON memories BEGIN
  INSERT INTO memory_history(memory_id, operation, content, category, tags, metadata, expires_at)
  VALUES (NEW.id, 'create', NEW.content, NEW.category, NEW.tags, NEW.metadata, NEW.expires_at);
END;

CREATE TRIGGER IF NOT EXISTS memories_history_update AFTER UPDATE ON memories BEGIN
  INSERT INTO memory_history(memory_id, operation, content, category, tags, metadata, expires_at)
  VALUES (NEW.id, 'update', NEW.content, NEW.category, NEW.tags, NEW.metadata, NEW.expires_at);
END;

CREATE TRIGGER IF NOT EXISTS memories_history_delete AFTER DELETE ON memories BEGIN
  INSERT INTO memory_history(memory_id, operation, content, category, tags, metadata, expires_at)
  VALUES (OLD.id, 'delete', OLD.content, OLD.category, OLD.tags, OLD.metadata, OLD.expires_at);
END;
";

const HISTORY_TRIGGERS_V4_SQL: &str = "
DROP TRIGGER IF EXISTS memories_history_insert;
DROP TRIGGER IF EXISTS memories_history_update;
DROP TRIGGER IF EXISTS memories_history_delete;

CREATE TRIGGER memories_history_insert AFTER INSERT ON memories BEGIN
  INSERT INTO memory_history(memory_id, operation, content, category, tags, metadata, project, expires_at)
  VALUES (NEW.id, 'create', NEW.content, NEW.category, NEW.tags, NEW.metadata, NEW.project, NEW.expires_at);
END;

CREATE TRIGGER memories_history_update AFTER UPDATE ON memories BEGIN
  INSERT INTO memory_history(memory_id, operation, content, category, tags, metadata, project, expires_at)
  VALUES (NEW.id, 'update', NEW.content, NEW.category, NEW.tags, NEW.metadata, NEW.project, NEW.expires_at);
END;

CREATE TRIGGER memories_history_delete AFTER DELETE ON memories BEGIN
  INSERT INTO memory_history(memory_id, operation, content, category, tags, metadata, project, expires_at)
  VALUES (OLD.id, 'delete', OLD.content, OLD.category, OLD.tags, OLD.metadata, OLD.project, OLD.expires_at);
END;
";

/// Create the base schema and bring the database up to
/// [`LATEST_SCHEMA_VERSION`] in strict order.
///
/// # Errors
/// Any failure here is fatal to store construction.
pub(crate) fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)?;
    conn.execute_batch(BASE_SCHEMA_SQL)?;

    let mut version = current_version(conn)?;
    debug!(version, "opening memory store schema");

    if version < 1 {
        apply_v1(conn)?;
        version = record_version(conn, 1)?;
    }
    if version < 2 {
        conn.execute_batch(MIGRATION_V2_LINKS_SQL)?;
        version = record_version(conn, 2)?;
    }
    if version < 3 {
        conn.execute_batch(MIGRATION_V3_HISTORY_SQL)?;
        conn.execute_batch(HISTORY_TRIGGERS_V3_SQL)?;
        version = record_version(conn, 3)?;
    }
    if version < 4 {
        apply_v4(conn)?;
        version = record_version(conn, 4)?;
    }
    if version < 5 {
        apply_v5(conn)?;
        record_version(conn, 5)?;
    }

    Ok(())
}

/// Add `expires_at` and its index.
fn apply_v1(conn: &Connection) -> Result<()> {
    if !column_exists(conn, "memories", "expires_at")? {
        conn.execute("ALTER TABLE memories ADD COLUMN expires_at TEXT", [])?;
    }
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_memories_expires_at ON memories(expires_at)",
        [],
    )?;
    Ok(())
}

/// Add `project` to memories and history, index it, and recreate the
/// history triggers so snapshots carry the namespace.
fn apply_v4(conn: &Connection) -> Result<()> {
    if !column_exists(conn, "memories", "project")? {
        conn.execute(
            "ALTER TABLE memories ADD COLUMN project TEXT NOT NULL DEFAULT 'default'",
            [],
        )?;
    }
    if !column_exists(conn, "memory_history", "project")? {
        conn.execute(
            "ALTER TABLE memory_history ADD COLUMN project TEXT NOT NULL DEFAULT 'default'",
            [],
        )?;
    }
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_memories_project ON memories(project);
         CREATE INDEX IF NOT EXISTS idx_memories_project_category ON memories(project, category);",
    )?;
    conn.execute_batch(HISTORY_TRIGGERS_V4_SQL)?;
    Ok(())
}

/// Add link weighting and the auto-generated flag.
fn apply_v5(conn: &Connection) -> Result<()> {
    if !column_exists(conn, "memory_links", "weight")? {
        conn.execute(
            "ALTER TABLE memory_links ADD COLUMN weight REAL NOT NULL DEFAULT 1.0",
            [],
        )?;
    }
    if !column_exists(conn, "memory_links", "auto_generated")? {
        conn.execute(
            "ALTER TABLE memory_links ADD COLUMN auto_generated INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_memory_links_auto ON memory_links(auto_generated)",
        [],
    )?;
    Ok(())
}

pub(crate) fn current_version(conn: &Connection) -> Result<i64> {
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get::<_, i64>(0),
    )?;
    Ok(version)
}

fn record_version(conn: &Connection, version: i64) -> Result<i64> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version) VALUES (?1)",
        params![version],
    )?;
    Ok(version)
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
