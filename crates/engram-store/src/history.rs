//! Versioned history reads and point-in-time restore.
//!
//! History rows come from the schema triggers; nothing here writes them by
//! hand. Restore routes the stored snapshot back through the normal update
//! path, so a restore is itself audited as an `update` row.

use engram_core::{
    ExpiryChange, HistoryEntry, HistoryPage, HistoryQuery, Memory, Operation, UpdateMemory,
    DEFAULT_PAGE_LIMIT,
};
use rusqlite::{params, Row};

use crate::error::Result;
use crate::memory::{apply_update, fetch_memory, json_column};
use crate::MemoryStore;

pub(crate) const PAGE_SQL: &str =
    "SELECT h.history_id, h.memory_id, h.operation, h.content, h.category, h.tags, h.metadata,
            h.project, h.expires_at, h.changed_at, COUNT(*) OVER () AS total
     FROM memory_history h
     WHERE h.memory_id = ?1
     ORDER BY h.changed_at DESC, h.history_id DESC
     LIMIT ?2 OFFSET ?3";

const SNAPSHOT_SQL: &str =
    "SELECT h.history_id, h.memory_id, h.operation, h.content, h.category, h.tags, h.metadata,
            h.project, h.expires_at, h.changed_at
     FROM memory_history h
     WHERE h.history_id = ?1 AND h.memory_id = ?2";

fn history_from_row(row: &Row<'_>) -> rusqlite::Result<HistoryEntry> {
    let operation_raw: String = row.get(2)?;
    let tags_json: String = row.get(5)?;
    let metadata_json: String = row.get(6)?;
    let operation = Operation::parse(&operation_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown history operation: {operation_raw}"),
            )),
        )
    })?;
    Ok(HistoryEntry {
        history_id: row.get(0)?,
        memory_id: row.get(1)?,
        operation,
        content: row.get(3)?,
        category: row.get(4)?,
        tags: json_column(5, &tags_json)?,
        metadata: json_column(6, &metadata_json)?,
        project: row.get(7)?,
        expires_at: row.get(8)?,
        changed_at: row.get(9)?,
    })
}

impl MemoryStore {
    /// Audit trail of one memory, newest first, with a count total.
    ///
    /// # Errors
    /// Storage failures only.
    pub fn get_history(&self, req: &HistoryQuery) -> Result<HistoryPage> {
        let mut stmt = self.conn.prepare_cached(PAGE_SQL)?;
        let mut rows = stmt.query(params![
            req.memory_id,
            i64::from(req.limit.unwrap_or(DEFAULT_PAGE_LIMIT)),
            i64::from(req.offset),
        ])?;
        let mut entries = Vec::new();
        let mut total = 0u64;
        while let Some(row) = rows.next()? {
            total = row.get::<_, i64>(10)? as u64;
            entries.push(history_from_row(row)?);
        }
        Ok(HistoryPage { entries, total })
    }

    /// Reapply a history snapshot to its memory. Returns `None` when the
    /// memory no longer exists or when the history row does not belong to
    /// it. The restore issues a regular update, producing a fresh `update`
    /// history row, so restoring is auditable and repeatable.
    ///
    /// # Errors
    /// Storage failures only.
    pub fn restore_memory(&mut self, memory_id: &str, history_id: i64) -> Result<Option<Memory>> {
        if fetch_memory(&self.conn, memory_id, false)?.is_none() {
            return Ok(None);
        }
        let snapshot = {
            let mut stmt = self.conn.prepare_cached(SNAPSHOT_SQL)?;
            let mut rows = stmt.query(params![history_id, memory_id])?;
            match rows.next()? {
                Some(row) => history_from_row(row)?,
                None => return Ok(None),
            }
        };

        // The snapshot's fields flow through the regular update path, so the
        // restore itself is audited as an `update` row. The namespace is the
        // one piece a caller-facing update cannot touch; the snapshot's is
        // reapplied here.
        let restored = apply_update(
            &self.conn,
            memory_id,
            UpdateMemory {
                content: Some(snapshot.content),
                category: Some(snapshot.category),
                tags: Some(snapshot.tags),
                metadata: Some(snapshot.metadata),
                expires_at: match snapshot.expires_at {
                    Some(value) => ExpiryChange::At(value),
                    None => ExpiryChange::Clear,
                },
            },
            Some(snapshot.project),
        )?;
        Ok(restored)
    }
}
