//! Memory CRUD, batches, import/export, and filtered listing.
//!
//! Single-row update/delete on a missing id is an error; batch variants
//! report per-item misses in their structured results and never fail the
//! whole call for them. Every batch runs as one transaction.

use engram_core::{
    normalize, CreateMemory, CreateOutcome, DeleteBatchResult, ExportBundle, ImportMode,
    ImportResult, ListRequest, ListResult, Memory, UpdateBatchItem, UpdateBatchResult,
    UpdateMemory, ValidationError, DEFAULT_PAGE_LIMIT,
};
use rusqlite::{params, Connection, Row, ToSql};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{Result, StoreError};
use crate::{autolink, query, MemoryStore};

pub(crate) const MEMORY_COLUMNS: &str =
    "m.id, m.content, m.category, m.tags, m.metadata, m.project, m.created_at, m.updated_at, m.expires_at";

pub(crate) const SELECT_ALIVE_SQL: &str =
    "SELECT m.id, m.content, m.category, m.tags, m.metadata, m.project, m.created_at, m.updated_at, m.expires_at
     FROM memories m
     WHERE m.id = ?1 AND (m.expires_at IS NULL OR m.expires_at > datetime('now'))";

pub(crate) const SELECT_RAW_SQL: &str =
    "SELECT m.id, m.content, m.category, m.tags, m.metadata, m.project, m.created_at, m.updated_at, m.expires_at
     FROM memories m
     WHERE m.id = ?1";

pub(crate) const INSERT_SQL: &str =
    "INSERT INTO memories (id, content, category, tags, metadata, project, expires_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

pub(crate) const UPDATE_SQL: &str =
    "UPDATE memories
     SET content = ?2, category = ?3, tags = ?4, metadata = ?5, project = ?6, expires_at = ?7,
         updated_at = datetime('now')
     WHERE id = ?1";

pub(crate) const DELETE_SQL: &str = "DELETE FROM memories WHERE id = ?1";

/// Map one `MEMORY_COLUMNS` row into a [`Memory`].
pub(crate) fn memory_from_row(row: &Row<'_>) -> rusqlite::Result<Memory> {
    let tags_json: String = row.get(3)?;
    let metadata_json: String = row.get(4)?;
    Ok(Memory {
        id: row.get(0)?,
        content: row.get(1)?,
        category: row.get(2)?,
        tags: json_column(3, &tags_json)?,
        metadata: json_column(4, &metadata_json)?,
        project: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        expires_at: row.get(8)?,
    })
}

pub(crate) fn json_column<T: serde::de::DeserializeOwned>(
    index: usize,
    raw: &str,
) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(err))
    })
}

pub(crate) fn fetch_memory(conn: &Connection, id: &str, alive_only: bool) -> Result<Option<Memory>> {
    let sql = if alive_only { SELECT_ALIVE_SQL } else { SELECT_RAW_SQL };
    let mut stmt = conn.prepare_cached(sql)?;
    let mut rows = stmt.query(params![id])?;
    match rows.next()? {
        Some(row) => Ok(Some(memory_from_row(row)?)),
        None => Ok(None),
    }
}

/// Normalized column values ready for insert or update.
struct PreparedWrite {
    content: String,
    category: String,
    tags_json: String,
    metadata_json: String,
    project: String,
    expires_at: Option<String>,
    auto_link: bool,
    dedup: bool,
}

fn prepare_create(store: &MemoryStore, req: &CreateMemory) -> Result<PreparedWrite> {
    let content = normalize::normalize_content(&req.content)?;
    let tags = normalize::normalize_tags(&req.tags);
    let metadata = req.metadata.clone().unwrap_or_default();
    Ok(PreparedWrite {
        content,
        category: normalize::normalize_category(req.category.as_deref()),
        tags_json: serde_json::to_string(&tags)?,
        metadata_json: serde_json::to_string(&metadata)?,
        project: store.project_or_default(req.project.as_deref()).to_string(),
        expires_at: req.expires_at.clone(),
        auto_link: req.auto_link,
        dedup: req.dedup,
    })
}

fn insert_memory(conn: &Connection, id: &str, row: &PreparedWrite) -> Result<()> {
    let mut stmt = conn.prepare_cached(INSERT_SQL)?;
    stmt.execute(params![
        id,
        row.content,
        row.category,
        row.tags_json,
        row.metadata_json,
        row.project,
        row.expires_at,
    ])?;
    Ok(())
}

/// Dedup probe: a live memory in the same project whose trimmed-content
/// fingerprint matches the candidate's.
fn find_duplicate(conn: &Connection, project: &str, content: &str) -> Result<Option<Memory>> {
    let sql = format!(
        "SELECT {MEMORY_COLUMNS} FROM memories m
         WHERE m.project = ?1 AND m.content = ?2 AND {}
         ORDER BY m.created_at DESC, m.rowid DESC
         LIMIT 1",
        query::ALIVE
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let mut rows = stmt.query(params![project, content])?;
    let fingerprint = normalize::content_fingerprint(content);
    match rows.next()? {
        Some(row) => {
            let memory = memory_from_row(row)?;
            if normalize::content_fingerprint(&memory.content) == fingerprint {
                Ok(Some(memory))
            } else {
                Ok(None)
            }
        }
        None => Ok(None),
    }
}

impl MemoryStore {
    /// Create one memory, running auto-link inference unless opted out.
    /// With `dedup`, an existing live memory in the same project with the
    /// same content fingerprint is returned instead of writing a new row;
    /// deduplicated rows bypass inference.
    ///
    /// # Errors
    /// [`StoreError::InvalidInput`] for empty or over-long content.
    pub fn create(&mut self, req: CreateMemory) -> Result<CreateOutcome> {
        let prepared = prepare_create(self, &req)?;

        if prepared.dedup {
            if let Some(existing) = find_duplicate(&self.conn, &prepared.project, &prepared.content)? {
                return Ok(CreateOutcome { memory: existing, deduplicated: true });
            }
        }

        let id = normalize::new_memory_id();
        insert_memory(&self.conn, &id, &prepared)?;
        let memory = fetch_memory(&self.conn, &id, false)?
            .ok_or_else(|| StoreError::MemoryNotFound(id.clone()))?;

        if prepared.auto_link {
            autolink::infer_links(self, &memory);
        }
        Ok(CreateOutcome { memory, deduplicated: false })
    }

    /// Create many memories in one transaction: all rows commit together or
    /// none do. Inference runs per created row after the commit so it can
    /// never poison batch atomicity.
    ///
    /// # Errors
    /// Any per-item validation failure rejects the whole batch before the
    /// transaction opens.
    pub fn create_batch(&mut self, reqs: Vec<CreateMemory>) -> Result<Vec<CreateOutcome>> {
        if reqs.is_empty() {
            return Ok(Vec::new());
        }
        let prepared: Vec<PreparedWrite> =
            reqs.iter().map(|req| prepare_create(self, req)).collect::<Result<_>>()?;

        let tx = self.conn.transaction()?;
        let mut placed: Vec<(String, bool)> = Vec::with_capacity(prepared.len());
        for row in &prepared {
            if row.dedup {
                if let Some(existing) = find_duplicate(&tx, &row.project, &row.content)? {
                    placed.push((existing.id, true));
                    continue;
                }
            }
            let id = normalize::new_memory_id();
            insert_memory(&tx, &id, row)?;
            placed.push((id, false));
        }
        tx.commit()?;

        let mut outcomes = Vec::with_capacity(placed.len());
        for ((id, deduplicated), row) in placed.into_iter().zip(&prepared) {
            let memory = fetch_memory(&self.conn, &id, false)?
                .ok_or_else(|| StoreError::MemoryNotFound(id.clone()))?;
            if !deduplicated && row.auto_link {
                autolink::infer_links(self, &memory);
            }
            outcomes.push(CreateOutcome { memory, deduplicated });
        }
        Ok(outcomes)
    }

    /// Fetch one live memory.
    ///
    /// # Errors
    /// Storage failures only; a missing or expired row is `None`.
    pub fn get_by_id(&self, id: &str) -> Result<Option<Memory>> {
        fetch_memory(&self.conn, id, true)
    }

    /// Fetch several live memories, preserving input order. Empty input
    /// returns empty without querying.
    ///
    /// # Errors
    /// Storage failures only.
    pub fn get_by_ids(&self, ids: &[String]) -> Result<Vec<Memory>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders =
            (1..=ids.len()).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ");
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories m
             WHERE m.id IN ({placeholders}) AND {}",
            query::ALIVE
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(ids.iter()))?;
        let mut found: Vec<Memory> = Vec::with_capacity(ids.len());
        while let Some(row) = rows.next()? {
            found.push(memory_from_row(row)?);
        }
        found.sort_by_key(|m| ids.iter().position(|id| *id == m.id));
        Ok(found)
    }

    /// Merge-update one memory: omitted fields keep stored values, `tags`
    /// and `metadata` replace when provided, `expires_at` distinguishes
    /// keep/clear/set. Bumps `updated_at`; an empty change set is a touch.
    ///
    /// # Errors
    /// [`StoreError::MemoryNotFound`] for a missing id;
    /// [`StoreError::InvalidInput`] for empty content.
    pub fn update(&mut self, id: &str, changes: UpdateMemory) -> Result<Memory> {
        apply_update(&self.conn, id, changes, None)?
            .ok_or_else(|| StoreError::MemoryNotFound(id.to_string()))
    }

    /// Merge-update many memories in one transaction. Missing ids are
    /// reported in `not_found`, never thrown.
    ///
    /// # Errors
    /// Per-item validation failures (empty change set, empty content) reject
    /// the whole batch before the transaction opens.
    pub fn update_batch(&mut self, items: Vec<UpdateBatchItem>) -> Result<UpdateBatchResult> {
        let mut result = UpdateBatchResult::default();
        if items.is_empty() {
            return Ok(result);
        }
        for item in &items {
            if item.changes.is_empty() {
                return Err(ValidationError::EmptyUpdate(item.id.clone()).into());
            }
            if let Some(content) = &item.changes.content {
                normalize::normalize_content(content)?;
            }
        }

        let tx = self.conn.transaction()?;
        for item in items {
            match apply_update(&tx, &item.id, item.changes, None)? {
                Some(_) => result.updated.push(item.id),
                None => result.not_found.push(item.id),
            }
        }
        tx.commit()?;
        Ok(result)
    }

    /// Delete one memory. Incident links cascade and the delete trigger
    /// appends the final pre-image history row before the row disappears.
    ///
    /// # Errors
    /// [`StoreError::MemoryNotFound`] for a missing id.
    pub fn delete(&mut self, id: &str) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(DELETE_SQL)?;
        if stmt.execute(params![id])? == 0 {
            return Err(StoreError::MemoryNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Delete many memories in one transaction; missing ids are reported,
    /// never thrown.
    ///
    /// # Errors
    /// Storage failures roll the whole batch back.
    pub fn delete_batch(&mut self, ids: &[String]) -> Result<DeleteBatchResult> {
        let mut result = DeleteBatchResult::default();
        if ids.is_empty() {
            return Ok(result);
        }
        let tx = self.conn.transaction()?;
        for id in ids {
            let deleted = {
                let mut stmt = tx.prepare_cached(DELETE_SQL)?;
                stmt.execute(params![id])? > 0
            };
            if deleted {
                result.deleted.push(id.clone());
            } else {
                result.not_found.push(id.clone());
            }
        }
        tx.commit()?;
        Ok(result)
    }

    /// Filtered, sorted, paginated listing with a window-count total in the
    /// same query.
    ///
    /// # Errors
    /// [`StoreError::InvalidInput`] for a metadata key without a value.
    pub fn list(&self, req: &ListRequest) -> Result<ListResult> {
        let clause = query::compile_filter(&req.filter, &self.config.default_project)?;
        let key = query::list_shape_key(&clause.flags, req.sort);
        let sql = self
            .shapes
            .get_or_build(&key, || query::build_list_sql(&clause.predicates, req.sort));

        let mut params = clause.params;
        params.push(Box::new(i64::from(req.limit.unwrap_or(DEFAULT_PAGE_LIMIT))));
        params.push(Box::new(i64::from(req.offset)));
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare_cached(&sql)?;
        let mut rows = stmt.query(param_refs.as_slice())?;
        let mut memories = Vec::new();
        let mut total = 0u64;
        while let Some(row) = rows.next()? {
            total = row.get::<_, i64>(9)? as u64;
            memories.push(memory_from_row(row)?);
        }
        Ok(ListResult { memories, total })
    }

    /// Export every stored row (expired included) with a digest over the
    /// serialized rows.
    ///
    /// # Errors
    /// Storage or serialization failures.
    pub fn export_all(&self) -> Result<ExportBundle> {
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories m ORDER BY m.created_at ASC, m.rowid ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut memories = Vec::new();
        while let Some(row) = rows.next()? {
            memories.push(memory_from_row(row)?);
        }
        let digest = bundle_digest(&memories)?;
        let exported_at: String =
            self.conn.query_row("SELECT datetime('now')", [], |row| row.get(0))?;
        Ok(ExportBundle { exported_at, count: memories.len(), digest, memories })
    }

    /// Import a bundle in one transaction. `Insert` always generates fresh
    /// ids; `Upsert` updates rows whose supplied id exists and inserts the
    /// rest with fresh ids. Empty-content rows are skipped and counted.
    ///
    /// # Errors
    /// [`StoreError::InvalidInput`] when the bundle digest does not match
    /// its rows; storage failures roll the whole import back.
    pub fn import_batch(&mut self, bundle: &ExportBundle, mode: ImportMode) -> Result<ImportResult> {
        if !bundle.digest.is_empty() && bundle_digest(&bundle.memories)? != bundle.digest {
            return Err(ValidationError::DigestMismatch.into());
        }

        let mut result = ImportResult::default();
        if bundle.memories.is_empty() {
            return Ok(result);
        }

        let default_project = self.config.default_project.clone();
        let tx = self.conn.transaction()?;
        for row in &bundle.memories {
            let Ok(content) = normalize::normalize_content(&row.content) else {
                result.skipped += 1;
                continue;
            };
            let tags = normalize::normalize_tags(&row.tags);
            let project = if row.project.trim().is_empty() {
                default_project.clone()
            } else {
                row.project.trim().to_string()
            };
            let prepared = PreparedWrite {
                content,
                category: normalize::normalize_category(Some(&row.category)),
                tags_json: serde_json::to_string(&tags)?,
                metadata_json: serde_json::to_string(&row.metadata)?,
                project,
                expires_at: row.expires_at.clone(),
                auto_link: false,
                dedup: false,
            };

            let existing = mode == ImportMode::Upsert
                && !row.id.is_empty()
                && memory_exists(&tx, &row.id)?;
            let id = if existing {
                let mut stmt = tx.prepare_cached(UPDATE_SQL)?;
                stmt.execute(params![
                    row.id,
                    prepared.content,
                    prepared.category,
                    prepared.tags_json,
                    prepared.metadata_json,
                    prepared.project,
                    prepared.expires_at,
                ])?;
                row.id.clone()
            } else {
                let id = normalize::new_memory_id();
                insert_memory(&tx, &id, &prepared)?;
                id
            };
            result.ids.push(id);
            result.imported += 1;
        }
        tx.commit()?;
        Ok(result)
    }
}

fn memory_exists(conn: &Connection, id: &str) -> Result<bool> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM memories WHERE id = ?1)",
        params![id],
        |row| row.get::<_, i64>(0),
    )?;
    Ok(exists == 1)
}

/// Merge `changes` over the stored row and write it back; `None` when the
/// id is unknown. `project` stays as stored unless a restore supplies the
/// snapshot's namespace through `project_override`.
pub(crate) fn apply_update(
    conn: &Connection,
    id: &str,
    changes: UpdateMemory,
    project_override: Option<String>,
) -> Result<Option<Memory>> {
    let Some(current) = fetch_memory(conn, id, false)? else {
        return Ok(None);
    };

    let content = match changes.content {
        Some(content) => normalize::normalize_content(&content)?,
        None => current.content,
    };
    let category = match changes.category {
        Some(category) => normalize::normalize_category(Some(&category)),
        None => current.category,
    };
    let tags: Vec<String> = match changes.tags {
        Some(tags) => normalize::normalize_tags(&tags),
        None => current.tags,
    };
    let metadata: Map<String, Value> = changes.metadata.unwrap_or(current.metadata);
    let project = project_override.unwrap_or(current.project);
    let expires_at = match changes.expires_at {
        engram_core::ExpiryChange::Keep => current.expires_at,
        engram_core::ExpiryChange::Clear => None,
        engram_core::ExpiryChange::At(value) => Some(value),
    };

    let mut stmt = conn.prepare_cached(UPDATE_SQL)?;
    stmt.execute(params![
        id,
        content,
        category,
        serde_json::to_string(&tags)?,
        serde_json::to_string(&metadata)?,
        project,
        expires_at,
    ])?;
    fetch_memory(conn, id, false)
}

/// SHA-256 hex over the newline-joined serialized rows.
pub(crate) fn bundle_digest(memories: &[Memory]) -> Result<String> {
    let mut hasher = Sha256::new();
    for memory in memories {
        hasher.update(serde_json::to_string(memory)?.as_bytes());
        hasher.update(b"\n");
    }
    Ok(format!("{:x}", hasher.finalize()))
}
