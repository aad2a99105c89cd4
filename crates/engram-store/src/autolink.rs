//! Link inference. Three heuristics run inside the create path (unless
//! opted out) and as non-mutating suggestions. Inference failures never
//! surface to the caller; the enclosing write always succeeds.
//!
//! The numeric constants here are contract, not tuning: shared-tag weight is
//! `min(1.0, shared × 0.3)`, content-similarity admits FTS rank < −0.5 and
//! weighs `|rank|/10` clamped to [0.1, 0.9], temporal proximity is ±1 h at
//! weight 0.4, and content matching uses the first 5 tokens.

use std::collections::HashSet;

use engram_core::{
    Memory, Relation, SearchMode, SuggestOptions, SuggestedLink, SuggestionReason,
};
use rusqlite::{params, ToSql};
use tracing::warn;

use crate::error::{Result, StoreError};
use crate::memory::{fetch_memory, memory_from_row, MEMORY_COLUMNS};
use crate::search::compile_match;
use crate::{query, MemoryStore};

const SHARED_TAG_WEIGHT: f64 = 0.3;
const RANK_THRESHOLD: f64 = -0.5;
const TEMPORAL_WEIGHT: f64 = 0.4;
const TEMPORAL_WINDOW_SECONDS: i64 = 3600;
const CONTENT_PREFIX_TOKENS: usize = 5;
const SUGGESTION_PREVIEW_CHARS: usize = 80;
const DEFAULT_SUGGESTION_LIMIT: usize = 20;

/// Run inference for a freshly created memory. Each heuristic is swallowed
/// independently so one failing probe cannot stop the others.
pub(crate) fn infer_links(store: &MemoryStore, memory: &Memory) {
    if let Err(err) = infer_shared_tags(store, memory) {
        warn!(memory_id = %memory.id, %err, "shared-tag inference failed");
    }
    if let Err(err) = infer_content_similarity(store, memory) {
        warn!(memory_id = %memory.id, %err, "content-similarity inference failed");
    }
    if let Err(err) = infer_temporal(store, memory) {
        warn!(memory_id = %memory.id, %err, "temporal inference failed");
    }
}

fn insert_inferred(
    store: &MemoryStore,
    from: &str,
    to: &str,
    relation: Relation,
    weight: f64,
) -> Result<()> {
    // OR IGNORE: inference never replaces an existing edge.
    let mut stmt = store.conn.prepare_cached(
        "INSERT OR IGNORE INTO memory_links (from_id, to_id, relation, weight, auto_generated)
         VALUES (?1, ?2, ?3, ?4, 1)",
    )?;
    stmt.execute(params![from, to, relation.as_str(), weight.clamp(0.0, 1.0)])?;
    Ok(())
}

fn infer_shared_tags(store: &MemoryStore, memory: &Memory) -> Result<()> {
    if memory.tags.len() < 2 {
        return Ok(());
    }
    for (candidate_id, shared) in shared_tag_candidates(store, memory, 2, None)? {
        let weight = (shared as f64 * SHARED_TAG_WEIGHT).min(1.0);
        insert_inferred(store, &memory.id, &candidate_id, Relation::Related, weight)?;
    }
    Ok(())
}

fn infer_content_similarity(store: &MemoryStore, memory: &Memory) -> Result<()> {
    for (candidate_id, rank) in content_candidates(store, memory, None)? {
        let weight = (rank.abs() / 10.0).clamp(0.1, 0.9);
        insert_inferred(store, &memory.id, &candidate_id, Relation::References, weight)?;
    }
    Ok(())
}

fn infer_temporal(store: &MemoryStore, memory: &Memory) -> Result<()> {
    for candidate_id in temporal_candidates(store, memory, None)? {
        insert_inferred(store, &memory.id, &candidate_id, Relation::Related, TEMPORAL_WEIGHT)?;
    }
    Ok(())
}

/// Candidates sharing at least `threshold` tags, best overlap first.
/// When `exclude_linked` carries the anchor id, peers already linked in
/// either direction are skipped (suggestion mode).
fn shared_tag_candidates(
    store: &MemoryStore,
    memory: &Memory,
    threshold: u32,
    exclude_linked: Option<&str>,
) -> Result<Vec<(String, u32)>> {
    if memory.tags.is_empty() {
        return Ok(Vec::new());
    }
    let mut params: Vec<Box<dyn ToSql>> = vec![
        Box::new(memory.project.clone()),
        Box::new(memory.id.clone()),
        Box::new(threshold),
    ];
    let not_linked = not_linked_clause(&mut params, exclude_linked);
    let placeholders = (params.len() + 1..=params.len() + memory.tags.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    for tag in &memory.tags {
        params.push(Box::new(tag.clone()));
    }

    let sql = format!(
        "SELECT m.id, COUNT(*) AS shared
         FROM memories m, json_each(m.tags) AS je
         WHERE m.project = ?1 AND m.id <> ?2 AND {}{not_linked}
           AND je.value IN ({placeholders})
         GROUP BY m.id
         HAVING COUNT(*) >= ?3
         ORDER BY shared DESC, m.rowid DESC
         LIMIT 10",
        query::ALIVE
    );
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = store.conn.prepare(&sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
    })?;
    let mut candidates = Vec::new();
    for row in rows {
        candidates.push(row?);
    }
    Ok(candidates)
}

/// FTS candidates over the first tokens of the content, strongest rank
/// first. Only matches below the rank threshold qualify.
fn content_candidates(
    store: &MemoryStore,
    memory: &Memory,
    exclude_linked: Option<&str>,
) -> Result<Vec<(String, f64)>> {
    let prefix = memory
        .content
        .split_whitespace()
        .take(CONTENT_PREFIX_TOKENS)
        .collect::<Vec<_>>()
        .join(" ");
    let Some(match_expr) = compile_match(&prefix, SearchMode::Any, None)? else {
        return Ok(Vec::new());
    };

    let mut params: Vec<Box<dyn ToSql>> = vec![
        Box::new(match_expr),
        Box::new(memory.project.clone()),
        Box::new(memory.id.clone()),
        Box::new(RANK_THRESHOLD),
    ];
    let not_linked = not_linked_clause(&mut params, exclude_linked);
    let sql = format!(
        "SELECT id, score FROM (
           SELECT m.id AS id, f.rank AS score
           FROM memories_fts f
           JOIN memories m ON m.rowid = f.rowid
           WHERE memories_fts MATCH ?1 AND m.project = ?2 AND m.id <> ?3 AND {}{not_linked}
         )
         WHERE score < ?4
         ORDER BY score ASC
         LIMIT 5",
        query::ALIVE
    );
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = store.conn.prepare(&sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
    })?;
    let mut candidates = Vec::new();
    for row in rows {
        candidates.push(row?);
    }
    Ok(candidates)
}

/// Same-category peers created within the temporal window, nearest first.
fn temporal_candidates(
    store: &MemoryStore,
    memory: &Memory,
    exclude_linked: Option<&str>,
) -> Result<Vec<String>> {
    let mut params: Vec<Box<dyn ToSql>> = vec![
        Box::new(memory.project.clone()),
        Box::new(memory.category.clone()),
        Box::new(memory.id.clone()),
        Box::new(memory.created_at.clone()),
        Box::new(TEMPORAL_WINDOW_SECONDS),
    ];
    let not_linked = not_linked_clause(&mut params, exclude_linked);
    let sql = format!(
        "SELECT m.id
         FROM memories m
         WHERE m.project = ?1 AND m.category = ?2 AND m.id <> ?3 AND {}{not_linked}
           AND ABS(strftime('%s', m.created_at) - strftime('%s', ?4)) <= ?5
         ORDER BY ABS(strftime('%s', m.created_at) - strftime('%s', ?4)) ASC, m.rowid DESC
         LIMIT 5",
        query::ALIVE
    );
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = store.conn.prepare(&sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), |row| row.get::<_, String>(0))?;
    let mut candidates = Vec::new();
    for row in rows {
        candidates.push(row?);
    }
    Ok(candidates)
}

fn not_linked_clause(params: &mut Vec<Box<dyn ToSql>>, anchor: Option<&str>) -> String {
    match anchor {
        Some(anchor) => {
            params.push(Box::new(anchor.to_string()));
            let index = params.len();
            format!(
                " AND NOT EXISTS (SELECT 1 FROM memory_links l
                   WHERE (l.from_id = ?{index} AND l.to_id = m.id)
                      OR (l.from_id = m.id AND l.to_id = ?{index}))"
            )
        }
        None => String::new(),
    }
}

impl MemoryStore {
    /// Non-mutating link suggestions. With an id, that memory is analyzed;
    /// otherwise up to five project orphans are. Uses the inference
    /// heuristics with a gentler shared-tag threshold of 1, skips peers
    /// already linked to the analyzed memory, and deduplicates per
    /// `(from, to)` pair.
    ///
    /// # Errors
    /// [`StoreError::MemoryNotFound`] when an explicit id is unknown.
    pub fn suggest_links(&self, opts: &SuggestOptions) -> Result<Vec<SuggestedLink>> {
        let project = self.project_or_default(opts.project.as_deref()).to_string();
        let limit = opts.limit.map_or(DEFAULT_SUGGESTION_LIMIT, |l| l as usize);

        let targets: Vec<Memory> = match &opts.id {
            Some(id) => {
                let memory = fetch_memory(&self.conn, id, true)?
                    .ok_or_else(|| StoreError::MemoryNotFound(id.clone()))?;
                vec![memory]
            }
            None => self.project_orphans(&project)?,
        };

        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut suggestions = Vec::new();
        for target in &targets {
            for suggestion in self.suggestions_for(target)? {
                if suggestions.len() >= limit {
                    return Ok(suggestions);
                }
                let pair = (suggestion.from_id.clone(), suggestion.to_id.clone());
                if seen.insert(pair) {
                    suggestions.push(suggestion);
                }
            }
        }
        Ok(suggestions)
    }

    fn project_orphans(&self, project: &str) -> Result<Vec<Memory>> {
        let sql = format!(
            "SELECT {MEMORY_COLUMNS}
             FROM memories m
             WHERE m.project = ?1 AND {}
               AND NOT EXISTS (SELECT 1 FROM memory_links l
                               WHERE l.from_id = m.id OR l.to_id = m.id)
             ORDER BY m.created_at DESC, m.rowid DESC
             LIMIT 5",
            query::ALIVE
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![project], |row| memory_from_row(row))?;
        let mut orphans = Vec::new();
        for row in rows {
            orphans.push(row?);
        }
        Ok(orphans)
    }

    fn suggestions_for(&self, target: &Memory) -> Result<Vec<SuggestedLink>> {
        let anchor = Some(target.id.as_str());
        let mut suggestions = Vec::new();

        for (candidate_id, shared) in shared_tag_candidates(self, target, 1, anchor)? {
            let weight = (shared as f64 * SHARED_TAG_WEIGHT).min(1.0);
            if let Some(suggestion) = self.suggestion_payload(
                target,
                &candidate_id,
                Relation::Related,
                weight,
                SuggestionReason::SharedTags,
            )? {
                suggestions.push(suggestion);
            }
        }
        for (candidate_id, rank) in content_candidates(self, target, anchor)? {
            let weight = (rank.abs() / 10.0).clamp(0.1, 0.9);
            if let Some(suggestion) = self.suggestion_payload(
                target,
                &candidate_id,
                Relation::References,
                weight,
                SuggestionReason::ContentSimilarity,
            )? {
                suggestions.push(suggestion);
            }
        }
        for candidate_id in temporal_candidates(self, target, anchor)? {
            if let Some(suggestion) = self.suggestion_payload(
                target,
                &candidate_id,
                Relation::Related,
                TEMPORAL_WEIGHT,
                SuggestionReason::TemporalProximity,
            )? {
                suggestions.push(suggestion);
            }
        }
        Ok(suggestions)
    }

    fn suggestion_payload(
        &self,
        target: &Memory,
        candidate_id: &str,
        relation: Relation,
        weight: f64,
        reason: SuggestionReason,
    ) -> Result<Option<SuggestedLink>> {
        let Some(candidate) = fetch_memory(&self.conn, candidate_id, true)? else {
            return Ok(None);
        };
        Ok(Some(SuggestedLink {
            from_id: target.id.clone(),
            to_id: candidate.id,
            preview: candidate.content.chars().take(SUGGESTION_PREVIEW_CHARS).collect(),
            category: candidate.category,
            tags: candidate.tags,
            suggested_relation: relation,
            weight,
            reason,
        }))
    }
}
