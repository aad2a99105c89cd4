//! Full-text search: user-input compilation into FTS5 match syntax plus the
//! rank-ordered, filter-aware search query.

use engram_core::{ListResult, SearchMode, SearchRequest, ValidationError};
use rusqlite::ToSql;

use crate::error::Result;
use crate::memory::memory_from_row;
use crate::{query, MemoryStore};

const DEFAULT_NEAR_DISTANCE: u32 = 10;

/// Compile user input into an FTS5 match expression. Tokens are split on
/// whitespace, inner double quotes are escaped by doubling, and the result
/// is `None` when no tokens remain — callers short-circuit to an empty
/// result instead of issuing a query.
///
/// # Errors
/// [`ValidationError::OutOfRange`] for a near distance outside 1–100.
pub(crate) fn compile_match(
    input: &str,
    mode: SearchMode,
    near_distance: Option<u32>,
) -> Result<Option<String>> {
    let tokens: Vec<String> = input
        .split_whitespace()
        .filter(|t| !t.is_empty())
        .map(|t| t.replace('"', "\"\""))
        .collect();
    if tokens.is_empty() {
        return Ok(None);
    }

    let compiled = match mode {
        SearchMode::Any => tokens
            .iter()
            .map(|t| format!("\"{t}\"*"))
            .collect::<Vec<_>>()
            .join(" OR "),
        SearchMode::All => tokens
            .iter()
            .map(|t| format!("\"{t}\"*"))
            .collect::<Vec<_>>()
            .join(" "),
        SearchMode::Near => {
            let distance = near_distance.unwrap_or(DEFAULT_NEAR_DISTANCE);
            if !(1..=100).contains(&distance) {
                return Err(ValidationError::OutOfRange {
                    field: "near_distance",
                    value: i64::from(distance),
                }
                .into());
            }
            let quoted =
                tokens.iter().map(|t| format!("\"{t}\"")).collect::<Vec<_>>().join(" ");
            format!("NEAR({quoted}, {distance})")
        }
    };
    Ok(Some(compiled))
}

impl MemoryStore {
    /// Full-text search combined with the standard filter predicates and a
    /// window-count total. Results are rank-ordered unless the request
    /// overrides the sort.
    ///
    /// # Errors
    /// [`StoreError::InvalidInput`](crate::StoreError::InvalidInput) for a
    /// bad near distance or metadata filter shape.
    pub fn search(&self, req: &SearchRequest) -> Result<ListResult> {
        let Some(match_expr) = compile_match(&req.query, req.mode, req.near_distance)? else {
            return Ok(ListResult { memories: Vec::new(), total: 0 });
        };

        let clause = query::compile_filter(&req.filter, &self.config.default_project)?;
        let key = query::search_shape_key(&clause.flags, req.sort);
        let sql = self
            .shapes
            .get_or_build(&key, || query::build_search_sql(&clause.predicates, req.sort));

        let mut params: Vec<Box<dyn ToSql>> = Vec::with_capacity(clause.params.len() + 3);
        params.push(Box::new(match_expr));
        params.extend(clause.params);
        params.push(Box::new(i64::from(req.limit.unwrap_or(engram_core::DEFAULT_PAGE_LIMIT))));
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
}
