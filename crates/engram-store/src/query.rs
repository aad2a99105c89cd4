//! Dynamic filtered-query composition and the shape-keyed statement cache.
//!
//! Cache keys encode the *shape* of a query (which filter clauses are
//! present, which sort applies), never parameter values, so the hot set of
//! compiled plans stays small. SQL text is memoized per shape and handed to
//! `prepare_cached`, which keeps the compiled statement resident.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use engram_core::{MemoryFilter, SortOrder, ValidationError};
use rusqlite::ToSql;

use crate::error::Result;
use crate::memory::MEMORY_COLUMNS;

/// TTL predicate shared by every read path (I4).
pub(crate) const ALIVE: &str = "(m.expires_at IS NULL OR m.expires_at > datetime('now'))";

/// Memoized SQL text per query shape. Interior mutability keeps read
/// operations on `&self`; the store is single-threaded by contract.
#[derive(Default)]
pub(crate) struct ShapeCache {
    shapes: RefCell<HashMap<String, Arc<str>>>,
}

impl ShapeCache {
    pub(crate) fn get_or_build(&self, key: &str, build: impl FnOnce() -> String) -> Arc<str> {
        if let Some(sql) = self.shapes.borrow().get(key) {
            return Arc::clone(sql);
        }
        let sql: Arc<str> = Arc::from(build());
        self.shapes.borrow_mut().insert(key.to_string(), Arc::clone(&sql));
        sql
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.shapes.borrow().len()
    }
}

/// A compiled filter: `AND`-joined predicates, their bound values, and the
/// shape flags contributing to the cache key.
pub(crate) struct FilterClause {
    pub predicates: String,
    pub params: Vec<Box<dyn ToSql>>,
    pub flags: String,
}

/// Compose the standard predicate set: project scope, TTL-alive, then the
/// optional category/tag/metadata/date clauses.
pub(crate) fn compile_filter(
    filter: &MemoryFilter,
    default_project: &str,
) -> Result<FilterClause> {
    let mut predicates = format!("m.project = ? AND {ALIVE}");
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();
    let mut flags = String::new();

    let project = filter
        .project
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(default_project);
    params.push(Box::new(project.to_string()));

    if let Some(category) = filter.category.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        predicates.push_str(" AND m.category = ?");
        params.push(Box::new(category.to_lowercase()));
        flags.push('c');
    }

    if let Some(tag) = filter.tag.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        predicates.push_str(" AND EXISTS (SELECT 1 FROM json_each(m.tags) WHERE json_each.value = ?)");
        params.push(Box::new(tag.to_string()));
        flags.push('t');
    }

    match (&filter.metadata_key, &filter.metadata_value) {
        (Some(key), Some(value)) => {
            predicates.push_str(" AND json_extract(m.metadata, ?) = ?");
            params.push(Box::new(format!("$.{key}")));
            params.push(Box::new(value.clone()));
            flags.push('m');
        }
        (Some(_), None) => return Err(ValidationError::MetadataKeyWithoutValue.into()),
        _ => {}
    }

    if let Some(bound) = &filter.created_after {
        predicates.push_str(" AND m.created_at >= ?");
        params.push(Box::new(bound.clone()));
        flags.push_str("ca");
    }
    if let Some(bound) = &filter.created_before {
        predicates.push_str(" AND m.created_at <= ?");
        params.push(Box::new(bound.clone()));
        flags.push_str("cb");
    }
    if let Some(bound) = &filter.updated_after {
        predicates.push_str(" AND m.updated_at >= ?");
        params.push(Box::new(bound.clone()));
        flags.push_str("ua");
    }
    if let Some(bound) = &filter.updated_before {
        predicates.push_str(" AND m.updated_at <= ?");
        params.push(Box::new(bound.clone()));
        flags.push_str("ub");
    }

    Ok(FilterClause { predicates, params, flags })
}

pub(crate) fn sort_sql(sort: SortOrder) -> &'static str {
    match sort {
        SortOrder::CreatedAtDesc => "m.created_at DESC, m.rowid DESC",
        SortOrder::CreatedAtAsc => "m.created_at ASC, m.rowid ASC",
        SortOrder::UpdatedAtDesc => "m.updated_at DESC, m.rowid DESC",
    }
}

pub(crate) fn list_shape_key(flags: &str, sort: SortOrder) -> String {
    format!("list_{flags}_{}", sort.as_str())
}

pub(crate) fn build_list_sql(predicates: &str, sort: SortOrder) -> String {
    format!(
        "SELECT {MEMORY_COLUMNS}, COUNT(*) OVER () AS total
         FROM memories m
         WHERE {predicates}
         ORDER BY {}
         LIMIT ? OFFSET ?",
        sort_sql(sort)
    )
}

pub(crate) fn search_shape_key(flags: &str, sort: Option<SortOrder>) -> String {
    match sort {
        Some(sort) => format!("search_{flags}_{}", sort.as_str()),
        None => format!("search_{flags}_rank"),
    }
}

pub(crate) fn build_search_sql(predicates: &str, sort: Option<SortOrder>) -> String {
    let order = match sort {
        Some(sort) => sort_sql(sort),
        None => "f.rank",
    };
    format!(
        "SELECT {MEMORY_COLUMNS}, COUNT(*) OVER () AS total
         FROM memories_fts f
         JOIN memories m ON m.rowid = f.rowid
         WHERE memories_fts MATCH ? AND {predicates}
         ORDER BY {order}
         LIMIT ? OFFSET ?"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_keys_are_stable_and_value_independent() -> Result<()> {
        let mut filter = MemoryFilter { category: Some("code".into()), ..Default::default() };
        filter.tag = Some("rust".into());
        let first = compile_filter(&filter, "default")?;

        filter.category = Some("NOTES".into());
        filter.tag = Some("other".into());
        let second = compile_filter(&filter, "default")?;

        assert_eq!(first.flags, second.flags);
        assert_eq!(
            list_shape_key(&first.flags, SortOrder::CreatedAtAsc),
            "list_ct_created_at_asc"
        );
        Ok(())
    }

    #[test]
    fn metadata_key_without_value_is_rejected() {
        let filter =
            MemoryFilter { metadata_key: Some("source".into()), ..Default::default() };
        assert!(compile_filter(&filter, "default").is_err());
    }

    #[test]
    fn filter_params_line_up_with_predicates() -> Result<()> {
        let filter = MemoryFilter {
            category: Some("code".into()),
            metadata_key: Some("lang".into()),
            metadata_value: Some("rust".into()),
            created_after: Some("2024-01-01 00:00:00".into()),
            ..Default::default()
        };
        let clause = compile_filter(&filter, "default")?;
        // project + category + metadata path + metadata value + date bound
        assert_eq!(clause.params.len(), 5);
        assert_eq!(clause.predicates.matches('?').count(), 5);
        assert_eq!(clause.flags, "cmca");
        Ok(())
    }

    #[test]
    fn shape_cache_builds_once_per_key() {
        let cache = ShapeCache::default();
        let a = cache.get_or_build("list__created_at_desc", || "SELECT 1".into());
        let b = cache.get_or_build("list__created_at_desc", || unreachable!());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }
}
