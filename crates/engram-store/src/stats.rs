//! Aggregates and the compact session-context snapshot.

use engram_core::{
    CategoryCount, CategorySnapshot, ContextSnapshot, Memory, SnapshotItem, SnapshotOptions,
    StatsReport, TagCount,
};
use rusqlite::params;

use crate::error::Result;
use crate::memory::{json_column, memory_from_row, MEMORY_COLUMNS};
use crate::{query, MemoryStore};

const DEFAULT_RECENT_PER_CATEGORY: u32 = 3;

impl MemoryStore {
    /// Live-memory statistics for one project.
    ///
    /// # Errors
    /// Storage failures only.
    pub fn get_stats(&self, project: Option<&str>) -> Result<StatsReport> {
        let project = self.project_or_default(project).to_string();

        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM memories m WHERE m.project = ?1 AND {}", query::ALIVE),
            params![project],
            |row| row.get(0),
        )?;

        let mut by_category = Vec::new();
        {
            let sql = format!(
                "SELECT m.category, COUNT(*) AS n
                 FROM memories m
                 WHERE m.project = ?1 AND {}
                 GROUP BY m.category
                 ORDER BY n DESC, m.category ASC",
                query::ALIVE
            );
            let mut stmt = self.conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(params![project], |row| {
                Ok(CategoryCount { category: row.get(0)?, count: row.get::<_, i64>(1)? as u64 })
            })?;
            for row in rows {
                by_category.push(row?);
            }
        }

        let top_tags = self.tag_frequencies(&project, Some(20))?;

        let oldest = self.edge_memory(&project, "ASC")?;
        let newest = self.edge_memory(&project, "DESC")?;

        let avg_content_length: i64 = self.conn.query_row(
            &format!(
                "SELECT CAST(COALESCE(ROUND(AVG(LENGTH(m.content))), 0) AS INTEGER)
                 FROM memories m WHERE m.project = ?1 AND {}",
                query::ALIVE
            ),
            params![project],
            |row| row.get(0),
        )?;

        let without_tags: i64 = self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM memories m
                 WHERE m.project = ?1 AND {} AND json_array_length(m.tags) = 0",
                query::ALIVE
            ),
            params![project],
            |row| row.get(0),
        )?;
        let without_metadata: i64 = self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM memories m
                 WHERE m.project = ?1 AND {} AND m.metadata = '{{}}'",
                query::ALIVE
            ),
            params![project],
            |row| row.get(0),
        )?;

        Ok(StatsReport {
            total: total as u64,
            by_category,
            top_tags,
            oldest,
            newest,
            avg_content_length,
            without_tags: without_tags as u64,
            without_metadata: without_metadata as u64,
        })
    }

    fn edge_memory(&self, project: &str, order: &str) -> Result<Option<Memory>> {
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories m
             WHERE m.project = ?1 AND {}
             ORDER BY m.created_at {order}, m.rowid {order}
             LIMIT 1",
            query::ALIVE
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let mut rows = stmt.query(params![project])?;
        match rows.next()? {
            Some(row) => Ok(Some(memory_from_row(row)?)),
            None => Ok(None),
        }
    }

    fn tag_frequencies(&self, project: &str, limit: Option<u32>) -> Result<Vec<TagCount>> {
        let limit_clause = limit.map(|l| format!(" LIMIT {l}")).unwrap_or_default();
        let sql = format!(
            "SELECT je.value, COUNT(*) AS n
             FROM memories m, json_each(m.tags) AS je
             WHERE m.project = ?1 AND {}
             GROUP BY je.value
             ORDER BY n DESC, je.value ASC{limit_clause}",
            query::ALIVE
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![project], |row| {
            Ok(TagCount { tag: row.get(0)?, count: row.get::<_, i64>(1)? as u64 })
        })?;
        let mut tags = Vec::new();
        for row in rows {
            tags.push(row?);
        }
        Ok(tags)
    }

    /// Per-category recency snapshot in a single window-function pass, plus
    /// an optional tag-frequency index.
    ///
    /// # Errors
    /// Storage failures only.
    pub fn get_context_snapshot(&self, opts: &SnapshotOptions) -> Result<ContextSnapshot> {
        let project = self.project_or_default(opts.project.as_deref()).to_string();
        let recent = opts.recent_per_category.unwrap_or(DEFAULT_RECENT_PER_CATEGORY);

        let sql = format!(
            "WITH ranked AS (
               SELECT m.id, m.content, m.category, m.tags, m.project,
                      COUNT(*) OVER (PARTITION BY m.category) AS category_total,
                      ROW_NUMBER() OVER (
                        PARTITION BY m.category
                        ORDER BY m.created_at DESC, m.rowid DESC
                      ) AS recency_rank
               FROM memories m
               WHERE m.project = ?1 AND {}
             )
             SELECT id, content, category, tags, project, category_total
             FROM ranked
             WHERE recency_rank <= ?2
             ORDER BY category ASC, recency_rank ASC",
            query::ALIVE
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let mut rows = stmt.query(params![project, recent])?;

        let mut categories: Vec<CategorySnapshot> = Vec::new();
        while let Some(row) = rows.next()? {
            let category: String = row.get(2)?;
            let tags_json: String = row.get(3)?;
            let mut content: String = row.get(1)?;
            if let Some(max) = opts.preview_len {
                if content.chars().count() > max {
                    content = content.chars().take(max).collect();
                }
            }
            let item = SnapshotItem {
                id: row.get(0)?,
                content,
                category: category.clone(),
                tags: json_column(3, &tags_json)?,
                project: row.get(4)?,
            };
            let total = row.get::<_, i64>(5)? as u64;
            match categories.last_mut() {
                Some(last) if last.category == category => last.recent.push(item),
                _ => categories.push(CategorySnapshot {
                    category,
                    total,
                    recent: vec![item],
                }),
            }
        }

        let tags = if opts.include_tags_index {
            Some(self.tag_frequencies(&project, None)?)
        } else {
            None
        };
        Ok(ContextSnapshot { categories, tags })
    }
}
