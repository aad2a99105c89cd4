//! Project namespaces: listing, tag-driven migration, and tag rename.

use engram_core::{ProjectCount, RenameReport, ValidationError};
use rusqlite::params;

use crate::error::Result;
use crate::{query, MemoryStore};

impl MemoryStore {
    /// Distinct project names with live-memory counts, largest first.
    ///
    /// # Errors
    /// Storage failures only.
    pub fn list_projects(&self) -> Result<Vec<ProjectCount>> {
        let sql = format!(
            "SELECT m.project, COUNT(*) AS n
             FROM memories m
             WHERE {}
             GROUP BY m.project
             ORDER BY n DESC, m.project ASC",
            query::ALIVE
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(ProjectCount { project: row.get(0)?, count: row.get::<_, i64>(1)? as u64 })
        })?;
        let mut projects = Vec::new();
        for row in rows {
            projects.push(row?);
        }
        Ok(projects)
    }

    /// Reassign every memory carrying `tag` to `project`, bumping
    /// `updated_at`. Returns the number of rows moved.
    ///
    /// # Errors
    /// [`StoreError::InvalidInput`](crate::StoreError::InvalidInput) for an
    /// empty tag or project.
    pub fn migrate_to_project(&mut self, tag: &str, project: &str) -> Result<usize> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(ValidationError::EmptyTag.into());
        }
        let project = project.trim();
        if project.is_empty() {
            return Err(ValidationError::EmptyProject.into());
        }
        let moved = self.conn.execute(
            "UPDATE memories
             SET project = ?1, updated_at = datetime('now')
             WHERE EXISTS (SELECT 1 FROM json_each(memories.tags) WHERE value = ?2)",
            params![project, tag],
        )?;
        Ok(moved)
    }

    /// Replace `old` with `new` in the tags array of every memory in the
    /// project carrying `old`, deduplicating with a distinct aggregation.
    /// `old == new` is a no-op returning zero and bumps nothing.
    ///
    /// # Errors
    /// [`StoreError::InvalidInput`](crate::StoreError::InvalidInput) for an
    /// empty tag name.
    pub fn rename_tag(
        &mut self,
        old: &str,
        new: &str,
        project: Option<&str>,
    ) -> Result<RenameReport> {
        let old = old.trim();
        let new = new.trim();
        if old.is_empty() || new.is_empty() {
            return Err(ValidationError::EmptyTag.into());
        }
        if old == new {
            return Ok(RenameReport { updated: 0, old_tag: old.into(), new_tag: new.into() });
        }
        let project = self.project_or_default(project).to_string();

        let updated = self.conn.execute(
            "UPDATE memories
             SET tags = (
               SELECT json_group_array(DISTINCT CASE WHEN je.value = ?1 THEN ?2 ELSE je.value END)
               FROM json_each(memories.tags) AS je
             ),
             updated_at = datetime('now')
             WHERE project = ?3
               AND EXISTS (SELECT 1 FROM json_each(memories.tags) WHERE value = ?1)",
            params![old, new, project],
        )?;
        Ok(RenameReport { updated, old_tag: old.into(), new_tag: new.into() })
    }
}
