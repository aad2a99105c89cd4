//! Directed typed edges: upsert/update/unlink/listing, 1-hop neighbors, and
//! multi-hop traversal with cycle suppression.

use engram_core::{
    DeepQuery, DeepRelated, Link, LinkDirection, LinkPage, LinkQuery, Relation, RelatedMemory,
    RelatedQuery, ValidationError, DEFAULT_PAGE_LIMIT,
};
use rusqlite::{params, Row, ToSql};

use crate::error::{Result, StoreError};
use crate::memory::{memory_from_row, MEMORY_COLUMNS};
use crate::{query, MemoryStore};

pub(crate) const LINK_COLUMNS: &str =
    "l.from_id, l.to_id, l.relation, l.weight, l.auto_generated, l.created_at";

pub(crate) const SELECT_LINK_SQL: &str =
    "SELECT l.from_id, l.to_id, l.relation, l.weight, l.auto_generated, l.created_at
     FROM memory_links l
     WHERE l.from_id = ?1 AND l.to_id = ?2";

pub(crate) const UPSERT_LINK_SQL: &str =
    "INSERT INTO memory_links (from_id, to_id, relation, weight, auto_generated)
     VALUES (?1, ?2, ?3, ?4, ?5)
     ON CONFLICT(from_id, to_id) DO UPDATE SET
       relation = excluded.relation,
       weight = excluded.weight,
       auto_generated = excluded.auto_generated";

pub(crate) const DELETE_LINK_SQL: &str =
    "DELETE FROM memory_links WHERE from_id = ?1 AND to_id = ?2";

const UPDATE_LINK_SQL: &str =
    "UPDATE memory_links SET relation = ?3 WHERE from_id = ?1 AND to_id = ?2";

// Outgoing-edge breadth expansion with a comma-delimited path string as the
// cycle guard; the aggregate keeps the minimum depth per reachable node.
const DEEP_SQL: &str = "
WITH RECURSIVE traverse(id, depth, path) AS (
  SELECT ?1, 0, ?1
  UNION ALL
  SELECT l.to_id, t.depth + 1, t.path || ',' || l.to_id
  FROM memory_links l
  JOIN traverse t ON l.from_id = t.id
  WHERE t.depth < ?2
    AND instr(',' || t.path || ',', ',' || l.to_id || ',') = 0
)
SELECT m.id, m.content, m.category, m.tags, m.metadata, m.project, m.created_at, m.updated_at, m.expires_at,
       MIN(t.depth) AS depth
FROM traverse t
JOIN memories m ON m.id = t.id
WHERE t.id <> ?1
  AND m.project = ?3
  AND (m.expires_at IS NULL OR m.expires_at > datetime('now'))
GROUP BY m.id
ORDER BY depth ASC
LIMIT ?4";

const DEEP_RELATION_SQL: &str = "
WITH RECURSIVE traverse(id, depth, path) AS (
  SELECT ?1, 0, ?1
  UNION ALL
  SELECT l.to_id, t.depth + 1, t.path || ',' || l.to_id
  FROM memory_links l
  JOIN traverse t ON l.from_id = t.id
  WHERE t.depth < ?2
    AND l.relation = ?5
    AND instr(',' || t.path || ',', ',' || l.to_id || ',') = 0
)
SELECT m.id, m.content, m.category, m.tags, m.metadata, m.project, m.created_at, m.updated_at, m.expires_at,
       MIN(t.depth) AS depth
FROM traverse t
JOIN memories m ON m.id = t.id
WHERE t.id <> ?1
  AND m.project = ?3
  AND (m.expires_at IS NULL OR m.expires_at > datetime('now'))
GROUP BY m.id
ORDER BY depth ASC
LIMIT ?4";

pub(crate) fn link_from_row(row: &Row<'_>) -> rusqlite::Result<Link> {
    let relation_raw: String = row.get(2)?;
    Ok(Link {
        from_id: row.get(0)?,
        to_id: row.get(1)?,
        relation: parse_relation(2, &relation_raw)?,
        weight: row.get(3)?,
        auto_generated: row.get::<_, i64>(4)? != 0,
        created_at: row.get(5)?,
    })
}

fn parse_relation(index: usize, raw: &str) -> rusqlite::Result<Relation> {
    Relation::parse(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown relation: {raw}"),
            )),
        )
    })
}

impl MemoryStore {
    /// Upsert the edge `(from, to)`. Defaults: relation `related`, weight
    /// 1.0, manual. Weight is clamped to [0.0, 1.0].
    ///
    /// # Errors
    /// [`StoreError::InvalidInput`] for a self-loop;
    /// [`StoreError::Integrity`] when either endpoint does not exist.
    pub fn link_memories(
        &mut self,
        from: &str,
        to: &str,
        relation: Option<Relation>,
        weight: Option<f64>,
        auto_generated: bool,
    ) -> Result<Link> {
        if from == to {
            return Err(ValidationError::SelfLink(from.to_string()).into());
        }
        let relation = relation.unwrap_or_default();
        let weight = weight.unwrap_or(1.0).clamp(0.0, 1.0);

        let mut stmt = self.conn.prepare_cached(UPSERT_LINK_SQL)?;
        stmt.execute(params![from, to, relation.as_str(), weight, i64::from(auto_generated)])?;
        self.get_link(from, to)?.ok_or(StoreError::LinkNotFound {
            from_id: from.to_string(),
            to_id: to.to_string(),
        })
    }

    /// Change the relation of an existing edge.
    ///
    /// # Errors
    /// [`StoreError::LinkNotFound`] when the edge is absent.
    pub fn update_link(&mut self, from: &str, to: &str, relation: Relation) -> Result<Link> {
        let changed = self
            .conn
            .prepare_cached(UPDATE_LINK_SQL)?
            .execute(params![from, to, relation.as_str()])?;
        if changed == 0 {
            return Err(StoreError::LinkNotFound {
                from_id: from.to_string(),
                to_id: to.to_string(),
            });
        }
        self.get_link(from, to)?.ok_or(StoreError::LinkNotFound {
            from_id: from.to_string(),
            to_id: to.to_string(),
        })
    }

    /// Remove the edge `(from, to)`; reports whether one was removed.
    ///
    /// # Errors
    /// Storage failures only.
    pub fn unlink_memories(&mut self, from: &str, to: &str) -> Result<bool> {
        let mut stmt = self.conn.prepare_cached(DELETE_LINK_SQL)?;
        Ok(stmt.execute(params![from, to])? > 0)
    }

    /// Fetch one edge.
    ///
    /// # Errors
    /// Storage failures only; a missing edge is `None`.
    pub fn get_link(&self, from: &str, to: &str) -> Result<Option<Link>> {
        let mut stmt = self.conn.prepare_cached(SELECT_LINK_SQL)?;
        let mut rows = stmt.query(params![from, to])?;
        match rows.next()? {
            Some(row) => Ok(Some(link_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// 1-hop neighbors of a node. `Both` concatenates the outgoing side
    /// followed by the incoming side. Peers are alive-scoped.
    ///
    /// # Errors
    /// Storage failures only.
    pub fn get_related(&self, req: &RelatedQuery) -> Result<Vec<RelatedMemory>> {
        match req.direction {
            LinkDirection::From => self.related_side(req, LinkDirection::From),
            LinkDirection::To => self.related_side(req, LinkDirection::To),
            LinkDirection::Both => {
                let mut items = self.related_side(req, LinkDirection::From)?;
                items.extend(self.related_side(req, LinkDirection::To)?);
                Ok(items)
            }
        }
    }

    fn related_side(
        &self,
        req: &RelatedQuery,
        direction: LinkDirection,
    ) -> Result<Vec<RelatedMemory>> {
        let (peer_column, anchor_column, flag) = match direction {
            LinkDirection::From => ("l.to_id", "l.from_id", "from"),
            LinkDirection::To => ("l.from_id", "l.to_id", "to"),
            LinkDirection::Both => unreachable!("both is expanded by get_related"),
        };
        let key = match req.relation {
            Some(_) => format!("related_{flag}_r"),
            None => format!("related_{flag}"),
        };
        let sql = self.shapes.get_or_build(&key, || {
            let relation_clause = if req.relation.is_some() { " AND l.relation = ?2" } else { "" };
            format!(
                "SELECT {MEMORY_COLUMNS}, l.relation, l.weight, l.auto_generated, l.created_at
                 FROM memory_links l
                 JOIN memories m ON m.id = {peer_column}
                 WHERE {anchor_column} = ?1 AND {}{relation_clause}
                 ORDER BY l.created_at DESC, l.rowid DESC",
                query::ALIVE
            )
        });

        let mut stmt = self.conn.prepare_cached(&sql)?;
        let map_row = |row: &Row<'_>| -> rusqlite::Result<RelatedMemory> {
            let relation_raw: String = row.get(9)?;
            Ok(RelatedMemory {
                memory: memory_from_row(row)?,
                relation: parse_relation(9, &relation_raw)?,
                direction,
                weight: row.get(10)?,
                auto_generated: row.get::<_, i64>(11)? != 0,
                linked_at: row.get(12)?,
            })
        };
        let rows = match req.relation {
            Some(relation) => stmt.query_map(params![req.id, relation.as_str()], map_row)?,
            None => stmt.query_map(params![req.id], map_row)?,
        };
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    /// Raw edge listing with a window-count total, newest first.
    ///
    /// # Errors
    /// Storage failures only.
    pub fn list_links(&self, req: &LinkQuery) -> Result<LinkPage> {
        let mut predicates = String::from("1=1");
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();
        let mut flags = String::new();

        if let Some(from) = &req.from {
            predicates.push_str(" AND l.from_id = ?");
            params.push(Box::new(from.clone()));
            flags.push('f');
        }
        if let Some(to) = &req.to {
            predicates.push_str(" AND l.to_id = ?");
            params.push(Box::new(to.clone()));
            flags.push('t');
        }
        if let Some(relation) = req.relation {
            predicates.push_str(" AND l.relation = ?");
            params.push(Box::new(relation.as_str()));
            flags.push('r');
        }
        params.push(Box::new(i64::from(req.limit.unwrap_or(DEFAULT_PAGE_LIMIT))));
        params.push(Box::new(i64::from(req.offset)));

        let key = format!("links_{flags}");
        let sql = self.shapes.get_or_build(&key, || {
            format!(
                "SELECT {LINK_COLUMNS}, COUNT(*) OVER () AS total
                 FROM memory_links l
                 WHERE {predicates}
                 ORDER BY l.created_at DESC, l.rowid DESC
                 LIMIT ? OFFSET ?"
            )
        });

        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let mut rows = stmt.query(param_refs.as_slice())?;
        let mut links = Vec::new();
        let mut total = 0u64;
        while let Some(row) = rows.next()? {
            total = row.get::<_, i64>(6)? as u64;
            links.push(link_from_row(row)?);
        }
        Ok(LinkPage { links, total })
    }

    /// Multi-hop traversal over outgoing edges, up to `max_depth` (1–5,
    /// default 3). Each reachable node is reported once at its minimum
    /// depth; the origin is never included; results stay inside the
    /// origin's project.
    ///
    /// # Errors
    /// [`StoreError::MemoryNotFound`] for an unknown origin;
    /// [`StoreError::InvalidInput`] for an out-of-range depth.
    pub fn get_related_deep(&self, req: &DeepQuery) -> Result<Vec<DeepRelated>> {
        let max_depth = req.max_depth.unwrap_or(3);
        if !(1..=5).contains(&max_depth) {
            return Err(ValidationError::OutOfRange {
                field: "max_depth",
                value: i64::from(max_depth),
            }
            .into());
        }
        let origin = crate::memory::fetch_memory(&self.conn, &req.id, false)?
            .ok_or_else(|| StoreError::MemoryNotFound(req.id.clone()))?;
        let limit = i64::from(req.limit.unwrap_or(DEFAULT_PAGE_LIMIT));

        let map_row = |row: &Row<'_>| -> rusqlite::Result<DeepRelated> {
            Ok(DeepRelated { memory: memory_from_row(row)?, depth: row.get::<_, i64>(9)? as u32 })
        };
        let mut items = Vec::new();
        match req.relation {
            Some(relation) => {
                let mut stmt = self.conn.prepare_cached(DEEP_RELATION_SQL)?;
                let rows = stmt.query_map(
                    params![req.id, max_depth, origin.project, limit, relation.as_str()],
                    map_row,
                )?;
                for row in rows {
                    items.push(row?);
                }
            }
            None => {
                let mut stmt = self.conn.prepare_cached(DEEP_SQL)?;
                let rows =
                    stmt.query_map(params![req.id, max_depth, origin.project, limit], map_row)?;
                for row in rows {
                    items.push(row?);
                }
            }
        }
        Ok(items)
    }
}
