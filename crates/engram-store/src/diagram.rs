//! Graph export: node/edge listing plus the deterministic textual diagram.

use std::collections::HashMap;

use engram_core::{GraphNode, GraphOptions, Link, MemoryGraph, Relation};
use rusqlite::ToSql;

use crate::error::Result;
use crate::graph::{link_from_row, LINK_COLUMNS};
use crate::{query, MemoryStore};

const NODE_PREVIEW_CHARS: usize = 60;
const LABEL_PREVIEW_CHARS: usize = 40;

impl MemoryStore {
    /// Load the project's edges (both endpoints must share the project),
    /// compute the node set — endpoint nodes plus, when requested, the
    /// remaining live orphans — and render the textual diagram.
    ///
    /// # Errors
    /// Storage failures only.
    pub fn get_graph(&self, opts: &GraphOptions) -> Result<MemoryGraph> {
        let project = self.project_or_default(opts.project.as_deref()).to_string();

        let mut predicates = String::from("mf.project = ?1 AND mt.project = ?1");
        let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(project.clone())];
        if let Some(relation) = opts.relation {
            predicates.push_str(" AND l.relation = ?2");
            params.push(Box::new(relation.as_str()));
        }
        let sql = format!(
            "SELECT {LINK_COLUMNS}
             FROM memory_links l
             JOIN memories mf ON mf.id = l.from_id
             JOIN memories mt ON mt.id = l.to_id
             WHERE {predicates}
             ORDER BY l.created_at DESC, l.rowid DESC"
        );
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(param_refs.as_slice())?;
        let mut edges: Vec<Link> = Vec::new();
        while let Some(row) = rows.next()? {
            edges.push(link_from_row(row)?);
        }

        // First-seen order keeps the rendering deterministic.
        let mut node_ids: Vec<String> = Vec::new();
        for edge in &edges {
            if !node_ids.contains(&edge.from_id) {
                node_ids.push(edge.from_id.clone());
            }
            if !node_ids.contains(&edge.to_id) {
                node_ids.push(edge.to_id.clone());
            }
        }
        if opts.include_orphans {
            let sql = format!(
                "SELECT m.id FROM memories m
                 WHERE m.project = ?1 AND {}
                 ORDER BY m.created_at DESC, m.rowid DESC",
                query::ALIVE
            );
            let mut stmt = self.conn.prepare_cached(&sql)?;
            let rows = stmt.query_map([&project], |row| row.get::<_, String>(0))?;
            for row in rows {
                let id = row?;
                if !node_ids.contains(&id) {
                    node_ids.push(id);
                }
            }
        }

        let nodes = self.load_nodes(&node_ids)?;
        let diagram = render_diagram(&nodes, &edges);
        Ok(MemoryGraph { nodes, edges, diagram })
    }

    fn load_nodes(&self, ids: &[String]) -> Result<Vec<GraphNode>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders =
            (1..=ids.len()).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ");
        let sql = format!(
            "SELECT m.id, m.content, m.category, m.tags
             FROM memories m WHERE m.id IN ({placeholders})"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), |row| {
            let tags_json: String = row.get(3)?;
            Ok(GraphNode {
                id: row.get(0)?,
                preview: node_preview(&row.get::<_, String>(1)?),
                category: row.get(2)?,
                tags: crate::memory::json_column(3, &tags_json)?,
            })
        })?;
        let mut by_id: HashMap<String, GraphNode> = HashMap::new();
        for row in rows {
            let node = row?;
            by_id.insert(node.id.clone(), node);
        }
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }
}

/// Single-line preview: newlines collapsed to spaces, capped at 60 chars.
fn node_preview(content: &str) -> String {
    content
        .replace(['\n', '\r'], " ")
        .chars()
        .take(NODE_PREVIEW_CHARS)
        .collect()
}

fn short_id(id: &str) -> String {
    let hex: String = id.chars().filter(|c| *c != '-').take(8).collect();
    format!("n{hex}")
}

fn escape_label(label: &str) -> String {
    label.replace('"', "'").replace(['<', '>'], " ")
}

/// Deterministic `flowchart LR` rendering of the node and edge sets.
fn render_diagram(nodes: &[GraphNode], edges: &[Link]) -> String {
    let mut out = String::from("flowchart LR\n");
    if nodes.is_empty() && edges.is_empty() {
        out.push_str("    empty[\"no memories\"]\n");
        return out;
    }
    for node in nodes {
        let label: String = node.preview.chars().take(LABEL_PREVIEW_CHARS).collect();
        out.push_str(&format!(
            "    {}[\"{} ({})\"]\n",
            short_id(&node.id),
            escape_label(&label),
            node.category
        ));
    }
    for edge in edges {
        out.push_str(&format!(
            "    {} -- {} --> {}\n",
            short_id(&edge.from_id),
            edge.relation.as_str(),
            short_id(&edge.to_id)
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, preview: &str, category: &str) -> GraphNode {
        GraphNode {
            id: id.to_string(),
            preview: preview.to_string(),
            category: category.to_string(),
            tags: Vec::new(),
        }
    }

    #[test]
    fn short_ids_drop_dashes_and_take_eight() {
        assert_eq!(short_id("123e4567-e89b-12d3-a456-426614174000"), "n123e4567");
    }

    #[test]
    fn labels_escape_quotes_and_angles() {
        assert_eq!(escape_label("say \"hi\" <now>"), "say 'hi'  now ");
    }

    #[test]
    fn previews_collapse_newlines() {
        assert_eq!(node_preview("line one\nline two"), "line one line two");
    }

    #[test]
    fn empty_graph_renders_placeholder() {
        let rendered = render_diagram(&[], &[]);
        assert_eq!(rendered, "flowchart LR\n    empty[\"no memories\"]\n");
    }

    #[test]
    fn edges_render_with_relation_labels() {
        let nodes = vec![
            node("11111111-aaaa-bbbb-cccc-000000000001", "first", "general"),
            node("22222222-aaaa-bbbb-cccc-000000000002", "second", "code"),
        ];
        let edges = vec![Link {
            from_id: nodes[0].id.clone(),
            to_id: nodes[1].id.clone(),
            relation: Relation::Caused,
            weight: 1.0,
            auto_generated: false,
            created_at: "2024-01-01 00:00:00".to_string(),
        }];
        let rendered = render_diagram(&nodes, &edges);
        assert!(rendered.starts_with("flowchart LR\n"));
        assert!(rendered.contains("n11111111[\"first (general)\"]"));
        assert!(rendered.contains("n11111111 -- caused --> n22222222"));
    }
}
