//! Link CRUD, cascade, 1-hop neighbors, and multi-hop traversal.

mod common;

use anyhow::Result;
use engram_core::{
    CreateMemory, DeepQuery, LinkDirection, LinkQuery, Relation, RelatedQuery,
};
use engram_store::StoreError;

use common::{create_note, note, store};

#[test]
fn link_upserts_on_pair_and_clamps_weight() -> Result<()> {
    let mut store = store();
    let a = create_note(&mut store, "a");
    let b = create_note(&mut store, "b");

    let link = store.link_memories(&a, &b, None, None, false)?;
    assert_eq!(link.relation, Relation::Related);
    assert!((link.weight - 1.0).abs() < f64::EPSILON);
    assert!(!link.auto_generated);

    // Same pair again: one edge, attributes replaced.
    let link = store.link_memories(&a, &b, Some(Relation::Caused), Some(7.5), false)?;
    assert_eq!(link.relation, Relation::Caused);
    assert!((link.weight - 1.0).abs() < f64::EPSILON);
    assert_eq!(store.list_links(&LinkQuery::default())?.total, 1);
    Ok(())
}

#[test]
fn self_loops_are_rejected() {
    let mut store = store();
    let a = create_note(&mut store, "a");
    let err = store.link_memories(&a, &a, None, None, false).unwrap_err();
    assert!(matches!(err, StoreError::InvalidInput(_)));
}

#[test]
fn linking_unknown_endpoints_is_an_integrity_error() {
    let mut store = store();
    let a = create_note(&mut store, "a");
    let err = store.link_memories(&a, "no-such-id", None, None, false).unwrap_err();
    assert!(matches!(err, StoreError::Integrity(_)));
}

#[test]
fn update_link_requires_an_existing_edge() -> Result<()> {
    let mut store = store();
    let a = create_note(&mut store, "a");
    let b = create_note(&mut store, "b");

    let err = store.update_link(&a, &b, Relation::Supersedes).unwrap_err();
    assert!(matches!(err, StoreError::LinkNotFound { .. }));

    store.link_memories(&a, &b, None, None, false)?;
    let link = store.update_link(&a, &b, Relation::Supersedes)?;
    assert_eq!(link.relation, Relation::Supersedes);
    Ok(())
}

#[test]
fn unlink_reports_whether_an_edge_was_removed() -> Result<()> {
    let mut store = store();
    let a = create_note(&mut store, "a");
    let b = create_note(&mut store, "b");
    store.link_memories(&a, &b, None, None, false)?;

    assert!(store.unlink_memories(&a, &b)?);
    assert!(!store.unlink_memories(&a, &b)?);
    assert!(store.get_link(&a, &b)?.is_none());
    Ok(())
}

#[test]
fn deleting_a_memory_cascades_its_edges() -> Result<()> {
    let mut store = store();
    let a = create_note(&mut store, "a");
    let b = create_note(&mut store, "b");
    let c = create_note(&mut store, "c");
    store.link_memories(&a, &b, None, None, false)?;
    store.link_memories(&c, &a, None, None, false)?;

    store.delete(&a)?;
    assert_eq!(store.list_links(&LinkQuery::default())?.total, 0);
    Ok(())
}

#[test]
fn related_respects_direction_and_relation() -> Result<()> {
    let mut store = store();
    let a = create_note(&mut store, "anchor");
    let b = create_note(&mut store, "outgoing peer");
    let c = create_note(&mut store, "incoming peer");
    store.link_memories(&a, &b, Some(Relation::References), None, false)?;
    store.link_memories(&c, &a, Some(Relation::Caused), None, false)?;

    let outgoing = store.get_related(&RelatedQuery {
        id: a.clone(),
        relation: None,
        direction: LinkDirection::From,
    })?;
    assert_eq!(outgoing.len(), 1);
    assert_eq!(outgoing[0].memory.id, b);
    assert_eq!(outgoing[0].relation, Relation::References);

    let incoming = store.get_related(&RelatedQuery {
        id: a.clone(),
        relation: None,
        direction: LinkDirection::To,
    })?;
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].memory.id, c);

    let both = store.get_related(&RelatedQuery {
        id: a.clone(),
        relation: None,
        direction: LinkDirection::Both,
    })?;
    assert_eq!(both.len(), 2);

    let caused_only = store.get_related(&RelatedQuery {
        id: a,
        relation: Some(Relation::Caused),
        direction: LinkDirection::Both,
    })?;
    assert_eq!(caused_only.len(), 1);
    assert_eq!(caused_only[0].memory.id, c);
    Ok(())
}

#[test]
fn list_links_filters_and_counts() -> Result<()> {
    let mut store = store();
    let a = create_note(&mut store, "a");
    let b = create_note(&mut store, "b");
    let c = create_note(&mut store, "c");
    store.link_memories(&a, &b, Some(Relation::Caused), None, false)?;
    store.link_memories(&a, &c, Some(Relation::Related), None, false)?;
    store.link_memories(&b, &c, Some(Relation::Related), None, false)?;

    let all = store.list_links(&LinkQuery::default())?;
    assert_eq!(all.total, 3);

    let from_a = store.list_links(&LinkQuery { from: Some(a.clone()), ..Default::default() })?;
    assert_eq!(from_a.total, 2);

    let related =
        store.list_links(&LinkQuery { relation: Some(Relation::Related), ..Default::default() })?;
    assert_eq!(related.total, 2);

    let paged = store.list_links(&LinkQuery { limit: Some(1), ..Default::default() })?;
    assert_eq!(paged.links.len(), 1);
    assert_eq!(paged.total, 3);
    Ok(())
}

#[test]
fn deep_traversal_suppresses_cycles_and_keeps_min_depth() -> Result<()> {
    let mut store = store();
    let a = create_note(&mut store, "node a");
    let b = create_note(&mut store, "node b");
    let c = create_note(&mut store, "node c");
    let d = create_note(&mut store, "node d");
    store.link_memories(&a, &b, Some(Relation::Caused), None, false)?;
    store.link_memories(&b, &c, Some(Relation::References), None, false)?;
    store.link_memories(&c, &d, Some(Relation::Related), None, false)?;
    store.link_memories(&d, &a, Some(Relation::Related), None, false)?;

    let reached = store.get_related_deep(&DeepQuery {
        id: a.clone(),
        relation: None,
        max_depth: Some(5),
        limit: None,
    })?;

    let pairs: Vec<(String, u32)> =
        reached.iter().map(|r| (r.memory.id.clone(), r.depth)).collect();
    assert_eq!(pairs, vec![(b.clone(), 1), (c.clone(), 2), (d.clone(), 3)]);
    assert!(pairs.iter().all(|(id, _)| *id != a));
    Ok(())
}

#[test]
fn deep_traversal_defaults_to_three_hops() -> Result<()> {
    let mut store = store();
    let ids: Vec<String> =
        (0..5).map(|i| create_note(&mut store, &format!("chain node {i}"))).collect();
    for pair in ids.windows(2) {
        store.link_memories(&pair[0], &pair[1], None, None, false)?;
    }

    let reached = store.get_related_deep(&DeepQuery {
        id: ids[0].clone(),
        relation: None,
        max_depth: None,
        limit: None,
    })?;
    assert_eq!(reached.len(), 3);
    assert_eq!(reached.last().unwrap().depth, 3);
    Ok(())
}

#[test]
fn deep_traversal_checks_depth_range_and_origin() {
    let mut store = store();
    let a = create_note(&mut store, "a");

    let err = store
        .get_related_deep(&DeepQuery {
            id: a.clone(),
            relation: None,
            max_depth: Some(6),
            limit: None,
        })
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidInput(_)));

    let err = store
        .get_related_deep(&DeepQuery {
            id: "missing".into(),
            relation: None,
            max_depth: None,
            limit: None,
        })
        .unwrap_err();
    assert!(matches!(err, StoreError::MemoryNotFound(_)));
}

#[test]
fn deep_traversal_scopes_to_the_origin_project() -> Result<()> {
    let mut store = store();
    let a = create_note(&mut store, "origin");
    let b = create_note(&mut store, "same project");
    let elsewhere = store
        .create(CreateMemory { project: Some("other".into()), ..note("other project") })?
        .memory
        .id;
    store.link_memories(&a, &b, None, None, false)?;
    store.link_memories(&b, &elsewhere, None, None, false)?;

    let reached = store.get_related_deep(&DeepQuery {
        id: a,
        relation: None,
        max_depth: Some(5),
        limit: None,
    })?;
    let ids: Vec<_> = reached.iter().map(|r| r.memory.id.clone()).collect();
    assert_eq!(ids, vec![b]);
    Ok(())
}

#[test]
fn deep_traversal_filters_by_relation() -> Result<()> {
    let mut store = store();
    let a = create_note(&mut store, "a");
    let b = create_note(&mut store, "b");
    let c = create_note(&mut store, "c");
    store.link_memories(&a, &b, Some(Relation::Caused), None, false)?;
    store.link_memories(&a, &c, Some(Relation::Related), None, false)?;

    let caused = store.get_related_deep(&DeepQuery {
        id: a,
        relation: Some(Relation::Caused),
        max_depth: Some(3),
        limit: None,
    })?;
    assert_eq!(caused.len(), 1);
    assert_eq!(caused[0].memory.id, b);
    Ok(())
}
