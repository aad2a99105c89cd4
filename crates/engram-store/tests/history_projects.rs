//! History/restore, project namespaces, aggregates, graph export, and
//! maintenance.

mod common;

use anyhow::Result;
use engram_core::{
    CheckpointMode, CreateMemory, GraphOptions, HistoryQuery, ListRequest, MemoryFilter,
    Operation, Relation, SnapshotOptions, StoreConfig, UpdateMemory,
};
use engram_store::{MemoryStore, StoreError};

use common::{create_note, note, store};

#[test]
fn every_mutation_appends_exactly_one_history_row() -> Result<()> {
    let mut store = store();
    let id = create_note(&mut store, "v1");
    store.update(&id, UpdateMemory { content: Some("v2".into()), ..Default::default() })?;
    store.delete(&id)?;

    let page = store.get_history(&HistoryQuery { memory_id: id, ..Default::default() })?;
    assert_eq!(page.total, 3);
    let operations: Vec<Operation> = page.entries.iter().map(|e| e.operation).collect();
    assert_eq!(operations, vec![Operation::Delete, Operation::Update, Operation::Create]);
    // Delete snapshots carry the pre-image.
    assert_eq!(page.entries[0].content, "v2");
    Ok(())
}

#[test]
fn history_ids_increase_and_pages_slice_newest_first() -> Result<()> {
    let mut store = store();
    let id = create_note(&mut store, "v1");
    store.update(&id, UpdateMemory { content: Some("v2".into()), ..Default::default() })?;
    store.update(&id, UpdateMemory { content: Some("v3".into()), ..Default::default() })?;

    let page = store.get_history(&HistoryQuery { memory_id: id.clone(), ..Default::default() })?;
    assert!(page.entries[0].history_id > page.entries[1].history_id);
    assert!(page.entries[1].history_id > page.entries[2].history_id);

    let sliced = store.get_history(&HistoryQuery {
        memory_id: id,
        limit: Some(1),
        offset: 1,
    })?;
    assert_eq!(sliced.total, 3);
    assert_eq!(sliced.entries.len(), 1);
    assert_eq!(sliced.entries[0].content, "v2");
    Ok(())
}

#[test]
fn restore_reapplies_the_snapshot_and_audits_itself() -> Result<()> {
    let mut store = store();
    let id = create_note(&mut store, "v1");
    store.update(&id, UpdateMemory { content: Some("v2".into()), ..Default::default() })?;
    store.update(&id, UpdateMemory { content: Some("v3".into()), ..Default::default() })?;

    let page = store.get_history(&HistoryQuery { memory_id: id.clone(), ..Default::default() })?;
    assert_eq!(page.total, 3);
    let create_entry = page.entries.iter().find(|e| e.operation == Operation::Create).unwrap();

    let restored = store.restore_memory(&id, create_entry.history_id)?.expect("restorable");
    assert_eq!(restored.content, "v1");

    let page = store.get_history(&HistoryQuery { memory_id: id, ..Default::default() })?;
    assert_eq!(page.total, 4);
    assert_eq!(page.entries[0].operation, Operation::Update);
    assert_eq!(page.entries[0].content, "v1");
    Ok(())
}

#[test]
fn restore_reapplies_the_snapshot_project() -> Result<()> {
    let mut store = store();
    let id = store
        .create(CreateMemory { tags: vec!["ship".into()], ..note("namespaced row") })?
        .memory
        .id;
    let create_entry = store
        .get_history(&HistoryQuery { memory_id: id.clone(), ..Default::default() })?
        .entries[0]
        .history_id;

    store.migrate_to_project("ship", "launches")?;
    assert_eq!(store.get_by_id(&id)?.unwrap().project, "launches");

    let restored = store.restore_memory(&id, create_entry)?.expect("restorable");
    assert_eq!(restored.project, "default");
    Ok(())
}

#[test]
fn restore_returns_none_for_deleted_memories_and_foreign_rows() -> Result<()> {
    let mut store = store();
    let kept = create_note(&mut store, "kept");
    let gone = create_note(&mut store, "gone");
    let gone_history = store
        .get_history(&HistoryQuery { memory_id: gone.clone(), ..Default::default() })?
        .entries[0]
        .history_id;
    store.delete(&gone)?;

    assert!(store.restore_memory(&gone, gone_history)?.is_none());
    // History row belongs to a different memory: no restore.
    assert!(store.restore_memory(&kept, gone_history)?.is_none());
    Ok(())
}

#[test]
fn list_projects_counts_live_memories_descending() -> Result<()> {
    let mut store = store();
    create_note(&mut store, "one");
    create_note(&mut store, "two");
    store.create(CreateMemory { project: Some("work".into()), ..note("three") })?;

    let projects = store.list_projects()?;
    assert_eq!(projects.len(), 2);
    assert_eq!(projects[0].project, "default");
    assert_eq!(projects[0].count, 2);
    assert_eq!(projects[1].project, "work");
    assert_eq!(projects[1].count, 1);
    Ok(())
}

#[test]
fn migrate_to_project_moves_tagged_rows() -> Result<()> {
    let mut store = store();
    let tagged = store
        .create(CreateMemory { tags: vec!["ship".into()], ..note("tagged row") })?
        .memory
        .id;
    create_note(&mut store, "untouched row");

    let moved = store.migrate_to_project("ship", "launches")?;
    assert_eq!(moved, 1);
    assert_eq!(store.get_by_id(&tagged)?.unwrap().project, "launches");

    let launches = store.list(&ListRequest {
        filter: MemoryFilter { project: Some("launches".into()), ..Default::default() },
        ..Default::default()
    })?;
    assert_eq!(launches.total, 1);
    Ok(())
}

#[test]
fn rename_tag_rewrites_and_deduplicates() -> Result<()> {
    let mut store = store();
    let id = store
        .create(CreateMemory { tags: vec!["old".into(), "keep".into()], ..note("row a") })?
        .memory
        .id;
    let merged = store
        .create(CreateMemory { tags: vec!["old".into(), "new".into()], ..note("row b") })?
        .memory
        .id;

    let report = store.rename_tag("old", "new", None)?;
    assert_eq!(report.updated, 2);
    let mut tags = store.get_by_id(&id)?.unwrap().tags;
    tags.sort();
    assert_eq!(tags, vec!["keep", "new"]);
    // "old" and "new" collapse into one tag.
    assert_eq!(store.get_by_id(&merged)?.unwrap().tags, vec!["new"]);
    Ok(())
}

#[test]
fn rename_tag_to_itself_is_a_no_op() -> Result<()> {
    let mut store = store();
    let before = store
        .create(CreateMemory { tags: vec!["same".into()], ..note("row") })?
        .memory;

    let report = store.rename_tag("same", "same", None)?;
    assert_eq!(report.updated, 0);
    assert_eq!(store.get_by_id(&before.id)?.unwrap().updated_at, before.updated_at);
    Ok(())
}

#[test]
fn stats_aggregate_live_rows_only() -> Result<()> {
    let mut store = store();
    store.create(CreateMemory {
        category: Some("code".into()),
        tags: vec!["rust".into(), "db".into()],
        ..note("1234567890")
    })?;
    store.create(CreateMemory { category: Some("code".into()), ..note("12345678") })?;
    store.create(CreateMemory {
        category: Some("ops".into()),
        expires_at: Some("2000-01-01 00:00:00".into()),
        ..note("expired")
    })?;

    let stats = store.get_stats(None)?;
    assert_eq!(stats.total, 2);
    assert_eq!(stats.by_category.len(), 1);
    assert_eq!(stats.by_category[0].category, "code");
    assert_eq!(stats.by_category[0].count, 2);
    assert_eq!(stats.top_tags.len(), 2);
    assert_eq!(stats.avg_content_length, 9);
    assert_eq!(stats.without_tags, 1);
    assert_eq!(stats.without_metadata, 2);
    assert!(stats.oldest.is_some() && stats.newest.is_some());
    Ok(())
}

#[test]
fn context_snapshot_ranks_recency_within_categories() -> Result<()> {
    let mut store = store();
    for i in 0..5 {
        store.create(CreateMemory {
            category: Some("code".into()),
            ..note(&format!("code memory number {i}"))
        })?;
    }
    store.create(CreateMemory { category: Some("ops".into()), ..note("only ops memory") })?;

    let snapshot = store.get_context_snapshot(&SnapshotOptions {
        recent_per_category: Some(2),
        preview_len: Some(11),
        ..Default::default()
    })?;

    assert_eq!(snapshot.categories.len(), 2);
    let code = snapshot.categories.iter().find(|c| c.category == "code").unwrap();
    assert_eq!(code.total, 5);
    assert_eq!(code.recent.len(), 2);
    assert_eq!(code.recent[0].content, "code memory");

    let ops = snapshot.categories.iter().find(|c| c.category == "ops").unwrap();
    assert_eq!(ops.total, 1);
    assert!(snapshot.tags.is_some());

    let bare = store.get_context_snapshot(&SnapshotOptions {
        include_tags_index: false,
        ..Default::default()
    })?;
    assert!(bare.tags.is_none());
    Ok(())
}

#[test]
fn graph_export_lists_nodes_edges_and_renders_a_diagram() -> Result<()> {
    let mut store = store();
    let a = create_note(&mut store, "first node content");
    let b = create_note(&mut store, "second node content");
    let orphan = create_note(&mut store, "orphan content");
    store.link_memories(&a, &b, Some(Relation::Caused), None, false)?;

    let graph = store.get_graph(&GraphOptions::default())?;
    assert_eq!(graph.edges.len(), 1);
    assert_eq!(graph.nodes.len(), 3);
    assert!(graph.diagram.starts_with("flowchart LR\n"));
    assert!(graph.diagram.contains("-- caused -->"));

    let linked_only =
        store.get_graph(&GraphOptions { include_orphans: false, ..Default::default() })?;
    assert_eq!(linked_only.nodes.len(), 2);
    assert!(linked_only.nodes.iter().all(|n| n.id != orphan));

    let empty = store.get_graph(&GraphOptions {
        project: Some("deserted".into()),
        ..Default::default()
    })?;
    assert!(empty.nodes.is_empty() && empty.edges.is_empty());
    assert!(empty.diagram.contains("no memories"));
    Ok(())
}

#[test]
fn maintenance_reports_integrity_and_checkpoint() -> Result<()> {
    let mut store = store();
    create_note(&mut store, "anything");

    let report = store.maintenance(CheckpointMode::Passive)?;
    assert!(report.integrity_ok);
    assert!(report.integrity_errors.is_empty());
    assert_eq!(report.wal_checkpoint.busy, 0);
    Ok(())
}

#[test]
fn backup_writes_a_timestamped_copy_beside_the_file() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let mut store = MemoryStore::open(StoreConfig::at(dir.path().join("memories.db")))?;
    create_note(&mut store, "durable row");

    let backup_path = store.backup()?;
    assert!(backup_path.exists());
    let name = backup_path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("memories.backup."));
    assert!(name.ends_with(".db"));
    assert!(!name.contains(':'));

    // The copy is a usable store in its own right.
    let restored = MemoryStore::open(StoreConfig::at(&backup_path))?;
    assert_eq!(restored.list(&ListRequest::default())?.total, 1);
    Ok(())
}

#[test]
fn backup_prefix_is_fixed_regardless_of_db_filename() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let mut store = MemoryStore::open(StoreConfig::at(dir.path().join("prod.db")))?;
    create_note(&mut store, "row");

    let backup_path = store.backup()?;
    let name = backup_path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("memories.backup."));
    assert_eq!(backup_path.parent(), Some(dir.path()));
    Ok(())
}

#[test]
fn backup_is_rejected_for_in_memory_stores() {
    let store = store();
    let err = store.backup().unwrap_err();
    assert!(matches!(err, StoreError::InvalidInput(_)));
}

#[test]
fn reopening_a_store_file_keeps_data_and_schema() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let config = StoreConfig::at(dir.path().join("memories.db"));
    let id = {
        let mut store = MemoryStore::open(config.clone())?;
        let id = create_note(&mut store, "persisted");
        store.close()?;
        id
    };

    let store = MemoryStore::open(config)?;
    assert_eq!(store.schema_version()?, 5);
    assert_eq!(store.get_by_id(&id)?.unwrap().content, "persisted");
    Ok(())
}
