// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use codemachine_core::test_support::{new_agent, telemetry};

#[test]
fn insert_assigns_monotonic_ids() {
    let store = PersistentStore::in_memory().unwrap();
    let a = store.insert_agent(&new_agent("first", None), 1_000).unwrap();
    let b = store.insert_agent(&new_agent("second", None), 1_001).unwrap();
    assert!(b > a);
}

#[test]
fn insert_truncates_long_prompts() {
    let store = PersistentStore::in_memory().unwrap();
    let mut input = new_agent("coder", None);
    input.prompt = "p".repeat(2_000);
    let id = store.insert_agent(&input, 0).unwrap();
    let record = store.get_agent(id).unwrap().unwrap();
    assert_eq!(record.prompt.chars().count(), codemachine_core::PROMPT_PREVIEW_MAX);
}

#[test]
fn new_records_start_running_with_no_end_time() {
    let store = PersistentStore::in_memory().unwrap();
    let id = store.insert_agent(&new_agent("coder", None), 5_000).unwrap();
    let record = store.get_agent(id).unwrap().unwrap();
    assert_eq!(record.status, AgentStatus::Running);
    assert_eq!(record.start_time_ms, 5_000);
    assert!(record.end_time_ms.is_none());
    assert!(record.duration_ms.is_none());
    assert!(record.is_consistent());
}

#[test]
fn get_missing_agent_is_none() {
    let store = PersistentStore::in_memory().unwrap();
    assert!(store.get_agent(42).unwrap().is_none());
}

#[test]
fn finalize_sets_end_time_and_duration() {
    let store = PersistentStore::in_memory().unwrap();
    let id = store.insert_agent(&new_agent("coder", None), 1_000).unwrap();
    store
        .finalize(id, AgentStatus::Completed, 4_500, None, None)
        .unwrap();
    let record = store.get_agent(id).unwrap().unwrap();
    assert_eq!(record.status, AgentStatus::Completed);
    assert_eq!(record.end_time_ms, Some(4_500));
    assert_eq!(record.duration_ms, Some(3_500));
    assert!(record.is_consistent());
}

#[test]
fn finalize_with_telemetry_is_atomic_and_visible() {
    let store = PersistentStore::in_memory().unwrap();
    let id = store.insert_agent(&new_agent("coder", None), 0).unwrap();
    store
        .finalize(
            id,
            AgentStatus::Completed,
            100,
            None,
            Some(&telemetry(10, 20)),
        )
        .unwrap();
    let record = store.get_agent(id).unwrap().unwrap();
    let t = record.telemetry.unwrap();
    assert_eq!(t.tokens_in, 10);
    assert_eq!(t.tokens_out, 20);
}

#[test]
fn finalize_records_error_message() {
    let store = PersistentStore::in_memory().unwrap();
    let id = store.insert_agent(&new_agent("coder", None), 0).unwrap();
    store
        .finalize(id, AgentStatus::Failed, 10, Some("exit code 1"), None)
        .unwrap();
    let record = store.get_agent(id).unwrap().unwrap();
    assert_eq!(record.error.as_deref(), Some("exit code 1"));
}

#[test]
fn telemetry_upsert_is_idempotent() {
    let store = PersistentStore::in_memory().unwrap();
    let id = store.insert_agent(&new_agent("coder", None), 0).unwrap();
    store.upsert_telemetry(id, &telemetry(5, 7)).unwrap();
    store.upsert_telemetry(id, &telemetry(50, 70)).unwrap();
    let record = store.get_agent(id).unwrap().unwrap();
    let t = record.telemetry.unwrap();
    assert_eq!(t.tokens_in, 50);
    assert_eq!(t.tokens_out, 70);
}

#[test]
fn telemetry_with_cache_fields_round_trips() {
    let store = PersistentStore::in_memory().unwrap();
    let id = store.insert_agent(&new_agent("coder", None), 0).unwrap();
    let t = Telemetry {
        tokens_in: 1,
        tokens_out: 2,
        cached_tokens: Some(3),
        cache_creation_tokens: Some(4),
        cache_read_tokens: Some(5),
        cost: Some(0.25),
    };
    store.upsert_telemetry(id, &t).unwrap();
    let back = store.get_agent(id).unwrap().unwrap().telemetry.unwrap();
    assert_eq!(back, t);
}

#[test]
fn session_id_and_log_path_updates() {
    let store = PersistentStore::in_memory().unwrap();
    let id = store.insert_agent(&new_agent("coder", None), 0).unwrap();
    store.set_session_id(id, "sess-abc").unwrap();
    store
        .set_log_path(id, Path::new("/tmp/ws/logs/agent-1.log"))
        .unwrap();
    let record = store.get_agent(id).unwrap().unwrap();
    assert_eq!(record.session_id.as_deref(), Some("sess-abc"));
    assert_eq!(
        record.log_path.as_deref(),
        Some(Path::new("/tmp/ws/logs/agent-1.log"))
    );
}

#[test]
fn updates_on_missing_rows_report_not_found() {
    let store = PersistentStore::in_memory().unwrap();
    let err = store.set_session_id(99, "sess").unwrap_err();
    assert!(matches!(err, StoreError::AgentNotFound(99)));
}

#[test]
fn children_edges_loads_all_links_in_one_pass() {
    let store = PersistentStore::in_memory().unwrap();
    let root = store.insert_agent(&new_agent("root", None), 0).unwrap();
    let a = store.insert_agent(&new_agent("a", Some(root)), 1).unwrap();
    let b = store.insert_agent(&new_agent("b", Some(root)), 2).unwrap();
    let leaf = store.insert_agent(&new_agent("leaf", Some(a)), 3).unwrap();

    let edges = store.children_edges().unwrap();
    assert_eq!(edges, vec![(root, a), (root, b), (a, leaf)]);
}

#[test]
fn roots_and_children_queries() {
    let store = PersistentStore::in_memory().unwrap();
    let root = store.insert_agent(&new_agent("root", None), 0).unwrap();
    let child = store.insert_agent(&new_agent("child", Some(root)), 1).unwrap();

    let roots = store.get_roots().unwrap();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].id, root);

    let children = store.get_children(root).unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id, child);
    assert!(store.get_children(child).unwrap().is_empty());
}

#[test]
fn delete_agent_removes_row_and_telemetry() {
    let store = PersistentStore::in_memory().unwrap();
    let id = store.insert_agent(&new_agent("coder", None), 0).unwrap();
    store.upsert_telemetry(id, &telemetry(1, 1)).unwrap();
    store.delete_agent(id).unwrap();
    assert!(store.get_agent(id).unwrap().is_none());
}

#[test]
fn clear_all_empties_both_tables() {
    let store = PersistentStore::in_memory().unwrap();
    let a = store.insert_agent(&new_agent("a", None), 0).unwrap();
    store.insert_agent(&new_agent("b", Some(a)), 1).unwrap();
    store.upsert_telemetry(a, &telemetry(1, 2)).unwrap();
    store.clear_all().unwrap();
    assert!(store.get_all().unwrap().is_empty());
}

#[test]
fn store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("registry.db");
    let id = {
        let store = PersistentStore::open(&db).unwrap();
        store.insert_agent(&new_agent("coder", None), 123).unwrap()
    };
    let store = PersistentStore::open(&db).unwrap();
    let record = store.get_agent(id).unwrap().unwrap();
    assert_eq!(record.name, "coder");
    assert_eq!(record.start_time_ms, 123);
}
