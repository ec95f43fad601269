// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn span(id: &str, parent: Option<&str>, start: u64) -> AgentSpan {
    let mut s = AgentSpan::new("corr-1", id, format!("span {id}"), start);
    if let Some(p) = parent {
        s = s.with_parent(p);
    }
    s
}

#[test]
fn builds_a_single_root_tree() {
    let spans = vec![
        span("root", None, 10),
        span("child-a", Some("root"), 20),
        span("child-b", Some("root"), 15),
        span("grandchild", Some("child-a"), 30),
    ];
    let tree = build_span_tree(&spans, "corr-1");
    assert_eq!(tree.len(), 1);
    let root = &tree[0];
    assert_eq!(root.span.span_id, "root");
    // Children ordered by start time.
    assert_eq!(root.children[0].span.span_id, "child-b");
    assert_eq!(root.children[1].span.span_id, "child-a");
    assert_eq!(root.children[1].children[0].span.span_id, "grandchild");
}

#[test]
fn orphaned_parent_promotes_to_root() {
    let spans = vec![span("lonely", Some("not-in-set"), 5)];
    let tree = build_span_tree(&spans, "corr-1");
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].span.span_id, "lonely");
}

#[test]
fn other_correlations_are_ignored() {
    let mut foreign = AgentSpan::new("corr-2", "x", "other run", 1);
    foreign.status = SpanStatus::Ok;
    let spans = vec![span("root", None, 1), foreign];
    let tree = build_span_tree(&spans, "corr-1");
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].span.span_id, "root");
}

#[test]
fn every_span_appears_exactly_once() {
    let spans = vec![
        span("a", None, 1),
        span("b", Some("a"), 2),
        span("c", Some("a"), 3),
        span("d", None, 4),
    ];
    let tree = build_span_tree(&spans, "corr-1");

    fn count(nodes: &[SpanNode]) -> usize {
        nodes.iter().map(|n| 1 + count(&n.children)).sum()
    }
    assert_eq!(count(&tree), 4);
    assert_eq!(tree.len(), 2);
}

#[test]
fn finish_sets_end_time_and_status() {
    let mut s = span("a", None, 100);
    s.finish(250, SpanStatus::Ok);
    assert_eq!(s.end_time_ms, Some(250));
    assert_eq!(s.status, SpanStatus::Ok);
}

#[test]
fn correlation_ids_are_unique() {
    assert_ne!(new_correlation_id(), new_correlation_id());
}
