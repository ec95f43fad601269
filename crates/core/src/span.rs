// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hierarchical span rollup for observability.
//!
//! Spans are correlation hooks only; there is no tracing backend here. A
//! workflow run shares one correlation id and each agent execution
//! contributes a span, parented to its spawning agent's span.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Generate a fresh correlation id for a span tree.
pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Terminal disposition of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    InProgress,
    Ok,
    Error,
}

/// One observability span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpan {
    pub correlation_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub name: String,
    pub start_time_ms: u64,
    pub end_time_ms: Option<u64>,
    pub status: SpanStatus,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl AgentSpan {
    pub fn new(
        correlation_id: impl Into<String>,
        span_id: impl Into<String>,
        name: impl Into<String>,
        start_time_ms: u64,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            span_id: span_id.into(),
            parent_span_id: None,
            name: name.into(),
            start_time_ms,
            end_time_ms: None,
            status: SpanStatus::InProgress,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_parent(mut self, parent_span_id: impl Into<String>) -> Self {
        self.parent_span_id = Some(parent_span_id.into());
        self
    }

    pub fn finish(&mut self, end_time_ms: u64, status: SpanStatus) {
        self.end_time_ms = Some(end_time_ms);
        self.status = status;
    }
}

/// A span with its children, ordered by start time.
#[derive(Debug, Clone, Serialize)]
pub struct SpanNode {
    pub span: AgentSpan,
    pub children: Vec<SpanNode>,
}

/// Compose spans sharing `correlation_id` into a forest.
///
/// Roots are spans with no parent (or whose parent is not in the set, which
/// happens when a subtree is queried in isolation). Each span appears exactly
/// once; spans from other correlations are ignored.
pub fn build_span_tree(spans: &[AgentSpan], correlation_id: &str) -> Vec<SpanNode> {
    let matching: Vec<&AgentSpan> = spans
        .iter()
        .filter(|s| s.correlation_id == correlation_id)
        .collect();
    let known: HashMap<&str, ()> = matching.iter().map(|s| (s.span_id.as_str(), ())).collect();

    let mut children_of: HashMap<&str, Vec<&AgentSpan>> = HashMap::new();
    let mut roots: Vec<&AgentSpan> = Vec::new();
    for span in &matching {
        match span.parent_span_id.as_deref() {
            Some(parent) if known.contains_key(parent) => {
                children_of.entry(parent).or_default().push(span);
            }
            _ => roots.push(span),
        }
    }

    fn attach(span: &AgentSpan, children_of: &HashMap<&str, Vec<&AgentSpan>>) -> SpanNode {
        let mut children: Vec<SpanNode> = children_of
            .get(span.span_id.as_str())
            .map(|kids| kids.iter().map(|k| attach(k, children_of)).collect())
            .unwrap_or_default();
        children.sort_by_key(|n| n.span.start_time_ms);
        SpanNode {
            span: span.clone(),
            children,
        }
    }

    let mut nodes: Vec<SpanNode> = roots.into_iter().map(|r| attach(r, &children_of)).collect();
    nodes.sort_by_key(|n| n.span.start_time_ms);
    nodes
}

#[cfg(test)]
#[path = "span_tests.rs"]
mod tests;
