// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Monitoring record lifecycle and hierarchy queries.
//!
//! Sole writer of agent records and telemetry. Status mutations run through
//! the state machine in `codemachine_core::status`; an illegal transition is
//! a caller bug and is logged, never thrown. Tree queries batch the
//! parent→child edges in one pass.

use crate::events::{EventBus, WorkflowEvent};
use codemachine_core::{
    filename_timestamp, AgentRecord, AgentStatus, Clock, MonitoringId, NewAgent, Telemetry,
    WorkspacePaths,
};
use codemachine_storage::{PersistentStore, StoreError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// One node of the agent hierarchy.
#[derive(Debug, Clone)]
pub struct AgentTreeNode {
    pub record: AgentRecord,
    pub children: Vec<AgentTreeNode>,
}

/// Owner of all AgentRecord mutations.
#[derive(Clone)]
pub struct AgentMonitor {
    store: PersistentStore,
    paths: WorkspacePaths,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
}

impl AgentMonitor {
    pub fn new(
        store: PersistentStore,
        paths: WorkspacePaths,
        clock: Arc<dyn Clock>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            paths,
            clock,
            events,
        }
    }

    /// Insert a record, compute its default log path when none is given,
    /// and return the assigned id.
    pub fn register(
        &self,
        input: NewAgent,
        log_path: Option<PathBuf>,
    ) -> Result<MonitoringId, StoreError> {
        let now = self.clock.now_ms();
        let id = self.store.insert_agent(&input, now)?;
        let path = log_path.unwrap_or_else(|| {
            self.paths
                .agent_log_path(id, &input.name, &filename_timestamp(now))
        });
        self.store.set_log_path(id, &path)?;
        self.events.emit(WorkflowEvent::AgentStatusChanged {
            monitoring_id: id,
            status: AgentStatus::Running,
        });
        tracing::info!(monitoring_id = id, name = %input.name, "agent registered");
        Ok(id)
    }

    fn guarded_transition(&self, id: MonitoringId, next: AgentStatus) -> Result<bool, StoreError> {
        let Some(record) = self.store.get_agent(id)? else {
            return Err(StoreError::AgentNotFound(id));
        };
        if !record.status.can_transition_to(next) {
            tracing::warn!(
                monitoring_id = id,
                from = %record.status,
                to = %next,
                "illegal status transition ignored"
            );
            return Ok(false);
        }
        Ok(true)
    }

    fn emit_status(&self, id: MonitoringId, status: AgentStatus) {
        self.events.emit(WorkflowEvent::AgentStatusChanged {
            monitoring_id: id,
            status,
        });
    }

    /// Resume a paused record.
    pub fn mark_running(&self, id: MonitoringId) -> Result<(), StoreError> {
        if self.guarded_transition(id, AgentStatus::Running)? {
            self.store.set_status(id, AgentStatus::Running)?;
            self.emit_status(id, AgentStatus::Running);
        }
        Ok(())
    }

    pub fn mark_paused(&self, id: MonitoringId) -> Result<(), StoreError> {
        if self.guarded_transition(id, AgentStatus::Paused)? {
            self.store.set_status(id, AgentStatus::Paused)?;
            self.emit_status(id, AgentStatus::Paused);
        }
        Ok(())
    }

    pub fn mark_skipped(&self, id: MonitoringId) -> Result<(), StoreError> {
        if self.guarded_transition(id, AgentStatus::Skipped)? {
            self.store
                .finalize(id, AgentStatus::Skipped, self.clock.now_ms(), None, None)?;
            self.emit_status(id, AgentStatus::Skipped);
        }
        Ok(())
    }

    /// Terminal success; optionally upserts final telemetry atomically with
    /// the status change.
    pub fn complete(&self, id: MonitoringId, telemetry: Option<&Telemetry>) -> Result<(), StoreError> {
        if self.guarded_transition(id, AgentStatus::Completed)? {
            self.store
                .finalize(id, AgentStatus::Completed, self.clock.now_ms(), None, telemetry)?;
            self.emit_status(id, AgentStatus::Completed);
        }
        Ok(())
    }

    /// Terminal failure. Existing telemetry is preserved: a failure without
    /// fresh frames must not erase what the run reported.
    pub fn fail(&self, id: MonitoringId, error: &str) -> Result<(), StoreError> {
        if self.guarded_transition(id, AgentStatus::Failed)? {
            self.store
                .finalize(id, AgentStatus::Failed, self.clock.now_ms(), Some(error), None)?;
            self.emit_status(id, AgentStatus::Failed);
        }
        Ok(())
    }

    /// Idempotent telemetry upsert.
    pub fn update_telemetry(&self, id: MonitoringId, telemetry: &Telemetry) -> Result<(), StoreError> {
        self.store.upsert_telemetry(id, telemetry)
    }

    /// Store the provider session handle for a resumable engine.
    pub fn set_session_id(&self, id: MonitoringId, session_id: &str) -> Result<(), StoreError> {
        self.store.set_session_id(id, session_id)
    }

    pub fn get_agent(&self, id: MonitoringId) -> Result<Option<AgentRecord>, StoreError> {
        self.store.get_agent(id)
    }

    pub fn get_all(&self) -> Result<Vec<AgentRecord>, StoreError> {
        self.store.get_all()
    }

    pub fn get_children(&self, parent_id: MonitoringId) -> Result<Vec<AgentRecord>, StoreError> {
        self.store.get_children(parent_id)
    }

    pub fn get_root_agents(&self) -> Result<Vec<AgentRecord>, StoreError> {
        self.store.get_roots()
    }

    /// The full forest, built in O(n) from one scan.
    pub fn build_agent_tree(&self) -> Result<Vec<AgentTreeNode>, StoreError> {
        let records = self.store.get_all()?;
        let mut children_of: HashMap<MonitoringId, Vec<AgentRecord>> = HashMap::new();
        let mut roots: Vec<AgentRecord> = Vec::new();
        for record in records {
            match record.parent_id {
                Some(parent) => children_of.entry(parent).or_default().push(record),
                None => roots.push(record),
            }
        }

        fn attach(record: AgentRecord, children_of: &mut HashMap<MonitoringId, Vec<AgentRecord>>) -> AgentTreeNode {
            let children = children_of
                .remove(&record.id)
                .map(|kids| kids.into_iter().map(|k| attach(k, children_of)).collect())
                .unwrap_or_default();
            AgentTreeNode { record, children }
        }

        Ok(roots
            .into_iter()
            .map(|r| attach(r, &mut children_of))
            .collect())
    }

    /// A record plus all its descendants, in discovery order.
    pub fn get_full_subtree(&self, id: MonitoringId) -> Result<Vec<AgentRecord>, StoreError> {
        let records = self.store.get_all()?;
        let mut by_id: HashMap<MonitoringId, AgentRecord> = HashMap::new();
        let mut children_of: HashMap<MonitoringId, Vec<MonitoringId>> = HashMap::new();
        for record in records {
            if let Some(parent) = record.parent_id {
                children_of.entry(parent).or_default().push(record.id);
            }
            by_id.insert(record.id, record);
        }

        let mut subtree = Vec::new();
        let mut queue = vec![id];
        while let Some(current) = queue.pop() {
            if let Some(record) = by_id.remove(&current) {
                subtree.push(record);
            }
            if let Some(kids) = children_of.get(&current) {
                queue.extend(kids.iter().copied());
            }
        }
        Ok(subtree)
    }

    /// Delete all descendants of `id` (not `id` itself), leaves first.
    pub fn clear_descendants(&self, id: MonitoringId) -> Result<(), StoreError> {
        let edges = self.store.children_edges()?;
        let mut children_of: HashMap<MonitoringId, Vec<MonitoringId>> = HashMap::new();
        for (parent, child) in edges {
            children_of.entry(parent).or_default().push(child);
        }

        fn delete_post_order(
            store: &PersistentStore,
            children_of: &HashMap<MonitoringId, Vec<MonitoringId>>,
            node: MonitoringId,
        ) -> Result<(), StoreError> {
            if let Some(kids) = children_of.get(&node) {
                for child in kids {
                    delete_post_order(store, children_of, *child)?;
                    store.delete_agent(*child)?;
                }
            }
            Ok(())
        }

        delete_post_order(&self.store, &children_of, id)
    }

    /// Drop every record (telemetry first, for the foreign key).
    pub fn clear_all(&self) -> Result<(), StoreError> {
        self.store.clear_all()
    }

    /// Each root paired with its descendants.
    pub fn get_agents_by_root(&self) -> Result<Vec<(AgentRecord, Vec<AgentRecord>)>, StoreError> {
        let roots = self.store.get_roots()?;
        let mut grouped = Vec::with_capacity(roots.len());
        for root in roots {
            let subtree = self.get_full_subtree(root.id)?;
            let descendants = subtree.into_iter().filter(|r| r.id != root.id).collect();
            grouped.push((root, descendants));
        }
        Ok(grouped)
    }
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod tests;
