// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent execution records and telemetry frames.

use crate::status::AgentStatus;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Monitoring record identifier, assigned by the persistent store
/// (monotonic per store).
pub type MonitoringId = i64;

/// Maximum stored prompt length, in characters.
pub const PROMPT_PREVIEW_MAX: usize = 500;

/// Truncate a prompt for storage, respecting char boundaries.
pub fn truncate_prompt(prompt: &str) -> String {
    if prompt.chars().count() <= PROMPT_PREVIEW_MAX {
        prompt.to_string()
    } else {
        prompt.chars().take(PROMPT_PREVIEW_MAX).collect()
    }
}

/// A telemetry frame emitted by a provider adapter.
///
/// Adapters emit cumulative counters; writes are idempotent upserts keyed by
/// the monitoring id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub tokens_in: u64,
    pub tokens_out: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_creation_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

/// Input for registering a new agent record.
#[derive(Debug, Clone)]
pub struct NewAgent {
    pub name: String,
    pub prompt: String,
    pub parent_id: Option<MonitoringId>,
    pub engine_id: String,
    pub model: Option<String>,
    pub pid: Option<u32>,
}

/// Durable row describing one agent execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: MonitoringId,
    pub name: String,
    pub status: AgentStatus,
    pub parent_id: Option<MonitoringId>,
    pub pid: Option<u32>,
    /// Epoch milliseconds; rendered as ISO-8601 at the edges.
    pub start_time_ms: u64,
    pub end_time_ms: Option<u64>,
    pub duration_ms: Option<u64>,
    /// Truncated to [`PROMPT_PREVIEW_MAX`] characters.
    pub prompt: String,
    pub log_path: Option<PathBuf>,
    pub error: Option<String>,
    pub engine_id: String,
    pub model: Option<String>,
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<Telemetry>,
}

impl AgentRecord {
    /// Invariant check: running/paused rows carry no end time, terminal rows
    /// carry end time and a non-negative duration.
    pub fn is_consistent(&self) -> bool {
        if self.status.is_terminal() {
            match (self.end_time_ms, self.duration_ms) {
                (Some(end), Some(dur)) => end >= self.start_time_ms && dur == end - self.start_time_ms,
                _ => false,
            }
        } else {
            self.end_time_ms.is_none() && self.duration_ms.is_none()
        }
    }
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;
