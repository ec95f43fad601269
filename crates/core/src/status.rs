// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent lifecycle status and its transition rules.
//!
//! A record starts in `Running`. Running agents can be paused, and paused
//! agents resumed; all terminal states are absorbing. Attempting an illegal
//! transition is a bug in the caller, handled by logging rather than
//! panicking (see `AgentMonitor`).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of an agent execution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Skipped,
}

impl AgentStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AgentStatus::Completed | AgentStatus::Failed | AgentStatus::Skipped
        )
    }

    /// Whether a transition from `self` to `next` is legal.
    ///
    /// Running → {Paused, Completed, Failed, Skipped};
    /// Paused → {Running, Completed, Failed, Skipped};
    /// terminal states are absorbing. Self-transitions are not legal.
    pub fn can_transition_to(self, next: AgentStatus) -> bool {
        !self.is_terminal() && self != next
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Running => "running",
            AgentStatus::Paused => "paused",
            AgentStatus::Completed => "completed",
            AgentStatus::Failed => "failed",
            AgentStatus::Skipped => "skipped",
        }
    }

    /// Parse a status string as stored in the agents table.
    pub fn parse(s: &str) -> Option<AgentStatus> {
        match s {
            "running" => Some(AgentStatus::Running),
            "paused" => Some(AgentStatus::Paused),
            "completed" => Some(AgentStatus::Completed),
            "failed" => Some(AgentStatus::Failed),
            "skipped" => Some(AgentStatus::Skipped),
            _ => None,
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
