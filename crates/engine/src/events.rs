// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process workflow event bus.
//!
//! The UI and other external consumers subscribe here; the core never
//! depends on who is listening. Listeners run inline on the emitting task
//! and must be quick.

use crate::circuit_breaker::CircuitState;
use codemachine_core::{AgentStatus, MonitoringId};
use parking_lot::RwLock;
use std::sync::Arc;

/// Events surfaced to workflow observers.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    EngineSelected {
        agent_id: String,
        engine_id: String,
        /// Where the decision came from ("preset", "step", "scan", "default").
        source: &'static str,
    },
    PresetEngineNotAuthenticated {
        engine_id: String,
    },
    FallbackAttempt {
        from_engine: String,
        to_engine: String,
    },
    EngineRateLimited {
        engine_id: String,
        resets_in_secs: u64,
    },
    AllEnginesExhausted {
        soonest_reset_engine: Option<String>,
    },
    CircuitStateChanged {
        engine_id: String,
        from: CircuitState,
        to: CircuitState,
    },
    AgentStatusChanged {
        monitoring_id: MonitoringId,
        status: AgentStatus,
    },
}

pub type EventListener = Arc<dyn Fn(&WorkflowEvent) + Send + Sync>;

/// Fan-out to registered listeners. Listener misbehavior must not disturb
/// the workflow, so emission is fire-and-forget.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<EventListener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: EventListener) {
        self.listeners.write().push(listener);
    }

    pub fn emit(&self, event: WorkflowEvent) {
        tracing::trace!(?event, "workflow event");
        for listener in self.listeners.read().iter() {
            listener(&event);
        }
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
