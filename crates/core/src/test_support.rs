// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Builders shared by other crates' tests (feature `test-support`).

use crate::record::{MonitoringId, NewAgent, Telemetry};

/// Minimal registration input for an agent named `name`.
pub fn new_agent(name: &str, parent_id: Option<MonitoringId>) -> NewAgent {
    NewAgent {
        name: name.to_string(),
        prompt: format!("prompt for {name}"),
        parent_id,
        engine_id: "claude".to_string(),
        model: None,
        pid: None,
    }
}

/// Telemetry frame with only the token counters set.
pub fn telemetry(tokens_in: u64, tokens_out: u64) -> Telemetry {
    Telemetry {
        tokens_in,
        tokens_out,
        ..Telemetry::default()
    }
}
