// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deterministic in-process engine, registered only when
//! `CODEMACHINE_ENABLE_MOCK_ENGINE` is set.

use super::{EngineAdapter, RunOptions, RunOutcome};
use async_trait::async_trait;
use codemachine_core::{EngineError, EngineMetadata, Telemetry};

/// Engine that answers without spawning anything.
#[derive(Debug)]
pub struct MockEngine {
    metadata: EngineMetadata,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            metadata: EngineMetadata {
                id: "mock".to_string(),
                display_name: "Mock Engine".to_string(),
                default_model: "mock-1".to_string(),
                order: 99,
                supports_resume: true,
                model_by_tier: None,
            },
        }
    }
}

#[async_trait]
impl EngineAdapter for MockEngine {
    fn metadata(&self) -> &EngineMetadata {
        &self.metadata
    }

    async fn is_authenticated(&self) -> bool {
        true
    }

    async fn ensure_auth(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn clear_auth(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn run(&self, options: RunOptions) -> Result<RunOutcome, EngineError> {
        if options.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let session_id = options
            .session_id
            .clone()
            .unwrap_or_else(|| format!("mock-{}", uuid::Uuid::new_v4()));
        options.callbacks.session_id(&session_id);

        let stdout = format!("mock response to: {}\n", options.prompt);
        options.callbacks.data(&stdout);

        let telemetry = Telemetry {
            tokens_in: options.prompt.split_whitespace().count() as u64,
            tokens_out: 8,
            ..Telemetry::default()
        };
        options.callbacks.telemetry(&telemetry);

        Ok(RunOutcome {
            stdout,
            stderr: String::new(),
            exit_code: Some(0),
            is_rate_limit_error: false,
            rate_limit_resets_at_ms: None,
            retry_after_seconds: None,
            session_id: Some(session_id),
        })
    }
}

#[cfg(test)]
#[path = "mock_tests.rs"]
mod tests;
