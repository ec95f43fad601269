// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Codex CLI adapter.

use super::stream::{detect_rate_limit, CodexStream, LineEvent};
use super::{EngineAdapter, RunOptions, RunOutcome};
use crate::subprocess::{self, ChunkFn, SpawnSpec};
use async_trait::async_trait;
use codemachine_core::{EngineError, EngineMetadata, Tier};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const AUTH_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Adapter for the `codex` CLI in non-interactive (`exec`) mode.
#[derive(Debug)]
pub struct CodexEngine {
    metadata: EngineMetadata,
    binary: String,
}

impl Default for CodexEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CodexEngine {
    pub fn new() -> Self {
        Self::with_binary("codex")
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            metadata: EngineMetadata {
                id: "codex".to_string(),
                display_name: "Codex CLI".to_string(),
                default_model: "gpt-5-codex".to_string(),
                order: 2,
                supports_resume: true,
                model_by_tier: Some(BTreeMap::from([
                    (Tier::Complex, "gpt-5-pro".to_string()),
                    (Tier::Standard, "gpt-5-codex".to_string()),
                    (Tier::Fast, "gpt-5-mini".to_string()),
                ])),
            },
            binary: binary.into(),
        }
    }

    fn build_args(&self, options: &RunOptions) -> Vec<String> {
        let mut args = vec!["exec".to_string(), "--json".to_string()];
        if let Some(model) = &options.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if let Some(session) = &options.session_id {
            args.push("resume".to_string());
            args.push(session.clone());
        }
        args.push(options.prompt.clone());
        args
    }
}

#[async_trait]
impl EngineAdapter for CodexEngine {
    fn metadata(&self) -> &EngineMetadata {
        &self.metadata
    }

    async fn is_authenticated(&self) -> bool {
        match subprocess::run_quiet(
            &self.binary,
            &["login", "status"],
            &std::env::temp_dir(),
            AUTH_PROBE_TIMEOUT,
        )
        .await
        {
            Ok(out) => out.exit_code == Some(0),
            Err(e) => {
                tracing::debug!(error = %e, "codex auth probe failed");
                false
            }
        }
    }

    async fn ensure_auth(&self) -> Result<(), EngineError> {
        if self.is_authenticated().await {
            Ok(())
        } else {
            Err(EngineError::AuthRequired(self.metadata.id.clone()))
        }
    }

    async fn clear_auth(&self) -> Result<(), EngineError> {
        let _ = subprocess::run_quiet(
            &self.binary,
            &["logout"],
            &std::env::temp_dir(),
            AUTH_PROBE_TIMEOUT,
        )
        .await;
        Ok(())
    }

    async fn run(&self, options: RunOptions) -> Result<RunOutcome, EngineError> {
        let spec = SpawnSpec {
            program: self.binary.clone(),
            args: self.build_args(&options),
            cwd: options.cwd.clone(),
            env: options.env.clone(),
        };

        let stream = Arc::new(Mutex::new(CodexStream::default()));
        let session = Arc::new(Mutex::new(options.session_id.clone()));
        let callbacks = options.callbacks.clone();

        let on_stdout: ChunkFn = {
            let stream = Arc::clone(&stream);
            let session = Arc::clone(&session);
            let callbacks = callbacks.clone();
            Arc::new(move |chunk: &str| {
                callbacks.data(chunk);
                for line in chunk.lines() {
                    match stream.lock().observe(line) {
                        LineEvent::Telemetry(frame) => callbacks.telemetry(&frame),
                        LineEvent::SessionId(id) => {
                            *session.lock() = Some(id.clone());
                            callbacks.session_id(&id);
                        }
                        LineEvent::None => {}
                    }
                }
            })
        };
        let on_stderr: ChunkFn = {
            let callbacks = callbacks.clone();
            Arc::new(move |chunk: &str| callbacks.error_data(chunk))
        };

        let output = subprocess::run_streaming(
            spec,
            on_stdout,
            on_stderr,
            &options.cancel,
            options.timeout,
        )
        .await?;

        let rate_limit = detect_rate_limit(&output.stdout, &output.stderr, output.exit_code);
        let session_id = session.lock().clone();
        Ok(RunOutcome {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
            is_rate_limit_error: rate_limit.is_some(),
            rate_limit_resets_at_ms: rate_limit.and_then(|(resets, _)| resets),
            retry_after_seconds: rate_limit.and_then(|(_, retry)| retry),
            session_id,
        })
    }
}

#[cfg(test)]
#[path = "codex_tests.rs"]
mod tests;
