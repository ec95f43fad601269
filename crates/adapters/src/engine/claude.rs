// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Claude Code CLI adapter.

use super::stream::{detect_rate_limit, ClaudeStream, LineEvent};
use super::{EngineAdapter, RunOptions, RunOutcome};
use crate::subprocess::{self, ChunkFn, SpawnSpec};
use async_trait::async_trait;
use codemachine_core::{EngineError, EngineMetadata, Tier};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// How long an auth probe may take before we call it unauthenticated.
const AUTH_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Adapter for the `claude` CLI in headless (`-p`) mode.
#[derive(Debug)]
pub struct ClaudeEngine {
    metadata: EngineMetadata,
    binary: String,
}

impl Default for ClaudeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaudeEngine {
    pub fn new() -> Self {
        Self::with_binary("claude")
    }

    /// Use an alternate binary, for tests that stub the CLI.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            metadata: EngineMetadata {
                id: "claude".to_string(),
                display_name: "Claude Code".to_string(),
                default_model: "sonnet".to_string(),
                order: 1,
                supports_resume: true,
                model_by_tier: Some(BTreeMap::from([
                    (Tier::Complex, "opus".to_string()),
                    (Tier::Standard, "sonnet".to_string()),
                    (Tier::Fast, "haiku".to_string()),
                ])),
            },
            binary: binary.into(),
        }
    }

    fn build_args(&self, options: &RunOptions) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            options.prompt.clone(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
        ];
        if let Some(model) = &options.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if let Some(session) = &options.session_id {
            args.push("--resume".to_string());
            args.push(session.clone());
        }
        args
    }
}

#[async_trait]
impl EngineAdapter for ClaudeEngine {
    fn metadata(&self) -> &EngineMetadata {
        &self.metadata
    }

    async fn is_authenticated(&self) -> bool {
        match subprocess::run_quiet(
            &self.binary,
            &["auth", "status"],
            &std::env::temp_dir(),
            AUTH_PROBE_TIMEOUT,
        )
        .await
        {
            Ok(out) => out.exit_code == Some(0),
            Err(e) => {
                tracing::debug!(error = %e, "claude auth probe failed");
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

        let stream = Arc::new(Mutex::new(ClaudeStream::default()));
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
#[path = "claude_tests.rs"]
mod tests;
