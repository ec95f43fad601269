// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gemini CLI adapter.
//!
//! The gemini CLI prints plain text rather than a structured stream, so this
//! adapter forwards chunks without telemetry or session extraction. Auth is
//! key-based: the probe checks the API key environment rather than spawning
//! a login-status subprocess.

use super::stream::detect_rate_limit;
use super::{EngineAdapter, RunOptions, RunOutcome};
use crate::subprocess::{self, ChunkFn, SpawnSpec};
use async_trait::async_trait;
use codemachine_core::{EngineError, EngineMetadata, Tier};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Adapter for the `gemini` CLI.
#[derive(Debug)]
pub struct GeminiEngine {
    metadata: EngineMetadata,
    binary: String,
}

impl Default for GeminiEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl GeminiEngine {
    pub fn new() -> Self {
        Self::with_binary("gemini")
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            metadata: EngineMetadata {
                id: "gemini".to_string(),
                display_name: "Gemini CLI".to_string(),
                default_model: "gemini-2.5-pro".to_string(),
                order: 3,
                supports_resume: false,
                model_by_tier: Some(BTreeMap::from([
                    (Tier::Complex, "gemini-2.5-pro".to_string()),
                    (Tier::Standard, "gemini-2.5-pro".to_string()),
                    (Tier::Fast, "gemini-2.5-flash".to_string()),
                ])),
            },
            binary: binary.into(),
        }
    }

    fn build_args(&self, options: &RunOptions) -> Vec<String> {
        let mut args = vec!["-p".to_string(), options.prompt.clone()];
        if let Some(model) = &options.model {
            args.push("-m".to_string());
            args.push(model.clone());
        }
        args
    }
}

#[async_trait]
impl EngineAdapter for GeminiEngine {
    fn metadata(&self) -> &EngineMetadata {
        &self.metadata
    }

    async fn is_authenticated(&self) -> bool {
        ["GEMINI_API_KEY", "GOOGLE_API_KEY"]
            .iter()
            .any(|key| std::env::var(key).map(|v| !v.is_empty()).unwrap_or(false))
    }

    async fn ensure_auth(&self) -> Result<(), EngineError> {
        if self.is_authenticated().await {
            Ok(())
        } else {
            Err(EngineError::AuthRequired(self.metadata.id.clone()))
        }
    }

    async fn clear_auth(&self) -> Result<(), EngineError> {
        // Key-based auth; nothing cached on disk to clear.
        Ok(())
    }

    async fn run(&self, options: RunOptions) -> Result<RunOutcome, EngineError> {
        let spec = SpawnSpec {
            program: self.binary.clone(),
            args: self.build_args(&options),
            cwd: options.cwd.clone(),
            env: options.env.clone(),
        };

        let callbacks = options.callbacks.clone();
        let on_stdout: ChunkFn = {
            let callbacks = callbacks.clone();
            Arc::new(move |chunk: &str| callbacks.data(chunk))
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
        Ok(RunOutcome {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
            is_rate_limit_error: rate_limit.is_some(),
            rate_limit_resets_at_ms: rate_limit.and_then(|(resets, _)| resets),
            retry_after_seconds: rate_limit.and_then(|(_, retry)| retry),
            session_id: None,
        })
    }
}

#[cfg(test)]
#[path = "gemini_tests.rs"]
mod tests;
