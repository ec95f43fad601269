// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The provider engine contract.
//!
//! Each engine wraps one AI-provider CLI. The capability set is closed:
//! metadata, auth, run. Everything above this seam (selection, fallback,
//! monitoring) is provider-agnostic.

mod claude;
mod codex;
mod gemini;
pub(crate) mod mock;
pub(crate) mod stream;

pub use claude::ClaudeEngine;
pub use codex::CodexEngine;
pub use gemini::GeminiEngine;
pub use mock::MockEngine;

use async_trait::async_trait;
use codemachine_core::{EngineError, EngineMetadata, Telemetry};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Chunk/frame callbacks observed during a run.
///
/// Callbacks fire on the runner's tasks in the order the child produced the
/// data; they must not block for long.
#[derive(Clone, Default)]
pub struct RunCallbacks {
    pub on_data: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub on_error_data: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub on_telemetry: Option<Arc<dyn Fn(&Telemetry) + Send + Sync>>,
    pub on_session_id: Option<Arc<dyn Fn(&str) + Send + Sync>>,
}

impl RunCallbacks {
    pub fn data(&self, chunk: &str) {
        if let Some(cb) = &self.on_data {
            cb(chunk);
        }
    }

    pub fn error_data(&self, chunk: &str) {
        if let Some(cb) = &self.on_error_data {
            cb(chunk);
        }
    }

    pub fn telemetry(&self, frame: &Telemetry) {
        if let Some(cb) = &self.on_telemetry {
            cb(frame);
        }
    }

    pub fn session_id(&self, id: &str) {
        if let Some(cb) = &self.on_session_id {
            cb(id);
        }
    }
}

impl std::fmt::Debug for RunCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunCallbacks")
            .field("on_data", &self.on_data.is_some())
            .field("on_error_data", &self.on_error_data.is_some())
            .field("on_telemetry", &self.on_telemetry.is_some())
            .field("on_session_id", &self.on_session_id.is_some())
            .finish()
    }
}

/// One engine invocation.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub prompt: String,
    pub model: Option<String>,
    pub cwd: PathBuf,
    /// Extra child environment; sanitized before spawn.
    pub env: Vec<(String, String)>,
    /// Resume a prior conversation, for engines that support it.
    pub session_id: Option<String>,
    pub timeout: Option<Duration>,
    pub cancel: CancellationToken,
    pub callbacks: RunCallbacks,
}

impl RunOptions {
    pub fn new(prompt: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            model: None,
            cwd: cwd.into(),
            env: Vec::new(),
            session_id: None,
            timeout: None,
            cancel: CancellationToken::new(),
            callbacks: RunCallbacks::default(),
        }
    }
}

/// Result of a completed (or rate-limited) engine invocation.
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    /// Set when the provider reported a rate limit; the run is then not a
    /// failure but a signal to park this engine and fall back.
    pub is_rate_limit_error: bool,
    pub rate_limit_resets_at_ms: Option<u64>,
    pub retry_after_seconds: Option<u64>,
    pub session_id: Option<String>,
}

/// An AI-provider adapter.
#[async_trait]
pub trait EngineAdapter: Send + Sync + std::fmt::Debug {
    /// Static metadata; the id must match the registry key.
    fn metadata(&self) -> &EngineMetadata;

    /// Probe provider authentication. May be slow (seconds); callers go
    /// through [`crate::AuthCache`].
    async fn is_authenticated(&self) -> bool;

    /// Fail with instructions when the provider is not logged in.
    async fn ensure_auth(&self) -> Result<(), EngineError>;

    /// Drop cached provider credentials.
    async fn clear_auth(&self) -> Result<(), EngineError>;

    /// Execute one prompt to completion, streaming through the callbacks in
    /// `options`. Rate limits surface in the outcome, not as errors.
    async fn run(&self, options: RunOptions) -> Result<RunOutcome, EngineError>;
}
