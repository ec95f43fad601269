// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine error taxonomy.
//!
//! Rate limits carry structured reset hints so the fallback layer never has
//! to re-parse provider output; the string classifier in [`crate::classify`]
//! exists only for adapters that cannot produce structured errors.

use thiserror::Error;

/// Errors from engine resolution and execution.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Unknown engine id; fatal for the step.
    #[error("engine not found: {0}")]
    NotFound(String),
    /// Provider not logged in; recoverable when fallback is allowed.
    #[error("engine not authenticated: {0}")]
    AuthRequired(String),
    /// Recoverable; drives the rate-limit manager and fallback chain.
    #[error("engine rate limited: {engine_id}")]
    RateLimited {
        engine_id: String,
        /// Wall-clock reset time, when the provider supplied one.
        resets_at_ms: Option<u64>,
        retry_after_seconds: Option<u64>,
    },
    /// Non-zero exit or uncategorized adapter failure; fatal for the step.
    #[error("engine execution failed: {0}")]
    ExecutionFailed(String),
    /// Surface to the user; no automatic retry.
    #[error("context length exceeded: {0}")]
    ContextLength(String),
    /// Surface to the user; no retry.
    #[error("content filtered: {0}")]
    ContentFilter(String),
    /// A loader produced something that does not satisfy the adapter contract.
    #[error("invalid engine module: {0}")]
    InvalidModule(String),
    /// Failed to start the provider subprocess.
    #[error("spawn failed: {0}")]
    SpawnFailed(String),
    /// User-initiated; not a failure, the record stays resumable.
    #[error("cancelled")]
    Cancelled,
}

impl EngineError {
    /// Whether this error parks the engine rather than failing the step.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, EngineError::RateLimited { .. })
    }
}
