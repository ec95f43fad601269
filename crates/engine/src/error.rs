// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the engine runtime

use codemachine_core::{EngineError, MonitoringId};
use codemachine_storage::StoreError;
use thiserror::Error;

/// Errors that can occur while running agents.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("monitoring record not found: {0}")]
    RecordNotFound(MonitoringId),
    #[error("engine config invalid: {0}")]
    ConfigInvalid(String),
    /// Every candidate engine is parked; retry after the soonest reset.
    #[error("all engines rate limited")]
    AllEnginesRateLimited {
        soonest_reset_engine: Option<String>,
        soonest_reset_at_ms: Option<u64>,
        rate_limited_engines: Vec<String>,
    },
}

impl RuntimeError {
    /// Whether the step can be resumed later rather than having failed.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, RuntimeError::Engine(EngineError::Cancelled))
    }
}
