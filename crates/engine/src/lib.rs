// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! codemachine-engine: scheduling and monitoring for the agent pipeline.
//!
//! Composition of the lower layers: the selector picks an engine per step,
//! the fallback executor walks the candidate chain past rate limits and
//! tripped breakers, the monitor owns the durable record lifecycle, the log
//! stream persists output, and the runner ties it all together per step.

mod circuit_breaker;
mod error;
mod events;
mod fallback;
mod log_stream;
mod monitor;
mod preset;
mod runner;
mod selector;

pub use circuit_breaker::{
    BreakerEvent, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSet, CircuitState,
};
pub use error::RuntimeError;
pub use events::{EventBus, EventListener, WorkflowEvent};
pub use fallback::{FallbackExecutor, FallbackResult, DEFAULT_MAX_ATTEMPTS};
pub use log_stream::{read_incremental, tail_log, LogStream, TailError};
pub use monitor::{AgentMonitor, AgentTreeNode};
pub use preset::{
    builtin_presets, resolve_preset, EngineConfigFile, Preset, PresetResolution, SelectionContext,
};
pub use runner::{AgentRunner, ChainedPrompt, ExecuteOptions, ExecuteResult, ResumeHint, RunnerDeps};
pub use selector::{EngineSelector, SelectedEngine};
