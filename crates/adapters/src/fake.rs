// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted fake engine for deterministic testing
#![cfg_attr(coverage_nightly, coverage(off))]

use crate::engine::{EngineAdapter, RunOptions, RunOutcome};
use async_trait::async_trait;
use codemachine_core::{EngineError, EngineMetadata, Telemetry};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Scripted behavior for one `run` call.
#[derive(Debug, Clone)]
pub enum FakeBehavior {
    /// Emit chunks/frames, then succeed.
    Succeed {
        chunks: Vec<String>,
        telemetry: Option<Telemetry>,
        session_id: Option<String>,
    },
    /// Report a rate limit in the outcome (not an error).
    RateLimited {
        resets_at_ms: Option<u64>,
        retry_after_seconds: Option<u64>,
    },
    /// Finish with a non-zero exit code.
    ExitWith { code: i32, stderr: String },
    /// Return an execution error.
    Fail { message: String },
    /// Emit chunks, then park until the cancellation token fires.
    BlockUntilCancelled { chunks: Vec<String> },
}

impl FakeBehavior {
    pub fn succeed(stdout: &str) -> Self {
        FakeBehavior::Succeed {
            chunks: vec![stdout.to_string()],
            telemetry: None,
            session_id: None,
        }
    }
}

/// A recorded `run` invocation.
#[derive(Debug, Clone)]
pub struct FakeCall {
    pub prompt: String,
    pub model: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug)]
struct FakeState {
    behaviors: VecDeque<FakeBehavior>,
    calls: Vec<FakeCall>,
}

/// Fake engine with scripted outcomes and recorded calls.
#[derive(Debug)]
pub struct FakeEngine {
    metadata: EngineMetadata,
    authenticated: AtomicBool,
    auth_probes: AtomicUsize,
    state: Arc<Mutex<FakeState>>,
}

impl FakeEngine {
    pub fn new(id: &str, order: u32) -> Self {
        Self {
            metadata: EngineMetadata {
                id: id.to_string(),
                display_name: format!("Fake {id}"),
                default_model: format!("{id}-default"),
                order,
                supports_resume: true,
                model_by_tier: None,
            },
            authenticated: AtomicBool::new(true),
            auth_probes: AtomicUsize::new(0),
            state: Arc::new(Mutex::new(FakeState {
                behaviors: VecDeque::new(),
                calls: Vec::new(),
            })),
        }
    }

    pub fn set_authenticated(&self, value: bool) {
        self.authenticated.store(value, Ordering::SeqCst);
    }

    /// Queue the behavior for the next `run` call.
    pub fn push_behavior(&self, behavior: FakeBehavior) {
        self.state.lock().behaviors.push_back(behavior);
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.state.lock().calls.clone()
    }

    pub fn run_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    pub fn auth_probe_count(&self) -> usize {
        self.auth_probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineAdapter for FakeEngine {
    fn metadata(&self) -> &EngineMetadata {
        &self.metadata
    }

    async fn is_authenticated(&self) -> bool {
        self.auth_probes.fetch_add(1, Ordering::SeqCst);
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn ensure_auth(&self) -> Result<(), EngineError> {
        if self.authenticated.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EngineError::AuthRequired(self.metadata.id.clone()))
        }
    }

    async fn clear_auth(&self) -> Result<(), EngineError> {
        self.authenticated.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn run(&self, options: RunOptions) -> Result<RunOutcome, EngineError> {
        let behavior = {
            let mut state = self.state.lock();
            state.calls.push(FakeCall {
                prompt: options.prompt.clone(),
                model: options.model.clone(),
                session_id: options.session_id.clone(),
            });
            state
                .behaviors
                .pop_front()
                .unwrap_or_else(|| FakeBehavior::succeed("ok\n"))
        };

        match behavior {
            FakeBehavior::Succeed {
                chunks,
                telemetry,
                session_id,
            } => {
                let mut stdout = String::new();
                for chunk in &chunks {
                    options.callbacks.data(chunk);
                    stdout.push_str(chunk);
                }
                if let Some(frame) = &telemetry {
                    options.callbacks.telemetry(frame);
                }
                if let Some(id) = &session_id {
                    options.callbacks.session_id(id);
                }
                Ok(RunOutcome {
                    stdout,
                    exit_code: Some(0),
                    session_id,
                    ..RunOutcome::default()
                })
            }
            FakeBehavior::RateLimited {
                resets_at_ms,
                retry_after_seconds,
            } => Ok(RunOutcome {
                exit_code: Some(1),
                is_rate_limit_error: true,
                rate_limit_resets_at_ms: resets_at_ms,
                retry_after_seconds,
                ..RunOutcome::default()
            }),
            FakeBehavior::ExitWith { code, stderr } => {
                options.callbacks.error_data(&stderr);
                Ok(RunOutcome {
                    stderr,
                    exit_code: Some(code),
                    ..RunOutcome::default()
                })
            }
            FakeBehavior::Fail { message } => Err(EngineError::ExecutionFailed(message)),
            FakeBehavior::BlockUntilCancelled { chunks } => {
                for chunk in &chunks {
                    options.callbacks.data(chunk);
                }
                options.cancel.cancelled().await;
                Err(EngineError::Cancelled)
            }
        }
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
