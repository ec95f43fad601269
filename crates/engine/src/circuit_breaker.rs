// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-engine circuit breaker.
//!
//! Answers "is this engine too broken to try right now?", a different
//! question from the rate-limit map's "is this engine parked until a known
//! wall-clock time?". The two compose in the fallback executor.
//!
//! State is a deterministic function of the event history and the injected
//! clock: failures within a sliding window open the circuit, the reset
//! timeout lets a bounded number of half-open probes through, and enough
//! consecutive successes close it again.

use codemachine_core::Clock;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Breaker status for one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Tuning knobs for one breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures within the window that open the circuit.
    pub failure_threshold: usize,
    /// Half-open successes required to close.
    pub success_threshold: usize,
    /// How long the circuit stays open before probing.
    pub reset_timeout: Duration,
    /// Sliding window for counting failures.
    pub failure_window: Duration,
    /// Concurrent requests admitted while half-open.
    pub half_open_max_requests: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(30),
            failure_window: Duration::from_secs(60),
            half_open_max_requests: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Provider-specific overrides on top of the global defaults.
    pub fn for_engine(engine_id: &str) -> Self {
        match engine_id {
            // High-volume provider: trip earlier, recover slower.
            "claude" => Self {
                failure_threshold: 3,
                reset_timeout: Duration::from_secs(60),
                ..Self::default()
            },
            _ => Self::default(),
        }
    }
}

/// Observable breaker events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerEvent {
    StateChange { from: CircuitState, to: CircuitState },
    RequestAllowed,
    RequestRejected,
    Failure,
    Success,
}

pub type BreakerListener = Arc<dyn Fn(&str, &BreakerEvent) + Send + Sync>;

struct BreakerInner {
    state: CircuitState,
    /// Failure timestamps within the window, oldest first.
    failures: VecDeque<u64>,
    consecutive_successes: usize,
    half_open_in_flight: usize,
    opened_at_ms: Option<u64>,
    closed_at_ms: Option<u64>,
}

/// Breaker for a single engine.
pub struct CircuitBreaker {
    engine_id: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerInner>,
    listener: Option<BreakerListener>,
}

impl CircuitBreaker {
    pub fn new(engine_id: &str, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_listener(engine_id, config, clock, None)
    }

    pub fn with_listener(
        engine_id: &str,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
        listener: Option<BreakerListener>,
    ) -> Self {
        Self {
            engine_id: engine_id.to_string(),
            config,
            clock,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                consecutive_successes: 0,
                half_open_in_flight: 0,
                opened_at_ms: None,
                closed_at_ms: None,
            }),
            listener,
        }
    }

    fn emit(&self, event: BreakerEvent) {
        if let Some(listener) = &self.listener {
            listener(&self.engine_id, &event);
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        let now = self.clock.now_ms();
        inner.state = to;
        match to {
            CircuitState::Open => {
                inner.opened_at_ms = Some(now);
                inner.half_open_in_flight = 0;
            }
            CircuitState::HalfOpen => {
                inner.half_open_in_flight = 0;
                inner.consecutive_successes = 0;
            }
            CircuitState::Closed => {
                inner.failures.clear();
                inner.closed_at_ms = Some(now);
            }
        }
        tracing::info!(engine_id = %self.engine_id, %from, %to, "circuit state changed");
        self.emit(BreakerEvent::StateChange { from, to });
    }

    /// Open → half-open once the reset timeout elapses. Runs on every read.
    fn refresh(&self, inner: &mut BreakerInner) {
        if inner.state != CircuitState::Open {
            return;
        }
        let now = self.clock.now_ms();
        if let Some(opened_at) = inner.opened_at_ms {
            if now.saturating_sub(opened_at) >= self.config.reset_timeout.as_millis() as u64 {
                self.transition(inner, CircuitState::HalfOpen);
            }
        }
    }

    /// Whether a request may be issued right now. Admitted half-open
    /// requests count against `half_open_max_requests`.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        let allowed = match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight < self.config.half_open_max_requests {
                    inner.half_open_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        };
        drop(inner);
        self.emit(if allowed {
            BreakerEvent::RequestAllowed
        } else {
            BreakerEvent::RequestRejected
        });
        allowed
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        match inner.state {
            CircuitState::Closed => inner.consecutive_successes += 1,
            CircuitState::HalfOpen => {
                // The admitted probe finished; free its slot.
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            CircuitState::Open => {}
        }
        drop(inner);
        self.emit(BreakerEvent::Success);
    }

    pub fn record_failure(&self) {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.consecutive_successes = 0;
        match inner.state {
            CircuitState::Closed => {
                inner.failures.push_back(now);
                let horizon = now.saturating_sub(self.config.failure_window.as_millis() as u64);
                while inner.failures.front().is_some_and(|t| *t < horizon) {
                    inner.failures.pop_front();
                }
                if inner.failures.len() >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
        drop(inner);
        self.emit(BreakerEvent::Failure);
    }

    /// Current state, applying the open → half-open timeout on read.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.state
    }

    pub fn engine_id(&self) -> &str {
        &self.engine_id
    }
}

/// Lazily-created breakers per engine, sharing a clock and listener.
pub struct CircuitBreakerSet {
    clock: Arc<dyn Clock>,
    listener: Option<BreakerListener>,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerSet {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_listener(clock, None)
    }

    pub fn with_listener(clock: Arc<dyn Clock>, listener: Option<BreakerListener>) -> Self {
        Self {
            clock,
            listener,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// The breaker for `engine_id`, created with provider defaults on first
    /// use.
    pub fn breaker(&self, engine_id: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock();
        Arc::clone(breakers.entry(engine_id.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::with_listener(
                engine_id,
                CircuitBreakerConfig::for_engine(engine_id),
                Arc::clone(&self.clock),
                self.listener.clone(),
            ))
        }))
    }
}

#[cfg(test)]
#[path = "circuit_breaker_tests.rs"]
mod tests;
