// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ordered-chain execution across engines.
//!
//! Walks `[primary, ...chain]` strictly in order. Each candidate is gated by
//! the rate-limit map, the registry, the auth cache, and its circuit
//! breaker; within one candidate the adapter runs to completion before the
//! next is considered. Rate limits park the candidate and advance the walk;
//! any other error aborts it.

use crate::circuit_breaker::CircuitBreakerSet;
use crate::events::{EventBus, WorkflowEvent};
use codemachine_adapters::{AuthCache, EngineAdapter, EngineRegistry, RunOptions, RunOutcome};
use codemachine_core::{is_rate_limit_message, EngineError};
use codemachine_storage::RateLimitManager;
use std::sync::Arc;

/// Default bound on adapter invocations per fallback walk.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Result of a fallback walk.
#[derive(Debug, Clone, Default)]
pub struct FallbackResult {
    /// The successful candidate's outcome; empty on exhaustion.
    pub outcome: RunOutcome,
    pub engine_used: Option<String>,
    pub fell_back: bool,
    /// Candidates that returned a rate limit during this walk, in order.
    pub rate_limited_engines: Vec<String>,
    pub all_engines_exhausted: bool,
    /// Of the engines this walk saw parked, the one that resets first.
    pub soonest_reset_engine: Option<String>,
    pub soonest_reset_at_ms: Option<u64>,
}

impl FallbackResult {
    /// True for the exhaustion sentinel and for rate-limited outcomes.
    pub fn is_rate_limit_error(&self) -> bool {
        self.all_engines_exhausted || self.outcome.is_rate_limit_error
    }
}

/// Runs an engine, walking the fallback chain past parked candidates.
pub struct FallbackExecutor {
    registry: Arc<EngineRegistry>,
    auth: Arc<AuthCache>,
    rate_limits: Arc<RateLimitManager>,
    breakers: Arc<CircuitBreakerSet>,
    events: Arc<EventBus>,
}

impl FallbackExecutor {
    pub fn new(
        registry: Arc<EngineRegistry>,
        auth: Arc<AuthCache>,
        rate_limits: Arc<RateLimitManager>,
        breakers: Arc<CircuitBreakerSet>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            registry,
            auth,
            rate_limits,
            breakers,
            events,
        }
    }

    /// `[primary] + dedup(chain)` preserving order, primary first.
    fn candidates(primary: &str, fallback_chain: &[String]) -> Vec<String> {
        let mut candidates = vec![primary.to_string()];
        for engine in fallback_chain {
            if !candidates.iter().any(|c| c == engine) {
                candidates.push(engine.clone());
            }
        }
        candidates
    }

    async fn probe(&self, engine_id: &str) -> bool {
        let Ok(adapter) = self.registry.get(engine_id).await else {
            return false;
        };
        self.auth
            .is_authenticated(engine_id, || async move { adapter.is_authenticated().await })
            .await
    }

    fn mark_limited(
        &self,
        engine_id: &str,
        resets_at_ms: Option<u64>,
        retry_after_seconds: Option<u64>,
    ) {
        self.rate_limits
            .mark_rate_limited(engine_id, resets_at_ms, retry_after_seconds);
        self.events.emit(WorkflowEvent::EngineRateLimited {
            engine_id: engine_id.to_string(),
            resets_in_secs: self.rate_limits.time_until_available_secs(engine_id),
        });
    }

    /// Walk the candidate chain until one engine completes.
    ///
    /// Rate-limited candidates are recorded and skipped; non-rate-limit
    /// errors propagate immediately. When every candidate is parked the
    /// exhaustion sentinel comes back as `Ok` so the caller can schedule a
    /// retry at the soonest reset time.
    pub async fn run_with_fallback(
        &self,
        primary_engine: &str,
        fallback_chain: &[String],
        options: RunOptions,
        max_attempts: usize,
    ) -> Result<FallbackResult, EngineError> {
        let candidates = Self::candidates(primary_engine, fallback_chain);
        let mut rate_limited: Vec<String> = Vec::new();
        let mut skipped_unavailable: Vec<String> = Vec::new();
        let mut attempts = 0usize;

        for candidate in &candidates {
            if options.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if attempts >= max_attempts {
                tracing::warn!(max_attempts, "fallback attempt budget exhausted");
                break;
            }

            if !self.rate_limits.is_engine_available(candidate) {
                let remaining = self.rate_limits.time_until_available_secs(candidate);
                tracing::info!(
                    engine_id = %candidate,
                    resets_in_s = remaining,
                    "skipping rate-limited engine"
                );
                skipped_unavailable.push(candidate.clone());
                continue;
            }

            let adapter = match self.registry.get(candidate).await {
                Ok(adapter) => adapter,
                Err(e) => {
                    tracing::warn!(engine_id = %candidate, error = %e, "skipping unloadable engine");
                    continue;
                }
            };

            if !self.probe(candidate).await {
                tracing::info!(engine_id = %candidate, "skipping unauthenticated engine");
                continue;
            }

            let breaker = self.breakers.breaker(candidate);
            if !breaker.allow_request() {
                tracing::info!(engine_id = %candidate, "skipping engine with open circuit");
                continue;
            }

            if candidate != primary_engine {
                self.events.emit(WorkflowEvent::FallbackAttempt {
                    from_engine: primary_engine.to_string(),
                    to_engine: candidate.clone(),
                });
            }

            attempts += 1;
            match adapter.run(options.clone()).await {
                Ok(outcome) if outcome.is_rate_limit_error => {
                    breaker.record_failure();
                    self.mark_limited(
                        candidate,
                        outcome.rate_limit_resets_at_ms,
                        outcome.retry_after_seconds,
                    );
                    rate_limited.push(candidate.clone());
                }
                Ok(outcome) => {
                    breaker.record_success();
                    return Ok(FallbackResult {
                        outcome,
                        engine_used: Some(candidate.clone()),
                        fell_back: candidate != primary_engine,
                        rate_limited_engines: rate_limited,
                        all_engines_exhausted: false,
                        soonest_reset_engine: None,
                        soonest_reset_at_ms: None,
                    });
                }
                Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
                Err(EngineError::RateLimited {
                    resets_at_ms,
                    retry_after_seconds,
                    ..
                }) => {
                    breaker.record_failure();
                    self.mark_limited(candidate, resets_at_ms, retry_after_seconds);
                    rate_limited.push(candidate.clone());
                }
                Err(e) if is_rate_limit_message(&e.to_string()) => {
                    breaker.record_failure();
                    let retry_after =
                        codemachine_core::extract_retry_after_seconds(&e.to_string());
                    self.mark_limited(candidate, None, retry_after);
                    rate_limited.push(candidate.clone());
                }
                Err(e) => {
                    breaker.record_failure();
                    return Err(e);
                }
            }
        }

        // Exhausted: report the engine that frees up first among those this
        // walk saw parked.
        let mut parked: Vec<String> = rate_limited.clone();
        for engine in &skipped_unavailable {
            if !parked.iter().any(|p| p == engine) {
                parked.push(engine.clone());
            }
        }
        let soonest_reset_engine = parked
            .iter()
            .min_by_key(|e| self.rate_limits.time_until_available_secs(e))
            .cloned();
        let soonest_reset_at_ms = soonest_reset_engine
            .as_deref()
            .and_then(|e| self.rate_limits.resets_at_ms(e));

        self.events.emit(WorkflowEvent::AllEnginesExhausted {
            soonest_reset_engine: soonest_reset_engine.clone(),
        });

        Ok(FallbackResult {
            outcome: RunOutcome {
                is_rate_limit_error: true,
                ..RunOutcome::default()
            },
            engine_used: None,
            fell_back: false,
            rate_limited_engines: rate_limited,
            all_engines_exhausted: true,
            soonest_reset_engine,
            soonest_reset_at_ms,
        })
    }
}

#[cfg(test)]
#[path = "fallback_tests.rs"]
mod tests;
