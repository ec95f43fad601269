// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TTL cache over provider auth probes.
//!
//! Auth probes spawn provider CLIs and can take tens of seconds, so results
//! are cached per engine. Concurrent callers for one engine serialize on a
//! per-key slot: the first runs the probe, the rest observe its result.

use crate::env;
use codemachine_core::Clock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy)]
struct CachedAuth {
    value: bool,
    at_ms: u64,
}

type Slot = Arc<Mutex<Option<CachedAuth>>>;

/// Per-engine authentication cache.
pub struct AuthCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl AuthCache {
    /// TTL from `CODEMACHINE_AUTH_CACHE_TTL_SECS` (default 5 minutes).
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_ttl(env::auth_cache_ttl(), clock)
    }

    pub fn with_ttl(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Cached auth state for `engine_id`, probing when stale.
    ///
    /// Within the TTL the probe runs at most once per key regardless of
    /// caller concurrency. In dry-run mode (`CODEMACHINE_SKIP_AUTH`) every
    /// engine counts as authenticated and no probe runs.
    pub async fn is_authenticated<F, Fut>(&self, engine_id: &str, probe: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = bool>,
    {
        if env::skip_auth() {
            return true;
        }

        let slot = {
            let mut slots = self.slots.lock().await;
            Arc::clone(slots.entry(engine_id.to_string()).or_default())
        };

        let mut guard = slot.lock().await;
        let now = self.clock.now_ms();
        if let Some(cached) = *guard {
            if now.saturating_sub(cached.at_ms) < self.ttl.as_millis() as u64 {
                return cached.value;
            }
        }

        let value = probe().await;
        *guard = Some(CachedAuth { value, at_ms: now });
        tracing::debug!(engine_id, authenticated = value, "auth probe completed");
        value
    }

    /// Drop the cached result for one engine.
    pub async fn invalidate(&self, engine_id: &str) {
        let slot = {
            let slots = self.slots.lock().await;
            slots.get(engine_id).cloned()
        };
        if let Some(slot) = slot {
            *slot.lock().await = None;
        }
    }

    /// Drop everything.
    pub async fn clear(&self) {
        self.slots.lock().await.clear();
    }
}

#[cfg(test)]
#[path = "auth_cache_tests.rs"]
mod tests;
