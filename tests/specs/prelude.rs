// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared harness for the behavioral specs.

use codemachine_adapters::fake::FakeEngine;
use codemachine_adapters::{AuthCache, EngineRegistry};
pub use codemachine_core::Clock;
use codemachine_core::{FakeClock, WorkspacePaths};
use codemachine_engine::{AgentRunner, CircuitBreakerSet, EventBus, FallbackExecutor, RunnerDeps};
use codemachine_storage::{PersistentStore, RateLimitManager};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub struct Harness {
    pub runner: AgentRunner,
    pub executor: FallbackExecutor,
    pub engines: BTreeMap<&'static str, Arc<FakeEngine>>,
    pub rate_limits: Arc<RateLimitManager>,
    pub clock: FakeClock,
    pub _dir: tempfile::TempDir,
}

/// Build a full stack over scripted fake engines registered in the given
/// preference order.
pub fn harness(ids: &[&'static str]) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let paths = WorkspacePaths::new(dir.path().join(".codemachine"));
    let fake_clock = FakeClock::new(1_750_000_000_000);
    let clock: Arc<dyn Clock> = Arc::new(fake_clock.clone());

    let registry = Arc::new(EngineRegistry::new());
    let mut engines = BTreeMap::new();
    for (i, id) in ids.iter().enumerate() {
        let engine = Arc::new(FakeEngine::new(id, (i + 1) as u32));
        registry.register_instance(Arc::clone(&engine) as _);
        engines.insert(*id, engine);
    }

    let auth = Arc::new(AuthCache::with_ttl(
        Duration::from_secs(300),
        Arc::clone(&clock),
    ));
    let rate_limits = Arc::new(RateLimitManager::new(
        paths.rate_limits_file(),
        Arc::clone(&clock),
    ));
    let breakers = Arc::new(CircuitBreakerSet::new(Arc::clone(&clock)));
    let events = Arc::new(EventBus::new());

    let executor = FallbackExecutor::new(
        Arc::clone(&registry),
        Arc::clone(&auth),
        Arc::clone(&rate_limits),
        Arc::clone(&breakers),
        Arc::clone(&events),
    );

    let runner = AgentRunner::new(RunnerDeps {
        paths: paths.clone(),
        store: PersistentStore::in_memory().unwrap(),
        registry,
        auth,
        rate_limits: Arc::clone(&rate_limits),
        breakers,
        clock,
        events,
    });

    Harness {
        runner,
        executor,
        engines,
        rate_limits,
        clock: fake_clock,
        _dir: dir,
    }
}

/// Build a tool-call block the way streaming agents emit them.
pub fn invoke_block(tool: &str, params: &[(&str, &str)]) -> String {
    let mut out = format!("<invoke name=\"{tool}\">");
    for (k, v) in params {
        out.push_str(&format!("<parameter name=\"{k}\">{v}</parameter>"));
    }
    out.push_str("</invoke>");
    out
}
