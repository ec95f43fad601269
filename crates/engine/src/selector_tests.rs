// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use codemachine_adapters::fake::FakeEngine;
use codemachine_core::FakeClock;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::Duration;

struct Setup {
    registry: Arc<EngineRegistry>,
    engines: BTreeMap<&'static str, Arc<FakeEngine>>,
    selector: EngineSelector,
    events: Arc<EventBus>,
}

fn setup(specs: &[(&'static str, u32, bool)]) -> Setup {
    let registry = Arc::new(EngineRegistry::new());
    let mut engines = BTreeMap::new();
    for (id, order, authed) in specs {
        let engine = Arc::new(FakeEngine::new(id, *order));
        engine.set_authenticated(*authed);
        registry.register_instance(Arc::clone(&engine) as _);
        engines.insert(*id, engine);
    }
    let auth = Arc::new(AuthCache::with_ttl(
        Duration::from_secs(300),
        Arc::new(FakeClock::new(0)),
    ));
    let events = Arc::new(EventBus::new());
    let selector = EngineSelector::new(Arc::clone(&registry), auth, Arc::clone(&events));
    Setup {
        registry,
        engines,
        selector,
        events,
    }
}

fn ctx_with_engine(engine: &str) -> SelectionContext {
    SelectionContext {
        global_engine: Some(engine.to_string()),
        ..SelectionContext::default()
    }
}

#[tokio::test]
async fn authenticated_preset_engine_wins() {
    let s = setup(&[("a", 1, true), ("b", 2, true)]);
    let selected = s
        .selector
        .select_engine("coder", None, Some(&ctx_with_engine("b")), None)
        .await
        .unwrap();
    assert_eq!(selected.engine_id, "b");
}

#[tokio::test]
async fn unauthenticated_preset_falls_through_to_scan() {
    let s = setup(&[("a", 1, false), ("b", 2, true)]);
    let selected = s
        .selector
        .select_engine("coder", None, Some(&ctx_with_engine("a")), None)
        .await
        .unwrap();
    assert_eq!(selected.engine_id, "b");

    // The fall-through was announced.
    let preset_events = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&preset_events);
    s.events.subscribe(Arc::new(move |event| {
        if matches!(event, WorkflowEvent::PresetEngineNotAuthenticated { .. }) {
            *sink.lock() += 1;
        }
    }));
    let _ = s
        .selector
        .select_engine("coder", None, Some(&ctx_with_engine("a")), None)
        .await
        .unwrap();
    assert_eq!(*preset_events.lock(), 1);
}

#[tokio::test]
async fn explicit_step_engine_is_used_when_authenticated() {
    let s = setup(&[("a", 1, true), ("b", 2, true)]);
    let selected = s
        .selector
        .select_engine("coder", Some("b"), None, None)
        .await
        .unwrap();
    assert_eq!(selected.engine_id, "b");
}

#[tokio::test]
async fn unauthenticated_step_engine_scans_when_fallback_allowed() {
    let s = setup(&[("a", 1, false), ("b", 2, true), ("c", 3, true)]);
    let selected = s
        .selector
        .select_engine("coder", Some("a"), None, None)
        .await
        .unwrap();
    // First authenticated in registry order.
    assert_eq!(selected.engine_id, "b");
}

#[tokio::test]
async fn unauthenticated_step_engine_is_fatal_without_fallback() {
    let s = setup(&[("a", 1, false), ("b", 2, true)]);
    let context = SelectionContext {
        fallback_enabled: Some(false),
        ..SelectionContext::default()
    };
    let err = s
        .selector
        .select_engine("coder", Some("a"), Some(&context), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AuthRequired(id) if id == "a"));
}

#[tokio::test]
async fn config_can_disable_fallback_too() {
    let s = setup(&[("a", 1, false), ("b", 2, true)]);
    let config = EngineConfigFile {
        fallback_enabled: Some(false),
        ..EngineConfigFile::default()
    };
    let err = s
        .selector
        .select_engine("coder", Some("a"), None, Some(&config))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AuthRequired(_)));
}

#[tokio::test]
async fn no_step_engine_scans_in_order() {
    let s = setup(&[("a", 1, false), ("b", 2, false), ("c", 3, true)]);
    let selected = s
        .selector
        .select_engine("coder", None, None, None)
        .await
        .unwrap();
    assert_eq!(selected.engine_id, "c");
}

#[tokio::test]
async fn nothing_authenticated_returns_registry_default_with_warning() {
    let s = setup(&[("a", 1, false), ("b", 2, false)]);
    let selected = s
        .selector
        .select_engine("coder", None, None, None)
        .await
        .unwrap();
    assert_eq!(selected.engine_id, "a");
    assert_eq!(s.registry.default_engine_id().as_deref(), Some("a"));
}

#[tokio::test]
async fn preset_model_rides_along() {
    let s = setup(&[("claude", 1, true)]);
    let context = SelectionContext {
        preset: Some("claude".to_string()),
        ..SelectionContext::default()
    };
    let selected = s
        .selector
        .select_engine("architect", None, Some(&context), None)
        .await
        .unwrap();
    assert_eq!(selected.engine_id, "claude");
    assert_eq!(selected.preset_model.as_deref(), Some("opus"));
}

#[tokio::test]
async fn auth_probes_go_through_the_cache() {
    let s = setup(&[("a", 1, true)]);
    for _ in 0..4 {
        let _ = s
            .selector
            .select_engine("coder", None, None, None)
            .await
            .unwrap();
    }
    // One probe despite four selections: the cache held the result.
    assert_eq!(s.engines["a"].auth_probe_count(), 1);
}
