// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use parking_lot::Mutex;

#[test]
fn subscribers_observe_events_in_order() {
    let bus = EventBus::new();
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.subscribe(Arc::new(move |event| {
        if let WorkflowEvent::EngineSelected { engine_id, .. } = event {
            sink.lock().push(engine_id.clone());
        }
    }));

    for id in ["claude", "codex"] {
        bus.emit(WorkflowEvent::EngineSelected {
            agent_id: "coder".to_string(),
            engine_id: id.to_string(),
            source: "scan",
        });
    }
    assert_eq!(*seen.lock(), vec!["claude", "codex"]);
}

#[test]
fn multiple_subscribers_all_fire() {
    let bus = EventBus::new();
    let count = Arc::new(Mutex::new(0));
    for _ in 0..3 {
        let count = Arc::clone(&count);
        bus.subscribe(Arc::new(move |_| *count.lock() += 1));
    }
    bus.emit(WorkflowEvent::AllEnginesExhausted {
        soonest_reset_engine: None,
    });
    assert_eq!(*count.lock(), 3);
}

#[test]
fn emitting_with_no_subscribers_is_fine() {
    let bus = EventBus::new();
    bus.emit(WorkflowEvent::PresetEngineNotAuthenticated {
        engine_id: "claude".to_string(),
    });
}
