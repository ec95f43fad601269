// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Streaming extraction: tool calls, goals, telemetry.

use crate::prelude::*;
use codemachine_adapters::fake::FakeBehavior;
use codemachine_core::{Telemetry, ToolContext};
use codemachine_engine::ExecuteOptions;
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn one_write_tool_call_fires_one_file_and_action_update() {
    let h = harness(&["a"]);
    let stream = format!(
        "let me write that file\n{}\ncontinuing...\n",
        invoke_block("Write", &[("file_path", "src/x.ts")])
    );
    h.engines["a"].push_behavior(FakeBehavior::Succeed {
        chunks: vec![stream],
        telemetry: None,
        session_id: None,
    });

    let contexts: Arc<Mutex<Vec<ToolContext>>> = Arc::new(Mutex::new(Vec::new()));
    let mut options = ExecuteOptions::new("/tmp");
    options.on_context = Some({
        let contexts = Arc::clone(&contexts);
        Arc::new(move |ctx: &ToolContext| contexts.lock().unwrap().push(ctx.clone()))
    });

    let _ = h.runner.execute_agent("coder", "p", options).await.unwrap();

    let contexts = contexts.lock().unwrap();
    assert_eq!(contexts.len(), 1, "exactly one context update expected");
    assert_eq!(contexts[0].current_file.as_deref(), Some("src/x.ts"));
    assert_eq!(contexts[0].current_action.as_deref(), Some("Writing x.ts"));
}

#[tokio::test]
async fn successive_tool_calls_each_advance_the_cursor() {
    let h = harness(&["a"]);
    let chunks = vec![
        invoke_block("Read", &[("file_path", "src/a.rs")]),
        "\nthinking\n".to_string(),
        invoke_block("Bash", &[("description", "Run the tests")]),
        "\n".to_string(),
    ];
    h.engines["a"].push_behavior(FakeBehavior::Succeed {
        chunks,
        telemetry: None,
        session_id: None,
    });

    let actions: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let mut options = ExecuteOptions::new("/tmp");
    options.on_context = Some({
        let actions = Arc::clone(&actions);
        Arc::new(move |ctx: &ToolContext| {
            if let Some(action) = &ctx.current_action {
                actions.lock().unwrap().push(action.clone());
            }
        })
    });

    let _ = h.runner.execute_agent("coder", "p", options).await.unwrap();
    assert_eq!(
        *actions.lock().unwrap(),
        vec!["Reading a.rs", "Run the tests"]
    );
}

#[tokio::test]
async fn goal_and_telemetry_flow_to_their_observers() {
    let h = harness(&["a"]);
    let frame = Telemetry {
        tokens_in: 250,
        tokens_out: 80,
        cache_read_tokens: Some(1_000),
        cost: Some(0.03),
        ..Telemetry::default()
    };
    h.engines["a"].push_behavior(FakeBehavior::Succeed {
        chunks: vec!["starting up\n".to_string()],
        telemetry: Some(frame.clone()),
        session_id: Some("sess-7".to_string()),
    });

    let goals: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let frames: Arc<Mutex<Vec<Telemetry>>> = Arc::new(Mutex::new(Vec::new()));
    let mut options = ExecuteOptions::new("/tmp");
    options.on_goal = Some({
        let goals = Arc::clone(&goals);
        Arc::new(move |g: &str| goals.lock().unwrap().push(g.to_string()))
    });
    options.on_telemetry = Some({
        let frames = Arc::clone(&frames);
        Arc::new(move |t: &Telemetry| frames.lock().unwrap().push(t.clone()))
    });

    let result = h
        .runner
        .execute_agent("coder", "objective: harden the fallback loop", options)
        .await
        .unwrap();

    assert_eq!(*goals.lock().unwrap(), vec!["harden the fallback loop"]);
    assert_eq!(*frames.lock().unwrap(), vec![frame.clone()]);

    // Telemetry and session id also landed on the durable record.
    let record = h
        .runner
        .monitor()
        .get_agent(result.monitoring_id)
        .unwrap()
        .unwrap();
    assert_eq!(record.telemetry.unwrap(), frame);
    assert_eq!(record.session_id.as_deref(), Some("sess-7"));
}
