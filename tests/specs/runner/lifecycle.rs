// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Record lifecycle: happy path, cancellation, failure.

use crate::prelude::*;
use codemachine_adapters::fake::FakeBehavior;
use codemachine_core::AgentStatus;
use codemachine_engine::ExecuteOptions;
use std::time::Duration;

#[tokio::test]
async fn completed_run_leaves_a_consistent_record_and_log() {
    let h = harness(&["a"]);
    h.engines["a"].push_behavior(FakeBehavior::Succeed {
        chunks: vec!["working...\n".to_string(), "done.\n".to_string()],
        telemetry: None,
        session_id: None,
    });

    let result = h
        .runner
        .execute_agent("coder", "implement the feature", ExecuteOptions::new("/tmp"))
        .await
        .unwrap();

    assert!(!result.output.is_empty());
    let record = h
        .runner
        .monitor()
        .get_agent(result.monitoring_id)
        .unwrap()
        .unwrap();

    // running → completed with a derived duration.
    assert_eq!(record.status, AgentStatus::Completed);
    let end = record.end_time_ms.unwrap();
    assert!(end >= record.start_time_ms);
    assert_eq!(record.duration_ms.unwrap(), end - record.start_time_ms);
    assert!(record.is_consistent());

    // The log exists and opens with the agent header box.
    let log_path = record.log_path.unwrap();
    assert!(log_path.exists());
    let content = std::fs::read_to_string(&log_path).unwrap();
    assert!(content.starts_with(&format!(
        "===\u{256d}\u{2500} Agent {}: coder",
        result.monitoring_id
    )));
}

#[tokio::test]
async fn cancellation_mid_stream_pauses_and_keeps_streamed_chunks() {
    let h = harness(&["a"]);
    h.engines["a"].push_behavior(FakeBehavior::BlockUntilCancelled {
        chunks: vec![
            "chunk one\n".to_string(),
            "chunk two\n".to_string(),
            "chunk three\n".to_string(),
        ],
    });

    let options = ExecuteOptions::new("/tmp");
    let cancel = options.cancel.clone();
    let step = h.runner.execute_agent("coder", "p", options);
    tokio::pin!(step);

    tokio::select! {
        _ = &mut step => panic!("step finished before cancel"),
        _ = tokio::time::sleep(Duration::from_millis(50)) => cancel.cancel(),
    }
    let err = step.await.unwrap_err();
    assert!(err.is_cancellation());

    // Paused, not failed, and resumable.
    let record = &h.runner.monitor().get_all().unwrap()[0];
    assert_eq!(record.status, AgentStatus::Paused);
    assert!(record.end_time_ms.is_none());
    assert!(record.error.is_none());

    let content = std::fs::read_to_string(record.log_path.as_ref().unwrap()).unwrap();
    for chunk in ["chunk one", "chunk two", "chunk three"] {
        assert!(content.contains(chunk), "missing {chunk:?} in log");
    }
}

#[tokio::test]
async fn failed_run_records_the_error() {
    let h = harness(&["a"]);
    h.engines["a"].push_behavior(FakeBehavior::ExitWith {
        code: 1,
        stderr: "compiler exploded\n".to_string(),
    });

    let err = h
        .runner
        .execute_agent("coder", "p", ExecuteOptions::new("/tmp"))
        .await
        .unwrap_err();
    assert!(!err.is_cancellation());

    let record = &h.runner.monitor().get_all().unwrap()[0];
    assert_eq!(record.status, AgentStatus::Failed);
    assert!(record.error.is_some());
    assert!(record.is_consistent());
}

#[tokio::test]
async fn parent_links_build_the_agent_hierarchy() {
    let h = harness(&["a"]);
    for _ in 0..3 {
        h.engines["a"].push_behavior(FakeBehavior::succeed("ok\n"));
    }

    let root = h
        .runner
        .execute_agent("planner", "plan it", ExecuteOptions::new("/tmp"))
        .await
        .unwrap();

    for name in ["coder", "tester"] {
        let mut options = ExecuteOptions::new("/tmp");
        options.parent_id = Some(root.monitoring_id);
        let _ = h.runner.execute_agent(name, "do it", options).await.unwrap();
    }

    let tree = h.runner.monitor().build_agent_tree().unwrap();
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].record.id, root.monitoring_id);
    let children: Vec<&str> = tree[0]
        .children
        .iter()
        .map(|n| n.record.name.as_str())
        .collect();
    assert_eq!(children, vec!["coder", "tester"]);
}
