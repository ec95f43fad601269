// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::engine::RunCallbacks;
use codemachine_core::Telemetry;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Write a stub `claude` script that emits canned stream-json output.
fn stub_cli(dir: &Path, body: &str) -> String {
    let path = dir.join("claude-stub");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "#!/bin/sh").unwrap();
    writeln!(file, "{body}").unwrap();
    let mut perms = file.metadata().unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path.to_string_lossy().to_string()
}

#[test]
fn args_include_streaming_format() {
    let engine = ClaudeEngine::new();
    let options = RunOptions::new("do the thing", "/tmp");
    let args = engine.build_args(&options);
    assert_eq!(args[0], "-p");
    assert_eq!(args[1], "do the thing");
    assert!(args.contains(&"stream-json".to_string()));
    assert!(!args.contains(&"--resume".to_string()));
}

#[test]
fn args_carry_model_and_resume() {
    let engine = ClaudeEngine::new();
    let mut options = RunOptions::new("p", "/tmp");
    options.model = Some("opus".to_string());
    options.session_id = Some("sess-7".to_string());
    let args = engine.build_args(&options);
    let joined = args.join(" ");
    assert!(joined.contains("--model opus"));
    assert!(joined.contains("--resume sess-7"));
}

#[test]
fn metadata_is_first_in_preference_order() {
    let meta = ClaudeEngine::new().metadata().clone();
    assert_eq!(meta.id, "claude");
    assert_eq!(meta.order, 1);
    assert!(meta.supports_resume);
    assert_eq!(meta.model_for_tier(Tier::Fast), Some("haiku"));
}

#[tokio::test]
async fn run_extracts_session_and_telemetry_from_stream() {
    let dir = tempfile::tempdir().unwrap();
    let script = concat!(
        r#"echo '{"type":"system","subtype":"init","session_id":"sess-42"}'; "#,
        r#"echo '{"type":"assistant","message":{"usage":{"input_tokens":11,"output_tokens":7}}}'; "#,
        r#"echo '{"type":"result","total_cost_usd":0.05,"usage":{}}'"#,
    );
    let binary = stub_cli(dir.path(), script);
    let engine = ClaudeEngine::with_binary(binary);

    let frames: Arc<Mutex<Vec<Telemetry>>> = Arc::new(Mutex::new(Vec::new()));
    let sessions: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let mut options = RunOptions::new("prompt", dir.path());
    options.callbacks = RunCallbacks {
        on_telemetry: Some({
            let frames = Arc::clone(&frames);
            Arc::new(move |t: &Telemetry| frames.lock().push(t.clone()))
        }),
        on_session_id: Some({
            let sessions = Arc::clone(&sessions);
            Arc::new(move |s: &str| sessions.lock().push(s.to_string()))
        }),
        ..RunCallbacks::default()
    };

    let outcome = engine.run(options).await.unwrap();
    assert_eq!(outcome.exit_code, Some(0));
    assert!(!outcome.is_rate_limit_error);
    assert_eq!(outcome.session_id.as_deref(), Some("sess-42"));
    assert_eq!(*sessions.lock(), vec!["sess-42"]);

    let frames = frames.lock();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].tokens_in, 11);
    assert_eq!(frames[1].cost, Some(0.05));
}

#[tokio::test]
async fn run_flags_rate_limit_from_output() {
    let dir = tempfile::tempdir().unwrap();
    let binary = stub_cli(
        dir.path(),
        r#"echo 'API Error: 429 rate_limit_error, retry after 30 seconds' >&2; exit 1"#,
    );
    let engine = ClaudeEngine::with_binary(binary);

    let outcome = engine.run(RunOptions::new("p", dir.path())).await.unwrap();
    assert!(outcome.is_rate_limit_error);
    assert_eq!(outcome.retry_after_seconds, Some(30));
    assert_eq!(outcome.exit_code, Some(1));
}

#[tokio::test]
async fn plain_failure_is_not_a_rate_limit() {
    let dir = tempfile::tempdir().unwrap();
    let binary = stub_cli(dir.path(), r#"echo 'something broke' >&2; exit 1"#);
    let engine = ClaudeEngine::with_binary(binary);

    let outcome = engine.run(RunOptions::new("p", dir.path())).await.unwrap();
    assert!(!outcome.is_rate_limit_error);
    assert_eq!(outcome.exit_code, Some(1));
}
