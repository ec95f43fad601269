// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serial_test::serial;

#[test]
fn prompt_and_model_flags() {
    let engine = GeminiEngine::new();
    let mut options = RunOptions::new("summarize", "/tmp");
    options.model = Some("gemini-2.5-flash".to_string());
    let args = engine.build_args(&options);
    assert_eq!(args, vec!["-p", "summarize", "-m", "gemini-2.5-flash"]);
}

#[test]
fn resume_is_not_supported() {
    assert!(!GeminiEngine::new().metadata().supports_resume);
}

#[tokio::test]
#[serial]
async fn auth_probe_checks_api_key_env() {
    std::env::remove_var("GEMINI_API_KEY");
    std::env::remove_var("GOOGLE_API_KEY");
    let engine = GeminiEngine::new();
    assert!(!engine.is_authenticated().await);

    std::env::set_var("GEMINI_API_KEY", "k");
    assert!(engine.is_authenticated().await);
    std::env::remove_var("GEMINI_API_KEY");
}
