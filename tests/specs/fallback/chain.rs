// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fallback chain walking across rate-limited engines.

use crate::prelude::*;
use codemachine_adapters::fake::FakeBehavior;
use codemachine_adapters::RunOptions;
use codemachine_engine::DEFAULT_MAX_ATTEMPTS;

#[tokio::test]
async fn primary_rate_limited_falls_back_to_second_engine() {
    let h = harness(&["a", "b"]);
    h.engines["a"].push_behavior(FakeBehavior::RateLimited {
        resets_at_ms: None,
        retry_after_seconds: Some(30),
    });
    h.engines["b"].push_behavior(FakeBehavior::succeed("ok\n"));

    let result = h
        .executor
        .run_with_fallback(
            "a",
            &["b".to_string()],
            RunOptions::new("p", "/tmp"),
            DEFAULT_MAX_ATTEMPTS,
        )
        .await
        .unwrap();

    assert_eq!(result.engine_used.as_deref(), Some("b"));
    assert!(result.fell_back);
    assert_eq!(result.rate_limited_engines, vec!["a"]);
    assert_eq!(result.outcome.stdout, "ok\n");

    // Engine a is parked with the retry-after hint applied.
    assert!(!h.rate_limits.is_engine_available("a"));
    let remaining = h.rate_limits.time_until_available_secs("a");
    assert!(remaining > 28 && remaining <= 31, "remaining = {remaining}");
    assert!(h.rate_limits.is_engine_available("b"));
}

#[tokio::test]
async fn exhausted_chain_reports_the_soonest_reset() {
    let h = harness(&["a", "b", "c"]);
    let base = h.clock.now_ms();
    h.engines["a"].push_behavior(FakeBehavior::RateLimited {
        resets_at_ms: Some(base + 600_000),
        retry_after_seconds: None,
    });
    h.engines["b"].push_behavior(FakeBehavior::RateLimited {
        resets_at_ms: Some(base + 45_000),
        retry_after_seconds: None,
    });
    h.engines["c"].push_behavior(FakeBehavior::RateLimited {
        resets_at_ms: Some(base + 120_000),
        retry_after_seconds: None,
    });

    let result = h
        .executor
        .run_with_fallback(
            "a",
            &["b".to_string(), "c".to_string()],
            RunOptions::new("p", "/tmp"),
            DEFAULT_MAX_ATTEMPTS,
        )
        .await
        .unwrap();

    assert!(result.all_engines_exhausted);
    assert!(result.is_rate_limit_error());
    assert_eq!(result.engine_used, None);
    assert_eq!(result.rate_limited_engines, vec!["a", "b", "c"]);
    assert_eq!(result.soonest_reset_engine.as_deref(), Some("b"));
    assert_eq!(result.soonest_reset_at_ms, Some(base + 45_000));
}

#[tokio::test]
async fn rate_limited_engines_recover_when_their_window_passes() {
    let h = harness(&["a", "b"]);
    h.engines["a"].push_behavior(FakeBehavior::RateLimited {
        resets_at_ms: None,
        retry_after_seconds: Some(60),
    });
    h.engines["b"].push_behavior(FakeBehavior::succeed("ok\n"));

    let _ = h
        .executor
        .run_with_fallback(
            "a",
            &["b".to_string()],
            RunOptions::new("p", "/tmp"),
            DEFAULT_MAX_ATTEMPTS,
        )
        .await
        .unwrap();
    assert!(!h.rate_limits.is_engine_available("a"));

    // After the cooldown, a is usable again and gets the next run.
    h.clock.advance_ms(61_000);
    assert!(h.rate_limits.is_engine_available("a"));
    h.engines["a"].push_behavior(FakeBehavior::succeed("back\n"));
    let result = h
        .executor
        .run_with_fallback(
            "a",
            &["b".to_string()],
            RunOptions::new("p", "/tmp"),
            DEFAULT_MAX_ATTEMPTS,
        )
        .await
        .unwrap();
    assert_eq!(result.engine_used.as_deref(), Some("a"));
    assert!(!result.fell_back);
}
