// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Crash-safe rate-limit persistence.

use codemachine_core::{Clock, FakeClock};
use codemachine_storage::RateLimitManager;
use std::sync::Arc;

#[test]
fn rate_limits_survive_a_process_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".codemachine").join("rate-limits.json");
    let clock = FakeClock::new(0);

    {
        let manager = RateLimitManager::new(&path, Arc::new(clock.clone()));
        manager.initialize();
        manager.mark_rate_limited("a", Some(clock.now_ms() + 600_000), None);
        // Process "crashes" here: nothing flushed beyond the durable file.
    }

    let fresh = RateLimitManager::new(&path, Arc::new(clock.clone()));
    fresh.initialize();
    assert!(!fresh.is_engine_available("a"));
    let remaining = fresh.time_until_available_secs("a");
    assert!(remaining > 590 && remaining <= 600, "remaining = {remaining}");
}

#[test]
fn entries_that_expired_while_down_are_dropped_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rate-limits.json");
    let clock = FakeClock::new(0);

    {
        let manager = RateLimitManager::new(&path, Arc::new(clock.clone()));
        manager.mark_rate_limited("short", Some(10_000), None);
        manager.mark_rate_limited("long", Some(900_000), None);
    }

    // Downtime outlives the short entry only.
    clock.set_ms(60_000);
    let fresh = RateLimitManager::new(&path, Arc::new(clock.clone()));
    fresh.initialize();
    assert!(fresh.is_engine_available("short"));
    assert!(!fresh.is_engine_available("long"));
    assert_eq!(fresh.active_entries().len(), 1);
}

#[test]
fn the_durable_file_matches_the_documented_shape() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rate-limits.json");
    let clock = FakeClock::new(5_000);

    let manager = RateLimitManager::new(&path, Arc::new(clock.clone()));
    manager.mark_rate_limited("a", None, Some(120));

    let raw = std::fs::read_to_string(&path).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert!(json["lastUpdated"].is_u64());
    assert_eq!(json["entries"][0]["engineId"], "a");
    assert_eq!(json["entries"][0]["rateLimitedAt"], 5_000);
    assert_eq!(json["entries"][0]["resetsAt"], 125_000);
    assert_eq!(json["entries"][0]["retryAfterSeconds"], 120);
}
