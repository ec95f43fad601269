// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Incremental parsing of provider JSONL output streams.
//!
//! Providers that emit structured output interleave usage frames and session
//! announcements with content. Accumulators here keep cumulative totals so
//! telemetry observers always see monotonically growing counters.

use codemachine_core::Telemetry;

/// Signal extracted from one output line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineEvent {
    None,
    /// Cumulative usage after folding in this line.
    Telemetry(Telemetry),
    SessionId(String),
}

fn get_u64(value: &serde_json::Value, key: &str) -> u64 {
    value.get(key).and_then(|v| v.as_u64()).unwrap_or(0)
}

fn add_opt(slot: &mut Option<u64>, delta: u64) {
    if delta > 0 || slot.is_some() {
        *slot = Some(slot.unwrap_or(0) + delta);
    }
}

/// Accumulator for Claude Code's `--output-format stream-json` lines.
#[derive(Debug, Default)]
pub struct ClaudeStream {
    total: Telemetry,
    session_seen: bool,
}

impl ClaudeStream {
    pub fn observe(&mut self, line: &str) -> LineEvent {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return LineEvent::None;
        }
        let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) else {
            return LineEvent::None;
        };

        match json.get("type").and_then(|v| v.as_str()) {
            Some("system") => {
                if self.session_seen {
                    return LineEvent::None;
                }
                match json.get("session_id").and_then(|v| v.as_str()) {
                    Some(id) => {
                        self.session_seen = true;
                        LineEvent::SessionId(id.to_string())
                    }
                    None => LineEvent::None,
                }
            }
            Some("assistant") => {
                let Some(usage) = json.get("message").and_then(|m| m.get("usage")) else {
                    return LineEvent::None;
                };
                self.fold_usage(usage);
                LineEvent::Telemetry(self.total.clone())
            }
            Some("result") => {
                if let Some(usage) = json.get("usage") {
                    self.fold_usage(usage);
                }
                if let Some(cost) = json.get("total_cost_usd").and_then(|v| v.as_f64()) {
                    self.total.cost = Some(cost);
                }
                LineEvent::Telemetry(self.total.clone())
            }
            _ => LineEvent::None,
        }
    }

    fn fold_usage(&mut self, usage: &serde_json::Value) {
        self.total.tokens_in += get_u64(usage, "input_tokens");
        self.total.tokens_out += get_u64(usage, "output_tokens");
        add_opt(
            &mut self.total.cache_creation_tokens,
            get_u64(usage, "cache_creation_input_tokens"),
        );
        add_opt(
            &mut self.total.cache_read_tokens,
            get_u64(usage, "cache_read_input_tokens"),
        );
    }
}

/// Accumulator for Codex's `exec --json` event lines.
#[derive(Debug, Default)]
pub struct CodexStream {
    total: Telemetry,
    session_seen: bool,
}

impl CodexStream {
    pub fn observe(&mut self, line: &str) -> LineEvent {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return LineEvent::None;
        }
        let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) else {
            return LineEvent::None;
        };

        if !self.session_seen {
            let session = json
                .get("session_id")
                .or_else(|| json.get("thread_id"))
                .and_then(|v| v.as_str());
            if let Some(id) = session {
                self.session_seen = true;
                return LineEvent::SessionId(id.to_string());
            }
        }

        if json.get("type").and_then(|v| v.as_str()) == Some("turn.completed") {
            if let Some(usage) = json.get("usage") {
                self.total.tokens_in += get_u64(usage, "input_tokens");
                self.total.tokens_out += get_u64(usage, "output_tokens");
                add_opt(
                    &mut self.total.cached_tokens,
                    get_u64(usage, "cached_input_tokens"),
                );
                return LineEvent::Telemetry(self.total.clone());
            }
        }
        LineEvent::None
    }
}

/// Derive rate-limit hints from a finished child's output.
///
/// Returns `Some((resets_at_ms, retry_after_seconds))` when the combined
/// output reads as a rate limit; wall-clock resets are never present in
/// free-text output, so the first element is always `None` here.
pub fn detect_rate_limit(
    stdout: &str,
    stderr: &str,
    exit_code: Option<i32>,
) -> Option<(Option<u64>, Option<u64>)> {
    if exit_code == Some(0) {
        return None;
    }
    let combined = format!("{stdout}\n{stderr}");
    if codemachine_core::is_rate_limit_message(&combined) {
        let retry_after = codemachine_core::extract_retry_after_seconds(&combined);
        Some((None, retry_after))
    } else {
        None
    }
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;
