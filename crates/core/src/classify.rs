// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! String classification of provider errors.
//!
//! Legacy adapters surface failures as free text; this module maps that text
//! onto the error taxonomy. Adapters that produce structured errors bypass
//! it entirely.

use regex::Regex;
use std::sync::OnceLock;

/// Coarse error kind derived from provider output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RateLimited,
    ContextLength,
    ContentFilter,
    Other,
}

/// Substrings (lowercased) that mark a rate-limit condition.
const RATE_LIMIT_MARKERS: &[&str] = &[
    "rate_limit",
    "rate limit",
    "429",
    "too many requests",
    "quota",
    "resource_exhausted",
    "retry_after",
    "overloaded",
    "503",
];

const CONTEXT_LENGTH_MARKERS: &[&str] = &[
    "context_length",
    "context length",
    "prompt is too long",
    "maximum context",
    "input is too long",
];

const CONTENT_FILTER_MARKERS: &[&str] = &[
    "content_filter",
    "content filter",
    "content policy",
    "blocked by safety",
];

fn contains_any(lower: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| lower.contains(m))
}

/// Whether the message looks like a provider rate limit.
pub fn is_rate_limit_message(message: &str) -> bool {
    contains_any(&message.to_lowercase(), RATE_LIMIT_MARKERS)
}

/// Classify free-text provider output into an error kind.
///
/// Context-length and content-filter markers win over rate-limit markers so
/// that "429" noise inside an unrelated payload does not hide a surfaced
/// user-facing condition.
pub fn classify_error(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    if contains_any(&lower, CONTEXT_LENGTH_MARKERS) {
        ErrorKind::ContextLength
    } else if contains_any(&lower, CONTENT_FILTER_MARKERS) {
        ErrorKind::ContentFilter
    } else if contains_any(&lower, RATE_LIMIT_MARKERS) {
        ErrorKind::RateLimited
    } else {
        ErrorKind::Other
    }
}

// Pattern is a compile-time constant; construction cannot fail.
#[allow(clippy::unwrap_used)]
fn retry_after_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)retry[\s_-]*after[:=\s]*(\d+)\s*(?:s\b|sec|second)?").unwrap()
    })
}

/// Extract a "retry after N seconds" hint from provider output.
pub fn extract_retry_after_seconds(message: &str) -> Option<u64> {
    retry_after_re()
        .captures(message)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
#[path = "classify_tests.rs"]
mod tests;
