// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access and child-env sanitization.

use std::time::Duration;

/// Variables that control dynamic loading, shell startup, or interpreter
/// path hijacking. Never propagated to child processes.
const DENIED_KEYS: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "LD_AUDIT",
    "DYLD_INSERT_LIBRARIES",
    "DYLD_LIBRARY_PATH",
    "DYLD_FRAMEWORK_PATH",
    "BASH_ENV",
    "ENV",
    "ZDOTDIR",
    "SHELLOPTS",
    "IFS",
    "PS4",
    "PYTHONSTARTUP",
    "NODE_OPTIONS",
    "PERL5LIB",
    "PERL5OPT",
    "RUBYOPT",
];

/// Keys whose values legitimately contain shell metacharacters.
const METACHAR_SAFE_KEYS: &[&str] = &[
    "PATH", "HOME", "TERM", "SHELL", "LANG", "LC_ALL", "PWD", "USER", "TMPDIR",
];

fn has_shell_metachars(value: &str) -> bool {
    value
        .chars()
        .any(|c| matches!(c, ';' | '|' | '&' | '$' | '`' | '<' | '>' | '\n'))
}

/// Filter environment variables before passing them to a child process.
///
/// Deny-listed keys are stripped; values containing shell metacharacters are
/// rejected unless the key is known safe.
pub fn sanitize_child_env(vars: Vec<(String, String)>) -> Vec<(String, String)> {
    vars.into_iter()
        .filter(|(key, value)| {
            if DENIED_KEYS.contains(&key.as_str()) {
                tracing::warn!(key, "stripping protected env var from child");
                return false;
            }
            if has_shell_metachars(value) && !METACHAR_SAFE_KEYS.contains(&key.as_str()) {
                tracing::warn!(key, "rejecting env var with shell metacharacters");
                return false;
            }
            true
        })
        .collect()
}

/// Whether a key may be propagated at all.
pub fn is_env_key_allowed(key: &str) -> bool {
    !DENIED_KEYS.contains(&key)
}

/// The protected deny-list, for callers that scrub inherited environments.
pub fn denied_env_keys() -> &'static [&'static str] {
    DENIED_KEYS
}

fn env_flag(var: &str) -> bool {
    std::env::var(var)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Auth-cache TTL (default: 300s). Override with
/// `CODEMACHINE_AUTH_CACHE_TTL_SECS`.
pub fn auth_cache_ttl() -> Duration {
    std::env::var("CODEMACHINE_AUTH_CACHE_TTL_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(300))
}

/// Whether the test-only mock engine is registered.
pub fn mock_engine_enabled() -> bool {
    env_flag("CODEMACHINE_ENABLE_MOCK_ENGINE")
}

/// Dry-run switch: treat every engine as authenticated without probing.
pub fn skip_auth() -> bool {
    env_flag("CODEMACHINE_SKIP_AUTH")
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
