// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! codemachine-core: shared types for the codemachine agent pipeline

pub mod classify;
pub mod clock;
pub mod engine_meta;
pub mod error;
pub mod record;
pub mod span;
pub mod status;
pub mod time_fmt;
pub mod tool_parser;
pub mod workspace;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use classify::{classify_error, extract_retry_after_seconds, is_rate_limit_message, ErrorKind};
pub use clock::{Clock, FakeClock, SystemClock};
pub use engine_meta::{tier_for_agent, EngineMetadata, Tier};
pub use error::EngineError;
pub use record::{
    truncate_prompt, AgentRecord, MonitoringId, NewAgent, Telemetry, PROMPT_PREVIEW_MAX,
};
pub use span::{build_span_tree, new_correlation_id, AgentSpan, SpanNode, SpanStatus};
pub use status::AgentStatus;
pub use time_fmt::{filename_timestamp, format_epoch_ms};
pub use tool_parser::{
    extract_context_from_tool, extract_goal, parse_tool_use, parse_tool_use_with_end, ToolContext,
    ToolUseEvent,
};
pub use workspace::WorkspacePaths;
