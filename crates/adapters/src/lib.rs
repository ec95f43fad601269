// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! codemachine-adapters: provider engine adapters and their runtime plumbing.
//!
//! An engine is an AI-provider CLI wrapped behind the [`EngineAdapter`]
//! trait. The registry lazily constructs adapters; the auth cache keeps slow
//! provider auth probes from running more than once per TTL; the subprocess
//! module owns streaming, cancellation, and child cleanup.

pub mod auth_cache;
pub mod engine;
pub mod env;
pub mod registry;
pub mod subprocess;

pub use auth_cache::AuthCache;
pub use engine::{EngineAdapter, RunCallbacks, RunOptions, RunOutcome};
pub use registry::EngineRegistry;
pub use subprocess::ProcessRegistry;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
pub mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeBehavior, FakeEngine};
