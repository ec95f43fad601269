// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use proptest::prelude::*;
use yare::parameterized;

const ALL: [AgentStatus; 5] = [
    AgentStatus::Running,
    AgentStatus::Paused,
    AgentStatus::Completed,
    AgentStatus::Failed,
    AgentStatus::Skipped,
];

#[parameterized(
    running_to_paused = { AgentStatus::Running, AgentStatus::Paused, true },
    running_to_completed = { AgentStatus::Running, AgentStatus::Completed, true },
    running_to_failed = { AgentStatus::Running, AgentStatus::Failed, true },
    running_to_skipped = { AgentStatus::Running, AgentStatus::Skipped, true },
    paused_to_running = { AgentStatus::Paused, AgentStatus::Running, true },
    paused_to_completed = { AgentStatus::Paused, AgentStatus::Completed, true },
    paused_to_failed = { AgentStatus::Paused, AgentStatus::Failed, true },
    paused_to_skipped = { AgentStatus::Paused, AgentStatus::Skipped, true },
    completed_to_running = { AgentStatus::Completed, AgentStatus::Running, false },
    failed_to_running = { AgentStatus::Failed, AgentStatus::Running, false },
    skipped_to_paused = { AgentStatus::Skipped, AgentStatus::Paused, false },
    running_to_running = { AgentStatus::Running, AgentStatus::Running, false },
)]
fn transition_table(from: AgentStatus, to: AgentStatus, legal: bool) {
    assert_eq!(from.can_transition_to(to), legal);
}

#[test]
fn terminal_states_are_absorbing() {
    for from in ALL {
        if !from.is_terminal() {
            continue;
        }
        for to in ALL {
            assert!(!from.can_transition_to(to), "{from} -> {to} should be illegal");
        }
    }
}

#[test]
fn parse_round_trips_as_str() {
    for status in ALL {
        assert_eq!(AgentStatus::parse(status.as_str()), Some(status));
    }
    assert_eq!(AgentStatus::parse("bogus"), None);
}

#[test]
fn serde_uses_lowercase_names() {
    let json = serde_json::to_string(&AgentStatus::Completed).unwrap();
    assert_eq!(json, "\"completed\"");
    let back: AgentStatus = serde_json::from_str("\"paused\"").unwrap();
    assert_eq!(back, AgentStatus::Paused);
}

fn status_strategy() -> impl Strategy<Value = AgentStatus> {
    prop::sample::select(ALL.to_vec())
}

proptest! {
    /// Any sequence of legal transitions ends in a reachable state, and once
    /// a terminal state is entered no further transition is accepted.
    #[test]
    fn legal_walks_never_leave_terminal_states(steps in prop::collection::vec(status_strategy(), 0..16)) {
        let mut current = AgentStatus::Running;
        let mut terminal_since: Option<usize> = None;
        for (i, next) in steps.into_iter().enumerate() {
            let allowed = current.can_transition_to(next);
            if let Some(t) = terminal_since {
                prop_assert!(!allowed, "transition allowed at {} after terminal at {}", i, t);
            }
            if allowed {
                current = next;
            }
            if current.is_terminal() && terminal_since.is_none() {
                terminal_since = Some(i);
            }
        }
    }
}
