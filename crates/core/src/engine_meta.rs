// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Static engine metadata and agent complexity tiers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Agent complexity tier, used to pick a model within a preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Tier 1: architecture and review work, needs the strongest model.
    Complex,
    /// Tier 2: everyday coding work.
    Standard,
    /// Tier 3: mechanical work, fast/cheap model is enough.
    Fast,
}

impl Tier {
    pub fn as_u8(self) -> u8 {
        match self {
            Tier::Complex => 1,
            Tier::Standard => 2,
            Tier::Fast => 3,
        }
    }

    pub fn from_u8(n: u8) -> Option<Tier> {
        match n {
            1 => Some(Tier::Complex),
            2 => Some(Tier::Standard),
            3 => Some(Tier::Fast),
            _ => None,
        }
    }
}

/// Static agent-id → tier classification. Unlisted agents are `Standard`.
pub fn tier_for_agent(agent_id: &str) -> Tier {
    match agent_id {
        "architect" | "planner" | "reviewer" | "debugger" => Tier::Complex,
        "formatter" | "committer" | "summarizer" | "linter" => Tier::Fast,
        _ => Tier::Standard,
    }
}

/// Static metadata describing a provider engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineMetadata {
    /// Stable slug ("claude", "codex", ...).
    pub id: String,
    pub display_name: String,
    pub default_model: String,
    /// Preference rank; lower sorts first.
    pub order: u32,
    pub supports_resume: bool,
    /// Optional tier → model mapping for preset resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_by_tier: Option<BTreeMap<Tier, String>>,
}

impl EngineMetadata {
    /// Model for a tier, if this engine maps it.
    pub fn model_for_tier(&self, tier: Tier) -> Option<&str> {
        self.model_by_tier
            .as_ref()
            .and_then(|m| m.get(&tier))
            .map(String::as_str)
    }
}

#[cfg(test)]
#[path = "engine_meta_tests.rs"]
mod tests;
