// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Preset and override resolution: `(agent, context) → (engine, model)`.
//!
//! A preset is a named policy mapping agents (optionally tiered) to engines
//! and models. Built-ins exist per provider; `engine-config.json` can add
//! custom presets and per-agent overrides.

use crate::error::RuntimeError;
use codemachine_core::{tier_for_agent, Tier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A named engine/model selection policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preset {
    /// Engine every agent uses unless overridden.
    pub default_engine: Option<String>,
    /// Per-agent engine overrides within this preset.
    pub agent_overrides: BTreeMap<String, String>,
    /// Tier → model used once an engine is resolved.
    pub model_by_tier: BTreeMap<Tier, String>,
}

/// Shape of `engine-config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfigFile {
    /// Active preset name.
    pub preset: Option<String>,
    /// Custom presets; names shadow built-ins.
    pub presets: BTreeMap<String, Preset>,
    /// Per-agent engine overrides outside any preset.
    pub overrides: BTreeMap<String, String>,
    pub fallback_enabled: Option<bool>,
}

impl EngineConfigFile {
    /// Load the optional config file. A missing file is `None`; an
    /// unparsable one is a startup configuration error.
    pub fn load(path: &Path) -> Result<Option<Self>, RuntimeError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RuntimeError::ConfigInvalid(format!("{}: {e}", path.display()))),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| RuntimeError::ConfigInvalid(format!("{}: {e}", path.display())))
    }
}

/// Per-invocation selection inputs (CLI flags and workflow scope).
#[derive(Debug, Clone, Default)]
pub struct SelectionContext {
    /// CLI override: wins over everything.
    pub global_engine: Option<String>,
    pub preset: Option<String>,
    pub agent_overrides: BTreeMap<String, String>,
    pub fallback_enabled: Option<bool>,
}

/// Outcome of preset resolution. Both fields may be empty, in which case
/// the caller falls back to step-level or registry defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresetResolution {
    pub engine_id: Option<String>,
    pub model: Option<String>,
}

/// Built-in presets: one per provider, tiered to that provider's models.
pub fn builtin_presets() -> BTreeMap<String, Preset> {
    let tiered = |complex: &str, standard: &str, fast: &str| {
        BTreeMap::from([
            (Tier::Complex, complex.to_string()),
            (Tier::Standard, standard.to_string()),
            (Tier::Fast, fast.to_string()),
        ])
    };
    BTreeMap::from([
        (
            "claude".to_string(),
            Preset {
                default_engine: Some("claude".to_string()),
                agent_overrides: BTreeMap::new(),
                model_by_tier: tiered("opus", "sonnet", "haiku"),
            },
        ),
        (
            "codex".to_string(),
            Preset {
                default_engine: Some("codex".to_string()),
                agent_overrides: BTreeMap::new(),
                model_by_tier: tiered("gpt-5-pro", "gpt-5-codex", "gpt-5-mini"),
            },
        ),
        (
            "gemini".to_string(),
            Preset {
                default_engine: Some("gemini".to_string()),
                agent_overrides: BTreeMap::new(),
                model_by_tier: tiered("gemini-2.5-pro", "gemini-2.5-pro", "gemini-2.5-flash"),
            },
        ),
    ])
}

/// Look up a preset by name: custom presets first, then built-ins.
fn find_preset(name: &str, config: Option<&EngineConfigFile>) -> Option<Preset> {
    if let Some(preset) = config.and_then(|c| c.presets.get(name)) {
        return Some(preset.clone());
    }
    builtin_presets().get(name).cloned()
}

fn engine_from_preset(preset: &Preset, agent_id: &str) -> Option<String> {
    preset
        .default_engine
        .clone()
        .or_else(|| preset.agent_overrides.get(agent_id).cloned())
}

/// Resolve `(agent, context, config) → (engine?, model?)`.
///
/// Priority, highest first: context.global_engine, context.preset,
/// context.agent_overrides, config.preset, config.overrides. The model comes
/// from the active preset's tier map for this agent's tier, whatever source
/// produced the engine.
pub fn resolve_preset(
    agent_id: &str,
    context: Option<&SelectionContext>,
    config: Option<&EngineConfigFile>,
) -> PresetResolution {
    let active_preset_name = context
        .and_then(|c| c.preset.as_deref())
        .or_else(|| config.and_then(|c| c.preset.as_deref()));
    let active_preset = active_preset_name.and_then(|name| {
        let preset = find_preset(name, config);
        if preset.is_none() {
            tracing::warn!(preset = name, "unknown preset name, ignoring");
        }
        preset
    });

    let model = active_preset.as_ref().and_then(|preset| {
        let tier = tier_for_agent(agent_id);
        preset.model_by_tier.get(&tier).cloned()
    });

    let engine_id = context
        .and_then(|c| c.global_engine.clone())
        .or_else(|| {
            context
                .and_then(|c| c.preset.as_deref())
                .and_then(|name| find_preset(name, config))
                .and_then(|p| engine_from_preset(&p, agent_id))
        })
        .or_else(|| context.and_then(|c| c.agent_overrides.get(agent_id).cloned()))
        .or_else(|| {
            config
                .and_then(|c| c.preset.as_deref())
                .and_then(|name| find_preset(name, config))
                .and_then(|p| engine_from_preset(&p, agent_id))
        })
        .or_else(|| config.and_then(|c| c.overrides.get(agent_id).cloned()));

    PresetResolution { engine_id, model }
}

#[cfg(test)]
#[path = "preset_tests.rs"]
mod tests;
