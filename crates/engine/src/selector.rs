// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine selection for a workflow step.
//!
//! Composes the registry, the auth cache, and preset resolution. Decisions
//! are emitted on the event bus so the UI can show why an engine was picked.

use crate::events::{EventBus, WorkflowEvent};
use crate::preset::{resolve_preset, EngineConfigFile, SelectionContext};
use codemachine_core::EngineError;
use codemachine_adapters::{AuthCache, EngineAdapter, EngineRegistry};
use std::sync::Arc;

/// The selector's decision for one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedEngine {
    pub engine_id: String,
    /// Model suggested by the active preset's tier map, if any.
    pub preset_model: Option<String>,
}

/// Picks an engine per step.
pub struct EngineSelector {
    registry: Arc<EngineRegistry>,
    auth: Arc<AuthCache>,
    events: Arc<EventBus>,
}

impl EngineSelector {
    pub fn new(registry: Arc<EngineRegistry>, auth: Arc<AuthCache>, events: Arc<EventBus>) -> Self {
        Self {
            registry,
            auth,
            events,
        }
    }

    /// Probe an engine's auth through the cache. Unknown engines probe false.
    async fn probe(&self, engine_id: &str) -> bool {
        let adapter = match self.registry.get(engine_id).await {
            Ok(adapter) => adapter,
            Err(e) => {
                tracing::warn!(engine_id, error = %e, "cannot probe unknown engine");
                return false;
            }
        };
        self.auth
            .is_authenticated(engine_id, || async move { adapter.is_authenticated().await })
            .await
    }

    /// Scan all registered engines, probing concurrently, and return the
    /// first authenticated one in registry order.
    async fn scan_authenticated(&self) -> Option<String> {
        let ids = self.registry.ids();
        let probes = ids.iter().map(|id| self.probe(id));
        let results = futures::future::join_all(probes).await;
        ids.into_iter()
            .zip(results)
            .find(|(_, authed)| *authed)
            .map(|(id, _)| id)
    }

    fn emit_selected(&self, agent_id: &str, engine_id: &str, source: &'static str) {
        tracing::info!(agent_id, engine_id, source, "engine selected");
        self.events.emit(WorkflowEvent::EngineSelected {
            agent_id: agent_id.to_string(),
            engine_id: engine_id.to_string(),
            source,
        });
    }

    /// Select the engine for `(agent, step)`.
    ///
    /// Preset/override engines are tried first; an unauthenticated preset
    /// engine falls through to the step engine or the authenticated scan. An
    /// explicit step engine that cannot authenticate is fatal when fallback
    /// is disabled.
    pub async fn select_engine(
        &self,
        agent_id: &str,
        step_engine: Option<&str>,
        context: Option<&SelectionContext>,
        config: Option<&EngineConfigFile>,
    ) -> Result<SelectedEngine, EngineError> {
        let resolution = resolve_preset(agent_id, context, config);

        if let Some(preset_engine) = &resolution.engine_id {
            if self.probe(preset_engine).await {
                self.emit_selected(agent_id, preset_engine, "preset");
                return Ok(SelectedEngine {
                    engine_id: preset_engine.clone(),
                    preset_model: resolution.model,
                });
            }
            tracing::warn!(
                agent_id,
                engine_id = %preset_engine,
                "preset engine not authenticated, falling through"
            );
            self.events.emit(WorkflowEvent::PresetEngineNotAuthenticated {
                engine_id: preset_engine.clone(),
            });
        }

        let fallback_allowed = context
            .and_then(|c| c.fallback_enabled)
            .or_else(|| config.and_then(|c| c.fallback_enabled))
            .unwrap_or(true);

        if let Some(step_engine) = step_engine {
            if self.probe(step_engine).await {
                self.emit_selected(agent_id, step_engine, "step");
                return Ok(SelectedEngine {
                    engine_id: step_engine.to_string(),
                    preset_model: resolution.model,
                });
            }
            if !fallback_allowed {
                return Err(EngineError::AuthRequired(step_engine.to_string()));
            }
            match self.scan_authenticated().await {
                Some(engine_id) => {
                    self.emit_selected(agent_id, &engine_id, "scan");
                    return Ok(SelectedEngine {
                        engine_id,
                        preset_model: resolution.model,
                    });
                }
                None => return Err(EngineError::AuthRequired(step_engine.to_string())),
            }
        }

        if let Some(engine_id) = self.scan_authenticated().await {
            self.emit_selected(agent_id, &engine_id, "scan");
            return Ok(SelectedEngine {
                engine_id,
                preset_model: resolution.model,
            });
        }

        let default = self
            .registry
            .default_engine_id()
            .ok_or_else(|| EngineError::NotFound("<empty registry>".to_string()))?;
        tracing::warn!(
            agent_id,
            engine_id = %default,
            "no authenticated engine found, using registry default"
        );
        self.emit_selected(agent_id, &default, "default");
        Ok(SelectedEngine {
            engine_id: default,
            preset_model: resolution.model,
        })
    }
}

#[cfg(test)]
#[path = "selector_tests.rs"]
mod tests;
