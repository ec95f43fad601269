// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lazy catalog of provider engines.
//!
//! Each entry is a descriptor plus a one-shot factory; the adapter instance
//! is constructed on first use and cached, with concurrent callers sharing a
//! single in-flight load. Metadata queries never trigger loads.

use crate::engine::{
    ClaudeEngine, CodexEngine, EngineAdapter, GeminiEngine, MockEngine,
};
use codemachine_core::{EngineError, EngineMetadata};
use futures::future::BoxFuture;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// One-shot adapter factory.
pub type EngineLoader =
    Box<dyn Fn() -> BoxFuture<'static, Result<Arc<dyn EngineAdapter>, EngineError>> + Send + Sync>;

struct LazyEngine {
    metadata: EngineMetadata,
    loader: EngineLoader,
    cell: OnceCell<Arc<dyn EngineAdapter>>,
}

/// Catalog of engines keyed by stable id.
pub struct EngineRegistry {
    entries: RwLock<IndexMap<String, Arc<LazyEngine>>>,
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineRegistry {
    /// An empty registry, for tests that register their own engines.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(IndexMap::new()),
        }
    }

    /// The production registry: claude, codex, gemini, plus the mock engine
    /// when `CODEMACHINE_ENABLE_MOCK_ENGINE` is set.
    pub fn builtin() -> Self {
        let registry = Self::new();
        registry.register(
            ClaudeEngine::new().metadata().clone(),
            Box::new(|| Box::pin(async { Ok(Arc::new(ClaudeEngine::new()) as Arc<dyn EngineAdapter>) })),
        );
        registry.register(
            CodexEngine::new().metadata().clone(),
            Box::new(|| Box::pin(async { Ok(Arc::new(CodexEngine::new()) as Arc<dyn EngineAdapter>) })),
        );
        registry.register(
            GeminiEngine::new().metadata().clone(),
            Box::new(|| Box::pin(async { Ok(Arc::new(GeminiEngine::new()) as Arc<dyn EngineAdapter>) })),
        );
        if crate::env::mock_engine_enabled() {
            registry.register(
                MockEngine::new().metadata().clone(),
                Box::new(|| Box::pin(async { Ok(Arc::new(MockEngine::new()) as Arc<dyn EngineAdapter>) })),
            );
        }
        registry
    }

    /// Register an engine descriptor and its loader. Duplicate ids warn and
    /// are skipped, keeping the first registration.
    pub fn register(&self, metadata: EngineMetadata, loader: EngineLoader) {
        let mut entries = self.entries.write();
        if entries.contains_key(&metadata.id) {
            tracing::warn!(engine_id = %metadata.id, "engine already registered, skipping");
            return;
        }
        entries.insert(
            metadata.id.clone(),
            Arc::new(LazyEngine {
                metadata,
                loader,
                cell: OnceCell::new(),
            }),
        );
    }

    /// Register an already-constructed adapter (testing convenience).
    pub fn register_instance(&self, adapter: Arc<dyn EngineAdapter>) {
        let metadata = adapter.metadata().clone();
        self.register(
            metadata,
            Box::new(move || {
                let adapter = Arc::clone(&adapter);
                Box::pin(async move { Ok(adapter) })
            }),
        );
    }

    /// Load (at most once) and return the adapter for `id`.
    pub async fn get(&self, id: &str) -> Result<Arc<dyn EngineAdapter>, EngineError> {
        let entry = self
            .entries
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;

        let adapter = entry
            .cell
            .get_or_try_init(|| async {
                let adapter = (entry.loader)().await?;
                validate_module(&entry.metadata, adapter.as_ref())?;
                Ok::<_, EngineError>(adapter)
            })
            .await?;
        Ok(Arc::clone(adapter))
    }

    /// Load all engines, sorted by preference order.
    pub async fn get_all(&self) -> Result<Vec<Arc<dyn EngineAdapter>>, EngineError> {
        let mut engines = Vec::new();
        for id in self.ids() {
            engines.push(self.get(&id).await?);
        }
        Ok(engines)
    }

    /// First engine by preference order.
    pub async fn default_engine(&self) -> Result<Arc<dyn EngineAdapter>, EngineError> {
        let id = self
            .default_engine_id()
            .ok_or_else(|| EngineError::NotFound("<empty registry>".to_string()))?;
        self.get(&id).await
    }

    /// Engine ids sorted by preference order. Never triggers loads.
    pub fn ids(&self) -> Vec<String> {
        let mut metas = self.all_metadata();
        metas.sort_by_key(|m| m.order);
        metas.into_iter().map(|m| m.id).collect()
    }

    /// All descriptors, sorted by preference order. Never triggers loads.
    pub fn all_metadata(&self) -> Vec<EngineMetadata> {
        let mut metas: Vec<EngineMetadata> = self
            .entries
            .read()
            .values()
            .map(|e| e.metadata.clone())
            .collect();
        metas.sort_by_key(|m| m.order);
        metas
    }

    /// Never triggers loads.
    pub fn has(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    pub fn default_engine_id(&self) -> Option<String> {
        self.all_metadata().first().map(|m| m.id.clone())
    }
}

/// A loaded module must satisfy the descriptor it was registered under.
fn validate_module(
    expected: &EngineMetadata,
    adapter: &dyn EngineAdapter,
) -> Result<(), EngineError> {
    let actual = adapter.metadata();
    if actual.id != expected.id {
        return Err(EngineError::InvalidModule(format!(
            "loader for '{}' produced adapter '{}'",
            expected.id, actual.id
        )));
    }
    if actual.default_model.is_empty() {
        return Err(EngineError::InvalidModule(format!(
            "engine '{}' has no default model",
            actual.id
        )));
    }
    Ok(())
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
