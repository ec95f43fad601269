// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace directory layout.
//!
//! All durable state lives under a single `.codemachine` directory inside the
//! project being worked on. Components receive a [`WorkspacePaths`] handle
//! rather than computing paths themselves, and every write path is checked
//! against the workspace root before use.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Conventional name of the workspace state directory.
pub const WORKSPACE_DIR_NAME: &str = ".codemachine";

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("path escapes the workspace: {0}")]
    PathEscape(PathBuf),
}

/// Path layout of one workspace root.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    root: PathBuf,
}

impl WorkspacePaths {
    /// A workspace rooted at an explicit state directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The conventional workspace for a project directory:
    /// `<project>/.codemachine`.
    pub fn for_project(project_dir: impl AsRef<Path>) -> Self {
        Self::new(project_dir.as_ref().join(WORKSPACE_DIR_NAME))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.root.join("memory")
    }

    pub fn summaries_dir(&self) -> PathBuf {
        self.root.join("summaries")
    }

    pub fn rate_limits_file(&self) -> PathBuf {
        self.root.join("rate-limits.json")
    }

    pub fn engine_config_file(&self) -> PathBuf {
        self.root.join("engine-config.json")
    }

    pub fn registry_db(&self) -> PathBuf {
        self.root.join("registry.db")
    }

    /// Log file path for one agent execution.
    pub fn agent_log_path(&self, id: i64, name: &str, timestamp: &str) -> PathBuf {
        self.logs_dir()
            .join(format!("agent-{id}-{name}-{timestamp}.log"))
    }

    /// Memory tail file for one agent.
    pub fn memory_file(&self, agent_name: &str) -> PathBuf {
        self.memory_dir().join(format!("{agent_name}.log"))
    }

    /// Refuse paths that resolve outside the workspace root.
    ///
    /// Purely lexical: rejects absolute paths not under the root and any
    /// `..` component, without touching the filesystem.
    pub fn ensure_within(&self, path: &Path) -> Result<(), WorkspaceError> {
        let escape = || WorkspaceError::PathEscape(path.to_path_buf());
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(escape());
        }
        if path.is_absolute() && !path.starts_with(&self.root) {
            return Err(escape());
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "workspace_tests.rs"]
mod tests;
