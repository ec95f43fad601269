// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level agent execution.
//!
//! One call runs one workflow step: resolve the engine, register or resume
//! the monitoring record, stream the adapter through the log and the tool
//! parser, and finalize the record whatever happens. Errors rethrow after
//! the record is finalized; cancellation leaves it paused and resumable.

use crate::error::RuntimeError;
use crate::events::EventBus;
use crate::fallback::{FallbackExecutor, DEFAULT_MAX_ATTEMPTS};
use crate::log_stream::LogStream;
use crate::monitor::AgentMonitor;
use crate::preset::{EngineConfigFile, SelectionContext};
use crate::selector::EngineSelector;
use codemachine_adapters::{AuthCache, EngineAdapter, EngineRegistry, RunCallbacks, RunOptions};
use codemachine_core::{
    classify_error, extract_context_from_tool, extract_goal, new_correlation_id,
    parse_tool_use_with_end, Clock, EngineError, ErrorKind, MonitoringId, NewAgent, Telemetry,
    ToolContext, WorkspacePaths,
};
use codemachine_storage::{PersistentStore, RateLimitManager};
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Rolling output kept in the per-agent memory file.
const MEMORY_TAIL_CHARS: usize = 2_000;

/// Hints for resuming a previous execution.
#[derive(Debug, Clone, Default)]
pub struct ResumeHint {
    pub monitoring_id: Option<MonitoringId>,
    pub session_id: Option<String>,
}

/// A follow-up prompt chained after a completed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainedPrompt {
    #[serde(default)]
    pub agent_id: Option<String>,
    pub prompt: String,
    /// All listed conditions must be selected for the entry to apply.
    #[serde(default)]
    pub conditions: Vec<String>,
}

/// Inputs for one `execute_agent` call.
#[derive(Clone, Default)]
pub struct ExecuteOptions {
    pub working_dir: PathBuf,
    /// Step-level engine. CLI-level overrides ride in `selection`.
    pub engine: Option<String>,
    pub model_override: Option<String>,
    /// Model from the agent's own config, below preset models in priority.
    pub agent_model: Option<String>,
    pub selection: Option<SelectionContext>,
    pub config: Option<EngineConfigFile>,
    pub env: Vec<(String, String)>,
    pub parent_id: Option<MonitoringId>,
    /// Shown in the record instead of the raw prompt when set.
    pub display_prompt: Option<String>,
    pub resume: Option<ResumeHint>,
    pub selected_conditions: BTreeSet<String>,
    /// Explicit fallback chain; defaults to the registry order.
    pub fallback_chain: Option<Vec<String>>,
    pub timeout: Option<Duration>,
    pub cancel: CancellationToken,
    pub logger: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub on_telemetry: Option<Arc<dyn Fn(&Telemetry) + Send + Sync>>,
    pub on_context: Option<Arc<dyn Fn(&ToolContext) + Send + Sync>>,
    pub on_goal: Option<Arc<dyn Fn(&str) + Send + Sync>>,
}

impl ExecuteOptions {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            ..Self::default()
        }
    }
}

/// What a completed step hands back to the workflow.
#[derive(Debug, Clone)]
pub struct ExecuteResult {
    pub output: String,
    pub monitoring_id: MonitoringId,
    pub engine_used: String,
    pub session_id: Option<String>,
    pub chained_prompts: Option<Vec<ChainedPrompt>>,
}

/// Everything the runner composes over.
pub struct RunnerDeps {
    pub paths: WorkspacePaths,
    pub store: PersistentStore,
    pub registry: Arc<EngineRegistry>,
    pub auth: Arc<AuthCache>,
    pub rate_limits: Arc<RateLimitManager>,
    pub breakers: Arc<crate::circuit_breaker::CircuitBreakerSet>,
    pub clock: Arc<dyn Clock>,
    pub events: Arc<EventBus>,
}

/// Top-level entry point for running agents.
pub struct AgentRunner {
    paths: WorkspacePaths,
    registry: Arc<EngineRegistry>,
    selector: EngineSelector,
    fallback: FallbackExecutor,
    monitor: AgentMonitor,
    log_stream: Arc<LogStream>,
}

impl AgentRunner {
    pub fn new(deps: RunnerDeps) -> Self {
        let selector = EngineSelector::new(
            Arc::clone(&deps.registry),
            Arc::clone(&deps.auth),
            Arc::clone(&deps.events),
        );
        let fallback = FallbackExecutor::new(
            Arc::clone(&deps.registry),
            Arc::clone(&deps.auth),
            Arc::clone(&deps.rate_limits),
            Arc::clone(&deps.breakers),
            Arc::clone(&deps.events),
        );
        let monitor = AgentMonitor::new(
            deps.store.clone(),
            deps.paths.clone(),
            Arc::clone(&deps.clock),
            Arc::clone(&deps.events),
        );
        let log_stream = Arc::new(LogStream::new(
            deps.paths.logs_dir(),
            Arc::clone(&deps.clock),
        ));
        Self {
            paths: deps.paths,
            registry: deps.registry,
            selector,
            fallback,
            monitor,
            log_stream,
        }
    }

    pub fn monitor(&self) -> &AgentMonitor {
        &self.monitor
    }

    pub fn log_stream(&self) -> &Arc<LogStream> {
        &self.log_stream
    }

    /// Run one agent step to completion.
    ///
    /// The monitoring record is always finalized: completed on success,
    /// paused on cancellation, failed otherwise; errors rethrow after.
    pub async fn execute_agent(
        &self,
        agent_id: &str,
        prompt: &str,
        options: ExecuteOptions,
    ) -> Result<ExecuteResult, RuntimeError> {
        // Resolve the resume session: explicit id wins, else the prior
        // record's stored session.
        let resume_monitoring_id = options.resume.as_ref().and_then(|r| r.monitoring_id);
        let mut session_id = options.resume.as_ref().and_then(|r| r.session_id.clone());
        if session_id.is_none() {
            if let Some(prior) = resume_monitoring_id {
                session_id = self
                    .monitor
                    .get_agent(prior)?
                    .ok_or(RuntimeError::RecordNotFound(prior))?
                    .session_id;
            }
        }

        let selected = self
            .selector
            .select_engine(
                agent_id,
                options.engine.as_deref(),
                options.selection.as_ref(),
                options.config.as_ref(),
            )
            .await?;
        let engine_id = selected.engine_id.clone();

        let engine_default_model = match self.registry.get(&engine_id).await {
            Ok(adapter) => Some(adapter.metadata().default_model.clone()),
            Err(_) => None,
        };
        let model = options
            .model_override
            .clone()
            .or(selected.preset_model)
            .or_else(|| options.agent_model.clone())
            .or(engine_default_model);

        let monitoring_id = match resume_monitoring_id {
            Some(id) => {
                self.monitor.mark_running(id)?;
                id
            }
            None => self.monitor.register(
                NewAgent {
                    name: agent_id.to_string(),
                    prompt: options
                        .display_prompt
                        .clone()
                        .unwrap_or_else(|| prompt.to_string()),
                    parent_id: options.parent_id,
                    engine_id: engine_id.clone(),
                    model: model.clone(),
                    pid: None,
                },
                None,
            )?,
        };

        let run = self
            .run_step(agent_id, prompt, monitoring_id, &engine_id, model, session_id, &options)
            .await;
        self.log_stream.close(monitoring_id);

        match run {
            Ok(result) => Ok(result),
            Err(e) if e.is_cancellation() => {
                // Intentional stop: the record stays resumable.
                self.monitor.mark_paused(monitoring_id)?;
                Err(e)
            }
            Err(e) => {
                self.monitor.fail(monitoring_id, &e.to_string())?;
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_step(
        &self,
        agent_id: &str,
        prompt: &str,
        monitoring_id: MonitoringId,
        engine_id: &str,
        model: Option<String>,
        session_id: Option<String>,
        options: &ExecuteOptions,
    ) -> Result<ExecuteResult, RuntimeError> {
        let log_path = self
            .monitor
            .get_agent(monitoring_id)?
            .and_then(|r| r.log_path)
            .ok_or(RuntimeError::RecordNotFound(monitoring_id))?;
        self.paths
            .ensure_within(&log_path)
            .map_err(|e| RuntimeError::ConfigInvalid(e.to_string()))?;

        let correlation_id = new_correlation_id();
        self.log_stream
            .open_at(monitoring_id, agent_id, &correlation_id, prompt, log_path);

        let callbacks = self.build_callbacks(monitoring_id, prompt, options);

        let run_options = RunOptions {
            prompt: prompt.to_string(),
            model,
            cwd: options.working_dir.clone(),
            env: options.env.clone(),
            session_id,
            timeout: options.timeout,
            cancel: options.cancel.clone(),
            callbacks,
        };

        let chain = options
            .fallback_chain
            .clone()
            .unwrap_or_else(|| self.registry.ids());
        let result = self
            .fallback
            .run_with_fallback(engine_id, &chain, run_options, DEFAULT_MAX_ATTEMPTS)
            .await?;

        if result.all_engines_exhausted {
            return Err(RuntimeError::AllEnginesRateLimited {
                soonest_reset_engine: result.soonest_reset_engine,
                soonest_reset_at_ms: result.soonest_reset_at_ms,
                rate_limited_engines: result.rate_limited_engines,
            });
        }

        let outcome = result.outcome;
        if outcome.exit_code != Some(0) {
            let detail = last_lines(&outcome.stderr, 5);
            let combined = format!("{}\n{}", outcome.stdout, outcome.stderr);
            let err = match classify_error(&combined) {
                ErrorKind::ContextLength => EngineError::ContextLength(detail),
                ErrorKind::ContentFilter => EngineError::ContentFilter(detail),
                _ => EngineError::ExecutionFailed(format!(
                    "exit code {:?}: {detail}",
                    outcome.exit_code
                )),
            };
            return Err(RuntimeError::Engine(err));
        }

        if let Some(session) = &outcome.session_id {
            if let Err(e) = self.monitor.set_session_id(monitoring_id, session) {
                tracing::warn!(monitoring_id, error = %e, "failed to store session id");
            }
        }

        self.write_memory_tail(agent_id, &outcome.stdout);
        self.monitor.complete(monitoring_id, None)?;

        let engine_used = result
            .engine_used
            .unwrap_or_else(|| engine_id.to_string());
        let chained_prompts = self.load_chained_prompts(agent_id, &options.selected_conditions);

        Ok(ExecuteResult {
            output: outcome.stdout,
            monitoring_id,
            engine_used,
            session_id: outcome.session_id,
            chained_prompts,
        })
    }

    /// Wire the streaming callbacks: buffer, one-shot goal extraction,
    /// cursor-advancing tool parsing, log + user logger fan-out, telemetry
    /// and session persistence.
    fn build_callbacks(
        &self,
        monitoring_id: MonitoringId,
        prompt: &str,
        options: &ExecuteOptions,
    ) -> RunCallbacks {
        let buffer: Arc<Mutex<String>> = Arc::new(Mutex::new(String::new()));
        let parse_offset: Arc<Mutex<usize>> = Arc::new(Mutex::new(0));
        let goal_sent = Arc::new(AtomicBool::new(false));

        let on_data = {
            let buffer = Arc::clone(&buffer);
            let parse_offset = Arc::clone(&parse_offset);
            let goal_sent = Arc::clone(&goal_sent);
            let prompt = prompt.to_string();
            let on_goal = options.on_goal.clone();
            let on_context = options.on_context.clone();
            let logger = options.logger.clone();
            let log_stream = Arc::clone(&self.log_stream);
            Arc::new(move |chunk: &str| {
                {
                    let mut buf = buffer.lock();
                    buf.push_str(chunk);

                    if !goal_sent.load(Ordering::SeqCst) && !buf.trim().is_empty() {
                        goal_sent.store(true, Ordering::SeqCst);
                        if let (Some(cb), Some(goal)) = (&on_goal, extract_goal(&prompt)) {
                            cb(&goal);
                        }
                    }

                    let mut offset = parse_offset.lock();
                    while let Some((event, end)) = parse_tool_use_with_end(&buf[*offset..]) {
                        let context =
                            extract_context_from_tool(&event.tool_name, &event.parameters);
                        if let Some(cb) = &on_context {
                            cb(&context);
                        }
                        *offset += end;
                    }
                }

                let clean = strip_color_markers(chunk);
                log_stream.write(monitoring_id, &clean);
                if let Some(logger) = &logger {
                    logger(&clean);
                }
            }) as Arc<dyn Fn(&str) + Send + Sync>
        };

        let on_error_data = {
            let log_stream = Arc::clone(&self.log_stream);
            Arc::new(move |chunk: &str| {
                log_stream.write(monitoring_id, &strip_color_markers(chunk));
            }) as Arc<dyn Fn(&str) + Send + Sync>
        };

        let on_telemetry = {
            let monitor = self.monitor.clone();
            let forward = options.on_telemetry.clone();
            Arc::new(move |frame: &Telemetry| {
                if let Err(e) = monitor.update_telemetry(monitoring_id, frame) {
                    tracing::warn!(monitoring_id, error = %e, "telemetry upsert failed");
                }
                if let Some(cb) = &forward {
                    cb(frame);
                }
            }) as Arc<dyn Fn(&Telemetry) + Send + Sync>
        };

        let on_session_id = {
            let monitor = self.monitor.clone();
            Arc::new(move |session: &str| {
                if let Err(e) = monitor.set_session_id(monitoring_id, session) {
                    tracing::warn!(monitoring_id, error = %e, "session id store failed");
                }
            }) as Arc<dyn Fn(&str) + Send + Sync>
        };

        RunCallbacks {
            on_data: Some(on_data),
            on_error_data: Some(on_error_data),
            on_telemetry: Some(on_telemetry),
            on_session_id: Some(on_session_id),
        }
    }

    /// Keep the last chunk of output in `memory/<agent>.log` for chained
    /// prompts and debugging. Best-effort.
    fn write_memory_tail(&self, agent_id: &str, output: &str) {
        let path = self.paths.memory_file(agent_id);
        if self.paths.ensure_within(&path).is_err() {
            tracing::warn!(agent_id, "memory path escapes workspace, skipping");
            return;
        }
        let tail: String = if output.chars().count() > MEMORY_TAIL_CHARS {
            output
                .chars()
                .skip(output.chars().count() - MEMORY_TAIL_CHARS)
                .collect()
        } else {
            output.to_string()
        };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(&path, tail) {
            tracing::warn!(agent_id, error = %e, "memory tail write failed");
        }
    }

    /// Load `chained-prompts.json`, keeping entries for this agent whose
    /// conditions are all selected. Missing file means no chain.
    fn load_chained_prompts(
        &self,
        agent_id: &str,
        selected: &BTreeSet<String>,
    ) -> Option<Vec<ChainedPrompt>> {
        let path = self.paths.root().join("chained-prompts.json");
        let raw = std::fs::read_to_string(&path).ok()?;
        let entries: Vec<ChainedPrompt> = match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "chained prompts unreadable");
                return None;
            }
        };
        Some(
            entries
                .into_iter()
                .filter(|entry| {
                    entry
                        .agent_id
                        .as_deref()
                        .map(|a| a == agent_id)
                        .unwrap_or(true)
                        && entry.conditions.iter().all(|c| selected.contains(c))
                })
                .collect(),
        )
    }
}

// Pattern is a compile-time constant; construction cannot fail.
#[allow(clippy::unwrap_used)]
fn color_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").unwrap()
    })
}

/// Replace terminal color markers so logs read as plain status text.
fn strip_color_markers(chunk: &str) -> String {
    color_marker_re().replace_all(chunk, "").into_owned()
}

fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
