// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command implementations: wire the core together and print results.

use anyhow::Context;
use codemachine_adapters::{AuthCache, EngineAdapter, EngineRegistry, ProcessRegistry};
use codemachine_core::{format_epoch_ms, Clock, SystemClock, WorkspacePaths};
use codemachine_engine::{
    AgentRunner, CircuitBreakerSet, EngineConfigFile, EventBus, ExecuteOptions, RunnerDeps,
    SelectionContext, WorkflowEvent,
};
use codemachine_storage::{PersistentStore, RateLimitManager};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

struct Stack {
    paths: WorkspacePaths,
    registry: Arc<EngineRegistry>,
    auth: Arc<AuthCache>,
    runner: AgentRunner,
    events: Arc<EventBus>,
}

fn build_stack(project: PathBuf) -> anyhow::Result<Stack> {
    let paths = WorkspacePaths::for_project(&project);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store = PersistentStore::open(&paths.registry_db())
        .with_context(|| format!("opening {}", paths.registry_db().display()))?;
    let registry = Arc::new(EngineRegistry::builtin());
    let auth = Arc::new(AuthCache::new(Arc::clone(&clock)));
    let rate_limits = Arc::new(RateLimitManager::new(
        paths.rate_limits_file(),
        Arc::clone(&clock),
    ));
    rate_limits.initialize();
    let breakers = Arc::new(CircuitBreakerSet::new(Arc::clone(&clock)));
    let events = Arc::new(EventBus::new());

    let runner = AgentRunner::new(RunnerDeps {
        paths: paths.clone(),
        store,
        registry: Arc::clone(&registry),
        auth: Arc::clone(&auth),
        rate_limits: Arc::clone(&rate_limits),
        breakers,
        clock,
        events: Arc::clone(&events),
    });

    Ok(Stack {
        paths,
        registry,
        auth,
        runner,
        events,
    })
}

pub struct RunArgs {
    pub project: PathBuf,
    pub agent: String,
    pub prompt: String,
    pub engine: Option<String>,
    pub model: Option<String>,
    pub preset: Option<String>,
    pub no_fallback: bool,
    pub timeout_secs: Option<u64>,
}

pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let stack = build_stack(args.project.clone())?;

    // Narrate selection and fallback decisions on stderr.
    stack.events.subscribe(Arc::new(|event: &WorkflowEvent| match event {
        WorkflowEvent::EngineSelected {
            engine_id, source, ..
        } => eprintln!("engine: {engine_id} ({source})"),
        WorkflowEvent::FallbackAttempt { to_engine, .. } => {
            eprintln!("falling back to {to_engine}")
        }
        WorkflowEvent::EngineRateLimited {
            engine_id,
            resets_in_secs,
        } => eprintln!("{engine_id} rate limited for {resets_in_secs}s"),
        _ => {}
    }));

    let config = EngineConfigFile::load(&stack.paths.engine_config_file())?;
    let mut options = ExecuteOptions::new(&args.project);
    options.engine = args.engine;
    options.model_override = args.model;
    options.config = config;
    options.selection = Some(SelectionContext {
        preset: args.preset,
        fallback_enabled: if args.no_fallback { Some(false) } else { None },
        ..SelectionContext::default()
    });
    options.timeout = args.timeout_secs.map(Duration::from_secs);
    options.logger = Some(Arc::new(|chunk: &str| print!("{chunk}")));

    let cancel = options.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("interrupted, stopping agent");
            cancel.cancel();
            ProcessRegistry::shutdown_all(Duration::from_millis(100)).await;
        }
    });

    let result = stack
        .runner
        .execute_agent(&args.agent, &args.prompt, options)
        .await?;

    eprintln!(
        "agent {} finished on {} (record {})",
        args.agent, result.engine_used, result.monitoring_id
    );
    Ok(())
}

pub async fn engines(project: PathBuf) -> anyhow::Result<()> {
    let stack = build_stack(project)?;
    for meta in stack.registry.all_metadata() {
        let adapter = stack.registry.get(&meta.id).await?;
        let authed = stack
            .auth
            .is_authenticated(&meta.id, || async move { adapter.is_authenticated().await })
            .await;
        println!(
            "{:<10} {:<16} order={} resume={} auth={}",
            meta.id,
            meta.display_name,
            meta.order,
            if meta.supports_resume { "yes" } else { "no" },
            if authed { "ok" } else { "missing" },
        );
    }
    Ok(())
}

pub fn limits(project: PathBuf) -> anyhow::Result<()> {
    let paths = WorkspacePaths::for_project(&project);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let rate_limits = RateLimitManager::new(paths.rate_limits_file(), clock);
    rate_limits.initialize();

    let entries = rate_limits.active_entries();
    if entries.is_empty() {
        println!("no active rate limits");
        return Ok(());
    }
    for entry in entries {
        println!(
            "{:<10} until {} ({}s left)",
            entry.engine_id,
            format_epoch_ms(entry.resets_at),
            rate_limits.time_until_available_secs(&entry.engine_id),
        );
    }
    Ok(())
}
