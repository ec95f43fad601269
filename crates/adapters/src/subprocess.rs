// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Streaming subprocess execution with cancellation and child tracking.
//!
//! Provider CLIs run as children of the workflow process. Stdout and stderr
//! are pumped by two parallel tasks so callbacks observe chunks in the order
//! the child produced them; cancellation and timeout share one cleanup path
//! (terminate the process group, then kill after a short grace).

use crate::env::{denied_env_keys, sanitize_child_env};
use codemachine_core::EngineError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Grace between SIGTERM and SIGKILL.
const KILL_GRACE: Duration = Duration::from_millis(100);

/// Callback invoked for each output chunk.
pub type ChunkFn = Arc<dyn Fn(&str) + Send + Sync>;

/// What to spawn and where.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Extra environment for the child; sanitized before use.
    pub env: Vec<(String, String)>,
}

/// Collected output of a finished child.
#[derive(Debug, Clone, Default)]
pub struct StreamOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

/// Run a child to completion, streaming both pipes through callbacks.
///
/// Returns `EngineError::Cancelled` when the token fires first and
/// `EngineError::ExecutionFailed` on timeout; both paths terminate the
/// child's process group before returning.
pub async fn run_streaming(
    spec: SpawnSpec,
    on_stdout: ChunkFn,
    on_stderr: ChunkFn,
    cancel: &CancellationToken,
    timeout: Option<Duration>,
) -> Result<StreamOutput, EngineError> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .current_dir(&spec.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for key in denied_env_keys() {
        cmd.env_remove(key);
    }
    for (key, value) in sanitize_child_env(spec.env) {
        cmd.env(key, value);
    }
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd
        .spawn()
        .map_err(|e| EngineError::SpawnFailed(format!("{}: {e}", spec.program)))?;
    let pid = child.id();
    if let Some(pid) = pid {
        ProcessRegistry::register(pid, &spec.program);
    }

    let stdout_task = child
        .stdout
        .take()
        .map(|out| tokio::spawn(pump(out, Arc::clone(&on_stdout))));
    let stderr_task = child
        .stderr
        .take()
        .map(|err| tokio::spawn(pump(err, Arc::clone(&on_stderr))));

    let timeout_sleep = async {
        match timeout {
            Some(t) => tokio::time::sleep(t).await,
            None => std::future::pending().await,
        }
    };

    let result = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => Ok(status.code()),
            Err(e) => Err(EngineError::ExecutionFailed(format!("wait failed: {e}"))),
        },
        _ = cancel.cancelled() => {
            terminate(pid).await;
            let _ = child.wait().await;
            Err(EngineError::Cancelled)
        }
        _ = timeout_sleep => {
            terminate(pid).await;
            let _ = child.wait().await;
            Err(EngineError::ExecutionFailed(format!(
                "{} timed out after {}s",
                spec.program,
                timeout.unwrap_or_default().as_secs()
            )))
        }
    };

    if let Some(pid) = pid {
        ProcessRegistry::unregister(pid);
    }

    let stdout = collect(stdout_task).await;
    let stderr = collect(stderr_task).await;
    let exit_code = result?;

    Ok(StreamOutput {
        stdout,
        stderr,
        exit_code,
    })
}

/// Run a short command without streaming, for auth probes and logouts.
pub async fn run_quiet(
    program: &str,
    args: &[&str],
    cwd: &std::path::Path,
    timeout: Duration,
) -> Result<StreamOutput, EngineError> {
    let spec = SpawnSpec {
        program: program.to_string(),
        args: args.iter().map(|a| a.to_string()).collect(),
        cwd: cwd.to_path_buf(),
        env: Vec::new(),
    };
    let quiet: ChunkFn = Arc::new(|_| {});
    run_streaming(spec, Arc::clone(&quiet), quiet, &CancellationToken::new(), Some(timeout)).await
}

async fn collect(task: Option<tokio::task::JoinHandle<String>>) -> String {
    match task {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    }
}

/// Pump one pipe to a callback, newline-chunked, preserving order.
async fn pump<R: AsyncRead + Unpin>(reader: R, callback: ChunkFn) -> String {
    let mut reader = BufReader::new(reader);
    let mut collected = String::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let chunk = String::from_utf8_lossy(&buf);
                callback(&chunk);
                collected.push_str(&chunk);
            }
        }
    }
    collected
}

#[cfg(unix)]
async fn terminate(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else { return };
    let pgid = Pid::from_raw(pid as i32);
    let _ = killpg(pgid, Signal::SIGTERM);
    tokio::time::sleep(KILL_GRACE).await;
    let _ = killpg(pgid, Signal::SIGKILL);
}

#[cfg(not(unix))]
async fn terminate(_pid: Option<u32>) {}

fn children() -> &'static Mutex<HashMap<u32, String>> {
    static CHILDREN: OnceLock<Mutex<HashMap<u32, String>>> = OnceLock::new();
    CHILDREN.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Process-wide registry of live children so global shutdown can reap them.
pub struct ProcessRegistry;

impl ProcessRegistry {
    pub fn register(pid: u32, label: &str) {
        children().lock().insert(pid, label.to_string());
    }

    pub fn unregister(pid: u32) {
        children().lock().remove(&pid);
    }

    /// Currently tracked children, for diagnostics.
    pub fn active() -> Vec<(u32, String)> {
        let mut active: Vec<(u32, String)> = children()
            .lock()
            .iter()
            .map(|(pid, label)| (*pid, label.clone()))
            .collect();
        active.sort_by_key(|(pid, _)| *pid);
        active
    }

    /// Terminate every tracked child, then kill stragglers after `grace`.
    pub async fn shutdown_all(grace: Duration) {
        let pids: Vec<u32> = children().lock().keys().copied().collect();
        if pids.is_empty() {
            return;
        }
        tracing::info!(count = pids.len(), "terminating tracked children");
        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;
            for pid in &pids {
                let _ = killpg(Pid::from_raw(*pid as i32), Signal::SIGTERM);
            }
            tokio::time::sleep(grace).await;
            for pid in &pids {
                let _ = killpg(Pid::from_raw(*pid as i32), Signal::SIGKILL);
            }
        }
        #[cfg(not(unix))]
        let _ = grace;
        let mut map = children().lock();
        for pid in pids {
            map.remove(&pid);
        }
    }
}

#[cfg(test)]
#[path = "subprocess_tests.rs"]
mod tests;
