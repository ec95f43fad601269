// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-agent append-only log files.
//!
//! One writer per agent record, with a header box on first write, size-based
//! rotation, and an advisory file lock against other processes. The lock is
//! acquired on a blocking task and writes do not wait for it, so it only
//! protects cross-process; single-process ordering comes from the stream
//! map's guard. Log I/O failures degrade to warnings, never tearing down a
//! workflow.

use codemachine_core::{format_epoch_ms, truncate_prompt, Clock, MonitoringId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Rotation check cadence, in writes.
const ROTATE_CHECK_EVERY: u64 = 100;
/// Rotate once the current file exceeds this.
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;
/// Rotated files to retain (`.1` .. `.5`).
const MAX_ROTATED_FILES: u32 = 5;
/// Tail poll cadence.
const TAIL_POLL: Duration = Duration::from_millis(500);
/// Polls to wait for a log file that does not exist yet (~120s).
const TAIL_MAX_MISSING_POLLS: u32 = 240;

/// Errors surfaced by the tail reader.
#[derive(Debug, Error)]
pub enum TailError {
    #[error("cannot connect to log file: {0}")]
    CannotConnect(PathBuf),
}

struct AgentLogFile {
    path: PathBuf,
    file: Option<File>,
    writes_since_check: u64,
    /// Holds the advisory-locked handle once acquisition completes.
    lock_holder: Arc<Mutex<Option<File>>>,
}

/// Manager of per-agent log writers.
pub struct LogStream {
    logs_dir: PathBuf,
    clock: Arc<dyn Clock>,
    streams: Mutex<HashMap<MonitoringId, AgentLogFile>>,
}

impl LogStream {
    pub fn new(logs_dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            logs_dir: logs_dir.into(),
            clock,
            streams: Mutex::new(HashMap::new()),
        }
    }

    /// Open the log for one agent at an explicit path, writing the header
    /// box and requesting the advisory lock.
    pub fn open_at(
        &self,
        agent_id: MonitoringId,
        name: &str,
        correlation_id: &str,
        prompt: &str,
        path: PathBuf,
    ) -> PathBuf {
        if let Err(e) = self.try_open(agent_id, name, correlation_id, prompt, &path) {
            tracing::warn!(agent_id, path = %path.display(), error = %e, "failed to open agent log");
        }
        path
    }

    fn try_open(
        &self,
        agent_id: MonitoringId,
        name: &str,
        correlation_id: &str,
        prompt: &str,
        path: &Path,
    ) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;

        let started = format_epoch_ms(self.clock.now_ms());
        writeln!(file, "===\u{256d}\u{2500} Agent {agent_id}: {name}")?;
        writeln!(file, "===\u{2502} correlation: {correlation_id}")?;
        writeln!(file, "===\u{2502} started: {started}")?;
        writeln!(file, "===\u{2502} prompt: {}", truncate_prompt(prompt))?;
        writeln!(file, "===\u{2570}\u{2500}")?;

        let lock_holder: Arc<Mutex<Option<File>>> = Arc::new(Mutex::new(None));
        acquire_lock_async(&file, path, Arc::clone(&lock_holder));

        self.streams.lock().insert(
            agent_id,
            AgentLogFile {
                path: path.to_path_buf(),
                file: Some(file),
                writes_since_check: 0,
                lock_holder,
            },
        );
        Ok(())
    }

    /// Append a chunk to an agent's log. Unknown agents and I/O failures
    /// are logged and dropped.
    pub fn write(&self, agent_id: MonitoringId, chunk: &str) {
        let mut streams = self.streams.lock();
        let Some(stream) = streams.get_mut(&agent_id) else {
            tracing::warn!(agent_id, "write to unopened agent log dropped");
            return;
        };
        if let Err(e) = write_chunk(stream, chunk) {
            tracing::warn!(agent_id, error = %e, "agent log write failed");
        }
    }

    /// Flush and drop one agent's stream, releasing its lock.
    pub fn close(&self, agent_id: MonitoringId) {
        if let Some(mut stream) = self.streams.lock().remove(&agent_id) {
            if let Some(file) = stream.file.take() {
                let _ = sync(&file);
            }
            *stream.lock_holder.lock() = None;
        }
    }

    /// Drop every stream and release every lock.
    pub fn close_all(&self) {
        let mut streams = self.streams.lock();
        for (_, mut stream) in streams.drain() {
            if let Some(file) = stream.file.take() {
                let _ = sync(&file);
            }
            *stream.lock_holder.lock() = None;
        }
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    /// Current path for an open stream.
    pub fn path_for(&self, agent_id: MonitoringId) -> Option<PathBuf> {
        self.streams.lock().get(&agent_id).map(|s| s.path.clone())
    }
}

fn sync(file: &File) -> std::io::Result<()> {
    file.sync_all()
}

/// Request the advisory lock without gating writes on it. Outside a tokio
/// runtime the non-blocking variant is tried inline instead.
fn acquire_lock_async(file: &File, path: &Path, holder: Arc<Mutex<Option<File>>>) {
    let Ok(dup) = file.try_clone() else { return };
    let path = path.to_path_buf();
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn_blocking(move || {
                if fs2::FileExt::lock_exclusive(&dup).is_ok() {
                    *holder.lock() = Some(dup);
                } else {
                    tracing::debug!(path = %path.display(), "advisory log lock not acquired");
                }
            });
        }
        Err(_) => {
            if fs2::FileExt::try_lock_exclusive(&dup).is_ok() {
                *holder.lock() = Some(dup);
            }
        }
    }
}

fn write_chunk(stream: &mut AgentLogFile, chunk: &str) -> std::io::Result<()> {
    if stream.file.is_none() {
        // Re-open after rotation.
        stream.file = Some(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&stream.path)?,
        );
    }
    if let Some(file) = stream.file.as_mut() {
        file.write_all(chunk.as_bytes())?;
    }

    stream.writes_since_check += 1;
    if stream.writes_since_check >= ROTATE_CHECK_EVERY {
        stream.writes_since_check = 0;
        let size = fs::metadata(&stream.path).map(|m| m.len()).unwrap_or(0);
        if size > MAX_LOG_SIZE {
            rotate(stream)?;
        }
    }
    Ok(())
}

/// Shift `.k → .k+1` for k = MAX-1..1, move the live file to `.1`, and drop
/// anything past the retention bound. The stream re-opens lazily on the
/// next write.
fn rotate(stream: &mut AgentLogFile) -> std::io::Result<()> {
    if let Some(file) = stream.file.take() {
        sync(&file)?;
    }
    *stream.lock_holder.lock() = None;

    let base = stream.path.display().to_string();
    let overflow = format!("{base}.{}", MAX_ROTATED_FILES + 1);
    if Path::new(&overflow).exists() {
        let _ = fs::remove_file(&overflow);
    }
    for k in (1..MAX_ROTATED_FILES).rev() {
        let from = format!("{base}.{k}");
        let to = format!("{base}.{}", k + 1);
        let _ = fs::rename(&from, &to);
    }
    fs::rename(&stream.path, format!("{base}.1"))?;
    tracing::debug!(path = %stream.path.display(), "rotated agent log");
    Ok(())
}

/// Bytes appended to `path` since `from_byte`, plus the new length.
pub fn read_incremental(path: &Path, from_byte: u64) -> std::io::Result<(Vec<u8>, u64)> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len <= from_byte {
        return Ok((Vec::new(), len));
    }
    file.seek(SeekFrom::Start(from_byte))?;
    let mut buf = Vec::with_capacity((len - from_byte) as usize);
    file.read_to_end(&mut buf)?;
    Ok((buf, len))
}

/// Follow a log file, emitting complete lines.
///
/// Polls every 500 ms, carrying a trailing partial line across polls. A file
/// that never appears within the retry budget surfaces as `CannotConnect`.
/// Cancellation ends the tail cleanly.
pub async fn tail_log<F>(
    path: &Path,
    cancel: &CancellationToken,
    mut on_line: F,
) -> Result<(), TailError>
where
    F: FnMut(&str),
{
    let mut offset: u64 = 0;
    let mut partial = String::new();
    let mut missing_polls: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            if !partial.is_empty() {
                on_line(&partial);
            }
            return Ok(());
        }

        match read_incremental(path, offset) {
            Ok((bytes, new_len)) => {
                missing_polls = 0;
                offset = new_len;
                if !bytes.is_empty() {
                    partial.push_str(&String::from_utf8_lossy(&bytes));
                    while let Some(newline) = partial.find('\n') {
                        let rest = partial.split_off(newline + 1);
                        let line = std::mem::replace(&mut partial, rest);
                        on_line(line.trim_end_matches('\n'));
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                missing_polls += 1;
                if missing_polls >= TAIL_MAX_MISSING_POLLS {
                    return Err(TailError::CannotConnect(path.to_path_buf()));
                }
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "tail read failed");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(TAIL_POLL) => {}
            _ = cancel.cancelled() => {}
        }
    }
}

#[cfg(test)]
#[path = "log_stream_tests.rs"]
mod tests;
