// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable per-engine rate-limit cooldowns.
//!
//! Entries park an engine until a wall-clock reset time. The map is held in
//! memory and mirrored to `rate-limits.json` with a write-to-tmp-then-rename
//! so a crash never leaves a torn file; `initialize` reloads survivors on
//! restart.

use codemachine_core::Clock;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Fallback cooldown when the provider gives no reset hint.
const DEFAULT_COOLDOWN_MS: u64 = 60_000;

/// One engine's cooldown window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitEntry {
    pub engine_id: String,
    /// Epoch ms when the limit was observed.
    pub rate_limited_at: u64,
    /// Epoch ms when the engine becomes usable again.
    pub resets_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RateLimitFile {
    entries: Vec<RateLimitEntry>,
    last_updated: u64,
}

/// Durable map of engine id → cooldown entry.
pub struct RateLimitManager {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, RateLimitEntry>>,
}

impl RateLimitManager {
    pub fn new(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Load persisted entries, dropping ones that expired while the process
    /// was down. This is the crash-recovery path.
    pub fn initialize(&self) {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(_) => return,
        };
        let parsed: RateLimitFile = match serde_json::from_reader(BufReader::new(file)) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "rate-limit file unreadable, starting fresh");
                return;
            }
        };
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock();
        entries.clear();
        for entry in parsed.entries {
            if entry.resets_at > now {
                entries.insert(entry.engine_id.clone(), entry);
            }
        }
        tracing::debug!(active = entries.len(), "rate limits loaded");
    }

    /// Park an engine until `resets_at` (or now + retry hint, or the default
    /// cooldown) and persist the map.
    pub fn mark_rate_limited(
        &self,
        engine_id: &str,
        resets_at_ms: Option<u64>,
        retry_after_seconds: Option<u64>,
    ) {
        let now = self.clock.now_ms();
        let resets_at = resets_at_ms
            .or_else(|| retry_after_seconds.map(|s| now + s * 1_000))
            .unwrap_or(now + DEFAULT_COOLDOWN_MS)
            .max(now + 1);
        let entry = RateLimitEntry {
            engine_id: engine_id.to_string(),
            rate_limited_at: now,
            resets_at,
            retry_after_seconds,
        };
        tracing::info!(
            engine_id,
            resets_in_s = (resets_at - now) / 1_000,
            "engine rate limited"
        );
        let mut entries = self.entries.lock();
        entries.insert(engine_id.to_string(), entry);
        self.save(&entries);
    }

    /// Whether the engine is usable right now. Expired entries are purged.
    pub fn is_engine_available(&self, engine_id: &str) -> bool {
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock();
        match entries.get(engine_id) {
            None => true,
            Some(entry) if entry.resets_at <= now => {
                entries.remove(engine_id);
                true
            }
            Some(_) => false,
        }
    }

    /// Seconds until the engine becomes available; 0 when it already is.
    pub fn time_until_available_secs(&self, engine_id: &str) -> u64 {
        let now = self.clock.now_ms();
        let entries = self.entries.lock();
        match entries.get(engine_id) {
            Some(entry) if entry.resets_at > now => (entry.resets_at - now).div_ceil(1_000),
            _ => 0,
        }
    }

    /// Epoch ms when the engine resets, if it is currently parked.
    pub fn resets_at_ms(&self, engine_id: &str) -> Option<u64> {
        let now = self.clock.now_ms();
        let entries = self.entries.lock();
        entries
            .get(engine_id)
            .filter(|e| e.resets_at > now)
            .map(|e| e.resets_at)
    }

    pub fn clear_rate_limit(&self, engine_id: &str) {
        let mut entries = self.entries.lock();
        if entries.remove(engine_id).is_some() {
            self.save(&entries);
        }
    }

    /// Purge every expired entry and persist the survivors.
    pub fn cleanup(&self) {
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.resets_at > now);
        if entries.len() != before {
            self.save(&entries);
        }
    }

    /// Snapshot of active entries, for display.
    pub fn active_entries(&self) -> Vec<RateLimitEntry> {
        let now = self.clock.now_ms();
        let entries = self.entries.lock();
        let mut active: Vec<RateLimitEntry> = entries
            .values()
            .filter(|e| e.resets_at > now)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.engine_id.cmp(&b.engine_id));
        active
    }

    /// Write the map atomically (tmp file + rename). Failures degrade: the
    /// in-memory map still protects this process.
    fn save(&self, entries: &HashMap<String, RateLimitEntry>) {
        if let Err(e) = self.write_file(entries) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to persist rate limits");
        }
    }

    fn write_file(&self, entries: &HashMap<String, RateLimitEntry>) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut sorted: Vec<RateLimitEntry> = entries.values().cloned().collect();
        sorted.sort_by(|a, b| a.engine_id.cmp(&b.engine_id));
        let file = RateLimitFile {
            entries: sorted,
            last_updated: self.clock.now_ms(),
        };

        let tmp_path = self.path.with_extension("tmp");
        {
            let out = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(out);
            serde_json::to_writer(&mut writer, &file)?;
            writer.flush()?;
            let out = writer.into_inner().map_err(|e| e.into_error())?;
            out.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn file_path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
#[path = "rate_limits_tests.rs"]
mod tests;
