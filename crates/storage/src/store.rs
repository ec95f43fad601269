// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Relational registry of agent records and telemetry.
//!
//! Two tables, one-to-zero-or-one on agent id. Every write path goes through
//! a bounded busy-retry wrapper; multi-row updates run in a transaction that
//! is re-created on each retry attempt, so partial writes never land.

use codemachine_core::{AgentRecord, AgentStatus, MonitoringId, NewAgent, Telemetry};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Initial backoff after a busy/locked failure.
const RETRY_INITIAL: Duration = Duration::from_millis(50);
/// Backoff ceiling.
const RETRY_CAP: Duration = Duration::from_secs(2);
/// Attempts before a busy failure becomes a `StoreError::Busy`.
const RETRY_MAX_ATTEMPTS: u32 = 5;

/// Errors from the persistent store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database stayed busy through all retry attempts.
    #[error("database busy after {attempts} attempts: {message}")]
    Busy { attempts: u32, message: String },
    #[error("sql error: {0}")]
    Sql(rusqlite::Error),
    #[error("agent not found: {0}")]
    AgentNotFound(MonitoringId),
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS agents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    parent_id INTEGER REFERENCES agents(id),
    pid INTEGER,
    start_time_ms INTEGER NOT NULL,
    end_time_ms INTEGER,
    duration_ms INTEGER,
    prompt TEXT NOT NULL,
    log_path TEXT,
    error TEXT,
    engine_id TEXT NOT NULL,
    model TEXT,
    session_id TEXT
);
CREATE INDEX IF NOT EXISTS idx_agents_parent ON agents(parent_id);
CREATE TABLE IF NOT EXISTS telemetry (
    agent_id INTEGER PRIMARY KEY REFERENCES agents(id),
    tokens_in INTEGER NOT NULL,
    tokens_out INTEGER NOT NULL,
    cached_tokens INTEGER,
    cache_creation_tokens INTEGER,
    cache_read_tokens INTEGER,
    cost REAL
);
"#;

/// Relational store for agent records and telemetry.
#[derive(Clone)]
pub struct PersistentStore {
    conn: Arc<Mutex<Connection>>,
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    )
}

impl PersistentStore {
    /// Open (or create) the registry database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path).map_err(StoreError::Sql)?;
        Self::init(conn)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(StoreError::Sql)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(StoreError::Sql)?;
        conn.execute_batch(SCHEMA).map_err(StoreError::Sql)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `op` against the connection, retrying busy/locked failures with
    /// exponential backoff (50 ms doubling, capped at 2 s, 5 attempts).
    fn with_retry<T>(
        &self,
        mut op: impl FnMut(&Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, StoreError> {
        let mut delay = RETRY_INITIAL;
        let mut attempt = 1;
        loop {
            let result = {
                let conn = self.conn.lock();
                op(&conn)
            };
            match result {
                Ok(value) => return Ok(value),
                Err(err) if is_busy(&err) && attempt < RETRY_MAX_ATTEMPTS => {
                    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "store busy, retrying");
                    std::thread::sleep(delay);
                    delay = (delay * 2).min(RETRY_CAP);
                    attempt += 1;
                }
                Err(err) if is_busy(&err) => {
                    return Err(StoreError::Busy {
                        attempts: attempt,
                        message: err.to_string(),
                    })
                }
                Err(err) => return Err(StoreError::Sql(err)),
            }
        }
    }

    /// Like [`Self::with_retry`], wrapping each attempt in a fresh
    /// transaction so multi-row updates stay atomic across retries.
    fn with_retry_tx<T>(
        &self,
        mut op: impl FnMut(&Transaction) -> Result<T, rusqlite::Error>,
    ) -> Result<T, StoreError> {
        self.with_retry(|conn| {
            let tx = conn.unchecked_transaction()?;
            let value = op(&tx)?;
            tx.commit()?;
            Ok(value)
        })
    }

    /// Insert a new agent row; returns the assigned monotonic id.
    pub fn insert_agent(&self, input: &NewAgent, start_time_ms: u64) -> Result<MonitoringId, StoreError> {
        let prompt = codemachine_core::truncate_prompt(&input.prompt);
        self.with_retry(|conn| {
            conn.execute(
                "INSERT INTO agents (name, status, parent_id, pid, start_time_ms, prompt, engine_id, model)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    input.name,
                    AgentStatus::Running.as_str(),
                    input.parent_id,
                    input.pid,
                    start_time_ms as i64,
                    prompt,
                    input.engine_id,
                    input.model,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn set_log_path(&self, id: MonitoringId, log_path: &Path) -> Result<(), StoreError> {
        let path = log_path.to_string_lossy().to_string();
        self.update_one(id, move |conn| {
            conn.execute(
                "UPDATE agents SET log_path = ?1 WHERE id = ?2",
                params![path, id],
            )
        })
    }

    pub fn set_status(&self, id: MonitoringId, status: AgentStatus) -> Result<(), StoreError> {
        self.update_one(id, move |conn| {
            conn.execute(
                "UPDATE agents SET status = ?1, end_time_ms = NULL, duration_ms = NULL WHERE id = ?2",
                params![status.as_str(), id],
            )
        })
    }

    pub fn set_session_id(&self, id: MonitoringId, session_id: &str) -> Result<(), StoreError> {
        let session_id = session_id.to_string();
        self.update_one(id, move |conn| {
            conn.execute(
                "UPDATE agents SET session_id = ?1 WHERE id = ?2",
                params![session_id, id],
            )
        })
    }

    pub fn set_pid(&self, id: MonitoringId, pid: Option<u32>) -> Result<(), StoreError> {
        self.update_one(id, move |conn| {
            conn.execute("UPDATE agents SET pid = ?1 WHERE id = ?2", params![pid, id])
        })
    }

    fn update_one(
        &self,
        id: MonitoringId,
        op: impl Fn(&Connection) -> Result<usize, rusqlite::Error>,
    ) -> Result<(), StoreError> {
        let changed = self.with_retry(|conn| op(conn))?;
        if changed == 0 {
            return Err(StoreError::AgentNotFound(id));
        }
        Ok(())
    }

    /// Move an agent to a terminal status, optionally upserting telemetry in
    /// the same transaction.
    pub fn finalize(
        &self,
        id: MonitoringId,
        status: AgentStatus,
        end_time_ms: u64,
        error: Option<&str>,
        telemetry: Option<&Telemetry>,
    ) -> Result<(), StoreError> {
        let error = error.map(str::to_string);
        self.with_retry_tx(|tx| {
            let start: i64 = tx.query_row(
                "SELECT start_time_ms FROM agents WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            let duration = (end_time_ms as i64 - start).max(0);
            tx.execute(
                "UPDATE agents SET status = ?1, end_time_ms = ?2, duration_ms = ?3, error = ?4 WHERE id = ?5",
                params![status.as_str(), end_time_ms as i64, duration, error, id],
            )?;
            if let Some(t) = telemetry {
                upsert_telemetry_in(tx, id, t)?;
            }
            Ok(())
        })
    }

    /// Idempotent telemetry upsert keyed by agent id.
    pub fn upsert_telemetry(&self, id: MonitoringId, telemetry: &Telemetry) -> Result<(), StoreError> {
        self.with_retry_tx(|tx| upsert_telemetry_in(tx, id, telemetry))
    }

    pub fn get_agent(&self, id: MonitoringId) -> Result<Option<AgentRecord>, StoreError> {
        self.with_retry(|conn| {
            conn.query_row(
                &format!("{SELECT_RECORD} WHERE a.id = ?1"),
                params![id],
                read_record,
            )
            .optional()
        })
    }

    pub fn get_all(&self) -> Result<Vec<AgentRecord>, StoreError> {
        self.select_records(&format!("{SELECT_RECORD} ORDER BY a.id"), params![])
    }

    pub fn get_children(&self, parent_id: MonitoringId) -> Result<Vec<AgentRecord>, StoreError> {
        self.select_records(
            &format!("{SELECT_RECORD} WHERE a.parent_id = ?1 ORDER BY a.id"),
            params![parent_id],
        )
    }

    pub fn get_roots(&self) -> Result<Vec<AgentRecord>, StoreError> {
        self.select_records(
            &format!("{SELECT_RECORD} WHERE a.parent_id IS NULL ORDER BY a.id"),
            params![],
        )
    }

    /// All parent→child edges in one pass, for O(n) tree reconstruction.
    pub fn children_edges(&self) -> Result<Vec<(MonitoringId, MonitoringId)>, StoreError> {
        self.with_retry(|conn| {
            let mut stmt = conn.prepare(
                "SELECT parent_id, id FROM agents WHERE parent_id IS NOT NULL ORDER BY id",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect()
        })
    }

    /// Delete one agent row and its telemetry.
    pub fn delete_agent(&self, id: MonitoringId) -> Result<(), StoreError> {
        self.with_retry_tx(|tx| {
            tx.execute("DELETE FROM telemetry WHERE agent_id = ?1", params![id])?;
            tx.execute("DELETE FROM agents WHERE id = ?1", params![id])?;
            Ok(())
        })
    }

    /// Delete everything; telemetry first for the foreign key.
    pub fn clear_all(&self) -> Result<(), StoreError> {
        self.with_retry_tx(|tx| {
            tx.execute("DELETE FROM telemetry", [])?;
            tx.execute("DELETE FROM agents", [])?;
            Ok(())
        })
    }

    fn select_records(
        &self,
        sql: &str,
        args: impl rusqlite::Params + Copy,
    ) -> Result<Vec<AgentRecord>, StoreError> {
        self.with_retry(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(args, read_record)?;
            rows.collect()
        })
    }
}

const SELECT_RECORD: &str = "SELECT a.id, a.name, a.status, a.parent_id, a.pid, a.start_time_ms, \
     a.end_time_ms, a.duration_ms, a.prompt, a.log_path, a.error, a.engine_id, a.model, a.session_id, \
     t.tokens_in, t.tokens_out, t.cached_tokens, t.cache_creation_tokens, t.cache_read_tokens, t.cost \
     FROM agents a LEFT JOIN telemetry t ON t.agent_id = a.id";

fn upsert_telemetry_in(tx: &Transaction, id: MonitoringId, t: &Telemetry) -> Result<(), rusqlite::Error> {
    tx.execute(
        "INSERT INTO telemetry (agent_id, tokens_in, tokens_out, cached_tokens, cache_creation_tokens, cache_read_tokens, cost)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(agent_id) DO UPDATE SET
             tokens_in = excluded.tokens_in,
             tokens_out = excluded.tokens_out,
             cached_tokens = excluded.cached_tokens,
             cache_creation_tokens = excluded.cache_creation_tokens,
             cache_read_tokens = excluded.cache_read_tokens,
             cost = excluded.cost",
        params![
            id,
            t.tokens_in as i64,
            t.tokens_out as i64,
            t.cached_tokens.map(|v| v as i64),
            t.cache_creation_tokens.map(|v| v as i64),
            t.cache_read_tokens.map(|v| v as i64),
            t.cost,
        ],
    )?;
    Ok(())
}

fn read_record(row: &rusqlite::Row<'_>) -> Result<AgentRecord, rusqlite::Error> {
    let status_str: String = row.get(2)?;
    let status = AgentStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown status: {status_str}").into(),
        )
    })?;
    let tokens_in: Option<i64> = row.get(14)?;
    let telemetry = tokens_in.map(|tokens_in| -> Result<Telemetry, rusqlite::Error> {
        Ok(Telemetry {
            tokens_in: tokens_in.max(0) as u64,
            tokens_out: row.get::<_, i64>(15)?.max(0) as u64,
            cached_tokens: row.get::<_, Option<i64>>(16)?.map(|v| v.max(0) as u64),
            cache_creation_tokens: row.get::<_, Option<i64>>(17)?.map(|v| v.max(0) as u64),
            cache_read_tokens: row.get::<_, Option<i64>>(18)?.map(|v| v.max(0) as u64),
            cost: row.get(19)?,
        })
    });
    let telemetry = match telemetry {
        Some(Ok(t)) => Some(t),
        Some(Err(e)) => return Err(e),
        None => None,
    };

    Ok(AgentRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        status,
        parent_id: row.get(3)?,
        pid: row.get(4)?,
        start_time_ms: row.get::<_, i64>(5)?.max(0) as u64,
        end_time_ms: row.get::<_, Option<i64>>(6)?.map(|v| v.max(0) as u64),
        duration_ms: row.get::<_, Option<i64>>(7)?.map(|v| v.max(0) as u64),
        prompt: row.get(8)?,
        log_path: row.get::<_, Option<String>>(9)?.map(PathBuf::from),
        error: row.get(10)?,
        engine_id: row.get(11)?,
        model: row.get(12)?,
        session_id: row.get(13)?,
        telemetry,
    })
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
