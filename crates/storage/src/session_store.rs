// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session Store Façade (C7, spec.md §4.7, §6).
//!
//! Persists four record kinds keyed by `(sessionId, runId)`: step status,
//! step results, audits, and globals. Every mutation is tagged
//! `(session_id, run_id, date)`; readers fold records keyed on
//! `(resultKey, name)` or `auditKey`, and **the maximum `runId` wins** when
//! the same key recurs across runs. Writes are idempotent: saving
//! identical `state` bytes under an existing key is a no-op.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sw_core::{AuditType, ExecutionAudit, StateKey};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Converter(#[from] crate::converter::ConverterError),
}

/// Status of a single step's execution at a point in time (§6 `StatusRecord`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Running,
    Complete,
    Error,
    Skipped,
    Unknown,
}

/// Terminal status of a whole session run (§6 `completeSession`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Running,
    Complete,
    Error,
    Paused,
}

/// One `setStatus` record: which step, at which run, was in which state,
/// plus the child step-ids it fanned out to (the secondary
/// `STEP_STATUS_STEPS` table of §6, folded in here since every reader that
/// wants statuses wants the children too).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    pub session_id: String,
    pub run_id: u64,
    pub result_key: String,
    pub status: StepStatus,
    #[serde(default)]
    pub next_steps: Vec<String>,
}

/// One `saveStepResult` record (§6 `ResultRecord`). `name` is
/// `"primaryKey"` for the primary return, the named-returns map key
/// otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub session_id: String,
    pub run_id: u64,
    pub result_key: String,
    pub name: String,
    pub converter: String,
    pub state: Vec<u8>,
}

/// One row of `getSessionHistory` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHistoryEntry {
    pub session_id: String,
    pub run_id: u64,
    pub status: SessionStatus,
    pub start: u64,
    pub end: Option<u64>,
}

impl SessionHistoryEntry {
    pub fn duration(&self) -> Option<u64> {
        self.end.map(|e| e.saturating_sub(self.start))
    }
}

/// One `saveGlobal` record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalRecord {
    pub session_id: String,
    pub run_id: u64,
    pub name: String,
    pub value: Value,
}

/// Persists step results, audits, globals, and step status, keyed by
/// `(sessionId, runId)`, and supplies the restart data the executor needs
/// (spec.md §6 "Session Store interface"). Implementations must be
/// thread-safe; calls are blocking (spec.md §5).
pub trait SessionStore: Send + Sync {
    /// Starts (or restarts) a session. If a prior row for `session_id`
    /// exists, the implementation moves it to history before inserting the
    /// new one (§6).
    fn start_session(
        &self,
        session_id: &str,
        run_id: u64,
        start_ms: u64,
    ) -> Result<(), StorageError>;

    fn complete_session(
        &self,
        session_id: &str,
        end_ms: u64,
        status: SessionStatus,
    ) -> Result<(), StorageError>;

    fn session_history(&self, session_id: &str) -> Result<Vec<SessionHistoryEntry>, StorageError>;

    /// The current (max-runId) history row for `session_id`, if any — the
    /// "prior status for this session" the executor's restart step 3
    /// consults.
    fn current_session(&self, session_id: &str) -> Result<Option<SessionHistoryEntry>, StorageError> {
        Ok(self
            .session_history(session_id)?
            .into_iter()
            .max_by_key(|e| e.run_id))
    }

    fn set_status(&self, record: StatusRecord) -> Result<(), StorageError>;

    /// All status records for `session_id`, one per `result_key`, with the
    /// maximum `run_id` winning on collision (§4.7).
    fn load_statuses(&self, session_id: &str) -> Result<Vec<StatusRecord>, StorageError>;

    fn save_step_result(&self, record: ResultRecord) -> Result<(), StorageError>;

    /// All step results for `session_id`, one per `(result_key, name)`, with
    /// the maximum `run_id` winning on collision.
    fn load_step_results(&self, session_id: &str) -> Result<Vec<ResultRecord>, StorageError>;

    fn save_audit(
        &self,
        session_id: &str,
        run_id: u64,
        audit: &ExecutionAudit,
    ) -> Result<(), StorageError>;

    fn load_audits(&self, session_id: &str) -> Result<Vec<ExecutionAudit>, StorageError>;

    fn save_global(&self, record: GlobalRecord) -> Result<(), StorageError>;

    fn load_globals(&self, session_id: &str) -> Result<IndexMap<String, Value>, StorageError>;
}

/// Folds `load_statuses`/`load_step_results`/`load_audits`/`load_globals`
/// plus `current_session` into the shape the executor's restart logic
/// (spec.md §4.1 step 3, §8 scenario 5) actually wants.
#[derive(Debug, Clone, Default)]
pub struct RestartData {
    pub statuses: IndexMap<String, StatusRecord>,
    pub results: IndexMap<(String, String), ResultRecord>,
    pub globals: IndexMap<String, Value>,
}

/// Loads everything needed to resume `session_id`, already deduplicated by
/// max-`run_id`-wins (§4.7). `store` implementations already dedupe inside
/// `load_*`, so this just indexes the results for fast lookup.
pub fn load_restart_data(
    store: &dyn SessionStore,
    session_id: &str,
) -> Result<RestartData, StorageError> {
    let mut statuses = IndexMap::new();
    for record in store.load_statuses(session_id)? {
        statuses.insert(record.result_key.clone(), record);
    }
    let mut results = IndexMap::new();
    for record in store.load_step_results(session_id)? {
        results.insert((record.result_key.clone(), record.name.clone()), record);
    }
    let globals = store.load_globals(session_id)?;
    Ok(RestartData {
        statuses,
        results,
        globals,
    })
}

/// Converts a persisted `StatusRecord`'s `result_key` back into a
/// [`StateKey`] for comparison against a live pipeline's step ids. Only
/// meaningful for non-fork, non-nested keys produced at the pipeline's own
/// top level — restart resumes at an ordinary step, never mid-fork
/// (spec.md open question (a)).
pub fn step_id_from_result_key(result_key: &str) -> Option<&str> {
    result_key.rsplit('.').next()
}

pub(crate) fn audit_type_str(audit_type: AuditType) -> &'static str {
    match audit_type {
        AuditType::Pipeline => "PIPELINE",
        AuditType::Step => "STEP",
        AuditType::Fork => "FORK",
        AuditType::Split => "SPLIT",
        AuditType::StepGroup => "STEP_GROUP",
    }
}
