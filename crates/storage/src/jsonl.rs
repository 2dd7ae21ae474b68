// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable, append-only JSONL [`SessionStore`], grounded on the teacher's
//! group-commit WAL: each table is its own `<table>.jsonl` file under a
//! session-store root directory, one JSON object per line. Readers replay
//! the whole file and fold by `(key, run_id)` — max `run_id` wins (§4.7) —
//! so recovery after a crash never requires more than re-reading these
//! files.

use crate::session_store::{
    GlobalRecord, ResultRecord, SessionHistoryEntry, SessionStatus, SessionStore, StatusRecord,
    StorageError,
};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use sw_core::ExecutionAudit;
use tracing::debug;

const SESSIONS_FILE: &str = "sessions.jsonl";
const STATUS_FILE: &str = "step_status.jsonl";
const RESULTS_FILE: &str = "step_results.jsonl";
const AUDITS_FILE: &str = "audits.jsonl";
const GLOBALS_FILE: &str = "globals.jsonl";

/// Durable [`SessionStore`] persisting each logical table as its own
/// append-only JSONL file under `root`.
pub struct JsonlSessionStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlSessionStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn path(&self, file: &str) -> PathBuf {
        self.root.join(file)
    }

    fn append<T: Serialize>(&self, file: &str, record: &T) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock();
        let mut handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(file))?;
        let line = serde_json::to_string(record)?;
        writeln!(handle, "{line}")?;
        handle.flush()?;
        Ok(())
    }

    fn read_all<T: DeserializeOwned>(&self, file: &str) -> Result<Vec<T>, StorageError> {
        let path = self.path(file);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(path)?);
        let mut out = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(&line) {
                Ok(record) => out.push(record),
                Err(e) => debug!(error = %e, "skipping corrupt session-store record"),
            }
        }
        Ok(out)
    }
}

impl SessionStore for JsonlSessionStore {
    fn start_session(
        &self,
        session_id: &str,
        run_id: u64,
        start_ms: u64,
    ) -> Result<(), StorageError> {
        self.append(
            SESSIONS_FILE,
            &SessionHistoryEntry {
                session_id: session_id.to_string(),
                run_id,
                status: SessionStatus::Running,
                start: start_ms,
                end: None,
            },
        )
    }

    fn complete_session(
        &self,
        session_id: &str,
        end_ms: u64,
        status: SessionStatus,
    ) -> Result<(), StorageError> {
        let run_id = self
            .current_session(session_id)?
            .map(|e| e.run_id)
            .unwrap_or(0);
        self.append(
            SESSIONS_FILE,
            &SessionHistoryEntry {
                session_id: session_id.to_string(),
                run_id,
                status,
                start: self
                    .current_session(session_id)?
                    .map(|e| e.start)
                    .unwrap_or(end_ms),
                end: Some(end_ms),
            },
        )
    }

    fn session_history(&self, session_id: &str) -> Result<Vec<SessionHistoryEntry>, StorageError> {
        let all: Vec<SessionHistoryEntry> = self.read_all(SESSIONS_FILE)?;
        // Later rows for the same run_id amend earlier ones (start→complete).
        let mut by_run: IndexMap<u64, SessionHistoryEntry> = IndexMap::new();
        for entry in all.into_iter().filter(|e| e.session_id == session_id) {
            by_run.insert(entry.run_id, entry);
        }
        Ok(by_run.into_values().collect())
    }

    fn set_status(&self, record: StatusRecord) -> Result<(), StorageError> {
        self.append(STATUS_FILE, &record)
    }

    fn load_statuses(&self, session_id: &str) -> Result<Vec<StatusRecord>, StorageError> {
        let all: Vec<StatusRecord> = self.read_all(STATUS_FILE)?;
        let mut by_key: IndexMap<String, StatusRecord> = IndexMap::new();
        for record in all.into_iter().filter(|r| r.session_id == session_id) {
            match by_key.get(&record.result_key) {
                Some(existing) if existing.run_id > record.run_id => {}
                _ => {
                    by_key.insert(record.result_key.clone(), record);
                }
            }
        }
        Ok(by_key.into_values().collect())
    }

    fn save_step_result(&self, record: ResultRecord) -> Result<(), StorageError> {
        let existing = self.load_step_results(&record.session_id)?;
        if existing
            .iter()
            .any(|r| r.result_key == record.result_key && r.name == record.name && r.state == record.state)
        {
            return Ok(());
        }
        self.append(RESULTS_FILE, &record)
    }

    fn load_step_results(&self, session_id: &str) -> Result<Vec<ResultRecord>, StorageError> {
        let all: Vec<ResultRecord> = self.read_all(RESULTS_FILE)?;
        let mut by_key: IndexMap<(String, String), ResultRecord> = IndexMap::new();
        for record in all.into_iter().filter(|r| r.session_id == session_id) {
            let key = (record.result_key.clone(), record.name.clone());
            match by_key.get(&key) {
                Some(existing) if existing.run_id > record.run_id => {}
                _ => {
                    by_key.insert(key, record);
                }
            }
        }
        Ok(by_key.into_values().collect())
    }

    fn save_audit(
        &self,
        session_id: &str,
        run_id: u64,
        audit: &ExecutionAudit,
    ) -> Result<(), StorageError> {
        self.append(AUDITS_FILE, &(session_id.to_string(), run_id, audit.clone()))
    }

    fn load_audits(&self, session_id: &str) -> Result<Vec<ExecutionAudit>, StorageError> {
        let all: Vec<(String, u64, ExecutionAudit)> = self.read_all(AUDITS_FILE)?;
        let mut by_key: IndexMap<String, ExecutionAudit> = IndexMap::new();
        for (sid, _run_id, audit) in all.into_iter().filter(|(sid, _, _)| sid == session_id) {
            by_key.insert(audit.key.canonical(), audit);
            let _ = &sid;
        }
        Ok(by_key.into_values().collect())
    }

    fn save_global(&self, record: GlobalRecord) -> Result<(), StorageError> {
        self.append(GLOBALS_FILE, &record)
    }

    fn load_globals(&self, session_id: &str) -> Result<IndexMap<String, Value>, StorageError> {
        let all: Vec<GlobalRecord> = self.read_all(GLOBALS_FILE)?;
        let mut by_name: IndexMap<String, (u64, Value)> = IndexMap::new();
        for record in all.into_iter().filter(|r| r.session_id == session_id) {
            match by_name.get(&record.name) {
                Some((run_id, _)) if *run_id > record.run_id => {}
                _ => {
                    by_name.insert(record.name.clone(), (record.run_id, record.value));
                }
            }
        }
        Ok(by_name.into_iter().map(|(k, (_, v))| (k, v)).collect())
    }
}

pub fn default_root(base: &Path, session_id: &str) -> PathBuf {
    base.join(session_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sw_core::{AuditType, StateKey};
    use tempfile::tempdir;

    #[test]
    fn round_trips_step_results_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = JsonlSessionStore::open(dir.path()).unwrap();
            store
                .save_step_result(ResultRecord {
                    session_id: "s1".into(),
                    run_id: 1,
                    result_key: "p1.A".into(),
                    name: "primaryKey".into(),
                    converter: "json".into(),
                    state: serde_json::to_vec(&json!("RAW")).unwrap(),
                })
                .unwrap();
        }
        let store = JsonlSessionStore::open(dir.path()).unwrap();
        let results = store.load_step_results("s1").unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].result_key, "p1.A");
    }

    #[test]
    fn idempotent_write_of_identical_bytes_appends_nothing() {
        let dir = tempdir().unwrap();
        let store = JsonlSessionStore::open(dir.path()).unwrap();
        let record = ResultRecord {
            session_id: "s1".into(),
            run_id: 1,
            result_key: "p1.A".into(),
            name: "primaryKey".into(),
            converter: "json".into(),
            state: b"same".to_vec(),
        };
        store.save_step_result(record.clone()).unwrap();
        store.save_step_result(record).unwrap();
        let contents = std::fs::read_to_string(dir.path().join(RESULTS_FILE)).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[test]
    fn max_run_id_wins_across_reopen() {
        let dir = tempdir().unwrap();
        let store = JsonlSessionStore::open(dir.path()).unwrap();
        store
            .set_status(StatusRecord {
                session_id: "s1".into(),
                run_id: 0,
                result_key: "p1.A".into(),
                status: crate::session_store::StepStatus::Running,
                next_steps: vec![],
            })
            .unwrap();
        store
            .set_status(StatusRecord {
                session_id: "s1".into(),
                run_id: 1,
                result_key: "p1.A".into(),
                status: crate::session_store::StepStatus::Complete,
                next_steps: vec![],
            })
            .unwrap();
        let statuses = store.load_statuses("s1").unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].status, crate::session_store::StepStatus::Complete);
    }

    #[test]
    fn audits_persist_and_reload() {
        let dir = tempdir().unwrap();
        let store = JsonlSessionStore::open(dir.path()).unwrap();
        let key = StateKey::pipeline("p1").step("A");
        let mut audit = ExecutionAudit::open(key, AuditType::Step, 100);
        audit.close(150, Default::default());
        store.save_audit("s1", 1, &audit).unwrap();
        let loaded = store.load_audits("s1").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].duration(), Some(50));
    }
}
