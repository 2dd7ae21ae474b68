// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory [`SessionStore`] for tests and ephemeral runs.

use crate::session_store::{
    GlobalRecord, ResultRecord, SessionHistoryEntry, SessionStatus, SessionStore, StatusRecord,
    StorageError,
};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;
use sw_core::ExecutionAudit;

#[derive(Default)]
struct Tables {
    history: Vec<SessionHistoryEntry>,
    /// Keyed by `(session_id, result_key)`, max `run_id` wins.
    statuses: IndexMap<(String, String), StatusRecord>,
    /// Keyed by `(session_id, result_key, name)`, max `run_id` wins.
    results: IndexMap<(String, String, String), ResultRecord>,
    /// Keyed by `(session_id, key.canonical())`, latest write wins.
    audits: IndexMap<(String, String), ExecutionAudit>,
    /// Keyed by `(session_id, name)`, max `run_id` wins.
    globals: IndexMap<(String, String), (u64, Value)>,
}

/// Ephemeral [`SessionStore`] backed by in-process maps behind a
/// [`parking_lot::Mutex`]. Loses all data when dropped.
#[derive(Default)]
pub struct InMemorySessionStore {
    tables: Mutex<Tables>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn start_session(
        &self,
        session_id: &str,
        run_id: u64,
        start_ms: u64,
    ) -> Result<(), StorageError> {
        self.tables.lock().history.push(SessionHistoryEntry {
            session_id: session_id.to_string(),
            run_id,
            status: SessionStatus::Running,
            start: start_ms,
            end: None,
        });
        Ok(())
    }

    fn complete_session(
        &self,
        session_id: &str,
        end_ms: u64,
        status: SessionStatus,
    ) -> Result<(), StorageError> {
        let mut tables = self.tables.lock();
        if let Some(entry) = tables
            .history
            .iter_mut()
            .filter(|e| e.session_id == session_id)
            .max_by_key(|e| e.run_id)
        {
            entry.status = status;
            entry.end = Some(end_ms);
        }
        Ok(())
    }

    fn session_history(&self, session_id: &str) -> Result<Vec<SessionHistoryEntry>, StorageError> {
        Ok(self
            .tables
            .lock()
            .history
            .iter()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect())
    }

    fn set_status(&self, record: StatusRecord) -> Result<(), StorageError> {
        let mut tables = self.tables.lock();
        let key = (record.session_id.clone(), record.result_key.clone());
        match tables.statuses.get(&key) {
            Some(existing) if existing.run_id > record.run_id => {}
            _ => {
                tables.statuses.insert(key, record);
            }
        }
        Ok(())
    }

    fn load_statuses(&self, session_id: &str) -> Result<Vec<StatusRecord>, StorageError> {
        Ok(self
            .tables
            .lock()
            .statuses
            .iter()
            .filter(|((sid, _), _)| sid == session_id)
            .map(|(_, record)| record.clone())
            .collect())
    }

    fn save_step_result(&self, record: ResultRecord) -> Result<(), StorageError> {
        let mut tables = self.tables.lock();
        let key = (
            record.session_id.clone(),
            record.result_key.clone(),
            record.name.clone(),
        );
        match tables.results.get(&key) {
            Some(existing) if existing.run_id > record.run_id => {}
            Some(existing) if existing.state == record.state => {}
            _ => {
                tables.results.insert(key, record);
            }
        }
        Ok(())
    }

    fn load_step_results(&self, session_id: &str) -> Result<Vec<ResultRecord>, StorageError> {
        Ok(self
            .tables
            .lock()
            .results
            .iter()
            .filter(|((sid, _, _), _)| sid == session_id)
            .map(|(_, record)| record.clone())
            .collect())
    }

    fn save_audit(
        &self,
        session_id: &str,
        _run_id: u64,
        audit: &ExecutionAudit,
    ) -> Result<(), StorageError> {
        self.tables.lock().audits.insert(
            (session_id.to_string(), audit.key.canonical()),
            audit.clone(),
        );
        Ok(())
    }

    fn load_audits(&self, session_id: &str) -> Result<Vec<ExecutionAudit>, StorageError> {
        Ok(self
            .tables
            .lock()
            .audits
            .iter()
            .filter(|((sid, _), _)| sid == session_id)
            .map(|(_, audit)| audit.clone())
            .collect())
    }

    fn save_global(&self, record: GlobalRecord) -> Result<(), StorageError> {
        let mut tables = self.tables.lock();
        let key = (record.session_id.clone(), record.name.clone());
        match tables.globals.get(&key) {
            Some((run_id, _)) if *run_id > record.run_id => {}
            _ => {
                tables.globals.insert(key, (record.run_id, record.value));
            }
        }
        Ok(())
    }

    fn load_globals(&self, session_id: &str) -> Result<IndexMap<String, Value>, StorageError> {
        Ok(self
            .tables
            .lock()
            .globals
            .iter()
            .filter(|((sid, _), _)| sid == session_id)
            .map(|((_, name), (_, value))| (name.clone(), value.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sw_core::{AuditType, StateKey};

    #[test]
    fn start_then_complete_session_updates_latest_history_row() {
        let store = InMemorySessionStore::new();
        store.start_session("s1", 1, 100).unwrap();
        store
            .complete_session("s1", 200, SessionStatus::Complete)
            .unwrap();
        let history = store.session_history("s1").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, SessionStatus::Complete);
        assert_eq!(history[0].duration(), Some(100));
    }

    #[test]
    fn restarting_a_session_adds_a_new_history_row() {
        let store = InMemorySessionStore::new();
        store.start_session("s1", 1, 100).unwrap();
        store
            .complete_session("s1", 150, SessionStatus::Error)
            .unwrap();
        store.start_session("s1", 2, 200).unwrap();
        let history = store.session_history("s1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(store.current_session("s1").unwrap().unwrap().run_id, 2);
    }

    #[test]
    fn max_run_id_wins_for_status() {
        let store = InMemorySessionStore::new();
        store
            .set_status(StatusRecord {
                session_id: "s1".into(),
                run_id: 1,
                result_key: "p1.A".into(),
                status: crate::session_store::StepStatus::Complete,
                next_steps: vec![],
            })
            .unwrap();
        store
            .set_status(StatusRecord {
                session_id: "s1".into(),
                run_id: 0,
                result_key: "p1.A".into(),
                status: crate::session_store::StepStatus::Error,
                next_steps: vec![],
            })
            .unwrap();
        let statuses = store.load_statuses("s1").unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].status, crate::session_store::StepStatus::Complete);
    }

    #[test]
    fn saving_identical_bytes_is_a_noop() {
        let store = InMemorySessionStore::new();
        let record = ResultRecord {
            session_id: "s1".into(),
            run_id: 1,
            result_key: "p1.A".into(),
            name: "primaryKey".into(),
            converter: "json".into(),
            state: b"same".to_vec(),
        };
        store.save_step_result(record.clone()).unwrap();
        let mut other_run = record.clone();
        other_run.run_id = 0;
        store.save_step_result(other_run).unwrap();
        let results = store.load_step_results("s1").unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].run_id, 1);
    }

    #[test]
    fn audits_upsert_by_canonical_key() {
        let store = InMemorySessionStore::new();
        let key = StateKey::pipeline("p1").step("A");
        store
            .save_audit("s1", 1, &ExecutionAudit::open(key.clone(), AuditType::Step, 100))
            .unwrap();
        let mut closed = ExecutionAudit::open(key, AuditType::Step, 100);
        closed.close(200, Default::default());
        store.save_audit("s1", 1, &closed).unwrap();
        let audits = store.load_audits("s1").unwrap();
        assert_eq!(audits.len(), 1);
        assert!(!audits[0].is_open());
    }

    #[test]
    fn globals_max_run_id_wins() {
        let store = InMemorySessionStore::new();
        store
            .save_global(GlobalRecord {
                session_id: "s1".into(),
                run_id: 2,
                name: "x".into(),
                value: json!(42),
            })
            .unwrap();
        store
            .save_global(GlobalRecord {
                session_id: "s1".into(),
                run_id: 1,
                name: "x".into(),
                value: json!(1),
            })
            .unwrap();
        let globals = store.load_globals("s1").unwrap();
        assert_eq!(globals.get("x"), Some(&json!(42)));
    }
}
