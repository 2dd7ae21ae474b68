// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Value-level façade over a raw [`SessionStore`]: converts [`StepResponse`]s
//! and globals to/from bytes via the [`ConverterRegistry`] so the executor
//! never sees converter names or byte buffers (spec.md §4.7's "selected
//! converter's name is stored alongside the bytes").

use crate::converter::ConverterRegistry;
use crate::session_store::{
    audit_type_str, load_restart_data, GlobalRecord, ResultRecord, RestartData, SessionStatus,
    SessionStore, StatusRecord, StepStatus, StorageError,
};
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;
use sw_core::{ExecutionAudit, StepResponse};
use tracing::warn;

const PRIMARY_KEY: &str = "primaryKey";

/// Combines a raw [`SessionStore`] with a [`ConverterRegistry`] to persist
/// and reload whole [`StepResponse`]s and globals, rather than raw bytes
/// (§4.7 Session Store Façade).
pub struct SessionStoreFacade {
    store: Arc<dyn SessionStore>,
    converters: ConverterRegistry,
}

impl SessionStoreFacade {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            converters: ConverterRegistry::new(),
        }
    }

    pub fn with_converters(mut self, converters: ConverterRegistry) -> Self {
        self.converters = converters;
        self
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn start_session(&self, session_id: &str, run_id: u64, start_ms: u64) -> Result<(), StorageError> {
        self.store.start_session(session_id, run_id, start_ms)
    }

    pub fn complete_session(
        &self,
        session_id: &str,
        end_ms: u64,
        status: SessionStatus,
    ) -> Result<(), StorageError> {
        self.store.complete_session(session_id, end_ms, status)
    }

    pub fn set_status(
        &self,
        session_id: &str,
        run_id: u64,
        result_key: &str,
        status: StepStatus,
        next_steps: Vec<String>,
    ) -> Result<(), StorageError> {
        self.store.set_status(StatusRecord {
            session_id: session_id.to_string(),
            run_id,
            result_key: result_key.to_string(),
            status,
            next_steps,
        })
    }

    /// Persists `response` at `result_key`. A value no registered converter
    /// accepts is logged as a warning and dropped — step execution is not
    /// blocked by an unpersistable result (§4.7).
    pub fn save_step_result(
        &self,
        session_id: &str,
        run_id: u64,
        result_key: &str,
        response: &StepResponse,
    ) -> Result<(), StorageError> {
        if let Some(primary) = &response.primary_return {
            self.save_named_value(session_id, run_id, result_key, PRIMARY_KEY, primary)?;
        }
        if let Some(named) = &response.named_returns {
            for (name, value) in named {
                self.save_named_value(session_id, run_id, result_key, name, value)?;
            }
        }
        Ok(())
    }

    fn save_named_value(
        &self,
        session_id: &str,
        run_id: u64,
        result_key: &str,
        name: &str,
        value: &Value,
    ) -> Result<(), StorageError> {
        match self.converters.serialize(value) {
            Ok((converter, state)) => self.store.save_step_result(ResultRecord {
                session_id: session_id.to_string(),
                run_id,
                result_key: result_key.to_string(),
                name: name.to_string(),
                converter,
                state,
            }),
            Err(e) => {
                warn!(result_key, name, error = %e, "dropping unpersistable step-result value");
                Ok(())
            }
        }
    }

    /// Reloads every step result for `session_id`, keyed by canonical
    /// `result_key`, folded back into [`StepResponse`]s.
    pub fn load_step_responses(
        &self,
        session_id: &str,
    ) -> Result<IndexMap<String, StepResponse>, StorageError> {
        let records = self.store.load_step_results(session_id)?;
        let mut by_key: IndexMap<String, StepResponse> = IndexMap::new();
        for record in records {
            let value = self.converters.deserialize(&record.converter, &record.state)?;
            let response = by_key.entry(record.result_key.clone()).or_default();
            if record.name == PRIMARY_KEY {
                response.primary_return = Some(value);
            } else {
                response
                    .named_returns
                    .get_or_insert_with(IndexMap::new)
                    .insert(record.name.clone(), value);
            }
        }
        Ok(by_key)
    }

    pub fn save_audit(&self, session_id: &str, run_id: u64, audit: &ExecutionAudit) -> Result<(), StorageError> {
        let _ = audit_type_str(audit.audit_type);
        self.store.save_audit(session_id, run_id, audit)
    }

    pub fn load_audits(&self, session_id: &str) -> Result<Vec<ExecutionAudit>, StorageError> {
        self.store.load_audits(session_id)
    }

    pub fn save_global(
        &self,
        session_id: &str,
        run_id: u64,
        name: &str,
        value: &Value,
    ) -> Result<(), StorageError> {
        self.store.save_global(GlobalRecord {
            session_id: session_id.to_string(),
            run_id,
            name: name.to_string(),
            value: value.clone(),
        })
    }

    pub fn load_globals(&self, session_id: &str) -> Result<IndexMap<String, Value>, StorageError> {
        self.store.load_globals(session_id)
    }

    /// Everything the executor's restart logic (spec.md §4.1 step 3) needs
    /// in one call: step statuses, step results (still raw, by key/name),
    /// and globals.
    pub fn restart_data(&self, session_id: &str) -> Result<RestartData, StorageError> {
        load_restart_data(self.store.as_ref(), session_id)
    }
}
