// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Immutable execution-context snapshots and their merge operator (§3, §4.8).

use crate::audit::AuditLedger;
use crate::credential::CredentialProvider;
use crate::listener::Listener;
use crate::registry::PipelineRegistry;
use crate::response::StepResponse;
use crate::state_key::StateKey;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;

/// Reserved key inside `globals` holding the `GlobalLinks` submap (§3).
pub const GLOBAL_LINKS_KEY: &str = "GlobalLinks";

/// A named parameter mapping scoped to one pipeline invocation (`?name`
/// resolution target, §4.3).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineParameterSet {
    pub pipeline_key: String,
    pub values: IndexMap<String, Value>,
}

impl PipelineParameterSet {
    pub fn new(pipeline_key: impl Into<String>) -> Self {
        Self {
            pipeline_key: pipeline_key.into(),
            values: IndexMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.values.insert(name.into(), value);
        self
    }
}

/// An immutable snapshot of everything a step needs to resolve its
/// parameters and everything the executor needs to route and persist
/// (§3 "Execution Context"). Every mutating method returns a new snapshot;
/// the receiver remains valid and unchanged.
#[derive(Clone)]
pub struct ExecutionContext {
    globals: IndexMap<String, Value>,
    parameters: Vec<PipelineParameterSet>,
    step_results: IndexMap<String, (StateKey, StepResponse)>,
    audits: AuditLedger,
    current_state_info: Option<StateKey>,
    pub listener: Arc<dyn Listener>,
    pub pipeline_registry: Arc<dyn PipelineRegistry>,
    pub credentials: Arc<dyn CredentialProvider>,
}

impl ExecutionContext {
    pub fn new(
        listener: Arc<dyn Listener>,
        pipeline_registry: Arc<dyn PipelineRegistry>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            globals: IndexMap::new(),
            parameters: Vec::new(),
            step_results: IndexMap::new(),
            audits: AuditLedger::new(),
            current_state_info: None,
            listener,
            pipeline_registry,
            credentials,
        }
    }

    pub fn globals(&self) -> &IndexMap<String, Value> {
        &self.globals
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn global_link(&self, name: &str) -> Option<&str> {
        self.globals
            .get(GLOBAL_LINKS_KEY)
            .and_then(|v| v.as_object())
            .and_then(|m| m.get(name))
            .and_then(|v| v.as_str())
    }

    pub fn parameters(&self) -> &[PipelineParameterSet] {
        &self.parameters
    }

    /// The parameter set belonging to the pipeline that owns `pipeline_key`
    /// (matched on the bare pipeline id, so step-group nesting resolves
    /// `?name` against the innermost enclosing pipeline's own parameters).
    pub fn parameters_for(&self, pipeline_id: &str) -> Option<&PipelineParameterSet> {
        self.parameters
            .iter()
            .find(|p| p.pipeline_key == pipeline_id)
    }

    pub fn audits(&self) -> &AuditLedger {
        &self.audits
    }

    pub fn current_state_info(&self) -> Option<&StateKey> {
        self.current_state_info.as_ref()
    }

    pub fn step_result(&self, key: &StateKey) -> Option<&StepResponse> {
        self.step_results.get(&key.canonical()).map(|(_, r)| r)
    }

    pub fn step_results(&self) -> impl Iterator<Item = (&StateKey, &StepResponse)> {
        self.step_results.values().map(|(k, r)| (k, r))
    }

    /// All step results whose key names `step_id` as its step, ordered by
    /// fork slot index (`$stepId` fork-aware scan, §4.3).
    pub fn step_results_by_step_id(&self, step_id: &str) -> Vec<(&StateKey, &StepResponse)> {
        let mut matches: Vec<(&StateKey, &StepResponse)> = self
            .step_results
            .values()
            .filter(|(k, _)| k.step_id.as_deref() == Some(step_id))
            .map(|(k, r)| (k, r))
            .collect();
        matches.sort_by_key(|(k, _)| k.fork_data.as_ref().map(|f| f.index).unwrap_or(0));
        matches
    }

    pub fn with_current_state(&self, key: StateKey) -> Self {
        let mut next = self.clone();
        next.current_state_info = Some(key);
        next
    }

    pub fn with_global(&self, name: impl Into<String>, value: Value) -> Self {
        let mut next = self.clone();
        next.globals.insert(name.into(), value);
        next
    }

    pub fn with_global_link(&self, name: impl Into<String>, path: impl Into<String>) -> Self {
        let mut next = self.clone();
        let entry = next
            .globals
            .entry(GLOBAL_LINKS_KEY.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
        if let Some(map) = entry.as_object_mut() {
            map.insert(name.into(), Value::String(path.into()));
        }
        next
    }

    pub fn with_parameters(&self, params: PipelineParameterSet) -> Self {
        let mut next = self.clone();
        next.parameters.push(params);
        next
    }

    pub fn with_audit_ledger(&self, audits: AuditLedger) -> Self {
        let mut next = self.clone();
        next.audits = audits;
        next
    }

    /// Records `response` at `key`, then applies any `$globals.*` /
    /// `$globalLink.*` named-return entries to `globals` (§4.1-e).
    pub fn with_step_result(&self, key: StateKey, response: StepResponse) -> Self {
        let mut next = self.clone();
        let mutations = response.global_mutations();
        next.step_results
            .insert(key.canonical(), (key, response));
        for (name, value) in mutations.globals {
            next.globals.insert(name, value);
        }
        for (name, path) in mutations.global_links {
            let path_str = path.as_str().map(str::to_string).unwrap_or_else(|| path.to_string());
            let entry = next
                .globals
                .entry(GLOBAL_LINKS_KEY.to_string())
                .or_insert_with(|| Value::Object(Default::default()));
            if let Some(map) = entry.as_object_mut() {
                map.insert(name, Value::String(path_str));
            }
        }
        next
    }

    /// `merge(existing, incoming)` of §4.8: additive over step results and
    /// audits, keyed by canonical key; existing entries win, except that
    /// incoming global mutations still apply.
    pub fn merge(&self, incoming: &ExecutionContext) -> Self {
        let mut next = self.clone();
        for (canonical, (key, response)) in &incoming.step_results {
            if !next.step_results.contains_key(canonical) {
                next.step_results
                    .insert(canonical.clone(), (key.clone(), response.clone()));
                let mutations = response.global_mutations();
                for (name, value) in mutations.globals {
                    next.globals.insert(name, value);
                }
                for (name, path) in mutations.global_links {
                    let path_str = path.as_str().map(str::to_string).unwrap_or_else(|| path.to_string());
                    let entry = next
                        .globals
                        .entry(GLOBAL_LINKS_KEY.to_string())
                        .or_insert_with(|| Value::Object(Default::default()));
                    if let Some(map) = entry.as_object_mut() {
                        map.insert(name, Value::String(path_str));
                    }
                }
            }
        }
        next.audits.merge(&incoming.audits);
        next
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("globals", &self.globals)
            .field("parameters", &self.parameters)
            .field("step_results_len", &self.step_results.len())
            .field("audits_len", &self.audits.len())
            .field("current_state_info", &self.current_state_info)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditType, ExecutionAudit};
    use crate::credential::NoCredentialProvider;
    use crate::listener::NoopListener;
    use crate::registry::EmptyPipelineRegistry;
    use serde_json::json;

    fn fresh() -> ExecutionContext {
        ExecutionContext::new(
            Arc::new(NoopListener),
            Arc::new(EmptyPipelineRegistry),
            Arc::new(NoCredentialProvider),
        )
    }

    #[test]
    fn with_global_does_not_mutate_receiver() {
        let a = fresh();
        let b = a.with_global("x", json!(1));
        assert_eq!(a.global("x"), None);
        assert_eq!(b.global("x"), Some(&json!(1)));
    }

    #[test]
    fn step_result_applies_global_mutations() {
        let ctx = fresh();
        let response = StepResponse::empty().with_named("$globals.x", json!(42));
        let key = StateKey::pipeline("p1").step("A");
        let ctx2 = ctx.with_step_result(key.clone(), response);
        assert_eq!(ctx2.global("x"), Some(&json!(42)));
        assert_eq!(ctx2.step_result(&key).unwrap().primary_return, None);
    }

    #[test]
    fn step_result_applies_global_link_mutations() {
        let ctx = fresh();
        let response = StepResponse::empty().with_named("$globalLink.y", json!("data.path"));
        let key = StateKey::pipeline("p1").step("A");
        let ctx2 = ctx.with_step_result(key, response);
        assert_eq!(ctx2.global_link("y"), Some("data.path"));
    }

    #[test]
    fn step_results_by_step_id_orders_by_fork_index() {
        let ctx = fresh();
        let base = StateKey::pipeline("p1").step("S");
        let ctx = ctx.with_step_result(
            base.with_fork("fk", 2, json!(2)),
            StepResponse::primary(json!(20)),
        );
        let ctx = ctx.with_step_result(
            base.with_fork("fk", 0, json!(0)),
            StepResponse::primary(json!(0)),
        );
        let ctx = ctx.with_step_result(
            base.with_fork("fk", 1, json!(1)),
            StepResponse::primary(json!(10)),
        );
        let results = ctx.step_results_by_step_id("S");
        let values: Vec<_> = results
            .iter()
            .map(|(_, r)| r.primary_return.clone().unwrap())
            .collect();
        assert_eq!(values, vec![json!(0), json!(10), json!(20)]);
    }

    #[test]
    fn merge_is_additive_and_existing_wins() {
        let base = fresh();
        let key_a = StateKey::pipeline("p1").step("A");
        let existing = base
            .clone()
            .with_step_result(key_a.clone(), StepResponse::primary(json!("existing")));

        let key_b = StateKey::pipeline("p1").step("B");
        let mut incoming = base
            .clone()
            .with_step_result(key_a.clone(), StepResponse::primary(json!("incoming-should-not-win")));
        incoming = incoming.with_step_result(key_b.clone(), StepResponse::primary(json!("new")));

        let merged = existing.merge(&incoming);
        assert_eq!(
            merged.step_result(&key_a).unwrap().primary_return,
            Some(json!("existing"))
        );
        assert_eq!(
            merged.step_result(&key_b).unwrap().primary_return,
            Some(json!("new"))
        );
    }

    #[test]
    fn merge_is_idempotent_p2() {
        let ctx = fresh().with_step_result(
            StateKey::pipeline("p1").step("A"),
            StepResponse::primary(json!(1)),
        );
        let merged = ctx.merge(&ctx.clone());
        assert_eq!(merged.step_results.len(), ctx.step_results.len());
        for (k, v) in &ctx.step_results {
            assert_eq!(merged.step_results.get(k), Some(v));
        }
        assert_eq!(merged.globals, ctx.globals);
    }

    #[test]
    fn merge_upserts_audits_by_canonical_key() {
        let base = fresh();
        let key = StateKey::pipeline("p1").step("A");
        let existing = base
            .clone()
            .with_audit_ledger(AuditLedger::from_vec(vec![ExecutionAudit::open(
                key.clone(),
                AuditType::Step,
                100,
            )]));

        let mut closed = ExecutionAudit::open(key.clone(), AuditType::Step, 100);
        closed.close(150, IndexMap::new());
        let incoming = base.with_audit_ledger(AuditLedger::from_vec(vec![closed]));

        let merged = existing.merge(&incoming);
        assert_eq!(merged.audits().len(), 1);
        assert!(!merged.audits().find(&key).unwrap().is_open());
    }

    #[test]
    fn merge_preserves_collaborators_from_existing() {
        let existing = fresh();
        let incoming = fresh();
        let merged = existing.merge(&incoming);
        // collaborators are Arc clones from `existing`; this just exercises
        // that merge doesn't panic when pulling them through.
        assert!(Arc::ptr_eq(&merged.listener, &existing.listener));
    }
}
