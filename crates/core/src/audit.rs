// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-state timing and metrics (§4.6 Audit Ledger).

use crate::state_key::StateKey;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What kind of execution point an [`ExecutionAudit`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditType {
    Pipeline,
    Step,
    Fork,
    Split,
    StepGroup,
}

/// A single timing/metrics record for one [`StateKey`] (§3 "ExecutionAudit").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionAudit {
    pub key: StateKey,
    pub audit_type: AuditType,
    pub start: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<u64>,
    #[serde(default)]
    pub metrics: IndexMap<String, Value>,
}

impl ExecutionAudit {
    pub fn open(key: StateKey, audit_type: AuditType, start: u64) -> Self {
        Self {
            key,
            audit_type,
            start,
            end: None,
            metrics: IndexMap::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    pub fn duration(&self) -> Option<u64> {
        self.end.map(|end| end.saturating_sub(self.start))
    }

    /// Closes the audit by setting `end` and replacing its metrics.
    pub fn close(&mut self, end: u64, metrics: IndexMap<String, Value>) {
        self.end = Some(end);
        self.metrics = metrics;
    }
}

/// An ordered collection of audits, upserted by canonical key (§4.6, §4.8-2).
#[derive(Debug, Clone, Default)]
pub struct AuditLedger {
    entries: Vec<ExecutionAudit>,
}

impl AuditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(entries: Vec<ExecutionAudit>) -> Self {
        let mut ledger = Self::new();
        for entry in entries {
            ledger.upsert(entry);
        }
        ledger
    }

    /// Inserts `audit`, replacing any existing entry whose key's canonical
    /// encoding matches (latest wins on collision).
    pub fn upsert(&mut self, audit: ExecutionAudit) {
        let canonical = audit.key.canonical();
        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|a| a.key.canonical() == canonical)
        {
            *existing = audit;
        } else {
            self.entries.push(audit);
        }
    }

    pub fn find(&self, key: &StateKey) -> Option<&ExecutionAudit> {
        let canonical = key.canonical();
        self.entries.iter().find(|a| a.key.canonical() == canonical)
    }

    pub fn find_mut(&mut self, key: &StateKey) -> Option<&mut ExecutionAudit> {
        let canonical = key.canonical();
        self.entries
            .iter_mut()
            .find(|a| a.key.canonical() == canonical)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExecutionAudit> {
        self.entries.iter()
    }

    pub fn into_vec(self) -> Vec<ExecutionAudit> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Upserts every entry of `other` into `self`, by canonical key.
    pub fn merge(&mut self, other: &AuditLedger) {
        for audit in &other.entries {
            self.upsert(audit.clone());
        }
    }

    /// Closes every still-open audit with `end`, leaving their metrics
    /// untouched (spec.md §7: "close all open audits with `end=now`" when a
    /// step exception surfaces to the caller).
    pub fn close_all_open(&mut self, end: u64) {
        for audit in self.entries.iter_mut().filter(|a| a.is_open()) {
            audit.end = Some(end);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(id: &str) -> StateKey {
        StateKey::pipeline("p1").step(id)
    }

    #[test]
    fn open_audit_has_no_duration() {
        let audit = ExecutionAudit::open(key("A"), AuditType::Step, 100);
        assert!(audit.is_open());
        assert_eq!(audit.duration(), None);
    }

    #[test]
    fn closing_sets_duration() {
        let mut audit = ExecutionAudit::open(key("A"), AuditType::Step, 100);
        let mut metrics = IndexMap::new();
        metrics.insert("rows".to_string(), json!(10));
        audit.close(150, metrics);
        assert!(!audit.is_open());
        assert_eq!(audit.duration(), Some(50));
        assert_eq!(audit.metrics.get("rows"), Some(&json!(10)));
    }

    #[test]
    fn upsert_replaces_by_canonical_key() {
        let mut ledger = AuditLedger::new();
        ledger.upsert(ExecutionAudit::open(key("A"), AuditType::Step, 100));
        assert_eq!(ledger.len(), 1);

        let mut closed = ExecutionAudit::open(key("A"), AuditType::Step, 100);
        closed.close(200, IndexMap::new());
        ledger.upsert(closed);

        assert_eq!(ledger.len(), 1);
        assert!(!ledger.find(&key("A")).unwrap().is_open());
    }

    #[test]
    fn upsert_adds_distinct_keys() {
        let mut ledger = AuditLedger::new();
        ledger.upsert(ExecutionAudit::open(key("A"), AuditType::Step, 100));
        ledger.upsert(ExecutionAudit::open(key("B"), AuditType::Step, 100));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn merge_upserts_every_incoming_entry() {
        let mut existing = AuditLedger::new();
        existing.upsert(ExecutionAudit::open(key("A"), AuditType::Step, 100));

        let mut incoming = AuditLedger::new();
        let mut closed_a = ExecutionAudit::open(key("A"), AuditType::Step, 100);
        closed_a.close(150, IndexMap::new());
        incoming.upsert(closed_a);
        incoming.upsert(ExecutionAudit::open(key("B"), AuditType::Step, 200));

        existing.merge(&incoming);
        assert_eq!(existing.len(), 2);
        assert!(!existing.find(&key("A")).unwrap().is_open());
    }
}
