// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Canonical hierarchical identity for any point in execution.
//!
//! A [`StateKey`] names a pipeline, optionally a step within it, optionally a
//! fork slot the step is running inside, and optionally a parent step-group
//! key when the pipeline itself was invoked as a nested step-group. Equality
//! and persistence both go through the canonical string encoding in
//! [`StateKey::canonical`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which slot of a fork a step is executing in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForkData {
    pub fork_id: String,
    pub index: usize,
    /// The list element this slot was assigned, serialized for persistence.
    pub value: serde_json::Value,
}

/// Canonical identifier for a position in a pipeline execution.
///
/// Two keys are equal iff their [`canonical`](StateKey::canonical) encodings
/// are equal; `forkData.value` does not participate in equality beyond what
/// the encoding captures (the encoded form carries `fork_id` and `index`
/// only — see [`StateKey::canonical`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateKey {
    pub pipeline_id: String,
    pub step_id: Option<String>,
    pub fork_data: Option<ForkData>,
    pub parent_group: Option<Box<StateKey>>,
}

impl StateKey {
    /// A bare pipeline-root key, used for the pipeline-level audit entry.
    pub fn pipeline(pipeline_id: impl Into<String>) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            step_id: None,
            fork_data: None,
            parent_group: None,
        }
    }

    /// A step key within the same pipeline as `self`.
    pub fn step(&self, step_id: impl Into<String>) -> Self {
        Self {
            pipeline_id: self.pipeline_id.clone(),
            step_id: Some(step_id.into()),
            fork_data: None,
            parent_group: self.parent_group.clone(),
        }
    }

    /// Builds a key for this step running inside fork slot `index` of `fork_id`.
    pub fn with_fork(&self, fork_id: impl Into<String>, index: usize, value: serde_json::Value) -> Self {
        Self {
            pipeline_id: self.pipeline_id.clone(),
            step_id: self.step_id.clone(),
            fork_data: Some(ForkData {
                fork_id: fork_id.into(),
                index,
                value,
            }),
            parent_group: self.parent_group.clone(),
        }
    }

    /// Wraps `self` as the parent group of a nested step-group pipeline key.
    pub fn enter_step_group(&self, nested_pipeline_id: impl Into<String>) -> Self {
        Self {
            pipeline_id: nested_pipeline_id.into(),
            step_id: None,
            fork_data: None,
            parent_group: Some(Box::new(self.clone())),
        }
    }

    /// The canonical string encoding:
    /// `<parent-key?>.<pipelineId>[.<stepId>][.f(<forkId>_<index>)]`
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        if let Some(parent) = &self.parent_group {
            out.push_str(&parent.canonical());
            out.push('.');
        }
        out.push_str(&self.pipeline_id);
        if let Some(step_id) = &self.step_id {
            out.push('.');
            out.push_str(step_id);
        }
        if let Some(fork) = &self.fork_data {
            out.push_str(&format!(".f({}_{})", fork.fork_id, fork.index));
        }
        out
    }

    /// Compares two keys ignoring `fork_data` — true when both name the same
    /// step of the same pipeline regardless of which fork slot.
    pub fn same_step(&self, other: &StateKey) -> bool {
        self.pipeline_id == other.pipeline_id
            && self.step_id == other.step_id
            && match (&self.parent_group, &other.parent_group) {
                (None, None) => true,
                (Some(a), Some(b)) => a.same_step(b),
                _ => false,
            }
    }

    /// True when `key`'s canonical encoding is `self`'s or a descendant of it
    /// (prefix relation on the canonical string, anchored at a `.` boundary).
    pub fn child_of(&self, key: &StateKey) -> bool {
        let parent = self.canonical();
        let child = key.canonical();
        child == parent || child.starts_with(&format!("{parent}."))
    }
}

impl PartialEq for StateKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for StateKey {}

impl std::hash::Hash for StateKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

#[cfg(test)]
#[path = "state_key_tests.rs"]
mod tests;
