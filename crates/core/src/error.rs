// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error kinds for parameter resolution and step execution (spec §7).
//!
//! `PauseException` and `SkipExecutionPipelineStepException` are ordinary
//! variants rather than a side out-of-band signal: the step loop matches on
//! them explicitly before considering retry or `nextStepOnError`, exactly as
//! spec.md §4.1-f/g require.

use crate::state_key::StateKey;
use thiserror::Error;

/// Errors raised while resolving a step's parameters (C3) or while running
/// a step's body (C4), and the two non-error control signals a step body may
/// raise.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("required parameter missing: {0}")]
    ParameterMissing(String),

    #[error("parameter '{name}' could not be coerced to {expected}: {value}")]
    ParameterTypeError {
        name: String,
        expected: String,
        value: String,
    },

    #[error("step invocation failed at {key}: {source}")]
    StepInvocationFailure {
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("branch step '{step_id}' returned '{returned}' which matches no outgoing edge")]
    BranchNoMatch { step_id: String, returned: String },

    #[error("pipeline '{0}' not found")]
    PipelineNotFound(String),

    #[error("required parameter for pipeline input '{0}' missing and no alternate satisfied it")]
    RequiredParameterMissing(String),

    #[error("fork step '{fork_id}' failed: all {total} slots failed")]
    ForkedPipelineStepException {
        fork_id: String,
        total: usize,
        failures: Vec<(usize, String)>,
    },

    #[error("split step '{split_id}' failed: all {total} branches failed")]
    SplitStepException {
        split_id: String,
        total: usize,
        failures: Vec<(String, String)>,
    },

    /// Orderly suspension requested by a step body. Not a failure: the
    /// executor returns `paused = true` when it sees this.
    #[error("pipeline paused: {0}")]
    Pause(String),

    /// Step body asked to be skipped; execution continues at `next` without
    /// storing a response at this step's key.
    #[error("step skipped")]
    SkipExecution,

    #[error("fork '{0}' has no reachable join")]
    MissingJoin(String),

    #[error("split '{0}' has no reachable merge")]
    MissingMerge(String),
}

impl ExecutionError {
    pub fn is_pause(&self) -> bool {
        matches!(self, ExecutionError::Pause(_))
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, ExecutionError::SkipExecution)
    }

    /// Wrap an arbitrary step-body error as a [`ExecutionError::StepInvocationFailure`],
    /// passing `Pause`/`SkipExecution` through unchanged (spec.md §4.1-d: retry
    /// excludes these two).
    pub fn from_step_body(key: &StateKey, err: ExecutionError) -> ExecutionError {
        match err {
            ExecutionError::Pause(_) | ExecutionError::SkipExecution => err,
            other => ExecutionError::StepInvocationFailure {
                key: key.canonical(),
                source: Box::new(OpaqueCause(other.to_string())),
            },
        }
    }
}

/// Flattened cause used when re-wrapping an error whose original source type
/// would otherwise have to be erased twice.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct OpaqueCause(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_and_skip_are_recognized() {
        assert!(ExecutionError::Pause("checkpoint".into()).is_pause());
        assert!(ExecutionError::SkipExecution.is_skip());
        assert!(!ExecutionError::BranchNoMatch {
            step_id: "A".into(),
            returned: "X".into()
        }
        .is_pause());
    }

    #[test]
    fn from_step_body_passes_through_pause() {
        let key = StateKey::pipeline("p1").step("A");
        let err = ExecutionError::from_step_body(&key, ExecutionError::Pause("x".into()));
        assert!(err.is_pause());
    }

    #[test]
    fn from_step_body_wraps_other_errors() {
        let key = StateKey::pipeline("p1").step("A");
        let err = ExecutionError::from_step_body(
            &key,
            ExecutionError::BranchNoMatch {
                step_id: "A".into(),
                returned: "X".into(),
            },
        );
        assert!(matches!(err, ExecutionError::StepInvocationFailure { .. }));
    }
}
