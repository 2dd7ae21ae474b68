// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `Listener` implementations for observability and tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use sw_core::{ExecutionContext, ExecutionError, Listener, StateKey};
use tracing::Instrument;

/// Emits a tracing span per pipeline run and logs step boundaries and
/// exceptions. Never edits the context.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingListener;

#[async_trait]
impl Listener for TracingListener {
    async fn pipeline_started(&self, ctx: &ExecutionContext) -> Option<ExecutionContext> {
        let key = ctx.current_state_info();
        tracing::info!(pipeline = ?key.map(StateKey::canonical), "pipeline started");
        None
    }

    async fn pipeline_finished(&self, ctx: &ExecutionContext) -> Option<ExecutionContext> {
        let key = ctx.current_state_info();
        tracing::info!(pipeline = ?key.map(StateKey::canonical), "pipeline finished");
        None
    }

    async fn pipeline_step_started(&self, ctx: &ExecutionContext) -> Option<ExecutionContext> {
        let key = ctx.current_state_info();
        async {
            tracing::debug!("step started");
        }
        .instrument(tracing::debug_span!(
            "step",
            key = ?key.map(StateKey::canonical)
        ))
        .await;
        None
    }

    async fn pipeline_step_finished(&self, ctx: &ExecutionContext) -> Option<ExecutionContext> {
        let key = ctx.current_state_info();
        tracing::debug!(key = ?key.map(StateKey::canonical), "step finished");
        None
    }

    async fn register_step_exception(&self, _ctx: &ExecutionContext, key: &StateKey, error: &ExecutionError) {
        tracing::warn!(key = %key.canonical(), error = %error, "step raised an exception");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerCall {
    PipelineStarted,
    PipelineFinished,
    StepStarted,
    StepFinished,
    StepException { key: String, error: String },
}

/// Records every call it receives without editing the context. Useful for
/// asserting on listener fan-out order in executor tests.
#[derive(Default)]
pub struct FakeListener {
    calls: Mutex<Vec<ListenerCall>>,
}

impl FakeListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ListenerCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Listener for FakeListener {
    async fn pipeline_started(&self, _ctx: &ExecutionContext) -> Option<ExecutionContext> {
        self.calls.lock().push(ListenerCall::PipelineStarted);
        None
    }

    async fn pipeline_finished(&self, _ctx: &ExecutionContext) -> Option<ExecutionContext> {
        self.calls.lock().push(ListenerCall::PipelineFinished);
        None
    }

    async fn pipeline_step_started(&self, _ctx: &ExecutionContext) -> Option<ExecutionContext> {
        self.calls.lock().push(ListenerCall::StepStarted);
        None
    }

    async fn pipeline_step_finished(&self, _ctx: &ExecutionContext) -> Option<ExecutionContext> {
        self.calls.lock().push(ListenerCall::StepFinished);
        None
    }

    async fn register_step_exception(&self, _ctx: &ExecutionContext, key: &StateKey, error: &ExecutionError) {
        self.calls.lock().push(ListenerCall::StepException {
            key: key.canonical(),
            error: error.to_string(),
        });
    }
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
