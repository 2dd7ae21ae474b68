// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle event fan-out (§4.5 Listener Bus).

use crate::context::ExecutionContext;
use crate::error::ExecutionError;
use crate::state_key::StateKey;
use async_trait::async_trait;

/// Observes pipeline/step lifecycle events. Every method but
/// `register_step_exception` may return a modified context; `None` means
/// "no change" (§4.5).
#[async_trait]
pub trait Listener: Send + Sync {
    async fn pipeline_started(&self, ctx: &ExecutionContext) -> Option<ExecutionContext> {
        let _ = ctx;
        None
    }

    async fn pipeline_finished(&self, ctx: &ExecutionContext) -> Option<ExecutionContext> {
        let _ = ctx;
        None
    }

    async fn pipeline_step_started(&self, ctx: &ExecutionContext) -> Option<ExecutionContext> {
        let _ = ctx;
        None
    }

    async fn pipeline_step_finished(&self, ctx: &ExecutionContext) -> Option<ExecutionContext> {
        let _ = ctx;
        None
    }

    async fn register_step_exception(&self, ctx: &ExecutionContext, key: &StateKey, error: &ExecutionError) {
        let _ = (ctx, key, error);
    }
}

/// A listener that observes nothing and changes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

#[async_trait]
impl Listener for NoopListener {}

/// Applies member listeners in declaration order, threading the context
/// forward so later listeners observe earlier listeners' edits (§4.5).
pub struct CompositeListener {
    members: Vec<std::sync::Arc<dyn Listener>>,
}

impl CompositeListener {
    pub fn new(members: Vec<std::sync::Arc<dyn Listener>>) -> Self {
        Self { members }
    }

    async fn fan_out_threaded<F, Fut>(&self, ctx: &ExecutionContext, call: F) -> Option<ExecutionContext>
    where
        F: Fn(std::sync::Arc<dyn Listener>, ExecutionContext) -> Fut,
        Fut: std::future::Future<Output = Option<ExecutionContext>>,
    {
        let mut current = ctx.clone();
        let mut changed = false;
        for member in &self.members {
            if let Some(next) = call(member.clone(), current.clone()).await {
                current = next;
                changed = true;
            }
        }
        changed.then_some(current)
    }
}

#[async_trait]
impl Listener for CompositeListener {
    async fn pipeline_started(&self, ctx: &ExecutionContext) -> Option<ExecutionContext> {
        self.fan_out_threaded(ctx, |m, c| async move { m.pipeline_started(&c).await })
            .await
    }

    async fn pipeline_finished(&self, ctx: &ExecutionContext) -> Option<ExecutionContext> {
        self.fan_out_threaded(ctx, |m, c| async move { m.pipeline_finished(&c).await })
            .await
    }

    async fn pipeline_step_started(&self, ctx: &ExecutionContext) -> Option<ExecutionContext> {
        self.fan_out_threaded(ctx, |m, c| async move { m.pipeline_step_started(&c).await })
            .await
    }

    async fn pipeline_step_finished(&self, ctx: &ExecutionContext) -> Option<ExecutionContext> {
        self.fan_out_threaded(ctx, |m, c| async move { m.pipeline_step_finished(&c).await })
            .await
    }

    async fn register_step_exception(&self, ctx: &ExecutionContext, key: &StateKey, error: &ExecutionError) {
        for member in &self.members {
            member.register_step_exception(ctx, key, error).await;
        }
    }
}
