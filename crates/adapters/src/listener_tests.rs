// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::sync::Arc;
use sw_core::{EmptyPipelineRegistry, ExecutionContext, NoCredentialProvider};

fn fresh_ctx() -> ExecutionContext {
    ExecutionContext::new(
        Arc::new(TracingListener),
        Arc::new(EmptyPipelineRegistry),
        Arc::new(NoCredentialProvider),
    )
}

#[tokio::test]
async fn tracing_listener_never_edits_the_context() {
    let listener = TracingListener;
    let ctx = fresh_ctx();
    assert!(listener.pipeline_started(&ctx).await.is_none());
    assert!(listener.pipeline_step_started(&ctx).await.is_none());
    assert!(listener.pipeline_step_finished(&ctx).await.is_none());
    assert!(listener.pipeline_finished(&ctx).await.is_none());
}

#[tokio::test]
async fn fake_listener_records_calls_in_order() {
    let listener = FakeListener::new();
    let ctx = fresh_ctx();
    listener.pipeline_started(&ctx).await;
    listener.pipeline_step_started(&ctx).await;
    listener.pipeline_step_finished(&ctx).await;
    listener.pipeline_finished(&ctx).await;

    let calls = listener.calls();
    assert_eq!(
        calls,
        vec![
            ListenerCall::PipelineStarted,
            ListenerCall::StepStarted,
            ListenerCall::StepFinished,
            ListenerCall::PipelineFinished,
        ]
    );
}

#[tokio::test]
async fn fake_listener_records_step_exceptions() {
    let listener = FakeListener::new();
    let ctx = fresh_ctx();
    let key = sw_core::StateKey::pipeline("p1").step("A");
    let error = sw_core::ExecutionError::PipelineNotFound;
    listener.register_step_exception(&ctx, &key, &error).await;

    let calls = listener.calls();
    assert_eq!(calls.len(), 1);
    assert!(matches!(&calls[0], ListenerCall::StepException { key: k, .. } if k == &key.canonical()));
}
