// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step Invoker (C4, spec.md §4.4): dispatches a step's resolved parameters
//! to a native function or a scripted delegate and wraps whatever comes back
//! into a [`StepResponse`].

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use sw_core::{ExecutionContext, ExecutionError, OpaqueCause, StateKey, StepResponse};

/// `package` value that routes a step to a registered [`ScriptEngine`]
/// instead of the native registry; `object` then names the language.
pub const SCRIPT_PACKAGE: &str = "script";

/// What a step body handed back, before §4.4's wrapping rules apply.
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// Already shaped as a [`StepResponse`] — passed through unchanged.
    Response(StepResponse),
    /// `executeIfEmpty`/optional-style result: `Some(v)` becomes the primary
    /// return, `None` becomes an empty response.
    Optional(Option<Value>),
    /// A bare value, wrapped as the primary return.
    Value(Value),
}

impl StepOutcome {
    pub fn into_response(self) -> StepResponse {
        match self {
            StepOutcome::Response(r) => r,
            StepOutcome::Optional(Some(v)) => StepResponse::primary(v),
            StepOutcome::Optional(None) => StepResponse::empty(),
            StepOutcome::Value(v) => StepResponse::primary(v),
        }
    }
}

/// A native step implementation, looked up by `(package, object, function)`.
#[async_trait]
pub trait NativeStep: Send + Sync {
    async fn call(
        &self,
        args: Vec<Value>,
        ctx: &ExecutionContext,
    ) -> Result<StepOutcome, ExecutionError>;
}

/// Adapts a synchronous closure into a [`NativeStep`] — the common case for
/// builtin and test steps that don't need to `.await` anything themselves.
pub struct SyncNativeStep<F>(pub F)
where
    F: Fn(Vec<Value>, &ExecutionContext) -> Result<StepOutcome, ExecutionError> + Send + Sync;

#[async_trait]
impl<F> NativeStep for SyncNativeStep<F>
where
    F: Fn(Vec<Value>, &ExecutionContext) -> Result<StepOutcome, ExecutionError> + Send + Sync,
{
    async fn call(
        &self,
        args: Vec<Value>,
        ctx: &ExecutionContext,
    ) -> Result<StepOutcome, ExecutionError> {
        (self.0)(args, ctx)
    }
}

/// A scripted-language delegate, selected by the `object` field of a
/// `package = "script"` step (§4.4 "scripted delegation").
#[async_trait]
pub trait ScriptEngine: Send + Sync {
    fn language(&self) -> &str;

    async fn evaluate(
        &self,
        source: &str,
        bindings: IndexMap<String, Value>,
        ctx: &ExecutionContext,
    ) -> Result<StepOutcome, ExecutionError>;
}

/// Looks up native step implementations by `(package, object, function)` and
/// script engines by language name, then wraps whichever fires into a
/// [`StepResponse`] per §4.4's "already-StepResponse / optional / bare value"
/// rules.
#[derive(Default, Clone)]
pub struct StepInvoker {
    native: HashMap<(String, String, String), Arc<dyn NativeStep>>,
    scripts: HashMap<String, Arc<dyn ScriptEngine>>,
}

impl StepInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_native(
        &mut self,
        package: impl Into<String>,
        object: impl Into<String>,
        function: impl Into<String>,
        step: Arc<dyn NativeStep>,
    ) {
        self.native
            .insert((package.into(), object.into(), function.into()), step);
    }

    pub fn register_script_engine(&mut self, engine: Arc<dyn ScriptEngine>) {
        self.scripts.insert(engine.language().to_string(), engine);
    }

    /// Invokes a `Pipeline`-variant step's native function or, when
    /// `package == "script"`, the script engine named by `object`. All
    /// invocation exceptions that aren't already `Pause`/`SkipExecution` are
    /// wrapped as `StepInvocationFailure` (§4.4).
    pub async fn invoke(
        &self,
        key: &StateKey,
        package: &str,
        object: &str,
        function: &str,
        args: Vec<Value>,
        bindings: IndexMap<String, Value>,
        ctx: &ExecutionContext,
    ) -> Result<StepResponse, ExecutionError> {
        let outcome = if package == SCRIPT_PACKAGE {
            let engine = self
                .scripts
                .get(object)
                .cloned()
                .ok_or_else(|| unregistered(key, format!("no script engine registered for language '{object}'")))?;
            let source = args
                .first()
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            engine
                .evaluate(&source, bindings, ctx)
                .await
                .map_err(|e| ExecutionError::from_step_body(key, e))?
        } else {
            let step = self
                .native
                .get(&(package.to_string(), object.to_string(), function.to_string()))
                .cloned()
                .ok_or_else(|| {
                    unregistered(
                        key,
                        format!("no native step registered for {package}.{object}.{function}"),
                    )
                })?;
            step.call(args, ctx)
                .await
                .map_err(|e| ExecutionError::from_step_body(key, e))?
        };
        Ok(outcome.into_response())
    }
}

fn unregistered(key: &StateKey, message: String) -> ExecutionError {
    ExecutionError::StepInvocationFailure {
        key: key.canonical(),
        source: Box::new(OpaqueCause(message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sw_core::{Credential, CredentialProvider, EmptyPipelineRegistry, NoopListener};

    struct NoCreds;
    #[async_trait]
    impl CredentialProvider for NoCreds {
        async fn named_credential(&self, _name: &str) -> Option<Credential> {
            None
        }
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(Arc::new(NoopListener), Arc::new(EmptyPipelineRegistry), Arc::new(NoCreds))
    }

    fn key() -> StateKey {
        StateKey::pipeline("p1").step("A")
    }

    #[tokio::test]
    async fn invokes_registered_native_step_and_wraps_bare_value() {
        let mut invoker = StepInvoker::new();
        invoker.register_native(
            "pkg",
            "obj",
            "fn",
            Arc::new(SyncNativeStep(|args, _ctx| Ok(StepOutcome::Value(args[0].clone())))),
        );
        let response = invoker
            .invoke(&key(), "pkg", "obj", "fn", vec![Value::String("RAW".into())], IndexMap::new(), &ctx())
            .await
            .unwrap();
        assert_eq!(response.primary_return, Some(Value::String("RAW".into())));
    }

    #[tokio::test]
    async fn unregistered_native_step_fails_with_invocation_failure() {
        let invoker = StepInvoker::new();
        let err = invoker
            .invoke(&key(), "pkg", "obj", "fn", vec![], IndexMap::new(), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::StepInvocationFailure { .. }));
    }

    #[tokio::test]
    async fn pause_from_step_body_passes_through_unwrapped() {
        let mut invoker = StepInvoker::new();
        invoker.register_native(
            "pkg",
            "obj",
            "fn",
            Arc::new(SyncNativeStep(|_args, _ctx| {
                Err(ExecutionError::Pause("checkpoint".into()))
            })),
        );
        let err = invoker
            .invoke(&key(), "pkg", "obj", "fn", vec![], IndexMap::new(), &ctx())
            .await
            .unwrap_err();
        assert!(err.is_pause());
    }
}
