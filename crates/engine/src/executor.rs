// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pipeline Executor (C8, spec.md §4.1): the step loop that drives a
//! [`Pipeline`] from its first (or restart) step to completion, routing
//! between steps, retrying failed invocations, and persisting as it goes.

use crate::config::ExecutorConfig;
use crate::error::EngineError;
use crate::fork_split::{self, ForkRunOutcome};
use crate::invoker::StepInvoker;
use crate::restart;
use crate::retry::backoff_delay;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use sw_core::{
    AuditType, Clock, ExecutionAudit, ExecutionContext, ExecutionError, FlowStep, Parameter,
    ParameterMapper, ParameterType, Pipeline, StateKey, StepCommon, StepResponse,
};
use sw_storage::{SessionStatus, SessionStoreFacade, StepStatus};

use crate::id_factory::IdFactory;

/// Ties an execution to a persisted session. Absent when the caller doesn't
/// want persistence for this run (spec.md §4.7 is opt-in at the executor).
#[derive(Debug, Clone)]
pub struct SessionRef {
    pub session_id: String,
    pub run_id: u64,
}

/// Final disposition of a completed (non-paused) run (spec.md §3 "RunStatus").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Run,
    Skip,
    Stop,
}

/// What [`PipelineExecutor::execute`] hands back.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub context: ExecutionContext,
    pub success: bool,
    pub paused: bool,
    pub error: Option<String>,
    pub run_status: RunStatus,
}

/// Which fork slot (or split branch) a step is currently executing in, if
/// any — threaded through [`PipelineExecutor::run_steps`] so nested step
/// keys pick up the right `forkData` (spec.md §3 invariant 2).
#[derive(Debug, Clone)]
pub(crate) struct ForkSlot {
    pub fork_id: String,
    pub index: usize,
    pub value: Value,
}

/// Where a bounded recursive step loop (top-level pipeline, step-group,
/// fork slot, split branch) landed.
pub(crate) enum StepLoopOutcome {
    Done(ExecutionContext, RunStatus),
    Paused(ExecutionContext),
    Failed(ExecutionContext, ExecutionError),
}

enum StepGroupOutcome {
    Paused(ExecutionContext),
    Done(ExecutionContext, StepResponse),
    Failed(ExecutionContext, ExecutionError),
}

/// Drives [`Pipeline`]s to completion: resolves restart points, validates
/// required inputs, invokes steps (with retry), routes Branch/Fork/Split/
/// StepGroup steps, and persists as it goes when a [`SessionStoreFacade`] is
/// attached (spec.md §4.1, §4.7, §4.9).
pub struct PipelineExecutor {
    invoker: Arc<StepInvoker>,
    mapper: ParameterMapper,
    config: ExecutorConfig,
    clock: Arc<dyn Clock>,
    id_factory: IdFactory,
    store: Option<Arc<SessionStoreFacade>>,
}

impl PipelineExecutor {
    pub fn new(invoker: Arc<StepInvoker>, config: ExecutorConfig, clock: Arc<dyn Clock>, id_factory: IdFactory) -> Self {
        Self {
            invoker,
            mapper: ParameterMapper::new(),
            config,
            clock,
            id_factory,
            store: None,
        }
    }

    pub fn with_session_store(mut self, store: Arc<SessionStoreFacade>) -> Self {
        self.store = Some(store);
        self
    }

    pub(crate) fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Runs `pipeline` to completion (or pause). `session` opts this run
    /// into session persistence; pass `None` for an in-memory-only run.
    pub async fn execute(
        &self,
        pipeline: &Pipeline,
        ctx: ExecutionContext,
        session: Option<SessionRef>,
    ) -> Result<ExecutionResult, EngineError> {
        let start_ms = self.clock.epoch_ms();
        if let (Some(store), Some(sess)) = (&self.store, &session) {
            store.start_session(&sess.session_id, sess.run_id, start_ms)?;
        }

        let root_key = StateKey::pipeline(&pipeline.id);
        let outcome = self.execute_pipeline(pipeline, root_key, ctx, session.as_ref()).await?;

        let (result, status) = match outcome {
            StepLoopOutcome::Done(ctx, run_status) => (
                ExecutionResult {
                    context: ctx,
                    success: true,
                    paused: false,
                    error: None,
                    run_status,
                },
                SessionStatus::Complete,
            ),
            StepLoopOutcome::Paused(ctx) => (
                ExecutionResult {
                    context: ctx,
                    success: true,
                    paused: true,
                    error: None,
                    run_status: RunStatus::Run,
                },
                SessionStatus::Paused,
            ),
            StepLoopOutcome::Failed(ctx, err) => (
                ExecutionResult {
                    context: ctx,
                    success: false,
                    paused: false,
                    error: Some(err.to_string()),
                    run_status: RunStatus::Run,
                },
                SessionStatus::Error,
            ),
        };

        if let (Some(store), Some(sess)) = (&self.store, &session) {
            store.complete_session(&sess.session_id, self.clock.epoch_ms(), status)?;
        }
        Ok(result)
    }

    /// The pipeline-level wrapper: opens/closes the pipeline audit, fires
    /// `pipelineStarted`/`pipelineFinished`, validates required inputs,
    /// resolves the restart point, and hands the rest to [`Self::run_steps`].
    /// Recursive through step-groups, so it returns a boxed future.
    fn execute_pipeline<'a>(
        &'a self,
        pipeline: &'a Pipeline,
        root_key: StateKey,
        ctx: ExecutionContext,
        session: Option<&'a SessionRef>,
    ) -> BoxFuture<'a, Result<StepLoopOutcome, EngineError>> {
        Box::pin(async move {
            let listener = ctx.listener.clone();
            let mut ctx = listener.pipeline_started(&ctx).await.unwrap_or(ctx);

            let now = self.clock.epoch_ms();
            let mut audits = ctx.audits().clone();
            audits.upsert(ExecutionAudit::open(root_key.clone(), AuditType::Pipeline, now));
            ctx = ctx.with_audit_ledger(audits);

            let outcome = match validate_inputs(pipeline, &ctx) {
                Err(e) => StepLoopOutcome::Failed(ctx, e),
                Ok(()) => {
                    let (ctx, start_id) = self.compute_start(pipeline, &root_key, ctx, session).await?;
                    self.run_steps(
                        &pipeline.id,
                        &pipeline.steps,
                        start_id,
                        None,
                        &root_key,
                        None,
                        ctx,
                        session,
                    )
                    .await?
                }
            };

            self.finish_pipeline(&root_key, outcome, session).await
        })
    }

    async fn compute_start(
        &self,
        pipeline: &Pipeline,
        root_key: &StateKey,
        mut ctx: ExecutionContext,
        session: Option<&SessionRef>,
    ) -> Result<(ExecutionContext, Option<String>), EngineError> {
        let mut start_id = pipeline.first_step().map(|s| s.id().to_string());
        if root_key.parent_group.is_none() {
            if let (Some(store), Some(sess)) = (&self.store, session) {
                let restart_data = store.restart_data(&sess.session_id)?;
                if !restart_data.statuses.is_empty() {
                    let step_responses = store.load_step_responses(&sess.session_id)?;
                    let plan = restart::compute_restart(pipeline, &restart_data.statuses, &step_responses);
                    for (key, response) in plan.hydrated_results {
                        ctx = ctx.with_step_result(key, response);
                    }
                    start_id = pipeline.steps.get(plan.start_index).map(|s| s.id().to_string());
                }
            }
        }
        Ok((ctx, start_id))
    }

    async fn finish_pipeline(
        &self,
        root_key: &StateKey,
        outcome: StepLoopOutcome,
        session: Option<&SessionRef>,
    ) -> Result<StepLoopOutcome, EngineError> {
        let now = self.clock.epoch_ms();
        let outcome = match outcome {
            StepLoopOutcome::Done(ctx, status) => {
                let mut audits = ctx.audits().clone();
                if let Some(a) = audits.find_mut(root_key) {
                    if a.is_open() {
                        a.close(now, Default::default());
                    }
                }
                let ctx = ctx.with_audit_ledger(audits);
                let listener = ctx.listener.clone();
                let ctx = listener.pipeline_finished(&ctx).await.unwrap_or(ctx);
                StepLoopOutcome::Done(ctx, status)
            }
            StepLoopOutcome::Paused(ctx) => {
                let mut audits = ctx.audits().clone();
                if let Some(a) = audits.find_mut(root_key) {
                    if a.is_open() {
                        a.close(now, Default::default());
                    }
                }
                StepLoopOutcome::Paused(ctx.with_audit_ledger(audits))
            }
            StepLoopOutcome::Failed(ctx, err) => {
                let mut audits = ctx.audits().clone();
                audits.close_all_open(now);
                let ctx = ctx.with_audit_ledger(audits);
                let listener = ctx.listener.clone();
                let ctx = listener.pipeline_finished(&ctx).await.unwrap_or(ctx);
                StepLoopOutcome::Failed(ctx, err)
            }
        };

        if let (Some(store), Some(sess)) = (&self.store, session) {
            let ctx = match &outcome {
                StepLoopOutcome::Done(ctx, _) | StepLoopOutcome::Paused(ctx) | StepLoopOutcome::Failed(ctx, _) => ctx,
            };
            if let Some(audit) = ctx.audits().find(root_key) {
                store.save_audit(&sess.session_id, sess.run_id, audit)?;
            }
        }
        Ok(outcome)
    }

    /// The id-routed step loop (spec.md §4.1 steps a-h). Shared by the
    /// top-level pipeline, fork slots, and split branches; `steps` is
    /// whichever flat step list is being walked, `stop_at` is the id to halt
    /// before (a Fork's Join), and `fork_slot` tags every constructed key
    /// when this call is running inside a fork/split.
    pub(crate) fn run_steps<'a>(
        &'a self,
        pipeline_id: &'a str,
        steps: &'a [FlowStep],
        start_id: Option<String>,
        stop_at: Option<&'a str>,
        key_base: &'a StateKey,
        fork_slot: Option<ForkSlot>,
        ctx: ExecutionContext,
        session: Option<&'a SessionRef>,
    ) -> BoxFuture<'a, Result<StepLoopOutcome, EngineError>> {
        Box::pin(async move {
            let mut ctx = ctx;
            let mut current_id = start_id;
            loop {
                let Some(id) = current_id else {
                    return Ok(StepLoopOutcome::Done(ctx, RunStatus::Run));
                };
                if stop_at == Some(id.as_str()) {
                    return Ok(StepLoopOutcome::Done(ctx, RunStatus::Run));
                }
                let Some(step) = step_by_id(steps, &id) else {
                    return Ok(StepLoopOutcome::Done(ctx, RunStatus::Run));
                };
                let common = step.common();
                let key = step_key(key_base, &id, &fork_slot);
                ctx = ctx.with_current_state(key.clone());

                let listener = ctx.listener.clone();
                ctx = listener.pipeline_step_started(&ctx).await.unwrap_or(ctx);
                let now = self.clock.epoch_ms();
                let mut audits = ctx.audits().clone();
                audits.upsert(ExecutionAudit::open(key.clone(), AuditType::Step, now));
                ctx = ctx.with_audit_ledger(audits);

                if let Some(expr) = &common.execute_if_empty {
                    if self.eval_bypass(&ctx, expr).await? {
                        let response = ctx.step_result(&key).cloned().unwrap_or_default();
                        let (c, next) = self
                            .finish_step_success(ctx, &key, response, common.next.clone(), session)
                            .await?;
                        ctx = c;
                        current_id = next;
                        continue;
                    }
                }

                match step {
                    FlowStep::Pipeline { common, package, object, function } => {
                        let (args, bindings) = match self.resolve_params(&ctx, &common.params).await {
                            Ok(r) => r,
                            Err(e) => {
                                match self.route_error(steps, &key, common, ctx, e, session).await? {
                                    RouteOutcome::Paused(c) => return Ok(StepLoopOutcome::Paused(c)),
                                    RouteOutcome::Continue(c, n) => {
                                        ctx = c;
                                        current_id = n;
                                        continue;
                                    }
                                    RouteOutcome::Fatal(c, e) => return Ok(StepLoopOutcome::Failed(c, e)),
                                }
                            }
                        };
                        let invoke_result = self
                            .with_retry(common.retry_limit, || {
                                self.invoker.invoke(&key, package, object, function, args.clone(), bindings.clone(), &ctx)
                            })
                            .await;
                        match invoke_result {
                            Ok(response) => {
                                let (c, n) = self
                                    .finish_step_success(ctx, &key, response, common.next.clone(), session)
                                    .await?;
                                ctx = c;
                                current_id = n;
                            }
                            Err(e) => match self.route_error(steps, &key, common, ctx, e, session).await? {
                                RouteOutcome::Paused(c) => return Ok(StepLoopOutcome::Paused(c)),
                                RouteOutcome::Continue(c, n) => {
                                    ctx = c;
                                    current_id = n;
                                }
                                RouteOutcome::Fatal(c, e) => return Ok(StepLoopOutcome::Failed(c, e)),
                            },
                        }
                    }
                    FlowStep::Branch { common } => match self.evaluate_branch(&ctx, common).await {
                        Ok((response, next)) => {
                            let (c, n) = self.finish_step_success(ctx, &key, response, Some(next), session).await?;
                            ctx = c;
                            current_id = n;
                        }
                        Err(e) => match self.route_error(steps, &key, common, ctx, e, session).await? {
                            RouteOutcome::Paused(c) => return Ok(StepLoopOutcome::Paused(c)),
                            RouteOutcome::Continue(c, n) => {
                                ctx = c;
                                current_id = n;
                            }
                            RouteOutcome::Fatal(c, e) => return Ok(StepLoopOutcome::Failed(c, e)),
                        },
                    },
                    FlowStep::StepGroup { common, pipeline_id: nested_id } => {
                        match self.execute_step_group(common, nested_id, &key, ctx, session).await? {
                            StepGroupOutcome::Paused(c) => return Ok(StepLoopOutcome::Paused(c)),
                            StepGroupOutcome::Done(c, response) => {
                                let (c, n) = self.finish_step_success(c, &key, response, common.next.clone(), session).await?;
                                ctx = c;
                                current_id = n;
                            }
                            StepGroupOutcome::Failed(c, e) => {
                                match self.route_error(steps, &key, common, c, e, session).await? {
                                    RouteOutcome::Paused(c) => return Ok(StepLoopOutcome::Paused(c)),
                                    RouteOutcome::Continue(c, n) => {
                                        ctx = c;
                                        current_id = n;
                                    }
                                    RouteOutcome::Fatal(c, e) => return Ok(StepLoopOutcome::Failed(c, e)),
                                }
                            }
                        }
                    }
                    FlowStep::Fork { common, fork_by_value, fork_method } => {
                        let idx = step_index(steps, &id).unwrap_or(0);
                        let join_idx = match matching_join(steps, idx) {
                            Some(j) => j,
                            None => return Ok(StepLoopOutcome::Failed(ctx, ExecutionError::MissingJoin(common.id.clone()))),
                        };
                        let join_step = &steps[join_idx];
                        let body_start = steps.get(idx + 1).map(|s| s.id().to_string());
                        let terminal_id = if join_idx > idx + 1 {
                            steps[join_idx - 1].id().to_string()
                        } else {
                            common.id.clone()
                        };
                        let list = match self.resolve_list(&ctx, fork_by_value).await {
                            Ok(v) => v,
                            Err(e) => return Ok(StepLoopOutcome::Failed(ctx, e)),
                        };
                        let fork_id = format!("{}#{}", common.id, self.id_factory.next());
                        match fork_split::run_fork(
                            self,
                            pipeline_id,
                            steps,
                            &fork_id,
                            *fork_method,
                            &list,
                            body_start.as_deref(),
                            &terminal_id,
                            join_step.id(),
                            key_base,
                            ctx,
                            session,
                        )
                        .await?
                        {
                            ForkRunOutcome::Paused(c) => return Ok(StepLoopOutcome::Paused(c)),
                            ForkRunOutcome::Completed { merged, response, all_failed: None } => {
                                let join_key = step_key(key_base, join_step.id(), &fork_slot);
                                let (c, _n) = self.finish_step_success(merged, &join_key, response, None, session).await?;
                                ctx = c;
                                current_id = steps.get(join_idx + 1).map(|s| s.id().to_string());
                            }
                            ForkRunOutcome::Completed { merged, all_failed: Some(err), .. } => {
                                match self.route_error(steps, &key, common, merged, err, session).await? {
                                    RouteOutcome::Paused(c) => return Ok(StepLoopOutcome::Paused(c)),
                                    RouteOutcome::Continue(c, n) => {
                                        ctx = c;
                                        current_id = n;
                                    }
                                    RouteOutcome::Fatal(c, e) => return Ok(StepLoopOutcome::Failed(c, e)),
                                }
                            }
                        }
                    }
                    FlowStep::Split { common, branches } => {
                        let idx = step_index(steps, &id).unwrap_or(0);
                        let merge_step = steps.get(idx + 1).filter(|s| matches!(s, FlowStep::Merge { .. }));
                        let Some(merge_step) = merge_step else {
                            return Ok(StepLoopOutcome::Failed(ctx, ExecutionError::MissingMerge(common.id.clone())));
                        };
                        match fork_split::run_split(self, pipeline_id, &common.id, branches, key_base, ctx, session).await? {
                            ForkRunOutcome::Paused(c) => return Ok(StepLoopOutcome::Paused(c)),
                            ForkRunOutcome::Completed { merged, response, all_failed: None } => {
                                let merge_key = step_key(key_base, merge_step.id(), &fork_slot);
                                let (c, _n) = self.finish_step_success(merged, &merge_key, response, None, session).await?;
                                ctx = c;
                                current_id = steps.get(idx + 2).map(|s| s.id().to_string());
                            }
                            ForkRunOutcome::Completed { merged, all_failed: Some(err), .. } => {
                                match self.route_error(steps, &key, common, merged, err, session).await? {
                                    RouteOutcome::Paused(c) => return Ok(StepLoopOutcome::Paused(c)),
                                    RouteOutcome::Continue(c, n) => {
                                        ctx = c;
                                        current_id = n;
                                    }
                                    RouteOutcome::Fatal(c, e) => return Ok(StepLoopOutcome::Failed(c, e)),
                                }
                            }
                        }
                    }
                    FlowStep::Join { .. } | FlowStep::Merge { .. } => {
                        current_id = common.next.clone();
                    }
                }
            }
        })
    }

    /// `executeIfEmpty`: resolves the bypass expression as a bare string
    /// parameter and treats anything but `Null`/`""` as "skip this step"
    /// (spec.md §4.1-b).
    async fn eval_bypass(&self, ctx: &ExecutionContext, expr: &str) -> Result<bool, EngineError> {
        let param = Parameter::expr("executeIfEmpty", ParameterType::Other(String::new()), expr.to_string());
        let value = self.mapper.resolve(ctx, &param).await.map_err(EngineError::Execution)?;
        Ok(!matches!(value, Value::Null) && !matches!(&value, Value::String(s) if s.is_empty()))
    }

    async fn resolve_params(
        &self,
        ctx: &ExecutionContext,
        params: &[Parameter],
    ) -> Result<(Vec<Value>, indexmap::IndexMap<String, Value>), ExecutionError> {
        let mut args = Vec::with_capacity(params.len());
        let mut bindings = indexmap::IndexMap::with_capacity(params.len());
        for param in params {
            let value = self.mapper.resolve(ctx, param).await?;
            bindings.insert(param.name.clone(), value.clone());
            args.push(value);
        }
        Ok((args, bindings))
    }

    async fn resolve_list(&self, ctx: &ExecutionContext, expr: &str) -> Result<Vec<Value>, ExecutionError> {
        let param = Parameter::expr("forkByValue", ParameterType::List, expr.to_string());
        match self.mapper.resolve(ctx, &param).await? {
            Value::Array(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            other => Err(ExecutionError::ParameterTypeError {
                name: "forkByValue".into(),
                expected: "list".into(),
                value: other.to_string(),
            }),
        }
    }

    /// A Branch step's primary return is the resolved value of its one
    /// non-`result`-typed parameter; every `result`-typed parameter is an
    /// outgoing edge, `name` the (case-insensitive) label and `value` the
    /// next step id (spec.md §4.1 "Branch step").
    async fn evaluate_branch(&self, ctx: &ExecutionContext, common: &StepCommon) -> Result<(StepResponse, String), ExecutionError> {
        let decision = common
            .params
            .iter()
            .find(|p| !matches!(p.param_type, ParameterType::Result))
            .ok_or_else(|| ExecutionError::BranchNoMatch {
                step_id: common.id.clone(),
                returned: String::new(),
            })?;
        let resolved = self.mapper.resolve(ctx, decision).await?;
        let returned = scalar_string(&resolved);
        for edge in common.params.iter().filter(|p| matches!(p.param_type, ParameterType::Result)) {
            if edge.name.eq_ignore_ascii_case(&returned) {
                let target = edge.value.as_str().unwrap_or_default().to_string();
                return Ok((StepResponse::primary(Value::String(returned)), target));
            }
        }
        Err(ExecutionError::BranchNoMatch { step_id: common.id.clone(), returned })
    }

    /// Resolves a step-group's params into the nested pipeline's parameter
    /// set, looks it up in the registry, and runs it with its own
    /// `retryLimit`-bounded retry loop (a nested-pipeline failure is "any
    /// other exception" from the step-group step's point of view).
    async fn execute_step_group(
        &self,
        common: &StepCommon,
        nested_id: &str,
        key: &StateKey,
        ctx: ExecutionContext,
        session: Option<&SessionRef>,
    ) -> Result<StepGroupOutcome, EngineError> {
        let nested = match ctx.pipeline_registry.get(nested_id) {
            Some(p) => p,
            None => return Ok(StepGroupOutcome::Failed(ctx, ExecutionError::PipelineNotFound(nested_id.to_string()))),
        };

        let mut params = sw_core::PipelineParameterSet::new(nested.id.clone());
        for p in &common.params {
            match self.mapper.resolve(&ctx, p).await {
                Ok(v) => {
                    params.values.insert(p.name.clone(), v);
                }
                Err(e) => return Ok(StepGroupOutcome::Failed(ctx, e)),
            }
        }

        let mut attempt = 0u32;
        loop {
            let child_ctx = ctx.with_parameters(params.clone());
            let child_root = key.enter_step_group(nested.id.clone());
            match self.execute_pipeline(&nested, child_root, child_ctx, session).await? {
                StepLoopOutcome::Paused(child_ctx) => {
                    return Ok(StepGroupOutcome::Paused(ctx.merge(&child_ctx)));
                }
                StepLoopOutcome::Done(child_ctx, _) => {
                    let merged = ctx.merge(&child_ctx);
                    let response = self.build_step_group_response(&nested, &merged).await.unwrap_or_default();
                    return Ok(StepGroupOutcome::Done(merged, response));
                }
                StepLoopOutcome::Failed(child_ctx, err) => {
                    let merged = ctx.merge(&child_ctx);
                    if attempt < common.retry_limit {
                        tracing::warn!(step = %common.id, attempt, error = %err, "retrying step-group after nested pipeline failure");
                        tokio::time::sleep(backoff_delay(&self.config, attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Ok(StepGroupOutcome::Failed(merged, err));
                }
            }
        }
    }

    /// Shapes a step-group's response from the nested pipeline's declared
    /// `output` mapping, if any; an empty response otherwise.
    async fn build_step_group_response(&self, nested: &Pipeline, ctx: &ExecutionContext) -> Result<StepResponse, ExecutionError> {
        match &nested.parameters.output {
            Some(mapping) => {
                let mut response = StepResponse::empty();
                for (name, expr) in mapping {
                    let param = Parameter::expr(name.clone(), ParameterType::Other(String::new()), expr.clone());
                    let value = self.mapper.resolve(ctx, &param).await?;
                    response = response.with_named(name.clone(), value);
                }
                Ok(response)
            }
            None => Ok(StepResponse::empty()),
        }
    }

    /// Retries `body` while it returns an ordinary error, up to
    /// `retry_limit` additional attempts with capped exponential backoff;
    /// `Pause`/`SkipExecution` short-circuit immediately (spec.md §4.1-d).
    async fn with_retry<T, F, Fut>(&self, retry_limit: u32, mut body: F) -> Result<T, ExecutionError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ExecutionError>>,
    {
        let mut attempt = 0u32;
        loop {
            match body().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_pause() || e.is_skip() => return Err(e),
                Err(e) if attempt < retry_limit => {
                    tracing::warn!(attempt, error = %e, "retrying step invocation after error");
                    tokio::time::sleep(backoff_delay(&self.config, attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Records `response` at `key`, closes the step's audit, fires
    /// `pipelineStepFinished`, and persists when a session is attached
    /// (spec.md §4.1-e).
    async fn finish_step_success(
        &self,
        ctx: ExecutionContext,
        key: &StateKey,
        response: StepResponse,
        next: Option<String>,
        session: Option<&SessionRef>,
    ) -> Result<(ExecutionContext, Option<String>), EngineError> {
        let now = self.clock.epoch_ms();
        let mut ctx = ctx.with_step_result(key.clone(), response.clone());
        let mut audits = ctx.audits().clone();
        if let Some(a) = audits.find_mut(key) {
            if a.is_open() {
                a.close(now, Default::default());
            }
        }
        ctx = ctx.with_audit_ledger(audits);
        let listener = ctx.listener.clone();
        ctx = listener.pipeline_step_finished(&ctx).await.unwrap_or(ctx);

        if let (Some(store), Some(sess)) = (&self.store, session) {
            let canonical = key.canonical();
            store.save_step_result(&sess.session_id, sess.run_id, &canonical, &response)?;
            store.set_status(&sess.session_id, sess.run_id, &canonical, StepStatus::Complete, vec![])?;
            if let Some(audit) = ctx.audits().find(key) {
                store.save_audit(&sess.session_id, sess.run_id, audit)?;
            }
            for (name, value) in response.global_mutations().globals {
                store.save_global(&sess.session_id, sess.run_id, &name, &value)?;
            }
        }
        Ok((ctx, next))
    }

    /// Pause/Skip/`nextStepOnError`/fatal routing for a step's error
    /// (spec.md §4.1 f/g/h). Pause and Skip are dispatched before this is
    /// reached for ordinary invoke errors, but Fork/Split/StepGroup failures
    /// funnel every case through here uniformly.
    async fn route_error(
        &self,
        steps: &[FlowStep],
        key: &StateKey,
        common: &StepCommon,
        mut ctx: ExecutionContext,
        err: ExecutionError,
        session: Option<&SessionRef>,
    ) -> Result<RouteOutcome, EngineError> {
        let now = self.clock.epoch_ms();

        if err.is_pause() {
            let listener = ctx.listener.clone();
            listener.register_step_exception(&ctx, key, &err).await;
            let mut audits = ctx.audits().clone();
            if let Some(a) = audits.find_mut(key) {
                if a.is_open() {
                    a.close(now, Default::default());
                }
            }
            ctx = ctx.with_audit_ledger(audits);
            return Ok(RouteOutcome::Paused(ctx));
        }

        if err.is_skip() {
            let mut audits = ctx.audits().clone();
            if let Some(a) = audits.find_mut(key) {
                if a.is_open() {
                    a.close(now, Default::default());
                }
            }
            ctx = ctx.with_audit_ledger(audits);
            if let (Some(store), Some(sess)) = (&self.store, session) {
                store.set_status(&sess.session_id, sess.run_id, &key.canonical(), StepStatus::Skipped, vec![])?;
            }
            return Ok(RouteOutcome::Continue(ctx, common.next.clone()));
        }

        let reroute = common.next_on_error.as_ref().filter(|target| step_by_id(steps, target).is_some());
        match reroute {
            Some(target) => {
                ctx = ctx.with_step_result(
                    key.step("LastStepId"),
                    StepResponse::primary(Value::String(err.to_string())),
                );
                let mut audits = ctx.audits().clone();
                if let Some(a) = audits.find_mut(key) {
                    if a.is_open() {
                        a.close(now, Default::default());
                    }
                }
                ctx = ctx.with_audit_ledger(audits);
                if let (Some(store), Some(sess)) = (&self.store, session) {
                    store.set_status(&sess.session_id, sess.run_id, &key.canonical(), StepStatus::Error, vec![])?;
                }
                Ok(RouteOutcome::Continue(ctx, Some(target.clone())))
            }
            None => {
                let mut audits = ctx.audits().clone();
                audits.close_all_open(now);
                ctx = ctx.with_audit_ledger(audits);
                let listener = ctx.listener.clone();
                listener.register_step_exception(&ctx, key, &err).await;
                if let (Some(store), Some(sess)) = (&self.store, session) {
                    store.set_status(&sess.session_id, sess.run_id, &key.canonical(), StepStatus::Error, vec![])?;
                }
                Ok(RouteOutcome::Fatal(ctx, err))
            }
        }
    }
}

enum RouteOutcome {
    Paused(ExecutionContext),
    Continue(ExecutionContext, Option<String>),
    Fatal(ExecutionContext, ExecutionError),
}

fn step_key(key_base: &StateKey, step_id: &str, fork_slot: &Option<ForkSlot>) -> StateKey {
    let key = key_base.step(step_id);
    match fork_slot {
        Some(slot) => key.with_fork(slot.fork_id.clone(), slot.index, slot.value.clone()),
        None => key,
    }
}

pub(crate) fn step_index(steps: &[FlowStep], id: &str) -> Option<usize> {
    steps.iter().position(|s| s.id() == id)
}

pub(crate) fn step_by_id<'a>(steps: &'a [FlowStep], id: &str) -> Option<&'a FlowStep> {
    steps.iter().find(|s| s.id() == id)
}

/// Same depth-tracked forward scan as [`Pipeline::matching_join`], but over
/// an arbitrary step slice (a Split branch's body isn't part of any
/// `Pipeline::steps`, so it can't call the inherent method directly).
pub(crate) fn matching_join(steps: &[FlowStep], fork_index: usize) -> Option<usize> {
    let mut depth: i32 = 0;
    for (i, step) in steps.iter().enumerate().skip(fork_index + 1) {
        match step {
            FlowStep::Fork { .. } => depth += 1,
            FlowStep::Join { .. } => {
                if depth == 0 {
                    return Some(i);
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    None
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Required-input validation (spec.md §4.1 step 2): a required input must be
/// present directly, or via one of its declared alternates.
fn validate_inputs(pipeline: &Pipeline, ctx: &ExecutionContext) -> Result<(), ExecutionError> {
    for input in pipeline.parameters.inputs.iter().filter(|i| i.required) {
        if is_present(ctx, &pipeline.id, input.global, &input.name) {
            continue;
        }
        if input.alternates.iter().any(|alt| is_present(ctx, &pipeline.id, input.global, alt)) {
            continue;
        }
        return Err(ExecutionError::RequiredParameterMissing(input.name.clone()));
    }
    Ok(())
}

fn is_present(ctx: &ExecutionContext, pipeline_id: &str, global: bool, name: &str) -> bool {
    if global {
        ctx.global(name).is_some()
    } else {
        ctx.parameters_for(pipeline_id).is_some_and(|p| p.values.contains_key(name))
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
