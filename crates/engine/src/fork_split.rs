// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fork/Split Engine (C9, spec.md §4.1 "Fork step"/"Split step"): runs a
//! Fork's shared body once per list element, or a Split's independently
//! declared branches, concurrently, then folds the results for Join/Merge.
//!
//! Both share the same slot-concurrency shape: `futures::stream::iter(..)
//! .buffer_unordered(n)` over async blocks that borrow the executor and
//! step list directly, bounded by a width sized from
//! `spark.forkJoin.parallelism` or
//! [`crate::config::ExecutorConfig::default_fork_parallelism`]. `tokio::spawn`
//! would require `'static` futures, which these borrowing closures aren't;
//! `buffer_unordered` runs them concurrently within this call without that
//! requirement, since every awaited future completes before it returns.

use crate::executor::{ForkSlot, PipelineExecutor, StepLoopOutcome};
use futures::stream::{self, StreamExt};
use serde_json::Value;
use sw_core::{ExecutionContext, ExecutionError, FlowStep, ForkMethod, StateKey, StepResponse};

use crate::error::EngineError;
use crate::executor::SessionRef;

/// What a completed fork/split fan-out produced.
pub(crate) enum ForkRunOutcome {
    Paused(ExecutionContext),
    Completed {
        merged: ExecutionContext,
        response: StepResponse,
        all_failed: Option<ExecutionError>,
    },
}

struct SlotResult {
    index: usize,
    ctx: ExecutionContext,
    outcome: Result<Value, String>,
}

fn effective_parallelism(ctx: &ExecutionContext, exec: &PipelineExecutor, total: usize) -> usize {
    let from_global = ctx
        .global("spark.forkJoin.parallelism")
        .and_then(|v| v.as_u64())
        .map(|n| n as usize);
    from_global
        .or(exec.config().default_fork_parallelism)
        .unwrap_or(total)
        .max(1)
}

/// Runs a Fork's shared body once per element of `list`, each in its own
/// slot keyed by `key_base.step(stepId).with_fork(fork_id, index, value)`.
/// `body_start`/`terminal_id` bound the body's step range (empty when the
/// Fork has no body before its Join); `join_id` names the Join step whose
/// key receives the folded response.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn run_fork<'a>(
    exec: &'a PipelineExecutor,
    pipeline_id: &'a str,
    steps: &'a [FlowStep],
    fork_id: &'a str,
    fork_method: ForkMethod,
    list: &'a [Value],
    body_start: Option<&'a str>,
    terminal_id: &'a str,
    join_id: &'a str,
    key_base: &'a StateKey,
    ctx: ExecutionContext,
    session: Option<&'a SessionRef>,
) -> Result<ForkRunOutcome, EngineError> {
    if list.is_empty() {
        return Ok(ForkRunOutcome::Completed {
            merged: ctx,
            response: StepResponse::empty(),
            all_failed: None,
        });
    }

    let Some(body_start) = body_start else {
        let response = StepResponse::primary(Value::Array(list.to_vec()));
        return Ok(ForkRunOutcome::Completed {
            merged: ctx,
            response,
            all_failed: None,
        });
    }

    let parallelism = effective_parallelism(&ctx, exec, list.len());

    let run_slot = |index: usize, value: Value| {
        let ctx = ctx.clone();
        async move {
            let slot = ForkSlot {
                fork_id: fork_id.to_string(),
                index,
                value: value.clone(),
            };
            let result = exec
                .run_steps(
                    pipeline_id,
                    steps,
                    Some(body_start.to_string()),
                    Some(join_id),
                    key_base,
                    Some(slot),
                    ctx,
                    session,
                )
                .await;
            match result {
                Ok(StepLoopOutcome::Done(out_ctx, _)) => {
                    let key = key_base.step(terminal_id).with_fork(fork_id.to_string(), index, value);
                    let value = out_ctx
                        .step_result(&key)
                        .and_then(|r| r.primary_return.clone())
                        .unwrap_or(Value::Null);
                    SlotResult {
                        index,
                        ctx: out_ctx,
                        outcome: Ok(value),
                    }
                }
                Ok(StepLoopOutcome::Paused(out_ctx)) => SlotResult {
                    index,
                    ctx: out_ctx,
                    outcome: Err("paused".to_string()),
                },
                Ok(StepLoopOutcome::Failed(out_ctx, err)) => SlotResult {
                    index,
                    ctx: out_ctx,
                    outcome: Err(err.to_string()),
                },
                Err(e) => SlotResult {
                    index,
                    ctx: ctx.clone(),
                    outcome: Err(e.to_string()),
                },
            }
        }
    };

    let results = match fork_method {
        ForkMethod::Parallel => {
            run_bounded(parallelism, list.iter().cloned().enumerate().map(|(i, v)| run_slot(i, v))).await
        }
        ForkMethod::Serial => {
            let mut out = Vec::with_capacity(list.len());
            for (i, v) in list.iter().cloned().enumerate() {
                out.push(run_slot(i, v).await);
            }
            out
        }
    };

    fold_slots(ctx, results, list.len(), FoldKind::Fork { fork_id })
}

/// Runs a Split's independently declared branches concurrently, one "fork
/// slot" per branch with `index` = position in `branches`, `value` = branch
/// name — reusing [`StateKey::with_fork`] rather than a new key shape.
pub(crate) async fn run_split(
    exec: &PipelineExecutor,
    pipeline_id: &str,
    split_id: &str,
    branches: &indexmap::IndexMap<String, Vec<FlowStep>>,
    key_base: &StateKey,
    ctx: ExecutionContext,
    session: Option<&SessionRef>,
) -> Result<ForkRunOutcome, EngineError> {
    if branches.is_empty() {
        return Ok(ForkRunOutcome::Completed {
            merged: ctx,
            response: StepResponse::empty(),
            all_failed: None,
        });
    }

    let parallelism = effective_parallelism(&ctx, exec, branches.len());

    let run_branch = |index: usize, name: String, body: &Vec<FlowStep>| {
        let ctx = ctx.clone();
        let start_id = body.first().map(|s| s.id().to_string());
        async move {
            let slot = ForkSlot {
                fork_id: split_id.to_string(),
                index,
                value: Value::String(name.clone()),
            };
            let last_id = body.last().map(|s| s.id().to_string());
            let result = exec
                .run_steps(pipeline_id, body, start_id, None, key_base, Some(slot), ctx, session)
                .await;
            match (result, last_id) {
                (Ok(StepLoopOutcome::Done(out_ctx, _)), Some(last_id)) => {
                    let key = key_base
                        .step(&last_id)
                        .with_fork(split_id.to_string(), index, Value::String(name.clone()));
                    let value = out_ctx
                        .step_result(&key)
                        .and_then(|r| r.primary_return.clone())
                        .unwrap_or(Value::Null);
                    SlotResult {
                        index,
                        ctx: out_ctx,
                        outcome: Ok(value),
                    }
                }
                (Ok(StepLoopOutcome::Done(out_ctx, _)), None) => SlotResult {
                    index,
                    ctx: out_ctx,
                    outcome: Ok(Value::Null),
                },
                (Ok(StepLoopOutcome::Paused(out_ctx)), _) => SlotResult {
                    index,
                    ctx: out_ctx,
                    outcome: Err("paused".to_string()),
                },
                (Ok(StepLoopOutcome::Failed(out_ctx, err)), _) => SlotResult {
                    index,
                    ctx: out_ctx,
                    outcome: Err(err.to_string()),
                },
                (Err(e), _) => SlotResult {
                    index,
                    ctx: ctx.clone(),
                    outcome: Err(e.to_string()),
                },
            }
        }
    };

    let branch_names: Vec<String> = branches.keys().cloned().collect();
    let futures = branches
        .iter()
        .enumerate()
        .map(|(i, (name, body))| run_branch(i, name.clone(), body));
    let results = run_bounded(parallelism, futures).await;

    fold_slots(
        ctx,
        results,
        branch_names.len(),
        FoldKind::Split {
            split_id,
            branch_names: &branch_names,
        },
    )
}

/// Which step raised the fold and how to label/escalate its failures — the
/// two callers differ only in the exception variant and whether a failed
/// slot is labeled by index (Fork) or branch name (Split).
enum FoldKind<'a> {
    Fork { fork_id: &'a str },
    Split { split_id: &'a str, branch_names: &'a [String] },
}

/// Shared fan-in: merges every slot's resulting context (existing wins per
/// §4.8 so Join/Merge sees each slot's own writes), all-fail escalates to a
/// fatal error, otherwise assembles the ordered primary list plus a
/// `"failures"` named return for the partial-failure subset (spec.md §4.1
/// "Fork step"/"Split step" partial failure semantics).
fn fold_slots(
    base: ExecutionContext,
    mut results: Vec<SlotResult>,
    total: usize,
    kind: FoldKind<'_>,
) -> Result<ForkRunOutcome, EngineError> {
    results.sort_by_key(|r| r.index);

    if results.iter().any(|r| matches!(&r.outcome, Err(msg) if msg == "paused")) {
        let merged = results.into_iter().fold(base, |acc, r| acc.merge(&r.ctx));
        return Ok(ForkRunOutcome::Paused(merged));
    }

    let label = |index: usize| match &kind {
        FoldKind::Fork { .. } => index.to_string(),
        FoldKind::Split { branch_names, .. } => branch_names[index].clone(),
    };

    let mut values = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    for r in &results {
        match &r.outcome {
            Ok(v) => values.push(v.clone()),
            Err(msg) => failures.push((label(r.index), msg.clone())),
        }
    }

    let merged = results.into_iter().fold(base, |acc, r| acc.merge(&r.ctx));

    if failures.len() == total {
        let err = match kind {
            FoldKind::Fork { fork_id } => ExecutionError::ForkedPipelineStepException {
                fork_id: fork_id.to_string(),
                total,
                failures: failures.into_iter().map(|(i, m)| (i.parse().unwrap_or(0), m)).collect(),
            },
            FoldKind::Split { split_id, .. } => ExecutionError::SplitStepException {
                split_id: split_id.to_string(),
                total,
                failures,
            },
        };
        return Ok(ForkRunOutcome::Completed {
            merged,
            response: StepResponse::empty(),
            all_failed: Some(err),
        });
    }

    let mut response = StepResponse::primary(Value::Array(values));
    if !failures.is_empty() {
        let failures_value = Value::Array(
            failures
                .into_iter()
                .map(|(label, m)| serde_json::json!({"slot": label, "error": m}))
                .collect(),
        );
        response = response.with_named("failures", failures_value);
    }
    Ok(ForkRunOutcome::Completed {
        merged,
        response,
        all_failed: None,
    })
}

/// Runs every future in `futures` concurrently, at most `permits` at a time.
/// `buffer_unordered` rather than `tokio::spawn`: these futures borrow the
/// executor and step list non-`'static`, and every one of them completes
/// before this function returns, so no `'static` bound is needed. Completion
/// order is not preserved; callers re-sort by slot index.
async fn run_bounded<F, T>(permits: usize, futures: impl IntoIterator<Item = F>) -> Vec<T>
where
    F: std::future::Future<Output = T>,
{
    stream::iter(futures).buffer_unordered(permits.max(1)).collect().await
}

#[cfg(test)]
#[path = "fork_split_tests.rs"]
mod tests;
