// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parameter resolution against an [`ExecutionContext`] (§4.3 Parameter Mapper).
//!
//! A [`Parameter::value`] is a string (or, for `list`/`object` parameters, a
//! nested JSON value whose leaf strings are themselves expressions) resolved
//! left to right through the prefix grammar of spec.md §4.3. Resolution is
//! synchronous except for the `%` credential prefix, which asks the
//! [`CredentialProvider`] — so [`ParameterMapper::resolve`] is `async`.

use crate::context::ExecutionContext;
use crate::error::ExecutionError;
use crate::pipeline::{Parameter, ParameterType};
use crate::state_key::StateKey;
use serde_json::Value;

/// Resolves declared [`Parameter`]s to concrete [`Value`]s against an
/// [`ExecutionContext`] (§4.3).
#[derive(Debug, Clone, Copy, Default)]
pub struct ParameterMapper;

impl ParameterMapper {
    pub fn new() -> Self {
        Self
    }

    /// Resolves `param.value` to a concrete [`Value`], applying the type
    /// coercion named by `param.param_type` as the final step.
    pub async fn resolve(
        &self,
        ctx: &ExecutionContext,
        param: &Parameter,
    ) -> Result<Value, ExecutionError> {
        let resolved = self.resolve_value(ctx, &param.param_type, &param.value).await?;
        coerce(&param.name, &param.param_type, resolved)
    }

    /// Recursively resolves a raw JSON value, which may be a literal, an
    /// expression string, or (for `list`/`object` parameters) a nested
    /// container of either.
    #[allow(clippy::only_used_in_recursion)]
    fn resolve_value<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        param_type: &'a ParameterType,
        value: &'a Value,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Value, ExecutionError>> + 'a>>
    {
        Box::pin(async move {
            match value {
                Value::String(s) => self.resolve_expr(ctx, s).await,
                Value::Array(items) if matches!(param_type, ParameterType::List) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.resolve_value(ctx, &ParameterType::Other(String::new()), item).await?);
                    }
                    Ok(Value::Array(out))
                }
                Value::Object(map) if matches!(param_type, ParameterType::Object) => {
                    let mut out = serde_json::Map::with_capacity(map.len());
                    for (k, v) in map {
                        out.insert(
                            k.clone(),
                            self.resolve_value(ctx, &ParameterType::Other(String::new()), v)
                                .await?,
                        );
                    }
                    Ok(Value::Object(out))
                }
                other => Ok(other.clone()),
            }
        })
    }

    /// Resolves a single expression string: splits on `||` alternatives
    /// (lowest precedence, spec.md §9 open question (b)), then resolves
    /// each alternative via its prefix, returning the first non-empty.
    async fn resolve_expr(&self, ctx: &ExecutionContext, expr: &str) -> Result<Value, ExecutionError> {
        let alternatives: Vec<&str> = expr.split("||").collect();
        let mut last = Value::Null;
        for alt in &alternatives {
            let resolved = self.resolve_token(ctx, alt).await?;
            if !is_empty(&resolved) {
                return Ok(resolved);
            }
            last = resolved;
        }
        Ok(last)
    }

    /// Resolves one `||`-separated alternative: a single prefixed token, or
    /// a bare literal when no recognized prefix is present.
    async fn resolve_token(&self, ctx: &ExecutionContext, token: &str) -> Result<Value, ExecutionError> {
        let Some(first) = token.chars().next() else {
            return Ok(Value::String(String::new()));
        };
        match first {
            '!' => Ok(resolve_global(ctx, &token[1..])),
            '$' => resolve_prior_response(ctx, &token[1..], Selector::Full),
            '@' => resolve_prior_response(ctx, &token[1..], Selector::Primary),
            '#' => resolve_prior_response(ctx, &token[1..], Selector::Named),
            '&' => Ok(resolve_pipeline_lookup(ctx, &token[1..])),
            '?' => Ok(resolve_current_parameter(ctx, &token[1..])),
            '%' => resolve_credential(ctx, &token[1..]).await,
            _ => Ok(Value::String(token.to_string())),
        }
    }
}

/// Which part of a matched step response (or set of responses) a `$`/`@`/`#`
/// token selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selector {
    Full,
    Primary,
    Named,
}

/// `false`/`0`/empty-collection do NOT count as empty for the `||`
/// alternative operator — only `Null` and the empty string do, matching the
/// "first non-empty wins" reading of spec.md §4.3.
fn is_empty(value: &Value) -> bool {
    matches!(value, Value::Null) || matches!(value, Value::String(s) if s.is_empty())
}

/// `!name` global lookup, honoring `GlobalLinks` indirection and unwrapping
/// one optional layer (a missing global resolves to `Null`, which already
/// models the "unwrapped, possibly absent" value).
fn resolve_global(ctx: &ExecutionContext, rest: &str) -> Value {
    let (name, path) = split_head(rest);
    if let Some(link) = ctx.global_link(name) {
        return resolve_global(ctx, link);
    }
    let base = ctx.global(name).cloned().unwrap_or(Value::Null);
    walk_path(&base, path)
}

/// `?name` pipeline-parameter lookup against the innermost enclosing
/// pipeline's own parameter set.
fn resolve_current_parameter(ctx: &ExecutionContext, rest: &str) -> Value {
    let (name, path) = split_head(rest);
    let pipeline_id = ctx
        .current_state_info()
        .map(|k| k.pipeline_id.as_str())
        .unwrap_or_default();
    let base = ctx
        .parameters_for(pipeline_id)
        .and_then(|p| p.values.get(name))
        .cloned()
        .unwrap_or(Value::Null);
    walk_path(&base, path)
}

/// `&pipelineId` pipeline-manager lookup, used by step-groups. Resolves to a
/// JSON rendering of the pipeline definition (id + step count) since the
/// mapper's job is only to produce a `Value` the calling step can inspect;
/// the executor itself uses [`crate::registry::PipelineRegistry`] directly
/// to actually invoke the referenced pipeline.
fn resolve_pipeline_lookup(ctx: &ExecutionContext, pipeline_id: &str) -> Value {
    match ctx.pipeline_registry.get(pipeline_id) {
        Some(pipeline) => serde_json::json!({
            "id": pipeline.id,
            "stepCount": pipeline.steps.len(),
        }),
        None => Value::Null,
    }
}

async fn resolve_credential(ctx: &ExecutionContext, name: &str) -> Result<Value, ExecutionError> {
    match ctx.credentials.named_credential(name).await {
        Some(cred) => Ok(cred.0),
        None => Ok(Value::Null),
    }
}

/// `$stepId[.primary|.namedKey][.dotted.path]`, `@stepId`, `#stepId`.
///
/// Resolution: first try `head` as a plain step id of the current pipeline;
/// if nothing is stored there, fall back to a fork-aware scan by `stepId`
/// across every pipeline — if more than one slot produced a result for that
/// step, the match is the ordered list of indexed responses.
fn resolve_prior_response(
    ctx: &ExecutionContext,
    rest: &str,
    selector: Selector,
) -> Result<Value, ExecutionError> {
    let (head, path) = split_head(rest);
    let (value_selector, path) = selector_and_path(selector, path);

    if let Some(response) = ctx
        .current_state_info()
        .map(|cur| StateKey::pipeline(cur.pipeline_id.clone()).step(head))
        .as_ref()
        .and_then(|k| ctx.step_result(k))
    {
        return Ok(walk_path(&select(response, &value_selector), path));
    }

    let matches = ctx.step_results_by_step_id(head);
    if matches.is_empty() {
        return Ok(Value::Null);
    }
    if matches.len() == 1 {
        return Ok(walk_path(&select(matches[0].1, &value_selector), path));
    }
    let list: Vec<Value> = matches.iter().map(|(_, r)| select(r, &value_selector)).collect();
    Ok(walk_path(&Value::Array(list), path))
}

/// What a resolved step-response sub-value a `$`/`@`/`#` token ultimately
/// selects, once the `$` prefix's optional `.primary`/`.namedKey` leading
/// path segment (spec.md §4.3 grammar) has been peeled off.
enum ValueSelector {
    Primary,
    Named,
    NamedKey(String),
}

/// `@`/`#` already commit to primary/named, so their path is left untouched.
/// The generic `$` prefix must first consume a leading `.primary` or
/// `.namedKey` segment (an absent path defaults to `primary`, matching
/// `@stepId`'s shorthand) before the remaining dotted path is walked.
fn selector_and_path(selector: Selector, path: &str) -> (ValueSelector, &str) {
    match selector {
        Selector::Primary => (ValueSelector::Primary, path),
        Selector::Named => (ValueSelector::Named, path),
        Selector::Full => {
            if path.is_empty() {
                return (ValueSelector::Primary, path);
            }
            let (segment, remaining) = split_head(path);
            if segment == "primary" {
                (ValueSelector::Primary, remaining)
            } else {
                (ValueSelector::NamedKey(segment.to_string()), remaining)
            }
        }
    }
}

fn select(response: &crate::response::StepResponse, selector: &ValueSelector) -> Value {
    match selector {
        ValueSelector::Primary => response.primary_return.clone().unwrap_or(Value::Null),
        ValueSelector::Named => response
            .named_returns
            .clone()
            .map(|m| Value::Object(m.into_iter().collect()))
            .unwrap_or(Value::Null),
        ValueSelector::NamedKey(key) => response
            .named_returns
            .as_ref()
            .and_then(|m| m.get(key))
            .cloned()
            .unwrap_or(Value::Null),
    }
}

/// Splits `"head.rest.of.path"` into `("head", "rest.of.path")`. An absent
/// `.` yields an empty remainder.
fn split_head(s: &str) -> (&str, &str) {
    match s.split_once('.') {
        Some((head, rest)) => (head, rest),
        None => (s, ""),
    }
}

/// Walks a dotted path through nested maps/lists (numeric segments index
/// into arrays; anything else is an object-key lookup). An empty path
/// returns `value` unchanged. A miss at any segment resolves to `Null`.
fn walk_path(value: &Value, path: &str) -> Value {
    if path.is_empty() {
        return value.clone();
    }
    let mut current = value.clone();
    for segment in path.split('.') {
        current = match &current {
            Value::Object(map) => map.get(segment).cloned().unwrap_or(Value::Null),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(Value::Null),
            _ => Value::Null,
        };
    }
    current
}

/// Conservative type coercion (§4.3): `integer`/`boolean`/`double` parse or
/// fail; `string` stringifies scalars; unknown types pass through unchanged.
fn coerce(name: &str, param_type: &ParameterType, value: Value) -> Result<Value, ExecutionError> {
    match param_type {
        ParameterType::Integer => match &value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(|n| Value::Number(n.into()))
                .map_err(|_| type_error(name, "integer", &value)),
            Value::Null => Ok(Value::Null),
            _ => Err(type_error(name, "integer", &value)),
        },
        ParameterType::Double => match &value {
            Value::Number(_) => Ok(value),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| type_error(name, "double", &value)),
            Value::Null => Ok(Value::Null),
            _ => Err(type_error(name, "double", &value)),
        },
        ParameterType::Boolean => match &value {
            Value::Bool(_) => Ok(value),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(type_error(name, "boolean", &value)),
            },
            Value::Null => Ok(Value::Null),
            _ => Err(type_error(name, "boolean", &value)),
        },
        ParameterType::String => match value {
            Value::String(s) => Ok(Value::String(s)),
            Value::Null => Ok(Value::Null),
            other => Ok(Value::String(scalar_to_string(&other))),
        },
        _ => Ok(value),
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

fn type_error(name: &str, expected: &str, value: &Value) -> ExecutionError {
    ExecutionError::ParameterTypeError {
        name: name.to_string(),
        expected: expected.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
#[path = "mapper_tests.rs"]
mod tests;
