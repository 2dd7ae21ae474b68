// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::credential::{Credential, CredentialProvider, NoCredentialProvider};
use crate::registry::EmptyPipelineRegistry;
use crate::response::StepResponse;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

fn ctx() -> ExecutionContext {
    ExecutionContext::new(
        Arc::new(crate::listener::NoopListener),
        Arc::new(EmptyPipelineRegistry),
        Arc::new(NoCredentialProvider),
    )
}

fn literal(name: &str, ty: ParameterType, value: Value) -> Parameter {
    Parameter::literal(name, ty, value)
}

fn expr(name: &str, ty: ParameterType, value: &str) -> Parameter {
    Parameter::expr(name, ty, value)
}

#[tokio::test]
async fn literal_string_passes_through() {
    let c = ctx();
    let mapper = ParameterMapper::new();
    let p = literal("x", ParameterType::String, json!("hello"));
    assert_eq!(mapper.resolve(&c, &p).await.unwrap(), json!("hello"));
}

#[tokio::test]
async fn global_prefix_resolves_from_globals() {
    let c = ctx().with_global("name", json!("wes"));
    let mapper = ParameterMapper::new();
    let p = expr("x", ParameterType::String, "!name");
    assert_eq!(mapper.resolve(&c, &p).await.unwrap(), json!("wes"));
}

#[tokio::test]
async fn global_link_redirects_lookup() {
    let c = ctx()
        .with_global("real", json!("value"))
        .with_global_link("alias", "real");
    let mapper = ParameterMapper::new();
    let p = expr("x", ParameterType::String, "!alias");
    assert_eq!(mapper.resolve(&c, &p).await.unwrap(), json!("value"));
}

#[tokio::test]
async fn missing_global_resolves_to_null() {
    let c = ctx();
    let mapper = ParameterMapper::new();
    let p = Parameter::expr("x", ParameterType::Other("any".into()), "!missing");
    assert_eq!(mapper.resolve(&c, &p).await.unwrap(), Value::Null);
}

#[tokio::test]
async fn prior_response_primary_by_at_prefix() {
    let key = StateKey::pipeline("p1").step("A");
    let c = ctx()
        .with_current_state(StateKey::pipeline("p1").step("B"))
        .with_step_result(key, StepResponse::primary(json!("RAW")));
    let mapper = ParameterMapper::new();
    let p = Parameter::expr("x", ParameterType::Other("any".into()), "@A");
    assert_eq!(mapper.resolve(&c, &p).await.unwrap(), json!("RAW"));
}

#[tokio::test]
async fn prior_response_named_by_hash_prefix() {
    let key = StateKey::pipeline("p1").step("A");
    let response = StepResponse::empty().with_named("outVal", json!(7));
    let c = ctx()
        .with_current_state(StateKey::pipeline("p1").step("B"))
        .with_step_result(key, response);
    let mapper = ParameterMapper::new();
    let p = Parameter::expr("x", ParameterType::Other("any".into()), "#A.outVal");
    assert_eq!(mapper.resolve(&c, &p).await.unwrap(), json!(7));
}

#[tokio::test]
async fn dollar_prefix_with_dotted_path_walks_object() {
    let key = StateKey::pipeline("p1").step("A");
    let response = StepResponse::primary(json!({"user": {"name": "ada"}}));
    let c = ctx()
        .with_current_state(StateKey::pipeline("p1").step("B"))
        .with_step_result(key, response);
    let mapper = ParameterMapper::new();
    let p = Parameter::expr("x", ParameterType::Other("any".into()), "$A.primary.user.name");
    assert_eq!(mapper.resolve(&c, &p).await.unwrap(), json!("ada"));
}

#[tokio::test]
async fn dollar_prefix_selects_a_named_return_by_key() {
    let key = StateKey::pipeline("p1").step("A");
    let response = StepResponse::empty().with_named("outVal", json!({"count": 3}));
    let c = ctx()
        .with_current_state(StateKey::pipeline("p1").step("B"))
        .with_step_result(key, response);
    let mapper = ParameterMapper::new();
    let p = Parameter::expr("x", ParameterType::Other("any".into()), "$A.outVal.count");
    assert_eq!(mapper.resolve(&c, &p).await.unwrap(), json!(3));
}

#[tokio::test]
async fn fork_aware_scan_returns_ordered_list() {
    let base = StateKey::pipeline("p1").step("S");
    let c = ctx()
        .with_current_state(StateKey::pipeline("p1").step("Join"))
        .with_step_result(base.with_fork("fk", 1, json!(1)), StepResponse::primary(json!(10)))
        .with_step_result(base.with_fork("fk", 0, json!(0)), StepResponse::primary(json!(0)));
    let mapper = ParameterMapper::new();
    let p = Parameter::expr("x", ParameterType::Other("any".into()), "@S");
    assert_eq!(mapper.resolve(&c, &p).await.unwrap(), json!([0, 10]));
}

#[tokio::test]
async fn current_parameter_prefix_resolves_pipeline_param() {
    let c = ctx()
        .with_current_state(StateKey::pipeline("p1"))
        .with_parameters(
            crate::context::PipelineParameterSet::new("p1").with("env", json!("prod")),
        );
    let mapper = ParameterMapper::new();
    let p = Parameter::expr("x", ParameterType::String, "?env");
    assert_eq!(mapper.resolve(&c, &p).await.unwrap(), json!("prod"));
}

#[tokio::test]
async fn credential_prefix_asks_provider() {
    struct FixedProvider;
    #[async_trait]
    impl CredentialProvider for FixedProvider {
        async fn named_credential(&self, name: &str) -> Option<Credential> {
            (name == "db").then(|| Credential::new(json!({"user": "root"})))
        }
    }
    let c = ExecutionContext::new(
        Arc::new(crate::listener::NoopListener),
        Arc::new(EmptyPipelineRegistry),
        Arc::new(FixedProvider),
    );
    let mapper = ParameterMapper::new();
    let p = Parameter::expr("x", ParameterType::Object, "%db");
    assert_eq!(mapper.resolve(&c, &p).await.unwrap(), json!({"user": "root"}));
}

#[tokio::test]
async fn alternatives_first_non_empty_wins() {
    let c = ctx().with_global("b", json!("second"));
    let mapper = ParameterMapper::new();
    let p = expr("x", ParameterType::String, "!a||!b");
    assert_eq!(mapper.resolve(&c, &p).await.unwrap(), json!("second"));
}

#[tokio::test]
async fn list_parameter_maps_element_wise() {
    let c = ctx().with_global("a", json!(1)).with_global("b", json!(2));
    let mapper = ParameterMapper::new();
    let p = literal(
        "x",
        ParameterType::List,
        json!(["!a", "!b", "literal"]),
    );
    assert_eq!(mapper.resolve(&c, &p).await.unwrap(), json!([1, 2, "literal"]));
}

#[tokio::test]
async fn object_parameter_recurses_into_nested_mapping() {
    let c = ctx().with_global("host", json!("db.local"));
    let mapper = ParameterMapper::new();
    let p = literal(
        "x",
        ParameterType::Object,
        json!({"address": "!host", "port": 5432}),
    );
    assert_eq!(
        mapper.resolve(&c, &p).await.unwrap(),
        json!({"address": "db.local", "port": 5432})
    );
}

#[tokio::test]
async fn integer_coercion_parses_string() {
    let c = ctx();
    let mapper = ParameterMapper::new();
    let p = literal("x", ParameterType::Integer, json!("42"));
    assert_eq!(mapper.resolve(&c, &p).await.unwrap(), json!(42));
}

#[tokio::test]
async fn integer_coercion_fails_on_bad_string() {
    let c = ctx();
    let mapper = ParameterMapper::new();
    let p = literal("x", ParameterType::Integer, json!("not-a-number"));
    let err = mapper.resolve(&c, &p).await.unwrap_err();
    assert!(matches!(err, ExecutionError::ParameterTypeError { .. }));
}

#[tokio::test]
async fn boolean_coercion_is_case_insensitive() {
    let c = ctx();
    let mapper = ParameterMapper::new();
    let p = literal("x", ParameterType::Boolean, json!("TRUE"));
    assert_eq!(mapper.resolve(&c, &p).await.unwrap(), json!(true));
}

#[tokio::test]
async fn unknown_type_passes_through_unchanged() {
    let c = ctx();
    let mapper = ParameterMapper::new();
    let p = literal("x", ParameterType::Other("customType".into()), json!({"raw": 1}));
    assert_eq!(mapper.resolve(&c, &p).await.unwrap(), json!({"raw": 1}));
}

#[tokio::test]
async fn mapper_idempotence_p6() {
    let c = ctx().with_global("x", json!(5));
    let mapper = ParameterMapper::new();
    let p = expr("y", ParameterType::Integer, "!x");
    let a = mapper.resolve(&c, &p).await.unwrap();
    let b = mapper.resolve(&c, &p).await.unwrap();
    assert_eq!(a, b);
}

#[tokio::test]
async fn optional_unwrap_collapses_missing_global_to_null_not_error() {
    let c = ctx();
    let mapper = ParameterMapper::new();
    let p = Parameter::expr("x", ParameterType::Other("any".into()), "!maybeMissing");
    assert_eq!(mapper.resolve(&c, &p).await.unwrap(), Value::Null);
}
