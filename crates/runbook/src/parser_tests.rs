// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn json_pipeline_with_explicit_id_parses() {
    let content = r#"{
        "pipelines": {
            "ignored-key": {
                "id": "p1",
                "steps": [
                    {"type": "pipeline", "id": "A", "package": "pkg", "object": "obj", "function": "run", "next": "B"},
                    {"type": "branch", "id": "B"}
                ]
            }
        }
    }"#;
    let pipelines = parse_pipelines_with_format(content, Format::Json).unwrap();
    let pipeline = pipelines.get("ignored-key").unwrap();
    assert_eq!(pipeline.id, "p1");
    assert_eq!(pipeline.steps.len(), 2);
}

#[test]
fn map_key_is_used_as_id_when_absent() {
    let content = r#"{
        "pipelines": {
            "build": {
                "steps": [
                    {"type": "branch", "id": "A"}
                ]
            }
        }
    }"#;
    let pipelines = parse_pipelines_with_format(content, Format::Json).unwrap();
    assert_eq!(pipelines.get("build").unwrap().id, "build");
}

#[test]
fn duplicate_step_ids_are_rejected() {
    let content = r#"{
        "pipelines": {
            "p1": {
                "id": "p1",
                "steps": [
                    {"type": "branch", "id": "A"},
                    {"type": "branch", "id": "A"}
                ]
            }
        }
    }"#;
    let err = parse_pipelines_with_format(content, Format::Json).unwrap_err();
    assert!(matches!(err, ParseError::DuplicateStepId { .. }));
}

#[test]
fn unknown_next_reference_is_rejected() {
    let content = r#"{
        "pipelines": {
            "p1": {
                "id": "p1",
                "steps": [
                    {"type": "branch", "id": "A", "next": "nonexistent"}
                ]
            }
        }
    }"#;
    let err = parse_pipelines_with_format(content, Format::Json).unwrap_err();
    assert!(matches!(err, ParseError::UnknownStepReference { field: "next", .. }));
}

#[test]
fn fork_without_matching_join_is_rejected() {
    let content = r#"{
        "pipelines": {
            "p1": {
                "id": "p1",
                "steps": [
                    {"type": "fork", "id": "F", "fork_by_value": "!items", "fork_method": "parallel"},
                    {"type": "branch", "id": "B"}
                ]
            }
        }
    }"#;
    let err = parse_pipelines_with_format(content, Format::Json).unwrap_err();
    assert!(matches!(err, ParseError::UnmatchedFork { .. }));
}

#[test]
fn fork_with_matching_join_is_accepted() {
    let content = r#"{
        "pipelines": {
            "p1": {
                "id": "p1",
                "steps": [
                    {"type": "fork", "id": "F", "fork_by_value": "!items", "fork_method": "parallel"},
                    {"type": "branch", "id": "B"},
                    {"type": "join", "id": "J"}
                ]
            }
        }
    }"#;
    let pipelines = parse_pipelines_with_format(content, Format::Json).unwrap();
    assert_eq!(pipelines.get("p1").unwrap().steps.len(), 3);
}

#[test]
fn unknown_restartable_step_is_rejected() {
    let content = r#"{
        "pipelines": {
            "p1": {
                "id": "p1",
                "steps": [{"type": "branch", "id": "A"}],
                "parameters": {"restartable_steps": ["Z"]}
            }
        }
    }"#;
    let err = parse_pipelines_with_format(content, Format::Json).unwrap_err();
    assert!(matches!(err, ParseError::UnknownRestartableStep { .. }));
}
