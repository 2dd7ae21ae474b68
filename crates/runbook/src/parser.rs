// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pipeline definition parsing (TOML, HCL, and JSON) into [`sw_core::Pipeline`].

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use sw_core::{FlowStep, Pipeline};
use thiserror::Error;

/// Pipeline definition file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Toml,
    Hcl,
    Json,
}

/// Errors that can occur while parsing or validating a pipeline book.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HCL parse error: {0}")]
    Hcl(#[from] hcl::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("pipeline '{0}' has no id")]
    MissingId(String),

    #[error("pipeline '{pipeline}' has duplicate step id '{step}'")]
    DuplicateStepId { pipeline: String, step: String },

    #[error("pipeline '{pipeline}' step '{step}' {field} references unknown step '{target}'")]
    UnknownStepReference {
        pipeline: String,
        step: String,
        field: &'static str,
        target: String,
    },

    #[error("pipeline '{pipeline}' fork step '{step}' has no matching join")]
    UnmatchedFork { pipeline: String, step: String },

    #[error("pipeline '{pipeline}' restartable step '{step}' does not exist")]
    UnknownRestartableStep { pipeline: String, step: String },
}

/// A parsed file of pipeline definitions, keyed by pipeline id.
///
/// HCL's labeled-block form (`pipeline "build" { ... }`) produces a map;
/// TOML/JSON typically use `[[pipelines]]` array-of-tables with an explicit
/// `id` field. Both are accepted: `pipelines` deserializes as a map either
/// way, since `Pipeline::id` defaults to empty and is fixed up from the map
/// key below when absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineBook {
    #[serde(default, alias = "pipeline")]
    pub pipelines: IndexMap<String, Pipeline>,
}

/// Parses TOML pipeline content (convenience wrapper).
pub fn parse_pipelines(content: &str) -> Result<IndexMap<String, Pipeline>, ParseError> {
    parse_pipelines_with_format(content, Format::Toml)
}

/// Parses pipeline definitions in the given format, fixing up ids from map
/// keys and validating structural invariants (§3 "every Fork has exactly one
/// reachable Join", step-reference integrity, restartable-step existence).
pub fn parse_pipelines_with_format(
    content: &str,
    format: Format,
) -> Result<IndexMap<String, Pipeline>, ParseError> {
    let mut book: PipelineBook = match format {
        Format::Toml => toml::from_str(content)?,
        Format::Hcl => hcl::from_str(content)?,
        Format::Json => serde_json::from_str(content)?,
    };

    for (key, pipeline) in &mut book.pipelines {
        if pipeline.id.is_empty() {
            pipeline.id = key.clone();
        }
    }

    for pipeline in book.pipelines.values() {
        validate_pipeline(pipeline)?;
    }

    Ok(book.pipelines)
}

fn validate_pipeline(pipeline: &Pipeline) -> Result<(), ParseError> {
    if pipeline.id.is_empty() {
        return Err(ParseError::MissingId(
            pipeline.name.clone().unwrap_or_default(),
        ));
    }

    let mut seen_steps = HashSet::new();
    for step in &pipeline.steps {
        if !seen_steps.insert(step.id()) {
            return Err(ParseError::DuplicateStepId {
                pipeline: pipeline.id.clone(),
                step: step.id().to_string(),
            });
        }
    }

    for step in &pipeline.steps {
        let common = step.common();
        for (field, target) in [("next", &common.next), ("next_on_error", &common.next_on_error)] {
            if let Some(target) = target {
                if pipeline.step_by_id(target).is_none() {
                    return Err(ParseError::UnknownStepReference {
                        pipeline: pipeline.id.clone(),
                        step: step.id().to_string(),
                        field,
                        target: target.clone(),
                    });
                }
            }
        }
    }

    for (index, step) in pipeline.steps.iter().enumerate() {
        if let FlowStep::Fork { .. } = step {
            if pipeline.matching_join(index).is_none() {
                return Err(ParseError::UnmatchedFork {
                    pipeline: pipeline.id.clone(),
                    step: step.id().to_string(),
                });
            }
        }
    }

    for step_id in &pipeline.parameters.restartable_steps {
        if pipeline.step_by_id(step_id).is_none() {
            return Err(ParseError::UnknownRestartableStep {
                pipeline: pipeline.id.clone(),
                step: step_id.clone(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "parser_tests.rs"]
mod tests;
