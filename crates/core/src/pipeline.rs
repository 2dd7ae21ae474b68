// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Declarative pipeline definition: an ordered sequence of [`FlowStep`]s plus
//! the input/output parameter contract a pipeline publishes to its callers.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// A declared input of a pipeline, validated before execution starts
/// (executor algorithm step 2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputParameter {
    pub name: String,
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub alternates: Vec<String>,
}

impl InputParameter {
    pub fn required(name: impl Into<String>, global: bool) -> Self {
        Self {
            name: name.into(),
            global,
            required: true,
            alternates: Vec::new(),
        }
    }
}

/// The parameter contract of a pipeline: declared inputs, an output mapping
/// consumers can use to shape the pipeline's final response, and the subset
/// of step ids eligible to be a restart point (executor algorithm step 3).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineParameters {
    #[serde(default)]
    pub inputs: Vec<InputParameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<IndexMap<String, String>>,
    #[serde(default)]
    pub restartable_steps: HashSet<String>,
}

/// Declared type of a [`Parameter`]'s value. Unknown/forward-compatible type
/// names are preserved in `Other` rather than rejected, since the mapper
/// passes unrecognized types through unchanged (§4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterType {
    String,
    Integer,
    Boolean,
    Double,
    Script,
    ScalaScript,
    List,
    Object,
    Result,
    Other(String),
}

impl ParameterType {
    pub fn as_str(&self) -> &str {
        match self {
            ParameterType::String => "string",
            ParameterType::Integer => "integer",
            ParameterType::Boolean => "boolean",
            ParameterType::Double => "double",
            ParameterType::Script => "script",
            ParameterType::ScalaScript => "scalascript",
            ParameterType::List => "list",
            ParameterType::Object => "object",
            ParameterType::Result => "result",
            ParameterType::Other(s) => s,
        }
    }
}

impl From<&str> for ParameterType {
    fn from(s: &str) -> Self {
        match s {
            "string" => ParameterType::String,
            "integer" => ParameterType::Integer,
            "boolean" => ParameterType::Boolean,
            "double" => ParameterType::Double,
            "script" => ParameterType::Script,
            "scalascript" => ParameterType::ScalaScript,
            "list" => ParameterType::List,
            "object" => ParameterType::Object,
            "result" => ParameterType::Result,
            other => ParameterType::Other(other.to_string()),
        }
    }
}

impl Serialize for ParameterType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ParameterType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(ParameterType::from(s.as_str()))
    }
}

/// A single declared parameter on a step: its name, declared type, and a
/// value that is either a JSON literal or a mapper expression string (§4.3).
/// `value` uses the universal dynamic representation so `list`/`object`
/// parameters can carry nested expression strings at any depth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_type: Option<String>,
}

impl Parameter {
    pub fn literal(name: impl Into<String>, param_type: ParameterType, value: Value) -> Self {
        Self {
            name: name.into(),
            param_type,
            value,
            class_name: None,
            parameter_type: None,
        }
    }

    pub fn expr(name: impl Into<String>, param_type: ParameterType, expr: impl Into<String>) -> Self {
        Self::literal(name, param_type, Value::String(expr.into()))
    }
}

/// Fields shared by every [`FlowStep`] variant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepCommon {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_template_id: Option<String>,
    #[serde(default)]
    pub params: Vec<Parameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_on_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute_if_empty: Option<String>,
    #[serde(default)]
    pub retry_limit: u32,
}

/// How a Fork step's slots are scheduled relative to one another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForkMethod {
    Serial,
    Parallel,
}

/// The sum type of executable steps (§3 "Step (FlowStep)").
///
/// Fork and Split both carry their governed body inline:
/// - a Fork's body is the flat sub-sequence between the Fork and its
///   matching Join, found positionally in the enclosing [`Pipeline::steps`]
///   (the source text calls Join "the required terminator of a Fork", which
///   only makes sense for a single linear body shared across slots).
/// - a Split's branches cannot share one linear position (N branches run
///   concurrently), so each branch is an explicitly named, embedded step
///   list; the shared Merge is the step that follows the Split positionally
///   in the outer sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum FlowStep {
    Pipeline {
        #[serde(flatten)]
        common: StepCommon,
        package: String,
        object: String,
        function: String,
    },
    Branch {
        #[serde(flatten)]
        common: StepCommon,
    },
    Fork {
        #[serde(flatten)]
        common: StepCommon,
        /// Mapper expression resolving to the list iterated over.
        fork_by_value: String,
        fork_method: ForkMethod,
    },
    Join {
        #[serde(flatten)]
        common: StepCommon,
    },
    Split {
        #[serde(flatten)]
        common: StepCommon,
        branches: IndexMap<String, Vec<FlowStep>>,
    },
    Merge {
        #[serde(flatten)]
        common: StepCommon,
    },
    StepGroup {
        #[serde(flatten)]
        common: StepCommon,
        pipeline_id: String,
    },
}

impl FlowStep {
    pub fn common(&self) -> &StepCommon {
        match self {
            FlowStep::Pipeline { common, .. }
            | FlowStep::Branch { common, .. }
            | FlowStep::Fork { common, .. }
            | FlowStep::Join { common, .. }
            | FlowStep::Split { common, .. }
            | FlowStep::Merge { common, .. }
            | FlowStep::StepGroup { common, .. } => common,
        }
    }

    pub fn common_mut(&mut self) -> &mut StepCommon {
        match self {
            FlowStep::Pipeline { common, .. }
            | FlowStep::Branch { common, .. }
            | FlowStep::Fork { common, .. }
            | FlowStep::Join { common, .. }
            | FlowStep::Split { common, .. }
            | FlowStep::Merge { common, .. }
            | FlowStep::StepGroup { common, .. } => common,
        }
    }

    pub fn id(&self) -> &str {
        &self.common().id
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            FlowStep::Pipeline { .. } => "pipeline",
            FlowStep::Branch { .. } => "branch",
            FlowStep::Fork { .. } => "fork",
            FlowStep::Join { .. } => "join",
            FlowStep::Split { .. } => "split",
            FlowStep::Merge { .. } => "merge",
            FlowStep::StepGroup { .. } => "step-group",
        }
    }

    pub fn is_join(&self) -> bool {
        matches!(self, FlowStep::Join { .. })
    }
}

/// A declarative pipeline: an ordered sequence of steps plus its parameter
/// contract (§3 "Pipeline").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    /// Injected from the enclosing map key when a pipeline is defined as a
    /// labeled block (HCL `pipeline "id" { ... }`) rather than with an
    /// explicit `id` field.
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub steps: Vec<FlowStep>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: PipelineParameters,
}

impl Pipeline {
    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id() == step_id)
    }

    pub fn step_by_id(&self, step_id: &str) -> Option<&FlowStep> {
        self.steps.iter().find(|s| s.id() == step_id)
    }

    pub fn first_step(&self) -> Option<&FlowStep> {
        self.steps.first()
    }

    /// Given the index of a Fork step, finds the index of its matching Join
    /// by scanning forward, tracking nesting depth so an inner fork's own
    /// Join does not terminate the outer one (spec.md §3 invariant 3: every
    /// Fork has exactly one reachable Join).
    pub fn matching_join(&self, fork_index: usize) -> Option<usize> {
        let mut depth: i32 = 0;
        for (i, step) in self.steps.iter().enumerate().skip(fork_index + 1) {
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

    /// Whether `step_id` is eligible as a restart point (§4.1 step 3).
    pub fn is_restartable(&self, step_id: &str) -> bool {
        self.parameters.restartable_steps.contains(step_id)
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
