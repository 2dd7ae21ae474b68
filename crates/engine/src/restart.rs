// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Restart-point computation (spec.md §4.1 step 3, §8 scenario 5, §9 open
//! question (a)).
//!
//! Resolves "open question (a)" as directed: a step with persisted status
//! `RUNNING` or `ERROR` is re-executed; only `COMPLETE` steps are skipped.
//! The scan walks the pipeline's own step order rather than `runId`, so a
//! step whose status was never recorded (never reached last run) also
//! becomes the resume point.

use indexmap::IndexMap;
use sw_core::{Pipeline, StateKey, StepResponse};
use sw_storage::{StatusRecord, StepStatus};

/// Where a restarted run should begin and what earlier results to load back
/// into the context before resuming there.
#[derive(Debug, Clone, Default)]
pub struct RestartPlan {
    pub start_index: usize,
    pub hydrated_results: Vec<(StateKey, StepResponse)>,
}

/// Computes the restart point for `pipeline` given its persisted statuses
/// and the previously persisted step responses, both keyed by canonical
/// `StateKey` string.
///
/// Walks `pipeline.steps` in order, skipping a contiguous `COMPLETE` prefix
/// and hydrating each skipped step's response. Stops at the first step that
/// is not `COMPLETE` (or has no recorded status at all). If that resume
/// step isn't declared restartable, the whole session is treated as fresh:
/// start at index 0 with nothing hydrated, since resuming mid-pipeline
/// without the pipeline's consent to restart there would replay a step the
/// pipeline author never marked safe to skip past.
pub fn compute_restart(
    pipeline: &Pipeline,
    statuses: &IndexMap<String, StatusRecord>,
    responses: &IndexMap<String, StepResponse>,
) -> RestartPlan {
    let mut start_index = 0;
    let mut hydrated_results = Vec::new();

    for (i, step) in pipeline.steps.iter().enumerate() {
        let key = StateKey::pipeline(&pipeline.id).step(step.id());
        let canonical = key.canonical();
        match statuses.get(&canonical).map(|s| s.status) {
            Some(StepStatus::Complete) => {
                if let Some(response) = responses.get(&canonical) {
                    hydrated_results.push((key, response.clone()));
                }
                start_index = i + 1;
            }
            _ => break,
        }
    }

    if start_index > 0 && start_index < pipeline.steps.len() {
        let resume_step = &pipeline.steps[start_index];
        if !pipeline.is_restartable(resume_step.id()) {
            return RestartPlan::default();
        }
    }

    RestartPlan {
        start_index,
        hydrated_results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sw_core::{FlowStep, ParameterType, Pipeline, PipelineParameters, StepCommon};
    use std::collections::HashSet;

    fn pipeline_step(id: &str) -> FlowStep {
        FlowStep::Pipeline {
            common: StepCommon {
                id: id.to_string(),
                ..Default::default()
            },
            package: "pkg".into(),
            object: "obj".into(),
            function: "fn".into(),
        }
    }

    fn pipeline(restartable: &[&str]) -> Pipeline {
        Pipeline {
            id: "p1".into(),
            name: None,
            steps: vec![pipeline_step("A"), pipeline_step("B"), pipeline_step("C"), pipeline_step("D")],
            tags: vec![],
            description: None,
            parameters: PipelineParameters {
                inputs: vec![],
                output: None,
                restartable_steps: restartable.iter().map(|s| s.to_string()).collect::<HashSet<_>>(),
            },
        }
    }

    fn status(id: &str, status: StepStatus) -> (String, StatusRecord) {
        let key = format!("p1.{id}");
        (
            key.clone(),
            StatusRecord {
                session_id: "s1".into(),
                run_id: 1,
                result_key: key,
                status,
                next_steps: vec![],
            },
        )
    }

    #[test]
    fn resumes_after_the_complete_prefix_when_restartable() {
        let pipeline = pipeline(&["C", "D"]);
        let statuses: IndexMap<_, _> = [
            status("A", StepStatus::Complete),
            status("B", StepStatus::Complete),
            status("C", StepStatus::Running),
        ]
        .into_iter()
        .collect();
        let mut responses = IndexMap::new();
        responses.insert("p1.A".to_string(), StepResponse::primary(json!("a")));
        responses.insert("p1.B".to_string(), StepResponse::primary(json!("b")));

        let plan = compute_restart(&pipeline, &statuses, &responses);
        assert_eq!(plan.start_index, 2);
        assert_eq!(plan.hydrated_results.len(), 2);
    }

    #[test]
    fn error_status_is_also_a_resume_point() {
        let pipeline = pipeline(&["B"]);
        let statuses: IndexMap<_, _> = [status("A", StepStatus::Complete), status("B", StepStatus::Error)]
            .into_iter()
            .collect();
        let plan = compute_restart(&pipeline, &statuses, &IndexMap::new());
        assert_eq!(plan.start_index, 1);
    }

    #[test]
    fn non_restartable_resume_point_falls_back_to_a_fresh_run() {
        let pipeline = pipeline(&[]);
        let statuses: IndexMap<_, _> = [status("A", StepStatus::Complete)].into_iter().collect();
        let plan = compute_restart(&pipeline, &statuses, &IndexMap::new());
        assert_eq!(plan.start_index, 0);
        assert!(plan.hydrated_results.is_empty());
    }

    #[test]
    fn no_prior_status_starts_at_the_first_step() {
        let pipeline = pipeline(&["A"]);
        let plan = compute_restart(&pipeline, &IndexMap::new(), &IndexMap::new());
        assert_eq!(plan.start_index, 0);
        assert!(plan.hydrated_results.is_empty());
    }
}
